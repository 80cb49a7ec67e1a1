/// CLI interface and commands.

/// Common output helpers for CLI.
pub mod common;

/// Registry config entries.
pub mod config;

/// Node lifecycle commands.
pub mod node;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::{
    backend::{Backends, ContainerBackend, ProcessBackend},
    config::Config,
    orchestrator::{Orchestrator, TerminalInput},
    ports::{PortAllocator, SystemProber},
    registry::RegistryStore,
};

#[derive(Parser)]
#[command(name = "nodectl")]
#[command(about = "🛰️  Proxy Node Manager - Install, edit and control isolated node instances on this host")]
pub struct Cli {
    /// Config file (default: <config dir>/nodectl/config.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    pub log_level: String,

    /// Answer yes to every confirmation prompt
    #[arg(short, long, global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 📦 Install a new node
    Install(node::InstallCommand),
    /// 🗑️  Uninstall a node
    Uninstall(node::UninstallCommand),
    /// ✏️  Change a node's ports or inbounds
    Edit(node::EditCommand),
    /// 📊 Show live status of one or all nodes
    Status(node::StatusCommand),
    /// ▶️  Start a node
    Start(node::NameArgs),
    /// ⏹️  Stop a node
    Stop(node::NameArgs),
    /// 🔄 Restart a node
    Restart(node::NameArgs),
    /// 📜 Show node logs
    Logs(node::LogsCommand),
    /// 📝 List node names
    List,
    /// ⚙️  Manage registry settings
    Config(config::ConfigCommand),
}

impl Commands {
    pub async fn execute(&self, orch: &mut Orchestrator) -> Result<()> {
        match self {
            Commands::Install(cmd) => cmd.execute(orch).await,
            Commands::Uninstall(cmd) => cmd.execute(orch).await,
            Commands::Edit(cmd) => cmd.execute(orch).await,
            Commands::Status(cmd) => cmd.execute(orch).await,
            Commands::Start(args) => node::start(orch, &args.name).await,
            Commands::Stop(args) => node::stop(orch, &args.name).await,
            Commands::Restart(args) => node::restart(orch, &args.name).await,
            Commands::Logs(cmd) => cmd.execute(orch).await,
            Commands::List => node::list(orch),
            Commands::Config(cmd) => cmd.execute(orch),
        }
    }
}

/// Wire the registry, allocator and backends described by `config`.
pub fn build_orchestrator(config: &Config, assume_yes: bool) -> Result<Orchestrator> {
    let registry = RegistryStore::open(&config.paths.registry).with_context(|| {
        format!(
            "Failed to open registry {}",
            config.paths.registry.display()
        )
    })?;
    registry
        .ensure_initialized()
        .context("Failed to initialize registry")?;

    let allocator = PortAllocator::new(Box::new(SystemProber::new()), config.ports.clone());
    let backends = Backends::new(
        Box::new(ContainerBackend::new(config.container.clone())),
        Box::new(ProcessBackend::new(config.process.clone())),
    );

    Ok(Orchestrator::new(
        config.paths.clone(),
        registry,
        allocator,
        backends,
        Box::new(TerminalInput::new(assume_yes)),
    ))
}
