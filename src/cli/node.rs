use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::{
    cli::common,
    orchestrator::{CertificateSource, EditRequest, InstallRequest, Orchestrator, Outcome},
    registry::{parse_inbounds, Method},
};

#[derive(Args, Clone, Debug)]
pub struct NameArgs {
    /// Node name
    #[arg(short, long)]
    pub name: String,
}

#[derive(Args, Clone, Debug)]
pub struct InstallCommand {
    /// Node name (2-50 chars, starts with a letter)
    #[arg(short, long)]
    pub name: String,
    /// Runtime method: container or process
    #[arg(short, long, default_value = "container")]
    pub method: String,
    /// Service port, allocated if omitted
    #[arg(long)]
    pub service_port: Option<u32>,
    /// Xray API port, allocated if omitted
    #[arg(long = "xray-port")]
    pub xray_api_port: Option<u32>,
    /// Path to the panel client certificate
    #[arg(long, conflicts_with = "cert_content")]
    pub cert: Option<PathBuf>,
    /// Panel client certificate content
    #[arg(long)]
    pub cert_content: Option<String>,
    /// Comma separated inbound tags to accept (all if omitted)
    #[arg(long)]
    pub inbounds: Option<String>,
}

impl InstallCommand {
    pub async fn execute(&self, orch: &mut Orchestrator) -> Result<()> {
        let method: Method = self.method.parse()?;
        let certificate = match (&self.cert, &self.cert_content) {
            (_, Some(content)) => CertificateSource::Content(content.clone()),
            (Some(path), None) => CertificateSource::File(path.clone()),
            (None, None) => CertificateSource::Prompt,
        };

        let request = InstallRequest {
            name: self.name.clone(),
            method,
            service_port: self.service_port,
            xray_api_port: self.xray_api_port,
            certificate,
            inbounds: self.inbounds.as_deref().map(parse_inbounds).unwrap_or_default(),
        };

        println!("\n📦 Node Installation");
        println!("{}", "═".repeat(50));

        match orch.install(request).await? {
            Outcome::Done(record) => {
                println!("✅ {} - Installed", record.name);
                common::print_record(&record);
            }
            Outcome::Cancelled => println!("🚫 Installation cancelled"),
        }
        Ok(())
    }
}

#[derive(Args, Clone, Debug)]
pub struct UninstallCommand {
    /// Node name
    #[arg(short, long)]
    pub name: String,
    /// Also remove the data directory without asking
    #[arg(long)]
    pub remove_data: bool,
}

impl UninstallCommand {
    pub async fn execute(&self, orch: &mut Orchestrator) -> Result<()> {
        match orch.uninstall(&self.name, self.remove_data).await? {
            Outcome::Done(removed_data) => {
                println!("✅ {} - Uninstalled", self.name);
                if !removed_data {
                    println!("   📁 Data directory kept");
                }
            }
            Outcome::Cancelled => println!("🚫 Uninstall cancelled"),
        }
        Ok(())
    }
}

#[derive(Args, Clone, Debug)]
pub struct EditCommand {
    /// Node name
    #[arg(short, long)]
    pub name: String,
    /// New service port
    #[arg(long)]
    pub service_port: Option<u32>,
    /// New Xray API port
    #[arg(long = "xray-port")]
    pub xray_api_port: Option<u32>,
    /// New comma separated inbound tags; an empty value accepts all
    #[arg(long)]
    pub inbounds: Option<String>,
}

impl EditCommand {
    pub async fn execute(&self, orch: &mut Orchestrator) -> Result<()> {
        let request = EditRequest {
            name: self.name.clone(),
            service_port: self.service_port,
            xray_api_port: self.xray_api_port,
            inbounds: self.inbounds.as_deref().map(parse_inbounds),
        };

        match orch.edit(request).await? {
            Outcome::Done(record) => {
                println!("✅ {} - Updated and restarted", record.name);
                common::print_record(&record);
            }
            Outcome::Cancelled => println!("🚫 Edit cancelled"),
        }
        Ok(())
    }
}

#[derive(Args, Clone, Debug)]
pub struct StatusCommand {
    /// Node name; all nodes if omitted
    #[arg(short, long)]
    pub name: Option<String>,
}

impl StatusCommand {
    pub async fn execute(&self, orch: &mut Orchestrator) -> Result<()> {
        match &self.name {
            Some(name) => {
                let status = orch.status(name).await?;
                common::print_status(&status);
            }
            None => {
                let statuses = orch.status_all().await?;
                common::print_status_table(&statuses);
            }
        }
        Ok(())
    }
}

#[derive(Args, Clone, Debug)]
pub struct LogsCommand {
    /// Node name
    #[arg(short, long)]
    pub name: String,
    /// Keep streaming new log lines
    #[arg(short, long)]
    pub follow: bool,
}

impl LogsCommand {
    pub async fn execute(&self, orch: &mut Orchestrator) -> Result<()> {
        orch.logs(&self.name, self.follow).await?;
        Ok(())
    }
}

pub async fn start(orch: &mut Orchestrator, name: &str) -> Result<()> {
    orch.start(name).await?;
    println!("✅ {} - Started", name);
    Ok(())
}

pub async fn stop(orch: &mut Orchestrator, name: &str) -> Result<()> {
    orch.stop(name).await?;
    println!("✅ {} - Stopped", name);
    Ok(())
}

pub async fn restart(orch: &mut Orchestrator, name: &str) -> Result<()> {
    orch.restart(name).await?;
    println!("✅ {} - Restarted", name);
    Ok(())
}

/// Print node names, one per line.
pub fn list(orch: &Orchestrator) -> Result<()> {
    let names = orch.list()?;
    for name in names {
        println!("{}", name);
    }
    Ok(())
}
