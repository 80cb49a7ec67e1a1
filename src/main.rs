use std::str::FromStr;

use clap::Parser;
use log::{error, LevelFilter};

use nodectl::cli::{self, Cli};
use nodectl::config::Config;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // init logger
    env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::from_str(&cli.log_level).unwrap_or(LevelFilter::Info))
        .init();

    let config = match Config::resolve(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load config: {:#}", e);
            std::process::exit(1);
        }
    };

    let mut orchestrator = match cli::build_orchestrator(&config, cli.yes) {
        Ok(orch) => orch,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = cli.command.execute(&mut orchestrator).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
