use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};

use crate::orchestrator::Orchestrator;

#[derive(Args, Clone, Debug)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// List all settings
    List,
    /// Show one setting
    Get {
        key: String,
    },
    /// Create or change a setting
    Set {
        key: String,
        value: String,
    },
}

impl ConfigCommand {
    pub fn execute(&self, orch: &mut Orchestrator) -> Result<()> {
        match &self.action {
            ConfigAction::List => {
                let entries = orch.registry().list_config()?;
                println!("\n⚙️  Settings ({})", entries.len());
                println!("{}", "─".repeat(50));
                for entry in entries {
                    println!("  {} = {}", entry.key, entry.value);
                }
                println!("{}", "─".repeat(50));
            }
            ConfigAction::Get { key } => {
                let entry = orch
                    .registry()
                    .get_config(key)?
                    .ok_or_else(|| anyhow!("Setting '{}' not found", key))?;
                println!("{}", entry.value);
            }
            ConfigAction::Set { key, value } => {
                orch.registry_mut().set_config(key, value)?;
                println!("✅ {} = {}", key, value);
            }
        }
        Ok(())
    }
}
