/// Configuration serialization and deserialization.
use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

const CONFIG_DIR: &str = "nodectl";
const CONFIG_FILE: &str = "config.toml";

// config like:
// [paths]
// registry = "/var/lib/nodectl/registry.db"
// install_root = "/opt/nodectl"
// data_root = "/var/lib/nodectl/nodes"
//
// [ports]
// base = 62050
// increment = 10
//
// [container]
// image = "gozargah/marzban-node:latest"
// compose = "docker compose"
//
// [process]
// source_dir = "/opt/marzban-node"
// python = "/usr/bin/python3"
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub ports: PortsConfig,
    pub container: ContainerConfig,
    pub process: ProcessConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(config)
    }

    /// Resolve the config for this invocation.
    ///
    /// An explicit path must exist. Without one, the per-user config file is
    /// used when present and built-in defaults otherwise.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        match default_path() {
            Some(path) if path.exists() => {
                debug!("Loading config from {}", path.display());
                Self::load(path)
            }
            _ => {
                info!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }
}

/// `<config dir>/nodectl/config.toml`, if the platform has a config dir.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub registry: PathBuf,
    pub install_root: PathBuf,
    pub data_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            registry: PathBuf::from("/var/lib/nodectl/registry.db"),
            install_root: PathBuf::from("/opt/nodectl"),
            data_root: PathBuf::from("/var/lib/nodectl/nodes"),
        }
    }
}

impl PathsConfig {
    pub fn install_dir(&self, name: &str) -> PathBuf {
        self.install_root.join(name)
    }

    pub fn data_dir(&self, name: &str) -> PathBuf {
        self.data_root.join(name)
    }

    pub fn cert_file(&self, name: &str) -> PathBuf {
        self.data_dir(name).join("ssl_client_cert.pem")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    /// Service port suggested when the registry is empty
    pub base: u16,
    /// Distance between consecutive nodes' suggested service ports
    pub increment: u16,
    pub linear_attempts: u32,
    pub random_attempts: u32,
    pub random_range_start: u16,
    /// Exclusive
    pub random_range_end: u16,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            base: 62050,
            increment: 10,
            linear_attempts: 100,
            random_attempts: 100,
            random_range_start: 50000,
            random_range_end: 60000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    pub image: String,
    /// Compose invocation, split with shell rules (e.g. "docker compose" or "docker-compose")
    pub compose: String,
    pub container_prefix: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: String::from("gozargah/marzban-node:latest"),
            compose: String::from("docker compose"),
            container_prefix: String::from("nodectl-"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    pub source_dir: PathBuf,
    pub python: PathBuf,
    pub unit_dir: PathBuf,
    pub unit_prefix: String,
    pub xray_executable: PathBuf,
    pub xray_assets: PathBuf,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("/opt/marzban-node"),
            python: PathBuf::from("/usr/bin/python3"),
            unit_dir: PathBuf::from("/etc/systemd/system"),
            unit_prefix: String::from("nodectl-"),
            xray_executable: PathBuf::from("/usr/local/bin/xray"),
            xray_assets: PathBuf::from("/usr/local/share/xray"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [paths]
            install_root = "/srv/nodes"

            [ports]
            base = 40000
            "#,
        )
        .unwrap();

        assert_eq!(config.paths.install_root, PathBuf::from("/srv/nodes"));
        assert_eq!(
            config.paths.registry,
            PathBuf::from("/var/lib/nodectl/registry.db")
        );
        assert_eq!(config.ports.base, 40000);
        assert_eq!(config.ports.increment, 10);
        assert_eq!(config.container.compose, "docker compose");
    }

    #[test]
    fn test_node_layout() {
        let paths = PathsConfig::default();
        assert_eq!(paths.install_dir("alpha"), PathBuf::from("/opt/nodectl/alpha"));
        assert_eq!(
            paths.cert_file("alpha"),
            PathBuf::from("/var/lib/nodectl/nodes/alpha/ssl_client_cert.pem")
        );
    }

    #[test]
    fn test_explicit_missing_config_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::resolve(Some(&dir.path().join("nope.toml"))).is_err());
    }
}
