use std::path::PathBuf;

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::backend::{self, LifecycleBackend, XrayPaths};
use crate::config::ProcessConfig;
use crate::error::{NodeError, Result};
use crate::registry::{Method, NodeRecord, PortPair};
use crate::utils;

const ENV_FILE: &str = ".env";
const ENTRYPOINT: &str = "main.py";

/// Runs each node as a systemd unit executing the node runtime from a source checkout.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    config: ProcessConfig,
}

impl ProcessBackend {
    pub fn new(config: ProcessConfig) -> Self {
        Self { config }
    }

    pub fn unit_name(&self, name: &str) -> String {
        format!("{}{}.service", self.config.unit_prefix, name)
    }

    pub fn unit_path(&self, name: &str) -> PathBuf {
        self.config.unit_dir.join(self.unit_name(name))
    }

    pub fn env_path(record: &NodeRecord) -> PathBuf {
        record.install_dir.join(ENV_FILE)
    }

    fn xray_paths(&self) -> XrayPaths {
        XrayPaths {
            executable: self.config.xray_executable.clone(),
            assets: self.config.xray_assets.clone(),
        }
    }

    /// `KEY="value"` lines for the unit's EnvironmentFile.
    pub fn render_env(&self, record: &NodeRecord, ports: PortPair, inbounds: &[String]) -> String {
        let xray = self.xray_paths();
        backend::node_environment(record, ports, inbounds, Some(&xray))
            .into_iter()
            .map(|(key, value)| {
                format!(
                    "{}=\"{}\"\n",
                    key,
                    value.replace('\\', "\\\\").replace('"', "\\\"")
                )
            })
            .collect()
    }

    pub fn render_unit(&self, record: &NodeRecord) -> String {
        let source_dir = self.config.source_dir.to_string_lossy();
        let python = self.config.python.to_string_lossy().into_owned();
        let entry = self
            .config
            .source_dir
            .join(ENTRYPOINT)
            .to_string_lossy()
            .into_owned();
        let exec = shell_words::join([python.as_str(), entry.as_str()]);

        format!(
            "[Unit]
Description=Proxy node {name}
After=network.target nss-lookup.target

[Service]
Type=simple
WorkingDirectory={source_dir}
EnvironmentFile={env_file}
ExecStart={exec}
Restart=on-failure
RestartSec=5
LimitNOFILE=infinity

[Install]
WantedBy=multi-user.target
",
            name = record.name,
            source_dir = source_dir,
            env_file = Self::env_path(record).display(),
            exec = exec,
        )
    }

    /// Write env file and unit without touching systemd.
    pub fn write_files(&self, record: &NodeRecord, cert_content: &str) -> Result<()> {
        backend::prepare_node_dirs(record, cert_content)?;
        self.write_env(record, record.ports, &record.inbounds)?;
        utils::create_file(
            &self.unit_path(&record.name),
            &self.render_unit(record),
            Some(0o644),
        )
    }

    fn write_env(&self, record: &NodeRecord, ports: PortPair, inbounds: &[String]) -> Result<()> {
        utils::create_file(
            &Self::env_path(record),
            &self.render_env(record, ports, inbounds),
            Some(0o600),
        )
    }

    fn check_runtime(&self) -> Result<()> {
        let entry = self.config.source_dir.join(ENTRYPOINT);
        if !entry.exists() {
            return Err(NodeError::Backend(format!(
                "Node runtime not found at {} (set [process].source_dir)",
                entry.display()
            )));
        }
        if !self.config.python.exists() {
            return Err(NodeError::Backend(format!(
                "Python interpreter not found at {}",
                self.config.python.display()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl LifecycleBackend for ProcessBackend {
    fn method(&self) -> Method {
        Method::Process
    }

    async fn materialize(&self, record: &NodeRecord, cert_content: &str) -> Result<()> {
        self.check_runtime()?;
        self.write_files(record, cert_content)?;
        utils::daemon_reload().await?;
        debug!("Installed unit {}", self.unit_name(&record.name));
        Ok(())
    }

    async fn start(&self, record: &NodeRecord) -> Result<()> {
        let unit = self.unit_name(&record.name);
        utils::enable_service(&unit).await?;
        utils::start_service(&unit).await?;
        info!("Service {} started", unit);
        Ok(())
    }

    async fn stop(&self, record: &NodeRecord) -> Result<()> {
        utils::stop_service(&self.unit_name(&record.name)).await?;
        Ok(())
    }

    async fn restart(&self, record: &NodeRecord) -> Result<()> {
        utils::restart_service(&self.unit_name(&record.name)).await?;
        Ok(())
    }

    async fn is_running(&self, name: &str) -> Result<bool> {
        utils::service_is_active(&self.unit_name(name)).await
    }

    async fn runtime_identifier(&self, name: &str) -> Result<Option<String>> {
        Ok(utils::service_main_pid(&self.unit_name(name))
            .await?
            .map(|pid| pid.to_string()))
    }

    async fn rewrite_config(
        &self,
        record: &NodeRecord,
        ports: PortPair,
        inbounds: &[String],
    ) -> Result<()> {
        self.write_env(record, ports, inbounds)?;
        debug!("Rewrote environment for '{}'", record.name);
        Ok(())
    }

    async fn teardown(&self, record: &NodeRecord, remove_data: bool) -> Result<()> {
        let unit = self.unit_name(&record.name);
        if let Err(e) = utils::stop_service(&unit).await {
            warn!("Failed to stop {}: {}", unit, e);
        }
        if let Err(e) = utils::disable_service(&unit).await {
            warn!("Failed to disable {}: {}", unit, e);
        }

        utils::remove_file(&self.unit_path(&record.name))?;
        if let Err(e) = utils::daemon_reload().await {
            warn!("systemctl daemon-reload failed: {}", e);
        }

        backend::remove_node_dirs(record, remove_data)
    }

    async fn logs(&self, record: &NodeRecord, follow: bool) -> Result<()> {
        let unit = self.unit_name(&record.name);
        let mut args = vec!["-u", unit.as_str(), "-n", "100", "--no-pager"];
        if follow {
            args.push("-f");
        }
        utils::execute_attached("journalctl", &args).await
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, path::Path};

    use super::*;
    use crate::backend::tests::sample_record;

    fn backend(root: &Path) -> ProcessBackend {
        ProcessBackend::new(ProcessConfig {
            unit_dir: root.join("units"),
            ..ProcessConfig::default()
        })
    }

    #[test]
    fn test_render_env() {
        let backend = ProcessBackend::new(ProcessConfig::default());
        let record = sample_record(Path::new("/srv"), "alpha", Method::Process);
        let env = backend.render_env(&record, record.ports, &record.inbounds);

        assert!(env.contains("SERVICE_PORT=\"62050\"\n"));
        assert!(env.contains("XRAY_API_PORT=\"62051\"\n"));
        assert!(env.contains("XRAY_EXECUTABLE_PATH=\"/usr/local/bin/xray\"\n"));
        assert!(env.contains("INBOUNDS=\"VLESS TCP,VMess WS\"\n"));
    }

    #[test]
    fn test_render_unit() {
        let backend = ProcessBackend::new(ProcessConfig::default());
        let record = sample_record(Path::new("/srv"), "alpha", Method::Process);
        let unit = backend.render_unit(&record);

        assert_eq!(backend.unit_name("alpha"), "nodectl-alpha.service");
        assert!(unit.contains("EnvironmentFile=/srv/install/alpha/.env\n"));
        assert!(unit.contains("ExecStart=/usr/bin/python3 /opt/marzban-node/main.py\n"));
        assert!(unit.contains("WorkingDirectory=/opt/marzban-node\n"));
    }

    #[tokio::test]
    async fn test_write_files_and_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path());
        let record = sample_record(dir.path(), "alpha", Method::Process);

        backend.write_files(&record, "CERT").unwrap();
        assert!(backend.unit_path("alpha").exists());
        assert_eq!(fs::read_to_string(&record.cert_file).unwrap(), "CERT");

        backend
            .rewrite_config(&record, PortPair::new(40000, 40001), &[])
            .await
            .unwrap();
        let env = fs::read_to_string(ProcessBackend::env_path(&record)).unwrap();
        assert!(env.contains("SERVICE_PORT=\"40000\""));
        assert!(!env.contains("INBOUNDS"));
    }

    #[tokio::test]
    async fn test_materialize_requires_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ProcessBackend::new(ProcessConfig {
            source_dir: dir.path().join("missing"),
            unit_dir: dir.path().join("units"),
            ..ProcessConfig::default()
        });
        let record = sample_record(dir.path(), "alpha", Method::Process);

        let err = backend.materialize(&record, "CERT").await.unwrap_err();
        assert!(matches!(err, NodeError::Backend(_)));
        assert!(!record.install_dir.exists());
    }
}
