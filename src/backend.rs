/// Lifecycle backends that materialize and drive a node's runtime.
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;
use crate::registry::{Method, NodeRecord, PortPair};
use crate::utils;

/// Docker Compose backed runtime.
pub mod container;

/// systemd backed native process runtime.
pub mod process;

pub use container::ContainerBackend;
pub use process::ProcessBackend;

/// Runtime management for one kind of node.
///
/// Implementations must tolerate leftovers from an earlier failed attempt:
/// `materialize` overwrites, `teardown` ignores what is already gone.
#[async_trait]
pub trait LifecycleBackend: Send + Sync {
    fn method(&self) -> Method;

    /// Create the node's directories, certificate and launch configuration.
    async fn materialize(&self, record: &NodeRecord, cert_content: &str) -> Result<()>;

    async fn start(&self, record: &NodeRecord) -> Result<()>;

    async fn stop(&self, record: &NodeRecord) -> Result<()>;

    async fn restart(&self, record: &NodeRecord) -> Result<()>;

    async fn is_running(&self, name: &str) -> Result<bool>;

    /// Container id or process id of the running node.
    async fn runtime_identifier(&self, name: &str) -> Result<Option<String>>;

    /// Rewrite the persisted launch configuration for new ports and inbounds.
    async fn rewrite_config(
        &self,
        record: &NodeRecord,
        ports: PortPair,
        inbounds: &[String],
    ) -> Result<()>;

    /// Stop the runtime and remove the install directory, and the data directory if asked.
    async fn teardown(&self, record: &NodeRecord, remove_data: bool) -> Result<()>;

    async fn logs(&self, record: &NodeRecord, follow: bool) -> Result<()>;
}

/// The two backends, selected per record by its method.
pub struct Backends {
    container: Box<dyn LifecycleBackend>,
    process: Box<dyn LifecycleBackend>,
}

impl Backends {
    pub fn new(container: Box<dyn LifecycleBackend>, process: Box<dyn LifecycleBackend>) -> Self {
        Self { container, process }
    }

    pub fn for_method(&self, method: Method) -> &dyn LifecycleBackend {
        match method {
            Method::Container => self.container.as_ref(),
            Method::Process => self.process.as_ref(),
        }
    }
}

/// Paths of the xray binary and assets, for runtimes that do not bundle them.
#[derive(Debug, Clone)]
pub struct XrayPaths {
    pub executable: PathBuf,
    pub assets: PathBuf,
}

/// Environment handed to the node runtime, in a stable order.
pub fn node_environment(
    record: &NodeRecord,
    ports: PortPair,
    inbounds: &[String],
    xray: Option<&XrayPaths>,
) -> Vec<(String, String)> {
    let path = |p: &Path| p.to_string_lossy().into_owned();
    let mut env = vec![
        ("SERVICE_PORT".to_string(), ports.service.to_string()),
        ("XRAY_API_PORT".to_string(), ports.xray_api.to_string()),
        ("SSL_CLIENT_CERT_FILE".to_string(), path(&record.cert_file)),
        (
            "SSL_CERT_FILE".to_string(),
            path(&record.data_dir.join("ssl_cert.pem")),
        ),
        (
            "SSL_KEY_FILE".to_string(),
            path(&record.data_dir.join("ssl_key.pem")),
        ),
    ];
    if let Some(xray) = xray {
        env.push(("XRAY_EXECUTABLE_PATH".to_string(), path(&xray.executable)));
        env.push(("XRAY_ASSETS_PATH".to_string(), path(&xray.assets)));
    }
    if !inbounds.is_empty() {
        env.push(("INBOUNDS".to_string(), inbounds.join(",")));
    }
    env
}

/// Create install/data directories and write the client certificate.
pub(crate) fn prepare_node_dirs(record: &NodeRecord, cert_content: &str) -> Result<()> {
    utils::create_dir(&record.install_dir, None)?;
    utils::create_dir(&record.data_dir, Some(0o700))?;
    utils::create_file(&record.cert_file, cert_content, Some(0o644))
}

/// Remove what `prepare_node_dirs` and the backend created.
pub(crate) fn remove_node_dirs(record: &NodeRecord, remove_data: bool) -> Result<()> {
    utils::remove_dir(&record.install_dir)?;
    if remove_data {
        utils::remove_dir(&record.data_dir)?;
    }
    Ok(())
}
