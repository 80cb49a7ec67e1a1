/// Node lifecycle workflows composing the registry, port allocator and backends.
use std::{fs, path::PathBuf};

use log::{debug, info, warn};

use crate::backend::{Backends, LifecycleBackend};
use crate::config::PathsConfig;
use crate::error::{NodeError, PortRole, Result};
use crate::ports::PortAllocator;
use crate::registry::{
    validate_name, FieldUpdate, Method, NodeRecord, PortPair, RegistryStore,
};

/// Operator input abstraction.
pub mod input;

pub use input::{InputProvider, TerminalInput};

/// Where an install takes the panel's client certificate from.
#[derive(Debug, Clone)]
pub enum CertificateSource {
    Content(String),
    File(PathBuf),
    /// Ask the operator to paste it
    Prompt,
}

#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub name: String,
    pub method: Method,
    pub service_port: Option<u32>,
    pub xray_api_port: Option<u32>,
    pub certificate: CertificateSource,
    pub inbounds: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EditRequest {
    pub name: String,
    pub service_port: Option<u32>,
    pub xray_api_port: Option<u32>,
    /// `Some(vec![])` clears the filter
    pub inbounds: Option<Vec<String>>,
}

/// Result of a command the operator may decline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Done(T),
    Cancelled,
}

/// Live runtime state of one node.
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub record: NodeRecord,
    pub running: bool,
    pub identifier: Option<String>,
    /// Set when the backend could not be queried; `running` is then unknown
    pub fault: Option<String>,
}

/// Check a certificate has PEM BEGIN/END CERTIFICATE delimiter lines, in order.
pub fn validate_certificate(content: &str) -> Result<()> {
    let lines: Vec<&str> = content.lines().map(str::trim).collect();
    let begin = lines.iter().position(|l| l.contains("BEGIN CERTIFICATE"));
    let end = lines.iter().rposition(|l| l.contains("END CERTIFICATE"));

    match (begin, end) {
        (Some(b), Some(e)) if b < e => Ok(()),
        (None, _) => Err(NodeError::InvalidCertificate(
            "missing BEGIN CERTIFICATE line".to_string(),
        )),
        (_, None) => Err(NodeError::InvalidCertificate(
            "missing END CERTIFICATE line".to_string(),
        )),
        _ => Err(NodeError::InvalidCertificate(
            "END CERTIFICATE appears before BEGIN CERTIFICATE".to_string(),
        )),
    }
}

/// Runs install/edit/uninstall and the runtime commands for managed nodes.
///
/// The registry is the only source of truth for which nodes exist and which
/// ports they own; runtime state is always asked of the backend.
pub struct Orchestrator {
    paths: PathsConfig,
    registry: RegistryStore,
    allocator: PortAllocator,
    backends: Backends,
    input: Box<dyn InputProvider>,
}

impl Orchestrator {
    pub fn new(
        paths: PathsConfig,
        registry: RegistryStore,
        allocator: PortAllocator,
        backends: Backends,
        input: Box<dyn InputProvider>,
    ) -> Self {
        Self {
            paths,
            registry,
            allocator,
            backends,
            input,
        }
    }

    pub fn registry(&self) -> &RegistryStore {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut RegistryStore {
        &mut self.registry
    }

    fn backend(&self, method: Method) -> &dyn LifecycleBackend {
        self.backends.for_method(method)
    }

    pub async fn install(&mut self, req: InstallRequest) -> Result<Outcome<NodeRecord>> {
        validate_name(&req.name)?;
        if self.registry.exists(&req.name)? {
            return Err(NodeError::AlreadyExists(req.name));
        }

        let ports = self.resolve_install_ports(req.service_port, req.xray_api_port)?;
        let cert = self.load_certificate(&req.certificate)?;
        validate_certificate(&cert)?;

        let record = NodeRecord::new(
            &req.name,
            ports,
            req.method,
            self.paths.install_dir(&req.name),
            self.paths.data_dir(&req.name),
            self.paths.cert_file(&req.name),
            req.inbounds,
        );

        let prompt = format!(
            "Install node '{}' ({}) on ports {}?",
            record.name, record.method, record.ports
        );
        if !self.input.confirm(&prompt, true)? {
            return Ok(Outcome::Cancelled);
        }

        let data_existed = record.data_dir.exists();
        let backend = self.backends.for_method(record.method);
        info!(
            "Installing node '{}' with {} backend",
            record.name, record.method
        );

        let converged = match backend.materialize(&record, &cert).await {
            Ok(()) => backend.start(&record).await,
            Err(e) => Err(e),
        };
        if let Err(e) = converged {
            rollback_install(backend, &record, data_existed).await;
            return Err(e);
        }

        let mut record = record;
        record.status = String::from("running");
        if let Err(e) = self.registry.create(&record) {
            let backend = self.backends.for_method(record.method);
            rollback_install(backend, &record, data_existed).await;
            return Err(e);
        }

        info!("Node '{}' installed on ports {}", record.name, record.ports);
        Ok(Outcome::Done(record))
    }

    fn resolve_install_ports(
        &self,
        service: Option<u32>,
        xray_api: Option<u32>,
    ) -> Result<PortPair> {
        let registry = &self.registry;
        let allocator = &self.allocator;

        match (service, xray_api) {
            (Some(service), Some(xray_api)) => {
                allocator.validate_pair(registry, service, xray_api, None)
            }
            (Some(service), None) => {
                let service = allocator.validate_port(registry, PortRole::Service, service, None)?;
                let xray_api = allocator.allocate_xray_for(registry, service, None)?;
                Ok(PortPair::new(service, xray_api))
            }
            (None, Some(xray_api)) => {
                let xray_api =
                    allocator.validate_port(registry, PortRole::XrayApi, xray_api, None)?;
                let service = allocator.allocate_service_for(registry, xray_api, None)?;
                Ok(PortPair::new(service, xray_api))
            }
            (None, None) => allocator.allocate_pair(registry, None),
        }
    }

    fn load_certificate(&self, source: &CertificateSource) -> Result<String> {
        match source {
            CertificateSource::Content(content) => Ok(content.clone()),
            CertificateSource::File(path) => fs::read_to_string(path).map_err(|e| {
                NodeError::InvalidCertificate(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                ))
            }),
            CertificateSource::Prompt => self.input.read_certificate(),
        }
    }

    pub async fn edit(&mut self, req: EditRequest) -> Result<Outcome<NodeRecord>> {
        let current = self.registry.get(&req.name)?;
        if req.service_port.is_none() && req.xray_api_port.is_none() && req.inbounds.is_none() {
            return Err(NodeError::InvalidInput(
                "nothing to change: give --service-port, --xray-port or --inbounds".to_string(),
            ));
        }

        let service = req
            .service_port
            .unwrap_or(current.ports.service as u32);
        let xray_api = req
            .xray_api_port
            .unwrap_or(current.ports.xray_api as u32);
        let ports =
            self.allocator
                .validate_pair(&self.registry, service, xray_api, Some(&current.name))?;
        let inbounds = req.inbounds.unwrap_or_else(|| current.inbounds.clone());

        let prompt = format!(
            "Apply ports {} and inbounds [{}] to node '{}'?",
            ports,
            inbounds.join(", "),
            current.name
        );
        if !self.input.confirm(&prompt, true)? {
            return Ok(Outcome::Cancelled);
        }

        let backend = self.backends.for_method(current.method);
        backend.rewrite_config(&current, ports, &inbounds).await?;

        let updates = [
            FieldUpdate::ServicePort(ports.service),
            FieldUpdate::XrayApiPort(ports.xray_api),
            FieldUpdate::Inbounds(inbounds),
        ];
        if let Err(e) = self.registry.update(&current.name, &updates) {
            let backend = self.backends.for_method(current.method);
            if let Err(restore) = backend
                .rewrite_config(&current, current.ports, &current.inbounds)
                .await
            {
                warn!(
                    "Failed to restore launch config of '{}': {}",
                    current.name, restore
                );
            }
            return Err(e);
        }

        let updated = self.registry.get(&current.name)?;
        self.backend(updated.method).restart(&updated).await?;
        self.set_status_hint(&updated.name, "running");

        info!("Node '{}' now on ports {}", updated.name, updated.ports);
        Ok(Outcome::Done(updated))
    }

    /// Remove a node. `remove_data` forces data removal; otherwise an
    /// interactive operator is asked.
    pub async fn uninstall(&mut self, name: &str, remove_data: bool) -> Result<Outcome<bool>> {
        let record = self.registry.get(name)?;

        if !self
            .input
            .confirm(&format!("Uninstall node '{}'?", record.name), false)?
        {
            return Ok(Outcome::Cancelled);
        }

        let remove_data = remove_data
            || (self.input.is_interactive()
                && self.input.confirm(
                    &format!("Also remove data directory {}?", record.data_dir.display()),
                    false,
                )?);

        self.backend(record.method)
            .teardown(&record, remove_data)
            .await?;
        self.registry.delete(&record.name)?;

        info!("Node '{}' uninstalled", record.name);
        Ok(Outcome::Done(remove_data))
    }

    pub async fn status(&mut self, name: &str) -> Result<NodeStatus> {
        let record = self.registry.get(name)?;
        self.observe(record).await
    }

    /// Status of every node, in registry creation order.
    ///
    /// A node whose backend cannot be queried is still listed, with `fault` set.
    pub async fn status_all(&mut self) -> Result<Vec<NodeStatus>> {
        let records = self.registry.list()?;
        let mut statuses = Vec::with_capacity(records.len());
        for record in records {
            match self.observe(record.clone()).await {
                Ok(status) => statuses.push(status),
                Err(e) => {
                    warn!("Could not query node '{}': {}", record.name, e);
                    statuses.push(NodeStatus {
                        record,
                        running: false,
                        identifier: None,
                        fault: Some(e.to_string()),
                    });
                }
            }
        }
        Ok(statuses)
    }

    async fn observe(&mut self, record: NodeRecord) -> Result<NodeStatus> {
        let backend = self.backend(record.method);
        let running = backend.is_running(&record.name).await?;
        let identifier = if running {
            backend.runtime_identifier(&record.name).await?
        } else {
            None
        };

        let hint = if running { "running" } else { "stopped" };
        if record.status != hint {
            self.set_status_hint(&record.name, hint);
        }

        Ok(NodeStatus {
            record,
            running,
            identifier,
            fault: None,
        })
    }

    pub async fn start(&mut self, name: &str) -> Result<()> {
        let record = self.registry.get(name)?;
        self.backend(record.method).start(&record).await?;
        self.set_status_hint(name, "running");
        Ok(())
    }

    pub async fn stop(&mut self, name: &str) -> Result<()> {
        let record = self.registry.get(name)?;
        self.backend(record.method).stop(&record).await?;
        self.set_status_hint(name, "stopped");
        Ok(())
    }

    pub async fn restart(&mut self, name: &str) -> Result<()> {
        let record = self.registry.get(name)?;
        self.backend(record.method).restart(&record).await?;
        self.set_status_hint(name, "running");
        Ok(())
    }

    /// Attach to a node's logs. The registry lock is released first, since
    /// a followed log can run for as long as the operator keeps it open.
    pub async fn logs(&mut self, name: &str, follow: bool) -> Result<()> {
        let record = self.registry.get(name)?;
        self.registry.release_lock();
        self.backend(record.method).logs(&record, follow).await
    }

    pub fn list(&self) -> Result<Vec<String>> {
        Ok(self
            .registry
            .list()?
            .into_iter()
            .map(|record| record.name)
            .collect())
    }

    /// The status column is a hint only; failing to write it never fails a command.
    fn set_status_hint(&mut self, name: &str, status: &str) {
        if let Err(e) = self
            .registry
            .update(name, &[FieldUpdate::Status(status.to_string())])
        {
            debug!("Could not record status '{}' for '{}': {}", status, name, e);
        }
    }
}

async fn rollback_install(backend: &dyn LifecycleBackend, record: &NodeRecord, data_existed: bool) {
    warn!("Rolling back installation of '{}'", record.name);
    if let Err(e) = backend.teardown(record, !data_existed).await {
        warn!("Rollback of '{}' incomplete: {}", record.name, e);
    }
}
