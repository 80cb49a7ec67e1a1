use std::{collections::BTreeMap, path::PathBuf};

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Serialize;

use crate::backend::{self, LifecycleBackend};
use crate::config::ContainerConfig;
use crate::error::{NodeError, Result};
use crate::registry::{Method, NodeRecord, PortPair};
use crate::utils;

const DOCKER: &str = "docker";
const COMPOSE_FILE: &str = "docker-compose.yml";
const SHORT_ID_LEN: usize = 12;

#[derive(Debug, Serialize)]
struct ComposeFile {
    services: BTreeMap<String, ComposeService>,
}

#[derive(Debug, Serialize)]
struct ComposeService {
    container_name: String,
    image: String,
    restart: String,
    network_mode: String,
    environment: BTreeMap<String, String>,
    volumes: Vec<String>,
}

/// Runs each node as a Compose project with host networking.
#[derive(Debug, Clone)]
pub struct ContainerBackend {
    config: ContainerConfig,
}

impl ContainerBackend {
    pub fn new(config: ContainerConfig) -> Self {
        Self { config }
    }

    pub fn container_name(&self, name: &str) -> String {
        format!("{}{}", self.config.container_prefix, name)
    }

    /// Compose project for a node. Compose lowercases project names, so the
    /// node name goes through `compose_key` to keep `alpha` and `Alpha` apart.
    pub fn project_name(&self, name: &str) -> String {
        format!(
            "{}{}",
            self.config.container_prefix.to_lowercase(),
            compose_key(name)
        )
    }

    pub fn compose_path(record: &NodeRecord) -> PathBuf {
        record.install_dir.join(COMPOSE_FILE)
    }

    /// Render the compose file for a node.
    pub fn render_compose(
        &self,
        record: &NodeRecord,
        ports: PortPair,
        inbounds: &[String],
    ) -> Result<String> {
        let data_dir = record.data_dir.to_string_lossy();
        let service = ComposeService {
            container_name: self.container_name(&record.name),
            image: self.config.image.clone(),
            restart: "always".to_string(),
            network_mode: "host".to_string(),
            environment: backend::node_environment(record, ports, inbounds, None)
                .into_iter()
                .collect(),
            volumes: vec![format!("{}:{}", data_dir, data_dir)],
        };

        let mut services = BTreeMap::new();
        services.insert(compose_key(&record.name), service);

        serde_yaml::to_string(&ComposeFile { services })
            .map_err(|e| NodeError::Backend(format!("Failed to render compose file: {}", e)))
    }

    fn write_compose(&self, record: &NodeRecord, ports: PortPair, inbounds: &[String]) -> Result<()> {
        let content = self.render_compose(record, ports, inbounds)?;
        utils::create_file(&Self::compose_path(record), &content, Some(0o644))
    }

    /// Run `<compose> -f <file> -p <project> <args..>`.
    async fn compose(&self, record: &NodeRecord, args: &[&str]) -> Result<utils::CommandResult> {
        let compose = shell_words::split(&self.config.compose).map_err(|e| {
            NodeError::Backend(format!(
                "Invalid compose command '{}': {}",
                self.config.compose, e
            ))
        })?;
        let (program, prefix) = compose.split_first().ok_or_else(|| {
            NodeError::Backend("Compose command is empty".to_string())
        })?;

        let file = Self::compose_path(record).to_string_lossy().into_owned();
        let project = self.project_name(&record.name);

        let mut full: Vec<&str> = prefix.iter().map(String::as_str).collect();
        full.extend(["-f", file.as_str(), "-p", project.as_str()]);
        full.extend_from_slice(args);

        utils::execute_checked(program, &full).await
    }
}

#[async_trait]
impl LifecycleBackend for ContainerBackend {
    fn method(&self) -> Method {
        Method::Container
    }

    async fn materialize(&self, record: &NodeRecord, cert_content: &str) -> Result<()> {
        backend::prepare_node_dirs(record, cert_content)?;
        self.write_compose(record, record.ports, &record.inbounds)?;

        let pb = utils::spinner(format!("Pulling image {}", self.config.image));
        let result = self.compose(record, &["pull"]).await;
        pb.finish_and_clear();
        if let Err(e) = result {
            // a locally present image is still usable
            warn!("Image pull failed for '{}': {}", record.name, e);
        }
        Ok(())
    }

    async fn start(&self, record: &NodeRecord) -> Result<()> {
        let pb = utils::spinner(format!("Starting container for {}", record.name));
        let result = self.compose(record, &["up", "-d", "--remove-orphans"]).await;
        pb.finish_and_clear();
        result?;
        info!("Container for '{}' started", record.name);
        Ok(())
    }

    async fn stop(&self, record: &NodeRecord) -> Result<()> {
        self.compose(record, &["stop"]).await?;
        Ok(())
    }

    async fn restart(&self, record: &NodeRecord) -> Result<()> {
        // `up -d` recreates the container when the compose file changed
        self.compose(record, &["up", "-d", "--force-recreate", "--remove-orphans"])
            .await?;
        Ok(())
    }

    async fn is_running(&self, name: &str) -> Result<bool> {
        let filter = format!("name=^/{}$", self.container_name(name));
        let result = utils::execute_checked(
            DOCKER,
            &["ps", "-q", "--filter", &filter, "--filter", "status=running"],
        )
        .await?;
        Ok(!result.output.trim().is_empty())
    }

    async fn runtime_identifier(&self, name: &str) -> Result<Option<String>> {
        let container = self.container_name(name);
        let result = utils::execute(
            DOCKER,
            &["inspect", "-f", "{{.State.Running}} {{.Id}}", &container],
        )
        .await?;
        if !result.success() {
            return Ok(None);
        }
        Ok(parse_inspect(&result.output))
    }

    async fn rewrite_config(
        &self,
        record: &NodeRecord,
        ports: PortPair,
        inbounds: &[String],
    ) -> Result<()> {
        self.write_compose(record, ports, inbounds)?;
        debug!("Rewrote compose file for '{}'", record.name);
        Ok(())
    }

    async fn teardown(&self, record: &NodeRecord, remove_data: bool) -> Result<()> {
        if Self::compose_path(record).exists() {
            if let Err(e) = self.compose(record, &["down", "--remove-orphans"]).await {
                warn!("Failed to bring down '{}': {}", record.name, e);
            }
        } else {
            let container = self.container_name(&record.name);
            if let Err(e) = utils::execute(DOCKER, &["rm", "-f", &container]).await {
                warn!("Failed to remove container {}: {}", container, e);
            }
        }

        backend::remove_node_dirs(record, remove_data)
    }

    async fn logs(&self, record: &NodeRecord, follow: bool) -> Result<()> {
        let container = self.container_name(&record.name);
        let mut args = vec!["logs", "--tail", "100"];
        if follow {
            args.push("-f");
        }
        args.push(&container);
        utils::execute_attached(DOCKER, &args).await
    }
}

/// Lowercase key for a node name, distinct for every distinct name.
///
/// `_` becomes `__` and an uppercase letter becomes `_` plus its lowercase form.
fn compose_key(name: &str) -> String {
    let mut key = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        match c {
            '_' => key.push_str("__"),
            c if c.is_ascii_uppercase() => {
                key.push('_');
                key.push(c.to_ascii_lowercase());
            }
            c => key.push(c),
        }
    }
    key
}

/// Short id from `docker inspect` output, if the container is running.
fn parse_inspect(output: &str) -> Option<String> {
    let (running, id) = output.trim().split_once(' ')?;
    if running != "true" {
        return None;
    }
    Some(id.chars().take(SHORT_ID_LEN).collect())
}
