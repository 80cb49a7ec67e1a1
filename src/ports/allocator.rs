use log::{debug, warn};
use rand::Rng;

use crate::config::PortsConfig;
use crate::error::{ConflictReason, NodeError, PortRole, Result};
use crate::ports::prober::PortProber;
use crate::registry::{PortPair, RegistryStore};

const MAX_PORT: u32 = u16::MAX as u32;

/// Picks and validates port pairs against both the host and the registry.
///
/// Every call re-probes the host; nothing is cached between calls.
pub struct PortAllocator {
    prober: Box<dyn PortProber>,
    policy: PortsConfig,
}

impl PortAllocator {
    pub fn new(prober: Box<dyn PortProber>, policy: PortsConfig) -> Self {
        Self { prober, policy }
    }

    pub fn policy(&self) -> &PortsConfig {
        &self.policy
    }

    /// Why `port` cannot be used, or `None` if it can.
    ///
    /// A port already claimed by `excluding` skips the host probe: that node's
    /// own runtime is what keeps it bound.
    pub fn check(
        &self,
        registry: &RegistryStore,
        port: u32,
        excluding: Option<&str>,
    ) -> Result<Option<ConflictReason>> {
        if port == 0 || port > MAX_PORT {
            return Ok(Some(ConflictReason::OutOfRange));
        }
        let port = port as u16;

        if let Some(owner) = registry.port_owner(port)? {
            if excluding == Some(owner.as_str()) {
                return Ok(None);
            }
            return Ok(Some(ConflictReason::AllocatedToNode(owner)));
        }

        if self.prober.is_bound(port)? {
            return Ok(Some(ConflictReason::SystemInUse));
        }

        Ok(None)
    }

    pub fn is_available(
        &self,
        registry: &RegistryStore,
        port: u32,
        excluding: Option<&str>,
    ) -> Result<bool> {
        Ok(self.check(registry, port, excluding)?.is_none())
    }

    /// First available port at or after `start`, falling back to random probes.
    pub fn find_available(
        &self,
        registry: &RegistryStore,
        start: u32,
        excluding: Option<&str>,
    ) -> Result<u16> {
        self.find_available_skipping(registry, start, excluding, &[])
    }

    fn find_available_skipping(
        &self,
        registry: &RegistryStore,
        start: u32,
        excluding: Option<&str>,
        skip: &[u16],
    ) -> Result<u16> {
        let start = start.max(1);
        let end = start
            .saturating_add(self.policy.linear_attempts)
            .min(MAX_PORT + 1);
        for port in start..end {
            if skip.contains(&(port as u16)) {
                continue;
            }
            if self.is_available(registry, port, excluding)? {
                return Ok(port as u16);
            }
        }

        warn!(
            "No free port in {}..{}, trying random ports in {}..{}",
            start, end, self.policy.random_range_start, self.policy.random_range_end
        );
        if self.policy.random_range_start < self.policy.random_range_end {
            let mut rng = rand::thread_rng();
            for _ in 0..self.policy.random_attempts {
                let port =
                    rng.gen_range(self.policy.random_range_start..self.policy.random_range_end);
                if skip.contains(&port) {
                    continue;
                }
                if self.is_available(registry, port as u32, excluding)? {
                    return Ok(port);
                }
            }
        }

        Err(NodeError::PortsExhausted(start))
    }

    /// Service port suggested for the next node.
    pub fn suggested_service_port(
        &self,
        registry: &RegistryStore,
        excluding: Option<&str>,
    ) -> Result<u32> {
        Ok(match registry.max_service_port(excluding)? {
            Some(max) => max as u32 + self.policy.increment as u32,
            None => self.policy.base as u32,
        })
    }

    /// Allocate a fresh, distinct port pair.
    pub fn allocate_pair(
        &self,
        registry: &RegistryStore,
        excluding: Option<&str>,
    ) -> Result<PortPair> {
        let suggested = self.suggested_service_port(registry, excluding)?;
        let service = self.find_available(registry, suggested, excluding)?;
        let xray_api = self.allocate_xray_for(registry, service, excluding)?;

        debug!("Allocated ports {}/{}", service, xray_api);
        Ok(PortPair::new(service, xray_api))
    }

    /// Xray port for an already chosen service port, searching from `service + 1`.
    pub fn allocate_xray_for(
        &self,
        registry: &RegistryStore,
        service: u16,
        excluding: Option<&str>,
    ) -> Result<u16> {
        let mut start = service as u32 + 1;
        loop {
            let xray_api = self.find_available_skipping(registry, start, excluding, &[service])?;
            if xray_api != service {
                return Ok(xray_api);
            }
            start = xray_api as u32 + 1;
        }
    }

    /// Service port for an already chosen xray port.
    pub fn allocate_service_for(
        &self,
        registry: &RegistryStore,
        xray_api: u16,
        excluding: Option<&str>,
    ) -> Result<u16> {
        let suggested = self.suggested_service_port(registry, excluding)?;
        self.find_available_skipping(registry, suggested, excluding, &[xray_api])
    }

    /// Validate a caller-supplied pair.
    pub fn validate_pair(
        &self,
        registry: &RegistryStore,
        service: u32,
        xray_api: u32,
        excluding: Option<&str>,
    ) -> Result<PortPair> {
        if service == xray_api && (1..=MAX_PORT).contains(&service) {
            return Err(NodeError::port_conflict(
                PortRole::XrayApi,
                xray_api,
                ConflictReason::Equal,
            ));
        }
        let service = self.validate_port(registry, PortRole::Service, service, excluding)?;
        let xray_api = self.validate_port(registry, PortRole::XrayApi, xray_api, excluding)?;

        Ok(PortPair::new(service, xray_api))
    }

    /// Validate one caller-supplied port.
    pub fn validate_port(
        &self,
        registry: &RegistryStore,
        role: PortRole,
        port: u32,
        excluding: Option<&str>,
    ) -> Result<u16> {
        match self.check(registry, port, excluding)? {
            Some(reason) => Err(NodeError::port_conflict(role, port, reason)),
            None => Ok(port as u16),
        }
    }
}
