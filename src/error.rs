/// Error taxonomy shared by the registry, port allocator, backends and orchestrator.
use std::fmt;

use thiserror::Error;

/// Which half of a port pair a conflict refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRole {
    Service,
    XrayApi,
}

impl fmt::Display for PortRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortRole::Service => write!(f, "service port"),
            PortRole::XrayApi => write!(f, "xray api port"),
        }
    }
}

/// Why a port was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    OutOfRange,
    SystemInUse,
    AllocatedToNode(String),
    Equal,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::OutOfRange => write!(f, "must be between 1 and 65535"),
            ConflictReason::SystemInUse => write!(f, "already in use on this host"),
            ConflictReason::AllocatedToNode(name) => write!(f, "already allocated to node '{}'", name),
            ConflictReason::Equal => write!(f, "service and xray api ports must differ"),
        }
    }
}

/// Broad classes of failure, used to decide how a command reports and aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Storage,
    Backend,
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Invalid node name '{0}': must start with a letter and contain 2-50 letters, digits, '_' or '-'")]
    InvalidName(String),

    #[error("Invalid method '{0}': expected 'container' or 'process'")]
    InvalidMethod(String),

    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("Field '{0}' cannot be updated")]
    InvalidField(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Node '{0}' already exists")]
    AlreadyExists(String),

    #[error("Port {port} ({role}) {reason}")]
    PortConflict {
        role: PortRole,
        port: u32,
        reason: ConflictReason,
    },

    #[error("No available port found starting from {0}")]
    PortsExhausted(u32),

    #[error("Node '{0}' not found")]
    NotFound(String),

    #[error("Registry error: {0}")]
    Storage(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl NodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NodeError::InvalidName(_)
            | NodeError::InvalidMethod(_)
            | NodeError::InvalidCertificate(_)
            | NodeError::InvalidField(_)
            | NodeError::InvalidInput(_) => ErrorKind::Validation,
            NodeError::AlreadyExists(_)
            | NodeError::PortConflict { .. }
            | NodeError::PortsExhausted(_) => ErrorKind::Conflict,
            NodeError::NotFound(_) => ErrorKind::NotFound,
            NodeError::Storage(_) => ErrorKind::Storage,
            NodeError::Backend(_) => ErrorKind::Backend,
        }
    }

    pub fn port_conflict(role: PortRole, port: u32, reason: ConflictReason) -> Self {
        NodeError::PortConflict { role, port, reason }
    }
}

impl From<rusqlite::Error> for NodeError {
    fn from(e: rusqlite::Error) -> Self {
        NodeError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for NodeError {
    fn from(e: std::io::Error) -> Self {
        NodeError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;
