/// Configuration serialization and deserialization.
pub mod config;

/// Error taxonomy.
pub mod error;

/// Node registry persistence.
pub mod registry;

/// Host port probing and allocation.
pub mod ports;

/// Container and process lifecycle backends.
pub mod backend;

/// Node install/edit/uninstall workflows.
pub mod orchestrator;

/// Utility functions for common operations.
pub mod utils;

/// CLI interface and commands.
pub mod cli;
