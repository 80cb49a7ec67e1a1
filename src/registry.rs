/// Node registry: records, updatable fields and the SQLite store.

/// Node record and related value types.
pub mod record;

/// SQLite-backed registry store.
pub mod store;

pub use record::{
    parse_inbounds, validate_name, ConfigEntry, FieldUpdate, Method, NodeField, NodeRecord,
    PortPair,
};
pub use store::RegistryStore;
