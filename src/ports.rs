/// Host port probing and port-pair allocation.

/// Port allocation against the registry and the host.
pub mod allocator;

/// Host port-binding queries.
pub mod prober;

pub use allocator::PortAllocator;
pub use prober::{PortProber, SystemProber};
