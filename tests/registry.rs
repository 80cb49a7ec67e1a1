use std::collections::HashSet;
use std::path::Path;

use nodectl::config::PortsConfig;
use nodectl::error::{ConflictReason, ErrorKind, NodeError, Result};
use nodectl::ports::{PortAllocator, PortProber};
use nodectl::registry::{FieldUpdate, Method, NodeRecord, PortPair, RegistryStore};

struct StaticProber(HashSet<u16>);

impl PortProber for StaticProber {
    fn is_bound(&self, port: u16) -> Result<bool> {
        Ok(self.0.contains(&port))
    }
}

fn allocator(bound: &[u16]) -> PortAllocator {
    PortAllocator::new(
        Box::new(StaticProber(bound.iter().copied().collect())),
        PortsConfig::default(),
    )
}

fn record(root: &Path, name: &str, ports: PortPair) -> NodeRecord {
    NodeRecord::new(
        name,
        ports,
        Method::Container,
        root.join("install").join(name),
        root.join("data").join(name),
        root.join("data").join(name).join("ssl_client_cert.pem"),
        Vec::new(),
    )
}

#[test]
fn registry_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("registry.db");

    {
        let mut store = RegistryStore::open(&db).unwrap();
        store.ensure_initialized().unwrap();
        store
            .create(&record(dir.path(), "alpha", PortPair::new(62050, 62051)))
            .unwrap();
        store
            .update("alpha", &[FieldUpdate::Inbounds(vec!["vless".into()])])
            .unwrap();
    }

    let store = RegistryStore::open(&db).unwrap();
    store.ensure_initialized().unwrap();
    let alpha = store.get("alpha").unwrap();
    assert_eq!(alpha.ports, PortPair::new(62050, 62051));
    assert_eq!(alpha.inbounds, vec!["vless".to_string()]);
    assert_eq!(store.port_owner(62051).unwrap().as_deref(), Some("alpha"));
}

#[test]
fn allocation_follows_registry_and_host() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = RegistryStore::open(dir.path().join("registry.db")).unwrap();
    store.ensure_initialized().unwrap();

    // 62061 is held by something outside the registry
    let alloc = allocator(&[62061]);

    let first = alloc.allocate_pair(&store, None).unwrap();
    assert_eq!(first, PortPair::new(62050, 62051));
    store.create(&record(dir.path(), "alpha", first)).unwrap();

    let second = alloc.allocate_pair(&store, None).unwrap();
    assert_eq!(second, PortPair::new(62060, 62062));
    store.create(&record(dir.path(), "beta", second)).unwrap();

    let err = alloc
        .validate_pair(&store, 62050, 63000, None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    match err {
        NodeError::PortConflict { port, reason, .. } => {
            assert_eq!(port, 62050);
            assert_eq!(reason, ConflictReason::AllocatedToNode("alpha".into()));
        }
        other => panic!("unexpected error: {other}"),
    }

    // a node may keep its own ports
    let kept = alloc
        .validate_pair(&store, 62060, 62062, Some("beta"))
        .unwrap();
    assert_eq!(kept, second);
}

#[test]
fn deleted_node_releases_ports() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = RegistryStore::open(dir.path().join("registry.db")).unwrap();
    store.ensure_initialized().unwrap();
    let alloc = allocator(&[]);

    store
        .create(&record(dir.path(), "alpha", PortPair::new(62050, 62051)))
        .unwrap();
    assert!(!alloc.is_available(&store, 62050, None).unwrap());

    store.delete("alpha").unwrap();
    store.delete("alpha").unwrap();
    assert!(alloc.is_available(&store, 62050, None).unwrap());
    assert_eq!(store.count().unwrap(), 0);
    assert_eq!(store.get("alpha").unwrap_err().kind(), ErrorKind::NotFound);
}
