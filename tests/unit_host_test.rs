use drover::core::host::{HostAvailability, HostInfo, HostRole, Topology};
use std::collections::HashSet;
use std::sync::Arc;

#[tokio::test]
async fn test_host_identity_is_host_and_port() {
    let a = HostInfo::new("db-1.cluster.test", 5432, HostRole::Writer);
    let b = HostInfo::new("db-1.cluster.test", 5432, HostRole::Reader).with_host_id("db-1");
    let c = HostInfo::new("db-1.cluster.test", 5433, HostRole::Writer);

    assert_eq!(a, b);
    assert_ne!(a, c);

    let mut set = HashSet::new();
    set.insert(a);
    assert!(set.contains(&b));
}

#[tokio::test]
async fn test_aliases_and_matching() {
    let host = HostInfo::new("db-1.cluster.test", 5432, HostRole::Reader).with_host_id("db-1");
    host.add_alias("10.0.0.4:5432");

    assert!(host.matches_alias("db-1.cluster.test"));
    assert!(host.matches_alias("db-1.cluster.test:5432"));
    assert!(host.matches_alias("db-1"));
    assert!(host.matches_alias("10.0.0.4:5432"));
    assert!(!host.matches_alias("db-2"));
}

#[tokio::test]
async fn test_availability_is_runtime_mutable() {
    let host = HostInfo::new("db-1.cluster.test", 5432, HostRole::Reader);
    assert_eq!(host.availability(), HostAvailability::Available);
    host.set_availability(HostAvailability::NotAvailable);
    assert_eq!(host.availability(), HostAvailability::NotAvailable);
}

#[tokio::test]
async fn test_topology_orders_writer_first() {
    let topology = Topology::new(vec![
        Arc::new(HostInfo::new("r1", 5432, HostRole::Reader)),
        Arc::new(HostInfo::new("r2", 5432, HostRole::Reader)),
        Arc::new(HostInfo::new("w", 5432, HostRole::Writer)),
    ]);

    assert_eq!(topology.hosts()[0].host(), "w");
    assert_eq!(topology.writer().map(|h| h.host()), Some("w"));
    assert_eq!(topology.readers().count(), 2);
}

#[tokio::test]
async fn test_topology_without_writer() {
    let topology = Topology::new(vec![
        Arc::new(HostInfo::new("r1", 5432, HostRole::Reader)),
    ]);
    assert!(topology.writer().is_none());
    assert_eq!(topology.by_role(HostRole::Reader).len(), 1);
}
