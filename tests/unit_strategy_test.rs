mod common;

use common::MockCluster;
use drover::DroverError;
use drover::core::host::{HostAvailability, HostInfo, HostRole, Topology};
use drover::core::provider::{
    ConnectionProvider, STRATEGY_RANDOM, STRATEGY_ROUND_ROBIN, STRATEGY_WEIGHTED_RANDOM,
};
use drover::core::registry::DriverRegistry;
use std::collections::HashSet;
use std::sync::Arc;

fn provider(cluster: &MockCluster) -> (ConnectionProvider, Arc<DriverRegistry>) {
    let registry = DriverRegistry::new();
    (
        ConnectionProvider::new(cluster.driver(), registry.clone()),
        registry,
    )
}

fn sample_topology() -> Topology {
    Topology::new(vec![
        Arc::new(HostInfo::new("w.db.test", 5432, HostRole::Writer)),
        Arc::new(HostInfo::new("r1.db.test", 5432, HostRole::Reader)),
        Arc::new(HostInfo::new("r2.db.test", 5432, HostRole::Reader)),
    ])
}

#[tokio::test]
async fn test_empty_host_list_is_an_internal_error() {
    let cluster = MockCluster::new(&[]);
    let (provider, _registry) = provider(&cluster);
    let props = common::props_for("w.db.test");

    let result = provider.select_host(
        &Topology::default(),
        HostRole::Reader,
        STRATEGY_RANDOM,
        "cluster",
        &props,
    );
    assert!(matches!(result, Err(DroverError::Internal(_))));
}

#[tokio::test]
async fn test_unknown_strategy_is_rejected() {
    let cluster = MockCluster::new(&[]);
    let (provider, _registry) = provider(&cluster);
    let props = common::props_for("w.db.test");

    let result = provider.select_host(
        &sample_topology(),
        HostRole::Reader,
        "fastestEverywhere",
        "cluster",
        &props,
    );
    assert!(matches!(result, Err(DroverError::UnsupportedStrategy(_))));
}

#[tokio::test]
async fn test_random_respects_the_requested_role() {
    let cluster = MockCluster::new(&[]);
    let (provider, _registry) = provider(&cluster);
    let props = common::props_for("w.db.test");
    let topology = sample_topology();

    for _ in 0..20 {
        let host = provider
            .select_host(&topology, HostRole::Reader, STRATEGY_RANDOM, "cluster", &props)
            .expect("select");
        assert_eq!(host.role(), HostRole::Reader);
    }
}

#[tokio::test]
async fn test_round_robin_cycles_through_readers() {
    let cluster = MockCluster::new(&[]);
    let (provider, _registry) = provider(&cluster);
    let props = common::props_for("w.db.test");
    let topology = sample_topology();

    let mut seen = Vec::new();
    for _ in 0..4 {
        let host = provider
            .select_host(
                &topology,
                HostRole::Reader,
                STRATEGY_ROUND_ROBIN,
                "cluster",
                &props,
            )
            .expect("select");
        seen.push(host.url());
    }
    assert_eq!(seen[0], seen[2]);
    assert_eq!(seen[1], seen[3]);
    assert_ne!(seen[0], seen[1]);
}

#[tokio::test]
async fn test_round_robin_cursor_is_shared_per_cluster() {
    let cluster = MockCluster::new(&[]);
    let registry = DriverRegistry::new();
    let provider_a = ConnectionProvider::new(cluster.driver(), registry.clone());
    let provider_b = ConnectionProvider::new(cluster.driver(), registry.clone());
    let props = common::props_for("w.db.test");
    let topology = sample_topology();

    let first = provider_a
        .select_host(&topology, HostRole::Reader, STRATEGY_ROUND_ROBIN, "c1", &props)
        .expect("select");
    let second = provider_b
        .select_host(&topology, HostRole::Reader, STRATEGY_ROUND_ROBIN, "c1", &props)
        .expect("select");
    assert_ne!(first.url(), second.url(), "the cursor advances across sessions");
}

#[tokio::test]
async fn test_unavailable_hosts_are_avoided_until_none_remain() {
    let cluster = MockCluster::new(&[]);
    let (provider, _registry) = provider(&cluster);
    let props = common::props_for("w.db.test");
    let topology = sample_topology();

    topology
        .find("r1.db.test")
        .expect("r1")
        .set_availability(HostAvailability::NotAvailable);

    for _ in 0..20 {
        let host = provider
            .select_host(&topology, HostRole::Reader, STRATEGY_RANDOM, "cluster", &props)
            .expect("select");
        assert_eq!(host.host(), "r2.db.test");
    }

    // Availability is advisory: with every reader down, selection widens.
    topology
        .find("r2.db.test")
        .expect("r2")
        .set_availability(HostAvailability::NotAvailable);
    let mut widened = HashSet::new();
    for _ in 0..40 {
        let host = provider
            .select_host(&topology, HostRole::Reader, STRATEGY_RANDOM, "cluster", &props)
            .expect("select");
        widened.insert(host.url());
    }
    assert!(!widened.is_empty());
}

#[tokio::test]
async fn test_weighted_random_returns_role_matching_hosts() {
    let cluster = MockCluster::new(&[]);
    let (provider, _registry) = provider(&cluster);
    let props = common::props_for("w.db.test");
    let topology = Topology::new(vec![
        Arc::new(HostInfo::new("w.db.test", 5432, HostRole::Writer)),
        Arc::new(HostInfo::new("r1.db.test", 5432, HostRole::Reader).with_weight(5)),
        Arc::new(HostInfo::new("r2.db.test", 5432, HostRole::Reader).with_weight(1)),
    ]);

    for _ in 0..20 {
        let host = provider
            .select_host(
                &topology,
                HostRole::Reader,
                STRATEGY_WEIGHTED_RANDOM,
                "cluster",
                &props,
            )
            .expect("select");
        assert_eq!(host.role(), HostRole::Reader);
    }
}
