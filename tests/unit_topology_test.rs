mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::MockCluster;
use drover::config::options;
use drover::core::host::HostRole;
use drover::core::registry::DriverRegistry;
use std::sync::Arc;

#[tokio::test]
async fn test_snapshot_is_shared_within_the_refresh_rate() {
    let cluster = MockCluster::new(&[("instance-1", true), ("instance-2", false)]);
    let registry = DriverRegistry::new();
    let client = common::connect(
        &cluster,
        registry,
        common::props_for("instance-1.db.test"),
    )
    .await;

    let first = client.hosts().await.expect("hosts");
    let second = client.hosts().await.expect("hosts");
    assert!(
        Arc::ptr_eq(&first, &second),
        "two getHosts within the TTL must return the identical snapshot"
    );
}

#[tokio::test]
async fn test_expired_snapshot_triggers_a_requery() {
    let cluster = MockCluster::new(&[("instance-1", true)]);
    let registry = DriverRegistry::new();
    let props = common::props_for("instance-1.db.test")
        .with(options::CLUSTER_TOPOLOGY_REFRESH_RATE_MS, 0u64);
    let client = common::connect(&cluster, registry, props).await;

    let before = cluster.topology_query_count();
    let first = client.hosts().await.expect("hosts");
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = client.hosts().await.expect("hosts");
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(cluster.topology_query_count() >= before + 2);
}

#[tokio::test]
async fn test_concurrent_refreshes_coalesce_into_one_query() {
    let cluster = MockCluster::new(&[("instance-1", true), ("instance-2", false)]);
    let registry = DriverRegistry::new();
    let client = common::connect(
        &cluster,
        registry,
        common::props_for("instance-1.db.test"),
    )
    .await;
    let service = client.service();

    let before = cluster.topology_query_count();
    let (a, b, c) = tokio::join!(
        service.force_refresh_host_list(None),
        service.force_refresh_host_list(None),
        service.force_refresh_host_list(None),
    );
    a.expect("refresh");
    b.expect("refresh");
    c.expect("refresh");

    assert_eq!(
        cluster.topology_query_count() - before,
        1,
        "concurrent refreshes for one cluster must share a single in-flight query"
    );
}

#[tokio::test]
async fn test_writer_election_prefers_the_most_recent_stamp() {
    let cluster = MockCluster::new(&[("instance-1", true), ("instance-2", false)]);
    let registry = DriverRegistry::new();
    let client = common::connect(
        &cluster,
        registry,
        common::props_for("instance-1.db.test"),
    )
    .await;

    // Both instances claim the writer role; the fresher stamp must win and
    // the stale writer must be demoted in the published snapshot.
    let now = Utc::now();
    cluster.set_writer_flag("instance-1", true, now - ChronoDuration::seconds(120));
    cluster.set_writer_flag("instance-2", true, now);

    let topology = client
        .service()
        .force_refresh_host_list(None)
        .await
        .expect("refresh");

    let writers: Vec<_> = topology
        .hosts()
        .iter()
        .filter(|h| h.role() == HostRole::Writer)
        .collect();
    assert_eq!(writers.len(), 1);
    assert_eq!(writers[0].host_id(), Some("instance-2"));
    assert_eq!(
        topology.find("instance-1").map(|h| h.role()),
        Some(HostRole::Reader)
    );
}

#[tokio::test]
async fn test_discovered_endpoints_publish_the_cluster_id() {
    let cluster = MockCluster::new(&[("instance-1", true), ("instance-2", false)]);
    let registry = DriverRegistry::new();
    let client = common::connect(
        &cluster,
        registry.clone(),
        common::props_for("instance-1.db.test"),
    )
    .await;
    client.hosts().await.expect("hosts");

    assert_eq!(
        registry.suggested_cluster_id("instance-2.db.test:5432").as_deref(),
        Some("test-cluster"),
        "sibling endpoints must share the cluster's cache slot"
    );
}

#[tokio::test]
async fn test_initial_connection_is_identified_as_a_cluster_member() {
    let cluster = MockCluster::new(&[("instance-1", true), ("instance-2", false)]);
    let registry = DriverRegistry::new();
    let client = common::connect(
        &cluster,
        registry,
        common::props_for("instance-2.db.test"),
    )
    .await;

    let host = client.current_host().expect("current host");
    assert_eq!(host.host_id(), Some("instance-2"));
    assert_eq!(host.role(), HostRole::Reader);
}
