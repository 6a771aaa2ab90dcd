mod common;

use common::MockCluster;
use drover::config::options;
use drover::core::registry::DriverRegistry;

fn pooled_props(endpoint: &str) -> drover::config::Properties {
    common::props_for(endpoint)
        .with(options::PLUGINS, "failover")
        .with(options::ENABLE_INTERNAL_CONNECTION_POOLS, true)
}

#[tokio::test]
async fn test_ended_sessions_park_their_connection_for_reuse() {
    let cluster = MockCluster::new(&[("instance-1", true)]);
    let registry = DriverRegistry::new();

    let client = common::connect(
        &cluster,
        registry.clone(),
        pooled_props("instance-1.db.test"),
    )
    .await;
    assert_eq!(cluster.connect_count("instance-1"), 1);
    client.end().await.expect("end");

    // The next session to the same host and user reuses the parked
    // connection instead of dialing again.
    let _next = common::connect(
        &cluster,
        registry,
        pooled_props("instance-1.db.test"),
    )
    .await;
    assert_eq!(cluster.connect_count("instance-1"), 1);
}

#[tokio::test]
async fn test_closed_connections_are_not_reused() {
    let cluster = MockCluster::new(&[("instance-1", true)]);
    let registry = DriverRegistry::new();

    let client = common::connect(
        &cluster,
        registry.clone(),
        pooled_props("instance-1.db.test"),
    )
    .await;
    client.end().await.expect("end");

    // While the host is down, the parked connection fails validation and is
    // discarded along with the connect attempt.
    cluster.sever("instance-1");
    let failed = drover::ClientBuilder::new(cluster.driver(), pooled_props("instance-1.db.test"))
        .registry(registry.clone())
        .connect()
        .await;
    assert!(failed.is_err());

    cluster.heal("instance-1");
    let _next = common::connect(
        &cluster,
        registry,
        pooled_props("instance-1.db.test"),
    )
    .await;
    assert_eq!(cluster.connect_count("instance-1"), 2);
}

#[tokio::test]
async fn test_pool_capacity_is_bounded() {
    let cluster = MockCluster::new(&[("instance-1", true)]);
    let registry = DriverRegistry::new();
    let props = pooled_props("instance-1.db.test").with(options::INTERNAL_POOL_MAX_IDLE, 1u64);

    let a = common::connect(&cluster, registry.clone(), props.clone()).await;
    let b = common::connect(&cluster, registry.clone(), props.clone()).await;
    a.end().await.expect("end a");
    b.end().await.expect("end b");

    let host = drover::core::host::HostInfo::new(
        "instance-1.db.test",
        5432,
        drover::core::host::HostRole::Writer,
    );
    assert_eq!(registry.pools.idle_count(&host, &props), 1);
}
