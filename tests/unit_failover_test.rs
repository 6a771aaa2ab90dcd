mod common;

use common::MockCluster;
use drover::DroverError;
use drover::config::options;
use drover::core::host::HostRole;
use drover::core::registry::DriverRegistry;

const INSTANCE_ID_QUERY: &str = "SELECT aurora_db_instance_identifier() AS server_id";

#[tokio::test(start_paused = true)]
async fn test_writer_failover_on_promotion() {
    let cluster = MockCluster::new(&[("instance-1", true), ("instance-2", false)]);
    let registry = DriverRegistry::new();
    let props = common::props_for("instance-1.db.test").with(options::PLUGINS, "failover");
    let client = common::connect(&cluster, registry, props).await;

    let id = client
        .query(INSTANCE_ID_QUERY, &[])
        .await
        .expect("initial query");
    assert_eq!(id.scalar_str(), Some("instance-1"));

    // The cluster promotes instance-2 and the old writer goes dark.
    cluster.promote("instance-2");
    cluster.sever("instance-1");

    let err = client
        .query(INSTANCE_ID_QUERY, &[])
        .await
        .expect_err("the in-flight call must surface the failover");
    assert!(matches!(err, DroverError::FailoverSuccess(_)), "got {err:?}");

    let id = client
        .query(INSTANCE_ID_QUERY, &[])
        .await
        .expect("query after recovery");
    assert_eq!(id.scalar_str(), Some("instance-2"));
    assert_eq!(
        client.current_host().map(|h| h.role()),
        Some(HostRole::Writer)
    );
}

#[tokio::test(start_paused = true)]
async fn test_failover_mid_transaction_reports_unknown_resolution() {
    let cluster = MockCluster::new(&[("instance-1", true), ("instance-2", false)]);
    let registry = DriverRegistry::new();
    let props = common::props_for("instance-1.db.test").with(options::PLUGINS, "failover");
    let client = common::connect(&cluster, registry, props).await;

    client.query("BEGIN", &[]).await.expect("begin");
    client
        .query("INSERT INTO t VALUES (1)", &[])
        .await
        .expect("insert");
    assert!(client.in_transaction());

    cluster.promote("instance-2");
    cluster.sever("instance-1");

    let err = client
        .query("INSERT INTO t VALUES (2)", &[])
        .await
        .expect_err("the transaction outcome is unknowable");
    assert!(
        matches!(err, DroverError::TransactionResolutionUnknown(_)),
        "got {err:?}"
    );
    assert!(!client.in_transaction());

    let id = client
        .query(INSTANCE_ID_QUERY, &[])
        .await
        .expect("query after recovery");
    assert_eq!(id.scalar_str(), Some("instance-2"));
}

#[tokio::test(start_paused = true)]
async fn test_reader_session_fails_over_to_the_writer() {
    let cluster = MockCluster::new(&[("instance-1", true), ("instance-2", false)]);
    let registry = DriverRegistry::new();
    let props = common::props_for("instance-2.db.test")
        .with(options::PLUGINS, "failover")
        .with(options::FAILOVER_MODE, "strict-writer");
    let client = common::connect(&cluster, registry, props).await;

    assert_eq!(
        client.current_host().map(|h| h.role()),
        Some(HostRole::Reader)
    );

    cluster.sever("instance-2");

    let err = client
        .query(INSTANCE_ID_QUERY, &[])
        .await
        .expect_err("severed reader must trigger failover");
    assert!(matches!(err, DroverError::FailoverSuccess(_)), "got {err:?}");

    let id = client
        .query(INSTANCE_ID_QUERY, &[])
        .await
        .expect("query after recovery");
    assert_eq!(id.scalar_str(), Some("instance-1"));
    assert_eq!(
        client.current_host().map(|h| h.role()),
        Some(HostRole::Writer)
    );
}

#[tokio::test(start_paused = true)]
async fn test_reader_failover_lands_on_a_reader() {
    let cluster = MockCluster::new(&[
        ("instance-1", true),
        ("instance-2", false),
        ("instance-3", false),
    ]);
    let registry = DriverRegistry::new();
    let props = common::props_for("instance-2.db.test")
        .with(options::PLUGINS, "failover")
        .with(options::FAILOVER_MODE, "strict-reader");
    let client = common::connect(&cluster, registry, props).await;

    cluster.sever("instance-2");

    let err = client
        .query(INSTANCE_ID_QUERY, &[])
        .await
        .expect_err("severed reader must trigger failover");
    assert!(matches!(err, DroverError::FailoverSuccess(_)), "got {err:?}");

    let id = client.query(INSTANCE_ID_QUERY, &[]).await.expect("query");
    assert_eq!(id.scalar_str(), Some("instance-3"));
}

#[tokio::test(start_paused = true)]
async fn test_failover_fails_when_no_host_recovers() {
    let cluster = MockCluster::new(&[("instance-1", true), ("instance-2", false)]);
    let registry = DriverRegistry::new();
    let props = common::props_for("instance-1.db.test")
        .with(options::PLUGINS, "failover")
        .with(options::FAILOVER_TIMEOUT_MS, 5_000u64);
    let client = common::connect(&cluster, registry, props).await;

    cluster.sever("instance-1");
    cluster.sever("instance-2");

    let err = client
        .query(INSTANCE_ID_QUERY, &[])
        .await
        .expect_err("nothing can recover");
    assert!(matches!(err, DroverError::FailoverFailed(_)), "got {err:?}");
}

#[tokio::test(start_paused = true)]
async fn test_failover_disabled_surfaces_the_raw_network_error() {
    let cluster = MockCluster::new(&[("instance-1", true), ("instance-2", false)]);
    let registry = DriverRegistry::new();
    let props = common::props_for("instance-1.db.test")
        .with(options::PLUGINS, "failover")
        .with(options::ENABLE_CLUSTER_AWARE_FAILOVER, false);
    let client = common::connect(&cluster, registry, props).await;

    cluster.sever("instance-1");

    let err = client
        .query(INSTANCE_ID_QUERY, &[])
        .await
        .expect_err("severed host");
    assert!(matches!(err, DroverError::Network(_)), "got {err:?}");
}
