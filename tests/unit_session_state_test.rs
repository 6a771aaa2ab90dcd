mod common;

use common::MockCluster;
use drover::DroverError;
use drover::config::options;
use drover::core::dialect::IsolationLevel;
use drover::core::registry::DriverRegistry;

#[tokio::test]
async fn test_session_mutations_are_captured_from_raw_sql() {
    let cluster = MockCluster::new(&[("instance-1", true)]);
    let registry = DriverRegistry::new();
    let client = common::connect(
        &cluster,
        registry,
        common::props_for("instance-1.db.test"),
    )
    .await;

    client
        .query("SET search_path TO app", &[])
        .await
        .expect("set search_path");
    client
        .query(
            "SET SESSION CHARACTERISTICS AS TRANSACTION READ ONLY",
            &[],
        )
        .await
        .expect("set read only");

    let state = client.session_state();
    assert_eq!(state.schema.as_deref(), Some("app"));
    assert_eq!(state.read_only, Some(true));
}

#[tokio::test(start_paused = true)]
async fn test_session_state_survives_a_failover() {
    let cluster = MockCluster::new(&[("instance-1", true), ("instance-2", false)]);
    let registry = DriverRegistry::new();
    let props = common::props_for("instance-1.db.test").with(options::PLUGINS, "failover");
    let client = common::connect(&cluster, registry, props).await;

    client.set_read_only(true).await.expect("set read only");
    client
        .set_transaction_isolation(IsolationLevel::Serializable)
        .await
        .expect("set isolation");
    client.set_schema("app").await.expect("set schema");

    cluster.promote("instance-2");
    cluster.sever("instance-1");

    let err = client
        .query("SELECT 1", &[])
        .await
        .expect_err("failover must surface");
    assert!(matches!(err, DroverError::FailoverSuccess(_)), "got {err:?}");

    // The tracked flags survived the swap.
    let state = client.session_state();
    assert_eq!(state.read_only, Some(true));
    assert_eq!(state.isolation, Some(IsolationLevel::Serializable));
    assert_eq!(state.schema.as_deref(), Some("app"));
    assert!(client.is_read_only());

    // And they were replayed against the new target before it went live.
    let replayed = cluster.statements_for("instance-2");
    assert!(
        replayed
            .iter()
            .any(|sql| sql == "SET SESSION CHARACTERISTICS AS TRANSACTION READ ONLY")
    );
    assert!(
        replayed
            .iter()
            .any(|sql| sql.contains("ISOLATION LEVEL SERIALIZABLE"))
    );
    assert!(replayed.iter().any(|sql| sql == "SET search_path TO app"));
}

#[tokio::test(start_paused = true)]
async fn test_transfer_can_be_disabled() {
    let cluster = MockCluster::new(&[("instance-1", true), ("instance-2", false)]);
    let registry = DriverRegistry::new();
    let props = common::props_for("instance-1.db.test")
        .with(options::PLUGINS, "failover")
        .with(options::TRANSFER_SESSION_STATE_ON_SWITCH, false);
    let client = common::connect(&cluster, registry, props).await;

    client.set_schema("app").await.expect("set schema");

    cluster.promote("instance-2");
    cluster.sever("instance-1");
    let _ = client.query("SELECT 1", &[]).await;

    let replayed = cluster.statements_for("instance-2");
    assert!(
        !replayed.iter().any(|sql| sql == "SET search_path TO app"),
        "replay must be skipped when transfer is disabled"
    );
}

#[tokio::test]
async fn test_end_resets_session_state() {
    let cluster = MockCluster::new(&[("instance-1", true)]);
    let registry = DriverRegistry::new();
    let client = common::connect(
        &cluster,
        registry,
        common::props_for("instance-1.db.test"),
    )
    .await;

    client.set_read_only(true).await.expect("set read only");
    client.end().await.expect("end");

    assert!(client.session_state().is_empty());
    assert!(client.current_host().is_none());
}
