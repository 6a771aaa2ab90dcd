#![allow(dead_code)]

//! A scriptable in-memory cluster and wire driver for exercising the wrapper
//! end to end: topology flips, severed hosts, and credential checks are all
//! driven from the test body.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use drover::config::{Properties, options};
use drover::core::driver::{DriverDialect, QueryResult, WireConnection, WireError};
use drover::core::host::HostInfo;
use drover::core::registry::DriverRegistry;
use drover::{Client, ClientBuilder};
use parking_lot::RwLock;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[derive(Clone)]
pub struct MockHostSpec {
    pub id: String,
    pub is_writer: bool,
    pub last_update: DateTime<Utc>,
}

#[derive(Default)]
pub struct ClusterInner {
    hosts: RwLock<Vec<MockHostSpec>>,
    severed: RwLock<HashSet<String>>,
    expected_password: RwLock<Option<String>>,
    topology_queries: AtomicU32,
    connects: RwLock<HashMap<String, u32>>,
    statements: RwLock<HashMap<String, Vec<String>>>,
}

/// A scriptable cluster shared by the driver and the test body.
#[derive(Clone, Default)]
pub struct MockCluster {
    inner: Arc<ClusterInner>,
}

impl MockCluster {
    pub fn new(specs: &[(&str, bool)]) -> Self {
        let cluster = MockCluster::default();
        let now = Utc::now();
        *cluster.inner.hosts.write() = specs
            .iter()
            .map(|(id, is_writer)| MockHostSpec {
                id: (*id).to_string(),
                is_writer: *is_writer,
                last_update: now,
            })
            .collect();
        cluster
    }

    pub fn driver(&self) -> Arc<MockDriver> {
        Arc::new(MockDriver {
            cluster: self.inner.clone(),
        })
    }

    /// Makes `id` the sole writer with a fresh last-update stamp.
    pub fn promote(&self, id: &str) {
        let mut hosts = self.inner.hosts.write();
        for host in hosts.iter_mut() {
            host.is_writer = host.id == id;
            if host.id == id {
                host.last_update = Utc::now() + ChronoDuration::seconds(1);
            }
        }
    }

    /// Sets one host's writer flag and stamp without touching the others;
    /// lets tests stage conflicting multi-writer topologies.
    pub fn set_writer_flag(&self, id: &str, is_writer: bool, last_update: DateTime<Utc>) {
        let mut hosts = self.inner.hosts.write();
        for host in hosts.iter_mut() {
            if host.id == id {
                host.is_writer = is_writer;
                host.last_update = last_update;
            }
        }
    }

    pub fn sever(&self, id: &str) {
        self.inner.severed.write().insert(id.to_string());
    }

    pub fn heal(&self, id: &str) {
        self.inner.severed.write().remove(id);
    }

    pub fn expect_password(&self, password: Option<&str>) {
        *self.inner.expected_password.write() = password.map(str::to_string);
    }

    pub fn topology_query_count(&self) -> u32 {
        self.inner.topology_queries.load(Ordering::Acquire)
    }

    pub fn connect_count(&self, id: &str) -> u32 {
        self.inner.connects.read().get(id).copied().unwrap_or(0)
    }

    pub fn statements_for(&self, id: &str) -> Vec<String> {
        self.inner
            .statements
            .read()
            .get(id)
            .cloned()
            .unwrap_or_default()
    }
}

fn instance_of(endpoint: &str) -> String {
    endpoint.split('.').next().unwrap_or(endpoint).to_string()
}

pub struct MockDriver {
    cluster: Arc<ClusterInner>,
}

#[async_trait]
impl DriverDialect for MockDriver {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn connect(
        &self,
        host: &HostInfo,
        props: &Properties,
    ) -> Result<Arc<dyn WireConnection>, WireError> {
        tokio::task::yield_now().await;
        let instance = instance_of(host.host());

        if self.cluster.severed.read().contains(&instance) {
            return Err(WireError::new(format!(
                "Connection terminated: {instance} is unreachable"
            )));
        }
        if !self.cluster.hosts.read().iter().any(|h| h.id == instance) {
            return Err(WireError::new(format!(
                "Connection terminated: unknown host {instance}"
            )));
        }
        if let Some(expected) = self.cluster.expected_password.read().clone() {
            let supplied = props.get_string(options::PASSWORD).unwrap_or_default();
            if supplied != expected {
                return Err(WireError::with_sqlstate(
                    "password authentication failed for user",
                    "28P01",
                ));
            }
        }

        *self
            .cluster
            .connects
            .write()
            .entry(instance.clone())
            .or_default() += 1;
        Ok(Arc::new(MockConnection {
            cluster: self.cluster.clone(),
            instance,
            open: AtomicBool::new(true),
        }))
    }
}

pub struct MockConnection {
    cluster: Arc<ClusterInner>,
    instance: String,
    open: AtomicBool,
}

impl MockConnection {
    fn check_alive(&self) -> Result<(), WireError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(WireError::new("the connection is closed"));
        }
        if self.cluster.severed.read().contains(&self.instance) {
            return Err(WireError::new(format!(
                "Connection terminated: {} is unreachable",
                self.instance
            )));
        }
        Ok(())
    }

    fn topology_rows(&self) -> QueryResult {
        self.cluster.topology_queries.fetch_add(1, Ordering::AcqRel);
        let hosts = self.cluster.hosts.read();
        QueryResult::new(
            vec![
                "server_id".to_string(),
                "is_writer".to_string(),
                "last_update".to_string(),
                "weight".to_string(),
            ],
            hosts
                .iter()
                .map(|h| {
                    vec![
                        json!(h.id),
                        json!(h.is_writer),
                        json!(h.last_update.to_rfc3339()),
                        Value::Null,
                    ]
                })
                .collect(),
        )
    }
}

#[async_trait]
impl WireConnection for MockConnection {
    async fn query(&self, sql: &str, _params: &[Value]) -> Result<QueryResult, WireError> {
        tokio::task::yield_now().await;

        if sql.starts_with("SELECT pg_sleep") {
            // Models a server gone silent mid-query: only an abort (or an
            // explicit close) unblocks the call.
            loop {
                if !self.open.load(Ordering::Acquire) {
                    return Err(WireError::new("Connection terminated: call aborted"));
                }
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        }

        self.check_alive()?;
        self.cluster
            .statements
            .write()
            .entry(self.instance.clone())
            .or_default()
            .push(sql.to_string());

        if sql.contains("aurora_replica_status()") {
            return Ok(self.topology_rows());
        }
        if sql.contains("pg_is_in_recovery") {
            let is_writer = self
                .cluster
                .hosts
                .read()
                .iter()
                .find(|h| h.id == self.instance)
                .map(|h| h.is_writer)
                .unwrap_or(false);
            return Ok(QueryResult::new(
                vec!["is_reader".to_string()],
                vec![vec![json!(!is_writer)]],
            ));
        }
        if sql.contains("aurora_db_instance_identifier") {
            return Ok(QueryResult::new(
                vec!["server_id".to_string()],
                vec![vec![json!(self.instance)]],
            ));
        }
        if sql.contains("FROM pg_proc") {
            return Ok(QueryResult::new(
                vec!["?column?".to_string()],
                vec![vec![json!(1)]],
            ));
        }
        Ok(QueryResult::empty())
    }

    async fn ping(&self) -> Result<(), WireError> {
        tokio::task::yield_now().await;
        self.check_alive()
    }

    async fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    fn abort(&self) {
        self.open.store(false, Ordering::Release);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

/// Baseline properties for a session against the mock cluster.
pub fn props_for(endpoint: &str) -> Properties {
    Properties::new()
        .with(options::HOST, endpoint)
        .with(options::PORT, 5432u64)
        .with(options::USER, "app")
        .with(options::PASSWORD, "secret")
        .with(options::DATABASE, "app")
        .with(options::DIALECT, "aurora-postgres")
        .with(options::CLUSTER_ID, "test-cluster")
        .with(options::CLUSTER_INSTANCE_HOST_PATTERN, "?.db.test")
}

/// Opt-in test logging: `RUST_LOG=drover=debug cargo test -- --nocapture`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub async fn connect(
    cluster: &MockCluster,
    registry: Arc<DriverRegistry>,
    props: Properties,
) -> Client {
    init_tracing();
    ClientBuilder::new(cluster.driver(), props)
        .registry(registry)
        .connect()
        .await
        .expect("client should connect")
}
