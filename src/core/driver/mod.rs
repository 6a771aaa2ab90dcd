// src/core/driver/mod.rs

//! The boundary to a concrete wire driver. The wrapper never speaks a
//! database protocol itself; it drives these traits, and classification of
//! the raw errors they produce is left to the database dialect.

use crate::config::Properties;
use crate::core::errors::{DroverError, Result};
use crate::core::host::HostInfo;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// A raw failure reported by the wire driver. Carries the attributes the
/// dialect error handlers classify on: SQLSTATE and message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireError {
    pub sqlstate: Option<String>,
    pub message: String,
}

impl WireError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            sqlstate: None,
            message: message.into(),
        }
    }

    pub fn with_sqlstate(message: impl Into<String>, sqlstate: impl Into<String>) -> Self {
        Self {
            sqlstate: Some(sqlstate.into()),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.sqlstate {
            Some(state) => write!(f, "[{state}] {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// A rectangular result set. Row values are JSON values so the wrapper can
/// read topology rows and role probes without knowing driver value types.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// Looks up a cell by row index and column name.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let col = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(col)
    }

    /// The first cell of the first row, for single-scalar probes.
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first()?.first()
    }

    pub fn scalar_str(&self) -> Option<&str> {
        self.scalar()?.as_str()
    }
}

/// One live connection to a single database instance.
#[async_trait]
pub trait WireConnection: Send + Sync {
    async fn query(
        &self,
        sql: &str,
        params: &[Value],
    ) -> std::result::Result<QueryResult, WireError>;

    async fn ping(&self) -> std::result::Result<(), WireError>;

    /// Graceful close. Close failures are the driver's to log; the wrapper
    /// treats a closed connection as gone either way.
    async fn close(&self);

    /// Forcibly severs the connection, unblocking any in-flight call on it
    /// with a network-class error. Must be callable from another task.
    fn abort(&self);

    fn is_open(&self) -> bool;
}

/// The adapter to a concrete wire driver: opening connections and the few
/// driver-level knobs the wrapper manages.
#[async_trait]
pub trait DriverDialect: Send + Sync {
    fn name(&self) -> &'static str;

    async fn connect(
        &self,
        host: &HostInfo,
        props: &Properties,
    ) -> std::result::Result<Arc<dyn WireConnection>, WireError>;

    /// Driver-level liveness check for an existing connection.
    async fn is_client_valid(&self, conn: &dyn WireConnection) -> bool {
        conn.is_open() && conn.ping().await.is_ok()
    }

    fn supports_tcp_keepalive(&self) -> bool {
        false
    }

    /// Enables TCP keepalive on subsequently opened connections. Drivers that
    /// cannot honor it must reject the option rather than ignore it.
    fn set_tcp_keepalive(&self, props: &mut Properties, interval: Duration) -> Result<()> {
        if !self.supports_tcp_keepalive() {
            return Err(DroverError::Configuration(format!(
                "Driver '{}' does not support TCP keepalive",
                self.name()
            )));
        }
        props.set("keepAliveIntervalMs", interval.as_millis() as u64);
        Ok(())
    }

    fn set_connect_timeout(&self, props: &mut Properties, timeout: Duration) {
        props.set("connectTimeoutMs", timeout.as_millis() as u64);
    }

    fn set_query_timeout(&self, props: &mut Properties, timeout: Duration) {
        props.set("queryTimeoutMs", timeout.as_millis() as u64);
    }

    /// Rewrites user properties into the form the driver's own pool expects.
    fn prepare_pool_properties(&self, props: &Properties, max_idle: usize) -> Properties {
        props.clone().with("poolMaxIdle", max_idle as u64)
    }

    /// A driver-managed pool for this property set, when the driver offers
    /// one. Acquisition failures are surfaced by the wrapper as internal
    /// errors wrapping the pool's message.
    fn get_pool_client(&self, _props: &Properties) -> Option<Arc<dyn WirePool>> {
        None
    }
}

/// A pool of wire connections managed by the driver itself.
#[async_trait]
pub trait WirePool: Send + Sync {
    async fn acquire(&self) -> std::result::Result<Arc<dyn WireConnection>, WireError>;
}

/// The target client: one wire connection bound to the host descriptor it was
/// opened against. This is what the plugin service swaps under the caller's
/// feet during failover or read/write routing.
#[derive(Clone)]
pub struct TargetClient {
    pub connection: Arc<dyn WireConnection>,
    pub host: Arc<HostInfo>,
}

impl TargetClient {
    pub fn new(connection: Arc<dyn WireConnection>, host: Arc<HostInfo>) -> Self {
        Self { connection, host }
    }

    pub fn url(&self) -> String {
        self.host.url()
    }

    /// True when both sides refer to the very same wire connection.
    pub fn same_connection(&self, other: &Arc<dyn WireConnection>) -> bool {
        Arc::ptr_eq(&self.connection, other)
    }
}

impl std::fmt::Debug for TargetClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetClient")
            .field("host", &self.host.url())
            .field("open", &self.connection.is_open())
            .finish()
    }
}
