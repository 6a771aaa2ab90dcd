// src/core/dialect/mod.rs

//! Database dialects: engine-specific SQL grammar, statement sniffers,
//! topology queries, role detection, and error classification tables.

pub mod mysql;
pub mod postgres;

use crate::config::Properties;
use crate::core::driver::{QueryResult, WireConnection, WireError};
use crate::core::errors::{DroverError, Result};
use crate::core::host::HostRole;
use async_trait::async_trait;
use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use strum_macros::{Display, EnumString};

/// Transaction isolation levels the wrapper can track and replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum IsolationLevel {
    #[strum(serialize = "READ UNCOMMITTED")]
    ReadUncommitted,
    #[strum(serialize = "READ COMMITTED")]
    ReadCommitted,
    #[strum(serialize = "REPEATABLE READ")]
    RepeatableRead,
    #[strum(serialize = "SERIALIZABLE")]
    Serializable,
}

/// One row of a dialect's topology query, already coerced out of the raw
/// result set.
#[derive(Debug, Clone)]
pub struct TopologyRow {
    /// The instance name the server reports for the row.
    pub host_id: String,
    /// A routable endpoint, when the engine exposes one directly. Absent
    /// rows are templated through `clusterInstanceHostPattern`.
    pub endpoint: Option<String>,
    pub port: Option<u16>,
    pub is_writer: bool,
    pub last_update: Option<DateTime<Utc>>,
    pub weight: Option<u64>,
}

bitflags! {
    /// Failover behaviors a dialect forbids for its deployment model.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FailoverRestrictions: u8 {
        /// No individually routable readers exist; reader failover must not run.
        const DISABLE_READER_FAILOVER = 1 << 0;
    }
}

/// Known dialect identifiers, used for configuration and for the
/// more-specific-candidate probing chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum DialectCode {
    #[strum(serialize = "postgres")]
    Postgres,
    #[strum(serialize = "aurora-postgres")]
    AuroraPostgres,
    #[strum(serialize = "mysql")]
    Mysql,
    #[strum(serialize = "aurora-mysql")]
    AuroraMysql,
}

/// The coarse classes a raw driver error can fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Login,
    Network,
    Access,
    Syntax,
    Other,
}

/// Per-engine classification tables. Classification is by attribute
/// (SQLSTATE plus message substring), never by error type, so it ports
/// across driver stacks. A two-character entry matches the whole SQLSTATE
/// class.
pub trait ErrorHandler: Send + Sync {
    fn login_states(&self) -> &[&str];
    fn network_states(&self) -> &[&str];
    fn access_states(&self) -> &[&str];
    fn syntax_states(&self) -> &[&str];
    fn network_message_fragments(&self) -> &[&str];

    fn login_message_fragments(&self) -> &[&str] {
        &[]
    }

    fn kind_of(&self, err: &WireError) -> ErrorKind {
        if let Some(state) = err.sqlstate.as_deref() {
            if state_matches(self.login_states(), state) {
                return ErrorKind::Login;
            }
            if state_matches(self.access_states(), state) {
                return ErrorKind::Access;
            }
            if state_matches(self.syntax_states(), state) {
                return ErrorKind::Syntax;
            }
            if state_matches(self.network_states(), state) {
                return ErrorKind::Network;
            }
        }
        let message = err.message.to_ascii_lowercase();
        if self
            .network_message_fragments()
            .iter()
            .any(|frag| message.contains(&frag.to_ascii_lowercase()))
        {
            return ErrorKind::Network;
        }
        if self
            .login_message_fragments()
            .iter()
            .any(|frag| message.contains(&frag.to_ascii_lowercase()))
        {
            return ErrorKind::Login;
        }
        ErrorKind::Other
    }
}

fn state_matches(entries: &[&str], state: &str) -> bool {
    entries
        .iter()
        .any(|entry| *entry == state || (entry.len() == 2 && state.starts_with(entry)))
}

/// Maps a classified wire error into the wrapper's error taxonomy.
/// Unclassified errors surface as `Internal`, wrapping the driver message.
pub fn classify(handler: &dyn ErrorHandler, err: &WireError) -> DroverError {
    match handler.kind_of(err) {
        ErrorKind::Login => DroverError::Login(err.to_string()),
        ErrorKind::Network => DroverError::Network(err.to_string()),
        ErrorKind::Access => DroverError::Access(err.to_string()),
        ErrorKind::Syntax => DroverError::Syntax(err.to_string()),
        ErrorKind::Other => DroverError::Internal(err.to_string()),
    }
}

/// Engine-specific grammar, probes, and topology access.
#[async_trait]
pub trait DatabaseDialect: Send + Sync {
    fn code(&self) -> DialectCode;

    fn default_port(&self) -> u16;

    fn host_alias_query(&self) -> &'static str;

    fn server_version_query(&self) -> &'static str;

    fn set_read_only_query(&self, read_only: bool) -> String;

    /// `None` when autocommit is a client-side concern for this engine.
    fn set_auto_commit_query(&self, auto_commit: bool) -> Option<String>;

    fn set_transaction_isolation_query(&self, level: IsolationLevel) -> String;

    /// `None` when the engine cannot switch catalogs on a live session.
    fn set_catalog_query(&self, catalog: &str) -> Option<String>;

    /// `None` when the engine has no schema concept to switch.
    fn set_schema_query(&self, schema: &str) -> Option<String>;

    // --- Statement sniffers (coarse classification only, no SQL parsing) ---

    fn statement_sets_read_only(&self, sql: &str) -> Option<bool>;
    fn statement_sets_auto_commit(&self, sql: &str) -> Option<bool>;
    fn statement_sets_transaction_isolation(&self, sql: &str) -> Option<IsolationLevel>;
    fn statement_sets_schema(&self, sql: &str) -> Option<String>;
    fn statement_sets_catalog(&self, sql: &str) -> Option<String>;
    fn statement_starts_transaction(&self, sql: &str) -> bool;
    fn statement_closes_transaction(&self, sql: &str) -> bool;

    /// Probes whether `conn` is served by the engine this dialect models.
    async fn is_dialect(&self, conn: &dyn WireConnection) -> bool;

    fn supports_topology_discovery(&self) -> bool {
        false
    }

    async fn query_for_topology(&self, _conn: &dyn WireConnection) -> Result<Vec<TopologyRow>> {
        Err(DroverError::Internal(format!(
            "Dialect '{}' does not support topology discovery",
            self.code()
        )))
    }

    /// The role the connected instance currently serves.
    async fn host_role(&self, conn: &dyn WireConnection) -> Result<HostRole>;

    /// The instance name of the connected server.
    async fn identify_connection(&self, conn: &dyn WireConnection) -> Result<String>;

    /// More specific dialects to probe for, in order. Empty when this
    /// dialect is already terminal.
    fn update_candidates(&self) -> &'static [DialectCode] {
        &[]
    }

    fn failover_restrictions(&self) -> FailoverRestrictions {
        FailoverRestrictions::empty()
    }

    fn error_handler(&self) -> &dyn ErrorHandler;
}

/// Resolves a dialect instance for a code.
pub fn dialect_for(code: DialectCode) -> Arc<dyn DatabaseDialect> {
    match code {
        DialectCode::Postgres => Arc::new(postgres::PostgresDialect),
        DialectCode::AuroraPostgres => Arc::new(postgres::AuroraPostgresDialect),
        DialectCode::Mysql => Arc::new(mysql::MysqlDialect),
        DialectCode::AuroraMysql => Arc::new(mysql::AuroraMysqlDialect),
    }
}

/// Resolves the initial dialect from configuration, defaulting to Postgres.
pub fn dialect_from_properties(props: &Properties) -> Result<Arc<dyn DatabaseDialect>> {
    let name = props.string_or(crate::config::options::DIALECT, "postgres");
    let code = name
        .parse::<DialectCode>()
        .map_err(|_| DroverError::Configuration(format!("Unknown dialect '{name}'")))?;
    Ok(dialect_for(code))
}

/// Coerces a topology result set with the standard column aliases
/// (`server_id`, `is_writer`, `last_update`, `weight`, optionally
/// `endpoint` and `port`) into rows.
pub fn parse_topology_rows(result: &QueryResult) -> Result<Vec<TopologyRow>> {
    let mut rows = Vec::with_capacity(result.rows.len());
    for idx in 0..result.rows.len() {
        let host_id = match result.get(idx, "server_id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => continue,
        };
        let is_writer = match result.get(idx, "is_writer") {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64() == Some(1),
            Some(Value::String(s)) => matches!(s.as_str(), "t" | "true" | "1"),
            _ => false,
        };
        let last_update = match result.get(idx, "last_update") {
            Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Some(Value::Number(n)) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
            _ => None,
        };
        let weight = result
            .get(idx, "weight")
            .and_then(Value::as_u64)
            .filter(|w| *w > 0);
        let endpoint = result
            .get(idx, "endpoint")
            .and_then(Value::as_str)
            .map(str::to_string);
        let port = result
            .get(idx, "port")
            .and_then(Value::as_u64)
            .and_then(|p| u16::try_from(p).ok());
        rows.push(TopologyRow {
            host_id,
            endpoint,
            port,
            is_writer,
            last_update,
            weight,
        });
    }
    Ok(rows)
}
