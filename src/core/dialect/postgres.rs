// src/core/dialect/postgres.rs

//! PostgreSQL dialects: the plain engine and the Aurora-flavored variant
//! that exposes cluster topology through `aurora_replica_status()`.

use super::{
    DatabaseDialect, DialectCode, ErrorHandler, IsolationLevel, TopologyRow, parse_topology_rows,
};
use crate::core::driver::WireConnection;
use crate::core::errors::{DroverError, Result};
use crate::core::host::HostRole;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

const AURORA_TOPOLOGY_QUERY: &str = "SELECT server_id, \
     CASE WHEN session_id = 'MASTER_SESSION_ID' THEN true ELSE false END AS is_writer, \
     last_update_timestamp AS last_update, NULL AS weight \
     FROM aurora_replica_status() \
     WHERE extract(epoch FROM (now() - last_update_timestamp)) <= 300 \
        OR session_id = 'MASTER_SESSION_ID'";

const AURORA_PROBE_QUERY: &str = "SELECT 1 FROM pg_proc WHERE proname = 'aurora_replica_status'";

const AURORA_INSTANCE_ID_QUERY: &str = "SELECT aurora_db_instance_identifier() AS server_id";

const HOST_ALIAS_QUERY: &str = "SELECT concat(inet_server_addr(), ':', inet_server_port())";

const ROLE_QUERY: &str = "SELECT pg_is_in_recovery() AS is_reader";

static READ_ONLY_CHARACTERISTICS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*SET\s+SESSION\s+CHARACTERISTICS\s+AS\s+TRANSACTION\s+READ\s+(ONLY|WRITE)")
        .expect("static regex")
});

static READ_ONLY_GUC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*SET\s+(?:SESSION\s+)?default_transaction_read_only\s*(?:=|TO)\s*'?(on|off|true|false)'?",
    )
    .expect("static regex")
});

static SEARCH_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*SET\s+(?:SESSION\s+)?search_path\s*(?:=|TO)\s*(.+?)\s*;?\s*$")
        .expect("static regex")
});

static ISOLATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*SET\s+SESSION\s+CHARACTERISTICS\s+AS\s+TRANSACTION\s+ISOLATION\s+LEVEL\s+(READ\s+UNCOMMITTED|READ\s+COMMITTED|REPEATABLE\s+READ|SERIALIZABLE)",
    )
    .expect("static regex")
});

static BEGIN_TXN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(BEGIN|START\s+TRANSACTION)\b").expect("static regex"));

static CLOSE_TXN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(COMMIT|ROLLBACK|END)\b").expect("static regex"));

// Grammar helpers shared by both PostgreSQL dialects.

fn read_only_query(read_only: bool) -> String {
    if read_only {
        "SET SESSION CHARACTERISTICS AS TRANSACTION READ ONLY".to_string()
    } else {
        "SET SESSION CHARACTERISTICS AS TRANSACTION READ WRITE".to_string()
    }
}

fn isolation_query(level: IsolationLevel) -> String {
    format!("SET SESSION CHARACTERISTICS AS TRANSACTION ISOLATION LEVEL {level}")
}

fn schema_query(schema: &str) -> String {
    format!("SET search_path TO {schema}")
}

fn sniff_read_only(sql: &str) -> Option<bool> {
    if let Some(caps) = READ_ONLY_CHARACTERISTICS.captures(sql) {
        return Some(caps[1].eq_ignore_ascii_case("ONLY"));
    }
    if let Some(caps) = READ_ONLY_GUC.captures(sql) {
        let value = caps[1].to_ascii_lowercase();
        return Some(value == "on" || value == "true");
    }
    None
}

fn sniff_isolation(sql: &str) -> Option<IsolationLevel> {
    let caps = ISOLATION.captures(sql)?;
    let normalized = caps[1].split_whitespace().collect::<Vec<_>>().join(" ");
    normalized.to_ascii_uppercase().parse().ok()
}

fn sniff_schema(sql: &str) -> Option<String> {
    let caps = SEARCH_PATH.captures(sql)?;
    Some(caps[1].trim_matches('\'').trim().to_string())
}

async fn query_role(conn: &dyn WireConnection) -> Result<HostRole> {
    let result = conn
        .query(ROLE_QUERY, &[])
        .await
        .map_err(|e| DroverError::Network(e.to_string()))?;
    let is_reader = match result.scalar() {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => matches!(s.as_str(), "t" | "true"),
        _ => return Ok(HostRole::Unknown),
    };
    Ok(if is_reader {
        HostRole::Reader
    } else {
        HostRole::Writer
    })
}

/// Classification tables shared by both PostgreSQL dialects. Includes the
/// message fragments multi-AZ deployments emit on instance replacement.
pub struct PostgresErrorHandler;

impl ErrorHandler for PostgresErrorHandler {
    fn login_states(&self) -> &[&str] {
        &["28000", "28P01"]
    }

    fn network_states(&self) -> &[&str] {
        &["08", "57P01", "57P02", "57P03", "53300"]
    }

    fn access_states(&self) -> &[&str] {
        &["42501"]
    }

    fn syntax_states(&self) -> &[&str] {
        &["42601", "42P18"]
    }

    fn network_message_fragments(&self) -> &[&str] {
        &[
            "Connection terminated",
            "Query read timeout",
            "not queryable",
            "terminating connection",
            "connection refused",
            "connection reset",
            "timeout expired",
            "the connection is closed",
        ]
    }
}

static PG_ERROR_HANDLER: PostgresErrorHandler = PostgresErrorHandler;

/// Plain PostgreSQL. Has no topology source of its own, but probes for the
/// Aurora variant on dialect update.
pub struct PostgresDialect;

#[async_trait]
impl DatabaseDialect for PostgresDialect {
    fn code(&self) -> DialectCode {
        DialectCode::Postgres
    }

    fn default_port(&self) -> u16 {
        5432
    }

    fn host_alias_query(&self) -> &'static str {
        HOST_ALIAS_QUERY
    }

    fn server_version_query(&self) -> &'static str {
        "SELECT version()"
    }

    fn set_read_only_query(&self, read_only: bool) -> String {
        read_only_query(read_only)
    }

    fn set_auto_commit_query(&self, _auto_commit: bool) -> Option<String> {
        // Autocommit is a client-side concern in PostgreSQL.
        None
    }

    fn set_transaction_isolation_query(&self, level: IsolationLevel) -> String {
        isolation_query(level)
    }

    fn set_catalog_query(&self, _catalog: &str) -> Option<String> {
        // A live PostgreSQL session cannot switch databases.
        None
    }

    fn set_schema_query(&self, schema: &str) -> Option<String> {
        Some(schema_query(schema))
    }

    fn statement_sets_read_only(&self, sql: &str) -> Option<bool> {
        sniff_read_only(sql)
    }

    fn statement_sets_auto_commit(&self, _sql: &str) -> Option<bool> {
        None
    }

    fn statement_sets_transaction_isolation(&self, sql: &str) -> Option<IsolationLevel> {
        sniff_isolation(sql)
    }

    fn statement_sets_schema(&self, sql: &str) -> Option<String> {
        sniff_schema(sql)
    }

    fn statement_sets_catalog(&self, _sql: &str) -> Option<String> {
        None
    }

    fn statement_starts_transaction(&self, sql: &str) -> bool {
        BEGIN_TXN.is_match(sql)
    }

    fn statement_closes_transaction(&self, sql: &str) -> bool {
        CLOSE_TXN.is_match(sql)
    }

    async fn is_dialect(&self, conn: &dyn WireConnection) -> bool {
        conn.query("SELECT 1 FROM pg_proc LIMIT 1", &[]).await.is_ok()
    }

    async fn host_role(&self, conn: &dyn WireConnection) -> Result<HostRole> {
        query_role(conn).await
    }

    async fn identify_connection(&self, conn: &dyn WireConnection) -> Result<String> {
        let result = conn
            .query(HOST_ALIAS_QUERY, &[])
            .await
            .map_err(|e| DroverError::Internal(e.to_string()))?;
        result
            .scalar_str()
            .map(str::to_string)
            .ok_or_else(|| DroverError::Internal("Empty host identification result".to_string()))
    }

    fn update_candidates(&self) -> &'static [DialectCode] {
        &[DialectCode::AuroraPostgres]
    }

    fn error_handler(&self) -> &dyn ErrorHandler {
        &PG_ERROR_HANDLER
    }
}

/// Aurora PostgreSQL: topology through `aurora_replica_status()`, instance
/// identity through `aurora_db_instance_identifier()`.
pub struct AuroraPostgresDialect;

#[async_trait]
impl DatabaseDialect for AuroraPostgresDialect {
    fn code(&self) -> DialectCode {
        DialectCode::AuroraPostgres
    }

    fn default_port(&self) -> u16 {
        5432
    }

    fn host_alias_query(&self) -> &'static str {
        HOST_ALIAS_QUERY
    }

    fn server_version_query(&self) -> &'static str {
        "SELECT version()"
    }

    fn set_read_only_query(&self, read_only: bool) -> String {
        read_only_query(read_only)
    }

    fn set_auto_commit_query(&self, _auto_commit: bool) -> Option<String> {
        None
    }

    fn set_transaction_isolation_query(&self, level: IsolationLevel) -> String {
        isolation_query(level)
    }

    fn set_catalog_query(&self, _catalog: &str) -> Option<String> {
        None
    }

    fn set_schema_query(&self, schema: &str) -> Option<String> {
        Some(schema_query(schema))
    }

    fn statement_sets_read_only(&self, sql: &str) -> Option<bool> {
        sniff_read_only(sql)
    }

    fn statement_sets_auto_commit(&self, _sql: &str) -> Option<bool> {
        None
    }

    fn statement_sets_transaction_isolation(&self, sql: &str) -> Option<IsolationLevel> {
        sniff_isolation(sql)
    }

    fn statement_sets_schema(&self, sql: &str) -> Option<String> {
        sniff_schema(sql)
    }

    fn statement_sets_catalog(&self, _sql: &str) -> Option<String> {
        None
    }

    fn statement_starts_transaction(&self, sql: &str) -> bool {
        BEGIN_TXN.is_match(sql)
    }

    fn statement_closes_transaction(&self, sql: &str) -> bool {
        CLOSE_TXN.is_match(sql)
    }

    async fn is_dialect(&self, conn: &dyn WireConnection) -> bool {
        match conn.query(AURORA_PROBE_QUERY, &[]).await {
            Ok(result) => !result.rows.is_empty(),
            Err(_) => false,
        }
    }

    fn supports_topology_discovery(&self) -> bool {
        true
    }

    async fn query_for_topology(&self, conn: &dyn WireConnection) -> Result<Vec<TopologyRow>> {
        let result = conn
            .query(AURORA_TOPOLOGY_QUERY, &[])
            .await
            .map_err(|e| DroverError::Network(e.to_string()))?;
        parse_topology_rows(&result)
    }

    async fn host_role(&self, conn: &dyn WireConnection) -> Result<HostRole> {
        query_role(conn).await
    }

    async fn identify_connection(&self, conn: &dyn WireConnection) -> Result<String> {
        let result = conn
            .query(AURORA_INSTANCE_ID_QUERY, &[])
            .await
            .map_err(|e| DroverError::Internal(e.to_string()))?;
        result
            .scalar_str()
            .map(str::to_string)
            .ok_or_else(|| DroverError::Internal("Empty instance identifier result".to_string()))
    }

    fn error_handler(&self) -> &dyn ErrorHandler {
        &PG_ERROR_HANDLER
    }
}
