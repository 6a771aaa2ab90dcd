// src/core/dialect/mysql.rs

//! MySQL dialects: the plain engine and the Aurora-flavored variant that
//! exposes cluster topology through `information_schema.replica_host_status`.

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
     IF(session_id = 'MASTER_SESSION_ID', true, false) AS is_writer, \
     last_update_timestamp AS last_update, NULL AS weight \
     FROM information_schema.replica_host_status \
     WHERE time_to_sec(timediff(now(), last_update_timestamp)) <= 300 \
        OR session_id = 'MASTER_SESSION_ID'";

const AURORA_PROBE_QUERY: &str = "SHOW VARIABLES LIKE 'aurora_version'";

const AURORA_INSTANCE_ID_QUERY: &str = "SELECT @@aurora_server_id AS server_id";

const HOST_ALIAS_QUERY: &str = "SELECT CONCAT(@@hostname, ':', @@port)";

const ROLE_QUERY: &str = "SELECT @@innodb_read_only AS is_reader";

static READ_ONLY_STMT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*SET\s+(?:SESSION\s+)?TRANSACTION\s+READ\s+(ONLY|WRITE)")
        .expect("static regex")
});

static AUTO_COMMIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*SET\s+(?:@@(?:session\.)?)?autocommit\s*=\s*'?(0|1|on|off|true|false)'?")
        .expect("static regex")
});

static USE_CATALOG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*USE\s+`?([A-Za-z0-9_\-]+)`?").expect("static regex"));

static ISOLATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*SET\s+(?:SESSION\s+)?TRANSACTION\s+ISOLATION\s+LEVEL\s+(READ\s+UNCOMMITTED|READ\s+COMMITTED|REPEATABLE\s+READ|SERIALIZABLE)",
    )
    .expect("static regex")
});

static BEGIN_TXN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(BEGIN|START\s+TRANSACTION)\b").expect("static regex"));

static CLOSE_TXN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(COMMIT|ROLLBACK)\b").expect("static regex"));

fn sniff_read_only(sql: &str) -> Option<bool> {
    let caps = READ_ONLY_STMT.captures(sql)?;
    Some(caps[1].eq_ignore_ascii_case("ONLY"))
}

fn sniff_auto_commit(sql: &str) -> Option<bool> {
    let caps = AUTO_COMMIT.captures(sql)?;
    let value = caps[1].to_ascii_lowercase();
    Some(matches!(value.as_str(), "1" | "on" | "true"))
}

fn sniff_isolation(sql: &str) -> Option<IsolationLevel> {
    let caps = ISOLATION.captures(sql)?;
    let normalized = caps[1].split_whitespace().collect::<Vec<_>>().join(" ");
    normalized.to_ascii_uppercase().parse().ok()
}

fn sniff_catalog(sql: &str) -> Option<String> {
    let caps = USE_CATALOG.captures(sql)?;
    Some(caps[1].to_string())
}

async fn query_role(conn: &dyn WireConnection) -> Result<HostRole> {
    let result = conn
        .query(ROLE_QUERY, &[])
        .await
        .map_err(|e| DroverError::Network(e.to_string()))?;
    let is_reader = match result.scalar() {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::Number(n)) => n.as_i64() == Some(1),
        Some(serde_json::Value::String(s)) => matches!(s.as_str(), "1" | "true"),
        _ => return Ok(HostRole::Unknown),
    };
    Ok(if is_reader {
        HostRole::Reader
    } else {
        HostRole::Writer
    })
}

/// Classification tables shared by both MySQL dialects.
pub struct MysqlErrorHandler;

impl ErrorHandler for MysqlErrorHandler {
    fn login_states(&self) -> &[&str] {
        &["28000"]
    }

    fn network_states(&self) -> &[&str] {
        &["08"]
    }

    fn access_states(&self) -> &[&str] {
        &[]
    }

    fn syntax_states(&self) -> &[&str] {
        &["42000", "42S02", "42S22"]
    }

    fn network_message_fragments(&self) -> &[&str] {
        &[
            "Lost connection to MySQL server",
            "MySQL server has gone away",
            "Connection refused",
            "Connection terminated",
            "Query read timeout",
            "read ECONNRESET",
            "connect ETIMEDOUT",
            "timeout expired",
        ]
    }

    fn login_message_fragments(&self) -> &[&str] {
        &["Access denied for user"]
    }
}

static MYSQL_ERROR_HANDLER: MysqlErrorHandler = MysqlErrorHandler;

/// Plain MySQL. Probes for the Aurora variant on dialect update.
pub struct MysqlDialect;

#[async_trait]
impl DatabaseDialect for MysqlDialect {
    fn code(&self) -> DialectCode {
        DialectCode::Mysql
    }

    fn default_port(&self) -> u16 {
        3306
    }

    fn host_alias_query(&self) -> &'static str {
        HOST_ALIAS_QUERY
    }

    fn server_version_query(&self) -> &'static str {
        "SELECT VERSION()"
    }

    fn set_read_only_query(&self, read_only: bool) -> String {
        if read_only {
            "SET SESSION TRANSACTION READ ONLY".to_string()
        } else {
            "SET SESSION TRANSACTION READ WRITE".to_string()
        }
    }

    fn set_auto_commit_query(&self, auto_commit: bool) -> Option<String> {
        Some(format!("SET autocommit={}", u8::from(auto_commit)))
    }

    fn set_transaction_isolation_query(&self, level: IsolationLevel) -> String {
        format!("SET SESSION TRANSACTION ISOLATION LEVEL {level}")
    }

    fn set_catalog_query(&self, catalog: &str) -> Option<String> {
        Some(format!("USE {catalog}"))
    }

    fn set_schema_query(&self, _schema: &str) -> Option<String> {
        // MySQL folds schema into catalog.
        None
    }

    fn statement_sets_read_only(&self, sql: &str) -> Option<bool> {
        sniff_read_only(sql)
    }

    fn statement_sets_auto_commit(&self, sql: &str) -> Option<bool> {
        sniff_auto_commit(sql)
    }

    fn statement_sets_transaction_isolation(&self, sql: &str) -> Option<IsolationLevel> {
        sniff_isolation(sql)
    }

    fn statement_sets_schema(&self, _sql: &str) -> Option<String> {
        None
    }

    fn statement_sets_catalog(&self, sql: &str) -> Option<String> {
        sniff_catalog(sql)
    }

    fn statement_starts_transaction(&self, sql: &str) -> bool {
        BEGIN_TXN.is_match(sql)
    }

    fn statement_closes_transaction(&self, sql: &str) -> bool {
        CLOSE_TXN.is_match(sql)
    }

    async fn is_dialect(&self, conn: &dyn WireConnection) -> bool {
        conn.query("SELECT @@version_comment", &[]).await.is_ok()
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
        &[DialectCode::AuroraMysql]
    }

    fn error_handler(&self) -> &dyn ErrorHandler {
        &MYSQL_ERROR_HANDLER
    }
}

/// Aurora MySQL: topology through `replica_host_status`, instance identity
/// through `@@aurora_server_id`.
pub struct AuroraMysqlDialect;

#[async_trait]
impl DatabaseDialect for AuroraMysqlDialect {
    fn code(&self) -> DialectCode {
        DialectCode::AuroraMysql
    }

    fn default_port(&self) -> u16 {
        3306
    }

    fn host_alias_query(&self) -> &'static str {
        HOST_ALIAS_QUERY
    }

    fn server_version_query(&self) -> &'static str {
        "SELECT VERSION()"
    }

    fn set_read_only_query(&self, read_only: bool) -> String {
        if read_only {
            "SET SESSION TRANSACTION READ ONLY".to_string()
        } else {
            "SET SESSION TRANSACTION READ WRITE".to_string()
        }
    }

    fn set_auto_commit_query(&self, auto_commit: bool) -> Option<String> {
        Some(format!("SET autocommit={}", u8::from(auto_commit)))
    }

    fn set_transaction_isolation_query(&self, level: IsolationLevel) -> String {
        format!("SET SESSION TRANSACTION ISOLATION LEVEL {level}")
    }

    fn set_catalog_query(&self, catalog: &str) -> Option<String> {
        Some(format!("USE {catalog}"))
    }

    fn set_schema_query(&self, _schema: &str) -> Option<String> {
        None
    }

    fn statement_sets_read_only(&self, sql: &str) -> Option<bool> {
        sniff_read_only(sql)
    }

    fn statement_sets_auto_commit(&self, sql: &str) -> Option<bool> {
        sniff_auto_commit(sql)
    }

    fn statement_sets_transaction_isolation(&self, sql: &str) -> Option<IsolationLevel> {
        sniff_isolation(sql)
    }

    fn statement_sets_schema(&self, _sql: &str) -> Option<String> {
        None
    }

    fn statement_sets_catalog(&self, sql: &str) -> Option<String> {
        sniff_catalog(sql)
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
        &MYSQL_ERROR_HANDLER
    }
}
