// src/core/session.rs

//! Tracks the user-settable session flags and replays them against a new
//! target after the current connection is swapped.

use crate::core::dialect::{DatabaseDialect, IsolationLevel, classify};
use crate::core::driver::WireConnection;
use crate::core::errors::Result;

/// The session flags the wrapper preserves across a target swap. A `None`
/// means the user never touched the flag and the server default stands.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub read_only: Option<bool>,
    pub auto_commit: Option<bool>,
    pub isolation: Option<IsolationLevel>,
    pub schema: Option<String>,
    pub catalog: Option<String>,
}

impl SessionState {
    pub fn is_empty(&self) -> bool {
        *self == SessionState::default()
    }

    pub fn clear(&mut self) {
        *self = SessionState::default();
    }

    /// Captures any session mutation a raw statement carries. Explicit verb
    /// calls (`set_read_only`, …) are captured separately by the terminal
    /// plugin; this path covers users issuing the SQL themselves.
    pub fn capture_statement(&mut self, dialect: &dyn DatabaseDialect, sql: &str) {
        if let Some(read_only) = dialect.statement_sets_read_only(sql) {
            self.read_only = Some(read_only);
        }
        if let Some(auto_commit) = dialect.statement_sets_auto_commit(sql) {
            self.auto_commit = Some(auto_commit);
        }
        if let Some(level) = dialect.statement_sets_transaction_isolation(sql) {
            self.isolation = Some(level);
        }
        if let Some(schema) = dialect.statement_sets_schema(sql) {
            self.schema = Some(schema);
        }
        if let Some(catalog) = dialect.statement_sets_catalog(sql) {
            self.catalog = Some(catalog);
        }
    }

    /// Reapplies every tracked flag on a freshly opened connection. Flags the
    /// engine cannot express on a live session are skipped.
    pub async fn replay(
        &self,
        conn: &dyn WireConnection,
        dialect: &dyn DatabaseDialect,
    ) -> Result<()> {
        let mut statements: Vec<String> = Vec::new();
        if let Some(read_only) = self.read_only {
            statements.push(dialect.set_read_only_query(read_only));
        }
        if let Some(auto_commit) = self.auto_commit {
            if let Some(sql) = dialect.set_auto_commit_query(auto_commit) {
                statements.push(sql);
            }
        }
        if let Some(level) = self.isolation {
            statements.push(dialect.set_transaction_isolation_query(level));
        }
        if let Some(schema) = &self.schema {
            if let Some(sql) = dialect.set_schema_query(schema) {
                statements.push(sql);
            }
        }
        if let Some(catalog) = &self.catalog {
            if let Some(sql) = dialect.set_catalog_query(catalog) {
                statements.push(sql);
            }
        }

        for sql in statements {
            conn.query(&sql, &[])
                .await
                .map_err(|e| classify(dialect.error_handler(), &e))?;
        }
        Ok(())
    }
}
