// src/core/plugin/default_plugin.rs

//! The terminal plugin: always last in the chain, subscribed to everything,
//! and the only place the real driver call happens.

use super::{
    ConnectChain, ConnectionPlugin, ExecuteChain, HostProviderInit, InitChain, OperationResult,
    SqlOperation, Subscriptions,
};
use crate::config::Properties;
use crate::core::driver::{QueryResult, TargetClient, WireConnection};
use crate::core::errors::{DroverError, Result};
use crate::core::host::HostInfo;
use crate::core::plugin::service::PluginService;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub struct DefaultPlugin;

impl DefaultPlugin {
    async fn run_sql(
        service: &Arc<PluginService>,
        client: &TargetClient,
        sql: &str,
        params: &[Value],
    ) -> Result<QueryResult> {
        let attempt = match service.props().wrapper_query_timeout() {
            Some(limit) => {
                match tokio::time::timeout(limit, client.connection.query(sql, params)).await {
                    Ok(result) => result,
                    Err(_) => {
                        return Err(DroverError::Network(format!(
                            "Query against {} timed out after {limit:?}",
                            client.url()
                        )));
                    }
                }
            }
            None => client.connection.query(sql, params).await,
        };
        attempt.map_err(|e| service.classify_wire_error(&e))
    }
}

#[async_trait]
impl ConnectionPlugin for DefaultPlugin {
    fn name(&self) -> &'static str {
        "default"
    }

    fn subscriptions(&self) -> Subscriptions {
        Subscriptions::All
    }

    async fn execute(&self, op: &SqlOperation, next: ExecuteChain<'_>) -> Result<OperationResult> {
        let service = next.service();
        let client = service.require_current_client()?;
        let dialect = service.dialect();

        match op {
            SqlOperation::Query { sql, params } | SqlOperation::Execute { sql, params } => {
                let result = Self::run_sql(service, &client, sql, params).await?;
                service.observe_statement(sql);
                Ok(OperationResult::Rows(result))
            }
            SqlOperation::Commit => {
                Self::run_sql(service, &client, "COMMIT", &[]).await?;
                service.set_in_transaction(false);
                Ok(OperationResult::Unit)
            }
            SqlOperation::Rollback => {
                Self::run_sql(service, &client, "ROLLBACK", &[]).await?;
                service.set_in_transaction(false);
                Ok(OperationResult::Unit)
            }
            SqlOperation::SetReadOnly(read_only) => {
                let sql = dialect.set_read_only_query(*read_only);
                Self::run_sql(service, &client, &sql, &[]).await?;
                service.update_session_state(|s| s.read_only = Some(*read_only));
                Ok(OperationResult::Unit)
            }
            SqlOperation::SetAutoCommit(auto_commit) => {
                // Engines without a server-side autocommit toggle still get
                // the flag tracked for replay on the driver's side.
                if let Some(sql) = dialect.set_auto_commit_query(*auto_commit) {
                    Self::run_sql(service, &client, &sql, &[]).await?;
                }
                service.update_session_state(|s| s.auto_commit = Some(*auto_commit));
                Ok(OperationResult::Unit)
            }
            SqlOperation::SetTransactionIsolation(level) => {
                let sql = dialect.set_transaction_isolation_query(*level);
                Self::run_sql(service, &client, &sql, &[]).await?;
                service.update_session_state(|s| s.isolation = Some(*level));
                Ok(OperationResult::Unit)
            }
            SqlOperation::SetSchema(schema) => {
                let sql = dialect.set_schema_query(schema).ok_or_else(|| {
                    DroverError::Configuration(format!(
                        "Dialect '{}' does not support switching schemas",
                        dialect.code()
                    ))
                })?;
                Self::run_sql(service, &client, &sql, &[]).await?;
                service.update_session_state(|s| s.schema = Some(schema.clone()));
                Ok(OperationResult::Unit)
            }
            SqlOperation::SetCatalog(catalog) => {
                let sql = dialect.set_catalog_query(catalog).ok_or_else(|| {
                    DroverError::Configuration(format!(
                        "Dialect '{}' does not support switching catalogs",
                        dialect.code()
                    ))
                })?;
                Self::run_sql(service, &client, &sql, &[]).await?;
                service.update_session_state(|s| s.catalog = Some(catalog.clone()));
                Ok(OperationResult::Unit)
            }
            SqlOperation::End => {
                if let Some(client) = service.take_current_client() {
                    service.release_connection(client).await;
                }
                if service.props().reset_session_state_on_close() {
                    service.reset_session_state();
                }
                service.set_in_transaction(false);
                Ok(OperationResult::Unit)
            }
        }
    }

    async fn connect(
        &self,
        host: &Arc<HostInfo>,
        props: &Properties,
        _is_initial: bool,
        next: ConnectChain<'_>,
    ) -> Result<Arc<dyn WireConnection>> {
        let service = next.service();
        service
            .connection_provider()
            .connect(host, props)
            .await
            .map_err(|e| service.classify_wire_error(&e))
    }

    async fn force_connect(
        &self,
        host: &Arc<HostInfo>,
        props: &Properties,
        is_initial: bool,
        next: ConnectChain<'_>,
    ) -> Result<Arc<dyn WireConnection>> {
        self.connect(host, props, is_initial, next).await
    }

    async fn init_host_provider(
        &self,
        props: &Properties,
        init: &HostProviderInit,
        next: InitChain<'_>,
    ) -> Result<()> {
        next.service().build_host_list_provider(props, init)
    }
}
