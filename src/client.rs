// src/client.rs

//! The user-facing session façade: wires the plugin service and chain
//! together, performs the initial connect pipeline, and forwards every data
//! verb into the chain.

use crate::config::{Properties, options};
use crate::core::dialect::{IsolationLevel, dialect_from_properties};
use crate::core::driver::{DriverDialect, QueryResult, TargetClient};
use crate::core::errors::Result;
use crate::core::host::{HostInfo, HostRole, Topology};
use crate::core::plugin::factory::{Collaborators, build_plugins};
use crate::core::plugin::service::PluginService;
use crate::core::plugin::{HostProviderInit, OperationResult, PluginChain, SqlOperation};
use crate::core::registry::DriverRegistry;
use crate::core::session::SessionState;
use crate::core::telemetry::{NullTelemetryFactory, TelemetryFactory};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Builds a [`Client`] from a property set, a wire driver, and the optional
/// external collaborators.
pub struct ClientBuilder {
    driver: Arc<dyn DriverDialect>,
    props: Properties,
    registry: Option<Arc<DriverRegistry>>,
    telemetry: Option<Arc<dyn TelemetryFactory>>,
    collaborators: Collaborators,
}

impl ClientBuilder {
    pub fn new(driver: Arc<dyn DriverDialect>, props: Properties) -> Self {
        Self {
            driver,
            props,
            registry: None,
            telemetry: None,
            collaborators: Collaborators::default(),
        }
    }

    /// Shares another client's registry so topology, token, and monitor
    /// caches are shared across sessions.
    pub fn registry(mut self, registry: Arc<DriverRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetryFactory>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    /// Runs the connect pipeline and returns a live session.
    pub async fn connect(self) -> Result<Client> {
        let registry = self.registry.unwrap_or_else(DriverRegistry::new);
        let telemetry = self
            .telemetry
            .unwrap_or_else(|| Arc::new(NullTelemetryFactory));
        let dialect = dialect_from_properties(&self.props)?;

        let endpoint = self.props.require_string(options::HOST)?;
        let port = self
            .props
            .get_u16(options::PORT)?
            .unwrap_or_else(|| dialect.default_port());
        let initial_host = Arc::new(HostInfo::new(endpoint, port, HostRole::Unknown));

        let service = PluginService::new(
            self.driver,
            registry,
            telemetry,
            dialect,
            self.props.clone(),
            initial_host.clone(),
        );
        let plugins = build_plugins(&service, &self.collaborators)?;
        let chain = PluginChain::new(service.clone(), plugins);

        let init = HostProviderInit::default();
        chain.init_host_provider(&self.props, &init).await?;

        let conn = chain.connect(&initial_host, &self.props, true).await?;
        service.update_dialect(conn.as_ref()).await;

        let provider = service.host_list_provider()?;
        let resolved_host = match provider.identify_connection(&conn).await {
            Ok(host) => host,
            Err(e) => {
                debug!("Could not identify the initial connection ({e}); keeping the endpoint");
                initial_host
            }
        };
        service
            .set_current_client(TargetClient::new(conn, resolved_host))
            .await?;
        let _ = service.refresh_host_list().await;

        Ok(Client {
            service,
            chain,
            props: self.props,
        })
    }
}

/// One cluster-aware database session. All methods forward through the
/// plugin chain; the underlying wire connection may be swapped between any
/// two calls.
pub struct Client {
    service: Arc<PluginService>,
    chain: Arc<PluginChain>,
    props: Properties,
}

impl Client {
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let op = SqlOperation::Query {
            sql: sql.to_string(),
            params: params.to_vec(),
        };
        match self.chain.execute(&op).await? {
            OperationResult::Rows(rows) => Ok(rows),
            OperationResult::Unit => Ok(QueryResult::empty()),
        }
    }

    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let op = SqlOperation::Execute {
            sql: sql.to_string(),
            params: params.to_vec(),
        };
        match self.chain.execute(&op).await? {
            OperationResult::Rows(rows) => Ok(rows),
            OperationResult::Unit => Ok(QueryResult::empty()),
        }
    }

    pub async fn commit(&self) -> Result<()> {
        self.chain.execute(&SqlOperation::Commit).await.map(|_| ())
    }

    pub async fn rollback(&self) -> Result<()> {
        self.chain.execute(&SqlOperation::Rollback).await.map(|_| ())
    }

    pub async fn set_read_only(&self, read_only: bool) -> Result<()> {
        self.chain
            .execute(&SqlOperation::SetReadOnly(read_only))
            .await
            .map(|_| ())
    }

    pub async fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        self.chain
            .execute(&SqlOperation::SetAutoCommit(auto_commit))
            .await
            .map(|_| ())
    }

    pub async fn set_transaction_isolation(&self, level: IsolationLevel) -> Result<()> {
        self.chain
            .execute(&SqlOperation::SetTransactionIsolation(level))
            .await
            .map(|_| ())
    }

    pub async fn set_schema(&self, schema: &str) -> Result<()> {
        self.chain
            .execute(&SqlOperation::SetSchema(schema.to_string()))
            .await
            .map(|_| ())
    }

    pub async fn set_catalog(&self, catalog: &str) -> Result<()> {
        self.chain
            .execute(&SqlOperation::SetCatalog(catalog.to_string()))
            .await
            .map(|_| ())
    }

    /// Ends the session, closing or pooling the underlying connection.
    pub async fn end(&self) -> Result<()> {
        self.chain.execute(&SqlOperation::End).await.map(|_| ())
    }

    // --- Introspection ---

    pub fn is_read_only(&self) -> bool {
        self.service.session_state().read_only.unwrap_or(false)
    }

    pub fn session_state(&self) -> SessionState {
        self.service.session_state()
    }

    pub fn in_transaction(&self) -> bool {
        self.service.in_transaction()
    }

    pub fn current_host(&self) -> Option<Arc<HostInfo>> {
        self.service.current_host()
    }

    pub async fn hosts(&self) -> Result<Arc<Topology>> {
        self.service.get_hosts().await
    }

    pub fn props(&self) -> &Properties {
        &self.props
    }

    /// The plugin service, for advanced integrations and tests.
    pub fn service(&self) -> &Arc<PluginService> {
        &self.service
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field(
                "host",
                &self.service.current_host().map(|h| h.url()).unwrap_or_default(),
            )
            .finish()
    }
}
