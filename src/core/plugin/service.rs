// src/core/plugin/service.rs

//! The plugin service: the central broker every plugin talks to. It owns the
//! current target client, the session state, the active dialect, and the
//! handles to the host list provider, connection provider, and shared
//! registry.

use crate::config::Properties;
use crate::core::dialect::{DatabaseDialect, DialectCode, classify, dialect_for};
use crate::core::driver::{DriverDialect, TargetClient, WireConnection, WireError};
use crate::core::errors::{DroverError, Result};
use crate::core::host::{HostAvailability, HostInfo, HostRole, Topology};
use crate::core::plugin::{ConnectionChanges, HostProviderInit, PluginChain, PluginOpinion};
use crate::core::provider::ConnectionProvider;
use crate::core::registry::DriverRegistry;
use crate::core::session::SessionState;
use crate::core::telemetry::TelemetryFactory;
use crate::core::topology::cluster_provider::ClusterTopologyProvider;
use crate::core::topology::static_provider::StaticHostListProvider;
use crate::core::topology::{HostListProvider, NodeChanges};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

pub struct PluginService {
    driver: Arc<dyn DriverDialect>,
    registry: Arc<DriverRegistry>,
    telemetry: Arc<dyn TelemetryFactory>,
    props: Properties,
    dialect: RwLock<Arc<dyn DatabaseDialect>>,
    current: RwLock<Option<TargetClient>>,
    initial_host: Arc<HostInfo>,
    provider: OnceCell<Arc<dyn HostListProvider>>,
    chain: OnceCell<Weak<PluginChain>>,
    connection_provider: ConnectionProvider,
    session_state: Mutex<SessionState>,
    in_transaction: AtomicBool,
}

impl PluginService {
    pub fn new(
        driver: Arc<dyn DriverDialect>,
        registry: Arc<DriverRegistry>,
        telemetry: Arc<dyn TelemetryFactory>,
        dialect: Arc<dyn DatabaseDialect>,
        props: Properties,
        initial_host: Arc<HostInfo>,
    ) -> Arc<Self> {
        let connection_provider = ConnectionProvider::new(driver.clone(), registry.clone());
        Arc::new(Self {
            driver,
            registry,
            telemetry,
            props,
            dialect: RwLock::new(dialect),
            current: RwLock::new(None),
            initial_host,
            provider: OnceCell::new(),
            chain: OnceCell::new(),
            connection_provider,
            session_state: Mutex::new(SessionState::default()),
            in_transaction: AtomicBool::new(false),
        })
    }

    // --- Wiring ---

    pub(crate) fn attach_chain(&self, chain: &Arc<PluginChain>) {
        let _ = self.chain.set(Arc::downgrade(chain));
    }

    pub fn chain(&self) -> Result<Arc<PluginChain>> {
        self.chain
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| DroverError::Internal("Plugin chain is not attached".to_string()))
    }

    pub fn props(&self) -> &Properties {
        &self.props
    }

    pub fn registry(&self) -> &Arc<DriverRegistry> {
        &self.registry
    }

    pub fn driver(&self) -> &Arc<dyn DriverDialect> {
        &self.driver
    }

    pub fn telemetry(&self) -> &Arc<dyn TelemetryFactory> {
        &self.telemetry
    }

    pub fn connection_provider(&self) -> &ConnectionProvider {
        &self.connection_provider
    }

    pub fn initial_host(&self) -> &Arc<HostInfo> {
        &self.initial_host
    }

    // --- Dialect ---

    pub fn dialect(&self) -> Arc<dyn DatabaseDialect> {
        self.dialect.read().clone()
    }

    pub fn set_dialect(&self, dialect: Arc<dyn DatabaseDialect>) {
        *self.dialect.write() = dialect;
    }

    /// Probes the connection against the current dialect's more specific
    /// candidates, replacing the dialect when one matches. Repeats until the
    /// candidate chain is exhausted.
    pub async fn update_dialect(&self, conn: &dyn WireConnection) {
        loop {
            let current = self.dialect();
            let mut updated: Option<DialectCode> = None;
            for code in current.update_candidates() {
                let candidate = dialect_for(*code);
                if candidate.is_dialect(conn).await {
                    updated = Some(*code);
                    self.set_dialect(candidate);
                    break;
                }
            }
            match updated {
                Some(code) => info!("Updated database dialect to '{code}'"),
                None => break,
            }
        }
    }

    pub fn classify_wire_error(&self, err: &WireError) -> DroverError {
        let dialect = self.dialect();
        classify(dialect.error_handler(), err)
    }

    pub fn is_network_error(&self, err: &DroverError) -> bool {
        err.is_network()
    }

    pub fn is_login_error(&self, err: &DroverError) -> bool {
        err.is_login()
    }

    // --- Current client ---

    pub fn current_client(&self) -> Option<TargetClient> {
        self.current.read().clone()
    }

    pub fn require_current_client(&self) -> Result<TargetClient> {
        self.current_client()
            .ok_or_else(|| DroverError::Internal("No active connection".to_string()))
    }

    /// Removes and returns the current target, leaving the session without
    /// an active connection. Used by `end`.
    pub fn take_current_client(&self) -> Option<TargetClient> {
        self.current.write().take()
    }

    pub fn current_connection(&self) -> Option<Arc<dyn WireConnection>> {
        self.current.read().as_ref().map(|c| c.connection.clone())
    }

    pub fn current_host(&self) -> Option<Arc<HostInfo>> {
        self.current.read().as_ref().map(|c| c.host.clone())
    }

    /// Swaps the current target client. The swap is published to every
    /// subscribed plugin synchronously; the previous target is closed (or
    /// returned to the pool) unless a plugin claims it with `Preserve`.
    pub async fn set_current_client(&self, new_client: TargetClient) -> Result<()> {
        let old_client = {
            let mut slot = self.current.write();
            let old = slot.take();
            *slot = Some(new_client.clone());
            old
        };

        let changes = Self::compute_changes(old_client.as_ref(), &new_client);
        let opinions = self.chain()?.notify_connection_changed(changes).await;
        let preserve = opinions.contains(&PluginOpinion::Preserve);

        if let Some(old) = old_client {
            if !preserve && !old.same_connection(&new_client.connection) {
                debug!("Disposing previous target {}", old.url());
                self.release_connection(old).await;
            }
        }
        Ok(())
    }

    fn compute_changes(old: Option<&TargetClient>, new: &TargetClient) -> ConnectionChanges {
        let mut changes = ConnectionChanges::CONNECTION_OBJECT_CHANGED;
        match old {
            None => changes |= ConnectionChanges::INITIAL_CONNECTION,
            Some(previous) => {
                if previous.host != new.host {
                    changes |= ConnectionChanges::HOST_CHANGED;
                }
                if previous.host.role() != HostRole::Writer && new.host.role() == HostRole::Writer {
                    changes |= ConnectionChanges::PROMOTED_TO_WRITER;
                }
                if previous.host.role() == HostRole::Writer && new.host.role() == HostRole::Reader {
                    changes |= ConnectionChanges::PROMOTED_TO_READER;
                }
            }
        }
        changes
    }

    /// Closes a target, or parks its connection in the keyed pool when
    /// internal pooling is on and the connection is still usable.
    pub async fn release_connection(&self, client: TargetClient) {
        if self.props.internal_pools_enabled() && client.connection.is_open() {
            let max_idle = self.props.internal_pool_max_idle();
            if self
                .registry
                .pools
                .release(&client.host, &self.props, client.connection.clone(), max_idle)
            {
                return;
            }
        }
        client.connection.close().await;
    }

    // --- Host list provider ---

    pub fn host_list_provider(&self) -> Result<Arc<dyn HostListProvider>> {
        self.provider
            .get()
            .cloned()
            .ok_or_else(|| DroverError::Internal("Host list provider is not initialized".to_string()))
    }

    /// Terminal step of the `initHostProvider` pipeline: picks the provider
    /// variant and installs it. A provider is only ever installed once.
    pub fn build_host_list_provider(
        self: &Arc<Self>,
        props: &Properties,
        init: &HostProviderInit,
    ) -> Result<()> {
        if self.provider.get().is_some() {
            return Ok(());
        }

        let provider: Arc<dyn HostListProvider> =
            if let Some(single) = props.get_string(crate::config::options::SINGLE_WRITER_CONNECTION_STRING)
            {
                Arc::new(StaticHostListProvider::from_connection_string(
                    &single,
                    self.dialect().default_port(),
                )?)
            } else {
                let dialect = self.dialect();
                let topology_capable = dialect.supports_topology_discovery()
                    || !dialect.update_candidates().is_empty();
                if init.topology_aware_required() || topology_capable {
                    Arc::new(ClusterTopologyProvider::new(
                        Arc::downgrade(self),
                        self.registry.clone(),
                        props,
                        self.initial_host.clone(),
                    ))
                } else {
                    Arc::new(StaticHostListProvider::from_properties(
                        props,
                        dialect.default_port(),
                    )?)
                }
            };

        let _ = self.provider.set(provider);
        Ok(())
    }

    /// The current snapshot, refreshed lazily when the cache TTL has passed.
    pub async fn get_hosts(&self) -> Result<Arc<Topology>> {
        self.refresh_host_list().await
    }

    pub async fn refresh_host_list(&self) -> Result<Arc<Topology>> {
        let provider = self.host_list_provider()?;
        provider.refresh(self.current_connection()).await
    }

    /// Bypasses the cache TTL. `conn` may supply the connection to query
    /// over; the current client is used otherwise.
    pub async fn force_refresh_host_list(
        &self,
        conn: Option<Arc<dyn WireConnection>>,
    ) -> Result<Arc<Topology>> {
        let provider = self.host_list_provider()?;
        provider
            .force_refresh(conn.or_else(|| self.current_connection()))
            .await
    }

    /// Selects a host from the current snapshot honoring the requested
    /// strategy.
    pub async fn get_host_info_by_strategy(
        &self,
        role: HostRole,
        strategy: &str,
    ) -> Result<Arc<HostInfo>> {
        if !ConnectionProvider::accepts_strategy(strategy) {
            return Err(DroverError::UnsupportedStrategy(strategy.to_string()));
        }
        let provider = self.host_list_provider()?;
        let topology = match provider.cached() {
            Some(snapshot) => snapshot,
            None => provider.refresh(self.current_connection()).await?,
        };
        self.connection_provider.select_host(
            &topology,
            role,
            strategy,
            &provider.cluster_id(),
            &self.props,
        )
    }

    /// Marks every host matching one of `names` (endpoint, url, instance id,
    /// or alias) with the given availability.
    pub fn set_availability(&self, names: &[String], availability: HostAvailability) {
        let Ok(provider) = self.host_list_provider() else {
            return;
        };
        let Some(snapshot) = provider.cached() else {
            return;
        };
        for host in snapshot.hosts() {
            if names.iter().any(|name| host.matches_alias(name)) {
                if host.availability() != availability {
                    info!("Host {} availability set to {availability}", host.url());
                }
                host.set_availability(availability);
            }
        }
    }

    // --- Side connections through the plugin pipeline ---

    /// Opens a new connection to `host` through the full `connect` pipeline.
    pub async fn connect(
        &self,
        host: &Arc<HostInfo>,
        props: &Properties,
    ) -> Result<Arc<dyn WireConnection>> {
        self.chain()?.connect(host, props, false).await
    }

    /// Opens a new connection bypassing interception-heavy plugins; used for
    /// monitoring connections so they can never recurse into monitoring.
    pub async fn force_connect(
        &self,
        host: &Arc<HostInfo>,
        props: &Properties,
    ) -> Result<Arc<dyn WireConnection>> {
        self.chain()?.force_connect(host, props, false).await
    }

    pub async fn is_client_valid(&self, conn: &dyn WireConnection) -> bool {
        self.driver.is_client_valid(conn).await
    }

    // --- Session state & transaction tracking ---

    pub fn session_state(&self) -> SessionState {
        self.session_state.lock().clone()
    }

    pub fn update_session_state(&self, update: impl FnOnce(&mut SessionState)) {
        update(&mut self.session_state.lock());
    }

    pub fn reset_session_state(&self) {
        self.session_state.lock().clear();
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::Acquire)
    }

    pub fn set_in_transaction(&self, value: bool) {
        self.in_transaction.store(value, Ordering::Release);
    }

    /// Observes a successfully executed raw statement: transaction boundary
    /// tracking plus capture of sniffed session mutations.
    pub fn observe_statement(&self, sql: &str) {
        let dialect = self.dialect();
        if dialect.statement_starts_transaction(sql) {
            self.set_in_transaction(true);
        } else if dialect.statement_closes_transaction(sql) {
            self.set_in_transaction(false);
        }
        self.session_state.lock().capture_statement(dialect.as_ref(), sql);
    }

    /// Reapplies the tracked session state on a freshly swapped-in target,
    /// honoring `transferSessionStateOnSwitch`.
    pub async fn replay_session_state(&self, conn: &dyn WireConnection) -> Result<()> {
        if !self.props.transfer_session_state_on_switch() {
            return Ok(());
        }
        let state = self.session_state();
        if state.is_empty() {
            return Ok(());
        }
        let dialect = self.dialect();
        if let Err(e) = state.replay(conn, dialect.as_ref()).await {
            warn!("Failed to replay session state on new target: {e}");
            return Err(e);
        }
        Ok(())
    }

    /// Forwards a topology diff to every subscribed plugin. Called by the
    /// host list provider after publishing a changed snapshot.
    pub async fn notify_node_list_changed(&self, changes: &HashMap<String, NodeChanges>) {
        if let Ok(chain) = self.chain() {
            chain.notify_host_list_changed(changes).await;
        }
    }
}
