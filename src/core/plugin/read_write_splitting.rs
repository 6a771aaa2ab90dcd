// src/core/plugin/read_write_splitting.rs

//! The read/write splitting plugin: keeps a writer target and a reader
//! target side by side and routes the session between them when the
//! read-only flag flips.

use super::{
    ConnectChain, ConnectionChanges, ConnectionPlugin, ExecuteChain, HostProviderInit, InitChain,
    OperationResult, PluginOpinion, SqlOperation, Subscriptions, methods,
};
use crate::config::Properties;
use crate::core::driver::{TargetClient, WireConnection};
use crate::core::errors::{DroverError, Result};
use crate::core::host::{HostInfo, HostRole};
use crate::core::plugin::service::PluginService;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Default)]
struct SplitState {
    writer: Option<TargetClient>,
    reader: Option<TargetClient>,
}

pub struct ReadWriteSplittingPlugin {
    service: Arc<PluginService>,
    state: Mutex<SplitState>,
    /// Set while this plugin is performing its own swap, so its own targets
    /// survive the disposal consensus.
    switching: AtomicBool,
}

impl ReadWriteSplittingPlugin {
    pub fn new(service: Arc<PluginService>) -> Self {
        Self {
            service,
            state: Mutex::new(SplitState::default()),
            switching: AtomicBool::new(false),
        }
    }

    async fn switch_connection(&self, read_only: bool) -> Result<()> {
        let current = self.service.require_current_client()?;
        if read_only {
            if self.service.in_transaction() {
                // Routing happens once the transaction resolves.
                return Ok(());
            }
            if current.host.role() == HostRole::Reader {
                return Ok(());
            }
            self.switch_to_reader(current).await
        } else {
            if self.service.in_transaction() {
                return Err(DroverError::Internal(
                    "Cannot switch to the writer while a transaction is open".to_string(),
                ));
            }
            if current.host.role() != HostRole::Reader {
                return Ok(());
            }
            self.switch_to_writer(current).await
        }
    }

    async fn switch_to_reader(&self, current: TargetClient) -> Result<()> {
        let mut state = self.state.lock().await;
        state.writer = Some(current.clone());

        if let Some(reader) = state.reader.clone() {
            if reader.connection.is_open()
                && self.service.is_client_valid(reader.connection.as_ref()).await
            {
                debug!("Switching to the cached reader {}", reader.url());
                return self.swap_to(reader).await;
            }
            state.reader = None;
        }

        match self.open_reader().await {
            Ok(reader) => {
                info!("Switching to reader {}", reader.url());
                state.reader = Some(reader.clone());
                self.swap_to(reader).await
            }
            Err(e) => {
                // The session stays on the writer; read-only is best effort.
                warn!("No reader available ({e}); staying on writer {}", current.url());
                state.writer = None;
                Ok(())
            }
        }
    }

    async fn switch_to_writer(&self, current: TargetClient) -> Result<()> {
        let mut state = self.state.lock().await;
        state.reader = Some(current);

        if let Some(writer) = state.writer.clone() {
            if writer.connection.is_open()
                && self.service.is_client_valid(writer.connection.as_ref()).await
            {
                debug!("Switching back to the cached writer {}", writer.url());
                return self.swap_to(writer).await;
            }
            state.writer = None;
        }

        let topology = self.service.get_hosts().await?;
        let writer_host = topology.writer().cloned().ok_or_else(|| {
            DroverError::Internal("The current topology has no writer".to_string())
        })?;
        let conn = self.service.connect(&writer_host, self.service.props()).await?;
        let writer = TargetClient::new(conn, writer_host);
        info!("Reconnected to writer {}", writer.url());
        state.writer = Some(writer.clone());
        self.swap_to(writer).await
    }

    async fn open_reader(&self) -> Result<TargetClient> {
        let strategy = self.service.props().reader_selector_strategy();
        let host = self
            .service
            .get_host_info_by_strategy(HostRole::Reader, &strategy)
            .await?;
        let conn = self.service.connect(&host, self.service.props()).await?;
        Ok(TargetClient::new(conn, host))
    }

    /// Transfers session state onto the target, then swaps it in. The
    /// `switching` flag makes this plugin answer `Preserve` for its own swap
    /// so the side target being left is not disposed.
    async fn swap_to(&self, target: TargetClient) -> Result<()> {
        self.service
            .replay_session_state(target.connection.as_ref())
            .await?;
        self.switching.store(true, Ordering::Release);
        let swapped = self.service.set_current_client(target).await;
        self.switching.store(false, Ordering::Release);
        swapped
    }

}

#[async_trait]
impl ConnectionPlugin for ReadWriteSplittingPlugin {
    fn name(&self) -> &'static str {
        "readWriteSplitting"
    }

    fn subscriptions(&self) -> Subscriptions {
        Subscriptions::of(&[
            methods::CONNECT,
            methods::INIT_HOST_PROVIDER,
            methods::NOTIFY_CONNECTION_CHANGED,
            methods::QUERY,
            methods::EXECUTE,
            methods::SET_READ_ONLY,
        ])
    }

    async fn execute(&self, op: &SqlOperation, next: ExecuteChain<'_>) -> Result<OperationResult> {
        let requested = match op {
            SqlOperation::SetReadOnly(read_only) => Some(*read_only),
            SqlOperation::Query { sql, .. } | SqlOperation::Execute { sql, .. } => {
                self.service.dialect().statement_sets_read_only(sql)
            }
            _ => None,
        };
        if let Some(read_only) = requested {
            self.switch_connection(read_only).await?;
        }
        next.run(op).await
    }

    async fn connect(
        &self,
        host: &Arc<HostInfo>,
        props: &Properties,
        is_initial: bool,
        next: ConnectChain<'_>,
    ) -> Result<Arc<dyn WireConnection>> {
        if is_initial {
            // A brand-new session never inherits side targets.
            let mut state = self.state.lock().await;
            state.writer = None;
            state.reader = None;
        }
        next.run(host, props, is_initial).await
    }

    async fn init_host_provider(
        &self,
        props: &Properties,
        init: &HostProviderInit,
        next: InitChain<'_>,
    ) -> Result<()> {
        init.require_topology_aware();
        next.run(props, init).await
    }

    /// For its own swaps the plugin preserves the outgoing target; for
    /// external swaps (failover) the cached side targets are stale and get
    /// closed.
    async fn notify_connection_changed(&self, _changes: ConnectionChanges) -> PluginOpinion {
        if self.switching.load(Ordering::Acquire) {
            return PluginOpinion::Preserve;
        }

        let current = self.service.current_connection();
        let mut state = self.state.lock().await;
        let mut stale: Vec<TargetClient> = Vec::new();
        if let Some(writer) = &state.writer {
            let keep = current
                .as_ref()
                .map(|c| writer.same_connection(c))
                .unwrap_or(false);
            if !keep {
                stale.push(writer.clone());
                state.writer = None;
            }
        }
        if let Some(reader) = &state.reader {
            let keep = current
                .as_ref()
                .map(|c| reader.same_connection(c))
                .unwrap_or(false);
            if !keep {
                stale.push(reader.clone());
                state.reader = None;
            }
        }
        drop(state);
        for target in stale {
            debug!("Discarding stale split target {}", target.url());
            target.connection.close().await;
        }
        PluginOpinion::NoOpinion
    }
}
