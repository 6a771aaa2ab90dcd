// src/core/plugin/failover.rs

//! The failover plugin: watches every operation for network-class failures
//! and drives the writer/reader failover state machine when one strikes.

use super::{
    ConnectionPlugin, ExecuteChain, HostProviderInit, InitChain, OperationResult, SqlOperation,
    Subscriptions,
};
use crate::config::{Properties, options};
use crate::core::dialect::FailoverRestrictions;
use crate::core::driver::{TargetClient, WireConnection};
use crate::core::errors::{DroverError, Result};
use crate::core::host::{HostAvailability, HostInfo, HostRole};
use crate::core::plugin::service::PluginService;
use crate::core::telemetry::TelemetryCounter;
use crate::core::topology::rds;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use strum_macros::{Display, EnumString};
use tokio::time::Instant;
use tracing::{info, warn};

/// Which kind of target a failover is allowed to settle on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum FailoverMode {
    #[strum(serialize = "strict-writer")]
    StrictWriter,
    #[strum(serialize = "strict-reader")]
    StrictReader,
    #[strum(serialize = "reader-or-writer")]
    ReaderOrWriter,
}

pub struct FailoverPlugin {
    service: Arc<PluginService>,
    enabled: bool,
    configured_mode: Option<FailoverMode>,
    resolved_mode: OnceCell<FailoverMode>,
    failover_counter: Arc<dyn TelemetryCounter>,
}

impl FailoverPlugin {
    pub fn new(service: Arc<PluginService>) -> Result<Self> {
        let props = service.props();
        let enabled = props.cluster_aware_failover_enabled();
        let configured_mode = match props.get_string(options::FAILOVER_MODE) {
            Some(raw) => Some(raw.parse::<FailoverMode>().map_err(|_| {
                DroverError::Configuration(format!("Unknown failover mode '{raw}'"))
            })?),
            None => None,
        };
        let failover_counter = service.telemetry().create_counter("failover.triggered");
        Ok(Self {
            service,
            enabled,
            configured_mode,
            resolved_mode: OnceCell::new(),
            failover_counter,
        })
    }

    /// The effective mode: explicit configuration wins; otherwise sessions
    /// entering through a reader endpoint accept readers, everything else is
    /// strict about the writer.
    fn mode(&self) -> FailoverMode {
        *self.resolved_mode.get_or_init(|| {
            if let Some(mode) = self.configured_mode {
                return mode;
            }
            let endpoint_type = rds::analyze(self.service.initial_host().host());
            if endpoint_type == rds::RdsUrlType::ClusterReader {
                FailoverMode::ReaderOrWriter
            } else {
                FailoverMode::StrictWriter
            }
        })
    }

    fn triggers_failover(op: &SqlOperation) -> bool {
        !matches!(op, SqlOperation::End)
    }

    async fn failover_and_raise(&self, original: DroverError) -> DroverError {
        self.failover_counter.inc();
        warn!("Network failure detected ({original}); starting failover");

        let failed_host = self.service.current_host();
        if let Some(host) = &failed_host {
            self.service
                .set_availability(&[host.url()], HostAvailability::NotAvailable);
        }

        let was_in_transaction = self.service.in_transaction();
        let deadline = Instant::now() + self.service.props().failover_timeout();

        let outcome = match self.mode() {
            FailoverMode::StrictWriter => self.failover_writer(deadline, failed_host).await,
            FailoverMode::StrictReader => self.failover_reader(deadline, false).await,
            FailoverMode::ReaderOrWriter => self.failover_reader(deadline, true).await,
        };

        match outcome {
            Ok(new_host) => {
                info!("Failover completed; session now targets {}", new_host.url());
                self.service.set_in_transaction(false);
                if was_in_transaction {
                    DroverError::TransactionResolutionUnknown(
                        "A failover interrupted the open transaction; re-run it against the new target"
                            .to_string(),
                    )
                } else {
                    DroverError::FailoverSuccess(format!("New target: {}", new_host.url()))
                }
            }
            Err(e) => DroverError::FailoverFailed(format!("{e}. Original failure: {original}")),
        }
    }

    /// Writer failover: poll topology until a confirmed writer accepts a
    /// connection, then swap to it. When the failed host *was* the writer,
    /// an unchanged topology means the cluster has not promoted anyone yet
    /// and the only option is to wait; a reader session reconnects to the
    /// standing writer right away.
    async fn failover_writer(
        &self,
        deadline: Instant,
        failed_host: Option<Arc<HostInfo>>,
    ) -> Result<Arc<HostInfo>> {
        let service = &self.service;
        let props = service.props();
        let reconnect_interval = props.failover_writer_reconnect_interval();
        // Connections opened during failover carry a faster topology refresh
        // rate so the cluster view converges quickly.
        let failover_props = props.clone().with(
            options::CLUSTER_TOPOLOGY_REFRESH_RATE_MS,
            props.failover_topology_refresh_rate().as_millis() as u64,
        );

        let original_writer = service
            .host_list_provider()?
            .cached()
            .and_then(|t| t.writer().cloned());

        loop {
            if Instant::now() >= deadline {
                return Err(DroverError::Internal(
                    "Writer failover deadline exceeded".to_string(),
                ));
            }

            let topology = match service.force_refresh_host_list(None).await {
                Ok(topology) => topology,
                Err(e) => {
                    warn!("Topology refresh during writer failover failed: {e}");
                    tokio::time::sleep(reconnect_interval).await;
                    continue;
                }
            };

            let Some(writer) = topology.writer().cloned() else {
                tokio::time::sleep(reconnect_interval).await;
                continue;
            };

            let writer_was_the_failure = failed_host
                .as_ref()
                .map(|failed| **failed == *writer)
                .unwrap_or(false);
            if writer_was_the_failure {
                if let Some(original) = &original_writer {
                    if writer == *original {
                        // The cluster has not promoted anyone yet.
                        tokio::time::sleep(reconnect_interval).await;
                        continue;
                    }
                }
            }

            match service.connect(&writer, &failover_props).await {
                Ok(conn) => {
                    if self.confirm_role(&conn, HostRole::Writer).await {
                        self.adopt(conn, writer.clone()).await?;
                        return Ok(writer);
                    }
                    conn.close().await;
                    tokio::time::sleep(reconnect_interval).await;
                }
                Err(e) => {
                    warn!("Writer candidate {} rejected the connection: {e}", writer.url());
                    service.set_availability(&[writer.url()], HostAvailability::NotAvailable);
                    tokio::time::sleep(reconnect_interval).await;
                }
            }
        }
    }

    /// Reader failover: walk the readers in weighted-shuffled order with a
    /// per-attempt timeout; optionally accept the writer as a fallback.
    async fn failover_reader(
        &self,
        deadline: Instant,
        writer_fallback: bool,
    ) -> Result<Arc<HostInfo>> {
        let service = &self.service;
        let props = service.props();
        let attempt_timeout = props.failover_reader_connect_timeout();
        let reconnect_interval = props.failover_writer_reconnect_interval();

        let restrictions = service.dialect().failover_restrictions();
        let readers_allowed = !restrictions.contains(FailoverRestrictions::DISABLE_READER_FAILOVER);
        if !readers_allowed && !writer_fallback {
            return Err(DroverError::Internal(
                "The current deployment offers no individually routable readers".to_string(),
            ));
        }

        loop {
            if Instant::now() >= deadline {
                return Err(DroverError::Internal(
                    "Reader failover deadline exceeded".to_string(),
                ));
            }

            let topology = match service.force_refresh_host_list(None).await {
                Ok(topology) => topology,
                Err(e) => {
                    warn!("Topology refresh during reader failover failed: {e}");
                    tokio::time::sleep(reconnect_interval).await;
                    continue;
                }
            };

            if readers_allowed {
                for candidate in Self::shuffled_readers(topology.readers().cloned().collect()) {
                    if Instant::now() >= deadline {
                        break;
                    }
                    match self.try_candidate(&candidate, attempt_timeout, props).await {
                        Some(conn) => {
                            self.adopt(conn, candidate.clone()).await?;
                            return Ok(candidate);
                        }
                        None => {
                            service
                                .set_availability(&[candidate.url()], HostAvailability::NotAvailable);
                        }
                    }
                }
            }

            if writer_fallback {
                if let Some(writer) = topology.writer().cloned() {
                    if let Some(conn) = self.try_candidate(&writer, attempt_timeout, props).await {
                        info!("No reader reachable; accepting writer {}", writer.url());
                        self.adopt(conn, writer.clone()).await?;
                        return Ok(writer);
                    }
                }
            }

            tokio::time::sleep(reconnect_interval).await;
        }
    }

    /// Orders readers by a weighted shuffle: heavier hosts tend to come
    /// first, availability-marked hosts keep priority over unavailable ones.
    fn shuffled_readers(readers: Vec<Arc<HostInfo>>) -> Vec<Arc<HostInfo>> {
        let mut rng = rand::thread_rng();
        let mut keyed: Vec<(f64, bool, Arc<HostInfo>)> = readers
            .into_iter()
            .map(|host| {
                let draw: f64 = rng.gen_range(f64::EPSILON..1.0);
                let key = -draw.ln() / host.weight().max(1) as f64;
                let unavailable = host.availability() == HostAvailability::NotAvailable;
                (key, unavailable, host)
            })
            .collect();
        keyed.sort_by(|a, b| {
            a.1.cmp(&b.1)
                .then(a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
        });
        keyed.into_iter().map(|(_, _, host)| host).collect()
    }

    async fn try_candidate(
        &self,
        candidate: &Arc<HostInfo>,
        attempt_timeout: Duration,
        props: &Properties,
    ) -> Option<Arc<dyn WireConnection>> {
        let attempt = tokio::time::timeout(attempt_timeout, self.service.connect(candidate, props)).await;
        match attempt {
            Ok(Ok(conn)) => Some(conn),
            Ok(Err(e)) => {
                warn!("Candidate {} rejected the connection: {e}", candidate.url());
                None
            }
            Err(_) => {
                warn!(
                    "Candidate {} did not answer within {attempt_timeout:?}",
                    candidate.url()
                );
                None
            }
        }
    }

    async fn confirm_role(&self, conn: &Arc<dyn WireConnection>, expected: HostRole) -> bool {
        match self.service.dialect().host_role(conn.as_ref()).await {
            Ok(role) => role == expected,
            Err(_) => false,
        }
    }

    /// Swaps the session onto the recovered target: availability, the swap
    /// itself, and session state replay.
    async fn adopt(&self, conn: Arc<dyn WireConnection>, host: Arc<HostInfo>) -> Result<()> {
        host.set_availability(HostAvailability::Available);
        self.service.set_availability(&[host.url()], HostAvailability::Available);
        if let Err(e) = self.service.replay_session_state(conn.as_ref()).await {
            warn!("Session state replay on {} failed: {e}", host.url());
        }
        self.service
            .set_current_client(TargetClient::new(conn, host))
            .await
    }
}

#[async_trait]
impl ConnectionPlugin for FailoverPlugin {
    fn name(&self) -> &'static str {
        "failover"
    }

    fn subscriptions(&self) -> Subscriptions {
        Subscriptions::All
    }

    async fn execute(&self, op: &SqlOperation, next: ExecuteChain<'_>) -> Result<OperationResult> {
        if !self.enabled {
            return next.run(op).await;
        }
        match next.run(op).await {
            Err(e) if e.is_network() && Self::triggers_failover(op) => {
                Err(self.failover_and_raise(e).await)
            }
            other => other,
        }
    }

    async fn init_host_provider(
        &self,
        props: &Properties,
        init: &HostProviderInit,
        next: InitChain<'_>,
    ) -> Result<()> {
        if self.enabled {
            init.require_topology_aware();
        }
        next.run(props, init).await
    }
}
