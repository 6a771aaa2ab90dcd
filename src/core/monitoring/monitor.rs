// src/core/monitoring/monitor.rs

//! The per-host monitor: a single background task that pings its host over a
//! dedicated monitoring connection and feeds the outcome to every active
//! context.

use super::context::MonitorContext;
use crate::config::Properties;
use crate::core::driver::WireConnection;
use crate::core::host::HostInfo;
use crate::core::plugin::service::PluginService;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Poll cadence while no context is active yet.
pub const SLEEP_WHEN_INACTIVE: Duration = Duration::from_millis(100);

/// Lower bound on how long a single connection check may take.
pub const MIN_CONNECTION_CHECK_TIMEOUT: Duration = Duration::from_secs(3);

pub struct Monitor {
    host: Arc<HostInfo>,
    monitoring_props: Properties,
    service: Weak<PluginService>,
    new_contexts: Mutex<VecDeque<Arc<MonitorContext>>>,
    active_contexts: Mutex<VecDeque<Arc<MonitorContext>>>,
    disposal_time: Duration,
    stopped: AtomicBool,
}

impl Monitor {
    pub fn new(
        service: Weak<PluginService>,
        host: Arc<HostInfo>,
        monitoring_props: Properties,
        disposal_time: Duration,
    ) -> Self {
        Self {
            host,
            monitoring_props,
            service,
            new_contexts: Mutex::new(VecDeque::new()),
            active_contexts: Mutex::new(VecDeque::new()),
            disposal_time,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn host(&self) -> &Arc<HostInfo> {
        &self.host
    }

    pub fn start_monitoring(&self, context: Arc<MonitorContext>) {
        self.new_contexts.lock().push_back(context);
    }

    pub fn stop_monitoring(&self, context: &Arc<MonitorContext>) {
        context.set_inactive();
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// The monitor loop. Runs until explicitly stopped or until it has been
    /// idle longer than the disposal time.
    pub async fn run(self: Arc<Self>) {
        debug!("Monitor started for {}", self.host.url());
        let mut monitoring_conn: Option<Arc<dyn WireConnection>> = None;
        let mut idle_since = Instant::now();

        loop {
            if self.is_stopped() {
                break;
            }

            self.promote_new_contexts();

            let active: Vec<Arc<MonitorContext>> = {
                let mut queue = self.active_contexts.lock();
                queue.retain(|c| c.is_active() && !c.is_node_unhealthy());
                queue.iter().cloned().collect()
            };

            if active.is_empty() {
                let has_pending = !self.new_contexts.lock().is_empty();
                if !has_pending && idle_since.elapsed() >= self.disposal_time {
                    debug!(
                        "Monitor for {} idle past disposal time; terminating",
                        self.host.url()
                    );
                    break;
                }
                tokio::time::sleep(SLEEP_WHEN_INACTIVE).await;
                continue;
            }
            idle_since = Instant::now();

            let min_interval = active
                .iter()
                .map(|c| c.interval())
                .min()
                .unwrap_or(SLEEP_WHEN_INACTIVE);
            let check_timeout = min_interval.max(MIN_CONNECTION_CHECK_TIMEOUT);

            let check_start = Instant::now();
            let is_valid = self.check_connection(&mut monitoring_conn, check_timeout).await;
            let check_end = Instant::now();

            for context in &active {
                context.update_connection_status(check_start, check_end, is_valid);
            }

            let elapsed = check_end.saturating_duration_since(check_start);
            tokio::time::sleep(min_interval.saturating_sub(elapsed)).await;
        }

        if let Some(conn) = monitoring_conn.take() {
            conn.close().await;
        }
        self.stop();
        debug!("Monitor terminated for {}", self.host.url());
    }

    /// Moves freshly submitted contexts into the active queue. Checks start
    /// promptly; the grace period is enforced by the failure window inside
    /// each context, not by delaying activation.
    fn promote_new_contexts(&self) {
        let mut new_queue = self.new_contexts.lock();
        let mut active_queue = self.active_contexts.lock();
        while let Some(context) = new_queue.pop_front() {
            if context.is_active() {
                active_queue.push_back(context);
            }
        }
    }

    /// One connection check. The monitoring connection is opened lazily via
    /// `force_connect` (so monitoring never recurses into the monitoring
    /// plugin) and dropped after any failed check.
    async fn check_connection(
        &self,
        conn: &mut Option<Arc<dyn WireConnection>>,
        check_timeout: Duration,
    ) -> bool {
        match conn {
            None => {
                let Some(service) = self.service.upgrade() else {
                    return false;
                };
                let opened = tokio::time::timeout(
                    check_timeout,
                    service.force_connect(&self.host, &self.monitoring_props),
                )
                .await;
                match opened {
                    Ok(Ok(fresh)) => {
                        *conn = Some(fresh);
                        true
                    }
                    Ok(Err(e)) => {
                        warn!(
                            "Failed to open monitoring connection to {}: {e}",
                            self.host.url()
                        );
                        false
                    }
                    Err(_) => false,
                }
            }
            Some(active) => {
                let ping = tokio::time::timeout(check_timeout, active.ping()).await;
                match ping {
                    Ok(Ok(())) => true,
                    _ => {
                        if let Some(dead) = conn.take() {
                            dead.abort();
                        }
                        false
                    }
                }
            }
        }
    }
}
