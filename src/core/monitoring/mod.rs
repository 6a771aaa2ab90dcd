// src/core/monitoring/mod.rs

//! Enhanced failure monitoring: per-host background monitors that watch a
//! dedicated monitoring connection and abort stuck user calls when their
//! host stops responding.

pub mod context;
pub mod monitor;

pub use context::MonitorContext;
pub use monitor::{MIN_CONNECTION_CHECK_TIMEOUT, Monitor, SLEEP_WHEN_INACTIVE};

use crate::config::Properties;
use crate::core::host::HostInfo;
use crate::core::plugin::service::PluginService;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::Duration;

/// The shared monitor registry: one monitor per host id, created lazily and
/// replaced when a prior monitor has self-terminated.
#[derive(Default)]
pub struct MonitorService {
    monitors: DashMap<String, Arc<Monitor>>,
}

impl MonitorService {
    fn key_for(host: &HostInfo) -> String {
        host.host_id().map(str::to_string).unwrap_or_else(|| host.url())
    }

    /// Returns the running monitor for a host, spawning one if needed.
    /// Creation is idempotent under concurrency.
    pub fn monitor_for(
        &self,
        service: &Arc<PluginService>,
        host: &Arc<HostInfo>,
        monitoring_props: &Properties,
        disposal_time: Duration,
    ) -> Arc<Monitor> {
        let key = Self::key_for(host);
        match self.monitors.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_stopped() {
                    let fresh = Self::build(service, host, monitoring_props, disposal_time);
                    occupied.insert(fresh.clone());
                    fresh
                } else {
                    occupied.get().clone()
                }
            }
            Entry::Vacant(vacant) => {
                let fresh = Self::build(service, host, monitoring_props, disposal_time);
                vacant.insert(fresh.clone());
                fresh
            }
        }
    }

    fn build(
        service: &Arc<PluginService>,
        host: &Arc<HostInfo>,
        monitoring_props: &Properties,
        disposal_time: Duration,
    ) -> Arc<Monitor> {
        let monitor = Arc::new(Monitor::new(
            Arc::downgrade(service),
            host.clone(),
            monitoring_props.clone(),
            disposal_time,
        ));
        tokio::spawn(monitor.clone().run());
        monitor
    }

    pub fn active_count(&self) -> usize {
        self.monitors.iter().filter(|m| !m.is_stopped()).count()
    }

    pub fn stop_all(&self) {
        for entry in self.monitors.iter() {
            entry.value().stop();
        }
        self.monitors.clear();
    }
}
