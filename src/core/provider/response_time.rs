// src/core/provider/response_time.rs

//! Background response-time tracking for the `fastestResponse` selector:
//! one lazily spawned task per host keeps an exponentially weighted moving
//! average of ping latency.

use crate::config::Properties;
use crate::core::driver::{DriverDialect, WireConnection};
use crate::core::host::HostInfo;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::time::Instant;
use tracing::debug;

/// EWMA blend: 70% history, 30% newest sample.
const EWMA_OLD_NUM: u64 = 7;
const EWMA_NEW_NUM: u64 = 3;
const EWMA_DEN: u64 = 10;

#[derive(Default)]
pub struct ResponseTracker {
    ewma_micros: AtomicU64,
    samples: AtomicU64,
    stopped: AtomicBool,
}

impl ResponseTracker {
    fn record(&self, sample_micros: u64) {
        let seen = self.samples.fetch_add(1, Ordering::AcqRel);
        let updated = if seen == 0 {
            sample_micros
        } else {
            let old = self.ewma_micros.load(Ordering::Acquire);
            (old * EWMA_OLD_NUM + sample_micros * EWMA_NEW_NUM) / EWMA_DEN
        };
        self.ewma_micros.store(updated, Ordering::Release);
    }

    /// Forgets history after a failed probe so the host reads as cold.
    fn reset(&self) {
        self.samples.store(0, Ordering::Release);
        self.ewma_micros.store(0, Ordering::Release);
    }

    pub fn sample_micros(&self) -> Option<u64> {
        if self.samples.load(Ordering::Acquire) == 0 {
            None
        } else {
            Some(self.ewma_micros.load(Ordering::Acquire))
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// All per-host response trackers, keyed by host url.
#[derive(Default)]
pub struct ResponseTimeRegistry {
    trackers: DashMap<String, Arc<ResponseTracker>>,
}

impl ResponseTimeRegistry {
    /// Starts a probe task for the host if one is not already running.
    /// Creation is idempotent: the probe task is spawned only by the caller
    /// whose entry was actually vacant.
    pub fn ensure_monitoring(
        &self,
        driver: Arc<dyn DriverDialect>,
        host: Arc<HostInfo>,
        props: &Properties,
    ) {
        let url = host.url();
        let mut created: Option<Arc<ResponseTracker>> = None;
        self.trackers.entry(url.clone()).or_insert_with(|| {
            let tracker = Arc::new(ResponseTracker::default());
            created = Some(tracker.clone());
            tracker
        });
        let Some(tracker) = created else {
            return;
        };

        let interval = props.response_measurement_interval();
        let probe_props = props.monitoring_properties();
        tokio::spawn(async move {
            debug!("Response time monitoring started for {url}");
            let mut conn: Option<Arc<dyn WireConnection>> = None;
            loop {
                if tracker.is_stopped() {
                    break;
                }
                let started = Instant::now();
                let healthy = match &conn {
                    Some(active) => active.ping().await.is_ok(),
                    None => match driver.connect(&host, &probe_props).await {
                        Ok(opened) => {
                            conn = Some(opened);
                            true
                        }
                        Err(_) => false,
                    },
                };
                if healthy {
                    tracker.record(started.elapsed().as_micros() as u64);
                } else {
                    tracker.reset();
                    if let Some(dead) = conn.take() {
                        dead.close().await;
                    }
                }
                tokio::time::sleep(interval).await;
            }
            if let Some(active) = conn.take() {
                active.close().await;
            }
            debug!("Response time monitoring stopped for {url}");
        });
    }

    pub fn sample_micros(&self, url: &str) -> Option<u64> {
        self.trackers.get(url).and_then(|t| t.sample_micros())
    }

    pub fn clear(&self) {
        for entry in self.trackers.iter() {
            entry.value().stopped.store(true, Ordering::Release);
        }
        self.trackers.clear();
    }
}
