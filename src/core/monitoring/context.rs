// src/core/monitoring/context.rs

//! The per-call monitoring context: tracks consecutive ping failures for one
//! in-flight operation and aborts the user's connection when the host is
//! declared unhealthy.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Callback that forcibly severs the monitored user connection.
pub type AbortCallback = Box<dyn Fn() + Send + Sync>;

pub struct MonitorContext {
    grace: Duration,
    interval: Duration,
    failure_threshold: u32,
    start: Instant,
    active: AtomicBool,
    failure_count: AtomicU32,
    invalid_since: Mutex<Option<Instant>>,
    node_unhealthy: AtomicBool,
    abort: AbortCallback,
}

impl MonitorContext {
    pub fn new(
        grace: Duration,
        interval: Duration,
        failure_threshold: u32,
        abort: AbortCallback,
    ) -> Self {
        Self {
            grace,
            interval,
            failure_threshold: failure_threshold.max(1),
            start: Instant::now(),
            active: AtomicBool::new(true),
            failure_count: AtomicU32::new(0),
            invalid_since: Mutex::new(None),
            node_unhealthy: AtomicBool::new(false),
            abort,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn started_at(&self) -> Instant {
        self.start
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Marks the wrapped call as returned; the monitor prunes the context on
    /// its next tick.
    pub fn set_inactive(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn is_node_unhealthy(&self) -> bool {
        self.node_unhealthy.load(Ordering::Acquire)
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Acquire)
    }

    /// Records the outcome of one connection check. A valid check resets the
    /// failure window; an invalid one extends it. The host is declared
    /// unhealthy (and the user connection aborted) once the failure count
    /// reaches the threshold and the window of consecutive failures, counted
    /// from the first failed check, spans at least the grace period.
    pub fn update_connection_status(
        &self,
        check_start: Instant,
        check_end: Instant,
        is_valid: bool,
    ) {
        if !self.is_active() {
            return;
        }
        if is_valid {
            self.failure_count.store(0, Ordering::Release);
            *self.invalid_since.lock() = None;
            return;
        }

        let invalid_since = {
            let mut slot = self.invalid_since.lock();
            *slot.get_or_insert(check_start)
        };
        let count = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        let window = check_end.saturating_duration_since(invalid_since);

        if count >= self.failure_threshold
            && window >= self.grace
            && !self.node_unhealthy.swap(true, Ordering::AcqRel)
        {
            warn!(
                "Host declared unhealthy after {count} consecutive failed checks over {window:?}; \
                 aborting the monitored connection"
            );
            (self.abort)();
        }
    }
}
