// src/core/provider/pool.rs

//! The keyed internal connection pool: idle wire connections parked per
//! `host:port` + user, reused by subsequent connects to the same instance.

use crate::config::{Properties, options};
use crate::core::driver::WireConnection;
use crate::core::host::HostInfo;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub url: String,
    pub user: String,
}

impl PoolKey {
    pub fn for_host(host: &HostInfo, props: &Properties) -> Self {
        Self {
            url: host.url(),
            user: props.string_or(options::USER, ""),
        }
    }
}

#[derive(Default)]
struct HostPool {
    idle: Mutex<VecDeque<Arc<dyn WireConnection>>>,
}

/// All internal pools, keyed per host and user.
#[derive(Default)]
pub struct PoolRegistry {
    pools: DashMap<PoolKey, Arc<HostPool>>,
}

impl PoolRegistry {
    /// Pops an idle, still-open connection for the host, if any.
    pub fn acquire(&self, host: &HostInfo, props: &Properties) -> Option<Arc<dyn WireConnection>> {
        let key = PoolKey::for_host(host, props);
        let pool = self.pools.get(&key)?.clone();
        let mut idle = pool.idle.lock();
        while let Some(conn) = idle.pop_front() {
            if conn.is_open() {
                debug!("Reusing pooled connection for {}", key.url);
                return Some(conn);
            }
        }
        None
    }

    /// Parks a connection for reuse. Returns false when the pool is at
    /// capacity, in which case the caller keeps ownership.
    pub fn release(
        &self,
        host: &HostInfo,
        props: &Properties,
        conn: Arc<dyn WireConnection>,
        max_idle: usize,
    ) -> bool {
        let key = PoolKey::for_host(host, props);
        let pool = self.pools.entry(key).or_default().clone();
        let mut idle = pool.idle.lock();
        if idle.len() >= max_idle {
            return false;
        }
        idle.push_back(conn);
        true
    }

    /// The number of idle connections parked for a host, for introspection.
    pub fn idle_count(&self, host: &HostInfo, props: &Properties) -> usize {
        let key = PoolKey::for_host(host, props);
        self.pools
            .get(&key)
            .map(|pool| pool.idle.lock().len())
            .unwrap_or(0)
    }

    /// Closes and forgets every pooled connection.
    pub async fn clear(&self) {
        let mut drained: Vec<Arc<dyn WireConnection>> = Vec::new();
        for entry in self.pools.iter() {
            drained.extend(entry.value().idle.lock().drain(..));
        }
        self.pools.clear();
        for conn in drained {
            conn.close().await;
        }
    }
}
