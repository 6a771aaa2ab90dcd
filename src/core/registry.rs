// src/core/registry.rs

//! The long-lived registry of process-wide shared state: topology snapshots,
//! auth token and secret caches, host monitors, selector cursors, and the
//! internal connection pools. One registry is shared by every session whose
//! connections belong to the same process; plugin factories receive it
//! explicitly instead of reaching for globals.

use crate::core::host::Topology;
use crate::core::monitoring::MonitorService;
use crate::core::provider::pool::PoolRegistry;
use crate::core::provider::response_time::ResponseTimeRegistry;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;
use tokio::time::Instant;

/// Key of the IAM token cache. Federated auth shares this key space.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenCacheKey {
    pub region: String,
    pub host: String,
    pub port: u16,
    pub user: String,
}

/// A cached auth token. A token whose expiry has passed is treated as absent.
#[derive(Debug, Clone)]
pub struct CachedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretCacheKey {
    pub secret_id: String,
    pub region: String,
}

/// Database credentials fetched from a secrets service. No implicit TTL;
/// invalidated by authentication failure.
#[derive(Debug, Clone)]
pub struct DbSecret {
    pub username: String,
    pub password: String,
}

/// One published topology snapshot with its refresh stamp.
pub struct TopologyCacheEntry {
    pub snapshot: Arc<Topology>,
    pub refreshed_at: Instant,
    /// Set when discovery contradicted the endpoint's implied role; the next
    /// access must re-query regardless of TTL.
    pub stale: bool,
}

/// The shared registry. Cheap to clone via `Arc`.
#[derive(Default)]
pub struct DriverRegistry {
    topology: DashMap<String, TopologyCacheEntry>,
    refresh_guards: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    suggested_cluster_ids: DashMap<String, String>,
    pub iam_tokens: DashMap<TokenCacheKey, CachedToken>,
    pub secrets: DashMap<SecretCacheKey, DbSecret>,
    round_robin_cursors: DashMap<String, AtomicUsize>,
    pub monitors: MonitorService,
    pub pools: PoolRegistry,
    pub response_times: ResponseTimeRegistry,
}

impl DriverRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // --- Topology cache ---

    /// The cached snapshot for a cluster if it is fresh and not stale.
    pub fn cached_topology(&self, cluster_id: &str, ttl: Duration) -> Option<Arc<Topology>> {
        let entry = self.topology.get(cluster_id)?;
        if entry.stale || entry.refreshed_at.elapsed() > ttl {
            return None;
        }
        Some(entry.snapshot.clone())
    }

    /// The cached snapshot regardless of freshness.
    pub fn any_cached_topology(&self, cluster_id: &str) -> Option<Arc<Topology>> {
        self.topology.get(cluster_id).map(|e| e.snapshot.clone())
    }

    /// A snapshot published at or after `since`, used to coalesce concurrent
    /// refreshes: a caller that waited on the refresh guard takes the result
    /// of whoever held it.
    pub fn topology_refreshed_since(
        &self,
        cluster_id: &str,
        since: Instant,
    ) -> Option<Arc<Topology>> {
        let entry = self.topology.get(cluster_id)?;
        if entry.stale || entry.refreshed_at < since {
            return None;
        }
        Some(entry.snapshot.clone())
    }

    /// Publishes a snapshot, returning the one it replaced.
    pub fn publish_topology(
        &self,
        cluster_id: &str,
        snapshot: Arc<Topology>,
    ) -> Option<Arc<Topology>> {
        self.topology
            .insert(
                cluster_id.to_string(),
                TopologyCacheEntry {
                    snapshot,
                    refreshed_at: Instant::now(),
                    stale: false,
                },
            )
            .map(|old| old.snapshot)
    }

    pub fn mark_topology_stale(&self, cluster_id: &str) {
        if let Some(mut entry) = self.topology.get_mut(cluster_id) {
            entry.stale = true;
        }
    }

    /// The per-cluster lock that keeps at most one topology query in flight.
    pub fn refresh_guard(&self, cluster_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.refresh_guards
            .entry(cluster_id.to_string())
            .or_default()
            .clone()
    }

    // --- Suggested cluster id cache ---

    pub fn suggest_cluster_id(&self, endpoint: &str, cluster_id: &str) {
        self.suggested_cluster_ids
            .insert(endpoint.to_string(), cluster_id.to_string());
    }

    pub fn suggested_cluster_id(&self, endpoint: &str) -> Option<String> {
        self.suggested_cluster_ids
            .get(endpoint)
            .map(|entry| entry.value().clone())
    }

    // --- Selector cursors ---

    /// Advances the shared round-robin cursor for a cluster and returns the
    /// previous position.
    pub fn next_round_robin_index(&self, cluster_id: &str) -> usize {
        self.round_robin_cursors
            .entry(cluster_id.to_string())
            .or_default()
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    /// Drops every shared cache entry. Monitors are stopped, pooled
    /// connections discarded.
    pub async fn clear_caches(&self) {
        self.topology.clear();
        self.refresh_guards.clear();
        self.suggested_cluster_ids.clear();
        self.iam_tokens.clear();
        self.secrets.clear();
        self.round_robin_cursors.clear();
        self.monitors.stop_all();
        self.pools.clear().await;
        self.response_times.clear();
    }
}
