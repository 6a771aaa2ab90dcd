// src/core/topology/mod.rs

//! Host list providers: how the wrapper learns which instances exist, which
//! one writes, and how snapshots are cached and shared across sessions.

pub mod cluster_provider;
pub mod rds;
pub mod static_provider;

use crate::core::driver::WireConnection;
use crate::core::errors::Result;
use crate::core::host::{HostInfo, HostRole, Topology};
use async_trait::async_trait;
use bitflags::bitflags;
use std::collections::HashMap;
use std::sync::Arc;

bitflags! {
    /// What changed for one host between two topology snapshots.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NodeChanges: u8 {
        const ADDED              = 1 << 0;
        const REMOVED            = 1 << 1;
        const PROMOTED_TO_WRITER = 1 << 2;
        const PROMOTED_TO_READER = 1 << 3;
    }
}

/// A source of topology snapshots for one logical cluster.
#[async_trait]
pub trait HostListProvider: Send + Sync {
    /// The cache key shared by every connection into the same cluster.
    fn cluster_id(&self) -> String;

    /// True when the host list is fixed by configuration and never refreshed.
    fn is_static(&self) -> bool {
        false
    }

    /// The last published snapshot, if any, without triggering a refresh.
    fn cached(&self) -> Option<Arc<Topology>>;

    /// Returns the current snapshot, re-querying only when the cached one has
    /// outlived the refresh rate.
    async fn refresh(&self, conn: Option<Arc<dyn WireConnection>>) -> Result<Arc<Topology>>;

    /// Re-queries unconditionally, bypassing the cache TTL.
    async fn force_refresh(&self, conn: Option<Arc<dyn WireConnection>>) -> Result<Arc<Topology>>;

    /// Resolves the instance a live connection is actually talking to.
    async fn identify_connection(&self, conn: &Arc<dyn WireConnection>) -> Result<Arc<HostInfo>>;
}

/// Computes the per-host difference between two snapshots, keyed by host url.
pub fn diff_topology(
    old: &Topology,
    new: &Topology,
) -> HashMap<String, NodeChanges> {
    let mut changes: HashMap<String, NodeChanges> = HashMap::new();

    for host in old.hosts() {
        match new.hosts().iter().find(|h| **h == *host) {
            None => {
                changes.insert(host.url(), NodeChanges::REMOVED);
            }
            Some(updated) => {
                let mut delta = NodeChanges::empty();
                if host.role() != HostRole::Writer && updated.role() == HostRole::Writer {
                    delta |= NodeChanges::PROMOTED_TO_WRITER;
                }
                if host.role() == HostRole::Writer && updated.role() == HostRole::Reader {
                    delta |= NodeChanges::PROMOTED_TO_READER;
                }
                if !delta.is_empty() {
                    changes.insert(host.url(), delta);
                }
            }
        }
    }
    for host in new.hosts() {
        if !old.hosts().iter().any(|h| *h == *host) {
            changes.insert(host.url(), NodeChanges::ADDED);
        }
    }
    changes
}
