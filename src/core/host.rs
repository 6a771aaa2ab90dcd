// src/core/host.rs

//! The host model: instance identity, role, availability, and the immutable
//! topology snapshots published by the host list providers.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use strum_macros::{Display, EnumString};

/// The default selection weight for a host that reports none.
pub const DEFAULT_WEIGHT: u64 = 100;

/// The role of an instance within a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum HostRole {
    Writer,
    Reader,
    Unknown,
}

/// Advisory availability of a host. Selectors prefer `Available` hosts but
/// widen to `NotAvailable` ones when nothing else remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum HostAvailability {
    Available,
    NotAvailable,
}

impl HostAvailability {
    fn as_u8(self) -> u8 {
        match self {
            HostAvailability::Available => 0,
            HostAvailability::NotAvailable => 1,
        }
    }

    fn from_u8(raw: u8) -> Self {
        if raw == 0 {
            HostAvailability::Available
        } else {
            HostAvailability::NotAvailable
        }
    }
}

/// A single routable database instance endpoint.
///
/// Identity (and therefore equality and hashing) is `host:port`. Role, weight,
/// and the last-update timestamp are fixed when the snapshot containing this
/// host is published; availability and the alias set are runtime facts that
/// may change while a snapshot is live.
#[derive(Debug)]
pub struct HostInfo {
    host: String,
    port: u16,
    role: HostRole,
    availability: AtomicU8,
    weight: u64,
    last_update: Option<DateTime<Utc>>,
    host_id: Option<String>,
    aliases: RwLock<HashSet<String>>,
}

impl HostInfo {
    pub fn new(host: impl Into<String>, port: u16, role: HostRole) -> Self {
        Self {
            host: host.into(),
            port,
            role,
            availability: AtomicU8::new(HostAvailability::Available.as_u8()),
            weight: DEFAULT_WEIGHT,
            last_update: None,
            host_id: None,
            aliases: RwLock::new(HashSet::new()),
        }
    }

    pub fn with_weight(mut self, weight: u64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_host_id(mut self, host_id: impl Into<String>) -> Self {
        self.host_id = Some(host_id.into());
        self
    }

    pub fn with_last_update(mut self, at: DateTime<Utc>) -> Self {
        self.last_update = Some(at);
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn role(&self) -> HostRole {
        self.role
    }

    pub fn weight(&self) -> u64 {
        self.weight
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    /// The instance name reported by the server, if discovery has run.
    pub fn host_id(&self) -> Option<&str> {
        self.host_id.as_deref()
    }

    /// The canonical `host:port` identity string.
    pub fn url(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn availability(&self) -> HostAvailability {
        HostAvailability::from_u8(self.availability.load(Ordering::Acquire))
    }

    pub fn set_availability(&self, availability: HostAvailability) {
        self.availability
            .store(availability.as_u8(), Ordering::Release);
    }

    /// Registers an additional name this host answers to (instance id,
    /// alternate endpoint, instance-pattern expansion).
    pub fn add_alias(&self, alias: impl Into<String>) {
        self.aliases.write().insert(alias.into());
    }

    pub fn aliases(&self) -> HashSet<String> {
        self.aliases.read().clone()
    }

    /// True when `name` matches the endpoint, the `host:port` url, the
    /// instance id, or any registered alias.
    pub fn matches_alias(&self, name: &str) -> bool {
        if name == self.host || name == self.url() {
            return true;
        }
        if self.host_id.as_deref() == Some(name) {
            return true;
        }
        self.aliases.read().contains(name)
    }

    /// Copies a host with a different role, preserving identity and runtime
    /// facts. Used by writer election to downgrade stale writers.
    pub fn clone_with_role(&self, role: HostRole) -> Self {
        Self {
            host: self.host.clone(),
            port: self.port,
            role,
            availability: AtomicU8::new(self.availability.load(Ordering::Acquire)),
            weight: self.weight,
            last_update: self.last_update,
            host_id: self.host_id.clone(),
            aliases: RwLock::new(self.aliases.read().clone()),
        }
    }
}

impl Clone for HostInfo {
    fn clone(&self) -> Self {
        self.clone_with_role(self.role)
    }
}

impl PartialEq for HostInfo {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for HostInfo {}

impl Hash for HostInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl std::fmt::Display for HostInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} ({})", self.host, self.port, self.role)
    }
}

/// An immutable, ordered snapshot of the hosts known for one cluster.
///
/// Element `[0]` is the writer when one exists. Snapshots are published and
/// swapped as a whole (`Arc<Topology>`); readers observe either the old or
/// the new snapshot, never a partial blend.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    hosts: Vec<Arc<HostInfo>>,
}

impl Topology {
    /// Builds a snapshot, moving the writer (if any) to the front.
    pub fn new(mut hosts: Vec<Arc<HostInfo>>) -> Self {
        if let Some(idx) = hosts.iter().position(|h| h.role() == HostRole::Writer) {
            hosts.swap(0, idx);
        }
        Self { hosts }
    }

    pub fn hosts(&self) -> &[Arc<HostInfo>] {
        &self.hosts
    }

    pub fn writer(&self) -> Option<&Arc<HostInfo>> {
        self.hosts.first().filter(|h| h.role() == HostRole::Writer)
    }

    pub fn readers(&self) -> impl Iterator<Item = &Arc<HostInfo>> {
        self.hosts.iter().filter(|h| h.role() == HostRole::Reader)
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Finds a host by endpoint, url, instance id, or alias.
    pub fn find(&self, name: &str) -> Option<&Arc<HostInfo>> {
        self.hosts.iter().find(|h| h.matches_alias(name))
    }

    /// Hosts filtered by role.
    pub fn by_role(&self, role: HostRole) -> Vec<Arc<HostInfo>> {
        self.hosts
            .iter()
            .filter(|h| h.role() == role)
            .cloned()
            .collect()
    }
}
