// src/core/topology/static_provider.rs

//! The static host list provider: hosts come from configuration and never
//! change.

use super::HostListProvider;
use crate::config::{Properties, options};
use crate::core::driver::WireConnection;
use crate::core::errors::{DroverError, Result};
use crate::core::host::{HostInfo, HostRole, Topology};
use async_trait::async_trait;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Derives a deterministic cluster id from a connection url when no better
/// identity is configured or discoverable.
pub fn hashed_cluster_id(url: &str) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    url.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

pub struct StaticHostListProvider {
    cluster_id: String,
    snapshot: Arc<Topology>,
}

impl StaticHostListProvider {
    pub fn from_properties(props: &Properties, default_port: u16) -> Result<Self> {
        let host = props.require_string(options::HOST)?;
        let port = props.get_u16(options::PORT)?.unwrap_or(default_port);
        let host_info = Arc::new(HostInfo::new(host, port, HostRole::Writer));
        let cluster_id = props
            .get_string(options::CLUSTER_ID)
            .unwrap_or_else(|| hashed_cluster_id(&host_info.url()));
        Ok(Self {
            cluster_id,
            snapshot: Arc::new(Topology::new(vec![host_info])),
        })
    }

    pub fn from_connection_string(raw: &str, default_port: u16) -> Result<Self> {
        let props = Properties::from_connection_string(raw)?;
        Self::from_properties(&props, default_port)
    }
}

#[async_trait]
impl HostListProvider for StaticHostListProvider {
    fn cluster_id(&self) -> String {
        self.cluster_id.clone()
    }

    fn is_static(&self) -> bool {
        true
    }

    fn cached(&self) -> Option<Arc<Topology>> {
        Some(self.snapshot.clone())
    }

    async fn refresh(&self, _conn: Option<Arc<dyn WireConnection>>) -> Result<Arc<Topology>> {
        Ok(self.snapshot.clone())
    }

    async fn force_refresh(&self, _conn: Option<Arc<dyn WireConnection>>) -> Result<Arc<Topology>> {
        Ok(self.snapshot.clone())
    }

    async fn identify_connection(
        &self,
        _conn: &Arc<dyn WireConnection>,
    ) -> Result<Arc<HostInfo>> {
        self.snapshot
            .hosts()
            .first()
            .cloned()
            .ok_or_else(|| DroverError::Internal("Static host list is empty".to_string()))
    }
}
