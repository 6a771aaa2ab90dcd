// src/core/topology/cluster_provider.rs

//! The cluster-aware host list provider: discovers topology through the
//! active dialect, shares snapshots process-wide per cluster id, coalesces
//! concurrent refreshes, and elects a single writer per snapshot.

use super::static_provider::hashed_cluster_id;
use super::{HostListProvider, diff_topology, rds};
use crate::config::{Properties, options};
use crate::core::dialect::TopologyRow;
use crate::core::driver::WireConnection;
use crate::core::errors::{DroverError, Result};
use crate::core::host::{HostAvailability, HostInfo, HostRole, Topology};
use crate::core::plugin::service::PluginService;
use crate::core::registry::DriverRegistry;
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub struct ClusterTopologyProvider {
    service: Weak<PluginService>,
    registry: Arc<DriverRegistry>,
    props: Properties,
    initial_host: Arc<HostInfo>,
    initial_url_type: rds::RdsUrlType,
    instance_template: Option<String>,
    cluster_id: String,
}

impl ClusterTopologyProvider {
    pub fn new(
        service: Weak<PluginService>,
        registry: Arc<DriverRegistry>,
        props: &Properties,
        initial_host: Arc<HostInfo>,
    ) -> Self {
        let endpoint = initial_host.host().to_string();
        let initial_url_type = rds::analyze(&endpoint);

        let configured_id = props.get_string(options::CLUSTER_ID);
        let canonical = configured_id
            .clone()
            .or_else(|| registry.suggested_cluster_id(&initial_host.url()))
            .or_else(|| rds::cluster_id_from_host(&endpoint));
        let cluster_id = match &canonical {
            Some(id) => {
                // A canonical id lets sibling connections through other
                // endpoints of the same cluster share our cache slot.
                registry.suggest_cluster_id(&initial_host.url(), id);
                id.clone()
            }
            None => hashed_cluster_id(&initial_host.url()),
        };

        let instance_template = props
            .get_string(options::CLUSTER_INSTANCE_HOST_PATTERN)
            .or_else(|| rds::instance_template_from_host(&endpoint));

        debug!(
            "Cluster topology provider initialized for '{cluster_id}' (endpoint {endpoint})"
        );

        Self {
            service,
            registry,
            props: props.clone(),
            initial_host,
            initial_url_type,
            instance_template,
            cluster_id,
        }
    }

    fn service(&self) -> Result<Arc<PluginService>> {
        self.service
            .upgrade()
            .ok_or_else(|| DroverError::Internal("Plugin service is gone".to_string()))
    }

    /// Queries, elects the writer, publishes, and notifies. At most one query
    /// per cluster id is in flight: concurrent callers wait on the refresh
    /// guard and adopt the snapshot published by whoever held it.
    async fn load(&self, conn: Option<Arc<dyn WireConnection>>) -> Result<Arc<Topology>> {
        let requested_at = Instant::now();
        let guard = self.registry.refresh_guard(&self.cluster_id);
        let _held = guard.lock().await;

        if let Some(snapshot) = self
            .registry
            .topology_refreshed_since(&self.cluster_id, requested_at)
        {
            return Ok(snapshot);
        }

        let service = self.service()?;
        let dialect = service.dialect();

        let snapshot = if dialect.supports_topology_discovery() {
            let rows = self.query_rows(&service, conn).await?;
            self.build_snapshot(rows)
        } else {
            // The dialect cannot see the cluster (yet); fall back to the
            // configured endpoint until a dialect update reveals more.
            Arc::new(Topology::new(vec![self.initial_host.clone()]))
        };

        let previous = self.registry.any_cached_topology(&self.cluster_id);
        if let Some(previous) = &previous {
            for host in snapshot.hosts() {
                if let Some(known) = previous
                    .hosts()
                    .iter()
                    .find(|h| h.as_ref() == host.as_ref())
                {
                    host.set_availability(known.availability());
                }
            }
        }

        let replaced = self
            .registry
            .publish_topology(&self.cluster_id, snapshot.clone());
        for host in snapshot.hosts() {
            self.registry.suggest_cluster_id(&host.url(), &self.cluster_id);
        }

        if let Some(old) = replaced {
            let changes = diff_topology(&old, &snapshot);
            if !changes.is_empty() {
                info!(
                    "Topology for '{}' changed: {} host(s) affected",
                    self.cluster_id,
                    changes.len()
                );
                service.notify_node_list_changed(&changes).await;
            }
        }

        Ok(snapshot)
    }

    /// Queries topology rows over the supplied connection, the current
    /// client, or (when both are gone, as during failover) a temporary
    /// connection to any host the last snapshot knew about.
    async fn query_rows(
        &self,
        service: &Arc<PluginService>,
        conn: Option<Arc<dyn WireConnection>>,
    ) -> Result<Vec<TopologyRow>> {
        let dialect = service.dialect();

        let mut last_error: Option<DroverError> = None;
        if let Some(conn) = conn.or_else(|| service.current_connection()) {
            match dialect.query_for_topology(conn.as_ref()).await {
                Ok(rows) => return Ok(rows),
                Err(e) => {
                    debug!("Topology query over the session connection failed: {e}");
                    last_error = Some(e);
                }
            }
        }

        let mut probes: Vec<Arc<HostInfo>> = self
            .registry
            .any_cached_topology(&self.cluster_id)
            .map(|t| t.hosts().to_vec())
            .unwrap_or_default();
        if probes.is_empty() {
            probes.push(self.initial_host.clone());
        }

        for host in probes {
            match service.force_connect(&host, &self.props).await {
                Ok(probe) => {
                    let result = dialect.query_for_topology(probe.as_ref()).await;
                    probe.close().await;
                    match result {
                        Ok(rows) => return Ok(rows),
                        Err(e) => last_error = Some(e),
                    }
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            DroverError::Internal("No connection available for topology refresh".to_string())
        }))
    }

    fn build_snapshot(&self, rows: Vec<TopologyRow>) -> Arc<Topology> {
        if rows.is_empty() {
            warn!(
                "Topology query for '{}' returned no rows; keeping the configured endpoint",
                self.cluster_id
            );
            return Arc::new(Topology::new(vec![self.initial_host.clone()]));
        }

        let mut hosts: Vec<HostInfo> = rows
            .into_iter()
            .map(|row| {
                let endpoint = row
                    .endpoint
                    .clone()
                    .or_else(|| {
                        self.instance_template
                            .as_ref()
                            .map(|t| rds::expand_instance_template(t, &row.host_id))
                    })
                    .unwrap_or_else(|| row.host_id.clone());
                let port = row.port.unwrap_or_else(|| self.initial_host.port());
                let role = if row.is_writer {
                    HostRole::Writer
                } else {
                    HostRole::Reader
                };
                let mut host = HostInfo::new(endpoint, port, role);
                if let Some(weight) = row.weight {
                    host = host.with_weight(weight);
                }
                if let Some(at) = row.last_update {
                    host = host.with_last_update(at);
                }
                let host = host.with_host_id(row.host_id.clone());
                host.add_alias(row.host_id);
                host
            })
            .collect();

        // Writer election: when discovery reports more than one writer, the
        // row with the most recent last-update wins and stale writers are
        // demoted to readers in the published snapshot.
        let writer_indices: Vec<usize> = hosts
            .iter()
            .enumerate()
            .filter(|(_, h)| h.role() == HostRole::Writer)
            .map(|(i, _)| i)
            .collect();
        if writer_indices.len() > 1 {
            let elected = writer_indices
                .iter()
                .copied()
                .max_by_key(|i| hosts[*i].last_update())
                .unwrap_or(writer_indices[0]);
            warn!(
                "Topology for '{}' reported {} writers; electing {}",
                self.cluster_id,
                writer_indices.len(),
                hosts[elected].url()
            );
            for idx in writer_indices {
                if idx != elected {
                    let demoted = hosts[idx].clone_with_role(HostRole::Reader);
                    hosts[idx] = demoted;
                }
            }
        }

        Arc::new(Topology::new(hosts.into_iter().map(Arc::new).collect()))
    }
}

#[async_trait]
impl HostListProvider for ClusterTopologyProvider {
    fn cluster_id(&self) -> String {
        self.cluster_id.clone()
    }

    fn cached(&self) -> Option<Arc<Topology>> {
        self.registry.any_cached_topology(&self.cluster_id)
    }

    async fn refresh(&self, conn: Option<Arc<dyn WireConnection>>) -> Result<Arc<Topology>> {
        let ttl = self.props.topology_refresh_rate();
        if let Some(snapshot) = self.registry.cached_topology(&self.cluster_id, ttl) {
            return Ok(snapshot);
        }
        self.load(conn).await
    }

    async fn force_refresh(&self, conn: Option<Arc<dyn WireConnection>>) -> Result<Arc<Topology>> {
        self.load(conn).await
    }

    async fn identify_connection(
        &self,
        conn: &Arc<dyn WireConnection>,
    ) -> Result<Arc<HostInfo>> {
        let service = self.service()?;
        let dialect = service.dialect();
        let instance_id = dialect.identify_connection(conn.as_ref()).await?;

        let snapshot = self.refresh(Some(conn.clone())).await?;
        if let Some(host) = snapshot.find(&instance_id) {
            // A reader cluster endpoint resolving to the writer means DNS and
            // topology disagree; force a re-query on next use.
            if self.initial_url_type == rds::RdsUrlType::ClusterReader
                && host.role() == HostRole::Writer
            {
                warn!(
                    "Reader cluster endpoint resolved to writer {}; marking topology stale",
                    host.url()
                );
                self.registry.mark_topology_stale(&self.cluster_id);
            }
            return Ok(host.clone());
        }

        // Unknown to the snapshot: template an endpoint for it.
        let endpoint = self
            .instance_template
            .as_ref()
            .map(|t| rds::expand_instance_template(t, &instance_id))
            .unwrap_or_else(|| instance_id.clone());
        let host = HostInfo::new(endpoint, self.initial_host.port(), HostRole::Unknown)
            .with_host_id(instance_id.clone());
        host.add_alias(instance_id);
        host.set_availability(HostAvailability::Available);
        Ok(Arc::new(host))
    }
}
