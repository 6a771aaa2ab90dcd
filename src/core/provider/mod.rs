// src/core/provider/mod.rs

//! The connection provider: strategy-based host selection and the terminal
//! act of opening a wire connection, with pooling and green-node fallback.

pub mod pool;
pub mod response_time;

use crate::config::Properties;
use crate::core::driver::{DriverDialect, WireConnection, WireError};
use crate::core::errors::{DroverError, Result};
use crate::core::host::{HostAvailability, HostInfo, HostRole, Topology};
use crate::core::registry::DriverRegistry;
use crate::core::topology::rds;
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info};

pub const STRATEGY_RANDOM: &str = "random";
pub const STRATEGY_ROUND_ROBIN: &str = "roundRobin";
pub const STRATEGY_WEIGHTED_RANDOM: &str = "weightedRandom";
pub const STRATEGY_FASTEST_RESPONSE: &str = "fastestResponse";

pub struct ConnectionProvider {
    driver: Arc<dyn DriverDialect>,
    registry: Arc<DriverRegistry>,
}

impl ConnectionProvider {
    pub fn new(driver: Arc<dyn DriverDialect>, registry: Arc<DriverRegistry>) -> Self {
        Self { driver, registry }
    }

    /// Whether a selection strategy name is known. The strategy set is
    /// closed.
    pub fn accepts_strategy(name: &str) -> bool {
        matches!(
            name,
            STRATEGY_RANDOM
                | STRATEGY_ROUND_ROBIN
                | STRATEGY_WEIGHTED_RANDOM
                | STRATEGY_FASTEST_RESPONSE
        )
    }

    /// Picks one host out of the snapshot for the requested role. Hosts
    /// marked unavailable are avoided, but availability is advisory: when
    /// every candidate is unavailable the filter widens rather than failing.
    pub fn select_host(
        &self,
        topology: &Topology,
        role: HostRole,
        strategy: &str,
        cluster_id: &str,
        props: &Properties,
    ) -> Result<Arc<HostInfo>> {
        if topology.is_empty() {
            return Err(DroverError::Internal(
                "Cannot select a host from an empty host list".to_string(),
            ));
        }

        let candidates: Vec<Arc<HostInfo>> = if role == HostRole::Unknown {
            topology.hosts().to_vec()
        } else {
            topology.by_role(role)
        };
        if candidates.is_empty() {
            return Err(DroverError::Internal(format!(
                "No hosts with role '{role}' in the current topology"
            )));
        }

        let available: Vec<Arc<HostInfo>> = candidates
            .iter()
            .filter(|h| h.availability() == HostAvailability::Available)
            .cloned()
            .collect();
        let pool = if available.is_empty() {
            debug!("All '{role}' candidates marked unavailable; widening selection");
            candidates
        } else {
            available
        };

        match strategy {
            STRATEGY_RANDOM => Ok(Self::pick_random(&pool)),
            STRATEGY_ROUND_ROBIN => {
                let mut sorted = pool;
                sorted.sort_by_key(|h| h.url());
                let index = self.registry.next_round_robin_index(cluster_id) % sorted.len();
                Ok(sorted[index].clone())
            }
            STRATEGY_WEIGHTED_RANDOM => {
                let total: u64 = pool.iter().map(|h| h.weight().max(1)).sum();
                let mut draw = rand::thread_rng().gen_range(0..total);
                for host in &pool {
                    let weight = host.weight().max(1);
                    if draw < weight {
                        return Ok(host.clone());
                    }
                    draw -= weight;
                }
                Ok(pool[pool.len() - 1].clone())
            }
            STRATEGY_FASTEST_RESPONSE => {
                for host in &pool {
                    self.registry.response_times.ensure_monitoring(
                        self.driver.clone(),
                        host.clone(),
                        props,
                    );
                }
                let cold: Vec<Arc<HostInfo>> = pool
                    .iter()
                    .filter(|h| self.registry.response_times.sample_micros(&h.url()).is_none())
                    .cloned()
                    .collect();
                if !cold.is_empty() {
                    return Ok(Self::pick_random(&cold));
                }
                pool.iter()
                    .min_by_key(|h| {
                        self.registry
                            .response_times
                            .sample_micros(&h.url())
                            .unwrap_or(u64::MAX)
                    })
                    .cloned()
                    .ok_or_else(|| {
                        DroverError::Internal("Host selection pool drained unexpectedly".to_string())
                    })
            }
            other => Err(DroverError::UnsupportedStrategy(other.to_string())),
        }
    }

    fn pick_random(pool: &[Arc<HostInfo>]) -> Arc<HostInfo> {
        let index = rand::thread_rng().gen_range(0..pool.len());
        pool[index].clone()
    }

    /// Opens a wire connection to the host: internal pool first, then the
    /// driver, with the blue/green fallback when the green endpoint is gone.
    pub async fn connect(
        &self,
        host: &Arc<HostInfo>,
        props: &Properties,
    ) -> std::result::Result<Arc<dyn WireConnection>, WireError> {
        if props.internal_pools_enabled() {
            let prepared = self
                .driver
                .prepare_pool_properties(props, props.internal_pool_max_idle());
            if let Some(driver_pool) = self.driver.get_pool_client(&prepared) {
                return driver_pool
                    .acquire()
                    .await
                    .map_err(|e| WireError::new(format!("Connection pool error: {e}")));
            }
            while let Some(conn) = self.registry.pools.acquire(host, props) {
                if self.driver.is_client_valid(conn.as_ref()).await {
                    return Ok(conn);
                }
                conn.close().await;
            }
        }

        let attempt = match props.wrapper_connect_timeout() {
            Some(limit) => match tokio::time::timeout(limit, self.driver.connect(host, props)).await
            {
                Ok(result) => result,
                Err(_) => Err(WireError::new(format!(
                    "Connect to {}: timeout expired after {limit:?}",
                    host.url()
                ))),
            },
            None => self.driver.connect(host, props).await,
        };

        match attempt {
            Ok(conn) => Ok(conn),
            Err(e) => {
                if props.green_node_replacement_enabled() && rds::is_green_node(host.host()) {
                    if let Some(original) = rds::strip_green_suffix(host.host()) {
                        info!(
                            "Green endpoint {} is gone; retrying against {original}",
                            host.host()
                        );
                        let fallback =
                            Arc::new(HostInfo::new(original, host.port(), host.role()));
                        return self.driver.connect(&fallback, props).await;
                    }
                }
                Err(e)
            }
        }
    }
}
