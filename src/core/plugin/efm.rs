// src/core/plugin/efm.rs

//! The host monitoring plugin: wraps data verbs in a monitoring context so a
//! host that stops responding mid-call gets the call aborted instead of
//! hanging until the driver's own timeout.

use super::{ConnectionPlugin, ExecuteChain, OperationResult, SqlOperation, Subscriptions, methods};
use crate::core::errors::{DroverError, Result};
use crate::core::host::HostAvailability;
use crate::core::monitoring::MonitorContext;
use crate::core::plugin::service::PluginService;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub struct HostMonitoringPlugin {
    service: Arc<PluginService>,
}

impl HostMonitoringPlugin {
    pub fn new(service: Arc<PluginService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl ConnectionPlugin for HostMonitoringPlugin {
    fn name(&self) -> &'static str {
        "hostMonitoring"
    }

    fn subscriptions(&self) -> Subscriptions {
        Subscriptions::of(&[methods::QUERY, methods::EXECUTE])
    }

    async fn execute(&self, op: &SqlOperation, next: ExecuteChain<'_>) -> Result<OperationResult> {
        let Some(client) = self.service.current_client() else {
            return next.run(op).await;
        };

        let props = self.service.props();
        let monitor = self.service.registry().monitors.monitor_for(
            &self.service,
            &client.host,
            &props.monitoring_properties(),
            props.monitor_disposal_time(),
        );

        let monitored = client.connection.clone();
        let context = Arc::new(MonitorContext::new(
            props.failure_detection_time(),
            props.failure_detection_interval(),
            props.failure_detection_count(),
            Box::new(move || monitored.abort()),
        ));
        monitor.start_monitoring(context.clone());
        debug!("Monitoring started for a call against {}", client.host.url());

        let result = next.run(op).await;
        monitor.stop_monitoring(&context);

        if context.is_node_unhealthy() {
            self.service
                .set_availability(&[client.host.url()], HostAvailability::NotAvailable);
            return Err(DroverError::Network(format!(
                "Host {} is unresponsive; the in-flight call was aborted",
                client.host.url()
            )));
        }
        result
    }
}
