// src/core/plugin/factory.rs

//! Turns the configured `plugins` list into plugin instances, in the
//! user-declared order.

use super::auth::federated::FederatedAuthPlugin;
use super::auth::iam::IamAuthPlugin;
use super::auth::secrets::SecretsManagerAuthPlugin;
use super::auth::{IamTokenSigner, SamlAssertionProvider, SecretsClient, StsClient};
use super::efm::HostMonitoringPlugin;
use super::failover::FailoverPlugin;
use super::read_write_splitting::ReadWriteSplittingPlugin;
use super::service::PluginService;
use super::ConnectionPlugin;
use crate::core::errors::{DroverError, Result};
use std::sync::Arc;

/// The external collaborators auth plugins need. All optional; a plugin that
/// needs a missing one is a configuration error.
#[derive(Default, Clone)]
pub struct Collaborators {
    pub iam_signer: Option<Arc<dyn IamTokenSigner>>,
    pub secrets_client: Option<Arc<dyn SecretsClient>>,
    pub saml_provider: Option<Arc<dyn SamlAssertionProvider>>,
    pub sts_client: Option<Arc<dyn StsClient>>,
}

fn require<T: ?Sized>(
    slot: &Option<Arc<T>>,
    plugin: &str,
    collaborator: &str,
) -> Result<Arc<T>> {
    slot.clone().ok_or_else(|| {
        DroverError::Configuration(format!(
            "Plugin '{plugin}' requires a {collaborator} collaborator"
        ))
    })
}

/// Instantiates the configured plugins. Order is preserved; the terminal
/// plugin is appended later by the chain itself.
pub fn build_plugins(
    service: &Arc<PluginService>,
    collaborators: &Collaborators,
) -> Result<Vec<Arc<dyn ConnectionPlugin>>> {
    let mut plugins: Vec<Arc<dyn ConnectionPlugin>> = Vec::new();
    for name in service.props().plugin_names() {
        let plugin: Arc<dyn ConnectionPlugin> = match name.as_str() {
            "failover" => Arc::new(FailoverPlugin::new(service.clone())?),
            "hostMonitoring" | "efm" => Arc::new(HostMonitoringPlugin::new(service.clone())),
            "readWriteSplitting" => Arc::new(ReadWriteSplittingPlugin::new(service.clone())),
            "iam" => Arc::new(IamAuthPlugin::new(
                service.clone(),
                require(&collaborators.iam_signer, "iam", "token signer")?,
            )),
            "secretsManager" => Arc::new(SecretsManagerAuthPlugin::new(
                service.clone(),
                require(&collaborators.secrets_client, "secretsManager", "secrets")?,
            )),
            "federatedAuth" => Arc::new(FederatedAuthPlugin::new(
                service.clone(),
                require(&collaborators.saml_provider, "federatedAuth", "SAML")?,
                require(&collaborators.sts_client, "federatedAuth", "STS")?,
                require(&collaborators.iam_signer, "federatedAuth", "token signer")?,
            )),
            unknown => {
                return Err(DroverError::Configuration(format!(
                    "Unknown plugin '{unknown}'"
                )));
            }
        };
        plugins.push(plugin);
    }
    Ok(plugins)
}
