// src/core/plugin/auth/secrets.rs

//! Secrets-manager authentication: username/password come from a secrets
//! service, cached without TTL and invalidated by login failure.

use super::{SecretsClient, SecretsServiceError};
use crate::config::{Properties, options};
use crate::core::driver::WireConnection;
use crate::core::errors::{DroverError, Result};
use crate::core::host::HostInfo;
use crate::core::plugin::service::PluginService;
use crate::core::plugin::{ConnectChain, ConnectionPlugin, Subscriptions, methods};
use crate::core::registry::{DbSecret, SecretCacheKey};
use crate::core::topology::rds;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

pub struct SecretsManagerAuthPlugin {
    service: Arc<PluginService>,
    client: Arc<dyn SecretsClient>,
}

impl SecretsManagerAuthPlugin {
    pub fn new(service: Arc<PluginService>, client: Arc<dyn SecretsClient>) -> Self {
        Self { service, client }
    }

    fn cache_key(&self, host: &HostInfo, props: &Properties) -> Result<SecretCacheKey> {
        let secret_id = props.require_string(options::SECRET_ID)?;
        let region = props
            .get_string(options::SECRET_REGION)
            .or_else(|| rds::region_from_host(host.host()))
            .ok_or_else(|| {
                DroverError::Configuration(
                    "Cannot determine the secret's region: set 'secretRegion' or use a managed endpoint"
                        .to_string(),
                )
            })?;
        Ok(SecretCacheKey { secret_id, region })
    }

    async fn fetch_secret(
        &self,
        key: &SecretCacheKey,
        endpoint: Option<&str>,
    ) -> Result<DbSecret> {
        let secret = self
            .client
            .get_secret_value(&key.secret_id, &key.region, endpoint)
            .await
            .map_err(|e| match e {
                SecretsServiceError::Service(msg) => DroverError::Login(msg),
                SecretsServiceError::Other(msg) => DroverError::Network(msg),
            })?;
        self.service
            .registry()
            .secrets
            .insert(key.clone(), secret.clone());
        Ok(secret)
    }
}

#[async_trait]
impl ConnectionPlugin for SecretsManagerAuthPlugin {
    fn name(&self) -> &'static str {
        "secretsManager"
    }

    fn subscriptions(&self) -> Subscriptions {
        Subscriptions::of(&[methods::CONNECT, methods::FORCE_CONNECT])
    }

    async fn connect(
        &self,
        host: &Arc<HostInfo>,
        props: &Properties,
        is_initial: bool,
        next: ConnectChain<'_>,
    ) -> Result<Arc<dyn WireConnection>> {
        let key = self.cache_key(host, props)?;
        let endpoint = props.get_string(options::SECRET_ENDPOINT);

        let cached = self
            .service
            .registry()
            .secrets
            .get(&key)
            .map(|entry| entry.value().clone());
        let from_cache = cached.is_some();
        let secret = match cached {
            Some(secret) => secret,
            None => self.fetch_secret(&key, endpoint.as_deref()).await?,
        };

        let auth_props = props
            .clone()
            .with(options::USER, secret.username.clone())
            .with(options::PASSWORD, secret.password.clone());
        match next.run(host, &auth_props, is_initial).await {
            Err(e) if e.is_login() && from_cache => {
                info!(
                    "Cached secret '{}' was rejected; force-refreshing once",
                    key.secret_id
                );
                self.service.registry().secrets.remove(&key);
                let fresh = self.fetch_secret(&key, endpoint.as_deref()).await?;
                let retry_props = props
                    .clone()
                    .with(options::USER, fresh.username.clone())
                    .with(options::PASSWORD, fresh.password.clone());
                next.run(host, &retry_props, is_initial).await
            }
            other => other,
        }
    }
}
