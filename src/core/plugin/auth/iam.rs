// src/core/plugin/auth/iam.rs

//! IAM database authentication: token-as-password, with a shared
//! process-wide token cache and a single regenerate-and-retry on login
//! failure.

use super::{IamTokenSigner, resolve_iam_target};
use crate::config::{Properties, options};
use crate::core::driver::WireConnection;
use crate::core::errors::Result;
use crate::core::host::HostInfo;
use crate::core::plugin::service::PluginService;
use crate::core::plugin::{ConnectChain, ConnectionPlugin, Subscriptions, methods};
use crate::core::registry::{CachedToken, TokenCacheKey};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

pub struct IamAuthPlugin {
    service: Arc<PluginService>,
    signer: Arc<dyn IamTokenSigner>,
}

impl IamAuthPlugin {
    pub fn new(service: Arc<PluginService>, signer: Arc<dyn IamTokenSigner>) -> Self {
        Self { service, signer }
    }

    async fn generate_and_cache(
        &self,
        key: &TokenCacheKey,
        ttl: std::time::Duration,
    ) -> Result<String> {
        let token = self
            .signer
            .generate_token(&key.host, key.port, &key.region, &key.user, None)
            .await?;
        if !ttl.is_zero() {
            self.service.registry().iam_tokens.insert(
                key.clone(),
                CachedToken {
                    token: token.clone(),
                    expires_at: Utc::now() + ttl,
                },
            );
        }
        Ok(token)
    }

    async fn connect_with_token(
        &self,
        host: &Arc<HostInfo>,
        props: &Properties,
        is_initial: bool,
        next: ConnectChain<'_>,
    ) -> Result<Arc<dyn WireConnection>> {
        let user = props.require_string(options::USER)?;
        let (iam_host, iam_port, region) = resolve_iam_target(host, props)?;
        let ttl = props.iam_token_expiration();
        let key = TokenCacheKey {
            region,
            host: iam_host,
            port: iam_port,
            user,
        };

        let cached = if ttl.is_zero() {
            None
        } else {
            self.service
                .registry()
                .iam_tokens
                .get(&key)
                .filter(|t| !t.is_expired())
                .map(|t| t.token.clone())
        };
        let from_cache = cached.is_some();
        let token = match cached {
            Some(token) => {
                debug!("Using cached IAM token for {}@{}", key.user, key.host);
                token
            }
            None => self.generate_and_cache(&key, ttl).await?,
        };

        let auth_props = props.clone().with(options::PASSWORD, token);
        match next.run(host, &auth_props, is_initial).await {
            Err(e) if e.is_login() && from_cache => {
                info!(
                    "Cached IAM token for {}@{} was rejected; regenerating once",
                    key.user, key.host
                );
                self.service.registry().iam_tokens.remove(&key);
                let fresh = self.generate_and_cache(&key, ttl).await?;
                let retry_props = props.clone().with(options::PASSWORD, fresh);
                next.run(host, &retry_props, is_initial).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl ConnectionPlugin for IamAuthPlugin {
    fn name(&self) -> &'static str {
        "iam"
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
        self.connect_with_token(host, props, is_initial, next).await
    }

    async fn force_connect(
        &self,
        host: &Arc<HostInfo>,
        props: &Properties,
        is_initial: bool,
        next: ConnectChain<'_>,
    ) -> Result<Arc<dyn WireConnection>> {
        self.connect_with_token(host, props, is_initial, next).await
    }
}
