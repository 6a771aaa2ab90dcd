// src/core/plugin/auth/federated.rs

//! Federated (SAML) authentication: the IdP produces a SAML assertion, STS
//! exchanges it for temporary credentials, and the signer turns those into a
//! database token cached under the same key space as plain IAM tokens.

use super::{
    AwsCredentials, IamTokenSigner, SamlAssertionProvider, SamlRequest, StsClient,
    resolve_iam_target,
};
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

pub struct FederatedAuthPlugin {
    service: Arc<PluginService>,
    saml: Arc<dyn SamlAssertionProvider>,
    sts: Arc<dyn StsClient>,
    signer: Arc<dyn IamTokenSigner>,
}

impl FederatedAuthPlugin {
    pub fn new(
        service: Arc<PluginService>,
        saml: Arc<dyn SamlAssertionProvider>,
        sts: Arc<dyn StsClient>,
        signer: Arc<dyn IamTokenSigner>,
    ) -> Self {
        Self {
            service,
            saml,
            sts,
            signer,
        }
    }

    fn saml_request(props: &Properties) -> Result<SamlRequest> {
        Ok(SamlRequest {
            idp_endpoint: props.require_string(options::IDP_ENDPOINT)?,
            idp_port: props.get_u16(options::IDP_PORT)?.unwrap_or(443),
            idp_username: props.require_string(options::IDP_USERNAME)?,
            idp_password: props.require_string(options::IDP_PASSWORD)?,
            idp_name: props.get_string(options::IDP_NAME),
            rp_identifier: props.get_string(options::RP_IDENTIFIER),
            ssl_verify: props.idp_ssl_verify(),
        })
    }

    /// Runs the full federation exchange and caches the resulting token.
    async fn exchange_and_cache(
        &self,
        key: &TokenCacheKey,
        props: &Properties,
        ttl: std::time::Duration,
    ) -> Result<String> {
        let request = Self::saml_request(props)?;
        let assertion = self.saml.assertion(&request).await?;
        debug!("Acquired SAML assertion from {}", request.idp_endpoint);

        let role_arn = props.require_string(options::IAM_ROLE_ARN)?;
        let idp_arn = props.require_string(options::IAM_IDP_ARN)?;
        let credentials: AwsCredentials = self
            .sts
            .assume_role_with_saml(&role_arn, &idp_arn, &assertion)
            .await?;

        let token = self
            .signer
            .generate_token(&key.host, key.port, &key.region, &key.user, Some(&credentials))
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
}

#[async_trait]
impl ConnectionPlugin for FederatedAuthPlugin {
    fn name(&self) -> &'static str {
        "federatedAuth"
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
        let user = props
            .get_string(options::DB_USER)
            .map(Ok)
            .unwrap_or_else(|| props.require_string(options::USER))?;
        let (iam_host, iam_port, region) = resolve_iam_target(host, props)?;
        let ttl = props.iam_token_expiration();
        let key = TokenCacheKey {
            region,
            host: iam_host,
            port: iam_port,
            user: user.clone(),
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
            Some(token) => token,
            None => self.exchange_and_cache(&key, props, ttl).await?,
        };

        let auth_props = props
            .clone()
            .with(options::USER, user.clone())
            .with(options::PASSWORD, token);
        match next.run(host, &auth_props, is_initial).await {
            Err(e) if e.is_login() && from_cache => {
                info!(
                    "Cached federated token for {}@{} was rejected; re-running the exchange once",
                    key.user, key.host
                );
                self.service.registry().iam_tokens.remove(&key);
                let fresh = self.exchange_and_cache(&key, props, ttl).await?;
                let retry_props = props
                    .clone()
                    .with(options::USER, user)
                    .with(options::PASSWORD, fresh);
                next.run(host, &retry_props, is_initial).await
            }
            other => other,
        }
    }
}
