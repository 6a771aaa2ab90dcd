// src/core/plugin/auth/mod.rs

//! Credential acquisition plugins and the collaborator traits they drive.
//! The actual AWS SDK clients and IdP HTTP flows live outside the crate;
//! the plugins own only the caching and retry policy around them.

pub mod federated;
pub mod iam;
pub mod secrets;

use crate::config::{Properties, options};
use crate::core::errors::{DroverError, Result};
use crate::core::host::HostInfo;
use crate::core::registry::DbSecret;
use crate::core::topology::rds;
use async_trait::async_trait;

/// Temporary AWS credentials produced by a federation exchange.
#[derive(Debug, Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

/// The opaque token signer: produces a short-lived database auth token.
#[async_trait]
pub trait IamTokenSigner: Send + Sync {
    async fn generate_token(
        &self,
        host: &str,
        port: u16,
        region: &str,
        user: &str,
        credentials: Option<&AwsCredentials>,
    ) -> Result<String>;
}

/// Failures a secrets service can report. Service-side rejections surface as
/// login errors, everything else as network errors.
#[derive(Debug, Clone)]
pub enum SecretsServiceError {
    Service(String),
    Other(String),
}

impl std::fmt::Display for SecretsServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretsServiceError::Service(msg) | SecretsServiceError::Other(msg) => {
                write!(f, "{msg}")
            }
        }
    }
}

#[async_trait]
pub trait SecretsClient: Send + Sync {
    async fn get_secret_value(
        &self,
        secret_id: &str,
        region: &str,
        endpoint: Option<&str>,
    ) -> std::result::Result<DbSecret, SecretsServiceError>;
}

/// Everything an IdP needs to produce a SAML assertion.
#[derive(Debug, Clone)]
pub struct SamlRequest {
    pub idp_endpoint: String,
    pub idp_port: u16,
    pub idp_username: String,
    pub idp_password: String,
    pub idp_name: Option<String>,
    pub rp_identifier: Option<String>,
    /// No default is applied here; the IdP flow decides when unset.
    pub ssl_verify: Option<bool>,
}

#[async_trait]
pub trait SamlAssertionProvider: Send + Sync {
    async fn assertion(&self, request: &SamlRequest) -> Result<String>;
}

#[async_trait]
pub trait StsClient: Send + Sync {
    async fn assume_role_with_saml(
        &self,
        role_arn: &str,
        idp_arn: &str,
        assertion: &str,
    ) -> Result<AwsCredentials>;
}

/// Resolves the endpoint/port/region triple the token is signed for,
/// honoring the `iamHost`/`iamDefaultPort`/`iamRegion` overrides.
pub(crate) fn resolve_iam_target(
    host: &HostInfo,
    props: &Properties,
) -> Result<(String, u16, String)> {
    let iam_host = props
        .get_string(options::IAM_HOST)
        .unwrap_or_else(|| host.host().to_string());
    let iam_port = props
        .get_u16(options::IAM_DEFAULT_PORT)?
        .unwrap_or_else(|| host.port());
    let region = props
        .get_string(options::IAM_REGION)
        .or_else(|| rds::region_from_host(&iam_host))
        .ok_or_else(|| {
            DroverError::Configuration(
                "Cannot determine the signing region: set 'iamRegion' or use a managed endpoint"
                    .to_string(),
            )
        })?;
    Ok((iam_host, iam_port, region))
}
