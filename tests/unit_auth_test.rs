mod common;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use common::MockCluster;
use drover::config::options;
use drover::core::errors::Result;
use drover::core::plugin::auth::{
    AwsCredentials, IamTokenSigner, SamlAssertionProvider, SamlRequest, SecretsClient,
    SecretsServiceError, StsClient,
};
use drover::core::plugin::factory::Collaborators;
use drover::core::registry::{CachedToken, DbSecret, DriverRegistry, TokenCacheKey};
use drover::{Client, ClientBuilder, Properties};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Default)]
struct CountingSigner {
    calls: AtomicU32,
    token: RwLock<String>,
}

impl CountingSigner {
    fn with_token(token: &str) -> Arc<Self> {
        let signer = Self::default();
        *signer.token.write() = token.to_string();
        Arc::new(signer)
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::Acquire)
    }
}

#[async_trait]
impl IamTokenSigner for CountingSigner {
    async fn generate_token(
        &self,
        _host: &str,
        _port: u16,
        _region: &str,
        _user: &str,
        _credentials: Option<&AwsCredentials>,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        Ok(self.token.read().clone())
    }
}

#[derive(Default)]
struct CountingSecrets {
    calls: AtomicU32,
    password: RwLock<String>,
}

impl CountingSecrets {
    fn with_password(password: &str) -> Arc<Self> {
        let secrets = Self::default();
        *secrets.password.write() = password.to_string();
        Arc::new(secrets)
    }
}

#[async_trait]
impl SecretsClient for CountingSecrets {
    async fn get_secret_value(
        &self,
        _secret_id: &str,
        _region: &str,
        _endpoint: Option<&str>,
    ) -> std::result::Result<DbSecret, SecretsServiceError> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        Ok(DbSecret {
            username: "app".to_string(),
            password: self.password.read().clone(),
        })
    }
}

struct StaticSaml {
    calls: AtomicU32,
}

#[async_trait]
impl SamlAssertionProvider for StaticSaml {
    async fn assertion(&self, _request: &SamlRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        Ok("saml-assertion".to_string())
    }
}

struct StaticSts;

#[async_trait]
impl StsClient for StaticSts {
    async fn assume_role_with_saml(
        &self,
        _role_arn: &str,
        _idp_arn: &str,
        _assertion: &str,
    ) -> Result<AwsCredentials> {
        Ok(AwsCredentials {
            access_key_id: "AKIA".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: Some("session".to_string()),
        })
    }
}

fn iam_key() -> TokenCacheKey {
    TokenCacheKey {
        region: "eu-west-1".to_string(),
        host: "instance-1.db.test".to_string(),
        port: 5432,
        user: "app".to_string(),
    }
}

fn iam_props() -> Properties {
    common::props_for("instance-1.db.test")
        .with(options::PLUGINS, "iam")
        .with(options::IAM_REGION, "eu-west-1")
}

async fn connect_with(
    cluster: &MockCluster,
    registry: Arc<DriverRegistry>,
    props: Properties,
    collaborators: Collaborators,
) -> Client {
    ClientBuilder::new(cluster.driver(), props)
        .registry(registry)
        .collaborators(collaborators)
        .connect()
        .await
        .expect("client should connect")
}

#[tokio::test]
async fn test_cached_iam_token_skips_the_signer() {
    let cluster = MockCluster::new(&[("instance-1", true)]);
    cluster.expect_password(Some("cached-tok"));
    let registry = DriverRegistry::new();
    registry.iam_tokens.insert(
        iam_key(),
        CachedToken {
            token: "cached-tok".to_string(),
            expires_at: Utc::now() + ChronoDuration::minutes(5),
        },
    );

    let signer = CountingSigner::with_token("never-used");
    let collaborators = Collaborators {
        iam_signer: Some(signer.clone()),
        ..Collaborators::default()
    };
    let _client = connect_with(&cluster, registry, iam_props(), collaborators).await;

    assert_eq!(signer.calls(), 0, "a fresh cached token must be used as-is");
}

#[tokio::test]
async fn test_expired_cached_token_is_treated_as_absent() {
    let cluster = MockCluster::new(&[("instance-1", true)]);
    cluster.expect_password(Some("fresh-tok"));
    let registry = DriverRegistry::new();
    registry.iam_tokens.insert(
        iam_key(),
        CachedToken {
            token: "stale-tok".to_string(),
            expires_at: Utc::now() - ChronoDuration::minutes(1),
        },
    );

    let signer = CountingSigner::with_token("fresh-tok");
    let collaborators = Collaborators {
        iam_signer: Some(signer.clone()),
        ..Collaborators::default()
    };
    let _client = connect_with(&cluster, registry, iam_props(), collaborators).await;

    assert_eq!(signer.calls(), 1);
}

#[tokio::test]
async fn test_zero_expiration_regenerates_every_connect() {
    let cluster = MockCluster::new(&[("instance-1", true)]);
    cluster.expect_password(Some("tok"));
    let registry = DriverRegistry::new();
    let signer = CountingSigner::with_token("tok");
    let props = iam_props().with(options::IAM_TOKEN_EXPIRATION, 0u64);

    let collaborators = Collaborators {
        iam_signer: Some(signer.clone()),
        ..Collaborators::default()
    };
    let _a = connect_with(&cluster, registry.clone(), props.clone(), collaborators.clone()).await;
    let _b = connect_with(&cluster, registry.clone(), props, collaborators).await;

    assert_eq!(signer.calls(), 2);
    assert!(registry.iam_tokens.is_empty());
}

#[tokio::test]
async fn test_rejected_cached_token_is_regenerated_once() {
    let cluster = MockCluster::new(&[("instance-1", true)]);
    cluster.expect_password(Some("fresh-tok"));
    let registry = DriverRegistry::new();
    registry.iam_tokens.insert(
        iam_key(),
        CachedToken {
            token: "revoked-tok".to_string(),
            expires_at: Utc::now() + ChronoDuration::minutes(5),
        },
    );

    let signer = CountingSigner::with_token("fresh-tok");
    let collaborators = Collaborators {
        iam_signer: Some(signer.clone()),
        ..Collaborators::default()
    };
    let _client = connect_with(&cluster, registry.clone(), iam_props(), collaborators).await;

    assert_eq!(signer.calls(), 1);
    let refreshed = registry.iam_tokens.get(&iam_key()).expect("token cached");
    assert_eq!(refreshed.token, "fresh-tok");
}

#[tokio::test]
async fn test_secrets_are_cached_and_invalidated_by_login_failure() {
    let cluster = MockCluster::new(&[("instance-1", true)]);
    cluster.expect_password(Some("s3cret-1"));
    let registry = DriverRegistry::new();
    let secrets = CountingSecrets::with_password("s3cret-1");
    let props = common::props_for("instance-1.db.test")
        .with(options::PLUGINS, "secretsManager")
        .with(options::SECRET_ID, "prod/db")
        .with(options::SECRET_REGION, "eu-west-1");
    let collaborators = Collaborators {
        secrets_client: Some(secrets.clone()),
        ..Collaborators::default()
    };

    let _a = connect_with(&cluster, registry.clone(), props.clone(), collaborators.clone()).await;
    let _b = connect_with(&cluster, registry.clone(), props.clone(), collaborators.clone()).await;
    assert_eq!(
        secrets.calls.load(Ordering::Acquire),
        1,
        "the second session must reuse the cached secret"
    );

    // The database credentials rotate; the cached secret goes stale.
    cluster.expect_password(Some("s3cret-2"));
    *secrets.password.write() = "s3cret-2".to_string();

    let _c = connect_with(&cluster, registry, props, collaborators).await;
    assert_eq!(secrets.calls.load(Ordering::Acquire), 2);
}

#[tokio::test]
async fn test_federated_auth_shares_the_iam_token_cache() {
    let cluster = MockCluster::new(&[("instance-1", true)]);
    cluster.expect_password(Some("fed-tok"));
    let registry = DriverRegistry::new();
    let signer = CountingSigner::with_token("fed-tok");
    let saml = Arc::new(StaticSaml {
        calls: AtomicU32::new(0),
    });
    let props = common::props_for("instance-1.db.test")
        .with(options::PLUGINS, "federatedAuth")
        .with(options::IAM_REGION, "eu-west-1")
        .with(options::IAM_ROLE_ARN, "arn:aws:iam::123:role/db")
        .with(options::IAM_IDP_ARN, "arn:aws:iam::123:saml-provider/idp")
        .with(options::IDP_ENDPOINT, "idp.corp.test")
        .with(options::IDP_USERNAME, "app")
        .with(options::IDP_PASSWORD, "idp-secret");
    let collaborators = Collaborators {
        iam_signer: Some(signer.clone()),
        saml_provider: Some(saml.clone()),
        sts_client: Some(Arc::new(StaticSts)),
        ..Collaborators::default()
    };

    let _a = connect_with(&cluster, registry.clone(), props.clone(), collaborators.clone()).await;
    assert_eq!(saml.calls.load(Ordering::Acquire), 1);

    // The cached token spares the whole federation exchange.
    let _b = connect_with(&cluster, registry, props, collaborators).await;
    assert_eq!(saml.calls.load(Ordering::Acquire), 1);
    assert_eq!(signer.calls(), 1);
}
