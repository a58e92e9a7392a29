//! End-to-end federation passes against in-memory fakes
//!
//! Drives `reconcile` through the public API with every external service
//! replaced by a fake, so no cluster or network is needed.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use kube::runtime::controller::Action;

use pull_secret_federator::config::FederationConfig;
use pull_secret_federator::controller::{error_policy, reconcile, Context, KubeClient};
use pull_secret_federator::crd::{ImagePullSecret, ImagePullSecretSpec, ImagePullSecretStatus};
use pull_secret_federator::credential::{
    CredentialDocument, SecretStore, StoreError, DOCKER_CONFIG_JSON_KEY, REGISTRY_HOSTS,
};
use pull_secret_federator::events::NoopEventPublisher;
use pull_secret_federator::token::{
    GenerateAccessTokenResponse, IamCredentialsClient, ServiceAccountTokenRequester, StsClient,
    Token, TokenError, TokenExchangeRequest, TokenExchangeResponse, TokenInfoClient,
};
use pull_secret_federator::Error;

const EMAIL: &str = "deployer@proj.iam.gserviceaccount.com";
const PROVIDER: &str =
    "projects/123456/locations/global/workloadIdentityPools/ci-pool/providers/cluster";

fn impersonation_expiry() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2031, 6, 1, 8, 30, 0).unwrap()
}

fn request() -> ImagePullSecret {
    ImagePullSecret {
        metadata: ObjectMeta {
            name: Some("build-pull".to_string()),
            namespace: Some("ci".to_string()),
            ..Default::default()
        },
        spec: ImagePullSecretSpec {
            gsa_email: EMAIL.to_string(),
            service_account_name: "build-sa".to_string(),
            workload_identity_pool_provider: format!("//iam.googleapis.com/{}", PROVIDER),
            secret_name: "gcr-pull".to_string(),
        },
        status: None,
    }
}

/// Request store holding one object and the statuses written to it
#[derive(Default)]
struct FakeRequests {
    statuses: Mutex<Vec<ImagePullSecretStatus>>,
}

#[async_trait]
impl KubeClient for FakeRequests {
    async fn get_request(&self, namespace: &str, name: &str) -> Result<ImagePullSecret, Error> {
        if namespace == "ci" && name == "build-pull" {
            Ok(request())
        } else {
            Err(Error::fetch(
                format!("{}/{}", namespace, name),
                "imagepullsecrets not found",
            ))
        }
    }

    async fn patch_status(
        &self,
        _namespace: &str,
        _name: &str,
        status: &ImagePullSecretStatus,
    ) -> Result<(), Error> {
        self.statuses.lock().unwrap().push(status.clone());
        Ok(())
    }
}

/// Counts every hop and optionally denies issuance
#[derive(Default)]
struct FakeGoogle {
    deny_issuance: bool,
    issued: AtomicUsize,
    exchanged: AtomicUsize,
    impersonated: AtomicUsize,
}

#[async_trait]
impl ServiceAccountTokenRequester for FakeGoogle {
    async fn create_token(
        &self,
        namespace: &str,
        name: &str,
        audiences: &[String],
    ) -> Result<Token, TokenError> {
        self.issued.fetch_add(1, Ordering::SeqCst);
        if self.deny_issuance {
            return Err(TokenError::issuance(namespace, name, "forbidden"));
        }
        assert_eq!(audiences, [format!("//iam.googleapis.com/{}", PROVIDER)]);
        Ok(Token::new(
            format!("jwt-for-{}", name),
            Utc::now() + chrono::Duration::hours(1),
        ))
    }
}

#[async_trait]
impl StsClient for FakeGoogle {
    async fn exchange(
        &self,
        request: &TokenExchangeRequest,
    ) -> Result<TokenExchangeResponse, TokenError> {
        self.exchanged.fetch_add(1, Ordering::SeqCst);
        assert_eq!(request.subject_token, "jwt-for-build-sa");
        Ok(TokenExchangeResponse {
            access_token: "federated".to_string(),
            expires_in: None,
        })
    }
}

#[async_trait]
impl IamCredentialsClient for FakeGoogle {
    async fn generate_access_token(
        &self,
        target: &str,
        scopes: &[String],
        bearer: &Token,
    ) -> Result<GenerateAccessTokenResponse, TokenError> {
        self.impersonated.fetch_add(1, Ordering::SeqCst);
        assert_eq!(target, EMAIL);
        assert_eq!(scopes.len(), 2);
        assert_eq!(bearer.secret(), "federated");
        Ok(GenerateAccessTokenResponse {
            access_token: "ya29.registry".to_string(),
            expire_time: impersonation_expiry(),
        })
    }
}

#[async_trait]
impl TokenInfoClient for FakeGoogle {
    async fn token_info(&self, _token: &Token) -> Result<serde_json::Value, TokenError> {
        Err(TokenError::introspection(None, "connection refused"))
    }
}

/// Secrets keyed by namespace/name
#[derive(Default)]
struct FakeSecrets {
    secrets: Mutex<BTreeMap<String, Secret>>,
}

impl FakeSecrets {
    fn key(secret: &Secret) -> String {
        format!(
            "{}/{}",
            secret.metadata.namespace.clone().unwrap_or_default(),
            secret.metadata.name.clone().unwrap_or_default()
        )
    }

    fn document(&self, key: &str) -> Option<CredentialDocument> {
        let secrets = self.secrets.lock().unwrap();
        let data = secrets.get(key)?.data.as_ref()?;
        serde_json::from_slice(&data.get(DOCKER_CONFIG_JSON_KEY)?.0).ok()
    }
}

#[async_trait]
impl SecretStore for FakeSecrets {
    async fn create(&self, secret: &Secret) -> Result<(), StoreError> {
        let mut secrets = self.secrets.lock().unwrap();
        let key = Self::key(secret);
        if secrets.contains_key(&key) {
            return Err(StoreError::AlreadyExists);
        }
        secrets.insert(key, secret.clone());
        Ok(())
    }

    async fn replace(&self, secret: &Secret) -> Result<(), StoreError> {
        let mut secrets = self.secrets.lock().unwrap();
        match secrets.get_mut(&Self::key(secret)) {
            Some(existing) => {
                *existing = secret.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }
}

struct Harness {
    requests: Arc<FakeRequests>,
    google: Arc<FakeGoogle>,
    secrets: Arc<FakeSecrets>,
    ctx: Arc<Context>,
}

fn harness(google: FakeGoogle) -> Harness {
    let requests = Arc::new(FakeRequests::default());
    let google = Arc::new(google);
    let secrets = Arc::new(FakeSecrets::default());
    let ctx = Arc::new(Context {
        kube: requests.clone(),
        service_accounts: google.clone(),
        sts: google.clone(),
        iam: google.clone(),
        token_info: google.clone(),
        secrets: secrets.clone(),
        events: Arc::new(NoopEventPublisher),
        config: FederationConfig::default(),
    });
    Harness {
        requests,
        google,
        secrets,
        ctx,
    }
}

#[tokio::test]
async fn repeated_passes_keep_secret_current() {
    let h = harness(FakeGoogle::default());

    for _ in 0..2 {
        let action = reconcile(Arc::new(request()), h.ctx.clone())
            .await
            .expect("pass should succeed");
        assert_eq!(action, Action::requeue(Duration::from_secs(30)));
    }

    // One chain per pass, each hop once despite the introspection lookup
    assert_eq!(h.google.issued.load(Ordering::SeqCst), 2);
    assert_eq!(h.google.exchanged.load(Ordering::SeqCst), 2);
    assert_eq!(h.google.impersonated.load(Ordering::SeqCst), 2);

    let document = h.secrets.document("ci/gcr-pull").expect("secret written");
    assert_eq!(document.auths.len(), REGISTRY_HOSTS.len());
    for host in REGISTRY_HOSTS {
        let auth = &document.auths[host];
        assert_eq!(auth.username, "oauth2accesstoken");
        assert_eq!(auth.password, "ya29.registry");
        assert_eq!(auth.email, EMAIL);
    }

    let statuses = h.requests.statuses.lock().unwrap();
    assert_eq!(statuses.len(), 2);
    assert!(statuses
        .iter()
        .all(|s| s.expires_at == Some(impersonation_expiry())));
}

#[tokio::test]
async fn denied_issuance_writes_nothing() {
    let h = harness(FakeGoogle {
        deny_issuance: true,
        ..Default::default()
    });
    let obj = Arc::new(request());

    let err = reconcile(obj.clone(), h.ctx.clone()).await.unwrap_err();

    assert!(matches!(err, Error::Chain { .. }));
    assert_eq!(h.google.exchanged.load(Ordering::SeqCst), 0);
    assert_eq!(h.google.impersonated.load(Ordering::SeqCst), 0);
    assert!(h.secrets.document("ci/gcr-pull").is_none());
    assert!(h.requests.statuses.lock().unwrap().is_empty());
    assert_eq!(
        error_policy(obj, &err, h.ctx.clone()),
        Action::requeue(Duration::from_secs(30))
    );
}

#[tokio::test]
async fn missing_request_is_retried_quickly() {
    let h = harness(FakeGoogle::default());
    let mut other = request();
    other.metadata.name = Some("gone".to_string());
    let obj = Arc::new(other);

    let err = reconcile(obj.clone(), h.ctx.clone()).await.unwrap_err();

    assert!(err.is_fetch_failure());
    assert_eq!(h.google.issued.load(Ordering::SeqCst), 0);
    assert_eq!(
        error_policy(obj, &err, h.ctx.clone()),
        Action::requeue(Duration::from_secs(10))
    );
}
