//! ImagePullSecret controller implementation
//!
//! Each pass reads the request, walks the token federation chain, writes the
//! registry credential Secret and records the token expiry in status. There
//! is no state machine: every pass does the full chain, and the object is
//! requeued on a fixed cadence whatever the outcome.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::config::FederationConfig;
use crate::credential::{upsert, CredentialDocument, KubeSecretStore, SecretStore, UpsertOutcome};
use crate::crd::{ImagePullSecret, ImagePullSecretStatus};
use crate::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use crate::token::{
    IamCredentialsClient, IamCredentialsHttpClient, ImpersonatedTokenSource,
    KubeServiceAccountTokens, ReuseTokenSource, ServiceAccountTokenRequester,
    ServiceAccountTokenSource, StsClient, StsHttpClient, StsTokenSource, Token, TokenInfoClient,
    TokenInfoHttpClient, TokenSource,
};
use crate::Error;

/// Field manager and event reporter name
pub const CONTROLLER_NAME: &str = "pull-secret-federator";

/// Trait abstracting Kubernetes operations on ImagePullSecret objects
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Read the current ImagePullSecret `namespace/name`
    async fn get_request(&self, namespace: &str, name: &str) -> Result<ImagePullSecret, Error>;

    /// Patch the status of ImagePullSecret `namespace/name`
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ImagePullSecretStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_request(&self, namespace: &str, name: &str) -> Result<ImagePullSecret, Error> {
        let api: Api<ImagePullSecret> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| Error::fetch(format!("{}/{}", namespace, name), e.to_string()))
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ImagePullSecretStatus,
    ) -> Result<(), Error> {
        let api: Api<ImagePullSecret> = Api::namespaced(self.client.clone(), namespace);

        let status_patch = serde_json::json!({
            "status": status
        });

        api.patch_status(
            name,
            &PatchParams::apply(CONTROLLER_NAME),
            &Patch::Merge(&status_patch),
        )
        .await
        .map_err(|e| Error::status(format!("{}/{}", namespace, name), e.to_string()))?;

        Ok(())
    }
}

/// Controller context shared by every reconciliation
///
/// Only immutable handles live here; each pass builds its own token chain.
pub struct Context {
    /// Access to ImagePullSecret objects
    pub kube: Arc<dyn KubeClient>,
    /// Bound service account token issuance
    pub service_accounts: Arc<dyn ServiceAccountTokenRequester>,
    /// Security token service
    pub sts: Arc<dyn StsClient>,
    /// IAM credentials service
    pub iam: Arc<dyn IamCredentialsClient>,
    /// Token introspection
    pub token_info: Arc<dyn TokenInfoClient>,
    /// Credential Secret writes
    pub secrets: Arc<dyn SecretStore>,
    /// Kubernetes Event publishing
    pub events: Arc<dyn EventPublisher>,
    /// Endpoints, debug flag and requeue schedule
    pub config: FederationConfig,
}

impl Context {
    /// Create a production context from a kube Client and configuration
    pub fn new(client: Client, config: FederationConfig) -> Result<Self, Error> {
        let http = config.http_client().map_err(|e| {
            Error::internal_with_context("http-client", format!("failed to build: {}", e))
        })?;

        Ok(Self {
            kube: Arc::new(KubeClientImpl::new(client.clone())),
            service_accounts: Arc::new(KubeServiceAccountTokens::new(client.clone())),
            sts: Arc::new(StsHttpClient::new(http.clone(), &config.sts_endpoint)),
            iam: Arc::new(IamCredentialsHttpClient::new(
                http.clone(),
                &config.iam_credentials_endpoint,
            )),
            token_info: Arc::new(TokenInfoHttpClient::new(http, &config.token_info_endpoint)),
            secrets: Arc::new(KubeSecretStore::new(client.clone())),
            events: Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME)),
            config,
        })
    }

    /// Build the token chain for one request: bound token, exchange,
    /// impersonation, wrapped in a per-pass cache
    pub fn token_chain(
        &self,
        namespace: &str,
        request: &ImagePullSecret,
    ) -> ReuseTokenSource<ImpersonatedTokenSource> {
        let spec = &request.spec;
        let audience = spec.audience();

        let bound = ServiceAccountTokenSource::new(
            self.service_accounts.clone(),
            namespace,
            &spec.service_account_name,
            vec![audience.clone()],
        );
        let federated = StsTokenSource::new(
            self.sts.clone(),
            audience,
            Box::new(bound),
            self.config.debug,
        );
        let impersonated = ImpersonatedTokenSource::new(
            self.iam.clone(),
            &spec.gsa_email,
            Vec::new(),
            Box::new(federated),
        );

        ReuseTokenSource::new(impersonated)
    }
}

/// Result of a successful federation pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FederationOutcome {
    /// Which write path the Secret took
    pub upsert: UpsertOutcome,
    /// Expiry now recorded in status
    pub status: ImagePullSecretStatus,
}

/// Reconcile an ImagePullSecret
///
/// Re-reads the object, runs the federation chain and writes the credential.
/// Status is only written once the Secret is in place.
///
/// # Returns
///
/// The fixed requeue action on success. Errors are classified by
/// [`error_policy`].
#[instrument(
    skip(request, ctx),
    fields(namespace = %request.namespace().unwrap_or_default(), name = %request.name_any())
)]
pub async fn reconcile(request: Arc<ImagePullSecret>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = request.name_any();
    let namespace = request.namespace().ok_or_else(|| {
        Error::validation_for(&name, "ImagePullSecret must be namespaced")
    })?;

    let current = ctx.kube.get_request(&namespace, &name).await?;
    info!(spec = ?current.spec, "reconciling image pull secret");

    match federate(&namespace, &current, &ctx).await {
        Ok(outcome) => {
            publish(
                &ctx,
                &current,
                EventType::Normal,
                reasons::CREDENTIAL_REFRESHED,
                actions::RECONCILE,
                format!(
                    "Secret {} {} for {}",
                    current.spec.secret_name,
                    match outcome.upsert {
                        UpsertOutcome::Created => "created",
                        UpsertOutcome::Replaced => "refreshed",
                    },
                    current.spec.gsa_email
                ),
            )
            .await;
            Ok(ctx.config.requeue.success_action())
        }
        Err(e) => {
            let action = match &e {
                Error::Chain { .. } => actions::FEDERATE,
                Error::Persist { .. } => actions::PERSIST,
                _ => actions::RECONCILE,
            };
            publish(
                &ctx,
                &current,
                EventType::Warning,
                e.event_reason(),
                action,
                e.to_string(),
            )
            .await;
            Err(e)
        }
    }
}

/// Run one full pass for `request`
async fn federate(
    namespace: &str,
    request: &ImagePullSecret,
    ctx: &Context,
) -> Result<FederationOutcome, Error> {
    let key = format!("{}/{}", namespace, request.name_any());
    request.spec.validate(&key)?;

    let chain = ctx.token_chain(namespace, request);

    if ctx.config.introspect {
        introspect(&chain, ctx).await?;
    }

    let token = chain.token().await?;
    let document = CredentialDocument::render(&request.spec.gsa_email, &token);
    let upsert = upsert(
        ctx.secrets.as_ref(),
        namespace,
        &request.spec.secret_name,
        &document,
    )
    .await?;

    let status = ImagePullSecretStatus::expiring_at(token.expiry);
    ctx.kube
        .patch_status(namespace, &request.name_any(), &status)
        .await?;

    info!(
        secret = %request.spec.secret_name,
        expires_at = %token.expiry,
        "registry credential written"
    );

    Ok(FederationOutcome { upsert, status })
}

/// Log what the final token grants.
///
/// Obtaining the token is part of the chain and fails the pass; the lookup
/// itself only warns.
async fn introspect(chain: &dyn TokenSource, ctx: &Context) -> Result<(), Error> {
    let token: Token = chain.token().await?;
    match ctx.token_info.token_info(&token).await {
        Ok(info) => debug!(token_info = %info, "token introspection"),
        Err(e) => warn!(error = %e, "token introspection failed, continuing"),
    }
    Ok(())
}

async fn publish(
    ctx: &Context,
    request: &ImagePullSecret,
    type_: EventType,
    reason: &str,
    action: &str,
    note: String,
) {
    let resource_ref = request.object_ref(&());
    ctx.events
        .publish(&resource_ref, type_, reason, action, Some(note))
        .await;
}

/// Error policy for the controller
///
/// Fetch failures are retried after the short delay, everything else after
/// the regular interval.
pub fn error_policy(request: Arc<ImagePullSecret>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        namespace = %request.namespace().unwrap_or_default(),
        name = %request.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );

    ctx.config.requeue.action_for_error(error)
}
