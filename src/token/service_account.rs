//! Bound service account tokens from the TokenRequest API
//!
//! The first hop of the chain: the API server mints a short-lived JWT for a
//! service account, bound to the workload identity pool provider audience.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::authentication::v1::{TokenRequest, TokenRequestSpec};
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::api::{Api, PostParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use super::{Token, TokenError, TokenSource};

/// Issues bound tokens for service accounts
///
/// This trait allows mocking the `serviceaccounts/token` subresource in
/// tests while using the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ServiceAccountTokenRequester: Send + Sync {
    /// Request a token for `namespace/name` valid for the given audiences
    async fn create_token(
        &self,
        namespace: &str,
        name: &str,
        audiences: &[String],
    ) -> Result<Token, TokenError>;
}

/// Real implementation backed by the Kubernetes API
pub struct KubeServiceAccountTokens {
    client: Client,
}

impl KubeServiceAccountTokens {
    /// Create a requester wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ServiceAccountTokenRequester for KubeServiceAccountTokens {
    async fn create_token(
        &self,
        namespace: &str,
        name: &str,
        audiences: &[String],
    ) -> Result<Token, TokenError> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let request = TokenRequest {
            spec: TokenRequestSpec {
                audiences: audiences.to_vec(),
                ..Default::default()
            },
            ..Default::default()
        };

        let response = api
            .create_token_request(name, &PostParams::default(), &request)
            .await
            .map_err(|e| TokenError::issuance(namespace, name, e.to_string()))?;

        let status = response.status.ok_or_else(|| {
            TokenError::issuance(namespace, name, "token request returned no status")
        })?;

        debug!(
            namespace = %namespace,
            service_account = %name,
            expiry = %status.expiration_timestamp.0,
            "issued bound service account token"
        );

        Ok(Token::new(status.token, status.expiration_timestamp.0))
    }
}

/// Token source yielding bound tokens for one service account
pub struct ServiceAccountTokenSource {
    requester: Arc<dyn ServiceAccountTokenRequester>,
    namespace: String,
    name: String,
    audiences: Vec<String>,
}

impl ServiceAccountTokenSource {
    /// Create a source for `namespace/name` scoped to `audiences`
    pub fn new(
        requester: Arc<dyn ServiceAccountTokenRequester>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        audiences: Vec<String>,
    ) -> Self {
        Self {
            requester,
            namespace: namespace.into(),
            name: name.into(),
            audiences,
        }
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokenSource {
    async fn token(&self) -> Result<Token, TokenError> {
        self.requester
            .create_token(&self.namespace, &self.name, &self.audiences)
            .await
    }
}
