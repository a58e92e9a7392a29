//! Create-or-replace persistence of credential Secrets

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, PostParams};
use kube::Client;
use thiserror::Error;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use super::{build_secret, CredentialDocument};
use crate::Error;

/// Failure of a single Secret write
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A Secret with that name already exists
    #[error("secret already exists")]
    AlreadyExists,
    /// The Secret to replace does not exist
    #[error("secret not found")]
    NotFound,
    /// The API server rejected the request
    #[error("API error ({code}): {message}")]
    Api {
        /// HTTP status code
        code: u16,
        /// Server-provided message
        message: String,
    },
    /// The request never got an answer
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<kube::Error> for StoreError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(ae) if ae.code == 409 => StoreError::AlreadyExists,
            kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound,
            kube::Error::Api(ae) => StoreError::Api {
                code: ae.code,
                message: ae.message,
            },
            other => StoreError::Transport(other.to_string()),
        }
    }
}

/// Writes Secrets
///
/// This trait allows mocking the Secret API in tests while using the real
/// client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Create `secret`; fails with [`StoreError::AlreadyExists`] if present
    async fn create(&self, secret: &Secret) -> Result<(), StoreError>;

    /// Overwrite the existing Secret of the same name with `secret`
    async fn replace(&self, secret: &Secret) -> Result<(), StoreError>;
}

/// Real implementation backed by the Kubernetes API
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    /// Create a store wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api_for(&self, secret: &Secret) -> Api<Secret> {
        match secret.metadata.namespace.as_deref() {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::default_namespaced(self.client.clone()),
        }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn create(&self, secret: &Secret) -> Result<(), StoreError> {
        self.api_for(secret)
            .create(&PostParams::default(), secret)
            .await?;
        Ok(())
    }

    async fn replace(&self, secret: &Secret) -> Result<(), StoreError> {
        let name = secret.metadata.name.as_deref().unwrap_or_default();
        self.api_for(secret)
            .replace(name, &PostParams::default(), secret)
            .await?;
        Ok(())
    }
}

/// Which write path an upsert took
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The Secret did not exist and was created
    Created,
    /// The Secret existed and was overwritten
    Replaced,
}

/// Write `document` to the Secret `namespace/name`.
///
/// Tries a create first and falls back to a full replace when the Secret
/// already exists; the current contents are never read. A Secret deleted
/// between the two calls surfaces as a persist error for the next pass.
pub async fn upsert(
    store: &dyn SecretStore,
    namespace: &str,
    name: &str,
    document: &CredentialDocument,
) -> Result<UpsertOutcome, Error> {
    let secret = build_secret(namespace, name, document)?;

    match store.create(&secret).await {
        Ok(()) => {
            info!(namespace = %namespace, secret = %name, "created registry credential secret");
            Ok(UpsertOutcome::Created)
        }
        Err(StoreError::AlreadyExists) => {
            debug!(namespace = %namespace, secret = %name, "secret exists, replacing");
            store
                .replace(&secret)
                .await
                .map_err(|e| Error::persist(namespace, name, format!("replace failed: {}", e)))?;
            info!(namespace = %namespace, secret = %name, "replaced registry credential secret");
            Ok(UpsertOutcome::Replaced)
        }
        Err(e) => Err(Error::persist(
            namespace,
            name,
            format!("create failed: {}", e),
        )),
    }
}
