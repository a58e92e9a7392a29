//! Registry credential materialization
//!
//! Renders an access token into a docker `config.json` style document that
//! authenticates against every Google container registry host, and writes it
//! to a `kubernetes.io/dockerconfigjson` Secret.

mod store;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use serde::{Deserialize, Serialize};

use crate::token::Token;
use crate::Error;

pub use store::{upsert, KubeSecretStore, SecretStore, StoreError, UpsertOutcome};

#[cfg(test)]
pub use store::MockSecretStore;

/// Username Google registries expect alongside an OAuth access token
pub const OAUTH_USERNAME: &str = "oauth2accesstoken";

/// Secret type understood by the kubelet for image pulls
pub const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";

/// Data key holding the rendered document
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

/// Label marking Secrets written by this controller
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY_VALUE: &str = "pull-secret-federator";

/// Every registry host the credential is valid for.
///
/// Container Registry hosts first, then the Artifact Registry locations.
pub const REGISTRY_HOSTS: [&str; 31] = [
    "gcr.io",
    "asia.gcr.io",
    "eu.gcr.io",
    "us.gcr.io",
    "asia-docker.pkg.dev",
    "asia-east1-docker.pkg.dev",
    "asia-east2-docker.pkg.dev",
    "asia-northeast1-docker.pkg.dev",
    "asia-northeast2-docker.pkg.dev",
    "asia-northeast3-docker.pkg.dev",
    "asia-south1-docker.pkg.dev",
    "asia-southeast1-docker.pkg.dev",
    "asia-southeast2-docker.pkg.dev",
    "australia-southeast1-docker.pkg.dev",
    "europe-docker.pkg.dev",
    "europe-north1-docker.pkg.dev",
    "europe-west1-docker.pkg.dev",
    "europe-west2-docker.pkg.dev",
    "europe-west3-docker.pkg.dev",
    "europe-west4-docker.pkg.dev",
    "europe-west6-docker.pkg.dev",
    "northamerica-northeast1-docker.pkg.dev",
    "southamerica-east1-docker.pkg.dev",
    "us-docker.pkg.dev",
    "us-central1-docker.pkg.dev",
    "us-east1-docker.pkg.dev",
    "us-east4-docker.pkg.dev",
    "us-west1-docker.pkg.dev",
    "us-west2-docker.pkg.dev",
    "us-west3-docker.pkg.dev",
    "us-west4-docker.pkg.dev",
];

/// Credentials for one registry host
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryAuth {
    /// Always [`OAUTH_USERNAME`]
    pub username: String,
    /// The access token
    pub password: String,
    /// Email of the impersonated service account
    pub email: String,
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &"redacted")
            .field("email", &self.email)
            .finish()
    }
}

/// The `.dockerconfigjson` document
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialDocument {
    /// Registry host to credentials
    pub auths: BTreeMap<String, RegistryAuth>,
}

impl CredentialDocument {
    /// Build the document for `email` authenticating with `token` on every
    /// host in [`REGISTRY_HOSTS`]
    pub fn render(email: &str, token: &Token) -> Self {
        let auths = REGISTRY_HOSTS
            .iter()
            .map(|host| {
                (
                    host.to_string(),
                    RegistryAuth {
                        username: OAUTH_USERNAME.to_string(),
                        password: token.secret().to_string(),
                        email: email.to_string(),
                    },
                )
            })
            .collect();
        Self { auths }
    }

    /// Serialize to the bytes stored under [`DOCKER_CONFIG_JSON_KEY`]
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(self).map_err(|e| {
            Error::serialization(format!("failed to encode registry credentials: {}", e))
        })
    }
}

/// Build the Secret carrying `document` as `namespace/name`
pub fn build_secret(
    namespace: &str,
    name: &str,
    document: &CredentialDocument,
) -> Result<Secret, Error> {
    let data = BTreeMap::from([(
        DOCKER_CONFIG_JSON_KEY.to_string(),
        ByteString(document.to_bytes()?),
    )]);

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                MANAGED_BY_LABEL.to_string(),
                MANAGED_BY_VALUE.to_string(),
            )])),
            ..Default::default()
        },
        type_: Some(DOCKER_CONFIG_JSON_TYPE.to_string()),
        data: Some(data),
        ..Default::default()
    })
}
