//! ImagePullSecret Custom Resource Definition
//!
//! An `ImagePullSecret` asks the controller to keep a registry credential
//! Secret in its namespace filled with an access token for a Google service
//! account, obtained by federating the named Kubernetes service account.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Prefix turning a workload identity pool provider resource into an audience
pub const IAM_AUDIENCE_PREFIX: &str = "//iam.googleapis.com/";

/// Specification for an ImagePullSecret
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "pullsecrets.dev",
    version = "v1alpha1",
    kind = "ImagePullSecret",
    plural = "imagepullsecrets",
    shortname = "ips",
    status = "ImagePullSecretStatus",
    namespaced,
    printcolumn = r#"{"name":"Secret","type":"string","jsonPath":".spec.secretName"}"#,
    printcolumn = r#"{"name":"ServiceAccount","type":"string","jsonPath":".spec.serviceAccountName"}"#,
    printcolumn = r#"{"name":"Target","type":"string","jsonPath":".spec.gsaEmail","priority":1}"#,
    printcolumn = r#"{"name":"Expires","type":"date","jsonPath":".status.expiresAt"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ImagePullSecretSpec {
    /// Google service account to impersonate
    /// (e.g. `deployer@proj.iam.gserviceaccount.com`)
    pub gsa_email: String,

    /// Kubernetes service account in this namespace whose identity is federated
    pub service_account_name: String,

    /// Workload identity pool provider, either as a resource name
    /// (`projects/<n>/locations/global/workloadIdentityPools/<pool>/providers/<provider>`)
    /// or already prefixed with `//iam.googleapis.com/`
    pub workload_identity_pool_provider: String,

    /// Name of the `kubernetes.io/dockerconfigjson` Secret to maintain
    pub secret_name: String,
}

impl ImagePullSecretSpec {
    /// Audience the service account token is bound to
    pub fn audience(&self) -> String {
        let provider = self.workload_identity_pool_provider.trim();
        if provider.starts_with("//") {
            provider.to_string()
        } else {
            format!("{}{}", IAM_AUDIENCE_PREFIX, provider.trim_start_matches('/'))
        }
    }

    /// Reject specs that cannot possibly federate.
    ///
    /// `key` is the `namespace/name` of the object, used in the error.
    pub fn validate(&self, key: &str) -> Result<(), Error> {
        let required = [
            ("gsaEmail", &self.gsa_email),
            ("serviceAccountName", &self.service_account_name),
            ("workloadIdentityPoolProvider", &self.workload_identity_pool_provider),
            ("secretName", &self.secret_name),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(Error::validation_for(
                    key,
                    format!("{} must not be empty", field),
                ));
            }
        }

        if !self.gsa_email.contains('@') {
            return Err(Error::validation_for(
                key,
                format!("gsaEmail '{}' is not an email address", self.gsa_email),
            ));
        }

        // The email becomes a path segment of the impersonation URL
        if !self
            .gsa_email
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '@' | '-'))
        {
            return Err(Error::validation_for(
                key,
                format!(
                    "gsaEmail '{}' contains characters not allowed in a service account email",
                    self.gsa_email
                ),
            ));
        }

        let resource = self
            .audience()
            .trim_start_matches(IAM_AUDIENCE_PREFIX)
            .to_string();
        if !resource.starts_with("projects/") {
            return Err(Error::validation_for(
                key,
                format!(
                    "workloadIdentityPoolProvider '{}' is not a provider resource name",
                    self.workload_identity_pool_provider
                ),
            ));
        }

        Ok(())
    }
}

/// Status for an ImagePullSecret
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImagePullSecretStatus {
    /// Expiry of the access token currently stored in the Secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ImagePullSecretStatus {
    /// Status recording a credential that expires at `expires_at`
    pub fn expiring_at(expires_at: DateTime<Utc>) -> Self {
        Self {
            expires_at: Some(expires_at),
        }
    }
}
