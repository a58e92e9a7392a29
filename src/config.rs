//! Runtime configuration for federation passes
//!
//! Built once in `main` from the command line and shared read-only through
//! the controller context.

use std::time::Duration;

use crate::requeue::RequeuePolicy;
use crate::token::{
    DEFAULT_IAM_CREDENTIALS_ENDPOINT, DEFAULT_STS_ENDPOINT, DEFAULT_TOKEN_INFO_ENDPOINT,
};

/// Default timeout applied to every outbound HTTP request
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings shared by every federation pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FederationConfig {
    /// Echo outbound token exchange requests to stderr
    pub debug: bool,
    /// Security token service endpoint
    pub sts_endpoint: String,
    /// Base URL of the IAM credentials service account collection
    pub iam_credentials_endpoint: String,
    /// Token info endpoint used for introspection
    pub token_info_endpoint: String,
    /// Query the token info endpoint before materializing the credential
    pub introspect: bool,
    /// Timeout for each outbound HTTP request
    pub http_timeout: Duration,
    /// Requeue schedule
    pub requeue: RequeuePolicy,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            debug: false,
            sts_endpoint: DEFAULT_STS_ENDPOINT.to_string(),
            iam_credentials_endpoint: DEFAULT_IAM_CREDENTIALS_ENDPOINT.to_string(),
            token_info_endpoint: DEFAULT_TOKEN_INFO_ENDPOINT.to_string(),
            introspect: true,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            requeue: RequeuePolicy::default(),
        }
    }
}

impl FederationConfig {
    /// Build the shared HTTP client honouring the configured timeout
    pub fn http_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .timeout(self.http_timeout)
            .user_agent(concat!("pull-secret-federator/", env!("CARGO_PKG_VERSION")))
            .build()
    }
}
