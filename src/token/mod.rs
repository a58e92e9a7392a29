//! Token sources for the federation chain
//!
//! The chain turns a Kubernetes service account into an impersonated Google
//! service account access token:
//!
//! 1. [`ServiceAccountTokenSource`] - bound, audience-scoped service account token
//! 2. [`StsTokenSource`] - RFC 8693 exchange for a federated access token
//! 3. [`ImpersonatedTokenSource`] - access token for the target service account
//! 4. [`ReuseTokenSource`] - caches the last token until it expires
//!
//! Every stage implements [`TokenSource`] and holds the previous stage, so a
//! single `token()` call on the outermost source walks the whole chain.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use zeroize::Zeroizing;

mod impersonate;
mod reuse;
mod service_account;
mod sts;
mod token_info;

pub use impersonate::{
    impersonate, GenerateAccessTokenResponse, IamCredentialsClient, IamCredentialsHttpClient,
    ImpersonatedTokenSource, DEFAULT_IAM_CREDENTIALS_ENDPOINT,
};
pub use reuse::ReuseTokenSource;
pub use service_account::{
    KubeServiceAccountTokens, ServiceAccountTokenRequester, ServiceAccountTokenSource,
};
pub use sts::{
    exchange_token, StsClient, StsHttpClient, StsTokenSource, TokenExchangeRequest,
    TokenExchangeResponse, DEFAULT_STS_ENDPOINT,
};
pub use token_info::{TokenInfoClient, TokenInfoHttpClient, DEFAULT_TOKEN_INFO_ENDPOINT};

#[cfg(test)]
pub use impersonate::MockIamCredentialsClient;
#[cfg(test)]
pub use service_account::MockServiceAccountTokenRequester;
#[cfg(test)]
pub use sts::MockStsClient;
#[cfg(test)]
pub use token_info::MockTokenInfoClient;

/// OAuth scope granting full access to Google Cloud APIs
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// OAuth scope exposing the identity's email address
pub const USERINFO_EMAIL_SCOPE: &str = "https://www.googleapis.com/auth/userinfo.email";

/// OAuth scope requested for the federated token (IAM administration)
pub const IAM_SCOPE: &str = "https://www.googleapis.com/auth/iam";

/// An access token and the instant it stops being valid
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    /// Opaque bearer value, wiped from memory on drop
    pub access_token: Zeroizing<String>,
    /// Expiry as reported (or inherited) by the issuing hop
    pub expiry: DateTime<Utc>,
}

impl Token {
    /// Create a token from its bearer value and expiry
    pub fn new(access_token: impl Into<String>, expiry: DateTime<Utc>) -> Self {
        Self {
            access_token: Zeroizing::new(access_token.into()),
            expiry,
        }
    }

    /// Bearer value as a string slice
    pub fn secret(&self) -> &str {
        self.access_token.as_str()
    }

    /// True once the wall clock has reached the expiry
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// True if the token is no longer valid at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"redacted")
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Anything that can produce an access token on demand
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Produce a token, acquiring a fresh one if the source has to
    async fn token(&self) -> Result<Token, TokenError>;
}

#[async_trait]
impl<T: TokenSource + ?Sized> TokenSource for Box<T> {
    async fn token(&self) -> Result<Token, TokenError> {
        (**self).token().await
    }
}

/// Failure of one hop in the federation chain
#[derive(Debug, Error)]
pub enum TokenError {
    /// The API server refused or failed to issue a service account token
    #[error("service account token request for {namespace}/{name} failed: {message}")]
    Issuance {
        /// Namespace of the service account
        namespace: String,
        /// Name of the service account
        name: String,
        /// Description of what failed
        message: String,
    },

    /// The security token service rejected the exchange or was unreachable
    #[error("token exchange with {audience} failed{}: {message}", status_suffix(.status))]
    Exchange {
        /// Workload identity pool provider audience
        audience: String,
        /// HTTP status, when a response was received
        status: Option<u16>,
        /// Description of what failed
        message: String,
    },

    /// The IAM credentials service refused to mint a token for the target
    #[error("impersonation of {target} failed{}: {message}", status_suffix(.status))]
    Impersonation {
        /// Target service account email
        target: String,
        /// HTTP status, when a response was received
        status: Option<u16>,
        /// Description of what failed
        message: String,
    },

    /// The diagnostic token introspection call failed
    #[error("token introspection failed{}: {message}", status_suffix(.status))]
    Introspection {
        /// HTTP status, when a response was received
        status: Option<u16>,
        /// Description of what failed
        message: String,
    },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl TokenError {
    /// Create an issuance error for a service account
    pub fn issuance(
        namespace: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Issuance {
            namespace: namespace.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create an exchange error
    pub fn exchange(
        audience: impl Into<String>,
        status: Option<u16>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Exchange {
            audience: audience.into(),
            status,
            message: msg.into(),
        }
    }

    /// Create an impersonation error
    pub fn impersonation(
        target: impl Into<String>,
        status: Option<u16>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Impersonation {
            target: target.into(),
            status,
            message: msg.into(),
        }
    }

    /// Create an introspection error
    pub fn introspection(status: Option<u16>, msg: impl Into<String>) -> Self {
        Self::Introspection {
            status,
            message: msg.into(),
        }
    }
}

/// Error body shapes returned by Google APIs.
///
/// The token endpoint answers with OAuth-style `error`/`error_description`
/// pairs, the IAM credentials API with a nested `error` object.
#[derive(Debug, serde::Deserialize)]
#[serde(untagged)]
enum GoogleErrorBody {
    Rpc { error: RpcStatus },
    OAuth {
        error: String,
        #[serde(default)]
        error_description: Option<String>,
    },
}

#[derive(Debug, serde::Deserialize)]
struct RpcStatus {
    #[serde(default)]
    status: Option<String>,
    message: String,
}

/// Turn a non-success response body into a readable message
pub(crate) fn describe_error_body(body: &str) -> String {
    match serde_json::from_str::<GoogleErrorBody>(body) {
        Ok(GoogleErrorBody::Rpc { error }) => match error.status {
            Some(status) => format!("{status}: {}", error.message),
            None => error.message,
        },
        Ok(GoogleErrorBody::OAuth {
            error,
            error_description: Some(description),
        }) => format!("{error}: {description}"),
        Ok(GoogleErrorBody::OAuth { error, .. }) => error,
        Err(_) => body.trim().to_string(),
    }
}
