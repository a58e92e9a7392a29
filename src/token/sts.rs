//! OAuth 2.0 token exchange (RFC 8693) against the Google security token service
//!
//! Trades the bound service account JWT for a federated access token scoped
//! to IAM, which is then used to impersonate the target service account.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use super::{describe_error_body, Token, TokenError, TokenSource, IAM_SCOPE};

/// Default security token service endpoint
pub const DEFAULT_STS_ENDPOINT: &str = "https://sts.googleapis.com/v1/token";

const GRANT_TYPE_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const TOKEN_TYPE_ACCESS_TOKEN: &str = "urn:ietf:params:oauth:token-type:access_token";
const TOKEN_TYPE_JWT: &str = "urn:ietf:params:oauth:token-type:jwt";

/// Form body of a token exchange request
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct TokenExchangeRequest {
    /// Workload identity pool provider audience
    pub audience: String,
    /// Always the token-exchange grant
    pub grant_type: String,
    /// Always an access token
    pub requested_token_type: String,
    /// Scope requested for the federated token
    pub scope: String,
    /// The bound service account token being exchanged
    pub subject_token: String,
    /// Always a JWT
    pub subject_token_type: String,
}

impl TokenExchangeRequest {
    /// Build a request with the fixed protocol constants
    pub fn new(audience: impl Into<String>, subject_token: impl Into<String>) -> Self {
        Self {
            audience: audience.into(),
            grant_type: GRANT_TYPE_TOKEN_EXCHANGE.to_string(),
            requested_token_type: TOKEN_TYPE_ACCESS_TOKEN.to_string(),
            scope: IAM_SCOPE.to_string(),
            subject_token: subject_token.into(),
            subject_token_type: TOKEN_TYPE_JWT.to_string(),
        }
    }
}

impl std::fmt::Debug for TokenExchangeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenExchangeRequest")
            .field("audience", &self.audience)
            .field("scope", &self.scope)
            .field("subject_token", &"redacted")
            .finish()
    }
}

/// Successful token exchange response
#[derive(Clone, Deserialize)]
pub struct TokenExchangeResponse {
    /// Federated access token
    pub access_token: String,
    /// Lifetime in seconds, when the service reports one
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl std::fmt::Debug for TokenExchangeResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenExchangeResponse")
            .field("access_token", &"redacted")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Performs token exchanges
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StsClient: Send + Sync {
    /// Send one exchange request
    async fn exchange(
        &self,
        request: &TokenExchangeRequest,
    ) -> Result<TokenExchangeResponse, TokenError>;
}

/// HTTP implementation of [`StsClient`]
pub struct StsHttpClient {
    http: Client,
    endpoint: String,
}

impl StsHttpClient {
    /// Create a client posting to `endpoint`
    pub fn new(http: Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl StsClient for StsHttpClient {
    async fn exchange(
        &self,
        request: &TokenExchangeRequest,
    ) -> Result<TokenExchangeResponse, TokenError> {
        let response = self
            .http
            .post(&self.endpoint)
            .form(request)
            .send()
            .await
            .map_err(|e| TokenError::exchange(&request.audience, None, e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            TokenError::exchange(&request.audience, Some(status.as_u16()), e.to_string())
        })?;

        if !status.is_success() {
            let message = describe_error_body(&body);
            warn!(
                status = %status,
                error = %message,
                audience = %request.audience,
                "token exchange rejected"
            );
            return Err(TokenError::exchange(
                &request.audience,
                Some(status.as_u16()),
                message,
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            TokenError::exchange(
                &request.audience,
                Some(status.as_u16()),
                format!("failed to parse exchange response: {}", e),
            )
        })
    }
}

/// Exchange `subject` for a federated token.
///
/// The expiry is measured from an instant captured just before the call. A
/// missing or zero `expires_in` means the federated token lives as long as
/// the subject token. A lifetime too large to represent is an exchange error.
pub async fn exchange_token(
    client: &dyn StsClient,
    audience: &str,
    subject: &Token,
    debug: bool,
) -> Result<Token, TokenError> {
    let request = TokenExchangeRequest::new(audience, subject.secret());

    if debug {
        match serde_json::to_string(&request) {
            Ok(json) => eprintln!("{}", json),
            Err(e) => warn!(error = %e, "failed to render token exchange request"),
        }
    }

    let now = Utc::now();
    let response = client.exchange(&request).await?;

    let expiry = match response.expires_in {
        Some(seconds) if seconds > 0 => Duration::try_seconds(seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                TokenError::exchange(
                    audience,
                    None,
                    format!("expires_in {} is out of range", seconds),
                )
            })?,
        _ => subject.expiry,
    };

    debug!(audience = %audience, expiry = %expiry, "exchanged service account token");

    Ok(Token::new(response.access_token, expiry))
}

/// Token source exchanging the tokens of an inner source
pub struct StsTokenSource {
    client: Arc<dyn StsClient>,
    audience: String,
    source: Box<dyn TokenSource>,
    debug: bool,
}

impl StsTokenSource {
    /// Create an exchanging source over `source`
    pub fn new(
        client: Arc<dyn StsClient>,
        audience: impl Into<String>,
        source: Box<dyn TokenSource>,
        debug: bool,
    ) -> Self {
        Self {
            client,
            audience: audience.into(),
            source,
            debug,
        }
    }
}

#[async_trait]
impl TokenSource for StsTokenSource {
    async fn token(&self) -> Result<Token, TokenError> {
        let subject = self.source.token().await?;
        exchange_token(self.client.as_ref(), &self.audience, &subject, self.debug).await
    }
}
