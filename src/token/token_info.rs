//! Diagnostic token introspection

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

#[cfg(test)]
use mockall::automock;

use super::{describe_error_body, Token, TokenError};

/// Default Google token info endpoint
pub const DEFAULT_TOKEN_INFO_ENDPOINT: &str = "https://www.googleapis.com/oauth2/v1/tokeninfo";

/// Looks up what an access token grants
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TokenInfoClient: Send + Sync {
    /// Return the raw token info document for `token`
    async fn token_info(&self, token: &Token) -> Result<Value, TokenError>;
}

/// HTTP implementation of [`TokenInfoClient`]
pub struct TokenInfoHttpClient {
    http: Client,
    endpoint: String,
}

impl TokenInfoHttpClient {
    /// Create a client posting to `endpoint`
    pub fn new(http: Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl TokenInfoClient for TokenInfoHttpClient {
    async fn token_info(&self, token: &Token) -> Result<Value, TokenError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(token.secret())
            .send()
            .await
            .map_err(|e| TokenError::introspection(None, e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TokenError::introspection(Some(status.as_u16()), e.to_string()))?;

        if !status.is_success() {
            return Err(TokenError::introspection(
                Some(status.as_u16()),
                describe_error_body(&body),
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            TokenError::introspection(
                Some(status.as_u16()),
                format!("failed to parse token info: {}", e),
            )
        })
    }
}
