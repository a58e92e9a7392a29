//! Service account impersonation through the IAM credentials API

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use super::{
    describe_error_body, Token, TokenError, TokenSource, CLOUD_PLATFORM_SCOPE,
    USERINFO_EMAIL_SCOPE,
};

/// Default base of the IAM credentials service account collection
pub const DEFAULT_IAM_CREDENTIALS_ENDPOINT: &str =
    "https://iamcredentials.googleapis.com/v1/projects/-/serviceAccounts";

#[derive(Debug, Serialize)]
struct GenerateAccessTokenRequest<'a> {
    scope: &'a [String],
}

/// Successful `generateAccessToken` response
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateAccessTokenResponse {
    /// Access token for the target service account
    pub access_token: String,
    /// RFC 3339 expiry of the access token
    pub expire_time: DateTime<Utc>,
}

impl std::fmt::Debug for GenerateAccessTokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerateAccessTokenResponse")
            .field("access_token", &"redacted")
            .field("expire_time", &self.expire_time)
            .finish()
    }
}

/// Mints access tokens for a target service account
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IamCredentialsClient: Send + Sync {
    /// Call `generateAccessToken` for `target`, authenticated with `bearer`
    async fn generate_access_token(
        &self,
        target: &str,
        scopes: &[String],
        bearer: &Token,
    ) -> Result<GenerateAccessTokenResponse, TokenError>;
}

/// HTTP implementation of [`IamCredentialsClient`]
pub struct IamCredentialsHttpClient {
    http: Client,
    endpoint_base: String,
}

impl IamCredentialsHttpClient {
    /// Create a client rooted at `endpoint_base` (the service account collection)
    pub fn new(http: Client, endpoint_base: impl Into<String>) -> Self {
        Self {
            http,
            endpoint_base: endpoint_base.into(),
        }
    }
}

#[async_trait]
impl IamCredentialsClient for IamCredentialsHttpClient {
    async fn generate_access_token(
        &self,
        target: &str,
        scopes: &[String],
        bearer: &Token,
    ) -> Result<GenerateAccessTokenResponse, TokenError> {
        let endpoint = format!(
            "{}/{}:generateAccessToken",
            self.endpoint_base.trim_end_matches('/'),
            target
        );

        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(bearer.secret())
            .json(&GenerateAccessTokenRequest { scope: scopes })
            .send()
            .await
            .map_err(|e| TokenError::impersonation(target, None, e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            TokenError::impersonation(target, Some(status.as_u16()), e.to_string())
        })?;

        if !status.is_success() {
            let message = describe_error_body(&body);
            warn!(
                status = %status,
                error = %message,
                service_account = %target,
                "service account impersonation failed"
            );
            return Err(TokenError::impersonation(
                target,
                Some(status.as_u16()),
                message,
            ));
        }

        serde_json::from_str(&body).map_err(|e| {
            TokenError::impersonation(
                target,
                Some(status.as_u16()),
                format!("failed to parse impersonation response: {}", e),
            )
        })
    }
}

fn default_scopes() -> Vec<String> {
    vec![
        CLOUD_PLATFORM_SCOPE.to_string(),
        USERINFO_EMAIL_SCOPE.to_string(),
    ]
}

/// Impersonate `target` using `source` as the bearer credential.
///
/// An empty scope list requests the cloud-platform and userinfo.email scopes.
pub async fn impersonate(
    client: &dyn IamCredentialsClient,
    target: &str,
    source: &Token,
    scopes: &[String],
) -> Result<Token, TokenError> {
    let effective;
    let scopes = if scopes.is_empty() {
        effective = default_scopes();
        effective.as_slice()
    } else {
        scopes
    };

    let response = client.generate_access_token(target, scopes, source).await?;

    debug!(
        service_account = %target,
        expiry = %response.expire_time,
        "impersonated service account"
    );

    Ok(Token::new(response.access_token, response.expire_time))
}

/// Token source impersonating a service account with the tokens of an inner source
pub struct ImpersonatedTokenSource {
    client: Arc<dyn IamCredentialsClient>,
    target: String,
    scopes: Vec<String>,
    source: Box<dyn TokenSource>,
}

impl ImpersonatedTokenSource {
    /// Create an impersonating source; empty `scopes` selects the defaults
    pub fn new(
        client: Arc<dyn IamCredentialsClient>,
        target: impl Into<String>,
        scopes: Vec<String>,
        source: Box<dyn TokenSource>,
    ) -> Self {
        Self {
            client,
            target: target.into(),
            scopes,
            source,
        }
    }
}

#[async_trait]
impl TokenSource for ImpersonatedTokenSource {
    async fn token(&self) -> Result<Token, TokenError> {
        let federated = self.source.token().await?;
        impersonate(self.client.as_ref(), &self.target, &federated, &self.scopes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    const TARGET: &str = "deployer@proj.iam.gserviceaccount.com";

    #[test]
    fn parses_camel_case_response() {
        let body = r#"{"accessToken":"ya29.c.abc","expireTime":"2026-10-19T12:00:00Z"}"#;
        let response: GenerateAccessTokenResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.access_token, "ya29.c.abc");
        assert_eq!(
            response.expire_time,
            Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn empty_scopes_request_defaults() {
        let expiry = Utc::now() + Duration::hours(1);
        let mut client = MockIamCredentialsClient::new();
        client
            .expect_generate_access_token()
            .withf(|target, scopes, bearer| {
                target == TARGET
                    && scopes == default_scopes().as_slice()
                    && bearer.secret() == "federated"
            })
            .times(1)
            .returning(move |_, _, _| {
                Ok(GenerateAccessTokenResponse {
                    access_token: "ya29.impersonated".to_string(),
                    expire_time: expiry,
                })
            });

        let source = Token::new("federated", Utc::now() + Duration::minutes(10));
        let token = impersonate(&client, TARGET, &source, &[])
            .await
            .expect("impersonation should succeed");

        assert_eq!(token.secret(), "ya29.impersonated");
        assert_eq!(token.expiry, expiry);
    }

    #[tokio::test]
    async fn explicit_scopes_are_passed_through() {
        let mut client = MockIamCredentialsClient::new();
        client
            .expect_generate_access_token()
            .withf(|_, scopes, _| scopes == [CLOUD_PLATFORM_SCOPE.to_string()])
            .times(1)
            .returning(|_, _, _| {
                Ok(GenerateAccessTokenResponse {
                    access_token: "ya29.narrow".to_string(),
                    expire_time: Utc::now() + Duration::hours(1),
                })
            });

        let source = Token::new("federated", Utc::now());
        let token = impersonate(
            &client,
            TARGET,
            &source,
            &[CLOUD_PLATFORM_SCOPE.to_string()],
        )
        .await
        .expect("impersonation should succeed");
        assert_eq!(token.secret(), "ya29.narrow");
    }

    #[tokio::test]
    async fn denial_is_an_impersonation_error() {
        let mut client = MockIamCredentialsClient::new();
        client.expect_generate_access_token().returning(|target, _, _| {
            Err(TokenError::impersonation(
                target,
                Some(403),
                "PERMISSION_DENIED: Permission 'iam.serviceAccounts.getAccessToken' denied",
            ))
        });

        let source = Token::new("federated", Utc::now());
        let err = impersonate(&client, TARGET, &source, &[]).await.unwrap_err();
        assert!(matches!(
            err,
            TokenError::Impersonation {
                status: Some(403),
                ..
            }
        ));
        assert!(err.to_string().contains(TARGET));
    }
}
