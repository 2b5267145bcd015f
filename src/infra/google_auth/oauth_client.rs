use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::core::auth::{expiry_after, AuthError, Credential, TokenRefresher};

pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Response from Google's token endpoint.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Space-delimited scopes actually granted.
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenResponse {
    /// Granted scopes, or `fallback` when the endpoint didn't say.
    pub fn granted_scopes(&self, fallback: &[String]) -> Vec<String> {
        match self.scope.as_deref() {
            Some(scope) if !scope.trim().is_empty() => {
                scope.split_whitespace().map(str::to_string).collect()
            }
            _ => fallback.to_vec(),
        }
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expires_in.and_then(expiry_after)
    }
}

/// Talks to the OAuth token endpoint: refresh-token, authorization-code and
/// JWT-bearer grants.
#[derive(Debug, Clone)]
pub struct GoogleOAuthClient {
    client: Client,
    default_token_uri: String,
}

impl GoogleOAuthClient {
    pub fn new() -> Self {
        Self::with_token_uri(GOOGLE_TOKEN_URI)
    }

    /// Points grants at a different token endpoint when a credential doesn't name one.
    pub fn with_token_uri(token_uri: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            default_token_uri: token_uri.into(),
        }
    }

    pub fn default_token_uri(&self) -> &str {
        &self.default_token_uri
    }

    pub async fn refresh_grant(
        &self,
        token_uri: &str,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<TokenResponse, String> {
        self.post_form(
            token_uri,
            &[
                ("grant_type", "refresh_token"),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("refresh_token", refresh_token),
            ],
        )
        .await
    }

    pub async fn exchange_code(
        &self,
        token_uri: &str,
        client_id: &str,
        client_secret: &str,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, String> {
        self.post_form(
            token_uri,
            &[
                ("grant_type", "authorization_code"),
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("code_verifier", code_verifier),
            ],
        )
        .await
    }

    pub async fn jwt_bearer_grant(
        &self,
        token_uri: &str,
        assertion: &str,
    ) -> Result<TokenResponse, String> {
        self.post_form(
            token_uri,
            &[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion),
            ],
        )
        .await
    }

    async fn post_form(
        &self,
        token_uri: &str,
        form: &[(&str, &str)],
    ) -> Result<TokenResponse, String> {
        let response = self
            .client
            .post(token_uri)
            .form(form)
            .send()
            .await
            .map_err(|e| format!("Token request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(format!("Token exchange failed ({}): {}", status, text));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| format!("Could not parse token response: {}", e))
    }
}

impl Default for GoogleOAuthClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenRefresher for GoogleOAuthClient {
    async fn refresh(&self, credential: &Credential) -> Result<Credential, AuthError> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::Refresh("credential has no refresh token".to_string()))?;
        let client_id = credential
            .client_id
            .as_deref()
            .ok_or_else(|| AuthError::Refresh("credential has no client_id".to_string()))?;
        let client_secret = credential.client_secret.as_deref().unwrap_or_default();
        let token_uri = credential
            .token_uri
            .as_deref()
            .unwrap_or(&self.default_token_uri);

        let response = self
            .refresh_grant(token_uri, client_id, client_secret, refresh_token)
            .await
            .map_err(AuthError::Refresh)?;

        tracing::info!(
            "Token refreshed, valid for {} seconds",
            response.expires_in.unwrap_or_default()
        );

        Ok(Credential {
            access_token: response.access_token.clone(),
            refresh_token: response
                .refresh_token
                .clone()
                .or_else(|| credential.refresh_token.clone()),
            token_uri: Some(token_uri.to_string()),
            client_id: credential.client_id.clone(),
            client_secret: credential.client_secret.clone(),
            scopes: response.granted_scopes(&credential.scopes),
            expiry: response.expiry(),
        })
    }
}
