// =============================================================================
// INSTALLED APPLICATION FLOW
// =============================================================================
//
// Browser-based OAuth consent for desktop clients:
//
// 1. Read the client secret file downloaded from Google Cloud Console
// 2. Bind a loopback listener on an ephemeral port
// 3. Open the consent page (PKCE + state, offline access)
// 4. Wait for Google to redirect back with `?code=...`
// 5. Exchange the code at the token endpoint

use std::path::Path;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

use super::oauth_client::{GoogleOAuthClient, GOOGLE_TOKEN_URI};
use crate::core::auth::{AuthError, Credential, InteractiveAuthorizer, ScopeSet};

const GOOGLE_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";

const SUCCESS_PAGE: &str = "<html><body><h1>Authorization complete</h1>\
<p>You can close this window and return to the application.</p></body></html>";
const FAILURE_PAGE: &str = "<html><body><h1>Authorization failed</h1>\
<p>Check the application logs for details.</p></body></html>";

/// Client secret file, as downloaded from Cloud Console.
#[derive(Debug, Deserialize)]
struct ClientSecretFile {
    #[serde(default)]
    installed: Option<ClientSecret>,
    #[serde(default)]
    web: Option<ClientSecret>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub auth_uri: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl ClientSecret {
    pub fn parse(text: &str) -> Result<Self, AuthError> {
        let file: ClientSecretFile = serde_json::from_str(text)
            .map_err(|e| AuthError::AuthFlow(format!("invalid client secret file: {}", e)))?;
        file.installed.or(file.web).ok_or_else(|| {
            AuthError::AuthFlow(
                "client secret file has neither an \"installed\" nor a \"web\" section".to_string(),
            )
        })
    }

    fn auth_uri(&self) -> &str {
        self.auth_uri.as_deref().unwrap_or(GOOGLE_AUTH_URI)
    }

    fn token_uri(&self) -> &str {
        self.token_uri.as_deref().unwrap_or(GOOGLE_TOKEN_URI)
    }
}

/// PKCE verifier and its S256 challenge.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

impl PkceChallenge {
    pub fn generate() -> Self {
        let verifier = random_token(32);
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
        }
    }
}

fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// What the browser brought back to the loopback listener.
#[derive(Debug, PartialEq)]
pub enum CallbackOutcome {
    Code { code: String, state: Option<String> },
    Denied(String),
    /// Favicon and other stray requests.
    Ignored,
}

/// Parses the request line of an HTTP request hitting the loopback listener.
pub fn parse_callback(request: &str) -> CallbackOutcome {
    let target = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/");

    let Ok(url) = Url::parse(&format!("http://localhost{}", target)) else {
        return CallbackOutcome::Ignored;
    };

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return CallbackOutcome::Denied(error);
    }
    match code {
        Some(code) => CallbackOutcome::Code { code, state },
        None => CallbackOutcome::Ignored,
    }
}

/// Builds the consent page URL.
pub fn authorization_url(
    secret: &ClientSecret,
    redirect_uri: &str,
    scopes: &ScopeSet,
    state: &str,
    code_challenge: &str,
) -> Result<Url, AuthError> {
    Url::parse_with_params(
        secret.auth_uri(),
        &[
            ("response_type", "code"),
            ("client_id", secret.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("scope", scopes.to_space_delimited().as_str()),
            ("state", state),
            ("code_challenge", code_challenge),
            ("code_challenge_method", "S256"),
            ("access_type", "offline"),
            ("prompt", "consent"),
        ],
    )
    .map_err(|e| AuthError::AuthFlow(format!("invalid auth uri: {}", e)))
}

/// Runs the installed-application consent flow on a local loopback port.
#[derive(Debug, Clone)]
pub struct InstalledAppFlow {
    oauth: GoogleOAuthClient,
}

impl InstalledAppFlow {
    pub fn new(oauth: GoogleOAuthClient) -> Self {
        Self { oauth }
    }

    async fn wait_for_code(
        &self,
        listener: &TcpListener,
        expected_state: &str,
    ) -> Result<String, AuthError> {
        loop {
            let (mut stream, _) = listener
                .accept()
                .await
                .map_err(|e| AuthError::AuthFlow(format!("callback listener failed: {}", e)))?;

            let mut buffer = vec![0u8; 4096];
            let read = stream
                .read(&mut buffer)
                .await
                .map_err(|e| AuthError::AuthFlow(format!("failed to read callback: {}", e)))?;
            let request = String::from_utf8_lossy(&buffer[..read]);

            match parse_callback(&request) {
                CallbackOutcome::Ignored => {
                    respond(&mut stream, "404 Not Found", "Not Found").await;
                }
                CallbackOutcome::Denied(error) => {
                    respond(&mut stream, "400 Bad Request", FAILURE_PAGE).await;
                    return Err(AuthError::AuthFlow(format!("consent denied: {}", error)));
                }
                CallbackOutcome::Code { code, state } => {
                    if state.as_deref() != Some(expected_state) {
                        respond(&mut stream, "400 Bad Request", FAILURE_PAGE).await;
                        return Err(AuthError::AuthFlow(
                            "state mismatch in OAuth callback".to_string(),
                        ));
                    }
                    respond(&mut stream, "200 OK", SUCCESS_PAGE).await;
                    return Ok(code);
                }
            }
        }
    }
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        tracing::debug!("Failed to answer OAuth callback: {}", e);
    }
    let _ = stream.flush().await;
}

#[async_trait]
impl InteractiveAuthorizer for InstalledAppFlow {
    async fn authorize(
        &self,
        client_secret_path: &Path,
        scopes: &ScopeSet,
    ) -> Result<Credential, AuthError> {
        let text = tokio::fs::read_to_string(client_secret_path)
            .await
            .map_err(|e| {
                AuthError::AuthFlow(format!("{}: {}", client_secret_path.display(), e))
            })?;
        let secret = ClientSecret::parse(&text)?;

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| AuthError::AuthFlow(format!("failed to bind callback port: {}", e)))?;
        let port = listener
            .local_addr()
            .map_err(|e| AuthError::AuthFlow(e.to_string()))?
            .port();
        let redirect_uri = format!("http://localhost:{}/", port);

        let pkce = PkceChallenge::generate();
        let state = random_token(16);
        let auth_url = authorization_url(&secret, &redirect_uri, scopes, &state, &pkce.challenge)?;

        tracing::info!("Waiting for OAuth consent on {}", redirect_uri);
        if let Err(e) = open::that(auth_url.as_str()) {
            tracing::warn!("Could not open a browser: {}", e);
            tracing::warn!("Open this URL to authorize the application: {}", auth_url);
        }

        let code = self.wait_for_code(&listener, &state).await?;

        let response = self
            .oauth
            .exchange_code(
                secret.token_uri(),
                &secret.client_id,
                &secret.client_secret,
                &code,
                &redirect_uri,
                &pkce.verifier,
            )
            .await
            .map_err(AuthError::AuthFlow)?;

        if response.refresh_token.is_none() {
            tracing::warn!("Consent returned no refresh token; the credential cannot be refreshed");
        }

        Ok(Credential {
            access_token: response.access_token.clone(),
            refresh_token: response.refresh_token.clone(),
            token_uri: Some(secret.token_uri().to_string()),
            client_id: Some(secret.client_id.clone()),
            client_secret: Some(secret.client_secret.clone()),
            scopes: response.granted_scopes(&scopes.to_vec()),
            expiry: response.expiry(),
        })
    }
}
