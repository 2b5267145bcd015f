// Application Default Credentials.
//
// Looks for an identity the environment already provides, in the same order the
// official Google client libraries use:
//
// 1. `GOOGLE_APPLICATION_CREDENTIALS` - path to a service-account key or an
//    authorized-user file
// 2. The gcloud well-known file written by `gcloud auth application-default login`
// 3. The GCE metadata server (Compute Engine, Cloud Run, App Engine, GKE)

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::oauth_client::{GoogleOAuthClient, TokenResponse};
use crate::core::auth::{AmbientCredentialSource, AuthError, Credential, ScopeSet};
use crate::core::metadata::SERVICE_ACCOUNT_TOKEN_PATH;

pub const DEFAULT_METADATA_HOST: &str = "http://metadata.google.internal";

/// The metadata server answers in milliseconds on GCP; anywhere else the lookup
/// should give up quickly.
const METADATA_TIMEOUT: Duration = Duration::from_secs(3);

/// Service-account JWTs are valid for at most one hour.
const JWT_LIFETIME_SECS: u64 = 3600;

/// Credential file formats ADC understands, keyed by their `type` field.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CredentialsFile {
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUser),
}

/// Service account key from the JSON key file.
#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    /// Used as the JWT issuer.
    client_email: String,
    /// PEM-encoded RSA key.
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

/// User credentials written by `gcloud auth application-default login`.
#[derive(Debug, Deserialize)]
struct AuthorizedUser {
    client_id: String,
    client_secret: String,
    refresh_token: String,
    #[serde(default)]
    token_uri: Option<String>,
}

/// JWT claims for the service-account grant.
#[derive(Debug, Serialize)]
struct JwtClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: u64,
    exp: u64,
}

/// Discovers credentials from the environment.
pub struct ApplicationDefaultCredentials {
    oauth: GoogleOAuthClient,
    metadata_client: Client,
    explicit_path: Option<PathBuf>,
    well_known_path: Option<PathBuf>,
    metadata_host: Option<String>,
}

impl ApplicationDefaultCredentials {
    pub fn new(
        oauth: GoogleOAuthClient,
        explicit_path: Option<PathBuf>,
        well_known_path: Option<PathBuf>,
        metadata_host: Option<String>,
    ) -> Self {
        let metadata_client = Client::builder()
            .timeout(METADATA_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            oauth,
            metadata_client,
            explicit_path,
            well_known_path,
            metadata_host,
        }
    }

    /// Reads `GOOGLE_APPLICATION_CREDENTIALS` and `GCE_METADATA_HOST` once.
    pub fn from_env(oauth: GoogleOAuthClient) -> Self {
        let explicit_path = std::env::var_os("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from);
        let metadata_host = std::env::var("GCE_METADATA_HOST")
            .ok()
            .map(|host| format!("http://{}", host))
            .unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string());

        Self::new(
            oauth,
            explicit_path,
            gcloud_well_known_file(),
            Some(metadata_host),
        )
    }

    async fn from_file(&self, path: &Path, scopes: &ScopeSet) -> Result<Credential, AuthError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AuthError::AmbientUnavailable(format!("{}: {}", path.display(), e)))?;
        let file: CredentialsFile = serde_json::from_str(&text)
            .map_err(|e| AuthError::AmbientUnavailable(format!("{}: {}", path.display(), e)))?;

        match file {
            CredentialsFile::ServiceAccount(key) => {
                tracing::debug!("Using service account {}", key.client_email);
                self.from_service_account(&key, scopes).await
            }
            CredentialsFile::AuthorizedUser(user) => self.from_authorized_user(user, scopes).await,
        }
    }

    async fn from_service_account(
        &self,
        key: &ServiceAccountKey,
        scopes: &ScopeSet,
    ) -> Result<Credential, AuthError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AuthError::AmbientUnavailable(e.to_string()))?
            .as_secs();
        let token_uri = key
            .token_uri
            .as_deref()
            .unwrap_or(self.oauth.default_token_uri());

        let claims = JwtClaims {
            iss: key.client_email.clone(),
            scope: scopes.to_space_delimited(),
            aud: token_uri.to_string(),
            iat: now,
            exp: now + JWT_LIFETIME_SECS,
        };

        let header = Header::new(Algorithm::RS256);
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| AuthError::AmbientUnavailable(format!("bad private key: {}", e)))?;
        let jwt = encode(&header, &claims, &signing_key)
            .map_err(|e| AuthError::AmbientUnavailable(e.to_string()))?;

        let response = self
            .oauth
            .jwt_bearer_grant(token_uri, &jwt)
            .await
            .map_err(AuthError::AmbientUnavailable)?;

        Ok(bearer_from(response, scopes))
    }

    async fn from_authorized_user(
        &self,
        user: AuthorizedUser,
        scopes: &ScopeSet,
    ) -> Result<Credential, AuthError> {
        let token_uri = user
            .token_uri
            .unwrap_or_else(|| self.oauth.default_token_uri().to_string());

        let response = self
            .oauth
            .refresh_grant(&token_uri, &user.client_id, &user.client_secret, &user.refresh_token)
            .await
            .map_err(AuthError::AmbientUnavailable)?;

        let mut credential = bearer_from(response, scopes);
        credential.refresh_token = Some(user.refresh_token);
        credential.client_id = Some(user.client_id);
        credential.client_secret = Some(user.client_secret);
        credential.token_uri = Some(token_uri);
        Ok(credential)
    }

    async fn from_metadata_server(
        &self,
        host: &str,
        scopes: &ScopeSet,
    ) -> Result<Credential, AuthError> {
        let url = format!("{}{}", host.trim_end_matches('/'), SERVICE_ACCOUNT_TOKEN_PATH);
        let mut request = self
            .metadata_client
            .get(&url)
            .header("Metadata-Flavor", "Google");
        if !scopes.is_empty() {
            request = request.query(&[("scopes", scopes.to_comma_delimited())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AuthError::AmbientUnavailable(format!("metadata server: {}", e)))?;

        if !response.status().is_success() {
            return Err(AuthError::AmbientUnavailable(format!(
                "metadata server returned {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::AmbientUnavailable(e.to_string()))?;

        Ok(bearer_from(token, scopes))
    }
}

/// Ambient tokens are stamped with the scopes they were requested for.
fn bearer_from(response: TokenResponse, scopes: &ScopeSet) -> Credential {
    let mut credential = Credential::bearer(response.access_token.clone(), response.expires_in);
    credential.scopes = response.granted_scopes(&scopes.to_vec());
    credential
}

/// `~/.config/gcloud/application_default_credentials.json` (or the platform equivalent).
pub fn gcloud_well_known_file() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("CLOUDSDK_CONFIG") {
        return Some(PathBuf::from(dir).join("application_default_credentials.json"));
    }
    dirs::config_dir().map(|dir| {
        dir.join("gcloud")
            .join("application_default_credentials.json")
    })
}

#[async_trait]
impl AmbientCredentialSource for ApplicationDefaultCredentials {
    async fn discover(&self, scopes: &ScopeSet) -> Result<Credential, AuthError> {
        let mut failures = Vec::new();

        if let Some(path) = &self.explicit_path {
            match self.from_file(path, scopes).await {
                Ok(credential) => {
                    tracing::info!("ADC successful via {}", path.display());
                    return Ok(credential);
                }
                Err(e) => failures.push(e.to_string()),
            }
        }

        if let Some(path) = &self.well_known_path {
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                match self.from_file(path, scopes).await {
                    Ok(credential) => {
                        tracing::info!("ADC successful via gcloud credentials");
                        return Ok(credential);
                    }
                    Err(e) => failures.push(e.to_string()),
                }
            }
        }

        if let Some(host) = &self.metadata_host {
            match self.from_metadata_server(host, scopes).await {
                Ok(credential) => {
                    tracing::info!("ADC successful via metadata server");
                    return Ok(credential);
                }
                Err(e) => failures.push(e.to_string()),
            }
        }

        if failures.is_empty() {
            failures.push("no credential sources configured".to_string());
        }
        Err(AuthError::AmbientUnavailable(failures.join("; ")))
    }
}
