use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use super::auth_models::{Credential, ScopeSet};

/// Errors raised while resolving a credential.
///
/// Only `MissingClientSecret` and `AuthFlow` ever escape `CredentialResolver::resolve`;
/// the rest are logged and the resolver moves on to the next source.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Could not load cached credentials: {0}")]
    CredentialLoad(String),
    #[error("Token refresh failed: {0}")]
    Refresh(String),
    #[error("Ambient credentials unavailable: {0}")]
    AmbientUnavailable(String),
    #[error("Client secret file not found at '{}'. Download it from Google Cloud Console.", .0.display())]
    MissingClientSecret(PathBuf),
    #[error("Interactive authorization failed: {0}")]
    AuthFlow(String),
    #[error("Could not save credentials: {0}")]
    Persist(String),
}

/// Persistence for a single credential at a caller-chosen path.
#[async_trait]
pub trait TokenCache: Send + Sync {
    /// Returns `Ok(None)` when nothing is cached at `path`.
    async fn load(&self, path: &Path) -> Result<Option<Credential>, AuthError>;
    async fn save(&self, path: &Path, credential: &Credential) -> Result<(), AuthError>;
}

/// Exchanges a refresh token for a fresh access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, credential: &Credential) -> Result<Credential, AuthError>;
}

/// Identity supplied implicitly by the environment (Application Default Credentials).
#[async_trait]
pub trait AmbientCredentialSource: Send + Sync {
    async fn discover(&self, scopes: &ScopeSet) -> Result<Credential, AuthError>;
}

/// Browser-based login against an installed-application client.
#[async_trait]
pub trait InteractiveAuthorizer: Send + Sync {
    async fn authorize(
        &self,
        client_secret_path: &Path,
        scopes: &ScopeSet,
    ) -> Result<Credential, AuthError>;
}

/// Anything that can hand out a credential for a scope set. Document Upsert depends
/// on this rather than on the full resolver so it can be tested in isolation.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn resolve(
        &self,
        scopes: &ScopeSet,
        client_secret_path: &Path,
        token_path: &Path,
    ) -> Result<Credential, AuthError>;
}

/// Where a resolved credential came from. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Cache,
    Refresh,
    Ambient,
    Interactive,
}

/// Resolves credentials from the token cache, a refresh, the environment, and finally
/// an interactive login, in that order.
pub struct CredentialResolver<C, R, A, I>
where
    C: TokenCache,
    R: TokenRefresher,
    A: AmbientCredentialSource,
    I: InteractiveAuthorizer,
{
    cache: C,
    refresher: R,
    ambient: A,
    interactive: I,
}

impl<C, R, A, I> CredentialResolver<C, R, A, I>
where
    C: TokenCache,
    R: TokenRefresher,
    A: AmbientCredentialSource,
    I: InteractiveAuthorizer,
{
    pub fn new(cache: C, refresher: R, ambient: A, interactive: I) -> Self {
        Self {
            cache,
            refresher,
            ambient,
            interactive,
        }
    }

    /// Returns a valid credential for `scopes`, persisting it to `token_path`.
    pub async fn resolve(
        &self,
        scopes: &ScopeSet,
        client_secret_path: &Path,
        token_path: &Path,
    ) -> Result<Credential, AuthError> {
        let (credential, source) = match self.from_cache(scopes, token_path).await {
            Some(found) => found,
            None => self.from_fallbacks(scopes, client_secret_path).await?,
        };

        tracing::info!(source = ?source, "Resolved Google credentials");

        if let Err(e) = self.cache.save(token_path, &credential).await {
            tracing::warn!("Could not save token to {}: {}", token_path.display(), e);
        } else {
            tracing::debug!("Credentials saved to {}", token_path.display());
        }

        Ok(credential)
    }

    /// Steps 1 and 2: the cached token, refreshed if it has gone stale.
    async fn from_cache(
        &self,
        scopes: &ScopeSet,
        token_path: &Path,
    ) -> Option<(Credential, CredentialSource)> {
        let cached = match self.cache.load(token_path).await {
            Ok(Some(credential)) => credential,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Ignoring token file {}: {}", token_path.display(), e);
                return None;
            }
        };

        if !cached.grants(scopes) {
            tracing::warn!(
                "Cached token at {} lacks requested scopes, ignoring it",
                token_path.display()
            );
            return None;
        }

        if cached.is_valid() {
            return Some((cached, CredentialSource::Cache));
        }

        if !cached.can_refresh() {
            tracing::debug!("Cached token expired and has no refresh token");
            return None;
        }

        tracing::info!("Refreshing existing token...");
        match self.refresher.refresh(&cached).await {
            Ok(refreshed) if refreshed.is_valid() => Some((refreshed, CredentialSource::Refresh)),
            Ok(_) => {
                tracing::warn!("Refresh returned an already-expired token, discarding it");
                None
            }
            Err(e) => {
                tracing::warn!("{}", e);
                None
            }
        }
    }

    /// Steps 3 and 4: ambient identity, then the interactive login.
    async fn from_fallbacks(
        &self,
        scopes: &ScopeSet,
        client_secret_path: &Path,
    ) -> Result<(Credential, CredentialSource), AuthError> {
        tracing::info!("Attempting Application Default Credentials...");
        match self.ambient.discover(scopes).await {
            Ok(credential) if credential.is_valid() => {
                return Ok((credential, CredentialSource::Ambient));
            }
            Ok(_) => tracing::warn!("Ambient credentials were already expired"),
            Err(e) => tracing::info!("{}", e),
        }

        tracing::info!(
            "Falling back to interactive browser flow using {}",
            client_secret_path.display()
        );
        if !tokio::fs::try_exists(client_secret_path)
            .await
            .unwrap_or(false)
        {
            return Err(AuthError::MissingClientSecret(
                client_secret_path.to_path_buf(),
            ));
        }

        let credential = self
            .interactive
            .authorize(client_secret_path, scopes)
            .await
            .map_err(|e| match e {
                AuthError::AuthFlow(_) | AuthError::MissingClientSecret(_) => e,
                other => AuthError::AuthFlow(other.to_string()),
            })?;

        if !credential.is_valid() {
            return Err(AuthError::AuthFlow(
                "identity provider returned an unusable token".to_string(),
            ));
        }

        tracing::info!("Authentication successful via browser flow");
        Ok((credential, CredentialSource::Interactive))
    }
}

#[async_trait]
impl<C, R, A, I> CredentialProvider for CredentialResolver<C, R, A, I>
where
    C: TokenCache,
    R: TokenRefresher,
    A: AmbientCredentialSource,
    I: InteractiveAuthorizer,
{
    async fn resolve(
        &self,
        scopes: &ScopeSet,
        client_secret_path: &Path,
        token_path: &Path,
    ) -> Result<Credential, AuthError> {
        CredentialResolver::resolve(self, scopes, client_secret_path, token_path).await
    }
}
