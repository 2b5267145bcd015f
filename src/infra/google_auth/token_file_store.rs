use std::path::Path;

use async_trait::async_trait;
use tokio::fs;

use crate::core::auth::{AuthError, Credential, TokenCache};

/// Stores one credential as JSON at whatever path the resolver asks for.
#[derive(Debug, Clone, Default)]
pub struct TokenFileStore;

impl TokenFileStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TokenCache for TokenFileStore {
    async fn load(&self, path: &Path) -> Result<Option<Credential>, AuthError> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            return Ok(None);
        }

        let text = fs::read_to_string(path)
            .await
            .map_err(|e| AuthError::CredentialLoad(format!("{}: {}", path.display(), e)))?;

        let credential: Credential = serde_json::from_str(&text)
            .map_err(|e| AuthError::CredentialLoad(format!("{}: {}", path.display(), e)))?;
        Ok(Some(credential))
    }

    async fn save(&self, path: &Path, credential: &Credential) -> Result<(), AuthError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AuthError::Persist(e.to_string()))?;
        }

        let text = serde_json::to_string_pretty(credential)
            .map_err(|e| AuthError::Persist(e.to_string()))?;
        fs::write(path, text)
            .await
            .map_err(|e| AuthError::Persist(e.to_string()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| AuthError::Persist(e.to_string()))?;
        }

        Ok(())
    }
}
