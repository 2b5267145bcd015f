use std::path::PathBuf;

use crate::core::auth::ScopeSet;
use crate::core::docs::DocsConfig;

pub const DEFAULT_DOC_NAME: &str = "My Automated Test Document";

/// Settings for the binary, read from the environment (and `.env`).
///
/// - `GOOGLE_CLIENT_SECRET_FILE` - OAuth client secret JSON (default `client_secret.json`)
/// - `GOOGLE_TOKEN_FILE` - cached credential (default `token.json`)
/// - `GOOGLE_DOCS_HOST` - host used in document URLs (default `docs.google.com`)
/// - `GOOGLE_DOCS_SCOPES` - comma-separated scope override
/// - `DOC_NAME` - document the demo writes to
#[derive(Debug, Clone)]
pub struct ToolsConfig {
    pub docs: DocsConfig,
    pub doc_name: String,
}

impl ToolsConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = DocsConfig::default();

        let scopes = non_empty("GOOGLE_DOCS_SCOPES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .collect::<ScopeSet>()
            })
            .filter(|scopes| !scopes.is_empty())
            .unwrap_or(defaults.scopes);

        let docs = DocsConfig {
            scopes,
            client_secret_path: non_empty("GOOGLE_CLIENT_SECRET_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.client_secret_path),
            token_path: non_empty("GOOGLE_TOKEN_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.token_path),
            docs_host: non_empty("GOOGLE_DOCS_HOST").unwrap_or(defaults.docs_host),
        };

        Self {
            docs,
            doc_name: non_empty("DOC_NAME").unwrap_or_else(|| DEFAULT_DOC_NAME.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::auth::scopes;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = ToolsConfig::from_lookup(lookup(&[]));

        assert_eq!(config.docs.client_secret_path, PathBuf::from("client_secret.json"));
        assert_eq!(config.docs.token_path, PathBuf::from("token.json"));
        assert_eq!(config.docs.docs_host, "docs.google.com");
        assert_eq!(config.docs.scopes, DocsConfig::default_scopes());
        assert_eq!(config.doc_name, DEFAULT_DOC_NAME);
    }

    #[test]
    fn overrides_are_applied() {
        let config = ToolsConfig::from_lookup(lookup(&[
            ("GOOGLE_TOKEN_FILE", "/tmp/creds/token.json"),
            ("GOOGLE_DOCS_SCOPES", " https://www.googleapis.com/auth/documents ,,"),
            ("DOC_NAME", "Run log"),
        ]));

        assert_eq!(config.docs.token_path, PathBuf::from("/tmp/creds/token.json"));
        assert_eq!(config.docs.scopes, ScopeSet::new([scopes::DOCUMENTS]));
        assert_eq!(config.doc_name, "Run log");
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config =
            ToolsConfig::from_lookup(lookup(&[("DOC_NAME", "  "), ("GOOGLE_DOCS_SCOPES", ",")]));

        assert_eq!(config.doc_name, DEFAULT_DOC_NAME);
        assert_eq!(config.docs.scopes, DocsConfig::default_scopes());
    }
}
