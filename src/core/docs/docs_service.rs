use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use super::docs_models::{
    document_url, DocumentEdit, DocumentOutline, DocumentRef, UpsertOutcome, UpsertedDocument,
    BODY_START_INDEX,
};
use crate::core::auth::{scopes, AuthError, CredentialProvider, ScopeSet};

/// Errors surfaced by the document upsert.
#[derive(Debug, Error)]
pub enum DocsError {
    #[error("Google API error{}: {message}", status_suffix(.status))]
    Api {
        status: Option<u16>,
        message: String,
    },
    #[error(transparent)]
    Auth(#[from] AuthError),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({})", s)).unwrap_or_default()
}

impl DocsError {
    pub fn api(status: Option<u16>, message: impl Into<String>) -> Self {
        DocsError::Api {
            status,
            message: message.into(),
        }
    }
}

/// The remote document-storage operations the upsert needs. Every call carries the
/// bearer token resolved for this invocation.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Non-trashed Google Docs whose name matches `name`.
    async fn find_documents(&self, token: &str, name: &str) -> Result<Vec<DocumentRef>, DocsError>;
    async fn get_document(&self, token: &str, document_id: &str)
        -> Result<DocumentOutline, DocsError>;
    /// Creates an empty document and returns its id.
    async fn create_document(&self, token: &str, title: &str) -> Result<String, DocsError>;
    async fn batch_update(
        &self,
        token: &str,
        document_id: &str,
        edits: &[DocumentEdit],
    ) -> Result<(), DocsError>;
}

/// Where credentials live and what they must grant.
#[derive(Debug, Clone)]
pub struct DocsConfig {
    pub scopes: ScopeSet,
    pub client_secret_path: PathBuf,
    pub token_path: PathBuf,
    /// Host used to build viewer URLs for newly created documents.
    pub docs_host: String,
}

impl DocsConfig {
    pub fn default_scopes() -> ScopeSet {
        ScopeSet::new([scopes::USERINFO_EMAIL, scopes::DOCUMENTS, scopes::DRIVE_FILE])
    }
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            scopes: Self::default_scopes(),
            client_secret_path: PathBuf::from("client_secret.json"),
            token_path: PathBuf::from("token.json"),
            docs_host: "docs.google.com".to_string(),
        }
    }
}

/// Appends to a Google Doc by name, creating it first if it doesn't exist.
pub struct DocumentUpsertService<S: DocumentStore, P: CredentialProvider> {
    store: S,
    credentials: P,
    config: DocsConfig,
}

impl<S, P> DocumentUpsertService<S, P>
where
    S: DocumentStore,
    P: CredentialProvider,
{
    pub fn new(store: S, credentials: P, config: DocsConfig) -> Self {
        Self {
            store,
            credentials,
            config,
        }
    }

    /// Writes `content` to the document named `name`.
    ///
    /// Existing documents get `"\n" + content` appended after their last structural
    /// element; otherwise a new document is created holding exactly `content`. When
    /// several documents share the name, the first one listed wins.
    pub async fn upsert_document(
        &self,
        name: &str,
        content: &str,
    ) -> Result<UpsertedDocument, DocsError> {
        let credential = self
            .credentials
            .resolve(
                &self.config.scopes,
                &self.config.client_secret_path,
                &self.config.token_path,
            )
            .await?;
        let token = credential.access_token.as_str();

        let matches = self.store.find_documents(token, name).await?;
        if matches.len() > 1 {
            tracing::warn!(
                "{} documents are named '{}', using the first one",
                matches.len(),
                name
            );
        }

        let result = match matches.into_iter().find(|doc| doc.name == name) {
            Some(existing) => self.append(token, existing, content).await?,
            None => self.create(token, name, content).await?,
        };

        tracing::info!("Document URL: {}", result.url);
        Ok(result)
    }

    async fn append(
        &self,
        token: &str,
        existing: DocumentRef,
        content: &str,
    ) -> Result<UpsertedDocument, DocsError> {
        tracing::info!(
            "Found existing document '{}' (ID: {}). Appending content.",
            existing.name,
            existing.id
        );

        let outline = self.store.get_document(token, &existing.id).await?;
        let edit = DocumentEdit::insert_text(outline.append_index(), format!("\n{}", content));
        self.store.batch_update(token, &existing.id, &[edit]).await?;

        tracing::info!("Content appended successfully");

        let url = existing
            .web_url
            .unwrap_or_else(|| document_url(&self.config.docs_host, &existing.id));

        Ok(UpsertedDocument {
            document_id: existing.id,
            url,
            outcome: UpsertOutcome::Appended,
        })
    }

    async fn create(
        &self,
        token: &str,
        name: &str,
        content: &str,
    ) -> Result<UpsertedDocument, DocsError> {
        tracing::info!("Document '{}' not found. Creating a new document.", name);

        let document_id = self.store.create_document(token, name).await?;
        tracing::info!("Created new document with ID: {}", document_id);

        let edit = DocumentEdit::insert_text(BODY_START_INDEX, content);
        self.store.batch_update(token, &document_id, &[edit]).await?;

        tracing::info!("Initial content written successfully");

        Ok(UpsertedDocument {
            url: document_url(&self.config.docs_host, &document_id),
            document_id,
            outcome: UpsertOutcome::Created,
        })
    }
}
