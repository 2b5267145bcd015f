// =============================================================================
// GOOGLE DOCS CLIENT
// =============================================================================
//
// Talks to two Google APIs with a caller-supplied bearer token:
//
// - Drive v3 `files.list` to find documents by name
// - Docs v1 `documents.get`, `documents.create` and `documents.batchUpdate`
//
// **Required scopes:** `documents` for reading and writing, plus `drive.file`
// (or broader) so the Drive listing can see the documents this app created.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::docs::{
    DocsError, DocumentEdit, DocumentOutline, DocumentRef, DocumentStore, GOOGLE_DOC_MIME_TYPE,
};

pub const DRIVE_API_BASE: &str = "https://www.googleapis.com";
pub const DOCS_API_BASE: &str = "https://docs.googleapis.com";

// =============================================================================
// API RESPONSE STRUCTURES
// =============================================================================

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    web_view_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Document {
    body: Option<Body>,
}

#[derive(Debug, Deserialize)]
struct Body {
    #[serde(default)]
    content: Vec<StructuralElement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StructuralElement {
    end_index: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedDocument {
    document_id: String,
}

#[derive(Debug, Serialize)]
struct CreateDocumentRequest<'a> {
    title: &'a str,
}

#[derive(Debug, Serialize)]
struct BatchUpdateRequest<'a> {
    requests: &'a [DocumentEdit],
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Builds the Drive `q` expression for native Google Docs with an exact name.
pub fn drive_name_query(name: &str) -> String {
    let escaped = name.replace('\\', "\\\\").replace('\'', "\\'");
    format!(
        "name='{}' and mimeType='{}' and trashed=false",
        escaped, GOOGLE_DOC_MIME_TYPE
    )
}

// =============================================================================
// CLIENT
// =============================================================================

/// reqwest-backed `DocumentStore` for the real Google APIs.
#[derive(Debug, Clone)]
pub struct GoogleDocsClient {
    client: Client,
    drive_base: String,
    docs_base: String,
}

impl GoogleDocsClient {
    pub fn new() -> Self {
        Self::with_base_urls(DRIVE_API_BASE, DOCS_API_BASE)
    }

    /// Points the client at other hosts (used by tests against a mock server).
    pub fn with_base_urls(drive_base: impl Into<String>, docs_base: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            drive_base: drive_base.into().trim_end_matches('/').to_string(),
            docs_base: docs_base.into().trim_end_matches('/').to_string(),
        }
    }

    async fn send(request: RequestBuilder) -> Result<Response, DocsError> {
        let response = request
            .send()
            .await
            .map_err(|e| DocsError::api(None, e.to_string()))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&text)
            .map(|body| body.error.message)
            .unwrap_or(text);
        Err(DocsError::api(Some(status), message))
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T, DocsError> {
        let status = response.status().as_u16();
        response
            .json::<T>()
            .await
            .map_err(|e| DocsError::api(Some(status), format!("unexpected response: {}", e)))
    }
}

impl Default for GoogleDocsClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for GoogleDocsClient {
    async fn find_documents(
        &self,
        token: &str,
        name: &str,
    ) -> Result<Vec<DocumentRef>, DocsError> {
        let query = drive_name_query(name);
        tracing::debug!("Drive query: {}", query);

        let request = self
            .client
            .get(format!("{}/drive/v3/files", self.drive_base))
            .bearer_auth(token)
            .query(&[
                ("q", query.as_str()),
                ("spaces", "drive"),
                ("fields", "files(id, name, webViewLink)"),
            ]);

        let list: FileList = Self::json(Self::send(request).await?).await?;
        Ok(list
            .files
            .into_iter()
            .map(|file| DocumentRef {
                id: file.id,
                name: file.name,
                web_url: file.web_view_link,
            })
            .collect())
    }

    async fn get_document(
        &self,
        token: &str,
        document_id: &str,
    ) -> Result<DocumentOutline, DocsError> {
        let request = self
            .client
            .get(format!("{}/v1/documents/{}", self.docs_base, document_id))
            .bearer_auth(token);

        let document: Document = Self::json(Self::send(request).await?).await?;
        Ok(DocumentOutline {
            element_end_indexes: document
                .body
                .map(|body| body.content.into_iter().map(|e| e.end_index).collect())
                .unwrap_or_default(),
        })
    }

    async fn create_document(&self, token: &str, title: &str) -> Result<String, DocsError> {
        let request = self
            .client
            .post(format!("{}/v1/documents", self.docs_base))
            .bearer_auth(token)
            .json(&CreateDocumentRequest { title });

        let created: CreatedDocument = Self::json(Self::send(request).await?).await?;
        Ok(created.document_id)
    }

    async fn batch_update(
        &self,
        token: &str,
        document_id: &str,
        edits: &[DocumentEdit],
    ) -> Result<(), DocsError> {
        let request = self
            .client
            .post(format!(
                "{}/v1/documents/{}:batchUpdate",
                self.docs_base, document_id
            ))
            .bearer_auth(token)
            .json(&BatchUpdateRequest { requests: edits });

        Self::send(request).await?;
        Ok(())
    }
}
