use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::docs::{
    DocsError, DocumentEdit, DocumentOutline, DocumentRef, DocumentStore, BODY_START_INDEX,
};

/// A call the in-memory store received, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    FindDocuments { name: String },
    GetDocument { document_id: String },
    CreateDocument { title: String },
    BatchUpdate { document_id: String, edits: Vec<DocumentEdit> },
}

#[derive(Debug, Clone)]
struct StoredDocument {
    id: String,
    name: String,
    /// Body text; always ends with the document's final newline.
    text: String,
    web_url: Option<String>,
    trashed: bool,
}

impl StoredDocument {
    /// A section break ending at index 1, then one paragraph spanning the text.
    fn outline(&self) -> DocumentOutline {
        let end = BODY_START_INDEX + self.text.encode_utf16().count() as i64;
        DocumentOutline {
            element_end_indexes: vec![Some(BODY_START_INDEX), Some(end)],
        }
    }

    fn insert(&mut self, index: i64, text: &str) -> Result<(), DocsError> {
        let offset = index - BODY_START_INDEX;
        let byte = utf16_offset_to_byte(&self.text, offset).ok_or_else(|| {
            DocsError::api(
                Some(400),
                format!("Invalid requests[0].insertText: Index {} out of bounds", index),
            )
        })?;
        self.text.insert_str(byte, text);
        Ok(())
    }
}

fn utf16_offset_to_byte(text: &str, offset: i64) -> Option<usize> {
    if offset < 0 {
        return None;
    }
    let mut units = 0i64;
    for (byte, ch) in text.char_indices() {
        if units == offset {
            return Some(byte);
        }
        units += ch.len_utf16() as i64;
    }
    (units == offset).then_some(text.len())
}

#[derive(Debug, Default)]
struct State {
    documents: Vec<StoredDocument>,
    calls: Vec<StoreCall>,
    next_id: u64,
    pending_failure: Option<(u16, String)>,
}

impl State {
    fn record(&mut self, call: StoreCall) -> Result<(), DocsError> {
        self.calls.push(call);
        match self.pending_failure.take() {
            Some((status, message)) => Err(DocsError::api(Some(status), message)),
            None => Ok(()),
        }
    }

    fn add(&mut self, name: &str, text: &str, web_url: Option<&str>) -> String {
        self.next_id += 1;
        let id = format!("doc-{}", self.next_id);
        self.documents.push(StoredDocument {
            id: id.clone(),
            name: name.to_string(),
            text: text.to_string(),
            web_url: web_url.map(str::to_string),
            trashed: false,
        });
        id
    }

    fn find_mut(&mut self, document_id: &str) -> Result<&mut StoredDocument, DocsError> {
        self.documents
            .iter_mut()
            .find(|doc| doc.id == document_id)
            .ok_or_else(|| {
                DocsError::api(
                    Some(404),
                    format!("Requested entity was not found: {}", document_id),
                )
            })
    }
}

/// `DocumentStore` kept entirely in memory. Mirrors the index arithmetic of the
/// real Docs API closely enough for the upsert logic to be exercised offline.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    state: Mutex<State>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a document and returns its id. `text` should end with a newline.
    pub fn insert_document(&self, name: &str, text: &str, web_url: Option<&str>) -> String {
        self.lock().add(name, text, web_url)
    }

    pub fn trash(&self, document_id: &str) {
        if let Some(doc) = self.lock().documents.iter_mut().find(|d| d.id == document_id) {
            doc.trashed = true;
        }
    }

    /// Makes the next call fail with the given HTTP status.
    pub fn fail_next(&self, status: u16, message: &str) {
        self.lock().pending_failure = Some((status, message.to_string()));
    }

    pub fn text_of(&self, document_id: &str) -> Option<String> {
        self.lock()
            .documents
            .iter()
            .find(|d| d.id == document_id)
            .map(|d| d.text.clone())
    }

    /// Number of documents, trashed ones included.
    pub fn document_count(&self) -> usize {
        self.lock().documents.len()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn find_documents(
        &self,
        _token: &str,
        name: &str,
    ) -> Result<Vec<DocumentRef>, DocsError> {
        let mut state = self.lock();
        state.record(StoreCall::FindDocuments {
            name: name.to_string(),
        })?;

        Ok(state
            .documents
            .iter()
            .filter(|doc| !doc.trashed && doc.name == name)
            .map(|doc| DocumentRef {
                id: doc.id.clone(),
                name: doc.name.clone(),
                web_url: doc.web_url.clone(),
            })
            .collect())
    }

    async fn get_document(
        &self,
        _token: &str,
        document_id: &str,
    ) -> Result<DocumentOutline, DocsError> {
        let mut state = self.lock();
        state.record(StoreCall::GetDocument {
            document_id: document_id.to_string(),
        })?;
        Ok(state.find_mut(document_id)?.outline())
    }

    async fn create_document(&self, _token: &str, title: &str) -> Result<String, DocsError> {
        let mut state = self.lock();
        state.record(StoreCall::CreateDocument {
            title: title.to_string(),
        })?;
        Ok(state.add(title, "\n", None))
    }

    async fn batch_update(
        &self,
        _token: &str,
        document_id: &str,
        edits: &[DocumentEdit],
    ) -> Result<(), DocsError> {
        let mut state = self.lock();
        state.record(StoreCall::BatchUpdate {
            document_id: document_id.to_string(),
            edits: edits.to_vec(),
        })?;

        // Edits apply atomically: work on a copy and commit only if all succeed.
        let mut doc = state.find_mut(document_id)?.clone();
        for edit in edits {
            doc.insert(edit.index, &edit.text)?;
        }
        *state.find_mut(document_id)? = doc;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_document_has_single_newline_body() {
        let store = InMemoryDocumentStore::new();
        let id = store.create_document("t", "Doc").await.unwrap();

        let outline = store.get_document("t", &id).await.unwrap();
        assert_eq!(outline.append_index(), 2);
        assert_eq!(store.text_of(&id).as_deref(), Some("\n"));
    }

    #[tokio::test]
    async fn indexes_count_utf16_units() {
        let store = InMemoryDocumentStore::new();
        let id = store.insert_document("Emoji", "a😀\n", None);

        // 'a' = 1 unit, the emoji = 2 units, newline = 1 unit.
        let outline = store.get_document("t", &id).await.unwrap();
        assert_eq!(outline.append_index(), 5);

        store
            .batch_update("t", &id, &[DocumentEdit::insert_text(4, "b")])
            .await
            .unwrap();
        assert_eq!(store.text_of(&id).as_deref(), Some("a😀b\n"));
    }

    #[tokio::test]
    async fn out_of_range_insert_is_rejected_without_changes() {
        let store = InMemoryDocumentStore::new();
        let id = store.insert_document("Doc", "hi\n", None);

        let err = store
            .batch_update(
                "t",
                &id,
                &[
                    DocumentEdit::insert_text(1, "ok"),
                    DocumentEdit::insert_text(99, "bad"),
                ],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DocsError::Api { status: Some(400), .. }));
        assert_eq!(store.text_of(&id).as_deref(), Some("hi\n"));
    }

    #[tokio::test]
    async fn fail_next_only_fails_once() {
        let store = InMemoryDocumentStore::new();
        store.fail_next(500, "backend error");

        assert!(store.find_documents("t", "x").await.is_err());
        assert!(store.find_documents("t", "x").await.is_ok());
        assert_eq!(store.calls().len(), 2);
    }
}
