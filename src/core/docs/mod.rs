pub mod docs_models;
pub mod docs_service;

pub use docs_models::{
    document_url, DocumentEdit, DocumentOutline, DocumentRef, UpsertOutcome, UpsertedDocument,
    BODY_START_INDEX, GOOGLE_DOC_MIME_TYPE,
};
pub use docs_service::{DocsConfig, DocsError, DocumentStore, DocumentUpsertService};
