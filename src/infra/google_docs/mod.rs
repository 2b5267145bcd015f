pub mod google_docs_client;
pub mod in_memory;

pub use google_docs_client::GoogleDocsClient;
pub use in_memory::{InMemoryDocumentStore, StoreCall};
