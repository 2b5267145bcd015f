// Google credential resolution, Google Docs upsert and GCP instance metadata.
//
// **Layout:**
// - `core/` = Business logic and the traits it depends on
// - `infra/` = Implementations of core traits (Google APIs, files, sysinfo)
// - `config` = Environment-driven settings for the binary

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with several mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
pub mod core;
#[path = "infra/infra_layer.rs"]
pub mod infra;

pub mod config;

pub use crate::core::auth::{AuthError, Credential, CredentialResolver, ScopeSet};
pub use crate::core::docs::{DocsConfig, DocsError, DocumentUpsertService, UpsertedDocument};
pub use crate::core::metadata::{AppEnv, MetadataService};
