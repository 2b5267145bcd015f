// The infra module contains implementations of core traits.
// Each feature implementation goes in its own submodule.

#[path = "google_auth/mod.rs"]
pub mod google_auth;

#[path = "google_docs/mod.rs"]
pub mod google_docs;

#[path = "gcp_metadata/mod.rs"]
pub mod gcp_metadata;
