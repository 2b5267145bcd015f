// The core module contains all business logic.
// Each feature gets its own submodule and defines the traits infra implements.

#[path = "auth/mod.rs"]
pub mod auth;

#[path = "docs/mod.rs"]
pub mod docs;

#[path = "metadata/mod.rs"]
pub mod metadata;
