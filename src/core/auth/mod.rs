pub mod auth_models;
pub mod auth_service;

pub use auth_models::{expiry_after, scopes, Credential, ScopeSet};
pub use auth_service::{
    AmbientCredentialSource, AuthError, CredentialProvider, CredentialResolver, CredentialSource,
    InteractiveAuthorizer, TokenCache, TokenRefresher,
};
