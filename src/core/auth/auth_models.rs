use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Well-known Google OAuth scopes used by this crate.
pub mod scopes {
    pub const USERINFO_EMAIL: &str = "https://www.googleapis.com/auth/userinfo.email";
    pub const DOCUMENTS: &str = "https://www.googleapis.com/auth/documents";
    pub const DRIVE_FILE: &str = "https://www.googleapis.com/auth/drive.file";
}

/// Tokens this close to expiry are already treated as expired.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Expiry instant for a token valid `expires_in_secs` from now. Lifetimes too
/// large to represent are treated as never expiring.
pub fn expiry_after(expires_in_secs: i64) -> Option<DateTime<Utc>> {
    Duration::try_seconds(expires_in_secs)
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
}

/// Ordered, duplicate-free set of permission strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSet(Vec<String>);

impl ScopeSet {
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Vec::new();
        for scope in scopes {
            let scope = scope.into();
            if !scope.is_empty() && !set.contains(&scope) {
                set.push(scope);
            }
        }
        Self(set)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every scope in `self` appears in `granted`.
    pub fn is_subset_of(&self, granted: &[String]) -> bool {
        self.0.iter().all(|scope| granted.contains(scope))
    }

    /// Space-delimited form used by the OAuth endpoints.
    pub fn to_space_delimited(&self) -> String {
        self.0.join(" ")
    }

    /// Comma-delimited form used by the metadata server token endpoint.
    pub fn to_comma_delimited(&self) -> String {
        self.0.join(",")
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.clone()
    }
}

impl<S: Into<String>> FromIterator<S> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// An OAuth access credential.
///
/// Serialized in the Google "authorized user" layout so token files written by
/// other Google client libraries load unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(rename = "token", default, deserialize_with = "null_as_empty")]
    pub access_token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Scopes the identity provider granted to this token.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// `None` means the token does not expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl Credential {
    /// Creates a bare access-token credential with no refresh capability.
    pub fn bearer(access_token: impl Into<String>, expires_in_secs: Option<i64>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            token_uri: None,
            client_id: None,
            client_secret: None,
            scopes: Vec::new(),
            expiry: expires_in_secs.and_then(expiry_after),
        }
    }

    pub fn with_scopes(mut self, scopes: &ScopeSet) -> Self {
        self.scopes = scopes.to_vec();
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => expiry <= now + Duration::seconds(EXPIRY_SKEW_SECS),
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty() && !self.is_expired_at(now)
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Whether this credential was granted every scope in `requested`.
    pub fn grants(&self, requested: &ScopeSet) -> bool {
        requested.is_subset_of(&self.scopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_set_drops_duplicates_and_keeps_order() {
        let set = ScopeSet::new([scopes::DOCUMENTS, scopes::DRIVE_FILE, scopes::DOCUMENTS]);
        assert_eq!(set.len(), 2);
        assert_eq!(
            set.to_space_delimited(),
            format!("{} {}", scopes::DOCUMENTS, scopes::DRIVE_FILE)
        );
    }

    #[test]
    fn credential_grants_requires_every_scope() {
        let credential = Credential::bearer("tok", Some(3600))
            .with_scopes(&ScopeSet::new([scopes::DOCUMENTS, scopes::DRIVE_FILE]));

        assert!(credential.grants(&ScopeSet::new([scopes::DOCUMENTS])));
        assert!(!credential.grants(&ScopeSet::new([
            scopes::DOCUMENTS,
            scopes::USERINFO_EMAIL
        ])));
    }

    #[test]
    fn credential_near_expiry_is_invalid() {
        let now = Utc::now();
        let mut credential = Credential::bearer("tok", None);
        assert!(credential.is_valid_at(now));

        credential.expiry = Some(now + Duration::seconds(30));
        assert!(credential.is_expired_at(now));
        assert!(!credential.is_valid_at(now));

        credential.expiry = Some(now + Duration::minutes(10));
        assert!(credential.is_valid_at(now));
    }

    #[test]
    fn unrepresentable_lifetime_means_no_expiry() {
        let credential = Credential::bearer("tok", Some(i64::MAX));
        assert_eq!(credential.expiry, None);
        assert!(credential.is_valid());

        assert!(expiry_after(3600).is_some());
        assert_eq!(expiry_after(i64::MIN), None);
    }

    #[test]
    fn empty_access_token_is_never_valid() {
        let credential = Credential::bearer("", None);
        assert!(!credential.is_valid());
    }

    #[test]
    fn parses_authorized_user_token_file() {
        let json = r#"{
            "token": null,
            "refresh_token": "1//refresh",
            "token_uri": "https://oauth2.googleapis.com/token",
            "client_id": "id.apps.googleusercontent.com",
            "client_secret": "secret",
            "scopes": ["https://www.googleapis.com/auth/documents"],
            "universe_domain": "googleapis.com",
            "account": "",
            "expiry": "2024-05-01T12:00:00.123456Z"
        }"#;

        let credential: Credential = serde_json::from_str(json).unwrap();
        assert_eq!(credential.access_token, "");
        assert!(credential.can_refresh());
        assert!(credential.is_expired());
        assert_eq!(credential.scopes, vec![scopes::DOCUMENTS.to_string()]);
    }
}
