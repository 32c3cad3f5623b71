//! The credential data model: an opaque token plus metadata, keyed by
//! provider name, with an optional expiry the refresh loop watches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Well-known metadata keys. Providers are free to stash additional keys;
/// these are the ones core code branches on.
pub mod meta_keys {
    pub const AUTH_TYPE: &str = "auth_type";
    pub const TOKEN_SOURCE: &str = "token_source";
    pub const REFRESH_TOKEN: &str = "refresh_token";
    pub const ACCOUNT_ID: &str = "account_id";
}

/// How a credential's token is structured / where it came from.
pub mod auth_types {
    pub const API_KEY: &str = "api_key";
    pub const OAUTH: &str = "oauth";
    pub const SETUP_TOKEN: &str = "setup_token";
}

/// Where a credential's token was originally sniffed from, relevant for
/// deciding whether it can be refreshed (e.g. GitHub: only `cli`/`env`).
pub mod token_sources {
    pub const CLI: &str = "cli";
    pub const ENV: &str = "env";
    pub const OAUTH_FLOW: &str = "oauth_flow";
    pub const PROMPT: &str = "prompt";
}

/// A stored credential for one provider. The `token` field is opaque to the
/// store: for most providers it is a bearer string, but npm stores a JSON
/// array of per-host entries serialized into this same string field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub provider: String,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Credential {
    pub fn new(provider: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            token: token.into(),
            scopes: None,
            expires_at: None,
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_auth_type(mut self, auth_type: &str) -> Self {
        self.metadata.insert(meta_keys::AUTH_TYPE.to_string(), auth_type.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = Some(scopes);
        self
    }

    pub fn auth_type(&self) -> Option<&str> {
        self.metadata.get(meta_keys::AUTH_TYPE).map(|s| s.as_str())
    }

    pub fn token_source(&self) -> Option<&str> {
        self.metadata.get(meta_keys::TOKEN_SOURCE).map(|s| s.as_str())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.metadata.get(meta_keys::REFRESH_TOKEN).map(|s| s.as_str())
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| exp <= Utc::now())
    }

    /// True when within `buffer` of expiry (or already expired).
    pub fn expires_within(&self, buffer: chrono::Duration) -> bool {
        self.expires_at.is_some_and(|exp| exp - buffer <= Utc::now())
    }
}

/// An unencrypted SSH host-key table entry (`<profile-root>/ssh.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SshHostKey {
    pub host: String,
    pub key_fingerprint: String,
    pub key_path: String,
    pub created_at: DateTime<Utc>,
}
