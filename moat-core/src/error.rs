//! Error taxonomy for the credential-brokering subsystem.
//!
//! Each variant corresponds to one of the propagation classes: fail-fast
//! config errors, remediable grant/access errors, retryable network errors,
//! terminal revocation, never-silently-recovered corruption, and ordinary
//! not-found conditions callers are expected to handle.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MoatError {
    /// Malformed config, unknown provider, missing required field, invalid
    /// profile name, ambiguous host registration. Fatal, fail fast.
    #[error("config error: {0}")]
    Config(String),

    /// Host already has a credential rule registered by another plugin.
    #[error("host conflict: {host} is already claimed by provider {existing}")]
    HostConflict { host: String, existing: String },

    /// Grant-level failure with a remedial hint for the end user.
    #[error("grant error: {message}{}", hint.as_ref().map(|h| format!(" ({h})")).unwrap_or_default())]
    Grant { message: String, hint: Option<String> },

    /// Marketplace/SSH-style access failure with remedial steps.
    #[error("access error: {message}{}", hint.as_ref().map(|h| format!(" ({h})")).unwrap_or_default())]
    Access { message: String, hint: Option<String> },

    /// Retried by the refresh loop with backoff: timeouts, 5xx, connection reset.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Terminal for a refresh task (e.g. OAuth invalid_grant). The credential
    /// stays in the store; the user must re-authenticate explicitly.
    #[error("credential revoked: {0}")]
    Revoked(String),

    /// Never silently recovered: wrong key, truncated ciphertext, bad JSON
    /// after decryption.
    #[error("decryption/corruption error: {0}")]
    Corruption(String),

    /// Recoverable by the caller: credential, session, or staging file missing.
    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl MoatError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn grant(msg: impl Into<String>) -> Self {
        Self::Grant { message: msg.into(), hint: None }
    }

    pub fn grant_with_hint(msg: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Grant { message: msg.into(), hint: Some(hint.into()) }
    }

    pub fn access(msg: impl Into<String>) -> Self {
        Self::Access { message: msg.into(), hint: None }
    }

    pub fn access_with_hint(msg: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Access { message: msg.into(), hint: Some(hint.into()) }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// True when this error represents an OAuth revocation (`invalid_grant`
    /// and friends) rather than a transient failure, used by the refresh
    /// loop to decide whether to retry or give up permanently.
    pub fn is_revoked(&self) -> bool {
        match self {
            Self::Revoked(_) => true,
            Self::Http(_) => false,
            _ => {
                let msg = self.to_string().to_lowercase();
                msg.contains("invalid_grant") || msg.contains("invalid_token") && msg.contains("revoked")
            }
        }
    }

    /// True when this error is transient and the caller (refresh loop)
    /// should retry with backoff instead of giving up.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork(_) | Self::Http(_) | Self::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, MoatError>;
