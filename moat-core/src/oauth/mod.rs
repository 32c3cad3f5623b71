pub mod anthropic;
pub mod google_gemini_cli;
pub mod openai_codex;
pub mod pkce;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Information about the OAuth authorization URL.
#[derive(Debug, Clone)]
pub struct OAuthAuthInfo {
    pub url: String,
    pub instructions: Option<String>,
}

/// Prompt to show to the user during OAuth.
#[derive(Debug, Clone)]
pub struct OAuthPrompt {
    pub message: String,
    pub placeholder: Option<String>,
}

/// Callbacks for the OAuth login flow. This crate never drives these
/// itself; an interactive CLI or test harness implements them.
#[async_trait]
pub trait OAuthCallbacks: Send + Sync {
    fn on_auth(&self, info: OAuthAuthInfo);
    async fn on_prompt(&self, prompt: OAuthPrompt) -> Result<String>;
    fn on_progress(&self, message: &str);
}

/// Raw token pair plus whatever extra claims a provider's token response
/// carries (e.g. Gemini's `project_id`). Distinct from `Credential`: this
/// is what an `OAuthProvider` speaks; `grant()`/`refresh()` on the
/// corresponding `ProviderPlugin` fold it into a `Credential`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OAuthCredentials {
    pub refresh: String,
    pub access: String,
    /// Expiry timestamp in milliseconds since epoch.
    pub expires: i64,
    #[serde(default, flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Trait for OAuth provider implementations (the authorize/token-exchange
/// plumbing, independent of how the resulting credential gets staged or
/// proxied).
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    async fn login(&self, callbacks: &dyn OAuthCallbacks) -> Result<OAuthCredentials>;
    async fn refresh_token(&self, credentials: &OAuthCredentials) -> Result<OAuthCredentials>;
    fn get_api_key(&self, credentials: &OAuthCredentials) -> String {
        credentials.access.clone()
    }
}
