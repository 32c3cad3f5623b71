//! OpenAI/Codex provider plugin. A `sk-`-prefixed token is a plain API key;
//! anything else is treated as a ChatGPT OAuth access token, which is
//! smuggled into the container as a synthesized placeholder JWT and
//! recovered by the proxy via token substitution (never header injection,
//! since the container's own auth.json carries the placeholder "access
//! token" verbatim).

use crate::credential::{Credential, auth_types, meta_keys, token_sources};
use crate::error::{MoatError, Result};
use crate::oauth::openai_codex::OpenAiCodexOAuthProvider;
use crate::oauth::OAuthProvider;
use crate::placeholder::{self, base64url};
use crate::plugin::{GrantCallbacks, GrantPrompt, GrantRequest, ProviderPlugin, StagedFile};
use crate::proxy::configurator::ProxyConfigurator;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

const API_HOST: &str = "api.openai.com";
const CHATGPT_HOST: &str = "chatgpt.com";
/// Published Codex CLI OAuth client id, embedded in access-token JWT claims.
const CODEX_CLIENT_ID: &str = "app_EMoamEEZ73f0CkXaXp7hrann";
const JWT_HEADER: &str = r#"{"alg":"RS256","typ":"JWT"}"#;

fn is_api_key(token: &str) -> bool {
    token.starts_with("sk-")
}

fn jwt_header_segment() -> String {
    base64url(JWT_HEADER.as_bytes())
}

fn jwt_signature_segment() -> String {
    base64url(placeholder::JWT_PLACEHOLDER_SIGNATURE.as_bytes())
}

/// Build the placeholder `id_token`: carries the real account id so the
/// container-side CLI can display/route by account without ever holding a
/// usable token.
fn build_id_token(account_id: &str, exp: i64) -> String {
    let payload = serde_json::json!({
        "sub": format!("user-{account_id}"),
        "exp": exp,
        "https://api.openai.com/auth.chatgpt_account_id": account_id,
    });
    let payload_b64 = base64url(payload.to_string().as_bytes());
    format!("{}.{}.{}", jwt_header_segment(), payload_b64, jwt_signature_segment())
}

/// Build the placeholder `access_token`: a superset of the id_token claims
/// plus the audience/client/issuer block a real Codex access token has.
fn build_access_token(account_id: &str, exp: i64, iat: i64) -> String {
    let payload = serde_json::json!({
        "sub": format!("user-{account_id}"),
        "aud": ["https://api.openai.com/v1", CODEX_CLIENT_ID],
        "client_id": CODEX_CLIENT_ID,
        "iat": iat,
        "iss": "https://auth.openai.com",
        "exp": exp,
        "https://api.openai.com/auth": {
            "chatgpt_account_id": account_id,
            "chatgpt_plan_type": "unknown",
        },
        "https://api.openai.com/auth.chatgpt_account_id": account_id,
    });
    let payload_b64 = base64url(payload.to_string().as_bytes());
    format!("{}.{}.{}", jwt_header_segment(), payload_b64, jwt_signature_segment())
}

pub struct OpenAiCodexPlugin {
    oauth: OpenAiCodexOAuthProvider,
}

impl OpenAiCodexPlugin {
    pub fn new() -> Self {
        Self { oauth: OpenAiCodexOAuthProvider }
    }
}

impl Default for OpenAiCodexPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderPlugin for OpenAiCodexPlugin {
    fn name(&self) -> &str {
        "openai-codex"
    }

    async fn grant(&self, request: &GrantRequest, callbacks: &dyn GrantCallbacks) -> Result<Credential> {
        if request.scope.as_deref() == Some("api-key") {
            let token = callbacks
                .on_prompt(GrantPrompt { message: "Paste your OpenAI API key:".into(), placeholder: None })
                .await?;
            if !is_api_key(&token) {
                return Err(MoatError::grant_with_hint(
                    "OpenAI API keys must start with sk-",
                    "paste the key from platform.openai.com, not a ChatGPT session token",
                ));
            }
            return Ok(Credential::new("openai-codex", token)
                .with_auth_type(auth_types::API_KEY)
                .with_metadata(meta_keys::TOKEN_SOURCE, token_sources::PROMPT));
        }

        let oauth_callbacks = OAuthCallbackAdapter(callbacks);
        let creds = self.oauth.login(&oauth_callbacks).await?;
        let expires_at = DateTime::<Utc>::from_timestamp_millis(creds.expires).unwrap_or_else(Utc::now);
        let account_id = creds
            .extra
            .get("account_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(Credential::new("openai-codex", creds.access)
            .with_auth_type(auth_types::OAUTH)
            .with_metadata(meta_keys::TOKEN_SOURCE, token_sources::OAUTH_FLOW)
            .with_metadata(meta_keys::REFRESH_TOKEN, creds.refresh)
            .with_metadata(meta_keys::ACCOUNT_ID, account_id)
            .with_expires_at(expires_at))
    }

    fn configure_proxy(&self, credential: &Credential, configurator: &mut ProxyConfigurator<'_>) -> Result<()> {
        if credential.auth_type() == Some(auth_types::API_KEY) {
            configurator.set_credential(API_HOST, &credential.token)?;
        } else {
            let account_id = credential
                .metadata
                .get(meta_keys::ACCOUNT_ID)
                .cloned()
                .unwrap_or_default();
            let exp = credential
                .expires_at
                .map(|e| e.timestamp())
                .unwrap_or_else(|| (Utc::now() + chrono::Duration::days(365)).timestamp());
            let placeholder_access = build_access_token(&account_id, exp, Utc::now().timestamp());
            configurator.set_token_substitution(CHATGPT_HOST, &placeholder_access, &credential.token)?;
        }
        Ok(())
    }

    fn container_env(&self, credential: &Credential) -> Vec<(String, String)> {
        if credential.auth_type() == Some(auth_types::API_KEY) {
            vec![("OPENAI_API_KEY".into(), placeholder::OPENAI_FORMAT.into())]
        } else {
            Vec::new()
        }
    }

    fn container_mounts(&self, credential: &Credential) -> Result<Vec<StagedFile>> {
        if credential.auth_type() == Some(auth_types::API_KEY) {
            return Ok(Vec::new());
        }
        let account_id = credential.metadata.get(meta_keys::ACCOUNT_ID).cloned().unwrap_or_default();
        let exp = credential
            .expires_at
            .map(|e| e.timestamp())
            .unwrap_or_else(|| (Utc::now() + chrono::Duration::days(365)).timestamp());
        let iat = Utc::now().timestamp();
        let id_token = build_id_token(&account_id, exp);
        let access_token = build_access_token(&account_id, exp, iat);
        let body = serde_json::json!({
            "id_token": id_token,
            "access_token": access_token,
            "refresh_token": placeholder::GENERIC,
            "account_id": account_id,
        });
        Ok(vec![StagedFile::credential_file("auth.json", serde_json::to_vec_pretty(&body)?)])
    }

    fn cleanup(&self, _cleanup_path: &str) -> Result<()> {
        Ok(())
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    async fn refresh(&self, credential: &Credential) -> Result<Credential> {
        if credential.auth_type() != Some(auth_types::OAUTH) {
            return Err(MoatError::config("OpenAI API-key credentials are not refreshable"));
        }
        let refresh_token = credential
            .refresh_token()
            .ok_or_else(|| MoatError::Corruption("Codex OAuth credential missing refresh_token".into()))?;
        let creds = crate::oauth::OAuthCredentials {
            refresh: refresh_token.to_string(),
            access: credential.token.clone(),
            expires: credential.expires_at.map(|e| e.timestamp_millis()).unwrap_or(0),
            extra: Default::default(),
        };
        let refreshed = self.oauth.refresh_token(&creds).await?;
        let expires_at = DateTime::<Utc>::from_timestamp_millis(refreshed.expires).unwrap_or_else(Utc::now);
        let account_id = refreshed
            .extra
            .get("account_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(Credential::new("openai-codex", refreshed.access)
            .with_auth_type(auth_types::OAUTH)
            .with_metadata(meta_keys::TOKEN_SOURCE, token_sources::OAUTH_FLOW)
            .with_metadata(meta_keys::REFRESH_TOKEN, refreshed.refresh)
            .with_metadata(meta_keys::ACCOUNT_ID, account_id)
            .with_expires_at(expires_at))
    }

    fn describe(&self) -> Option<&str> {
        Some("OpenAI / Codex (API key or ChatGPT OAuth)")
    }
}

struct OAuthCallbackAdapter<'a>(&'a dyn GrantCallbacks);

#[async_trait]
impl<'a> crate::oauth::OAuthCallbacks for OAuthCallbackAdapter<'a> {
    fn on_auth(&self, info: crate::oauth::OAuthAuthInfo) {
        self.0.on_auth(crate::plugin::GrantAuthInfo { url: info.url, instructions: info.instructions });
    }

    async fn on_prompt(&self, prompt: crate::oauth::OAuthPrompt) -> Result<String> {
        self.0
            .on_prompt(GrantPrompt { message: prompt.message, placeholder: prompt.placeholder })
            .await
    }

    fn on_progress(&self, message: &str) {
        self.0.on_progress(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_detection() {
        assert!(is_api_key("sk-proj-abc"));
        assert!(!is_api_key("some-chatgpt-session-token"));
    }

    #[test]
    fn access_token_jwt_embeds_real_account_id_and_client_id() {
        use base64::Engine;
        let jwt = build_access_token("acct_42", 9999999999, 1000);
        let payload_b64 = jwt.split('.').nth(1).unwrap();
        let payload_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(payload_b64).unwrap();
        let payload: serde_json::Value = serde_json::from_slice(&payload_bytes).unwrap();
        assert_eq!(payload["https://api.openai.com/auth.chatgpt_account_id"], "acct_42");
        assert_eq!(payload["client_id"], CODEX_CLIENT_ID);
    }
}
