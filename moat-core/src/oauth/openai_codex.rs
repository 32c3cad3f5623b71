//! OpenAI/Codex ChatGPT OAuth flow. Distinct from a plain `sk-` API key:
//! this exchanges a browser-completed authorization code for a ChatGPT
//! access/id/refresh token triple, whose `id_token` carries the account id
//! the proxy later embeds into placeholder JWTs (see `placeholder` module
//! and `providers::openai_codex`).

use super::{OAuthAuthInfo, OAuthCallbacks, OAuthCredentials, OAuthPrompt, OAuthProvider};
use crate::error::{MoatError, Result};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Deserialize;
use std::collections::HashMap;

const CLIENT_ID: &str = "app_EMoamEEZ73f0CkXaXp7hrann";
const AUTHORIZE_URL: &str = "https://auth.openai.com/oauth/authorize";
const TOKEN_URL: &str = "https://auth.openai.com/oauth/token";
const REDIRECT_URI: &str = "http://localhost:1455/auth/callback";
const SCOPES: &str = "openid profile email offline_access";

/// Decode the `https://api.openai.com/auth.chatgpt_account_id` claim out of
/// an unverified JWT's payload segment. The token is never verified here;
/// only the account id is extracted for use when synthesizing placeholder
/// tokens.
pub fn extract_chatgpt_account_id(id_token: &str) -> Option<String> {
    let payload_b64 = id_token.split('.').nth(1)?;
    let payload_bytes = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
    let payload: serde_json::Value = serde_json::from_slice(&payload_bytes).ok()?;
    payload
        .get("https://api.openai.com/auth.chatgpt_account_id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub struct OpenAiCodexOAuthProvider;

#[async_trait]
impl OAuthProvider for OpenAiCodexOAuthProvider {
    fn id(&self) -> &str {
        "openai-codex"
    }

    fn name(&self) -> &str {
        "OpenAI Codex (ChatGPT login)"
    }

    async fn login(&self, callbacks: &dyn OAuthCallbacks) -> Result<OAuthCredentials> {
        let pkce = super::pkce::generate_pkce();
        let params = [
            ("client_id", CLIENT_ID),
            ("response_type", "code"),
            ("redirect_uri", REDIRECT_URI),
            ("scope", SCOPES),
            ("code_challenge", &pkce.challenge),
            ("code_challenge_method", "S256"),
            ("state", &pkce.verifier),
        ];
        let auth_url = format!(
            "{AUTHORIZE_URL}?{}",
            serde_urlencoded::to_string(&params).map_err(|e| MoatError::config(e.to_string()))?
        );

        callbacks.on_auth(OAuthAuthInfo {
            url: auth_url,
            instructions: Some("Sign in with ChatGPT, then paste the redirected authorization code.".into()),
        });

        let code = callbacks
            .on_prompt(OAuthPrompt { message: "Paste the authorization code:".into(), placeholder: None })
            .await?;

        callbacks.on_progress("Exchanging authorization code for tokens...");

        let client = reqwest::Client::new();
        let resp = client
            .post(TOKEN_URL)
            .json(&serde_json::json!({
                "grant_type": "authorization_code",
                "client_id": CLIENT_ID,
                "code": code,
                "redirect_uri": REDIRECT_URI,
                "code_verifier": pkce.verifier,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MoatError::grant(format!("OpenAI Codex token exchange failed: {body}")));
        }

        #[derive(Deserialize)]
        struct TokenResp {
            access_token: String,
            refresh_token: String,
            id_token: String,
            expires_in: i64,
        }

        let token: TokenResp = resp.json().await?;
        let expires = chrono::Utc::now().timestamp_millis() + token.expires_in * 1000 - 5 * 60 * 1000;

        let mut extra = HashMap::new();
        if let Some(account_id) = extract_chatgpt_account_id(&token.id_token) {
            extra.insert("account_id".to_string(), serde_json::Value::String(account_id));
        }
        extra.insert("id_token".to_string(), serde_json::Value::String(token.id_token));

        Ok(OAuthCredentials { refresh: token.refresh_token, access: token.access_token, expires, extra })
    }

    async fn refresh_token(&self, credentials: &OAuthCredentials) -> Result<OAuthCredentials> {
        let client = reqwest::Client::new();
        let resp = client
            .post(TOKEN_URL)
            .json(&serde_json::json!({
                "grant_type": "refresh_token",
                "client_id": CLIENT_ID,
                "refresh_token": credentials.refresh,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            if body.contains("invalid_grant") {
                return Err(MoatError::Revoked(format!("OpenAI Codex refresh token revoked: {body}")));
            }
            return Err(MoatError::TransientNetwork(format!("OpenAI Codex refresh failed: {body}")));
        }

        #[derive(Deserialize)]
        struct RefreshResp {
            access_token: String,
            refresh_token: String,
            id_token: String,
            expires_in: i64,
        }

        let data: RefreshResp = resp.json().await?;
        let expires = chrono::Utc::now().timestamp_millis() + data.expires_in * 1000 - 5 * 60 * 1000;

        let mut extra = credentials.extra.clone();
        if let Some(account_id) = extract_chatgpt_account_id(&data.id_token) {
            extra.insert("account_id".to_string(), serde_json::Value::String(account_id));
        }
        extra.insert("id_token".to_string(), serde_json::Value::String(data.id_token));

        Ok(OAuthCredentials { refresh: data.refresh_token, access: data.access_token, expires, extra })
    }

    fn get_api_key(&self, credentials: &OAuthCredentials) -> String {
        credentials.access.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    #[test]
    fn extracts_account_id_from_unsigned_jwt() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload = URL_SAFE_NO_PAD.encode(
            br#"{"sub":"user_1","https://api.openai.com/auth.chatgpt_account_id":"acct_123"}"#,
        );
        let token = format!("{header}.{payload}.sig");
        assert_eq!(extract_chatgpt_account_id(&token), Some("acct_123".to_string()));
    }
}
