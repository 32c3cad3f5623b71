//! Anthropic/Claude provider plugin. Distinguishes an OAuth-flavored
//! subscription token (`sk-ant-oat...`) from a raw API key
//! (`sk-ant-api...`); each takes a different header, env var, and staging
//! footprint.

use crate::credential::{Credential, auth_types, meta_keys, token_sources};
use crate::error::{MoatError, Result};
use crate::oauth::OAuthCallbacks as _;
use crate::oauth::anthropic::AnthropicOAuthProvider;
use crate::oauth::OAuthProvider;
use crate::placeholder;
use crate::plugin::{GrantCallbacks, GrantPrompt, GrantRequest, ProviderPlugin, StagedFile};
use crate::proxy::configurator::ProxyConfigurator;
use crate::proxy::transform::anthropic_oauth_workaround;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

const HOST: &str = "api.anthropic.com";
const OAUTH_TOKEN_PREFIX: &str = "sk-ant-oat";
const API_KEY_PREFIX: &str = "sk-ant-api";

pub fn is_oauth_token(token: &str) -> bool {
    token.starts_with(OAUTH_TOKEN_PREFIX)
}

pub fn is_api_key(token: &str) -> bool {
    token.starts_with(API_KEY_PREFIX)
}

fn is_api_key_credential(credential: &Credential) -> bool {
    is_api_key(&credential.token) || credential.auth_type() == Some(auth_types::API_KEY)
}

pub struct AnthropicPlugin {
    oauth: AnthropicOAuthProvider,
}

impl AnthropicPlugin {
    pub fn new() -> Self {
        Self { oauth: AnthropicOAuthProvider }
    }
}

impl Default for AnthropicPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderPlugin for AnthropicPlugin {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn grant(&self, request: &GrantRequest, callbacks: &dyn GrantCallbacks) -> Result<Credential> {
        if request.scope.as_deref() == Some("api-key") {
            let token = callbacks
                .on_prompt(GrantPrompt {
                    message: "Paste your Anthropic API key:".into(),
                    placeholder: None,
                })
                .await?;
            if token.is_empty() {
                return Err(MoatError::grant_with_hint(
                    "empty Anthropic API key",
                    "run the grant again and paste a non-empty key",
                ));
            }
            return Ok(Credential::new("anthropic", token)
                .with_auth_type(auth_types::API_KEY)
                .with_metadata(meta_keys::TOKEN_SOURCE, token_sources::PROMPT));
        }

        let oauth_callbacks = OAuthCallbackAdapter(callbacks);
        let creds = self.oauth.login(&oauth_callbacks).await?;
        let expires_at = DateTime::<Utc>::from_timestamp_millis(creds.expires).unwrap_or_else(Utc::now);
        Ok(Credential::new("anthropic", creds.access)
            .with_auth_type(auth_types::OAUTH)
            .with_metadata(meta_keys::TOKEN_SOURCE, token_sources::OAUTH_FLOW)
            .with_metadata(meta_keys::REFRESH_TOKEN, creds.refresh)
            .with_scopes(vec!["user:inference".to_string()])
            .with_expires_at(expires_at))
    }

    fn configure_proxy(&self, credential: &Credential, configurator: &mut ProxyConfigurator<'_>) -> Result<()> {
        if is_api_key_credential(credential) {
            configurator.set_credential_header(HOST, "x-api-key", &credential.token)?;
        } else {
            configurator.set_credential(HOST, &credential.token)?;
            configurator.add_response_transformer(HOST, anthropic_oauth_workaround())?;
        }
        Ok(())
    }

    fn container_env(&self, credential: &Credential) -> Vec<(String, String)> {
        if is_api_key_credential(credential) {
            vec![("ANTHROPIC_API_KEY".into(), placeholder::GENERIC.into())]
        } else {
            vec![("CLAUDE_CODE_OAUTH_TOKEN".into(), placeholder::GENERIC.into())]
        }
    }

    fn container_mounts(&self, credential: &Credential) -> Result<Vec<StagedFile>> {
        if is_api_key_credential(credential) {
            return Ok(Vec::new());
        }
        let expires_at_ms = credential.expires_at.map(|e| e.timestamp_millis()).unwrap_or(0);
        let scopes = credential.scopes.clone().unwrap_or_default();
        let body = serde_json::json!({
            "claudeAiOauth": {
                "accessToken": placeholder::GENERIC,
                "expiresAt": expires_at_ms,
                "scopes": scopes,
            }
        });
        Ok(vec![StagedFile::credential_file(
            ".credentials.json",
            serde_json::to_vec_pretty(&body)?,
        )])
    }

    fn cleanup(&self, _cleanup_path: &str) -> Result<()> {
        Ok(())
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    async fn refresh(&self, credential: &Credential) -> Result<Credential> {
        if credential.auth_type() != Some(auth_types::OAUTH) {
            return Err(MoatError::config("Anthropic API-key credentials are not refreshable"));
        }
        let refresh_token = credential
            .refresh_token()
            .ok_or_else(|| MoatError::Corruption("Anthropic OAuth credential missing refresh_token".into()))?;
        let creds = crate::oauth::OAuthCredentials {
            refresh: refresh_token.to_string(),
            access: credential.token.clone(),
            expires: credential.expires_at.map(|e| e.timestamp_millis()).unwrap_or(0),
            extra: Default::default(),
        };
        let refreshed = self.oauth.refresh_token(&creds).await?;
        let expires_at = DateTime::<Utc>::from_timestamp_millis(refreshed.expires).unwrap_or_else(Utc::now);
        let mut out = Credential::new("anthropic", refreshed.access)
            .with_auth_type(auth_types::OAUTH)
            .with_metadata(meta_keys::TOKEN_SOURCE, token_sources::OAUTH_FLOW)
            .with_metadata(meta_keys::REFRESH_TOKEN, refreshed.refresh)
            .with_expires_at(expires_at);
        out.scopes = credential.scopes.clone();
        Ok(out)
    }

    fn describe(&self) -> Option<&str> {
        Some("Anthropic / Claude (API key or Claude Pro/Max OAuth)")
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
    use crate::proxy::configurator::HostRegistry;

    #[test]
    fn classifies_oauth_vs_api_key_by_prefix() {
        assert!(is_oauth_token("sk-ant-oat01-abc"));
        assert!(!is_oauth_token("sk-ant-api03-abc"));
        assert!(is_api_key("sk-ant-api03-abc"));
        assert!(!is_api_key("sk-ant-oat01-abc"));
    }

    #[test]
    fn api_key_credential_uses_x_api_key_header_and_no_staging_file() {
        let plugin = AnthropicPlugin::new();
        let cred = Credential::new("anthropic", "sk-ant-api03-xyz").with_auth_type(auth_types::API_KEY);
        let mut registry = HostRegistry::new();
        let mut cfg = registry.for_plugin("anthropic");
        plugin.configure_proxy(&cred, &mut cfg).unwrap();
        drop(cfg);
        let rule = registry.resolve(HOST).unwrap();
        assert_eq!(rule.credential.as_ref().unwrap().header_name, "x-api-key");
        assert_eq!(rule.credential.as_ref().unwrap().header_value, "sk-ant-api03-xyz");
        assert!(plugin.container_mounts(&cred).unwrap().is_empty());
        let env = plugin.container_env(&cred);
        assert_eq!(env, vec![("ANTHROPIC_API_KEY".to_string(), placeholder::GENERIC.to_string())]);
    }

    #[test]
    fn oauth_credential_gets_bearer_plus_staging_file_plus_transformer() {
        let plugin = AnthropicPlugin::new();
        let cred = Credential::new("anthropic", "sk-ant-oat01-real-token")
            .with_auth_type(auth_types::OAUTH)
            .with_expires_at(Utc::now());
        let mut registry = HostRegistry::new();
        let mut cfg = registry.for_plugin("anthropic");
        plugin.configure_proxy(&cred, &mut cfg).unwrap();
        drop(cfg);
        let rule = registry.resolve(HOST).unwrap();
        assert_eq!(rule.credential.as_ref().unwrap().header_name, "Authorization");
        assert_eq!(rule.credential.as_ref().unwrap().header_value, "Bearer sk-ant-oat01-real-token");
        assert_eq!(rule.transformers.len(), 1);
        let mounts = plugin.container_mounts(&cred).unwrap();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].relative_path, ".credentials.json");
        let body: serde_json::Value = serde_json::from_slice(&mounts[0].contents).unwrap();
        assert_eq!(body["claudeAiOauth"]["accessToken"], placeholder::GENERIC);
        let env = plugin.container_env(&cred);
        assert_eq!(env, vec![("CLAUDE_CODE_OAUTH_TOKEN".to_string(), placeholder::GENERIC.to_string())]);
    }

    #[test]
    fn e2_scenario_matches_spec_literal_values() {
        let plugin = AnthropicPlugin::new();
        let expires_at = DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let cred = Credential::new("anthropic", "sk-ant-oat01-XYZ")
            .with_auth_type(auth_types::OAUTH)
            .with_scopes(vec!["user:inference".to_string()])
            .with_expires_at(expires_at);

        let mounts = plugin.container_mounts(&cred).unwrap();
        let body: serde_json::Value = serde_json::from_slice(&mounts[0].contents).unwrap();
        assert_eq!(body["claudeAiOauth"]["accessToken"], "moat-proxy-injected");
        assert_eq!(body["claudeAiOauth"]["expiresAt"], 1893456000000i64);
        assert_eq!(body["claudeAiOauth"]["scopes"], serde_json::json!(["user:inference"]));

        assert_eq!(
            plugin.container_env(&cred),
            vec![("CLAUDE_CODE_OAUTH_TOKEN".to_string(), "moat-proxy-injected".to_string())]
        );

        let mut registry = HostRegistry::new();
        let mut cfg = registry.for_plugin("anthropic");
        plugin.configure_proxy(&cred, &mut cfg).unwrap();
        drop(cfg);
        let rule = registry.resolve(HOST).unwrap();
        assert_eq!(rule.credential.as_ref().unwrap().header_value, "Bearer sk-ant-oat01-XYZ");
        assert_eq!(rule.transformers.len(), 1);
    }
}
