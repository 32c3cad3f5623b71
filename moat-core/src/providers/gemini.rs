//! Gemini provider plugin. OAuth (Cloud Code Assist / "gemini-cli" login)
//! Bearer-authenticates the Code Assist backend and needs a token
//! substitution on Google's token-info endpoint for tools that probe the
//! access token directly; a plain API key just needs a header.

use crate::credential::{Credential, auth_types, meta_keys, token_sources};
use crate::error::{MoatError, Result};
use crate::oauth::OAuthCallbacks as _;
use crate::oauth::google_gemini_cli::GeminiCliOAuthProvider;
use crate::oauth::OAuthProvider;
use crate::placeholder;
use crate::plugin::{GrantCallbacks, GrantPrompt, GrantRequest, ProviderPlugin, StagedFile};
use crate::proxy::configurator::ProxyConfigurator;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

const CODE_ASSIST_HOST: &str = "cloudcode-pa.googleapis.com";
const TOKEN_INFO_HOST: &str = "oauth2.googleapis.com";

fn is_api_key_credential(credential: &Credential) -> bool {
    credential.auth_type() == Some(auth_types::API_KEY)
}

pub struct GeminiPlugin {
    oauth: GeminiCliOAuthProvider,
}

impl GeminiPlugin {
    pub fn new() -> Self {
        Self { oauth: GeminiCliOAuthProvider }
    }
}

impl Default for GeminiPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderPlugin for GeminiPlugin {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn grant(&self, request: &GrantRequest, callbacks: &dyn GrantCallbacks) -> Result<Credential> {
        if request.scope.as_deref() == Some("api-key") {
            let token = callbacks
                .on_prompt(GrantPrompt { message: "Paste your Gemini API key:".into(), placeholder: None })
                .await?;
            if token.is_empty() {
                return Err(MoatError::grant("empty Gemini API key"));
            }
            return Ok(Credential::new("gemini", token)
                .with_auth_type(auth_types::API_KEY)
                .with_metadata(meta_keys::TOKEN_SOURCE, token_sources::PROMPT));
        }

        let oauth_callbacks = OAuthCallbackAdapter(callbacks);
        let creds = self.oauth.login(&oauth_callbacks).await?;
        let expires_at = DateTime::<Utc>::from_timestamp_millis(creds.expires).unwrap_or_else(Utc::now);
        let project_id = creds.extra.get("projectId").and_then(|v| v.as_str()).unwrap_or_default();
        Ok(Credential::new("gemini", creds.access)
            .with_auth_type(auth_types::OAUTH)
            .with_metadata(meta_keys::TOKEN_SOURCE, token_sources::OAUTH_FLOW)
            .with_metadata(meta_keys::REFRESH_TOKEN, creds.refresh)
            .with_metadata("project_id", project_id)
            .with_expires_at(expires_at))
    }

    fn configure_proxy(&self, credential: &Credential, configurator: &mut ProxyConfigurator<'_>) -> Result<()> {
        if is_api_key_credential(credential) {
            configurator.set_credential_header(CODE_ASSIST_HOST, "x-goog-api-key", &credential.token)?;
        } else {
            configurator.set_credential(CODE_ASSIST_HOST, &credential.token)?;
            configurator.set_token_substitution(TOKEN_INFO_HOST, placeholder::GENERIC, &credential.token)?;
        }
        Ok(())
    }

    fn container_env(&self, _credential: &Credential) -> Vec<(String, String)> {
        Vec::new()
    }

    fn container_mounts(&self, credential: &Credential) -> Result<Vec<StagedFile>> {
        fn settings_for(selected_type: &str) -> serde_json::Value {
            serde_json::json!({ "security": { "auth": { "selectedType": selected_type } } })
        }

        if is_api_key_credential(credential) {
            let settings = settings_for("gemini-api-key");
            return Ok(vec![StagedFile::config_file(
                "settings.json",
                serde_json::to_vec_pretty(&settings)?,
            )]);
        }
        let settings = settings_for("oauth-personal");
        let creds = serde_json::json!({
            "access_token": placeholder::GENERIC,
            "refresh_token": placeholder::GENERIC,
            "expiry_date": (Utc::now() + Duration::days(365)).timestamp_millis(),
        });
        Ok(vec![
            StagedFile::config_file("settings.json", serde_json::to_vec_pretty(&settings)?),
            StagedFile::credential_file("oauth_creds.json", serde_json::to_vec_pretty(&creds)?),
        ])
    }

    fn cleanup(&self, _cleanup_path: &str) -> Result<()> {
        Ok(())
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    fn refresh_buffer(&self) -> Duration {
        Duration::minutes(5)
    }

    async fn refresh(&self, credential: &Credential) -> Result<Credential> {
        if is_api_key_credential(credential) {
            return Err(MoatError::config("Gemini API-key credentials are not refreshable"));
        }
        let refresh_token = credential.refresh_token().unwrap_or_default();
        if refresh_token.is_empty() {
            return Err(MoatError::config("Gemini OAuth credential has no refresh token"));
        }
        let project_id = credential.metadata.get("project_id").cloned().unwrap_or_default();
        let mut extra = std::collections::HashMap::new();
        extra.insert("projectId".to_string(), serde_json::Value::String(project_id.clone()));
        let creds = crate::oauth::OAuthCredentials {
            refresh: refresh_token.to_string(),
            access: credential.token.clone(),
            expires: credential.expires_at.map(|e| e.timestamp_millis()).unwrap_or(0),
            extra,
        };
        let refreshed = self.oauth.refresh_token(&creds).await?;
        let expires_at = DateTime::<Utc>::from_timestamp_millis(refreshed.expires).unwrap_or_else(Utc::now);
        Ok(Credential::new("gemini", refreshed.access)
            .with_auth_type(auth_types::OAUTH)
            .with_metadata(meta_keys::TOKEN_SOURCE, token_sources::OAUTH_FLOW)
            .with_metadata(meta_keys::REFRESH_TOKEN, refreshed.refresh)
            .with_metadata("project_id", project_id)
            .with_expires_at(expires_at))
    }

    fn describe(&self) -> Option<&str> {
        Some("Google Gemini (API key or Cloud Code Assist OAuth)")
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
    fn oauth_credential_sets_bearer_and_substitution() {
        let plugin = GeminiPlugin::new();
        let cred = Credential::new("gemini", "real-access-token").with_auth_type(auth_types::OAUTH);
        let mut registry = HostRegistry::new();
        let mut cfg = registry.for_plugin("gemini");
        plugin.configure_proxy(&cred, &mut cfg).unwrap();
        drop(cfg);
        assert_eq!(
            registry.resolve(CODE_ASSIST_HOST).unwrap().credential.as_ref().unwrap().header_value,
            "Bearer real-access-token"
        );
        let (placeholder, real) = registry.resolve(TOKEN_INFO_HOST).unwrap().substitution.clone().unwrap();
        assert_eq!(real, "real-access-token");
        assert_ne!(placeholder, "real-access-token");
    }

    #[test]
    fn api_key_credential_uses_goog_api_key_header() {
        let plugin = GeminiPlugin::new();
        let cred = Credential::new("gemini", "AIzaReal").with_auth_type(auth_types::API_KEY);
        let mut registry = HostRegistry::new();
        let mut cfg = registry.for_plugin("gemini");
        plugin.configure_proxy(&cred, &mut cfg).unwrap();
        drop(cfg);
        let rule = registry.resolve(CODE_ASSIST_HOST).unwrap();
        assert_eq!(rule.credential.as_ref().unwrap().header_name, "x-goog-api-key");
    }

    #[test]
    fn staging_names_match_auth_type() {
        let plugin = GeminiPlugin::new();
        let oauth_cred = Credential::new("gemini", "t").with_auth_type(auth_types::OAUTH);
        let files = plugin.container_mounts(&oauth_cred).unwrap();
        assert!(files.iter().any(|f| f.relative_path == "oauth_creds.json"));
        let body = String::from_utf8(
            files.iter().find(|f| f.relative_path == "settings.json").unwrap().contents.clone(),
        )
        .unwrap();
        assert!(body.contains("oauth-personal"));

        let api_cred = Credential::new("gemini", "k").with_auth_type(auth_types::API_KEY);
        let files = plugin.container_mounts(&api_cred).unwrap();
        let body = String::from_utf8(files[0].contents.clone()).unwrap();
        assert!(body.contains("gemini-api-key"));
    }

    #[test]
    fn e5_scenario_republishing_a_refreshed_token_updates_both_hosts() {
        // Models what the refresh loop does after `refresh()` returns: the
        // renewed credential is republished via `configure_proxy`, which
        // must overwrite both the bearer rule and the substitution rule
        // with the new token.
        let plugin = GeminiPlugin::new();
        let mut registry = HostRegistry::new();
        let old = Credential::new("gemini", "at-OLD")
            .with_auth_type(auth_types::OAUTH)
            .with_metadata(meta_keys::REFRESH_TOKEN, "rt-XYZ");
        plugin.configure_proxy(&old, &mut registry.for_plugin("gemini")).unwrap();

        let refreshed = Credential::new("gemini", "at-NEW")
            .with_auth_type(auth_types::OAUTH)
            .with_metadata(meta_keys::REFRESH_TOKEN, "rt-XYZ")
            .with_expires_at(Utc::now() + Duration::seconds(3600));
        plugin.configure_proxy(&refreshed, &mut registry.for_plugin("gemini")).unwrap();

        assert_eq!(
            registry.resolve(CODE_ASSIST_HOST).unwrap().credential.as_ref().unwrap().header_value,
            "Bearer at-NEW"
        );
        let (placeholder, real) = registry.resolve(TOKEN_INFO_HOST).unwrap().substitution.clone().unwrap();
        assert_eq!(placeholder, crate::placeholder::GENERIC);
        assert_eq!(real, "at-NEW");
    }
}
