//! GitHub provider plugin: a plain personal-access-token credential
//! (`gh auth token` or `GITHUB_TOKEN`/`GH_TOKEN` env), not an OAuth app
//! flow. Bearer-authenticates both the REST and web hosts.

use crate::credential::{Credential, auth_types, meta_keys, token_sources};
use crate::error::{MoatError, Result};
use crate::placeholder;
use crate::plugin::{GrantCallbacks, GrantPrompt, GrantRequest, ProviderPlugin, StagedFile};
use crate::proxy::configurator::ProxyConfigurator;
use async_trait::async_trait;
use std::process::Command;

const API_HOST: &str = "api.github.com";
const WEB_HOST: &str = "github.com";

fn sniff_env() -> Option<String> {
    std::env::var("GITHUB_TOKEN")
        .ok()
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("GH_TOKEN").ok().filter(|s| !s.is_empty()))
}

fn sniff_cli() -> Option<String> {
    let output = Command::new("gh").args(["auth", "token"]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let token = String::from_utf8(output.stdout).ok()?.trim().to_string();
    if token.is_empty() { None } else { Some(token) }
}

pub struct GitHubPlugin;

impl GitHubPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GitHubPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderPlugin for GitHubPlugin {
    fn name(&self) -> &str {
        "github"
    }

    async fn grant(&self, _request: &GrantRequest, callbacks: &dyn GrantCallbacks) -> Result<Credential> {
        if let Some(token) = sniff_cli() {
            return Ok(Credential::new("github", token)
                .with_auth_type(auth_types::API_KEY)
                .with_metadata(meta_keys::TOKEN_SOURCE, token_sources::CLI));
        }
        if let Some(token) = sniff_env() {
            return Ok(Credential::new("github", token)
                .with_auth_type(auth_types::API_KEY)
                .with_metadata(meta_keys::TOKEN_SOURCE, token_sources::ENV));
        }
        let token = callbacks
            .on_prompt(GrantPrompt {
                message: "Paste a GitHub personal access token:".into(),
                placeholder: None,
            })
            .await?;
        if token.is_empty() {
            return Err(MoatError::grant_with_hint(
                "empty GitHub token",
                "run `gh auth login` first, or paste a token with repo scope",
            ));
        }
        Ok(Credential::new("github", token)
            .with_auth_type(auth_types::API_KEY)
            .with_metadata(meta_keys::TOKEN_SOURCE, token_sources::PROMPT))
    }

    fn configure_proxy(&self, credential: &Credential, configurator: &mut ProxyConfigurator<'_>) -> Result<()> {
        configurator.set_credential(API_HOST, &credential.token)?;
        configurator.set_credential(WEB_HOST, &credential.token)?;
        Ok(())
    }

    fn container_env(&self, _credential: &Credential) -> Vec<(String, String)> {
        vec![
            ("GH_TOKEN".into(), placeholder::GITHUB_FORMAT.into()),
            ("GIT_TERMINAL_PROMPT".into(), "0".into()),
        ]
    }

    fn container_mounts(&self, _credential: &Credential) -> Result<Vec<StagedFile>> {
        let Some(home) = dirs::home_dir() else { return Ok(Vec::new()) };
        let gh_config = home.join(".config").join("gh").join("config.yml");
        let Ok(contents) = std::fs::read(&gh_config) else { return Ok(Vec::new()) };
        Ok(vec![StagedFile::config_file(".config/gh/config.yml", contents)])
    }

    fn cleanup(&self, _cleanup_path: &str) -> Result<()> {
        Ok(())
    }

    fn supports_refresh(&self) -> bool {
        true
    }

    async fn refresh(&self, credential: &Credential) -> Result<Credential> {
        match credential.token_source() {
            Some(token_sources::CLI) => {
                let token = sniff_cli().ok_or_else(|| {
                    MoatError::Revoked("`gh auth token` returned nothing; token likely revoked".into())
                })?;
                Ok(Credential::new("github", token)
                    .with_auth_type(auth_types::API_KEY)
                    .with_metadata(meta_keys::TOKEN_SOURCE, token_sources::CLI))
            }
            Some(token_sources::ENV) => {
                let token = sniff_env().ok_or_else(|| {
                    MoatError::Revoked("GITHUB_TOKEN/GH_TOKEN no longer set".into())
                })?;
                Ok(Credential::new("github", token)
                    .with_auth_type(auth_types::API_KEY)
                    .with_metadata(meta_keys::TOKEN_SOURCE, token_sources::ENV))
            }
            _ => Err(MoatError::config(
                "GitHub credentials sourced from a prompt are not refreshable",
            )),
        }
    }

    fn describe(&self) -> Option<&str> {
        Some("GitHub (personal access token via gh CLI or env)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::configurator::HostRegistry;

    #[test]
    fn configures_both_hosts_with_bearer() {
        let plugin = GitHubPlugin::new();
        let cred = Credential::new("github", "ghp_realtoken");
        let mut registry = HostRegistry::new();
        let mut cfg = registry.for_plugin("github");
        plugin.configure_proxy(&cred, &mut cfg).unwrap();
        drop(cfg);
        for host in [API_HOST, WEB_HOST] {
            let rule = registry.resolve(host).unwrap();
            assert_eq!(rule.credential.as_ref().unwrap().header_value, "Bearer ghp_realtoken");
        }
    }

    #[test]
    fn container_env_is_placeholder_only() {
        let plugin = GitHubPlugin::new();
        let cred = Credential::new("github", "ghp_realtoken");
        let env = plugin.container_env(&cred);
        assert!(env.iter().any(|(k, v)| k == "GH_TOKEN" && v != "ghp_realtoken"));
        assert!(env.contains(&("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())));
    }

    #[tokio::test]
    async fn prompt_sourced_credential_not_refreshable() {
        let plugin = GitHubPlugin::new();
        let cred = Credential::new("github", "ghp_x")
            .with_metadata(meta_keys::TOKEN_SOURCE, token_sources::PROMPT);
        assert!(plugin.refresh(&cred).await.is_err());
    }
}
