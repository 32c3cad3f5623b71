//! npm provider plugin. Unlike the other compiled plugins, one Credential
//! holds a JSON array of per-host entries (npm routes different scopes to
//! different registries), so most of this plugin's work is array-shaped
//! rather than a single bearer token.

use crate::credential::{Credential, auth_types, meta_keys, token_sources};
use crate::error::{MoatError, Result};
use crate::placeholder;
use crate::plugin::{GrantCallbacks, GrantPrompt, GrantRequest, ProviderPlugin, StagedFile};
use crate::proxy::configurator::ProxyConfigurator;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpmHostToken {
    pub host: String,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_source: Option<String>,
}

fn parse_entries(credential: &Credential) -> Result<Vec<NpmHostToken>> {
    serde_json::from_str(&credential.token)
        .map_err(|e| MoatError::Corruption(format!("corrupt npm credential token array: {e}")))
}

fn sniff_npmrc_token() -> Option<String> {
    let home = dirs::home_dir()?;
    let contents = fs::read_to_string(home.join(".npmrc")).ok()?;
    for line in contents.lines() {
        let line = line.trim();
        if let Some(rest) = line.split(":_authToken=").nth(1) {
            if !rest.is_empty() {
                return Some(rest.trim().to_string());
            }
        }
    }
    None
}

fn sniff_env_token() -> Option<String> {
    std::env::var("NPM_TOKEN").ok().filter(|s| !s.is_empty())
}

/// Upsert `entry` into `entries` by host key, replacing a matching host's
/// entry in place rather than appending a duplicate.
fn merge_entry(mut entries: Vec<NpmHostToken>, entry: NpmHostToken) -> Vec<NpmHostToken> {
    if let Some(slot) = entries.iter_mut().find(|e| e.host == entry.host) {
        *slot = entry;
    } else {
        entries.push(entry);
    }
    entries
}

pub struct NpmPlugin;

impl NpmPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NpmPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderPlugin for NpmPlugin {
    fn name(&self) -> &str {
        "npm"
    }

    /// If `request.host` is set, only that single host entry is
    /// (re-)created and merged by host key into whatever is already stored,
    /// rather than overwriting the whole array.
    async fn grant(&self, request: &GrantRequest, callbacks: &dyn GrantCallbacks) -> Result<Credential> {
        let host = request.host.clone().unwrap_or_else(|| "registry.npmjs.org".to_string());

        let (token, source) = if let Some(t) = sniff_npmrc_token() {
            (t, token_sources::CLI)
        } else if let Some(t) = sniff_env_token() {
            (t, token_sources::ENV)
        } else {
            let token = callbacks
                .on_prompt(GrantPrompt {
                    message: format!("Paste an npm auth token for {host}:"),
                    placeholder: None,
                })
                .await?;
            if token.is_empty() {
                return Err(MoatError::grant_with_hint(
                    "empty npm token",
                    "run `npm login` first, or paste a token with `npm token create`",
                ));
            }
            (token, token_sources::PROMPT)
        };

        let mut entries: Vec<NpmHostToken> = match &request.existing {
            Some(existing) => parse_entries(existing).unwrap_or_default(),
            None => Vec::new(),
        };
        let entry = NpmHostToken {
            host: host.clone(),
            token,
            scopes: None,
            token_source: Some(source.to_string()),
        };
        entries = merge_entry(entries, entry);

        Ok(Credential::new("npm", serde_json::to_string(&entries)?)
            .with_auth_type(auth_types::API_KEY)
            .with_metadata(meta_keys::TOKEN_SOURCE, source))
    }

    fn configure_proxy(&self, credential: &Credential, configurator: &mut ProxyConfigurator<'_>) -> Result<()> {
        for entry in parse_entries(credential)? {
            configurator.set_credential_with_grant(
                &entry.host,
                "Authorization",
                &format!("Bearer {}", entry.token),
                Some("npm"),
            )?;
        }
        Ok(())
    }

    fn container_env(&self, _credential: &Credential) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Synthesize a read-only `.npmrc`: scope->registry lines (real, since
    /// npm needs the real registry host for routing) before token lines
    /// (placeholders), in that fixed order.
    fn container_mounts(&self, credential: &Credential) -> Result<Vec<StagedFile>> {
        let entries = parse_entries(credential)?;
        let mut scope_lines = Vec::new();
        let mut token_lines = Vec::new();
        for entry in &entries {
            if let Some(scopes) = &entry.scopes {
                for scope in scopes {
                    scope_lines.push(format!("{scope}:registry=https://{}/\n", entry.host));
                }
            }
            token_lines.push(format!("//{}/:_authToken={}\n", entry.host, placeholder::NPM_FORMAT));
        }
        let mut contents = String::new();
        for line in scope_lines {
            contents.push_str(&line);
        }
        for line in token_lines {
            contents.push_str(&line);
        }
        Ok(vec![StagedFile::credential_file(".npmrc", contents.into_bytes())])
    }

    fn cleanup(&self, _cleanup_path: &str) -> Result<()> {
        Ok(())
    }

    fn supports_refresh(&self) -> bool {
        false
    }

    fn describe(&self) -> Option<&str> {
        Some("npm (per-registry auth tokens)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::configurator::HostRegistry;

    fn e4_credential() -> Credential {
        let entries = vec![
            NpmHostToken {
                host: "registry.npmjs.org".into(),
                token: "npm_A".into(),
                scopes: None,
                token_source: None,
            },
            NpmHostToken {
                host: "npm.company.com".into(),
                token: "npm_B".into(),
                scopes: Some(vec!["@org".to_string()]),
                token_source: None,
            },
        ];
        Credential::new("npm", serde_json::to_string(&entries).unwrap())
    }

    #[test]
    fn e4_scenario_configures_both_hosts_tagged_npm() {
        let plugin = NpmPlugin::new();
        let cred = e4_credential();
        let mut registry = HostRegistry::new();
        let mut cfg = registry.for_plugin("npm");
        plugin.configure_proxy(&cred, &mut cfg).unwrap();
        drop(cfg);

        let rule_a = registry.resolve("registry.npmjs.org").unwrap();
        assert_eq!(rule_a.credential.as_ref().unwrap().header_value, "Bearer npm_A");
        assert_eq!(rule_a.credential.as_ref().unwrap().grant.as_deref(), Some("npm"));

        let rule_b = registry.resolve("npm.company.com").unwrap();
        assert_eq!(rule_b.credential.as_ref().unwrap().header_value, "Bearer npm_B");
    }

    #[test]
    fn e4_npmrc_scope_lines_precede_token_lines() {
        let plugin = NpmPlugin::new();
        let cred = e4_credential();
        let files = plugin.container_mounts(&cred).unwrap();
        let npmrc = String::from_utf8(files[0].contents.clone()).unwrap();
        let scope_idx = npmrc.find("@org:registry=").unwrap();
        let token_idx = npmrc.find("_authToken=").unwrap();
        assert!(scope_idx < token_idx);
        assert!(npmrc.contains("registry.npmjs.org/:_authToken="));
        assert!(npmrc.contains("npm.company.com/:_authToken="));
        assert!(!npmrc.contains("npm_A"));
        assert!(!npmrc.contains("npm_B"));
    }

    #[test]
    fn merge_entry_replaces_matching_host_in_place() {
        let entries = parse_entries(&e4_credential()).unwrap();
        assert_eq!(entries.len(), 2);

        let replaced = merge_entry(
            entries.clone(),
            NpmHostToken {
                host: "registry.npmjs.org".into(),
                token: "npm_ROTATED".into(),
                scopes: None,
                token_source: Some(token_sources::PROMPT.to_string()),
            },
        );
        assert_eq!(replaced.len(), 2);
        let rotated = replaced.iter().find(|e| e.host == "registry.npmjs.org").unwrap();
        assert_eq!(rotated.token, "npm_ROTATED");
        assert!(replaced.iter().any(|e| e.host == "npm.company.com" && e.token == "npm_B"));
    }

    #[test]
    fn merge_entry_appends_new_host() {
        let entries = parse_entries(&e4_credential()).unwrap();
        let merged = merge_entry(
            entries,
            NpmHostToken { host: "new.registry.test".into(), token: "npm_C".into(), scopes: None, token_source: None },
        );
        assert_eq!(merged.len(), 3);
    }
}
