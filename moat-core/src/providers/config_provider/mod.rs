//! Config-driven providers: YAML-defined plugins for services that only
//! need header injection or URL-embedded-token substitution, loaded from an
//! embedded defaults bundle plus `~/.moat/providers/*.yaml`. These never
//! compete with a compiled plugin of the same name (see `registry`'s
//! two-tier precedence).

use crate::credential::{Credential, auth_types, token_sources};
use crate::error::{MoatError, Result};
use crate::placeholder;
use crate::plugin::{GrantCallbacks, GrantPrompt, GrantRequest, ProviderPlugin, StagedFile};
use crate::proxy::configurator::ProxyConfigurator;
use crate::proxy::transform::token_scrubber;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Embedded YAML bundle shipped with the crate. Each entry mechanically
/// matches the schema below; `telegram` is the literal fixture from the
/// worked E3 example.
const EMBEDDED_DEFAULTS: &[&str] = &[
    include_str!("defaults/telegram.yaml"),
    include_str!("defaults/sentry.yaml"),
];

#[derive(Debug, Clone, Deserialize)]
pub struct InjectConfig {
    pub header: Option<String>,
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidateConfig {
    pub url: String,
    #[serde(default = "default_validate_method")]
    pub method: String,
    pub header: Option<String>,
    #[serde(default)]
    pub prefix: String,
}

fn default_validate_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigProviderDef {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub hosts: Vec<String>,
    #[serde(default)]
    pub inject: InjectConfig,
    #[serde(default)]
    pub source_env: Vec<String>,
    pub container_env: Option<String>,
    pub validate: Option<ValidateConfig>,
    pub prompt: Option<String>,
}

impl Default for InjectConfig {
    fn default() -> Self {
        Self { header: None, prefix: String::new() }
    }
}

impl ConfigProviderDef {
    /// Fatal-at-load-time validation: required fields present, hosts
    /// non-empty.
    pub fn validate_definition(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(MoatError::config("config provider missing `name`"));
        }
        if self.description.is_empty() {
            return Err(MoatError::config(format!("config provider {:?} missing `description`", self.name)));
        }
        if self.hosts.is_empty() {
            return Err(MoatError::config(format!("config provider {:?} has empty `hosts`", self.name)));
        }
        Ok(())
    }

    pub fn parse_yaml(text: &str) -> Result<Self> {
        let def: ConfigProviderDef = serde_yaml::from_str(text)?;
        def.validate_definition()?;
        Ok(def)
    }

    fn is_header_injection(&self) -> bool {
        self.inject.header.is_some()
    }
}

/// Parse the embedded defaults bundle. Panics only on a corrupt embedded
/// fixture, which is a build-time programming error, not a runtime
/// condition callers need to handle.
pub fn embedded_defaults() -> Vec<ConfigProviderDef> {
    EMBEDDED_DEFAULTS
        .iter()
        .map(|text| ConfigProviderDef::parse_yaml(text).expect("embedded config-provider YAML is well-formed"))
        .collect()
}

/// Load user-defined provider YAML files from `<moat_home>/providers/*.yaml`.
/// A missing directory yields an empty list, not an error.
pub fn load_user_providers(moat_home: &Path) -> Result<Vec<ConfigProviderDef>> {
    let dir = moat_home.join("providers");
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut defs = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_yaml = path.extension().and_then(|e| e.to_str()).map(|e| e == "yaml" || e == "yml").unwrap_or(false);
        if !is_yaml {
            continue;
        }
        let text = std::fs::read_to_string(&path)?;
        defs.push(ConfigProviderDef::parse_yaml(&text)?);
    }
    Ok(defs)
}

/// A config-driven plugin wrapping one YAML definition.
pub struct ConfigDrivenPlugin {
    def: ConfigProviderDef,
}

impl ConfigDrivenPlugin {
    pub fn new(def: ConfigProviderDef) -> Self {
        Self { def }
    }

    pub fn def(&self) -> &ConfigProviderDef {
        &self.def
    }

    fn substitution_placeholder(&self, real_token: &str) -> String {
        placeholder::hashed_placeholder(real_token)
    }

    fn sniff_env(&self) -> Option<String> {
        for var in &self.def.source_env {
            if let Ok(value) = std::env::var(var) {
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }
        None
    }
}

#[async_trait]
impl ProviderPlugin for ConfigDrivenPlugin {
    fn name(&self) -> &str {
        &self.def.name
    }

    async fn grant(&self, _request: &GrantRequest, callbacks: &dyn GrantCallbacks) -> Result<Credential> {
        if let Some(token) = self.sniff_env() {
            return Ok(Credential::new(self.def.name.clone(), token)
                .with_auth_type(auth_types::API_KEY)
                .with_metadata(crate::credential::meta_keys::TOKEN_SOURCE, token_sources::ENV));
        }
        let message = self.def.prompt.clone().unwrap_or_else(|| format!("Paste your {} token:", self.def.name));
        let token = callbacks.on_prompt(GrantPrompt { message, placeholder: None }).await?;
        if token.is_empty() {
            return Err(MoatError::grant_with_hint(
                format!("empty {} token", self.def.name),
                "run the grant again and paste a non-empty token",
            ));
        }
        Ok(Credential::new(self.def.name.clone(), token)
            .with_auth_type(auth_types::API_KEY)
            .with_metadata(crate::credential::meta_keys::TOKEN_SOURCE, token_sources::PROMPT))
    }

    fn configure_proxy(&self, credential: &Credential, configurator: &mut ProxyConfigurator<'_>) -> Result<()> {
        if self.def.is_header_injection() {
            let header = self.def.inject.header.as_deref().unwrap_or("Authorization");
            let value = format!("{}{}", self.def.inject.prefix, credential.token);
            for host in &self.def.hosts {
                configurator.set_credential_with_grant(host, header, &value, Some(&self.def.name))?;
            }
        } else {
            let placeholder = self.substitution_placeholder(&credential.token);
            for host in &self.def.hosts {
                configurator.set_token_substitution(host, &placeholder, &credential.token)?;
                configurator.add_response_transformer(
                    host,
                    token_scrubber(credential.token.clone(), placeholder.clone()),
                )?;
            }
        }
        Ok(())
    }

    fn container_env(&self, credential: &Credential) -> Vec<(String, String)> {
        let Some(name) = &self.def.container_env else { return Vec::new() };
        let value = if self.def.is_header_injection() {
            placeholder::GENERIC.to_string()
        } else {
            self.substitution_placeholder(&credential.token)
        };
        vec![(name.clone(), value)]
    }

    fn container_mounts(&self, _credential: &Credential) -> Result<Vec<StagedFile>> {
        Ok(Vec::new())
    }

    fn cleanup(&self, _cleanup_path: &str) -> Result<()> {
        Ok(())
    }

    fn supports_refresh(&self) -> bool {
        // Open question resolved: config-driven providers are treated as
        // static, matching the source this was distilled from.
        false
    }

    fn describe(&self) -> Option<&str> {
        Some(self.def.description.as_str())
    }

    async fn validate(&self, credential: &Credential) -> Result<()> {
        let Some(validate) = &self.def.validate else { return Ok(()) };
        let url = if validate.url.contains("${token}") {
            validate.url.replace("${token}", &credential.token)
        } else {
            validate.url.clone()
        };

        let client = reqwest::Client::new();
        let mut builder = client.request(
            validate.method.parse().unwrap_or(reqwest::Method::GET),
            &url,
        );
        if !validate.url.contains("${token}") {
            let header = validate.header.as_deref().unwrap_or("Authorization");
            builder = builder.header(header, format!("{}{}", validate.prefix, credential.token));
        }

        let response = tokio::time::timeout(Duration::from_secs(10), builder.send())
            .await
            .map_err(|_| MoatError::TransientNetwork(format!("{} validation timed out", self.def.name)))??;

        match response.status().as_u16() {
            code if code < 300 => Ok(()),
            401 => Err(MoatError::grant(format!("{}: invalid token", self.def.name))),
            403 => Err(MoatError::grant(format!("{}: token rejected", self.def.name))),
            other => Err(MoatError::grant(format!("{}: unexpected status {other}", self.def.name))),
        }
    }
}
