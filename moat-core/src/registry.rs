//! The provider registry: canonical-name -> plugin map with alias
//! resolution, populated once via an explicit `register_all` entry point
//! rather than implicit constructors, and with a deterministic two-tier
//! precedence between compiled and config-driven providers.

use crate::error::{MoatError, Result};
use crate::plugin::ProviderPlugin;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Tier {
    ConfigDriven = 0,
    Compiled = 1,
}

struct Entry {
    plugin: Arc<dyn ProviderPlugin>,
    tier: Tier,
}

/// Global provider registry for one process. Compiled plugins are
/// registered first and "frozen"; the config-driven loader then skips any
/// name already claimed by a compiled plugin, so precedence never depends
/// on registration order at the call site.
#[derive(Default)]
pub struct ProviderRegistry {
    canonical: HashMap<String, Entry>,
    aliases: HashMap<String, String>,
    /// Names reserved by `register_dynamic_provider_name` ahead of their
    /// plugin loading (e.g. a YAML provider that should validate grants
    /// before its config-driven loader has run).
    known_names: std::collections::HashSet<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register_tier(&mut self, plugin: Arc<dyn ProviderPlugin>, tier: Tier) {
        let name = plugin.name().to_string();
        match self.canonical.get(&name) {
            Some(existing) if existing.tier > tier => {
                tracing::debug!(provider = %name, "config-driven registration skipped: compiled plugin already registered");
            }
            Some(existing) if existing.tier == tier => {
                tracing::info!(provider = %name, "duplicate {:?} registration for provider, replacing", tier);
                self.canonical.insert(name, Entry { plugin, tier });
            }
            _ => {
                self.canonical.insert(name, Entry { plugin, tier });
            }
        }
    }

    /// Register a compiled (built-in) plugin. Compiled registrations always
    /// win over config-driven ones for the same canonical name.
    pub fn register(&mut self, plugin: Arc<dyn ProviderPlugin>) {
        self.register_tier(plugin, Tier::Compiled);
    }

    /// Register a provider discovered from config (YAML) at load time.
    pub fn register_dynamic_provider(&mut self, plugin: Arc<dyn ProviderPlugin>) {
        self.register_tier(plugin, Tier::ConfigDriven);
    }

    /// Register an alias -> canonical-name mapping. Aliases are resolved
    /// transitively: registering `b -> a` then `c -> b` makes `c` resolve
    /// to whatever `a` ultimately resolves to.
    pub fn register_alias(&mut self, alias: impl Into<String>, canonical: impl Into<String>) {
        self.aliases.insert(alias.into(), canonical.into());
    }

    fn resolve_alias<'a>(&'a self, name: &'a str) -> &'a str {
        let mut current = name;
        let mut hops = 0;
        while let Some(next) = self.aliases.get(current) {
            if hops > 32 {
                break;
            }
            current = next;
            hops += 1;
        }
        current
    }

    /// Strip any alias to its canonical name, then look up the plugin.
    pub fn get(&self, name: &str) -> Result<Arc<dyn ProviderPlugin>> {
        let canonical = self.resolve_alias(name);
        self.canonical
            .get(canonical)
            .map(|e| e.plugin.clone())
            .ok_or_else(|| MoatError::config(format!("unknown provider: {name}")))
    }

    /// All known provider names: registered canonical plugins plus any
    /// names reserved ahead of their config-driven plugin loading.
    pub fn list(&self) -> Vec<String> {
        let mut names: std::collections::HashSet<String> = self.canonical.keys().cloned().collect();
        names.extend(self.known_names.iter().cloned());
        let mut names: Vec<String> = names.into_iter().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        let canonical = self.resolve_alias(name);
        self.canonical.contains_key(canonical) || self.known_names.contains(canonical)
    }

    /// Reserve a provider name ahead of its config-driven plugin loading,
    /// so grant-string validation against this name succeeds even before
    /// the YAML loader has run.
    pub fn register_dynamic_provider_name(&mut self, name: impl Into<String>) {
        self.known_names.insert(name.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{GrantCallbacks, GrantRequest, StagedFile};
    use crate::proxy::configurator::ProxyConfigurator;
    use async_trait::async_trait;

    struct Stub(&'static str);

    #[async_trait]
    impl ProviderPlugin for Stub {
        fn name(&self) -> &str {
            self.0
        }
        async fn grant(&self, _: &GrantRequest, _: &dyn GrantCallbacks) -> Result<crate::credential::Credential> {
            unimplemented!()
        }
        fn configure_proxy(&self, _: &crate::credential::Credential, _: &mut ProxyConfigurator<'_>) -> Result<()> {
            Ok(())
        }
        fn container_env(&self, _: &crate::credential::Credential) -> Vec<(String, String)> {
            Vec::new()
        }
        fn container_mounts(&self, _: &crate::credential::Credential) -> Result<Vec<StagedFile>> {
            Ok(Vec::new())
        }
        fn cleanup(&self, _: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn compiled_wins_over_config_driven() {
        let mut reg = ProviderRegistry::new();
        reg.register(Arc::new(Stub("anthropic")));
        reg.register_dynamic_provider(Arc::new(Stub("anthropic")));
        assert!(reg.get("anthropic").is_ok());
    }

    #[test]
    fn alias_resolves_transitively() {
        let mut reg = ProviderRegistry::new();
        reg.register(Arc::new(Stub("anthropic")));
        reg.register_alias("claude", "anthropic");
        reg.register_alias("claude-code", "claude");
        assert_eq!(reg.get("claude-code").unwrap().name(), "anthropic");
    }

    #[test]
    fn unknown_provider_errors() {
        let reg = ProviderRegistry::new();
        assert!(reg.get("nope").is_err());
    }
}
