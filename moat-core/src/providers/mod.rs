//! Compiled provider plugins plus the config-driven loader. Each module
//! exports one `ProviderPlugin` implementation; `register_all` wires them
//! into a fresh `ProviderRegistry` at the compiled tier and loads the
//! config-driven defaults underneath them.

pub mod anthropic;
pub mod config_provider;
pub mod gemini;
pub mod github;
pub mod npm;
pub mod openai_codex;

use crate::error::Result;
use crate::registry::ProviderRegistry;
use std::path::Path;
use std::sync::Arc;

/// Register the five compiled plugins, then load and register the
/// config-driven providers (embedded defaults plus any user-supplied YAML
/// under `<moat_home>/providers/`). Compiled plugins always win a name
/// collision regardless of call order (see `registry`'s tier precedence),
/// so this function's internal ordering is not load-bearing.
pub fn register_all(moat_home: &Path) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();

    registry.register(Arc::new(anthropic::AnthropicPlugin::default()));
    registry.register(Arc::new(gemini::GeminiPlugin::default()));
    registry.register(Arc::new(github::GitHubPlugin::default()));
    registry.register(Arc::new(openai_codex::OpenAiCodexPlugin::default()));
    registry.register(Arc::new(npm::NpmPlugin::default()));

    let mut defs = config_provider::embedded_defaults();
    defs.extend(config_provider::load_user_providers(moat_home)?);

    for def in defs {
        let aliases = def.aliases.clone();
        let name = def.name.clone();
        registry.register_dynamic_provider(Arc::new(config_provider::ConfigDrivenPlugin::new(def)));
        for alias in aliases {
            registry.register_alias(alias, name.clone());
        }
    }

    Ok(registry)
}
