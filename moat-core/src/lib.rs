//! Credential-brokering core for running coding-agent CLIs inside a
//! sandboxed container without ever handing the container a real token:
//! a provider registry, an encrypted credential store, a per-run proxy
//! configuration contract, a background token-refresh loop, and the
//! staging-directory protocol that hands provider-specific session files
//! to the sandbox.

pub mod credential;
pub mod error;
pub mod grants;
pub mod oauth;
pub mod placeholder;
pub mod plugin;
pub mod providers;
pub mod proxy;
pub mod refresh;
pub mod registry;
pub mod session;
pub mod staging;
pub mod store;

pub use credential::Credential;
pub use error::{MoatError, Result};
pub use grants::{resolve_implications, validate_grant, Grant};
pub use plugin::{GrantAuthInfo, GrantCallbacks, GrantPrompt, GrantRequest, ProviderPlugin, StagedFile};
pub use providers::register_all;
pub use proxy::{apply_chain, HostRegistry, ProxyConfigurator, ResponseTransformer};
pub use registry::ProviderRegistry;
pub use session::{Session, SessionManager, SessionState};
pub use staging::StagingRoot;
pub use store::{CredentialStore, Profile, StoreKey};

#[cfg(test)]
mod invariants {
    //! Crate-wide properties that hold across every compiled plugin, not
    //! just one provider's own test module.

    use crate::credential::{auth_types, meta_keys, Credential};
    use crate::plugin::ProviderPlugin;
    use crate::proxy::configurator::HostRegistry;
    use crate::providers::{anthropic, gemini, github, npm, openai_codex};
    use chrono::Utc;

    const REAL_TOKEN: &str = "sekrit-real-credential-value-should-never-leak";

    fn assert_real_token_never_surfaces(plugin: &dyn ProviderPlugin, credential: &Credential) {
        for (_k, v) in plugin.container_env(credential) {
            assert!(!v.contains(REAL_TOKEN), "{} leaked the real token into container_env", plugin.name());
        }
        for file in plugin.container_mounts(credential).unwrap() {
            let text = String::from_utf8_lossy(&file.contents);
            assert!(
                !text.contains(REAL_TOKEN),
                "{} leaked the real token into staged file {}",
                plugin.name(),
                file.relative_path
            );
        }
    }

    #[test]
    fn container_never_sees_real_tokens_oauth_and_api_key() {
        let anthropic = anthropic::AnthropicPlugin::default();
        for cred in [
            Credential::new("anthropic", REAL_TOKEN).with_auth_type(auth_types::API_KEY),
            Credential::new("anthropic", format!("sk-ant-oat01-{REAL_TOKEN}"))
                .with_auth_type(auth_types::OAUTH)
                .with_expires_at(Utc::now()),
        ] {
            assert_real_token_never_surfaces(&anthropic, &cred);
        }

        let gemini = gemini::GeminiPlugin::default();
        for cred in [
            Credential::new("gemini", REAL_TOKEN).with_auth_type(auth_types::API_KEY),
            Credential::new("gemini", REAL_TOKEN).with_auth_type(auth_types::OAUTH),
        ] {
            assert_real_token_never_surfaces(&gemini, &cred);
        }

        let github = github::GitHubPlugin::default();
        assert_real_token_never_surfaces(&github, &Credential::new("github", REAL_TOKEN));

        let codex = openai_codex::OpenAiCodexPlugin::default();
        for cred in [
            Credential::new("openai-codex", format!("sk-{REAL_TOKEN}")).with_auth_type(auth_types::API_KEY),
            Credential::new("openai-codex", REAL_TOKEN)
                .with_auth_type(auth_types::OAUTH)
                .with_metadata(meta_keys::ACCOUNT_ID, "acct_1"),
        ] {
            assert_real_token_never_surfaces(&codex, &cred);
        }

        let npm = npm::NpmPlugin::default();
        let entries = serde_json::json!([{"host": "registry.npmjs.org", "token": REAL_TOKEN}]);
        let npm_cred = Credential::new("npm", entries.to_string());
        assert_real_token_never_surfaces(&npm, &npm_cred);
    }

    #[test]
    fn proxy_registration_still_carries_the_real_token() {
        // The real token must reach the proxy's host map (that's the whole
        // point) even though it never reaches the container.
        let anthropic = anthropic::AnthropicPlugin::default();
        let cred = Credential::new("anthropic", format!("sk-ant-oat01-{REAL_TOKEN}"))
            .with_auth_type(auth_types::OAUTH);
        let mut registry = HostRegistry::new();
        anthropic.configure_proxy(&cred, &mut registry.for_plugin("anthropic")).unwrap();
        let rule = registry.resolve("api.anthropic.com").unwrap();
        assert!(rule.credential.as_ref().unwrap().header_value.contains(REAL_TOKEN));
    }
}
