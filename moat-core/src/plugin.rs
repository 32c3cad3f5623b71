//! The provider plugin capability set: one required interface plus a set
//! of optional, default-implemented capabilities, discovered by the
//! registry/refresh-loop/staging orchestrator via trait-method overrides
//! rather than a closed enum of provider kinds.

use crate::credential::Credential;
use crate::error::Result;
use crate::proxy::configurator::ProxyConfigurator;
use async_trait::async_trait;
use chrono::Duration;

/// A file the staging-directory orchestrator should write for a container.
/// Mode is `0o600` for anything carrying a placeholder credential, `0o644`
/// for ordinary config.
#[derive(Debug, Clone)]
pub struct StagedFile {
    /// Path relative to the staging directory root, mirroring the target
    /// tree inside the container (e.g. `.claude/.credentials.json`).
    pub relative_path: String,
    pub contents: Vec<u8>,
    pub mode: u32,
}

impl StagedFile {
    pub fn credential_file(relative_path: impl Into<String>, contents: Vec<u8>) -> Self {
        Self { relative_path: relative_path.into(), contents, mode: 0o600 }
    }

    pub fn config_file(relative_path: impl Into<String>, contents: Vec<u8>) -> Self {
        Self { relative_path: relative_path.into(), contents, mode: 0o644 }
    }
}

/// Information shown to the user to complete an interactive grant (e.g. an
/// OAuth authorize URL to open in a browser).
#[derive(Debug, Clone)]
pub struct GrantAuthInfo {
    pub url: String,
    pub instructions: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GrantPrompt {
    pub message: String,
    pub placeholder: Option<String>,
}

/// Callbacks a plugin's `grant()` implementation uses to talk to whatever
/// is driving the grant (an interactive CLI, a test harness, etc.). This
/// crate never implements the interactive side itself.
#[async_trait]
pub trait GrantCallbacks: Send + Sync {
    fn on_auth(&self, info: GrantAuthInfo);
    async fn on_prompt(&self, prompt: GrantPrompt) -> Result<String>;
    fn on_progress(&self, message: &str);
}

/// A grant request: the scope parsed out of a `provider[:scope]` grant
/// string (see `grants` module), plus any externally-resolved inputs
/// (e.g. an `--account` override or a host for `npm --host=<h>`).
#[derive(Debug, Clone, Default)]
pub struct GrantRequest {
    pub scope: Option<String>,
    pub host: Option<String>,
    /// The credential already on file for this provider, if any. Plugins
    /// that merge new material into an existing multi-entry credential
    /// (npm's per-host token array) use this instead of overwriting.
    pub existing: Option<Credential>,
}

/// Capability set a container runtime or proxy configurator discovers on a
/// plugin by calling its methods; unsupported optional capabilities simply
/// return their default (`None`/empty/no-op).
#[async_trait]
pub trait ProviderPlugin: Send + Sync {
    /// Canonical provider name, e.g. `"anthropic"`.
    fn name(&self) -> &str;

    /// Acquire (or re-acquire) a credential for this provider, interactively
    /// if needed via `callbacks`.
    async fn grant(
        &self,
        request: &GrantRequest,
        callbacks: &dyn GrantCallbacks,
    ) -> Result<Credential>;

    /// Register this credential's host mapping(s) into the per-run proxy
    /// configurator.
    fn configure_proxy(&self, credential: &Credential, configurator: &mut ProxyConfigurator<'_>) -> Result<()>;

    /// Environment variables to set in the container process for this
    /// credential (placeholders only, never real tokens).
    fn container_env(&self, credential: &Credential) -> Vec<(String, String)>;

    /// Files this plugin wants written into the per-run staging directory.
    fn container_mounts(&self, credential: &Credential) -> Result<Vec<StagedFile>>;

    /// Release any resources `container_mounts`/`grant` allocated outside
    /// the staging directory itself (the staging dir is removed by the
    /// orchestrator regardless). `cleanup_path` is whatever this plugin
    /// returned as extra state; most plugins allocate nothing and ignore it.
    fn cleanup(&self, cleanup_path: &str) -> Result<()>;

    /// True if this plugin's credential can be refreshed in the background.
    fn supports_refresh(&self) -> bool {
        false
    }

    /// Refresh buffer: how long before expiry the refresh loop should wake.
    fn refresh_buffer(&self) -> Duration {
        Duration::minutes(10)
    }

    /// Refresh a credential. Only called when `supports_refresh()` is true
    /// and only for credentials whose `token_source` makes refresh valid
    /// (per-provider; see each plugin). Returns a new `Credential`, never
    /// mutating the input.
    async fn refresh(&self, _credential: &Credential) -> Result<Credential> {
        Err(crate::error::MoatError::config(format!(
            "{} does not support refresh",
            self.name()
        )))
    }

    /// Any preparation needed before container start beyond staged files
    /// and env vars (default: none).
    fn prepare_container(&self, _credential: &Credential) -> Result<()> {
        Ok(())
    }

    /// Probe whether a credential is actually accepted by the upstream
    /// service. Default no-op; config-driven providers override this using
    /// their declared `validate` block.
    async fn validate(&self, _credential: &Credential) -> Result<()> {
        Ok(())
    }

    /// Human-readable description for diagnostics/UX.
    fn describe(&self) -> Option<&str> {
        None
    }

    /// Other canonical provider names this grant implicitly satisfies
    /// (see `grants::resolve_implications`).
    fn implied_dependencies(&self) -> Vec<String> {
        Vec::new()
    }
}
