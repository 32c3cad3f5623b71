//! The proxy-configuration contract: a per-run, in-memory host->rule map
//! that an external interception layer consults to decide how to rewrite
//! requests/responses. This module never opens a socket; it is the pure
//! data structure and matching engine the interception layer is built on.

use crate::error::{MoatError, Result};
use crate::proxy::transform::ResponseTransformer;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct CredentialRule {
    pub header_name: String,
    pub header_value: String,
    /// Which grant (`provider[:scope]`) installed this rule, if tagged via
    /// `set_credential_with_grant` (used by multi-host providers like npm).
    pub grant: Option<String>,
}

#[derive(Default)]
pub struct HostRule {
    pub credential: Option<CredentialRule>,
    pub extra_headers: Vec<(String, String)>,
    pub removed_headers: Vec<String>,
    pub transformers: Vec<ResponseTransformer>,
    pub substitution: Option<(String, String)>,
    owner: Option<String>,
}

/// Host->rule table for one run. Host keys are either exact hostnames or a
/// `*.domain` suffix wildcard matching exactly one label deep wider, i.e.
/// `*.example.com` matches `api.example.com` but the match algorithm tries
/// the exact host first and only then the wildcard form.
#[derive(Default)]
pub struct HostRegistry {
    hosts: HashMap<String, HostRule>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope subsequent calls to a single owning plugin, so that two
    /// plugins racing for the same host fail fast instead of silently
    /// overwriting one another.
    pub fn for_plugin<'a>(&'a mut self, owner: &'a str) -> ProxyConfigurator<'a> {
        ProxyConfigurator { registry: self, owner }
    }

    fn wildcard_key(host: &str) -> Option<String> {
        let mut parts = host.splitn(2, '.');
        let _first = parts.next()?;
        let rest = parts.next()?;
        Some(format!("*.{rest}"))
    }

    /// Resolve the rule for a request's `Host` header: exact match first,
    /// then a one-level `*.domain` wildcard. First match wins.
    pub fn resolve(&self, host: &str) -> Option<&HostRule> {
        self.hosts.get(host).or_else(|| {
            Self::wildcard_key(host).and_then(|key| self.hosts.get(&key))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.hosts.keys().map(|s| s.as_str())
    }
}

/// A view over `HostRegistry` scoped to one plugin, matching the spec'd
/// contract method signatures exactly.
pub struct ProxyConfigurator<'a> {
    registry: &'a mut HostRegistry,
    owner: &'a str,
}

impl<'a> ProxyConfigurator<'a> {
    fn entry(&mut self, host: &str) -> &mut HostRule {
        self.registry.hosts.entry(host.to_string()).or_default()
    }

    fn claim(&mut self, host: &str) -> Result<()> {
        let owner = self.owner.to_string();
        let rule = self.entry(host);
        match &rule.owner {
            None => {
                rule.owner = Some(owner);
                Ok(())
            }
            Some(existing) if existing == &owner => Ok(()),
            Some(existing) => Err(MoatError::HostConflict {
                host: host.to_string(),
                existing: existing.clone(),
            }),
        }
    }

    /// `SetCredential(host, value)`: install a bare bearer token.
    pub fn set_credential(&mut self, host: &str, value: &str) -> Result<()> {
        self.set_credential_with_grant(host, "Authorization", &format!("Bearer {value}"), None)
    }

    /// `SetCredentialHeader(host, headerName, value)`.
    pub fn set_credential_header(&mut self, host: &str, header_name: &str, value: &str) -> Result<()> {
        self.set_credential_with_grant(host, header_name, value, None)
    }

    /// `SetCredentialWithGrant(host, header, value, grant)`. Idempotent for
    /// the same owning plugin: re-registering the same host (e.g. the
    /// refresh loop publishing a renewed token) overwrites the prior rule
    /// rather than conflicting, since `claim()` already rejects a
    /// *different* owner contesting the host.
    pub fn set_credential_with_grant(
        &mut self,
        host: &str,
        header_name: &str,
        value: &str,
        grant: Option<&str>,
    ) -> Result<()> {
        self.claim(host)?;
        let grant = grant.map(|g| g.to_string());
        let rule = self.entry(host);
        rule.credential = Some(CredentialRule {
            header_name: header_name.to_string(),
            header_value: value.to_string(),
            grant,
        });
        Ok(())
    }

    /// `AddExtraHeader(host, name, value)`: headers accumulate, unlike the
    /// single credential rule.
    pub fn add_extra_header(&mut self, host: &str, name: &str, value: &str) -> Result<()> {
        self.claim(host)?;
        self.entry(host).extra_headers.push((name.to_string(), value.to_string()));
        Ok(())
    }

    /// `RemoveRequestHeader(host, name)`.
    pub fn remove_request_header(&mut self, host: &str, name: &str) -> Result<()> {
        self.claim(host)?;
        self.entry(host).removed_headers.push(name.to_string());
        Ok(())
    }

    /// `AddResponseTransformer(host, fn)`: transformers chain in
    /// registration order.
    pub fn add_response_transformer(&mut self, host: &str, transformer: ResponseTransformer) -> Result<()> {
        self.claim(host)?;
        self.entry(host).transformers.push(transformer);
        Ok(())
    }

    /// `SetTokenSubstitution(host, placeholder, real)`.
    pub fn set_token_substitution(&mut self, host: &str, placeholder: &str, real: &str) -> Result<()> {
        self.claim(host)?;
        self.entry(host).substitution = Some((placeholder.to_string(), real.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_wins_over_wildcard() {
        let mut registry = HostRegistry::new();
        {
            let mut cfg = registry.for_plugin("p1");
            cfg.set_credential("*.anthropic.com", "wild").unwrap();
        }
        {
            let mut cfg = registry.for_plugin("p2");
            cfg.set_credential_header("api.anthropic.com", "X-Api-Key", "exact").unwrap();
        }
        let rule = registry.resolve("api.anthropic.com").unwrap();
        assert_eq!(rule.credential.as_ref().unwrap().header_value, "exact");
    }

    #[test]
    fn wildcard_matches_subdomain() {
        let mut registry = HostRegistry::new();
        registry.for_plugin("p1").set_credential("*.githubusercontent.com", "tok").unwrap();
        let rule = registry.resolve("raw.githubusercontent.com").unwrap();
        assert_eq!(rule.credential.as_ref().unwrap().header_value, "Bearer tok");
    }

    #[test]
    fn two_plugins_conflict_on_same_host() {
        let mut registry = HostRegistry::new();
        registry.for_plugin("anthropic").set_credential("api.anthropic.com", "a").unwrap();
        let err = registry.for_plugin("other").set_credential("api.anthropic.com", "b").unwrap_err();
        assert!(matches!(err, MoatError::HostConflict { .. }));
    }

    #[test]
    fn same_owner_can_reregister_host_idempotently() {
        // Models the refresh loop re-publishing a renewed token: two
        // ConfigureProxy calls for the same plugin/host must both succeed
        // and leave identical state (testable property #2).
        let mut registry = HostRegistry::new();
        registry.for_plugin("anthropic").set_credential("api.anthropic.com", "old").unwrap();
        registry.for_plugin("anthropic").set_credential("api.anthropic.com", "new").unwrap();
        let rule = registry.resolve("api.anthropic.com").unwrap();
        assert_eq!(rule.credential.as_ref().unwrap().header_value, "Bearer new");
    }

    #[test]
    fn headers_accumulate_credential_is_singular() {
        let mut registry = HostRegistry::new();
        let mut cfg = registry.for_plugin("p");
        cfg.set_credential("h", "v").unwrap();
        cfg.add_extra_header("h", "X-One", "1").unwrap();
        cfg.add_extra_header("h", "X-Two", "2").unwrap();
        drop(cfg);
        let rule = registry.resolve("h").unwrap();
        assert_eq!(rule.extra_headers.len(), 2);
    }
}
