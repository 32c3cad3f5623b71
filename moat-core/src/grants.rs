//! Grant-string parsing and the implication resolver: a `provider:scope`
//! grant may imply others (e.g. a GitHub grant implying an SSH grant for
//! the same host), so the set of active grants for a run is a closure over
//! each requested grant's `implied_dependencies()`.

use crate::error::{MoatError, Result};
use crate::registry::ProviderRegistry;
use std::collections::HashSet;

/// A parsed `provider[:scope]` grant string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Grant {
    pub provider: String,
    pub scope: Option<String>,
}

impl Grant {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(MoatError::config("empty grant string"));
        }
        let (provider, scope) = match raw.split_once(':') {
            Some((p, s)) => (p.to_string(), Some(s.to_string())),
            None => (raw.to_string(), None),
        };
        if provider.is_empty() {
            return Err(MoatError::config(format!("malformed grant string: {raw:?}")));
        }
        Ok(Self { provider, scope })
    }

    pub fn as_string(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{}:{}", self.provider, scope),
            None => self.provider.clone(),
        }
    }
}

/// Validate that a grant string names a registered provider.
pub fn validate_grant(raw: &str, registry: &ProviderRegistry) -> Result<Grant> {
    let grant = Grant::parse(raw)?;
    if !registry.contains(&grant.provider) {
        return Err(MoatError::config(format!(
            "unknown provider in grant: {} (known providers: {})",
            grant.provider,
            registry.list().join(", ")
        )));
    }
    Ok(grant)
}

/// Expand a requested set of grants with each one's implied dependencies,
/// transitively, deduplicated by canonical provider name.
pub fn resolve_implications(grants: &[Grant], registry: &ProviderRegistry) -> Result<Vec<Grant>> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    let mut queue: Vec<Grant> = grants.to_vec();

    while let Some(grant) = queue.pop() {
        if !seen.insert(grant.provider.clone()) {
            continue;
        }
        let plugin = registry.get(&grant.provider)?;
        for implied in plugin.implied_dependencies() {
            if !seen.contains(&implied) {
                queue.push(Grant { provider: implied, scope: None });
            }
        }
        out.push(grant);
    }
    out.sort_by(|a, b| a.provider.cmp(&b.provider));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_only() {
        let g = Grant::parse("anthropic").unwrap();
        assert_eq!(g.provider, "anthropic");
        assert_eq!(g.scope, None);
    }

    #[test]
    fn parses_provider_with_scope() {
        let g = Grant::parse("npm:publish").unwrap();
        assert_eq!(g.provider, "npm");
        assert_eq!(g.scope.as_deref(), Some("publish"));
    }

    #[test]
    fn rejects_empty_grant() {
        assert!(Grant::parse("").is_err());
    }

    #[test]
    fn unknown_provider_error_names_known_set() {
        let mut registry = ProviderRegistry::new();
        registry.register_dynamic_provider_name("anthropic");
        registry.register_dynamic_provider_name("npm");
        let err = validate_grant("not-a-provider", &registry).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("not-a-provider"));
        assert!(message.contains("anthropic"));
        assert!(message.contains("npm"));
    }
}
