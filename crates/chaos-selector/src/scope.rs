//! Which namespaces the selector may look at

use regex::Regex;

/// Namespace limits applied on top of every selector
#[derive(Clone, Debug)]
pub struct ScopeOptions {
    /// Scan every namespace rather than only `target_namespace`
    pub cluster_scoped: bool,
    /// The only namespace when not cluster scoped
    pub target_namespace: String,
    /// Require the namespace inject annotation on a target's namespace
    pub enable_filter_namespace: bool,
    /// Targets must live in a namespace matching this
    pub allowed_namespaces: Option<Regex>,
    /// Targets must not live in a namespace matching this
    pub ignored_namespaces: Option<Regex>,
}

impl Default for ScopeOptions {
    fn default() -> Self {
        Self {
            cluster_scoped: true,
            target_namespace: "default".to_string(),
            enable_filter_namespace: false,
            allowed_namespaces: None,
            ignored_namespaces: None,
        }
    }
}

impl ScopeOptions {
    /// Whether the allowed/ignored patterns admit `namespace`
    pub fn is_namespace_allowed(&self, namespace: &str) -> bool {
        if let Some(allowed) = &self.allowed_namespaces {
            if !allowed.is_match(namespace) {
                return false;
            }
        }
        if let Some(ignored) = &self.ignored_namespaces {
            if ignored.is_match(namespace) {
                return false;
            }
        }
        true
    }

    /// Whether `namespace` is inside the scanned scope
    pub fn is_in_scope(&self, namespace: &str) -> bool {
        self.cluster_scoped || namespace == self.target_namespace
    }
}
