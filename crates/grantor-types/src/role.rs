//! Role definitions and inheritance resolution.
//!
//! Inheritance is a shallow union: the allow lists of inherited roles
//! accumulate onto the child's, while any deny (own or inherited) overrides
//! an inherited allow. Resolution happens at request time against whatever
//! role snapshot the broker currently holds, never at load time.

use std::collections::BTreeSet;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Paired allow/deny lists used for both permissions and resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

impl RuleSet {
    /// Union `other` into this set, deduplicating while keeping first-seen
    /// order stable.
    fn merge(&mut self, other: &RuleSet) {
        merge_unique(&mut self.allow, &other.allow);
        merge_unique(&mut self.deny, &other.deny);
    }

    /// Allows with denied entries removed.
    pub fn effective_allow(&self) -> Vec<String> {
        let denied: BTreeSet<&str> = self.deny.iter().map(String::as_str).collect();
        self.allow
            .iter()
            .filter(|a| !denied.contains(a.as_str()))
            .cloned()
            .collect()
    }
}

fn merge_unique(target: &mut Vec<String>, extra: &[String]) {
    for item in extra {
        if !target.iter().any(|t| t == item) {
            target.push(item.clone());
        }
    }
}

/// A grantable role as configured by the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Names of roles whose allows this role absorbs.
    #[serde(default)]
    pub inherits: Vec<String>,
    #[serde(default)]
    pub permissions: RuleSet,
    #[serde(default)]
    pub resources: RuleSet,
    /// Providers this role may be granted on.
    #[serde(default)]
    pub providers: Vec<String>,
    /// Identity providers acceptable for authenticating a requestor.
    #[serde(default)]
    pub authenticators: Vec<String>,
    /// Workflows eligible to process an elevation for this role; the first
    /// entry is the default.
    #[serde(default)]
    pub workflows: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Role {
    /// Resolve inheritance against a snapshot of known roles.
    ///
    /// Unknown parents are skipped with a warning rather than failing the
    /// request; a missing parent cannot grant anything. Denies are never
    /// dropped, so an inherited allow that the child denies stays denied.
    pub fn resolve(&self, catalog: &HashMap<String, Role>) -> Role {
        let mut resolved = self.clone();
        for parent_name in &self.inherits {
            match catalog.get(parent_name) {
                Some(parent) => {
                    resolved.permissions.merge(&parent.permissions);
                    resolved.resources.merge(&parent.resources);
                    merge_unique(&mut resolved.providers, &parent.providers);
                }
                None => {
                    tracing::warn!(role = %self.name, parent = %parent_name, "inherited role not found");
                }
            }
        }
        resolved
    }
}
