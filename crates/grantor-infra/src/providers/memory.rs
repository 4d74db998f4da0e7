//! In-memory RBAC provider.
//!
//! Stands in for cloud IAM during local development and tests, playing the
//! role the original stack gave its containerized IAM double: grants are
//! recorded in a policy map keyed by role, `authorize_role` adds the user
//! to the role's assumption list, `revoke_role` removes the user and keeps
//! the role.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use grantor_core::provider::{ProviderClient, Rbac};
use grantor_types::error::Problem;
use grantor_types::provider::{ProviderPermission, ProviderRole};
use grantor_types::role::Role;
use grantor_types::user::User;
use serde::Deserialize;
use serde_json::json;

/// Provider `config` block for a memory provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryConfig {
    /// Roles the provider pretends to know about.
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Default)]
struct PolicyState {
    /// role name -> users currently allowed to assume it.
    assumptions: HashMap<String, Vec<String>>,
}

pub struct MemoryProvider {
    known_roles: Vec<String>,
    state: Mutex<PolicyState>,
}

impl MemoryProvider {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            known_roles: config.roles,
            state: Mutex::new(PolicyState::default()),
        }
    }

    pub fn from_value(config: &serde_json::Value) -> Result<Self, Problem> {
        let parsed: MemoryConfig = serde_json::from_value(config.clone())
            .map_err(|e| Problem::configuration(format!("invalid memory provider config: {e}")))?;
        Ok(Self::new(parsed))
    }

    /// Users currently allowed to assume a role (test observation point).
    pub fn assumptions(&self, role: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .assumptions
            .get(role)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether the role exists in the policy map at all.
    pub fn role_exists(&self, role: &str) -> bool {
        self.state.lock().unwrap().assumptions.contains_key(role)
    }
}

impl ProviderClient for MemoryProvider {
    fn rbac(&self) -> Option<&dyn Rbac> {
        Some(self)
    }
}

#[async_trait]
impl Rbac for MemoryProvider {
    async fn authorize_role(
        &self,
        user: &User,
        role: &Role,
    ) -> Result<serde_json::Value, Problem> {
        let mut state = self.state.lock().unwrap();
        // Creating the role on first grant mirrors an IAM role created on
        // demand with an assume-role policy.
        let users = state.assumptions.entry(role.name.clone()).or_default();
        if !users.contains(&user.email) {
            users.push(user.email.clone());
        }
        tracing::info!(role = %role.name, user = %user.email, "memory provider granted role");
        Ok(json!({
            "role_arn": format!("memory:role/{}", role.name),
            "principal": user.email,
        }))
    }

    async fn revoke_role(
        &self,
        user: &User,
        role: &Role,
        _metadata: &serde_json::Value,
    ) -> Result<serde_json::Value, Problem> {
        let mut state = self.state.lock().unwrap();
        let Some(users) = state.assumptions.get_mut(&role.name) else {
            return Err(Problem::validation(format!(
                "role '{}' has no assumption policy",
                role.name
            )));
        };
        users.retain(|u| u != &user.email);
        tracing::info!(role = %role.name, user = %user.email, "memory provider revoked role");
        Ok(json!({"revoked": true, "principal": user.email}))
    }

    async fn list_roles(&self, filter: Option<&str>) -> Result<Vec<ProviderRole>, Problem> {
        Ok(self
            .known_roles
            .iter()
            .filter(|name| filter.map(|f| name.contains(f)).unwrap_or(true))
            .map(|name| ProviderRole {
                id: name.clone(),
                name: name.clone(),
                description: String::new(),
            })
            .collect())
    }

    async fn get_role(&self, name: &str) -> Result<ProviderRole, Problem> {
        if self.known_roles.iter().any(|r| r == name) {
            Ok(ProviderRole {
                id: name.to_string(),
                name: name.to_string(),
                description: String::new(),
            })
        } else {
            Err(Problem::validation(format!("unknown role: {name}")))
        }
    }

    async fn list_permissions(
        &self,
        _filter: Option<&str>,
    ) -> Result<Vec<ProviderPermission>, Problem> {
        Ok(Vec::new())
    }

    async fn get_permission(&self, name: &str) -> Result<ProviderPermission, Problem> {
        Err(Problem::validation(format!("unknown permission: {name}")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            email: "ada@example.com".into(),
            ..Default::default()
        }
    }

    fn role() -> Role {
        Role {
            name: "ops".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn grant_then_revoke_keeps_role_but_removes_user() {
        let provider = MemoryProvider::new(MemoryConfig {
            roles: vec!["ops".into()],
        });

        // Role does not exist until the first grant creates it.
        assert!(!provider.role_exists("ops"));

        let metadata = provider.authorize_role(&user(), &role()).await.unwrap();
        assert!(provider.role_exists("ops"));
        assert_eq!(provider.assumptions("ops"), vec!["ada@example.com"]);

        provider
            .revoke_role(&user(), &role(), &metadata)
            .await
            .unwrap();
        // User removed from the assumption policy, role remains.
        assert!(provider.assumptions("ops").is_empty());
        assert!(provider.role_exists("ops"));
    }

    #[tokio::test]
    async fn double_grant_is_idempotent() {
        let provider = MemoryProvider::new(MemoryConfig::default());
        provider.authorize_role(&user(), &role()).await.unwrap();
        provider.authorize_role(&user(), &role()).await.unwrap();
        assert_eq!(provider.assumptions("ops").len(), 1);
    }

    #[tokio::test]
    async fn revoke_without_grant_is_validation_problem() {
        let provider = MemoryProvider::new(MemoryConfig::default());
        let err = provider
            .revoke_role(&user(), &role(), &serde_json::Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.kind, grantor_types::error::ErrorKind::Validation);
    }
}
