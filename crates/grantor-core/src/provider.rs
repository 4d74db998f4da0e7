//! Provider abstraction: capability traits, the client umbrella and the
//! registry.
//!
//! A provider is a capability-bag. Operations require a matching capability
//! tag; calling an operation the provider is not tagged for fails with a
//! `configuration` problem before any client code runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use grantor_types::error::Problem;
use grantor_types::provider::{
    NotificationRequest, ProviderCapability, ProviderConfig, ProviderPermission, ProviderRole,
};
use grantor_types::role::Role;
use grantor_types::session::Session;
use grantor_types::user::{AuthorizeRedirect, AuthorizeUser, User};

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Identity-provider operations: the OAuth-style login dance.
#[async_trait]
pub trait Authorizor: Send + Sync {
    /// Build the redirect that sends the user's browser to the identity
    /// provider, carrying the sealed `state` through untouched.
    async fn authorize_session(
        &self,
        request: &AuthorizeUser,
    ) -> Result<AuthorizeRedirect, Problem>;

    /// Exchange a callback code for an authenticated session.
    async fn create_session(&self, request: &AuthorizeUser) -> Result<Session, Problem>;

    /// Check a session is still acceptable to the identity provider.
    async fn validate_session(&self, session: &Session) -> Result<(), Problem>;

    /// Refresh an expiring session.
    async fn renew_session(&self, session: &Session) -> Result<Session, Problem>;
}

/// Role-grant operations against the provider's IAM surface.
///
/// `authorize_role` returns provider-specific metadata which is stored and
/// handed back verbatim to `revoke_role`, so a revocation can undo exactly
/// what the grant did.
#[async_trait]
pub trait Rbac: Send + Sync {
    async fn authorize_role(
        &self,
        user: &User,
        role: &Role,
    ) -> Result<serde_json::Value, Problem>;

    async fn revoke_role(
        &self,
        user: &User,
        role: &Role,
        metadata: &serde_json::Value,
    ) -> Result<serde_json::Value, Problem>;

    async fn list_roles(&self, filter: Option<&str>) -> Result<Vec<ProviderRole>, Problem>;

    async fn get_role(&self, name: &str) -> Result<ProviderRole, Problem>;

    async fn list_permissions(
        &self,
        filter: Option<&str>,
    ) -> Result<Vec<ProviderPermission>, Problem>;

    async fn get_permission(&self, name: &str) -> Result<ProviderPermission, Problem>;
}

/// Outbound notification delivery.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_notification(&self, payload: &NotificationRequest) -> Result<(), Problem>;
}

/// The umbrella a concrete provider client implements. Defaults decline
/// every capability; implementations override what they support.
pub trait ProviderClient: Send + Sync {
    fn authorizor(&self) -> Option<&dyn Authorizor> {
        None
    }

    fn rbac(&self) -> Option<&dyn Rbac> {
        None
    }

    fn notifier(&self) -> Option<&dyn Notifier> {
        None
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// A configured provider paired with its client.
pub struct Provider {
    pub config: ProviderConfig,
    pub client: Arc<dyn ProviderClient>,
}

impl Provider {
    pub fn new(config: ProviderConfig, client: Arc<dyn ProviderClient>) -> Self {
        Self { config, client }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Kind string, e.g. `oauth2` or `slack`.
    pub fn kind(&self) -> &str {
        &self.config.provider
    }

    fn capability_error(&self, capability: ProviderCapability) -> Problem {
        Problem::configuration(format!(
            "provider '{}' does not have the {:?} capability",
            self.config.name, capability
        ))
    }

    pub fn authorizor(&self) -> Result<&dyn Authorizor, Problem> {
        if !self.config.has_capability(ProviderCapability::Authorizor) {
            return Err(self.capability_error(ProviderCapability::Authorizor));
        }
        self.client
            .authorizor()
            .ok_or_else(|| self.capability_error(ProviderCapability::Authorizor))
    }

    pub fn rbac(&self) -> Result<&dyn Rbac, Problem> {
        if !self.config.has_capability(ProviderCapability::Rbac) {
            return Err(self.capability_error(ProviderCapability::Rbac));
        }
        self.client
            .rbac()
            .ok_or_else(|| self.capability_error(ProviderCapability::Rbac))
    }

    pub fn notifier(&self) -> Result<&dyn Notifier, Problem> {
        if !self.config.has_capability(ProviderCapability::Notifier) {
            return Err(self.capability_error(ProviderCapability::Notifier));
        }
        self.client
            .notifier()
            .ok_or_else(|| self.capability_error(ProviderCapability::Notifier))
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.config.name)
            .field("provider", &self.config.provider)
            .field("capabilities", &self.config.capabilities)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Name-indexed provider registry, built once at startup from config and
/// passed by reference; keys are lowercased and re-registration replaces
/// the previous entry.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn register(&mut self, provider: Provider) {
        let key = provider.config.name.to_lowercase();
        self.providers.insert(key, Arc::new(provider));
    }

    pub fn get(&self, name: &str) -> Result<Arc<Provider>, Problem> {
        self.providers
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| Problem::configuration(format!("unknown provider: {name}")))
    }

    /// Providers matching a name *or* kind, the lookup notifier requests
    /// use (`provider: slack` may name either).
    pub fn get_by_name_or_kind(&self, name: &str) -> Result<Arc<Provider>, Problem> {
        if let Ok(provider) = self.get(name) {
            return Ok(provider);
        }
        self.providers
            .values()
            .find(|p| p.kind().eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| Problem::configuration(format!("unknown provider: {name}")))
    }

    pub fn by_capability(&self, capability: ProviderCapability) -> Vec<Arc<Provider>> {
        let mut matching: Vec<Arc<Provider>> = self
            .providers
            .values()
            .filter(|p| p.config.has_capability(capability))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.config.name.cmp(&b.config.name));
        matching
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.values().map(|p| p.name()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct NoCapClient;
    impl ProviderClient for NoCapClient {}

    fn provider(name: &str, capabilities: Vec<ProviderCapability>) -> Provider {
        Provider::new(
            ProviderConfig {
                name: name.into(),
                provider: "test".into(),
                capabilities,
                ..Default::default()
            },
            Arc::new(NoCapClient),
        )
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut registry = ProviderRegistry::new();
        registry.register(provider("AWS", vec![ProviderCapability::Rbac]));
        assert!(registry.get("aws").is_ok());
        assert!(registry.get("Aws").is_ok());
    }

    #[test]
    fn reregistration_replaces() {
        let mut registry = ProviderRegistry::new();
        registry.register(provider("aws", vec![]));
        registry.register(provider("aws", vec![ProviderCapability::Rbac]));
        assert_eq!(registry.len(), 1);
        let p = registry.get("aws").unwrap();
        assert!(p.config.has_capability(ProviderCapability::Rbac));
    }

    #[test]
    fn missing_capability_is_configuration_problem() {
        let p = provider("slack", vec![]);
        let err = p.notifier().unwrap_err();
        assert_eq!(err.kind, grantor_types::error::ErrorKind::Configuration);
        assert!(err.detail.contains("slack"));
    }

    #[test]
    fn tagged_capability_without_client_support_still_fails() {
        // Config claims the tag but the client does not implement it.
        let p = provider("slack", vec![ProviderCapability::Notifier]);
        assert!(p.notifier().is_err());
    }

    #[test]
    fn capability_filter() {
        let mut registry = ProviderRegistry::new();
        registry.register(provider("slack", vec![ProviderCapability::Notifier]));
        registry.register(provider("aws", vec![ProviderCapability::Rbac]));
        registry.register(provider("email", vec![ProviderCapability::Notifier]));
        let notifiers = registry.by_capability(ProviderCapability::Notifier);
        assert_eq!(notifiers.len(), 2);
        assert_eq!(notifiers[0].name(), "email");
    }

    #[test]
    fn unknown_provider_is_configuration_problem() {
        let registry = ProviderRegistry::new();
        let err = registry.get("ghost").unwrap_err();
        assert_eq!(err.kind, grantor_types::error::ErrorKind::Configuration);
    }

    #[test]
    fn kind_fallback_lookup() {
        let mut registry = ProviderRegistry::new();
        registry.register(provider("workspace-chat", vec![ProviderCapability::Notifier]));
        // name lookup fails, kind lookup ("test") succeeds
        assert!(registry.get_by_name_or_kind("test").is_ok());
        assert!(registry.get_by_name_or_kind("nope").is_err());
    }
}
