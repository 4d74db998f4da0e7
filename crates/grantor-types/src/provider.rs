//! Provider descriptors: capability tags, configuration, and the payload
//! shapes exchanged with provider clients.

use serde::{Deserialize, Serialize};

/// What a provider plug-in can do. Operations require a matching tag; an
/// operation against a provider lacking the tag fails with a configuration
/// problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderCapability {
    Authorizor,
    Rbac,
    Notifier,
    Storage,
}

/// Operator-supplied provider configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Provider kind, e.g. `oauth2`, `slack`, `aws`.
    pub provider: String,
    #[serde(default)]
    pub capabilities: Vec<ProviderCapability>,
    /// Kind-specific settings (client ids, endpoints, channels...).
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ProviderConfig {
    pub fn has_capability(&self, capability: ProviderCapability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// A role as known by the provider itself (listing surface).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRole {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A permission as known by the provider itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderPermission {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Notification payloads, tagged by channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum NotificationRequest {
    Slack {
        /// Channel id, channel name or member id.
        to: String,
        text: String,
        /// Block Kit blocks, passed through verbatim.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        blocks: Vec<serde_json::Value>,
    },
    Email {
        to: String,
        subject: String,
        body: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_check() {
        let cfg = ProviderConfig {
            name: "slack".into(),
            provider: "slack".into(),
            capabilities: vec![ProviderCapability::Notifier],
            ..Default::default()
        };
        assert!(cfg.has_capability(ProviderCapability::Notifier));
        assert!(!cfg.has_capability(ProviderCapability::Rbac));
    }

    #[test]
    fn notification_request_is_channel_tagged() {
        let req = NotificationRequest::Email {
            to: "ops@example.com".into(),
            subject: "Access request".into(),
            body: "please review".into(),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["channel"], serde_json::json!("email"));
    }

    #[test]
    fn provider_config_defaults_enabled() {
        let cfg: ProviderConfig =
            serde_yaml_ng::from_str("name: google\nprovider: oauth2").unwrap();
        assert!(cfg.enabled);
        assert!(cfg.capabilities.is_empty());
    }
}
