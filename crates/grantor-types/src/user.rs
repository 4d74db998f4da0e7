//! Authenticated principals and the OAuth handshake payloads.

use serde::{Deserialize, Serialize};

/// An authenticated principal as reported by an identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct User {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
}

impl User {
    /// Best human-readable name: name, then username, then email.
    pub fn display_name(&self) -> &str {
        if !self.name.is_empty() {
            &self.name
        } else if !self.username.is_empty() {
            &self.username
        } else if !self.email.is_empty() {
            &self.email
        } else {
            "Unknown"
        }
    }
}

/// Parameters handed to an authorizor provider when building the redirect to
/// the identity provider, and later when exchanging the callback code.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizeUser {
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Sealed state envelope round-tripped through the identity provider.
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub redirect_uri: String,
    /// Authorization code, present on the callback leg only.
    #[serde(default)]
    pub code: String,
}

/// Where an authorizor provider wants the user's browser sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizeRedirect {
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_fallback_order() {
        let mut u = User {
            name: "Ada Lovelace".into(),
            username: "ada".into(),
            email: "ada@example.com".into(),
            ..Default::default()
        };
        assert_eq!(u.display_name(), "Ada Lovelace");
        u.name.clear();
        assert_eq!(u.display_name(), "ada");
        u.username.clear();
        assert_eq!(u.display_name(), "ada@example.com");
        u.email.clear();
        assert_eq!(u.display_name(), "Unknown");
    }
}
