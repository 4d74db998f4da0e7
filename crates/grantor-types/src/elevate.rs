//! Elevation request and response shapes.
//!
//! The HTTP surface accepts an [`ElevateStaticRequest`] carrying names; the
//! orchestrator resolves those into an [`ElevateRequest`] with the actual
//! [`Role`], then threads an [`ElevateRequestInternal`] (request + user)
//! through the workflow context.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::duration::{validate_duration, DurationError};
use crate::role::Role;
use crate::session::LocalSession;
use crate::task::TaskStatus;
use crate::user::User;

/// Raw `/elevate` request as submitted by a client. Role and providers are
/// referenced by name and resolved at request time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElevateStaticRequest {
    #[serde(default)]
    pub role: String,
    /// One or more providers the grant applies to.
    #[serde(default)]
    pub providers: Vec<String>,
    #[serde(default)]
    pub workflow: String,
    pub reason: String,
    #[serde(default)]
    pub duration: String,
    /// Identities to elevate; empty means the requesting user.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identities: Vec<String>,
    /// Sealed session, if the client already holds one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<LocalSession>,
}

/// Resolved elevation request: the workflow's execution subject.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElevateRequest {
    pub role: Option<Role>,
    /// A role can be applied to multiple providers; grants are issued in
    /// order with independent compensation.
    #[serde(default)]
    pub providers: Vec<String>,
    #[serde(default)]
    pub workflow: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<LocalSession>,
}

impl ElevateRequest {
    /// A request is valid when it names a role, at least one provider and a
    /// reason.
    pub fn is_valid(&self) -> bool {
        self.role.is_some() && !self.providers.is_empty() && !self.reason.is_empty()
    }

    /// Parsed, validated elevation duration.
    pub fn as_duration(&self) -> Result<Duration, DurationError> {
        validate_duration(&self.duration)
    }

    /// Which workflow processes this request: the explicit key, falling
    /// back to the role's first workflow.
    pub fn workflow_name(&self) -> Option<&str> {
        if !self.workflow.is_empty() {
            return Some(&self.workflow);
        }
        self.role
            .as_ref()
            .and_then(|role| role.workflows.first())
            .map(String::as_str)
    }

    /// The request as a JSON object, the shape placed into workflow context.
    pub fn as_map(&self) -> serde_json::Value {
        serde_json::json!({
            "role": self.role,
            "providers": self.providers,
            "workflow": self.workflow,
            "reason": self.reason,
            "duration": self.duration,
            "identities": self.identities,
        })
    }
}

/// Elevation request enriched with server-side state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElevateRequestInternal {
    #[serde(flatten)]
    pub request: ElevateRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorized_at: Option<DateTime<Utc>>,
}

/// `/elevate` response: terminal or in-flight status plus the workflow
/// output (or, before authentication, the redirect the client must follow).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElevateResponse {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// `/elevate/llm` input: a plain-English reason the LLM pipeline turns into
/// an [`ElevateStaticRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElevateLlmRequest {
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_request() -> ElevateRequest {
        ElevateRequest {
            role: Some(Role {
                name: "ops".into(),
                workflows: vec!["slack_approval".into()],
                ..Default::default()
            }),
            providers: vec!["aws".into()],
            reason: "deploy hotfix".into(),
            duration: "1h".into(),
            ..Default::default()
        }
    }

    #[test]
    fn validity_requires_role_provider_reason() {
        assert!(valid_request().is_valid());

        let mut missing_role = valid_request();
        missing_role.role = None;
        assert!(!missing_role.is_valid());

        let mut missing_provider = valid_request();
        missing_provider.providers.clear();
        assert!(!missing_provider.is_valid());

        let mut missing_reason = valid_request();
        missing_reason.reason.clear();
        assert!(!missing_reason.is_valid());
    }

    #[test]
    fn workflow_falls_back_to_role_default() {
        let mut req = valid_request();
        assert_eq!(req.workflow_name(), Some("slack_approval"));
        req.workflow = "custom".into();
        assert_eq!(req.workflow_name(), Some("custom"));
        req.workflow.clear();
        req.role.as_mut().unwrap().workflows.clear();
        assert_eq!(req.workflow_name(), None);
    }

    #[test]
    fn internal_flattens_request_fields() {
        let internal = ElevateRequestInternal {
            request: valid_request(),
            user: Some(User {
                email: "ada@example.com".into(),
                ..Default::default()
            }),
            authorized_at: None,
        };
        let v = serde_json::to_value(&internal).unwrap();
        assert_eq!(v["reason"], serde_json::json!("deploy hotfix"));
        assert_eq!(v["user"]["email"], serde_json::json!("ada@example.com"));

        let back: ElevateRequestInternal = serde_json::from_value(v).unwrap();
        assert!(back.request.is_valid());
    }

    #[test]
    fn duration_validation_delegates() {
        let mut req = valid_request();
        assert!(req.as_duration().is_ok());
        req.duration = "30s".into();
        assert!(req.as_duration().is_err());
    }
}
