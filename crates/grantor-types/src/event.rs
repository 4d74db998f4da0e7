//! A minimal CloudEvents envelope.
//!
//! Used by `emit` tasks, approval callbacks and the durable backend's
//! `event` signal. Only the attributes the broker actually reads are
//! modelled; unknown extension attributes are preserved in `extensions`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event source attributed to the broker itself.
pub const EVENT_SOURCE: &str = "grantor/broker";

/// Event type carried on approval decisions.
pub const EVENT_TYPE_APPROVAL: &str = "io.grantor.approval";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudEvent {
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacontenttype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl CloudEvent {
    pub fn new(source: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            event_type: event_type.into(),
            subject: None,
            datacontenttype: None,
            data: None,
            extensions: BTreeMap::new(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_json_data(mut self, data: serde_json::Value) -> Self {
        self.datacontenttype = Some("application/json".to_string());
        self.data = Some(data);
        self
    }

    /// The event a notify callback or approvals signal carries.
    pub fn approval(approved: bool, user: &str) -> Self {
        Self::new(EVENT_SOURCE, EVENT_TYPE_APPROVAL).with_json_data(serde_json::json!({
            "approved": approved,
            "user": user,
        }))
    }

    /// Read the `approved` flag off an approval event, if present.
    pub fn approved(&self) -> Option<bool> {
        self.data.as_ref()?.get("approved")?.as_bool()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_event_shape() {
        let event = CloudEvent::approval(true, "ada@example.com");
        assert_eq!(event.event_type, EVENT_TYPE_APPROVAL);
        assert_eq!(event.approved(), Some(true));
        assert_eq!(
            event.datacontenttype.as_deref(),
            Some("application/json")
        );
    }

    #[test]
    fn type_attribute_serializes_as_type() {
        let event = CloudEvent::new("grantor/test", "io.grantor.test");
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["type"], serde_json::json!("io.grantor.test"));
        assert_eq!(v["source"], serde_json::json!("grantor/test"));
    }

    #[test]
    fn unknown_extensions_survive_roundtrip() {
        let raw = serde_json::json!({
            "id": "1", "source": "s", "type": "t",
            "traceparent": "00-abc-def-01",
        });
        let event: CloudEvent = serde_json::from_value(raw).unwrap();
        assert!(event.extensions.contains_key("traceparent"));
        let back = serde_json::to_value(&event).unwrap();
        assert_eq!(back["traceparent"], serde_json::json!("00-abc-def-01"));
    }
}
