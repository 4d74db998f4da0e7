//! `grantor.notify`: send an elevation notification through a notifier
//! provider, optionally with approve/deny actions.
//!
//! Approval actions are plain links: each carries a sealed WorkflowTask
//! whose input is an approval CloudEvent and whose entrypoint is the task
//! following the notify, so clicking a button resumes the workflow exactly
//! where it is waiting.

use std::sync::Arc;

use async_trait::async_trait;
use grantor_types::elevate::ElevateRequestInternal;
use grantor_types::error::Problem;
use grantor_types::event::CloudEvent;
use grantor_types::provider::{NotificationRequest, ProviderCapability};
use grantor_types::task::{TaskStatus, WorkflowTask};
use grantor_types::workflow::CallTask;
use serde_json::{json, Value};

use super::{CallOutcome, WorkflowFunction};
use crate::services::Services;

pub struct NotifyFunction {
    services: Arc<Services>,
}

impl NotifyFunction {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl WorkflowFunction for NotifyFunction {
    fn name(&self) -> &str {
        "grantor.notify"
    }

    fn description(&self) -> &str {
        "Notifies an external provider of an elevation request"
    }

    fn required_parameters(&self) -> Vec<&'static str> {
        vec!["provider"]
    }

    fn optional_parameters(&self) -> Value {
        json!({"to": "", "message": "", "approvals": false})
    }

    async fn validate(
        &self,
        _task: &WorkflowTask,
        call: &CallTask,
        _input: &Value,
    ) -> Result<(), Problem> {
        let requested = call
            .with
            .as_ref()
            .and_then(|w| w.get("provider"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        let notifiers = self
            .services
            .providers
            .by_capability(ProviderCapability::Notifier);
        let known = notifiers.iter().any(|p| {
            p.name().eq_ignore_ascii_case(requested) || p.kind().eq_ignore_ascii_case(requested)
        });
        if !known {
            return Err(Problem::validation(format!(
                "'{requested}' is not a notifier provider"
            )));
        }
        Ok(())
    }

    async fn execute(
        &self,
        task: &mut WorkflowTask,
        call: &CallTask,
        _input: &Value,
    ) -> Result<CallOutcome, Problem> {
        let with = call.with.as_ref().cloned().unwrap_or_else(|| json!({}));
        let provider_name = with
            .get("provider")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let to = with.get("to").and_then(Value::as_str).unwrap_or_default();
        let message = with
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let approvals = with
            .get("approvals")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let elevation = task
            .as_elevation()
            .map_err(|e| Problem::validation(format!("context is not an elevation request: {e}")))?;
        if !elevation.request.is_valid() {
            return Err(Problem::validation("elevation request is not valid"));
        }

        let provider = self.services.providers.get_by_name_or_kind(provider_name)?;

        tracing::info!(
            provider = %provider.name(),
            to,
            approvals,
            "sending elevation notification"
        );

        let payload = match provider.kind() {
            "slack" => NotificationRequest::Slack {
                to: to.to_string(),
                text: format!(
                    "Access request for role {}",
                    elevation
                        .request
                        .role
                        .as_ref()
                        .map(|r| r.name.as_str())
                        .unwrap_or("unknown")
                ),
                blocks: self.build_blocks(task, &elevation, message, approvals)?,
            },
            "email" => NotificationRequest::Email {
                to: to.to_string(),
                subject: "Access request".to_string(),
                body: message.to_string(),
            },
            other => {
                return Err(Problem::configuration(format!(
                    "unsupported notifier type: {other}"
                )));
            }
        };

        provider.notifier()?.send_notification(&payload).await?;

        Ok(CallOutcome::Output(Value::Null))
    }
}

impl NotifyFunction {
    /// Slack Block Kit content: the operator message, the request details
    /// and (optionally) approve/deny buttons.
    fn build_blocks(
        &self,
        task: &WorkflowTask,
        elevation: &ElevateRequestInternal,
        message: &str,
        approvals: bool,
    ) -> Result<Vec<Value>, Problem> {
        let mut blocks = Vec::new();

        if !message.is_empty() {
            blocks.push(section(message));
        }
        blocks.push(json!({"type": "divider"}));

        let mut details = String::from("*Access Request Details:*\n");
        if let Some(role) = &elevation.request.role {
            details.push_str(&format!("• *Role:* {}\n", role.name));
            if !role.description.is_empty() {
                details.push_str(&format!("• *Description:* {}\n", role.description));
            }
        }
        if !elevation.request.providers.is_empty() {
            details.push_str(&format!(
                "• *Providers:* {}\n",
                elevation.request.providers.join(", ")
            ));
        }
        if !elevation.request.reason.is_empty() {
            details.push_str(&format!("• *Reason:* {}\n", elevation.request.reason));
        }
        if !elevation.request.duration.is_empty() {
            details.push_str(&format!("• *Duration:* {}\n", elevation.request.duration));
        }
        blocks.push(section(&details));

        if let Some(user) = &elevation.user {
            blocks.push(section(&format!(
                "*Requested by:* {} ({})",
                user.display_name(),
                user.email
            )));
        }

        blocks.push(json!({"type": "divider"}));

        if approvals {
            let approve_url = self.callback_url(task, true)?;
            let deny_url = self.callback_url(task, false)?;
            blocks.push(section(
                "*Action Required:*\nPlease review the request and choose an action.",
            ));
            blocks.push(json!({
                "type": "actions",
                "elements": [
                    {
                        "type": "button",
                        "style": "primary",
                        "text": {"type": "plain_text", "text": "Approve"},
                        "url": approve_url,
                    },
                    {
                        "type": "button",
                        "style": "danger",
                        "text": {"type": "plain_text", "text": "Deny"},
                        "url": deny_url,
                    },
                ],
            }));
        } else {
            blocks.push(section("No action is required. This is a notification only."));
        }

        Ok(blocks)
    }

    /// A resume URL whose sealed state re-enters the workflow at the task
    /// after this notify, carrying the approval decision as a CloudEvent.
    fn callback_url(&self, task: &WorkflowTask, approve: bool) -> Result<String, Problem> {
        let next = next_task_key(task).ok_or_else(|| {
            Problem::configuration("notify with approvals requires a following task")
        })?;

        let event = CloudEvent::approval(approve, "");
        let mut resumed = task.clone();
        resumed.set_entrypoint(next);
        resumed.set_status(TaskStatus::Pending);
        resumed.input = serde_json::to_value(&event)
            .map_err(|e| Problem::runtime(format!("event serialization failed: {e}")))?;
        resumed.local_vars = serde_json::Map::new();

        self.services
            .urls
            .resume_url(&resumed, self.services.encryptor.as_ref())
    }
}

fn section(text: &str) -> Value {
    json!({
        "type": "section",
        "text": {"type": "mrkdwn", "text": text},
    })
}

/// The key of the main-list task following the currently executing one.
fn next_task_key(task: &WorkflowTask) -> Option<String> {
    let current = task.task_reference.last()?;
    let document = task.document()?;
    let (index, _) = document.do_.find(current)?;
    document
        .do_
        .0
        .get(index + 1)
        .map(|item| item.key.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{sample_elevation_context, service_fixture};
    use grantor_types::workflow::TaskBase;

    fn call(with: Value) -> CallTask {
        CallTask {
            call: "grantor.notify".into(),
            with: Some(with),
            base: TaskBase::default(),
        }
    }

    #[tokio::test]
    async fn sends_slack_notification_with_approval_buttons() {
        let (services, fixture) = service_fixture();
        let function = NotifyFunction::new(services);
        let mut task = sample_elevation_context(true);
        // Position the breadcrumb at the notify task of the canonical flow.
        task.push_reference("do");
        task.push_reference("notify");

        function
            .execute(
                &mut task,
                &call(json!({
                    "provider": "slack",
                    "to": "#access",
                    "message": "User ada wants ops",
                    "approvals": true,
                })),
                &Value::Null,
            )
            .await
            .unwrap();

        let sent = fixture.slack.notifications.lock().unwrap();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            NotificationRequest::Slack { to, text, blocks } => {
                assert_eq!(to, "#access");
                assert!(text.contains("ops"));
                let raw = serde_json::to_string(blocks).unwrap();
                assert!(raw.contains("Approve"));
                assert!(raw.contains("state="));
            }
            other => panic!("expected slack payload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn validate_rejects_unknown_notifier() {
        let (services, _) = service_fixture();
        let function = NotifyFunction::new(services);
        let task = sample_elevation_context(true);

        let err = function
            .validate(
                &task,
                &call(json!({"provider": "carrier-pigeon"})),
                &Value::Null,
            )
            .await
            .unwrap_err();
        assert!(err.detail.contains("not a notifier"));
    }

    #[tokio::test]
    async fn notification_only_when_approvals_false() {
        let (services, fixture) = service_fixture();
        let function = NotifyFunction::new(services);
        let mut task = sample_elevation_context(true);
        task.push_reference("do");
        task.push_reference("notify");

        function
            .execute(
                &mut task,
                &call(json!({"provider": "slack", "to": "#access"})),
                &Value::Null,
            )
            .await
            .unwrap();

        let sent = fixture.slack.notifications.lock().unwrap();
        match &sent[0] {
            NotificationRequest::Slack { blocks, .. } => {
                let raw = serde_json::to_string(blocks).unwrap();
                assert!(raw.contains("No action is required"));
                assert!(!raw.contains("Approve"));
            }
            other => panic!("expected slack payload, got {other:?}"),
        }
    }
}
