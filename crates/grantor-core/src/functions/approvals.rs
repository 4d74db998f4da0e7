//! `grantor.approvals`: pause until an approval decision arrives.
//!
//! On first execution there is no decision in the input, so the workflow
//! parks (`waiting`). The decision arrives later as a resumed input: an
//! approval CloudEvent delivered via a notify callback URL or an `event`
//! signal on the durable backend. A positive decision passes the event
//! through as output; a denial raises `authorization`.

use std::sync::Arc;

use async_trait::async_trait;
use grantor_types::error::Problem;
use grantor_types::event::{CloudEvent, EVENT_TYPE_APPROVAL};
use grantor_types::task::WorkflowTask;
use grantor_types::workflow::CallTask;
use serde_json::Value;

use super::{CallOutcome, WorkflowFunction};
use crate::services::Services;

pub struct ApprovalsFunction {
    services: Arc<Services>,
}

impl ApprovalsFunction {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl WorkflowFunction for ApprovalsFunction {
    fn name(&self) -> &str {
        "grantor.approvals"
    }

    fn description(&self) -> &str {
        "Pauses the workflow until an approval decision arrives"
    }

    async fn execute(
        &self,
        task: &mut WorkflowTask,
        _call: &CallTask,
        input: &Value,
    ) -> Result<CallOutcome, Problem> {
        let Some(decision) = approval_decision(input) else {
            tracing::info!(
                workflow_id = %task.workflow_id,
                "no approval decision yet, parking workflow"
            );
            return Ok(CallOutcome::park());
        };

        if !decision {
            tracing::warn!(workflow_id = %task.workflow_id, "elevation request denied");
            return Err(Problem::authorization("elevation request was denied"));
        }

        if let Some(backend) = &self.services.durable {
            backend.set_approved(&task.workflow_id, true).await?;
        }

        tracing::info!(workflow_id = %task.workflow_id, "elevation request approved");
        Ok(CallOutcome::Output(input.clone()))
    }
}

/// Extract the decision from a resumed input carrying an approval
/// CloudEvent; `None` when no decision is present.
fn approval_decision(input: &Value) -> Option<bool> {
    let event: CloudEvent = serde_json::from_value(input.clone()).ok()?;
    if event.event_type != EVENT_TYPE_APPROVAL {
        return None;
    }
    event.approved()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{sample_elevation_context, service_fixture};
    use grantor_types::workflow::TaskBase;
    use serde_json::json;

    fn call() -> CallTask {
        CallTask {
            call: "grantor.approvals".into(),
            with: Some(json!({"provider": "slack"})),
            base: TaskBase::default(),
        }
    }

    #[tokio::test]
    async fn parks_without_a_decision() {
        let (services, _) = service_fixture();
        let function = ApprovalsFunction::new(services);
        let mut task = sample_elevation_context(true);

        let outcome = function
            .execute(&mut task, &call(), &Value::Null)
            .await
            .unwrap();
        assert!(matches!(outcome, CallOutcome::Suspend { .. }));
    }

    #[tokio::test]
    async fn approval_event_passes_through() {
        let (services, _) = service_fixture();
        let function = ApprovalsFunction::new(services);
        let mut task = sample_elevation_context(true);

        let event = serde_json::to_value(CloudEvent::approval(true, "lead@example.com")).unwrap();
        let outcome = function.execute(&mut task, &call(), &event).await.unwrap();
        match outcome {
            CallOutcome::Output(v) => assert_eq!(v["data"]["approved"], json!(true)),
            _ => panic!("expected output"),
        }
    }

    #[tokio::test]
    async fn denial_raises_authorization() {
        let (services, _) = service_fixture();
        let function = ApprovalsFunction::new(services);
        let mut task = sample_elevation_context(true);

        let event = serde_json::to_value(CloudEvent::approval(false, "lead@example.com")).unwrap();
        let err = function
            .execute(&mut task, &call(), &event)
            .await
            .unwrap_err();
        assert_eq!(err.kind, grantor_types::error::ErrorKind::Authorization);
    }

    #[tokio::test]
    async fn unrelated_event_still_parks() {
        let (services, _) = service_fixture();
        let function = ApprovalsFunction::new(services);
        let mut task = sample_elevation_context(true);

        let event = json!({"id": "1", "source": "s", "type": "io.grantor.other"});
        let outcome = function.execute(&mut task, &call(), &event).await.unwrap();
        assert!(matches!(outcome, CallOutcome::Suspend { .. }));
    }
}
