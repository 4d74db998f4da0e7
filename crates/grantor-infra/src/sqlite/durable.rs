//! SQLite implementation of the durable backend.
//!
//! Each execution is one row: the serialized [`WorkflowTask`] snapshot plus
//! typed search-attribute columns (`status`, `user`, `role`, `workflow`,
//! `provider`, `task`, `approved`) so listings never deserialize snapshots.
//! Signals are deduplicated per workflow id by payload fingerprint, and
//! scheduled signals are claimed atomically with `DELETE … RETURNING` so a
//! firing is delivered exactly once even with concurrent pumps.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grantor_core::durable::{
    DueSignal, DurableBackend, ExecutionFilter, ExecutionInfo, Signal,
};
use grantor_types::error::Problem;
use grantor_types::event::CloudEvent;
use grantor_types::task::{TaskStatus, WorkflowTask};
use sha2::{Digest, Sha256};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS executions (
    workflow_id TEXT PRIMARY KEY,
    workflow    TEXT NOT NULL,
    status      TEXT NOT NULL,
    user        TEXT NOT NULL DEFAULT '',
    role        TEXT NOT NULL DEFAULT '',
    provider    TEXT NOT NULL DEFAULT '',
    task        TEXT NOT NULL DEFAULT '',
    approved    INTEGER NOT NULL DEFAULT 0,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    snapshot    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS signals (
    id          TEXT PRIMARY KEY,
    workflow_id TEXT NOT NULL,
    kind        TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    payload     TEXT NOT NULL,
    received_at TEXT NOT NULL,
    UNIQUE (workflow_id, fingerprint)
);
CREATE TABLE IF NOT EXISTS scheduled_signals (
    id          TEXT PRIMARY KEY,
    workflow_id TEXT NOT NULL,
    payload     TEXT NOT NULL,
    fire_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_scheduled_fire_at ON scheduled_signals (fire_at);
CREATE TABLE IF NOT EXISTS events (
    id          TEXT PRIMARY KEY,
    workflow_id TEXT NOT NULL,
    payload     TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);
"#;

pub struct SqliteDurableBackend {
    pool: DatabasePool,
}

impl SqliteDurableBackend {
    pub async fn new(pool: DatabasePool) -> Result<Self, Problem> {
        sqlx::raw_sql(SCHEMA)
            .execute(&pool.writer)
            .await
            .map_err(internal)?;
        Ok(Self { pool })
    }

    /// Startup pass: executions left `running` by a dead process become
    /// `suspended`, so a later resume signal (or the already-scheduled
    /// revocation) can pick them back up.
    pub async fn recover_interrupted(&self) -> Result<u64, Problem> {
        let result = sqlx::query(
            "UPDATE executions SET status = 'suspended' WHERE status = 'running'",
        )
        .execute(&self.pool.writer)
        .await
        .map_err(internal)?;
        let recovered = result.rows_affected();
        if recovered > 0 {
            tracing::warn!(count = recovered, "marked interrupted executions as suspended");
        }
        Ok(recovered)
    }
}

/// Search-attribute projection of a task.
struct Attributes {
    workflow: String,
    user: String,
    role: String,
    provider: String,
    task: String,
}

fn attributes(task: &WorkflowTask) -> Attributes {
    let user = task
        .user
        .as_ref()
        .map(|u| u.email.clone())
        .unwrap_or_default();
    let role = task
        .context
        .get("role")
        .and_then(|r| r.get("name"))
        .and_then(|n| n.as_str())
        .unwrap_or_default()
        .to_string();
    let provider = task
        .context
        .get("providers")
        .and_then(|p| p.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default();
    let current_task = if !task.entrypoint.is_empty() {
        task.entrypoint.clone()
    } else {
        task.task_reference.last().cloned().unwrap_or_default()
    };
    Attributes {
        workflow: task.workflow.name.clone(),
        user,
        role,
        provider,
        task: current_task,
    }
}

fn fingerprint(signal: &Signal) -> Result<String, Problem> {
    let payload = serde_json::to_vec(signal)
        .map_err(|e| Problem::runtime(format!("signal serialization failed: {e}")))?;
    let mut hasher = Sha256::new();
    hasher.update(&payload);
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}

fn internal(e: sqlx::Error) -> Problem {
    Problem::runtime(format!("execution store error: {e}"))
}

fn row_to_info(row: &sqlx::sqlite::SqliteRow) -> Result<ExecutionInfo, Problem> {
    let status: String = row.get("status");
    let started_at: String = row.get("started_at");
    let finished_at: Option<String> = row.get("finished_at");
    Ok(ExecutionInfo {
        workflow_id: row.get("workflow_id"),
        status: status
            .parse::<TaskStatus>()
            .map_err(|e| Problem::runtime(format!("corrupt status column: {e}")))?,
        start_time: parse_time(&started_at)?,
        close_time: finished_at.as_deref().map(parse_time).transpose()?,
        user: row.get("user"),
        role: row.get("role"),
        workflow: row.get("workflow"),
        provider: row.get("provider"),
        task: row.get("task"),
        approved: row.get::<i64, _>("approved") != 0,
    })
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, Problem> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Problem::runtime(format!("corrupt timestamp column: {e}")))
}

#[async_trait]
impl DurableBackend for SqliteDurableBackend {
    async fn start(&self, task: &WorkflowTask) -> Result<(), Problem> {
        let attrs = attributes(task);
        let snapshot = serde_json::to_string(task)
            .map_err(|e| Problem::runtime(format!("task serialization failed: {e}")))?;

        // Signal-with-start semantics: never clobber an existing execution.
        sqlx::query(
            r#"INSERT INTO executions
                   (workflow_id, workflow, status, user, role, provider, task,
                    approved, started_at, snapshot)
               VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
               ON CONFLICT (workflow_id) DO NOTHING"#,
        )
        .bind(&task.workflow_id)
        .bind(&attrs.workflow)
        .bind(task.status.as_str())
        .bind(&attrs.user)
        .bind(&attrs.role)
        .bind(&attrs.provider)
        .bind(&attrs.task)
        .bind(Utc::now().to_rfc3339())
        .bind(&snapshot)
        .execute(&self.pool.writer)
        .await
        .map_err(internal)?;
        Ok(())
    }

    async fn checkpoint(&self, task: &WorkflowTask) -> Result<(), Problem> {
        let attrs = attributes(task);
        let snapshot = serde_json::to_string(task)
            .map_err(|e| Problem::runtime(format!("task serialization failed: {e}")))?;
        let finished_at = if task.status.is_terminal() {
            Some(Utc::now().to_rfc3339())
        } else {
            None
        };

        sqlx::query(
            r#"UPDATE executions SET
                   status = ?, user = ?, role = ?, provider = ?, task = ?,
                   finished_at = COALESCE(?, finished_at), snapshot = ?
               WHERE workflow_id = ?"#,
        )
        .bind(task.status.as_str())
        .bind(&attrs.user)
        .bind(&attrs.role)
        .bind(&attrs.provider)
        .bind(&attrs.task)
        .bind(finished_at)
        .bind(&snapshot)
        .bind(&task.workflow_id)
        .execute(&self.pool.writer)
        .await
        .map_err(internal)?;
        Ok(())
    }

    async fn record_signal(&self, workflow_id: &str, signal: &Signal) -> Result<bool, Problem> {
        let payload = serde_json::to_string(signal)
            .map_err(|e| Problem::runtime(format!("signal serialization failed: {e}")))?;
        let result = sqlx::query(
            r#"INSERT INTO signals (id, workflow_id, kind, fingerprint, payload, received_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT (workflow_id, fingerprint) DO NOTHING"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(workflow_id)
        .bind(signal.kind())
        .bind(fingerprint(signal)?)
        .bind(&payload)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(internal)?;
        Ok(result.rows_affected() > 0)
    }

    async fn schedule_signal(
        &self,
        workflow_id: &str,
        signal: Signal,
        at: DateTime<Utc>,
    ) -> Result<Uuid, Problem> {
        let id = Uuid::new_v4();
        let payload = serde_json::to_string(&signal)
            .map_err(|e| Problem::runtime(format!("signal serialization failed: {e}")))?;
        sqlx::query(
            "INSERT INTO scheduled_signals (id, workflow_id, payload, fire_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(workflow_id)
        .bind(&payload)
        .bind(at.to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(internal)?;

        tracing::info!(workflow_id, schedule_id = %id, fire_at = %at.to_rfc3339(), "scheduled signal");
        Ok(id)
    }

    async fn cancel_scheduled(&self, id: Uuid) -> Result<(), Problem> {
        sqlx::query("DELETE FROM scheduled_signals WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(internal)?;
        Ok(())
    }

    async fn due_signals(&self, now: DateTime<Utc>) -> Result<Vec<DueSignal>, Problem> {
        let rows = sqlx::query(
            "DELETE FROM scheduled_signals WHERE fire_at <= ? RETURNING id, workflow_id, payload",
        )
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool.writer)
        .await
        .map_err(internal)?;

        let mut due = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let payload: String = row.get("payload");
            let signal: Signal = serde_json::from_str(&payload)
                .map_err(|e| Problem::runtime(format!("corrupt scheduled signal: {e}")))?;
            due.push(DueSignal {
                id: Uuid::parse_str(&id)
                    .map_err(|e| Problem::runtime(format!("corrupt schedule id: {e}")))?,
                workflow_id: row.get("workflow_id"),
                signal,
            });
        }
        Ok(due)
    }

    async fn record_event(&self, workflow_id: &str, event: &CloudEvent) -> Result<(), Problem> {
        let payload = serde_json::to_string(event)
            .map_err(|e| Problem::runtime(format!("event serialization failed: {e}")))?;
        sqlx::query(
            "INSERT INTO events (id, workflow_id, payload, recorded_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&event.id)
        .bind(workflow_id)
        .bind(&payload)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(internal)?;
        Ok(())
    }

    async fn is_approved(&self, workflow_id: &str) -> Result<bool, Problem> {
        let approved: Option<(i64,)> =
            sqlx::query_as("SELECT approved FROM executions WHERE workflow_id = ?")
                .bind(workflow_id)
                .fetch_optional(&self.pool.reader)
                .await
                .map_err(internal)?;
        Ok(approved.map(|(a,)| a != 0).unwrap_or(false))
    }

    async fn set_approved(&self, workflow_id: &str, approved: bool) -> Result<(), Problem> {
        sqlx::query("UPDATE executions SET approved = ? WHERE workflow_id = ?")
            .bind(approved as i64)
            .bind(workflow_id)
            .execute(&self.pool.writer)
            .await
            .map_err(internal)?;
        Ok(())
    }

    async fn get_workflow_task(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowTask>, Problem> {
        let snapshot: Option<(String,)> =
            sqlx::query_as("SELECT snapshot FROM executions WHERE workflow_id = ?")
                .bind(workflow_id)
                .fetch_optional(&self.pool.reader)
                .await
                .map_err(internal)?;
        match snapshot {
            Some((snapshot,)) => serde_json::from_str(&snapshot)
                .map(Some)
                .map_err(|e| Problem::runtime(format!("corrupt execution snapshot: {e}"))),
            None => Ok(None),
        }
    }

    async fn describe(&self, workflow_id: &str) -> Result<Option<ExecutionInfo>, Problem> {
        let row = sqlx::query("SELECT * FROM executions WHERE workflow_id = ?")
            .bind(workflow_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(internal)?;
        row.as_ref().map(row_to_info).transpose()
    }

    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<ExecutionInfo>, Problem> {
        let mut builder = sqlx::QueryBuilder::new("SELECT * FROM executions WHERE 1 = 1");
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(user) = &filter.user {
            builder.push(" AND user = ").push_bind(user.as_str());
        }
        if let Some(role) = &filter.role {
            builder.push(" AND role = ").push_bind(role.as_str());
        }
        if let Some(workflow) = &filter.workflow {
            builder.push(" AND workflow = ").push_bind(workflow.as_str());
        }
        if let Some(provider) = &filter.provider {
            builder
                .push(" AND provider LIKE ")
                .push_bind(format!("%{provider}%"));
        }
        if let Some(approved) = filter.approved {
            builder
                .push(" AND approved = ")
                .push_bind(approved as i64);
        }
        builder.push(" ORDER BY started_at DESC LIMIT 200");

        let rows = builder
            .build()
            .fetch_all(&self.pool.reader)
            .await
            .map_err(internal)?;
        rows.iter().map(row_to_info).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use grantor_types::user::User;
    use grantor_types::workflow::Workflow;
    use serde_json::json;

    async fn backend() -> (SqliteDurableBackend, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("t.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (SqliteDurableBackend::new(pool).await.unwrap(), dir)
    }

    fn sample_task() -> WorkflowTask {
        let mut task = WorkflowTask::new(
            Workflow {
                name: "slack_approval".into(),
                description: String::new(),
                authentication: "default".into(),
                workflow: None,
                enabled: true,
            },
            json!({
                "role": {"name": "ops"},
                "providers": ["aws", "gcp"],
                "reason": "deploy",
            }),
        );
        task.set_user(User {
            email: "ada@example.com".into(),
            ..Default::default()
        });
        task
    }

    #[tokio::test]
    async fn start_is_idempotent_and_checkpoint_updates() {
        let (backend, _dir) = backend().await;
        let mut task = sample_task();

        backend.start(&task).await.unwrap();
        backend.start(&task).await.unwrap();

        task.set_status(TaskStatus::Waiting);
        task.set_entrypoint("approve");
        backend.checkpoint(&task).await.unwrap();

        let info = backend.describe(&task.workflow_id).await.unwrap().unwrap();
        assert_eq!(info.status, TaskStatus::Waiting);
        assert_eq!(info.user, "ada@example.com");
        assert_eq!(info.role, "ops");
        assert_eq!(info.provider, "aws,gcp");
        assert_eq!(info.task, "approve");
        assert!(info.close_time.is_none());

        let snapshot = backend
            .get_workflow_task(&task.workflow_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.entrypoint, "approve");
    }

    #[tokio::test]
    async fn duplicate_signals_are_idempotent() {
        let (backend, _dir) = backend().await;
        let task = sample_task();
        backend.start(&task).await.unwrap();

        let signal = Signal::Event {
            event: grantor_types::event::CloudEvent::approval(true, "lead@example.com"),
        };
        assert!(backend.record_signal(&task.workflow_id, &signal).await.unwrap());
        assert!(!backend.record_signal(&task.workflow_id, &signal).await.unwrap());
    }

    #[tokio::test]
    async fn scheduled_signals_fire_once_and_cancel_works() {
        let (backend, _dir) = backend().await;
        let task = sample_task();
        backend.start(&task).await.unwrap();

        let past = Utc::now() - chrono::Duration::minutes(1);
        let future = Utc::now() + chrono::Duration::hours(1);

        backend
            .schedule_signal(
                &task.workflow_id,
                Signal::Terminate {
                    reason: "expired".into(),
                    scheduled_at: past,
                },
                past,
            )
            .await
            .unwrap();
        let keep = backend
            .schedule_signal(
                &task.workflow_id,
                Signal::Terminate {
                    reason: "later".into(),
                    scheduled_at: future,
                },
                future,
            )
            .await
            .unwrap();

        let due = backend.due_signals(Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
        // Claimed exactly once.
        assert!(backend.due_signals(Utc::now()).await.unwrap().is_empty());

        backend.cancel_scheduled(keep).await.unwrap();
        let later = backend
            .due_signals(Utc::now() + chrono::Duration::hours(2))
            .await
            .unwrap();
        assert!(later.is_empty());
    }

    #[tokio::test]
    async fn approval_flag_roundtrip() {
        let (backend, _dir) = backend().await;
        let task = sample_task();
        backend.start(&task).await.unwrap();

        assert!(!backend.is_approved(&task.workflow_id).await.unwrap());
        backend.set_approved(&task.workflow_id, true).await.unwrap();
        assert!(backend.is_approved(&task.workflow_id).await.unwrap());

        // A later checkpoint must not clobber the approval attribute.
        let mut running = sample_task();
        running.workflow_id = task.workflow_id.clone();
        running.set_status(TaskStatus::Running);
        backend.checkpoint(&running).await.unwrap();
        assert!(backend.is_approved(&task.workflow_id).await.unwrap());
    }

    #[tokio::test]
    async fn list_filters_on_search_attributes() {
        let (backend, _dir) = backend().await;
        let mut a = sample_task();
        a.set_status(TaskStatus::Completed);
        backend.start(&a).await.unwrap();
        backend.checkpoint(&a).await.unwrap();

        let mut b = sample_task();
        b.set_status(TaskStatus::Waiting);
        backend.start(&b).await.unwrap();
        backend.checkpoint(&b).await.unwrap();

        let waiting = backend
            .list_executions(&ExecutionFilter {
                status: Some(TaskStatus::Waiting),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(waiting.len(), 1);
        assert_eq!(waiting[0].workflow_id, b.workflow_id);

        let by_user = backend
            .list_executions(&ExecutionFilter {
                user: Some("ada@example.com".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_user.len(), 2);
    }

    #[tokio::test]
    async fn recover_marks_running_as_suspended() {
        let (backend, _dir) = backend().await;
        let mut task = sample_task();
        task.set_status(TaskStatus::Running);
        backend.start(&task).await.unwrap();
        backend.checkpoint(&task).await.unwrap();

        let recovered = backend.recover_interrupted().await.unwrap();
        assert_eq!(recovered, 1);
        let info = backend.describe(&task.workflow_id).await.unwrap().unwrap();
        assert_eq!(info.status, TaskStatus::Suspended);
    }
}
