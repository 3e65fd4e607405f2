pub mod dispatcher;
pub mod resolver;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::SqlitePool;
use uuid::Uuid;

use trellis_db::models::{container::Container, task::Task};

use self::dispatcher::WebhookDispatcher;

/// Body POSTed to every resolved subscriber. Snapshotted inside the
/// mutating transaction for purge, built from the committed row
/// otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub ticket_id: String,
    pub ticket_uuid: Uuid,
    pub project_id: String,
    pub project_uuid: Uuid,
    pub state: String,
    pub priority: i64,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    pub meta: JsonValue,
    pub etag: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cp_project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cp_run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cp_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk_session_id: Option<String>,
}

impl WebhookPayload {
    pub fn from_task(task: &Task, project_id: &str) -> Self {
        Self {
            ticket_id: task.id.clone(),
            ticket_uuid: task.uuid,
            project_id: project_id.to_string(),
            project_uuid: task.project_uuid,
            state: task.state.to_string(),
            priority: task.priority,
            kind: task.kind.to_string(),
            run_status: task.run_status.clone(),
            resolution: task.resolution.clone(),
            meta: task.meta_value(),
            etag: task.etag,
            cp_project_id: task.cp_project_id.clone(),
            cp_run_id: task.cp_run_id.clone(),
            cp_session_id: task.cp_session_id.clone(),
            sdk_session_id: task.sdk_session_id.clone(),
        }
    }
}

/// Resolves subscriber URLs along the container ancestry and fans the
/// payload out. Only ever invoked after the mutating transaction has
/// committed; failures are logged, never surfaced.
#[derive(Clone, Default)]
pub struct WebhookService {
    dispatcher: WebhookDispatcher,
}

impl WebhookService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the payload from the task's committed row and dispatch.
    pub async fn dispatch_for_task(&self, pool: &SqlitePool, task_uuid: Uuid) {
        let payload = match Self::payload_for_task(pool, task_uuid).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                tracing::warn!(%task_uuid, "skipping webhook dispatch: task or project row is gone");
                return;
            }
            Err(err) => {
                tracing::warn!(%task_uuid, "failed to build webhook payload: {err}");
                return;
            }
        };
        self.dispatch_payload(pool, payload).await;
    }

    /// Dispatch a pre-built payload (the purge path, where the row no
    /// longer exists).
    pub async fn dispatch_payload(&self, pool: &SqlitePool, payload: WebhookPayload) {
        let urls = match resolver::resolve(pool, payload.project_uuid, &payload).await {
            Ok(urls) => urls,
            Err(err) => {
                tracing::warn!(
                    ticket_id = %payload.ticket_id,
                    "webhook resolution failed: {err}"
                );
                return;
            }
        };
        if urls.is_empty() {
            return;
        }
        self.dispatcher.dispatch(urls, &payload).await;
    }

    async fn payload_for_task(
        pool: &SqlitePool,
        task_uuid: Uuid,
    ) -> Result<Option<WebhookPayload>, sqlx::Error> {
        let Some(task) = Task::find_by_uuid(pool, task_uuid).await? else {
            return Ok(None);
        };
        let Some(container) = Container::find_by_uuid(pool, task.project_uuid).await? else {
            return Ok(None);
        };
        Ok(Some(WebhookPayload::from_task(&task, &container.id)))
    }
}
