use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection, Type};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::event::{EventWriter, NewEvent, ResourceKind};

const COLUMNS: &str = "uuid, id, slug, title, description, project_uuid, state, priority, kind, \
                       parent_task_uuid, assignee_uuid, resolution, labels, meta, run_status, \
                       start_at, due_at, acknowledged_at, etag, created_by, updated_by, \
                       created_at, updated_at, completed_at, archived_at, deleted_at, \
                       cp_project_id, cp_run_id, cp_session_id, sdk_session_id";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize, EnumString, Display,
)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskState {
    Idea,
    Draft,
    Open,
    InProgress,
    Completed,
    Blocked,
    Cancelled,
    Archived,
    Deleted,
}

impl TaskState {
    /// Terminal states: reaching one of these is a completion transition.
    pub const fn is_completion(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Cancelled | TaskState::Archived | TaskState::Deleted
        )
    }

    /// States in which a task still blocks its dependents. `idea` is
    /// uncommitted work and never blocks.
    pub const fn is_blocking(self) -> bool {
        !self.is_completion() && !matches!(self, TaskState::Idea)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize, EnumString, Display, Default,
)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskKind {
    #[default]
    Task,
    Subtask,
    Spike,
    Bug,
    Chore,
}

/// A work item. `labels` and `meta` are stored as raw JSON strings;
/// use [`Task::label_list`] / [`Task::meta_value`] for parsed access.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Task {
    pub uuid: Uuid,
    pub id: String,
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
    pub project_uuid: Uuid,
    pub state: TaskState,
    pub priority: i64,
    pub kind: TaskKind,
    pub parent_task_uuid: Option<Uuid>,
    pub assignee_uuid: Option<Uuid>,
    pub resolution: Option<String>,
    pub labels: String,
    pub meta: String,
    pub run_status: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub due_at: Option<DateTime<Utc>>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub etag: i64,
    pub created_by: Uuid,
    pub updated_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub cp_project_id: Option<String>,
    pub cp_run_id: Option<String>,
    pub cp_session_id: Option<String>,
    pub sdk_session_id: Option<String>,
}

/// Creation parameters. An explicit `uuid` makes creation idempotent;
/// the serialized form (None skipped, uuid excluded) is the
/// `task.created` event payload.
#[derive(Debug, Clone, Serialize)]
pub struct CreateTask {
    #[serde(skip_serializing)]
    pub uuid: Option<Uuid>,
    pub slug: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub project_uuid: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TaskState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<TaskKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_task_uuid: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_uuid: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cp_project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cp_run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cp_session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk_session_id: Option<String>,
}

impl CreateTask {
    pub fn new(project_uuid: Uuid, slug: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            uuid: None,
            slug: slug.into(),
            title: title.into(),
            description: None,
            project_uuid,
            state: None,
            priority: None,
            kind: None,
            parent_task_uuid: None,
            assignee_uuid: None,
            labels: None,
            meta: None,
            start_at: None,
            due_at: None,
            cp_project_id: None,
            cp_run_id: None,
            cp_session_id: None,
            sdk_session_id: None,
        }
    }
}

/// Field set accepted by `update_fields`. The serialized form (None
/// skipped) is the `task.updated` event payload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TaskState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<TaskKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_uuid: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl TaskFields {
    pub fn state(state: TaskState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }
}

impl Task {
    pub fn label_list(&self) -> Vec<String> {
        serde_json::from_str(&self.labels).unwrap_or_default()
    }

    /// `meta` carried verbatim when it parses as JSON, `{}` otherwise.
    pub fn meta_value(&self) -> JsonValue {
        serde_json::from_str(&self.meta).unwrap_or_else(|_| JsonValue::Object(Default::default()))
    }

    pub async fn find_by_uuid<'e, E>(executor: E, uuid: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Task>(&format!("SELECT {COLUMNS} FROM tasks WHERE uuid = ?"))
            .bind(uuid)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_project<'e, E>(
        executor: E,
        project_uuid: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Task>(&format!(
            "SELECT {COLUMNS} FROM tasks WHERE project_uuid = ? ORDER BY created_at"
        ))
        .bind(project_uuid)
        .fetch_all(executor)
        .await
    }

    pub async fn etag_and_state<'e, E>(
        executor: E,
        uuid: Uuid,
    ) -> Result<Option<(i64, TaskState)>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, (i64, TaskState)>("SELECT etag, state FROM tasks WHERE uuid = ?")
            .bind(uuid)
            .fetch_optional(executor)
            .await
    }

    pub async fn etag_and_project<'e, E>(
        executor: E,
        uuid: Uuid,
    ) -> Result<Option<(i64, Uuid)>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, (i64, Uuid)>("SELECT etag, project_uuid FROM tasks WHERE uuid = ?")
            .bind(uuid)
            .fetch_optional(executor)
            .await
    }

    pub async fn insert(
        conn: &mut SqliteConnection,
        uuid: Uuid,
        data: &CreateTask,
        actor: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO tasks (uuid, slug, title, description, project_uuid, state, priority,
                                  kind, parent_task_uuid, assignee_uuid, labels, meta, start_at,
                                  due_at, cp_project_id, cp_run_id, cp_session_id, sdk_session_id,
                                  created_by, updated_by)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(uuid)
        .bind(&data.slug)
        .bind(&data.title)
        .bind(&data.description)
        .bind(data.project_uuid)
        .bind(data.state.unwrap_or(TaskState::Open))
        .bind(data.priority.unwrap_or(3))
        .bind(data.kind.unwrap_or_default())
        .bind(data.parent_task_uuid)
        .bind(data.assignee_uuid)
        .bind(data.labels.as_deref().unwrap_or("[]"))
        .bind(data.meta.as_deref().unwrap_or("{}"))
        .bind(data.start_at)
        .bind(data.due_at)
        .bind(&data.cp_project_id)
        .bind(&data.cp_run_id)
        .bind(&data.cp_session_id)
        .bind(&data.sdk_session_id)
        .bind(actor)
        .bind(actor)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn apply_fields(
        conn: &mut SqliteConnection,
        uuid: Uuid,
        fields: &TaskFields,
        actor: Uuid,
    ) -> Result<(), sqlx::Error> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "UPDATE tasks SET etag = etag + 1, updated_at = datetime('now', 'subsec'), updated_by = ",
        );
        qb.push_bind(actor);
        if let Some(slug) = &fields.slug {
            qb.push(", slug = ").push_bind(slug);
        }
        if let Some(title) = &fields.title {
            qb.push(", title = ").push_bind(title);
        }
        if let Some(description) = &fields.description {
            qb.push(", description = ").push_bind(description);
        }
        if let Some(state) = fields.state {
            qb.push(", state = ").push_bind(state);
            match state {
                TaskState::Completed => {
                    qb.push(", completed_at = datetime('now', 'subsec')");
                }
                TaskState::Deleted => {
                    qb.push(", deleted_at = datetime('now', 'subsec')");
                }
                TaskState::Archived => {
                    qb.push(", archived_at = datetime('now', 'subsec')");
                }
                _ => {}
            }
        }
        if let Some(priority) = fields.priority {
            qb.push(", priority = ").push_bind(priority);
        }
        if let Some(kind) = fields.kind {
            qb.push(", kind = ").push_bind(kind);
        }
        if let Some(assignee_uuid) = fields.assignee_uuid {
            qb.push(", assignee_uuid = ").push_bind(assignee_uuid);
        }
        if let Some(resolution) = &fields.resolution {
            qb.push(", resolution = ").push_bind(resolution);
        }
        if let Some(labels) = &fields.labels {
            qb.push(", labels = ").push_bind(labels);
        }
        if let Some(meta) = &fields.meta {
            qb.push(", meta = ").push_bind(meta);
        }
        if let Some(run_status) = &fields.run_status {
            qb.push(", run_status = ").push_bind(run_status);
        }
        if let Some(start_at) = fields.start_at {
            qb.push(", start_at = ").push_bind(start_at);
        }
        if let Some(due_at) = fields.due_at {
            qb.push(", due_at = ").push_bind(due_at);
        }
        if let Some(acknowledged_at) = fields.acknowledged_at {
            qb.push(", acknowledged_at = ").push_bind(acknowledged_at);
        }
        qb.push(" WHERE uuid = ").push_bind(uuid);
        qb.build().execute(&mut *conn).await?;
        Ok(())
    }

    pub async fn set_project(
        conn: &mut SqliteConnection,
        uuid: Uuid,
        project_uuid: Uuid,
        actor: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"UPDATE tasks
               SET project_uuid = ?, etag = etag + 1,
                   updated_at = datetime('now', 'subsec'), updated_by = ?
               WHERE uuid = ?"#,
        )
        .bind(project_uuid)
        .bind(actor)
        .bind(uuid)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn set_archived(
        conn: &mut SqliteConnection,
        uuid: Uuid,
        actor: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"UPDATE tasks
               SET state = 'archived', archived_at = datetime('now', 'subsec'), etag = etag + 1,
                   updated_at = datetime('now', 'subsec'), updated_by = ?
               WHERE uuid = ?"#,
        )
        .bind(actor)
        .bind(uuid)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn delete_row(conn: &mut SqliteConnection, uuid: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM tasks WHERE uuid = ?")
            .bind(uuid)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Marks every descendant subtask `deleted`, emitting one
    /// `task.deleted` event per row. Iterative walk: deep subtask trees
    /// must not exhaust the stack.
    pub async fn cascade_mark_deleted(
        conn: &mut SqliteConnection,
        events: &EventWriter,
        root: Uuid,
        actor: Uuid,
    ) -> Result<Vec<Uuid>, StoreError> {
        let mut deleted = Vec::new();
        let mut queue = VecDeque::from([root]);
        while let Some(parent) = queue.pop_front() {
            let children: Vec<Uuid> = sqlx::query_scalar(
                "SELECT uuid FROM tasks WHERE parent_task_uuid = ? AND state != 'deleted'",
            )
            .bind(parent)
            .fetch_all(&mut *conn)
            .await?;

            for child in children {
                sqlx::query(
                    r#"UPDATE tasks
                       SET state = 'deleted', deleted_at = datetime('now', 'subsec'),
                           etag = etag + 1, updated_at = datetime('now', 'subsec'), updated_by = ?
                       WHERE uuid = ?"#,
                )
                .bind(actor)
                .bind(child)
                .execute(&mut *conn)
                .await?;

                events
                    .log(
                        conn,
                        NewEvent {
                            actor_uuid: Some(actor),
                            resource_kind: ResourceKind::Task,
                            resource_uuid: child,
                            event_type: "task.deleted",
                            etag: None,
                            payload: Some(
                                r#"{"action":"cascade_deleted","parent_deleted":true}"#.to_string(),
                            ),
                        },
                    )
                    .await?;

                queue.push_back(child);
                deleted.push(child);
            }
        }
        Ok(deleted)
    }

    /// Tasks that currently block `uuid`: incoming `blocks` edges whose
    /// source is still in a blocking state.
    pub async fn blocked_by<'e, E>(executor: E, uuid: Uuid) -> Result<Vec<Self>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Task>(&format!(
            r#"SELECT {COLUMNS} FROM tasks
               WHERE uuid IN (SELECT from_task_uuid FROM task_relations
                              WHERE to_task_uuid = ? AND kind = 'blocks')
                 AND state NOT IN ('completed', 'archived', 'deleted', 'cancelled', 'idea')"#
        ))
        .bind(uuid)
        .fetch_all(executor)
        .await
    }

    /// Inverse edge list: every task `uuid` blocks, regardless of state.
    pub async fn tasks_blocked_by<'e, E>(executor: E, uuid: Uuid) -> Result<Vec<Self>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Task>(&format!(
            r#"SELECT {COLUMNS} FROM tasks
               WHERE uuid IN (SELECT to_task_uuid FROM task_relations
                              WHERE from_task_uuid = ? AND kind = 'blocks')"#
        ))
        .bind(uuid)
        .fetch_all(executor)
        .await
    }

    /// Count of blockers of `uuid` still in a blocking state; zero means
    /// the task just became unblocked.
    pub async fn count_open_blockers(
        conn: &mut SqliteConnection,
        uuid: Uuid,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*)
               FROM task_relations r
               JOIN tasks t ON t.uuid = r.from_task_uuid
               WHERE r.to_task_uuid = ? AND r.kind = 'blocks'
                 AND t.state NOT IN ('completed', 'archived', 'deleted', 'cancelled', 'idea')"#,
        )
        .bind(uuid)
        .fetch_one(&mut *conn)
        .await
    }
}
