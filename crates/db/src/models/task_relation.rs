use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Sqlite, Type};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize, EnumString, Display,
)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RelationKind {
    Blocks,
    RelatesTo,
    Duplicates,
}

/// Directed edge between tasks, keyed by (from, to, kind). For `blocks`,
/// `from` blocks `to`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TaskRelation {
    pub from_task_uuid: Uuid,
    pub to_task_uuid: Uuid,
    pub kind: RelationKind,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl TaskRelation {
    /// Idempotent: re-linking an existing edge is a no-op.
    pub async fn insert<'e, E>(
        executor: E,
        from_task_uuid: Uuid,
        to_task_uuid: Uuid,
        kind: RelationKind,
        actor: Uuid,
    ) -> Result<bool, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"INSERT OR IGNORE INTO task_relations (from_task_uuid, to_task_uuid, kind, created_by)
               VALUES (?, ?, ?, ?)"#,
        )
        .bind(from_task_uuid)
        .bind(to_task_uuid)
        .bind(kind)
        .bind(actor)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete<'e, E>(
        executor: E,
        from_task_uuid: Uuid,
        to_task_uuid: Uuid,
        kind: RelationKind,
    ) -> Result<u64, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "DELETE FROM task_relations WHERE from_task_uuid = ? AND to_task_uuid = ? AND kind = ?",
        )
        .bind(from_task_uuid)
        .bind(to_task_uuid)
        .bind(kind)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Targets of outgoing `blocks` edges, in row order. These are the
    /// unblock candidates when `from_task_uuid` completes.
    pub async fn blocked_candidates<'e, E>(
        executor: E,
        from_task_uuid: Uuid,
    ) -> Result<Vec<Uuid>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT to_task_uuid FROM task_relations WHERE from_task_uuid = ? AND kind = 'blocks'",
        )
        .bind(from_task_uuid)
        .fetch_all(executor)
        .await
    }

    pub async fn list_for_task<'e, E>(executor: E, uuid: Uuid) -> Result<Vec<Self>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, TaskRelation>(
            r#"SELECT from_task_uuid, to_task_uuid, kind, created_by, created_at
               FROM task_relations
               WHERE from_task_uuid = ?1 OR to_task_uuid = ?1
               ORDER BY created_at"#,
        )
        .bind(uuid)
        .fetch_all(executor)
        .await
    }
}
