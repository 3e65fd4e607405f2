use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Sqlite, SqliteConnection};
use uuid::Uuid;

/// Attachment metadata. File bytes live outside the store; rows are
/// removed by FK cascade when the task is purged.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Attachment {
    pub uuid: Uuid,
    pub task_uuid: Uuid,
    pub filename: String,
    pub mime_type: Option<String>,
    pub size_bytes: i64,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Attachment {
    pub async fn insert(
        conn: &mut SqliteConnection,
        uuid: Uuid,
        task_uuid: Uuid,
        filename: &str,
        mime_type: Option<&str>,
        size_bytes: i64,
        actor: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO attachments (uuid, task_uuid, filename, mime_type, size_bytes, created_by)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(uuid)
        .bind(task_uuid)
        .bind(filename)
        .bind(mime_type)
        .bind(size_bytes)
        .bind(actor)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn list_by_task<'e, E>(executor: E, task_uuid: Uuid) -> Result<Vec<Self>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Attachment>(
            r#"SELECT uuid, task_uuid, filename, mime_type, size_bytes, created_by, created_at
               FROM attachments
               WHERE task_uuid = ?
               ORDER BY created_at"#,
        )
        .bind(task_uuid)
        .fetch_all(executor)
        .await
    }

    /// `(count, total bytes)` for the purge report.
    pub async fn stats_for_task(
        conn: &mut SqliteConnection,
        task_uuid: Uuid,
    ) -> Result<(i64, i64), sqlx::Error> {
        sqlx::query_as::<_, (i64, i64)>(
            "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM attachments WHERE task_uuid = ?",
        )
        .bind(task_uuid)
        .fetch_one(&mut *conn)
        .await
    }
}
