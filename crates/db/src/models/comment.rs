use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Sqlite, SqliteConnection};
use uuid::Uuid;

/// Task-owned note. Removed by FK cascade when the task is purged.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Comment {
    pub uuid: Uuid,
    pub task_uuid: Uuid,
    pub author_uuid: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub async fn insert(
        conn: &mut SqliteConnection,
        uuid: Uuid,
        task_uuid: Uuid,
        author_uuid: Uuid,
        body: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO comments (uuid, task_uuid, author_uuid, body) VALUES (?, ?, ?, ?)",
        )
        .bind(uuid)
        .bind(task_uuid)
        .bind(author_uuid)
        .bind(body)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn list_by_task<'e, E>(executor: E, task_uuid: Uuid) -> Result<Vec<Self>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Comment>(
            r#"SELECT uuid, task_uuid, author_uuid, body, created_at
               FROM comments
               WHERE task_uuid = ?
               ORDER BY created_at"#,
        )
        .bind(task_uuid)
        .fetch_all(executor)
        .await
    }
}
