use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Sqlite, SqliteConnection};
use uuid::Uuid;

/// Named ordered grouping of tasks inside a container (a board column).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Section {
    pub uuid: Uuid,
    pub id: String,
    pub container_uuid: Uuid,
    pub slug: String,
    pub title: Option<String>,
    pub position: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Section {
    pub async fn insert(
        conn: &mut SqliteConnection,
        uuid: Uuid,
        container_uuid: Uuid,
        slug: &str,
        title: Option<&str>,
        position: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO sections (uuid, container_uuid, slug, title, position)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(uuid)
        .bind(container_uuid)
        .bind(slug)
        .bind(title)
        .bind(position)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn list_by_container<'e, E>(
        executor: E,
        container_uuid: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Section>(
            r#"SELECT uuid, id, container_uuid, slug, title, position, created_at, updated_at
               FROM sections
               WHERE container_uuid = ?
               ORDER BY position, created_at"#,
        )
        .bind(container_uuid)
        .fetch_all(executor)
        .await
    }
}
