use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection};
use uuid::Uuid;

const COLUMNS: &str = "uuid, id, slug, title, parent_uuid, etag, webhook_urls, \
                       created_by, updated_by, created_at, updated_at, archived_at";

/// Containers form a rooted forest of projects via `parent_uuid`.
/// `webhook_urls` holds a JSON string array of URL templates consulted by
/// the resolver for every task in the subtree.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Container {
    pub uuid: Uuid,
    pub id: String,
    pub slug: String,
    pub title: Option<String>,
    pub parent_uuid: Option<Uuid>,
    pub etag: i64,
    pub webhook_urls: Option<String>,
    pub created_by: Uuid,
    pub updated_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct CreateContainer {
    pub slug: String,
    pub title: Option<String>,
    pub parent_uuid: Option<Uuid>,
}

/// Field set accepted by `update_fields`. Absent fields are left alone;
/// the serialized form (None skipped) doubles as the `container.updated`
/// event payload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContainerFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_uuid: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_urls: Option<String>,
}

impl Container {
    pub fn webhook_url_templates(&self) -> Vec<String> {
        self.webhook_urls
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }

    pub async fn find_by_uuid<'e, E>(executor: E, uuid: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Container>(&format!(
            "SELECT {COLUMNS} FROM containers WHERE uuid = ?"
        ))
        .bind(uuid)
        .fetch_optional(executor)
        .await
    }

    /// `(slug, parent_uuid)` is unique; `IS` matches a NULL parent too.
    pub async fn find_by_slug_and_parent<'e, E>(
        executor: E,
        slug: &str,
        parent_uuid: Option<Uuid>,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Container>(&format!(
            "SELECT {COLUMNS} FROM containers WHERE slug = ? AND parent_uuid IS ?"
        ))
        .bind(slug)
        .bind(parent_uuid)
        .fetch_optional(executor)
        .await
    }

    pub async fn insert(
        conn: &mut SqliteConnection,
        uuid: Uuid,
        slug: &str,
        title: &str,
        parent_uuid: Option<Uuid>,
        actor: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO containers (uuid, slug, title, parent_uuid, created_by, updated_by)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(uuid)
        .bind(slug)
        .bind(title)
        .bind(parent_uuid)
        .bind(actor)
        .bind(actor)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn current_etag<'e, E>(executor: E, uuid: Uuid) -> Result<Option<i64>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar::<_, i64>("SELECT etag FROM containers WHERE uuid = ?")
            .bind(uuid)
            .fetch_optional(executor)
            .await
    }

    pub async fn etag_and_parent<'e, E>(
        executor: E,
        uuid: Uuid,
    ) -> Result<Option<(i64, Option<Uuid>)>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, (i64, Option<Uuid>)>(
            "SELECT etag, parent_uuid FROM containers WHERE uuid = ?",
        )
        .bind(uuid)
        .fetch_optional(executor)
        .await
    }

    pub async fn apply_fields(
        conn: &mut SqliteConnection,
        uuid: Uuid,
        fields: &ContainerFields,
        actor: Uuid,
    ) -> Result<(), sqlx::Error> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "UPDATE containers SET etag = etag + 1, updated_at = datetime('now', 'subsec'), updated_by = ",
        );
        qb.push_bind(actor);
        if let Some(slug) = &fields.slug {
            qb.push(", slug = ").push_bind(slug);
        }
        if let Some(title) = &fields.title {
            qb.push(", title = ").push_bind(title);
        }
        if let Some(parent_uuid) = &fields.parent_uuid {
            qb.push(", parent_uuid = ").push_bind(parent_uuid);
        }
        if let Some(webhook_urls) = &fields.webhook_urls {
            qb.push(", webhook_urls = ").push_bind(webhook_urls);
        }
        qb.push(" WHERE uuid = ").push_bind(uuid);
        qb.build().execute(&mut *conn).await?;
        Ok(())
    }

    pub async fn set_parent(
        conn: &mut SqliteConnection,
        uuid: Uuid,
        parent_uuid: Option<Uuid>,
        actor: Uuid,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"UPDATE containers
               SET parent_uuid = ?, etag = etag + 1,
                   updated_at = datetime('now', 'subsec'), updated_by = ?
               WHERE uuid = ?"#,
        )
        .bind(parent_uuid)
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
            r#"UPDATE containers
               SET archived_at = datetime('now', 'subsec'), etag = etag + 1,
                   updated_at = datetime('now', 'subsec'), updated_by = ?
               WHERE uuid = ?"#,
        )
        .bind(actor)
        .bind(uuid)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Rows that block a hard delete: tasks in the container plus child
    /// containers.
    pub async fn dependent_count(
        conn: &mut SqliteConnection,
        uuid: Uuid,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"SELECT (SELECT COUNT(*) FROM tasks WHERE project_uuid = ?1)
                    + (SELECT COUNT(*) FROM containers WHERE parent_uuid = ?1)"#,
        )
        .bind(uuid)
        .fetch_one(&mut *conn)
        .await
    }

    pub async fn delete_row(conn: &mut SqliteConnection, uuid: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM containers WHERE uuid = ?")
            .bind(uuid)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Webhook template lists along the ancestry, deepest container
    /// first. Depth is bounded so a parent cycle cannot spin the walk.
    pub async fn ancestry_webhook_urls<'e, E>(
        executor: E,
        uuid: Uuid,
    ) -> Result<Vec<Option<String>>, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query_scalar::<_, Option<String>>(
            r#"WITH RECURSIVE chain(uuid, parent_uuid, webhook_urls, depth) AS (
                   SELECT uuid, parent_uuid, webhook_urls, 0 FROM containers WHERE uuid = ?
                   UNION ALL
                   SELECT c.uuid, c.parent_uuid, c.webhook_urls, chain.depth + 1
                   FROM containers c
                   JOIN chain ON c.uuid = chain.parent_uuid
                   WHERE chain.depth < 64
               )
               SELECT webhook_urls FROM chain ORDER BY depth"#,
        )
        .bind(uuid)
        .fetch_all(executor)
        .await
    }
}
