use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, SqliteConnection, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// Which entity family an event row describes. Stored by value so the
/// log keeps making sense after the row itself is purged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize, EnumString, Display)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResourceKind {
    Task,
    Container,
    Section,
}

/// A row in the append-only event log.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub actor_uuid: Option<Uuid>,
    pub resource_type: String,
    pub resource_uuid: Uuid,
    pub event_type: String,
    pub etag: Option<i64>,
    pub payload: Option<String>,
}

impl Event {
    pub fn payload_json(&self) -> Option<JsonValue> {
        self.payload
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    pub async fn find_by_resource(
        pool: &SqlitePool,
        resource_uuid: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Event>(
            r#"SELECT id, created_at, actor_uuid, resource_type, resource_uuid, event_type, etag, payload
               FROM event_log
               WHERE resource_uuid = ?
               ORDER BY id"#,
        )
        .bind(resource_uuid)
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_type(
        pool: &SqlitePool,
        resource_uuid: Uuid,
        event_type: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Event>(
            r#"SELECT id, created_at, actor_uuid, resource_type, resource_uuid, event_type, etag, payload
               FROM event_log
               WHERE resource_uuid = ? AND event_type = ?
               ORDER BY id"#,
        )
        .bind(resource_uuid)
        .bind(event_type)
        .fetch_all(pool)
        .await
    }
}

/// Event to append. The payload is pre-encoded JSON; the writer treats
/// it as opaque.
#[derive(Debug, Clone)]
pub struct NewEvent<'a> {
    pub actor_uuid: Option<Uuid>,
    pub resource_kind: ResourceKind,
    pub resource_uuid: Uuid,
    pub event_type: &'a str,
    pub etag: Option<i64>,
    pub payload: Option<String>,
}

/// Appends event rows on the caller's transactional connection. The row
/// is durable iff that transaction commits.
pub struct EventWriter;

impl EventWriter {
    pub async fn log(
        &self,
        conn: &mut SqliteConnection,
        event: NewEvent<'_>,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"INSERT INTO event_log (actor_uuid, resource_type, resource_uuid, event_type, etag, payload)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(event.actor_uuid)
        .bind(event.resource_kind)
        .bind(event.resource_uuid)
        .bind(event.event_type)
        .bind(event.etag)
        .bind(event.payload)
        .execute(&mut *conn)
        .await?;
        Ok(result.last_insert_rowid())
    }
}
