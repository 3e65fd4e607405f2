use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

use crate::error::StoreError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize, EnumString, Display, Default,
)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActorRole {
    #[default]
    Human,
    Agent,
    System,
}

/// Immutable identity performing writes. Referenced by every mutation's
/// `created_by`/`updated_by`; never versioned, never webhook-visible.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Actor {
    pub uuid: Uuid,
    pub id: String,
    pub slug: String,
    pub role: ActorRole,
    pub metadata: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateActor {
    pub slug: String,
    pub role: ActorRole,
    pub metadata: Option<String>,
}

impl Actor {
    pub async fn create(pool: &SqlitePool, data: &CreateActor) -> Result<Self, StoreError> {
        if !trellis_utils::text::is_valid_slug(&data.slug) {
            return Err(StoreError::Validation(format!(
                "invalid actor slug {:?}",
                data.slug
            )));
        }
        let uuid = Uuid::new_v4();
        sqlx::query("INSERT INTO actors (uuid, slug, role, metadata) VALUES (?, ?, ?, ?)")
            .bind(uuid)
            .bind(&data.slug)
            .bind(data.role)
            .bind(&data.metadata)
            .execute(pool)
            .await?;

        // Re-read so the trigger-assigned friendly id is visible.
        Self::find_by_uuid(pool, uuid)
            .await?
            .ok_or_else(|| StoreError::not_found("actor", uuid))
    }

    pub async fn find_by_uuid(pool: &SqlitePool, uuid: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Actor>(
            "SELECT uuid, id, slug, role, metadata, created_at, updated_at FROM actors WHERE uuid = ?",
        )
        .bind(uuid)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_slug(pool: &SqlitePool, slug: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Actor>(
            "SELECT uuid, id, slug, role, metadata, created_at, updated_at FROM actors WHERE slug = ?",
        )
        .bind(slug)
        .fetch_optional(pool)
        .await
    }
}
