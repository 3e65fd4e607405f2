use serde_json::json;
use uuid::Uuid;

use trellis_db::{
    Db, StoreError,
    models::{
        container::{Container, ContainerFields, CreateContainer},
        event::{NewEvent, ResourceKind},
        section::Section,
    },
};

/// Identifiers handed back by a successful create.
#[derive(Debug, Clone)]
pub struct CreatedContainer {
    pub uuid: Uuid,
    pub id: String,
    pub etag: i64,
}

#[derive(Debug, Clone)]
pub struct CreateSection {
    pub slug: String,
    pub title: Option<String>,
    pub position: i64,
}

/// Transactional store for containers. Every mutation commits a row
/// change and its event record together or not at all. Container
/// mutations do not fan out webhooks; only task mutations do.
#[derive(Clone)]
pub struct ContainerService {
    db: Db,
}

impl ContainerService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        actor: Uuid,
        data: CreateContainer,
    ) -> Result<CreatedContainer, StoreError> {
        if !trellis_utils::text::is_valid_slug(&data.slug) {
            return Err(StoreError::Validation(format!(
                "invalid container slug {:?}",
                data.slug
            )));
        }
        let uuid = Uuid::new_v4();
        self.db
            .in_txn(move |tx, events| {
                Box::pin(async move {
                    let title = data.title.clone().unwrap_or_else(|| data.slug.clone());
                    Container::insert(&mut *tx, uuid, &data.slug, &title, data.parent_uuid, actor)
                        .await?;
                    let container = Container::find_by_uuid(&mut **tx, uuid)
                        .await?
                        .ok_or_else(|| StoreError::not_found("container", uuid))?;

                    let mut payload = json!({ "slug": data.slug, "title": title });
                    if let Some(parent_uuid) = data.parent_uuid {
                        payload["parent_uuid"] = json!(parent_uuid);
                    }
                    events
                        .log(
                            &mut *tx,
                            NewEvent {
                                actor_uuid: Some(actor),
                                resource_kind: ResourceKind::Container,
                                resource_uuid: uuid,
                                event_type: "container.created",
                                etag: Some(container.etag),
                                payload: Some(payload.to_string()),
                            },
                        )
                        .await?;

                    Ok(CreatedContainer {
                        uuid,
                        id: container.id,
                        etag: container.etag,
                    })
                })
            })
            .await
    }

    /// `if_match = 0` skips the concurrency check.
    pub async fn update_fields(
        &self,
        actor: Uuid,
        uuid: Uuid,
        fields: ContainerFields,
        if_match: i64,
    ) -> Result<i64, StoreError> {
        if let Some(slug) = &fields.slug {
            if !trellis_utils::text::is_valid_slug(slug) {
                return Err(StoreError::Validation(format!(
                    "invalid container slug {slug:?}"
                )));
            }
        }
        if let Some(raw) = &fields.webhook_urls {
            serde_json::from_str::<Vec<String>>(raw).map_err(|err| {
                StoreError::Validation(format!(
                    "webhook_urls must be a JSON string array: {err}"
                ))
            })?;
        }

        self.db
            .in_txn(move |tx, events| {
                Box::pin(async move {
                    let current = Container::current_etag(&mut **tx, uuid)
                        .await?
                        .ok_or_else(|| StoreError::not_found("container", uuid))?;
                    if if_match > 0 && if_match != current {
                        return Err(StoreError::ETagMismatch {
                            expected: if_match,
                            actual: current,
                        });
                    }

                    Container::apply_fields(&mut *tx, uuid, &fields, actor).await?;
                    events
                        .log(
                            &mut *tx,
                            NewEvent {
                                actor_uuid: Some(actor),
                                resource_kind: ResourceKind::Container,
                                resource_uuid: uuid,
                                event_type: "container.updated",
                                etag: Some(current + 1),
                                payload: serde_json::to_string(&fields).ok(),
                            },
                        )
                        .await?;

                    Ok(current + 1)
                })
            })
            .await
    }

    /// Reparent a container. Acyclicity is the caller's responsibility;
    /// the resolver's ancestry walk is depth-bounded regardless.
    pub async fn move_container(
        &self,
        actor: Uuid,
        uuid: Uuid,
        new_parent: Option<Uuid>,
        if_match: i64,
    ) -> Result<i64, StoreError> {
        self.db
            .in_txn(move |tx, events| {
                Box::pin(async move {
                    let (current, old_parent) = Container::etag_and_parent(&mut **tx, uuid)
                        .await?
                        .ok_or_else(|| StoreError::not_found("container", uuid))?;
                    if if_match > 0 && if_match != current {
                        return Err(StoreError::ETagMismatch {
                            expected: if_match,
                            actual: current,
                        });
                    }

                    Container::set_parent(&mut *tx, uuid, new_parent, actor).await?;

                    let mut payload = json!({});
                    if let Some(old_parent) = old_parent {
                        payload["old_parent_uuid"] = json!(old_parent);
                    }
                    if let Some(new_parent) = new_parent {
                        payload["new_parent_uuid"] = json!(new_parent);
                    }
                    events
                        .log(
                            &mut *tx,
                            NewEvent {
                                actor_uuid: Some(actor),
                                resource_kind: ResourceKind::Container,
                                resource_uuid: uuid,
                                event_type: "container.moved",
                                etag: Some(current + 1),
                                payload: Some(payload.to_string()),
                            },
                        )
                        .await?;

                    Ok(current + 1)
                })
            })
            .await
    }

    pub async fn archive(
        &self,
        actor: Uuid,
        uuid: Uuid,
        if_match: i64,
    ) -> Result<i64, StoreError> {
        self.db
            .in_txn(move |tx, events| {
                Box::pin(async move {
                    let current = Container::current_etag(&mut **tx, uuid)
                        .await?
                        .ok_or_else(|| StoreError::not_found("container", uuid))?;
                    if if_match > 0 && if_match != current {
                        return Err(StoreError::ETagMismatch {
                            expected: if_match,
                            actual: current,
                        });
                    }

                    Container::set_archived(&mut *tx, uuid, actor).await?;
                    events
                        .log(
                            &mut *tx,
                            NewEvent {
                                actor_uuid: Some(actor),
                                resource_kind: ResourceKind::Container,
                                resource_uuid: uuid,
                                event_type: "container.archived",
                                etag: Some(current + 1),
                                payload: None,
                            },
                        )
                        .await?;

                    Ok(current + 1)
                })
            })
            .await
    }

    /// Hard delete. Refused while any task or child container still
    /// points at this container. The event is written before the DELETE
    /// so the log row exists whatever the cascade does afterwards.
    pub async fn delete(&self, actor: Uuid, uuid: Uuid, if_match: i64) -> Result<(), StoreError> {
        self.db
            .in_txn(move |tx, events| {
                Box::pin(async move {
                    let current = Container::current_etag(&mut **tx, uuid)
                        .await?
                        .ok_or_else(|| StoreError::not_found("container", uuid))?;
                    if if_match > 0 && if_match != current {
                        return Err(StoreError::ETagMismatch {
                            expected: if_match,
                            actual: current,
                        });
                    }

                    let dependents = Container::dependent_count(&mut *tx, uuid).await?;
                    if dependents > 0 {
                        return Err(StoreError::NotEmpty(dependents));
                    }

                    events
                        .log(
                            &mut *tx,
                            NewEvent {
                                actor_uuid: Some(actor),
                                resource_kind: ResourceKind::Container,
                                resource_uuid: uuid,
                                event_type: "container.deleted",
                                etag: None,
                                payload: None,
                            },
                        )
                        .await?;
                    Container::delete_row(&mut *tx, uuid).await?;
                    Ok(())
                })
            })
            .await
    }

    pub async fn get_by_uuid(&self, uuid: Uuid) -> Result<Option<Container>, StoreError> {
        Ok(Container::find_by_uuid(&self.db.pool, uuid).await?)
    }

    pub async fn find_by_slug_and_parent(
        &self,
        slug: &str,
        parent_uuid: Option<Uuid>,
    ) -> Result<Option<Container>, StoreError> {
        Ok(Container::find_by_slug_and_parent(&self.db.pool, slug, parent_uuid).await?)
    }

    pub async fn add_section(
        &self,
        actor: Uuid,
        container_uuid: Uuid,
        data: CreateSection,
    ) -> Result<Uuid, StoreError> {
        if !trellis_utils::text::is_valid_slug(&data.slug) {
            return Err(StoreError::Validation(format!(
                "invalid section slug {:?}",
                data.slug
            )));
        }
        let uuid = Uuid::new_v4();
        self.db
            .in_txn(move |tx, events| {
                Box::pin(async move {
                    if Container::find_by_uuid(&mut **tx, container_uuid)
                        .await?
                        .is_none()
                    {
                        return Err(StoreError::not_found("container", container_uuid));
                    }
                    Section::insert(
                        &mut *tx,
                        uuid,
                        container_uuid,
                        &data.slug,
                        data.title.as_deref(),
                        data.position,
                    )
                    .await?;
                    events
                        .log(
                            &mut *tx,
                            NewEvent {
                                actor_uuid: Some(actor),
                                resource_kind: ResourceKind::Section,
                                resource_uuid: uuid,
                                event_type: "section.created",
                                etag: None,
                                payload: Some(
                                    json!({ "container_uuid": container_uuid, "slug": data.slug })
                                        .to_string(),
                                ),
                            },
                        )
                        .await?;
                    Ok(uuid)
                })
            })
            .await
    }

    pub async fn sections(&self, container_uuid: Uuid) -> Result<Vec<Section>, StoreError> {
        Ok(Section::list_by_container(&self.db.pool, container_uuid).await?)
    }
}
