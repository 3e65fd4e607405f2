use serde_json::json;
use uuid::Uuid;

use trellis_db::{
    Db, StoreError,
    models::{
        attachment::Attachment,
        comment::Comment,
        container::Container,
        event::{NewEvent, ResourceKind},
        task::{CreateTask, Task, TaskFields, TaskState},
        task_relation::{RelationKind, TaskRelation},
    },
};

use super::webhooks::{WebhookPayload, WebhookService};

/// Identifiers handed back by a successful create.
#[derive(Debug, Clone)]
pub struct CreatedTask {
    pub uuid: Uuid,
    pub id: String,
    pub etag: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct PurgeOutcome {
    pub attachments_deleted: i64,
    pub bytes_freed: i64,
}

#[derive(Debug, Clone)]
pub struct CreateComment {
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct CreateAttachment {
    pub filename: String,
    pub mime_type: Option<String>,
    pub size_bytes: i64,
}

/// Transactional store for tasks. Each mutation commits the row change,
/// its dependency side effects and one event record atomically, then
/// fans out webhooks from the post-commit continuation.
#[derive(Clone)]
pub struct TaskService {
    db: Db,
    webhooks: WebhookService,
}

impl TaskService {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            webhooks: WebhookService::new(),
        }
    }

    /// Create a task. An explicit uuid makes the call idempotent: if the
    /// row already exists its identifiers are returned and nothing is
    /// written or dispatched.
    pub async fn create(&self, actor: Uuid, data: CreateTask) -> Result<CreatedTask, StoreError> {
        if !trellis_utils::text::is_valid_slug(&data.slug) {
            return Err(StoreError::Validation(format!(
                "invalid task slug {:?}",
                data.slug
            )));
        }
        if let Some(priority) = data.priority {
            validate_priority(priority)?;
        }

        let (created, fresh) = self
            .db
            .in_txn(move |tx, events| {
                Box::pin(async move {
                    if let Some(uuid) = data.uuid {
                        if let Some(existing) = Task::find_by_uuid(&mut **tx, uuid).await? {
                            return Ok((
                                CreatedTask {
                                    uuid,
                                    id: existing.id,
                                    etag: existing.etag,
                                },
                                false,
                            ));
                        }
                    }
                    let uuid = data.uuid.unwrap_or_else(Uuid::new_v4);

                    if Container::find_by_uuid(&mut **tx, data.project_uuid)
                        .await?
                        .is_none()
                    {
                        return Err(StoreError::not_found("container", data.project_uuid));
                    }

                    Task::insert(&mut *tx, uuid, &data, actor).await?;
                    // Re-read: the friendly id and the etag bump come
                    // from the insert trigger.
                    let task = Task::find_by_uuid(&mut **tx, uuid)
                        .await?
                        .ok_or_else(|| StoreError::not_found("task", uuid))?;

                    events
                        .log(
                            &mut *tx,
                            NewEvent {
                                actor_uuid: Some(actor),
                                resource_kind: ResourceKind::Task,
                                resource_uuid: uuid,
                                event_type: "task.created",
                                etag: Some(task.etag),
                                payload: serde_json::to_string(&data).ok(),
                            },
                        )
                        .await?;

                    Ok((
                        CreatedTask {
                            uuid,
                            id: task.id,
                            etag: task.etag,
                        },
                        true,
                    ))
                })
            })
            .await?;

        if fresh {
            self.webhooks
                .dispatch_for_task(&self.db.pool, created.uuid)
                .await;
        }
        Ok(created)
    }

    /// Update a field set under the ETag check (`if_match = 0` skips
    /// it). A transition into a completion state runs unblock detection
    /// over this task's `blocks` targets; a transition to `deleted`
    /// additionally cascades through descendant subtasks. Webhooks go
    /// out after commit: the task first, then each newly unblocked task.
    pub async fn update_fields(
        &self,
        actor: Uuid,
        task_uuid: Uuid,
        fields: TaskFields,
        if_match: i64,
    ) -> Result<i64, StoreError> {
        if let Some(slug) = &fields.slug {
            if !trellis_utils::text::is_valid_slug(slug) {
                return Err(StoreError::Validation(format!("invalid task slug {slug:?}")));
            }
        }
        if let Some(priority) = fields.priority {
            validate_priority(priority)?;
        }

        let (new_etag, unblocked) = self
            .db
            .in_txn(move |tx, events| {
                Box::pin(async move {
                    let (etag, state) = Task::etag_and_state(&mut **tx, task_uuid)
                        .await?
                        .ok_or_else(|| StoreError::not_found("task", task_uuid))?;
                    if if_match > 0 && if_match != etag {
                        return Err(StoreError::ETagMismatch {
                            expected: if_match,
                            actual: etag,
                        });
                    }

                    let completion_transition = fields
                        .state
                        .is_some_and(|new_state| !state.is_completion() && new_state.is_completion());
                    let candidates = if completion_transition {
                        TaskRelation::blocked_candidates(&mut **tx, task_uuid).await?
                    } else {
                        Vec::new()
                    };

                    Task::apply_fields(&mut *tx, task_uuid, &fields, actor).await?;

                    if fields.state == Some(TaskState::Deleted) {
                        Task::cascade_mark_deleted(&mut *tx, events, task_uuid, actor).await?;
                    }

                    let mut unblocked = Vec::new();
                    for candidate in candidates {
                        if Task::count_open_blockers(&mut *tx, candidate).await? == 0 {
                            unblocked.push(candidate);
                        }
                    }

                    events
                        .log(
                            &mut *tx,
                            NewEvent {
                                actor_uuid: Some(actor),
                                resource_kind: ResourceKind::Task,
                                resource_uuid: task_uuid,
                                event_type: "task.updated",
                                etag: Some(etag + 1),
                                payload: serde_json::to_string(&fields).ok(),
                            },
                        )
                        .await?;

                    Ok((etag + 1, unblocked))
                })
            })
            .await?;

        self.webhooks
            .dispatch_for_task(&self.db.pool, task_uuid)
            .await;
        for uuid in unblocked {
            self.webhooks.dispatch_for_task(&self.db.pool, uuid).await;
        }
        Ok(new_etag)
    }

    pub async fn move_task(
        &self,
        actor: Uuid,
        task_uuid: Uuid,
        new_project_uuid: Uuid,
        if_match: i64,
    ) -> Result<i64, StoreError> {
        let new_etag = self
            .db
            .in_txn(move |tx, events| {
                Box::pin(async move {
                    let (etag, old_project_uuid) = Task::etag_and_project(&mut **tx, task_uuid)
                        .await?
                        .ok_or_else(|| StoreError::not_found("task", task_uuid))?;
                    if if_match > 0 && if_match != etag {
                        return Err(StoreError::ETagMismatch {
                            expected: if_match,
                            actual: etag,
                        });
                    }
                    if Container::find_by_uuid(&mut **tx, new_project_uuid)
                        .await?
                        .is_none()
                    {
                        return Err(StoreError::not_found("container", new_project_uuid));
                    }

                    Task::set_project(&mut *tx, task_uuid, new_project_uuid, actor).await?;
                    events
                        .log(
                            &mut *tx,
                            NewEvent {
                                actor_uuid: Some(actor),
                                resource_kind: ResourceKind::Task,
                                resource_uuid: task_uuid,
                                event_type: "task.moved",
                                etag: Some(etag + 1),
                                payload: Some(
                                    json!({
                                        "old_project_uuid": old_project_uuid,
                                        "new_project_uuid": new_project_uuid,
                                    })
                                    .to_string(),
                                ),
                            },
                        )
                        .await?;

                    Ok(etag + 1)
                })
            })
            .await?;

        self.webhooks
            .dispatch_for_task(&self.db.pool, task_uuid)
            .await;
        Ok(new_etag)
    }

    pub async fn archive(
        &self,
        actor: Uuid,
        task_uuid: Uuid,
        if_match: i64,
    ) -> Result<i64, StoreError> {
        let new_etag = self
            .db
            .in_txn(move |tx, events| {
                Box::pin(async move {
                    let (etag, _state) = Task::etag_and_state(&mut **tx, task_uuid)
                        .await?
                        .ok_or_else(|| StoreError::not_found("task", task_uuid))?;
                    if if_match > 0 && if_match != etag {
                        return Err(StoreError::ETagMismatch {
                            expected: if_match,
                            actual: etag,
                        });
                    }

                    Task::set_archived(&mut *tx, task_uuid, actor).await?;
                    events
                        .log(
                            &mut *tx,
                            NewEvent {
                                actor_uuid: Some(actor),
                                resource_kind: ResourceKind::Task,
                                resource_uuid: task_uuid,
                                event_type: "task.archived",
                                etag: Some(etag + 1),
                                payload: None,
                            },
                        )
                        .await?;

                    Ok(etag + 1)
                })
            })
            .await?;

        self.webhooks
            .dispatch_for_task(&self.db.pool, task_uuid)
            .await;
        Ok(new_etag)
    }

    /// Hard delete. The webhook payload is snapshotted before the row
    /// goes away, and the `task.purged` event is written before the
    /// DELETE; attachments and comments fall to the FK cascade.
    pub async fn purge(
        &self,
        actor: Uuid,
        task_uuid: Uuid,
        if_match: i64,
    ) -> Result<PurgeOutcome, StoreError> {
        let (outcome, seed) = self
            .db
            .in_txn(move |tx, events| {
                Box::pin(async move {
                    let task = Task::find_by_uuid(&mut **tx, task_uuid)
                        .await?
                        .ok_or_else(|| StoreError::not_found("task", task_uuid))?;
                    if if_match > 0 && if_match != task.etag {
                        return Err(StoreError::ETagMismatch {
                            expected: if_match,
                            actual: task.etag,
                        });
                    }
                    let container = Container::find_by_uuid(&mut **tx, task.project_uuid)
                        .await?
                        .ok_or_else(|| StoreError::not_found("container", task.project_uuid))?;
                    let seed = WebhookPayload::from_task(&task, &container.id);

                    let (attachments_deleted, bytes_freed) =
                        Attachment::stats_for_task(&mut *tx, task_uuid).await?;

                    events
                        .log(
                            &mut *tx,
                            NewEvent {
                                actor_uuid: Some(actor),
                                resource_kind: ResourceKind::Task,
                                resource_uuid: task_uuid,
                                event_type: "task.purged",
                                etag: None,
                                payload: Some(
                                    json!({
                                        "attachments_deleted": attachments_deleted,
                                        "bytes_freed": bytes_freed,
                                    })
                                    .to_string(),
                                ),
                            },
                        )
                        .await?;

                    Task::delete_row(&mut *tx, task_uuid).await?;

                    Ok((
                        PurgeOutcome {
                            attachments_deleted,
                            bytes_freed,
                        },
                        seed,
                    ))
                })
            })
            .await?;

        self.webhooks.dispatch_payload(&self.db.pool, seed).await;
        Ok(outcome)
    }

    pub async fn get_by_uuid(&self, uuid: Uuid) -> Result<Option<Task>, StoreError> {
        Ok(Task::find_by_uuid(&self.db.pool, uuid).await?)
    }

    /// Tasks still blocking `task_uuid` (incomplete `blocks` sources).
    pub async fn blocked_by(&self, task_uuid: Uuid) -> Result<Vec<Task>, StoreError> {
        Ok(Task::blocked_by(&self.db.pool, task_uuid).await?)
    }

    /// Every task `task_uuid` blocks, regardless of state.
    pub async fn tasks_blocked_by(&self, task_uuid: Uuid) -> Result<Vec<Task>, StoreError> {
        Ok(Task::tasks_blocked_by(&self.db.pool, task_uuid).await?)
    }

    pub async fn link(
        &self,
        actor: Uuid,
        from_task_uuid: Uuid,
        to_task_uuid: Uuid,
        kind: RelationKind,
    ) -> Result<(), StoreError> {
        self.db
            .in_txn(move |tx, events| {
                Box::pin(async move {
                    for uuid in [from_task_uuid, to_task_uuid] {
                        if Task::find_by_uuid(&mut **tx, uuid).await?.is_none() {
                            return Err(StoreError::not_found("task", uuid));
                        }
                    }
                    let inserted =
                        TaskRelation::insert(&mut **tx, from_task_uuid, to_task_uuid, kind, actor)
                            .await?;
                    if inserted {
                        events
                            .log(
                                &mut *tx,
                                NewEvent {
                                    actor_uuid: Some(actor),
                                    resource_kind: ResourceKind::Task,
                                    resource_uuid: from_task_uuid,
                                    event_type: "task.linked",
                                    etag: None,
                                    payload: Some(
                                        json!({ "to_task_uuid": to_task_uuid, "kind": kind })
                                            .to_string(),
                                    ),
                                },
                            )
                            .await?;
                    }
                    Ok(())
                })
            })
            .await
    }

    pub async fn unlink(
        &self,
        actor: Uuid,
        from_task_uuid: Uuid,
        to_task_uuid: Uuid,
        kind: RelationKind,
    ) -> Result<(), StoreError> {
        self.db
            .in_txn(move |tx, events| {
                Box::pin(async move {
                    let removed =
                        TaskRelation::delete(&mut **tx, from_task_uuid, to_task_uuid, kind).await?;
                    if removed > 0 {
                        events
                            .log(
                                &mut *tx,
                                NewEvent {
                                    actor_uuid: Some(actor),
                                    resource_kind: ResourceKind::Task,
                                    resource_uuid: from_task_uuid,
                                    event_type: "task.unlinked",
                                    etag: None,
                                    payload: Some(
                                        json!({ "to_task_uuid": to_task_uuid, "kind": kind })
                                            .to_string(),
                                    ),
                                },
                            )
                            .await?;
                    }
                    Ok(())
                })
            })
            .await
    }

    pub async fn add_comment(
        &self,
        actor: Uuid,
        task_uuid: Uuid,
        data: CreateComment,
    ) -> Result<Uuid, StoreError> {
        let uuid = Uuid::new_v4();
        self.db
            .in_txn(move |tx, events| {
                Box::pin(async move {
                    if Task::find_by_uuid(&mut **tx, task_uuid).await?.is_none() {
                        return Err(StoreError::not_found("task", task_uuid));
                    }
                    Comment::insert(&mut *tx, uuid, task_uuid, actor, &data.body).await?;
                    events
                        .log(
                            &mut *tx,
                            NewEvent {
                                actor_uuid: Some(actor),
                                resource_kind: ResourceKind::Task,
                                resource_uuid: task_uuid,
                                event_type: "task.comment_added",
                                etag: None,
                                payload: Some(json!({ "comment_uuid": uuid }).to_string()),
                            },
                        )
                        .await?;
                    Ok(uuid)
                })
            })
            .await
    }

    pub async fn comments(&self, task_uuid: Uuid) -> Result<Vec<Comment>, StoreError> {
        Ok(Comment::list_by_task(&self.db.pool, task_uuid).await?)
    }

    /// Record attachment metadata; the bytes themselves are stored
    /// elsewhere.
    pub async fn add_attachment(
        &self,
        actor: Uuid,
        task_uuid: Uuid,
        data: CreateAttachment,
    ) -> Result<Uuid, StoreError> {
        let uuid = Uuid::new_v4();
        self.db
            .in_txn(move |tx, events| {
                Box::pin(async move {
                    if Task::find_by_uuid(&mut **tx, task_uuid).await?.is_none() {
                        return Err(StoreError::not_found("task", task_uuid));
                    }
                    Attachment::insert(
                        &mut *tx,
                        uuid,
                        task_uuid,
                        &data.filename,
                        data.mime_type.as_deref(),
                        data.size_bytes,
                        actor,
                    )
                    .await?;
                    events
                        .log(
                            &mut *tx,
                            NewEvent {
                                actor_uuid: Some(actor),
                                resource_kind: ResourceKind::Task,
                                resource_uuid: task_uuid,
                                event_type: "task.attachment_added",
                                etag: None,
                                payload: Some(
                                    json!({ "attachment_uuid": uuid, "filename": data.filename })
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

    pub async fn attachments(&self, task_uuid: Uuid) -> Result<Vec<Attachment>, StoreError> {
        Ok(Attachment::list_by_task(&self.db.pool, task_uuid).await?)
    }
}

fn validate_priority(priority: i64) -> Result<(), StoreError> {
    if (1..=4).contains(&priority) {
        Ok(())
    } else {
        Err(StoreError::Validation(format!(
            "priority must be between 1 and 4, got {priority}"
        )))
    }
}
