//! Webhook resolution and delivery: ancestry templating, normalization,
//! dedupe, unblock fan-out and the purge snapshot.

mod common;

use common::setup;
use serde_json::json;
use trellis_db::models::container::ContainerFields;
use trellis_db::models::task::{CreateTask, TaskFields, TaskState};
use trellis_db::models::task_relation::RelationKind;
use trellis_services::services::webhooks::{WebhookPayload, resolver};
use uuid::Uuid;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sample_payload(project_uuid: Uuid) -> WebhookPayload {
    WebhookPayload {
        ticket_id: "T-00001".to_string(),
        ticket_uuid: Uuid::new_v4(),
        project_id: "P-00001".to_string(),
        project_uuid,
        state: "open".to_string(),
        priority: 3,
        kind: "task".to_string(),
        run_status: None,
        resolution: None,
        meta: json!({}),
        etag: 2,
        cp_project_id: None,
        cp_run_id: None,
        cp_session_id: None,
        sdk_session_id: None,
    }
}

async fn set_webhook_urls(env: &common::TestEnv, container: Uuid, urls: &[&str]) {
    env.containers
        .update_fields(
            env.actor,
            container,
            ContainerFields {
                webhook_urls: Some(serde_json::to_string(urls).unwrap()),
                ..Default::default()
            },
            0,
        )
        .await
        .unwrap();
}

/// Deepest container first, invalid entries skipped, duplicates removed
/// with the first occurrence winning.
#[tokio::test]
async fn resolver_walks_ancestry_bottom_up_and_dedupes() {
    let env = setup().await;
    let root = env.container("hook-root").await;
    let child = env.child_container("hook-child", root.uuid).await;

    set_webhook_urls(
        &env,
        root.uuid,
        &["http://ex.com/hook/{ticket_id}", "ftp://invalid"],
    )
    .await;
    set_webhook_urls(
        &env,
        child.uuid,
        &["http://ex.com/hook/{ticket_id}", "http://ex.com/other/"],
    )
    .await;

    let payload = sample_payload(child.uuid);
    let urls = resolver::resolve(&env.db.pool, child.uuid, &payload)
        .await
        .unwrap();
    assert_eq!(
        urls,
        ["http://ex.com/hook/T-00001", "http://ex.com/other"]
    );

    // Resolution is idempotent.
    let again = resolver::resolve(&env.db.pool, child.uuid, &payload)
        .await
        .unwrap();
    assert_eq!(urls, again);
}

#[tokio::test]
async fn resolver_normalizes_trailing_slash_duplicates() {
    let env = setup().await;
    let container = env.container("slashes").await;
    set_webhook_urls(&env, container.uuid, &["http://x/hook/", "http://x/hook"]).await;

    let urls = resolver::resolve(&env.db.pool, container.uuid, &sample_payload(container.uuid))
        .await
        .unwrap();
    assert_eq!(urls, ["http://x/hook"]);
}

#[tokio::test]
async fn resolver_skips_malformed_template_column() {
    let env = setup().await;
    let root = env.container("half-broken").await;
    let child = env.child_container("still-works", root.uuid).await;

    // Bypass the service validation to simulate a corrupt column.
    sqlx::query("UPDATE containers SET webhook_urls = 'not json' WHERE uuid = ?")
        .bind(root.uuid)
        .execute(&env.db.pool)
        .await
        .unwrap();
    set_webhook_urls(&env, child.uuid, &["http://ok/hook"]).await;

    let urls = resolver::resolve(&env.db.pool, child.uuid, &sample_payload(child.uuid))
        .await
        .unwrap();
    assert_eq!(urls, ["http://ok/hook"]);
}

/// Completing a blocker fires a webhook for the blocker, then one for
/// the task it unblocked.
#[tokio::test]
async fn completion_unblocks_single_dependent() {
    let env = setup().await;
    let server = MockServer::start().await;
    let project = env.container("s4").await;

    let a = env.task(project.uuid, "blocker").await;
    let b = env.task(project.uuid, "blocked").await;
    env.tasks
        .link(env.actor, a.uuid, b.uuid, RelationKind::Blocks)
        .await
        .unwrap();
    env.tasks
        .update_fields(env.actor, b.uuid, TaskFields::state(TaskState::Blocked), 0)
        .await
        .unwrap();

    // Only now subscribe, so the setup writes above stay silent.
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    set_webhook_urls(
        &env,
        project.uuid,
        &[&format!("{}/hook/{{ticket_id}}", server.uri())],
    )
    .await;

    env.tasks
        .update_fields(env.actor, a.uuid, TaskFields::state(TaskState::Completed), 0)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let paths: Vec<_> = requests.iter().map(|r| r.url.path().to_string()).collect();
    assert_eq!(paths, [format!("/hook/{}", a.id), format!("/hook/{}", b.id)]);

    let first: WebhookPayload = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(first.ticket_uuid, a.uuid);
    assert_eq!(first.state, "completed");
    assert_eq!(first.project_uuid, project.uuid);
    assert_eq!(
        requests[0]
            .headers
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("application/json")
    );

    let second: WebhookPayload = serde_json::from_slice(&requests[1].body).unwrap();
    assert_eq!(second.ticket_uuid, b.uuid);
    assert_eq!(second.state, "blocked");
}

/// With two blockers, only the last completion unblocks the dependent.
#[tokio::test]
async fn unblock_waits_for_every_blocker() {
    let env = setup().await;
    let server = MockServer::start().await;
    let project = env.container("s5").await;

    let a1 = env.task(project.uuid, "blocker-1").await;
    let a2 = env.task(project.uuid, "blocker-2").await;
    let b = env.task(project.uuid, "gated").await;
    for blocker in [a1.uuid, a2.uuid] {
        env.tasks
            .link(env.actor, blocker, b.uuid, RelationKind::Blocks)
            .await
            .unwrap();
    }

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    set_webhook_urls(
        &env,
        project.uuid,
        &[&format!("{}/hook/{{ticket_id}}", server.uri())],
    )
    .await;

    env.tasks
        .update_fields(env.actor, a1.uuid, TaskFields::state(TaskState::Completed), 0)
        .await
        .unwrap();
    let after_first: Vec<_> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect();
    assert_eq!(after_first, [format!("/hook/{}", a1.id)]);

    env.tasks
        .update_fields(env.actor, a2.uuid, TaskFields::state(TaskState::Completed), 0)
        .await
        .unwrap();
    let all: Vec<_> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect();
    assert_eq!(
        all,
        [
            format!("/hook/{}", a1.id),
            format!("/hook/{}", a2.id),
            format!("/hook/{}", b.id),
        ]
    );
}

/// The purge webhook is built from a snapshot taken before the DELETE.
#[tokio::test]
async fn purge_dispatches_from_pre_delete_snapshot() {
    let env = setup().await;
    let server = MockServer::start().await;
    let project = env.container("vanish").await;
    let task = env.task(project.uuid, "ephemeral").await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    set_webhook_urls(
        &env,
        project.uuid,
        &[&format!("{}/hook/{{ticket_id}}", server.uri())],
    )
    .await;

    env.tasks.purge(env.actor, task.uuid, 0).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.path(), format!("/hook/{}", task.id));
    let payload: WebhookPayload = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(payload.ticket_uuid, task.uuid);
    assert_eq!(payload.project_id, project.id);
}

/// Subscriber failures are swallowed; the mutation still succeeds.
#[tokio::test]
async fn delivery_failures_never_surface() {
    let env = setup().await;
    let server = MockServer::start().await;
    let project = env.container("flaky").await;
    let task = env.task(project.uuid, "resilient").await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    set_webhook_urls(
        &env,
        project.uuid,
        &[
            &format!("{}/hook/{{ticket_id}}", server.uri()),
            "http://127.0.0.1:1/unroutable",
        ],
    )
    .await;

    let new_etag = env
        .tasks
        .update_fields(env.actor, task.uuid, TaskFields::state(TaskState::InProgress), 0)
        .await
        .unwrap();
    assert_eq!(new_etag, 3);
}

/// A rolled-back mutation must not reach subscribers.
#[tokio::test]
async fn failed_transaction_dispatches_nothing() {
    let env = setup().await;
    let server = MockServer::start().await;
    let project = env.container("silent").await;
    let task = env.task(project.uuid, "untouched").await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    set_webhook_urls(
        &env,
        project.uuid,
        &[&format!("{}/hook/{{ticket_id}}", server.uri())],
    )
    .await;

    let err = env
        .tasks
        .update_fields(
            env.actor,
            task.uuid,
            TaskFields::state(TaskState::InProgress),
            99,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, trellis_db::StoreError::ETagMismatch { .. }));
    assert!(server.received_requests().await.unwrap().is_empty());
}

/// `meta` rides along verbatim when valid, collapses to `{}` when not;
/// empty optionals are omitted from the body entirely.
#[tokio::test]
async fn payload_meta_and_optional_fields() {
    let env = setup().await;
    let server = MockServer::start().await;
    let project = env.container("shape").await;

    let mut data = CreateTask::new(project.uuid, "shaped", "shaped");
    data.meta = Some(r#"{"sprint": 7}"#.to_string());
    let task = env.tasks.create(env.actor, data).await.unwrap();

    let mut corrupt = CreateTask::new(project.uuid, "corrupt", "corrupt");
    corrupt.meta = Some("not json".to_string());
    let bad = env.tasks.create(env.actor, corrupt).await.unwrap();

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    set_webhook_urls(&env, project.uuid, &[&format!("{}/hook", server.uri())]).await;

    env.tasks
        .update_fields(env.actor, task.uuid, TaskFields::state(TaskState::InProgress), 0)
        .await
        .unwrap();
    env.tasks
        .update_fields(env.actor, bad.uuid, TaskFields::state(TaskState::InProgress), 0)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);

    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["meta"], json!({"sprint": 7}));
    assert!(body.get("run_status").is_none());
    assert!(body.get("resolution").is_none());
    assert!(body.get("cp_run_id").is_none());

    let body: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
    assert_eq!(body["meta"], json!({}));
}
