//! On-disk round trip: the schema migrates on connect and committed
//! state survives a reconnect.

mod common;

use tempfile::TempDir;
use trellis_db::Db;
use trellis_db::models::task::TaskState;
use trellis_services::services::containers::ContainerService;
use trellis_services::services::tasks::TaskService;

#[tokio::test]
async fn committed_rows_survive_reconnect() {
    trellis_utils::logging::init_for_tests();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("trellis.sqlite");

    let (container_uuid, task_uuid) = {
        let db = Db::connect(&path).await.expect("open database");
        let actor = common::seed_actor(&db).await;
        let containers = ContainerService::new(db.clone());
        let tasks = TaskService::new(db.clone());

        let container = containers
            .create(
                actor,
                trellis_db::models::container::CreateContainer {
                    slug: "durable".to_string(),
                    title: None,
                    parent_uuid: None,
                },
            )
            .await
            .unwrap();
        let task = tasks
            .create(
                actor,
                trellis_db::models::task::CreateTask::new(container.uuid, "kept", "kept"),
            )
            .await
            .unwrap();
        (container.uuid, task.uuid)
    };

    // Reconnect: migrations are idempotent and the rows are still there.
    let db = Db::connect(&path).await.expect("reopen database");
    let containers = ContainerService::new(db.clone());
    let tasks = TaskService::new(db.clone());

    let container = containers
        .get_by_uuid(container_uuid)
        .await
        .unwrap()
        .expect("container survived");
    assert_eq!(container.slug, "durable");

    let task = tasks
        .get_by_uuid(task_uuid)
        .await
        .unwrap()
        .expect("task survived");
    assert_eq!(task.state, TaskState::Open);
    assert_eq!(task.etag, 2);
}
