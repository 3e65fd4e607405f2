#![allow(dead_code)]

use trellis_db::Db;
use trellis_db::models::actor::{Actor, ActorRole, CreateActor};
use trellis_db::models::container::CreateContainer;
use trellis_db::models::task::CreateTask;
use trellis_services::services::containers::{ContainerService, CreatedContainer};
use trellis_services::services::tasks::{CreatedTask, TaskService};
use uuid::Uuid;

pub struct TestEnv {
    pub db: Db,
    pub actor: Uuid,
    pub containers: ContainerService,
    pub tasks: TaskService,
}

pub async fn setup() -> TestEnv {
    trellis_utils::logging::init_for_tests();
    let db = Db::connect_in_memory().await.expect("in-memory database");
    let actor = seed_actor(&db).await;
    TestEnv {
        containers: ContainerService::new(db.clone()),
        tasks: TaskService::new(db.clone()),
        db,
        actor,
    }
}

pub async fn seed_actor(db: &Db) -> Uuid {
    let actor = Actor::create(
        &db.pool,
        &CreateActor {
            slug: format!("tester-{}", Uuid::new_v4().simple()),
            role: ActorRole::Human,
            metadata: None,
        },
    )
    .await
    .expect("seed actor");
    actor.uuid
}

impl TestEnv {
    pub async fn container(&self, slug: &str) -> CreatedContainer {
        self.containers
            .create(
                self.actor,
                CreateContainer {
                    slug: slug.to_string(),
                    title: None,
                    parent_uuid: None,
                },
            )
            .await
            .expect("create container")
    }

    pub async fn child_container(&self, slug: &str, parent: Uuid) -> CreatedContainer {
        self.containers
            .create(
                self.actor,
                CreateContainer {
                    slug: slug.to_string(),
                    title: None,
                    parent_uuid: Some(parent),
                },
            )
            .await
            .expect("create child container")
    }

    pub async fn task(&self, project: Uuid, slug: &str) -> CreatedTask {
        self.tasks
            .create(self.actor, CreateTask::new(project, slug, slug))
            .await
            .expect("create task")
    }
}
