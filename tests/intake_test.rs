//! Task-file intake: frontmatter ingestion, processed-file moves,
//! dependency resolution by title, and invalid-file handling.

mod common;

use std::sync::Arc;
use std::time::Duration;

use drover::domain::models::{topics, TaskFilter, TaskPriority, TaskStatus};
use drover::domain::ports::task_store::TaskStore;
use drover::infrastructure::memstore::{MemTaskStore, MessageHub};
use drover::services::TaskIntake;
use uuid::Uuid;

use common::collect_topic;

fn intake(
    dir: &std::path::Path,
    tasks: Arc<MemTaskStore>,
    hub: &Arc<MessageHub>,
) -> Arc<TaskIntake> {
    TaskIntake::new(
        dir,
        tasks as Arc<dyn TaskStore>,
        Arc::new(hub.agent_bus(Uuid::new_v4(), "intake-test")) as _,
        2,
        Duration::from_millis(40),
    )
}

#[tokio::test]
async fn ingests_valid_file_and_moves_it() {
    let dir = tempfile::tempdir().unwrap();
    let hub = Arc::new(MessageHub::new());
    let tasks = Arc::new(MemTaskStore::new());
    let created = collect_topic(&hub, topics::TASK_CREATED).await;

    std::fs::write(
        dir.path().join("feature.md"),
        "---\ntitle: Build the widget\npriority: high\nskills:\n  - rust\nestimate: 45\n---\nMake the widget spin.\n",
    )
    .unwrap();

    let intake = intake(dir.path(), Arc::clone(&tasks), &hub);
    intake.start().await.unwrap();
    intake.scan().await;

    let all = tasks.list(TaskFilter::default()).await.unwrap();
    assert_eq!(all.len(), 1);
    let task = &all[0];
    assert_eq!(task.title, "Build the widget");
    assert_eq!(task.description, "Make the widget spin.");
    assert_eq!(task.priority, TaskPriority::High);
    assert!(task.required_skills.contains("rust"));
    assert_eq!(task.estimated_minutes, Some(45));
    assert_eq!(task.status, TaskStatus::Pending);

    // Original is gone; processed copy is prefixed with the task id.
    assert!(!dir.path().join("feature.md").exists());
    let processed = dir.path().join("processed").join(format!("{}-feature.md", task.id));
    assert!(processed.exists());

    assert_eq!(created.lock().await.len(), 1);
    intake.stop().await;
}

#[tokio::test]
async fn resolves_dependencies_by_title_and_id() {
    let dir = tempfile::tempdir().unwrap();
    let hub = Arc::new(MessageHub::new());
    let tasks = Arc::new(MemTaskStore::new());

    let existing = tasks
        .create(drover::domain::models::Task::new("Base work", "d"))
        .await
        .unwrap();

    std::fs::write(
        dir.path().join("dependent.md"),
        format!(
            "---\ntitle: Follow-up\ndependencies:\n  - Base work\n  - {}\n---\nbody\n",
            existing.id
        ),
    )
    .unwrap();

    let intake = intake(dir.path(), Arc::clone(&tasks), &hub);
    intake.start().await.unwrap();
    intake.scan().await;

    let all = tasks.list(TaskFilter::default()).await.unwrap();
    let follow_up = all.iter().find(|t| t.title == "Follow-up").unwrap();
    assert_eq!(follow_up.dependencies, vec![existing.id, existing.id]);
    intake.stop().await;
}

#[tokio::test]
async fn invalid_file_is_skipped_and_left_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let hub = Arc::new(MessageHub::new());
    let tasks = Arc::new(MemTaskStore::new());

    std::fs::write(dir.path().join("broken.md"), "no frontmatter at all").unwrap();
    std::fs::write(dir.path().join("nontask.txt"), "ignored entirely").unwrap();

    let intake = intake(dir.path(), Arc::clone(&tasks), &hub);
    intake.start().await.unwrap();
    intake.scan().await;
    intake.scan().await;

    assert!(tasks.list(TaskFilter::default()).await.unwrap().is_empty());
    assert!(dir.path().join("broken.md").exists());
    intake.stop().await;
}

#[tokio::test]
async fn missing_intake_directory_refuses_to_start() {
    let dir = tempfile::tempdir().unwrap();
    let hub = Arc::new(MessageHub::new());
    let tasks = Arc::new(MemTaskStore::new());

    let intake = intake(&dir.path().join("nope"), tasks, &hub);
    assert!(intake.start().await.is_err());
}

#[tokio::test]
async fn watcher_picks_up_files_on_its_own_tick() {
    let dir = tempfile::tempdir().unwrap();
    let hub = Arc::new(MessageHub::new());
    let tasks = Arc::new(MemTaskStore::new());

    let intake = intake(dir.path(), Arc::clone(&tasks), &hub);
    intake.start().await.unwrap();

    std::fs::write(
        dir.path().join("later.md"),
        "---\ntitle: Arrives later\n---\nbody\n",
    )
    .unwrap();

    common::wait_until("ticked ingestion", Duration::from_secs(5), || async {
        tasks.list(TaskFilter::default()).await.unwrap().len() == 1
    })
    .await;
    intake.stop().await;
}
