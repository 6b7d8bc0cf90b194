//! Claim-race scenarios: two live agents, and raw concurrent claims on
//! the store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use drover::domain::models::{topics, AgentProfile, Task, TaskStatus};
use drover::domain::ports::task_store::TaskStore;
use drover::infrastructure::memstore::{MemMemoryStore, MemTaskStore, MessageHub};
use drover::services::AgentController;
use uuid::Uuid;

use common::{collect_topic, fast_controller_config, wait_until, ScriptedExecutor};

#[tokio::test]
async fn two_agents_one_task_single_winner() {
    let hub = Arc::new(MessageHub::new());
    let tasks = Arc::new(MemTaskStore::new());
    let memories = Arc::new(MemMemoryStore::new());
    let claimed = collect_topic(&hub, topics::TASK_CLAIMED).await;
    let completed = collect_topic(&hub, topics::TASK_COMPLETED).await;

    let task = tasks
        .create(Task::new("contested", "d").with_initial_status(TaskStatus::Ready))
        .await
        .unwrap();

    let executors = [ScriptedExecutor::always_ok(), ScriptedExecutor::always_ok()];
    let mut agents = Vec::new();
    for (i, executor) in executors.iter().enumerate() {
        let name = format!("racer-{i}");
        let profile = AgentProfile::new(name.clone(), vec![]);
        let bus = Arc::new(hub.agent_bus(profile.id, name));
        let agent = AgentController::new(
            profile,
            bus,
            Arc::clone(&tasks) as Arc<dyn TaskStore>,
            Arc::clone(&memories) as _,
            Arc::clone(executor) as _,
            fast_controller_config(),
            None,
        );
        agent.start().await.unwrap();
        agents.push(agent);
    }

    wait_until("contested completion", Duration::from_secs(5), || async {
        tasks
            .get(task.id)
            .await
            .unwrap()
            .map(|t| t.status == TaskStatus::Completed)
            .unwrap_or(false)
    })
    .await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    // Exactly one claim, one execution, one completion.
    assert_eq!(claimed.lock().await.len(), 1);
    assert_eq!(completed.lock().await.len(), 1);
    let total_executions: usize = {
        let mut sum = 0;
        for executor in &executors {
            sum += executor.executed_tasks().await.len();
        }
        sum
    };
    assert_eq!(total_executions, 1);

    let completions: u64 = {
        let mut sum = 0;
        for agent in &agents {
            sum += agent.snapshot().await.stats.tasks_completed;
        }
        sum
    };
    assert_eq!(completions, 1);

    for agent in &agents {
        agent.graceful_stop().await;
    }
}

#[tokio::test]
async fn concurrent_store_claims_have_one_winner() {
    let tasks = Arc::new(MemTaskStore::new());
    let task = tasks
        .create(Task::new("t", "d").with_initial_status(TaskStatus::Ready))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let tasks = Arc::clone(&tasks);
        let task_id = task.id;
        handles.push(tokio::spawn(async move {
            tasks.claim(task_id, Uuid::new_v4()).await.unwrap().is_some()
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}
