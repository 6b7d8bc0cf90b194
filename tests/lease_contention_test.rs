//! Lease contention: two tasks touching the same file, two agents. The
//! second claimant fails with FILE_LOCKED, classifies blocked, retries,
//! and succeeds once the lease is gone.

mod common;

use std::sync::Arc;
use std::time::Duration;

use drover::domain::models::{topics, AgentProfile, FailureKind, Task, TaskStatus};
use drover::domain::ports::task_store::TaskStore;
use drover::infrastructure::memstore::{MemMemoryStore, MemTaskStore, MessageHub};
use drover::services::AgentController;

use common::{collect_topic, fast_controller_config, wait_until, ScriptedExecutor, ScriptedOutcome};

#[tokio::test]
async fn blocked_task_retries_after_lease_release() {
    let hub = Arc::new(MessageHub::new());
    let tasks = Arc::new(MemTaskStore::new());
    let memories = Arc::new(MemMemoryStore::new());
    let retries = collect_topic(&hub, topics::TASK_RETRY_SCHEDULED).await;
    let locks = collect_topic(&hub, topics::FILE_LOCK).await;
    let unlocks = collect_topic(&hub, topics::FILE_UNLOCK).await;

    // T1 first; agent A grabs it and holds the lease on src/a.ts a while.
    let t1 = tasks
        .create(
            Task::new("edit src/a.ts part one", "touch src/a.ts carefully")
                .with_initial_status(TaskStatus::Ready),
        )
        .await
        .unwrap();

    let exec_a = ScriptedExecutor::new(vec![ScriptedOutcome::ok_after(Duration::from_millis(600))]);
    let profile_a = AgentProfile::new("agent-a", vec![]);
    let bus_a = Arc::new(hub.agent_bus(profile_a.id, "agent-a"));
    let agent_a = AgentController::new(
        profile_a,
        bus_a,
        Arc::clone(&tasks) as Arc<dyn TaskStore>,
        Arc::clone(&memories) as _,
        Arc::clone(&exec_a) as _,
        fast_controller_config(),
        None,
    );
    agent_a.start().await.unwrap();

    wait_until("T1 in progress", Duration::from_secs(5), || async {
        tasks
            .get(t1.id)
            .await
            .unwrap()
            .map(|t| t.status == TaskStatus::InProgress)
            .unwrap_or(false)
    })
    .await;
    assert_eq!(locks.lock().await.len(), 1);

    // Now T2 arrives, touching the same file, and agent B goes for it.
    let t2 = tasks
        .create(
            Task::new("edit src/a.ts part two", "also needs src/a.ts")
                .with_initial_status(TaskStatus::Ready),
        )
        .await
        .unwrap();

    let exec_b = ScriptedExecutor::always_ok();
    let profile_b = AgentProfile::new("agent-b", vec![]);
    let bus_b = Arc::new(hub.agent_bus(profile_b.id, "agent-b"));
    let agent_b = AgentController::new(
        profile_b,
        bus_b,
        Arc::clone(&tasks) as Arc<dyn TaskStore>,
        Arc::clone(&memories) as _,
        Arc::clone(&exec_b) as _,
        fast_controller_config(),
        None,
    );
    agent_b.start().await.unwrap();

    // B's first attempt bounces off the lease.
    wait_until("blocked retry scheduled", Duration::from_secs(5), || async {
        retries
            .lock()
            .await
            .iter()
            .any(|m| m.task_id() == Some(t2.id))
    })
    .await;
    {
        let retries = retries.lock().await;
        let blocked = retries.iter().find(|m| m.task_id() == Some(t2.id)).unwrap();
        assert_eq!(blocked.field_str("failure_type"), Some("blocked"));
        let error = blocked.field_str("error").unwrap();
        assert!(error.starts_with("FILE_LOCKED:src/a.ts:"), "unexpected error: {error}");
    }
    let t2_mid = tasks.get(t2.id).await.unwrap().unwrap();
    assert_eq!(t2_mid.failure_type, Some(FailureKind::Blocked));

    // Both tasks finish once A releases the lease.
    wait_until("both tasks complete", Duration::from_secs(10), || async {
        let a = tasks.get(t1.id).await.unwrap().unwrap().status;
        let b = tasks.get(t2.id).await.unwrap().unwrap().status;
        a == TaskStatus::Completed && b == TaskStatus::Completed
    })
    .await;

    // T2 executed exactly once, by whichever agent won the retry; it never
    // ran while the lease blocked it.
    let a_runs = exec_a.executed_tasks().await;
    let b_runs = exec_b.executed_tasks().await;
    assert_eq!(a_runs[0], t1.id);
    let t2_runs = a_runs.iter().chain(b_runs.iter()).filter(|id| **id == t2.id).count();
    assert_eq!(t2_runs, 1);
    assert!(unlocks.lock().await.len() >= 2);

    agent_a.graceful_stop().await;
    agent_b.graceful_stop().await;
}
