//! Property tests: claim exclusivity under random contention, the retry
//! bound, and backoff shape.

mod common;

use std::sync::Arc;

use proptest::prelude::*;
use uuid::Uuid;

use drover::domain::models::{RetryConfig, Task, TaskPatch, TaskStatus};
use drover::domain::ports::task_store::TaskStore;
use drover::infrastructure::memstore::MemTaskStore;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// However many agents race, exactly one claim wins.
    #[test]
    fn concurrent_claims_single_winner(agents in 2usize..12) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async move {
            let tasks = Arc::new(MemTaskStore::new());
            let task = tasks
                .create(Task::new("contested", "d").with_initial_status(TaskStatus::Ready))
                .await
                .unwrap();

            let mut handles = Vec::new();
            for _ in 0..agents {
                let tasks = Arc::clone(&tasks);
                let id = task.id;
                handles.push(tokio::spawn(async move {
                    tasks.claim(id, Uuid::new_v4()).await.unwrap()
                }));
            }

            let mut winners = 0;
            for handle in handles {
                if let Some(claimed) = handle.await.unwrap() {
                    winners += 1;
                    assert_eq!(claimed.status, TaskStatus::Claimed);
                    assert!(claimed.assigned_agent.is_some());
                }
            }
            assert_eq!(winners, 1);

            // The winner is recorded on the task itself.
            let stored = tasks.get(task.id).await.unwrap().unwrap();
            assert_eq!(stored.status, TaskStatus::Claimed);
            assert!(stored.assigned_agent.is_some());
        });
    }

    /// Walking a task through an arbitrary failure script never exceeds the
    /// retry bound: it either completes once or fails permanently once.
    #[test]
    fn retry_bound_holds_for_any_failure_script(
        max_retries in 0u32..4,
        failures_before_success in 0u32..8,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async move {
            let tasks = Arc::new(MemTaskStore::new());
            let agent = Uuid::new_v4();
            let task = tasks
                .create(
                    Task::new("scripted", "d")
                        .with_max_retries(max_retries)
                        .with_initial_status(TaskStatus::Ready),
                )
                .await
                .unwrap();

            let mut completions = 0u32;
            let mut permanent_failures = 0u32;
            let mut attempt = 0u32;
            loop {
                let current = tasks.get(task.id).await.unwrap().unwrap();
                if current.is_terminal() {
                    break;
                }
                prop_assert!(current.retry_count <= current.max_retries);

                let claimed = tasks.claim(task.id, agent).await.unwrap();
                prop_assert!(claimed.is_some());
                tasks
                    .update_owned(task.id, agent, TaskPatch::new().status(TaskStatus::InProgress))
                    .await
                    .unwrap();

                if attempt < failures_before_success {
                    // Mirror the controller's failure path.
                    let current = tasks.get(task.id).await.unwrap().unwrap();
                    let will_retry = current.retry_count + 1 <= current.max_retries;
                    let next_status = if will_retry { TaskStatus::Ready } else { TaskStatus::Failed };
                    tasks
                        .update_owned(
                            task.id,
                            agent,
                            TaskPatch::new()
                                .status(next_status)
                                .retry_count(current.retry_count + 1)
                                .last_error("scripted failure"),
                        )
                        .await
                        .unwrap();
                    if !will_retry {
                        permanent_failures += 1;
                    }
                } else {
                    tasks
                        .update_owned(task.id, agent, TaskPatch::new().status(TaskStatus::Completed))
                        .await
                        .unwrap();
                    completions += 1;
                }
                attempt += 1;
                prop_assert!(attempt <= max_retries + 2, "attempt budget exceeded");
            }

            // Once terminal: exactly one outcome.
            prop_assert_eq!(completions + permanent_failures, 1);
            let done = tasks.get(task.id).await.unwrap().unwrap();
            if done.status == TaskStatus::Completed {
                prop_assert!(done.retry_count <= done.max_retries);
            } else {
                // Permanent failure records the over-budget attempt.
                prop_assert_eq!(done.retry_count, done.max_retries + 1);
            }
            Ok(())
        })?;
    }

    /// The advisory backoff doubles each retry and never shrinks.
    #[test]
    fn backoff_doubles_monotonically(retry in 0u32..16) {
        let config = RetryConfig::default();
        let current = config.backoff_ms(retry);
        let next = config.backoff_ms(retry + 1);
        prop_assert_eq!(next, current * 2);
        prop_assert!(current >= config.base_backoff_ms);
    }
}
