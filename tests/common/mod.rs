//! Shared test fixtures: a scripted executor and hub/store helpers.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use drover::domain::errors::DomainResult;
use drover::domain::models::{Message, RetryConfig};
use drover::domain::ports::executor::{
    ExecutionContext, ExecutionOutput, ExecutionResult, Executor,
};
use drover::domain::ports::mail_bus::handler;
use drover::infrastructure::memstore::MessageHub;
use drover::services::AgentControllerConfig;

/// What one scripted execution should do.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Succeed { output: String, delay: Duration },
    Fail { error: String, delay: Duration },
    /// Runs until aborted.
    Hang,
}

impl ScriptedOutcome {
    pub fn ok() -> Self {
        Self::Succeed {
            output: "done".to_string(),
            delay: Duration::from_millis(50),
        }
    }

    pub fn ok_after(delay: Duration) -> Self {
        Self::Succeed {
            output: "done".to_string(),
            delay,
        }
    }

    pub fn fail(error: &str) -> Self {
        Self::Fail {
            error: error.to_string(),
            delay: Duration::from_millis(20),
        }
    }
}

/// [`Executor`] whose outcomes are queued up front. When the script runs
/// dry it keeps succeeding quickly.
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<ScriptedOutcome>>,
    executing: AtomicBool,
    abort: std::sync::Mutex<CancellationToken>,
    output_tx: broadcast::Sender<ExecutionOutput>,
    executed: Mutex<Vec<Uuid>>,
}

impl ScriptedExecutor {
    pub fn new(script: Vec<ScriptedOutcome>) -> Arc<Self> {
        let (output_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            executing: AtomicBool::new(false),
            abort: std::sync::Mutex::new(CancellationToken::new()),
            output_tx,
            executed: Mutex::new(Vec::new()),
        })
    }

    pub fn always_ok() -> Arc<Self> {
        Self::new(Vec::new())
    }

    /// Task ids this executor ran, in order.
    pub async fn executed_tasks(&self) -> Vec<Uuid> {
        self.executed.lock().await.clone()
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute(&self, context: ExecutionContext) -> DomainResult<ExecutionResult> {
        self.executing.store(true, Ordering::SeqCst);
        self.executed.lock().await.push(context.task.id);
        let token = {
            let mut slot = self.abort.lock().unwrap();
            *slot = CancellationToken::new();
            slot.clone()
        };
        let outcome = self
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(ScriptedOutcome::ok);

        let started = std::time::Instant::now();
        let result = match outcome {
            ScriptedOutcome::Succeed { output, delay } => {
                tokio::select! {
                    () = tokio::time::sleep(delay) => ExecutionResult {
                        success: true,
                        output,
                        error: None,
                        duration_ms: started.elapsed().as_millis() as u64,
                        timed_out: false,
                    },
                    () = token.cancelled() => aborted_result(started),
                }
            }
            ScriptedOutcome::Fail { error, delay } => {
                tokio::select! {
                    () = tokio::time::sleep(delay) => ExecutionResult {
                        success: false,
                        output: String::new(),
                        error: Some(error),
                        duration_ms: started.elapsed().as_millis() as u64,
                        timed_out: false,
                    },
                    () = token.cancelled() => aborted_result(started),
                }
            }
            ScriptedOutcome::Hang => {
                token.cancelled().await;
                aborted_result(started)
            }
        };
        self.executing.store(false, Ordering::SeqCst);
        Ok(result)
    }

    fn is_executing(&self) -> bool {
        self.executing.load(Ordering::SeqCst)
    }

    fn abort(&self) {
        self.abort.lock().unwrap().cancel();
    }

    fn subscribe_output(&self) -> broadcast::Receiver<ExecutionOutput> {
        self.output_tx.subscribe()
    }
}

fn aborted_result(started: std::time::Instant) -> ExecutionResult {
    ExecutionResult {
        success: false,
        output: String::new(),
        error: Some("execution aborted".to_string()),
        duration_ms: started.elapsed().as_millis() as u64,
        timed_out: false,
    }
}

/// Controller config with millisecond-scale tickers for tests.
pub fn fast_controller_config() -> AgentControllerConfig {
    AgentControllerConfig {
        heartbeat_interval: Duration::from_millis(50),
        status_interval: Duration::from_millis(50),
        work_poll_interval: Duration::from_millis(40),
        post_cycle_delay: Duration::from_millis(15),
        lease_ttl_ms: 120_000,
        retry: RetryConfig::default(),
        work_dir: PathBuf::from("."),
        acquirable_skills: Default::default(),
        throttle_delay: Duration::from_millis(10),
    }
}

/// Subscribe a collector to one topic; returns the growing message log.
pub async fn collect_topic(hub: &Arc<MessageHub>, topic: &str) -> Arc<Mutex<Vec<Message>>> {
    let seen: Arc<Mutex<Vec<Message>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let key = format!("collector-{topic}-{}", Uuid::new_v4());
    hub.subscribe(
        topic,
        &key,
        handler(move |msg| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().await.push(msg);
            }
        }),
    )
    .await;
    seen
}

/// Poll an async condition until it holds or the deadline passes.
pub async fn wait_until<F, Fut>(what: &str, timeout: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if check().await {
            return;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
