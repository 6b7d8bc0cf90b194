//! Process executor.
//!
//! Spawns one external worker per task, feeds it a prompt on stdin,
//! streams stdout/stderr lines, and races the child against a dynamic
//! timeout and the abort token. Termination is staged: interrupt, then
//! terminate, then kill, with each stage timer cancelled on early exit.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
#[cfg(test)]
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ExecutorConfig, Task};
use crate::domain::ports::executor::{
    ExecutionContext, ExecutionOutput, ExecutionResult, Executor, OutputStream,
};

/// [`Executor`] backed by a child process.
pub struct ProcessExecutor {
    config: ExecutorConfig,
    executing: Arc<AtomicBool>,
    abort: StdMutex<CancellationToken>,
    output_tx: broadcast::Sender<ExecutionOutput>,
}

impl ProcessExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        let (output_tx, _) = broadcast::channel(256);
        Self {
            config,
            executing: Arc::new(AtomicBool::new(false)),
            abort: StdMutex::new(CancellationToken::new()),
            output_tx,
        }
    }

    /// Timeout for one task.
    ///
    /// With an estimate: `estimate * 60s * multiplier`, clamped to the
    /// configured bounds. Without one: the fallback scaled up by
    /// description length and skill count, capped at the maximum.
    pub fn compute_timeout_ms(config: &ExecutorConfig, task: &Task) -> u64 {
        match task.estimated_minutes {
            Some(minutes) if minutes > 0 => {
                let raw = (f64::from(minutes) * 60_000.0 * config.timeout_multiplier) as u64;
                raw.clamp(config.min_timeout_ms, config.max_timeout_ms)
            }
            _ => {
                let scaled = config.fallback_timeout_ms
                    + task.description.len() as u64 * 100
                    + task.required_skills.len() as u64 * 60_000;
                scaled.min(config.max_timeout_ms)
            }
        }
    }

    fn build_prompt(context: &ExecutionContext) -> String {
        let mut prompt = format!(
            "# Task: {}\n\n{}\n\n## Agent\nname: {}\nskills: {}\n",
            context.task.title,
            context.task.description,
            context.agent_name,
            context.agent_skills.join(", "),
        );
        if !context.memories.is_empty() {
            prompt.push_str("\n## Relevant context\n");
            for memory in &context.memories {
                prompt.push_str("- ");
                prompt.push_str(&memory.content);
                prompt.push('\n');
            }
        }
        prompt
    }

    fn spawn_reader<R>(
        &self,
        stream: R,
        kind: OutputStream,
        context: &ExecutionContext,
    ) -> tokio::task::JoinHandle<String>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let tx = self.output_tx.clone();
        let agent_id = context.agent_id;
        let agent_name = context.agent_name.clone();
        let task_id = context.task.id;
        tokio::spawn(async move {
            let mut collected = String::new();
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push_str(&line);
                collected.push('\n');
                let _ = tx.send(ExecutionOutput {
                    agent_id,
                    agent_name: agent_name.clone(),
                    task_id,
                    chunk: line,
                    stream: kind,
                    timestamp: Utc::now(),
                });
            }
            collected
        })
    }

    /// Interrupt, wait; terminate, wait; kill. Stage timers die with an
    /// early child exit.
    async fn terminate_staged(&self, child: &mut Child) -> Option<std::process::ExitStatus> {
        let Some(raw_pid) = child.id() else {
            return child.try_wait().ok().flatten();
        };
        let pid = Pid::from_raw(raw_pid as i32);

        debug!(pid = raw_pid, "sending interrupt to worker");
        let _ = kill(pid, Signal::SIGINT);
        if let Ok(status) = timeout(
            Duration::from_millis(self.config.interrupt_grace_ms),
            child.wait(),
        )
        .await
        {
            return status.ok();
        }

        debug!(pid = raw_pid, "worker ignored interrupt, sending terminate");
        let _ = kill(pid, Signal::SIGTERM);
        if let Ok(status) = timeout(
            Duration::from_millis(self.config.graceful_shutdown_ms),
            child.wait(),
        )
        .await
        {
            return status.ok();
        }

        warn!(pid = raw_pid, "worker ignored terminate, killing");
        let _ = kill(pid, Signal::SIGKILL);
        child.wait().await.ok()
    }
}

enum WaitOutcome {
    Exited(std::process::ExitStatus),
    TimedOut,
    Aborted,
}

/// Clears the in-flight flag when an execution ends, however it ends.
struct ExecutingGuard(Arc<AtomicBool>);

impl Drop for ExecutingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn execute(&self, context: ExecutionContext) -> DomainResult<ExecutionResult> {
        if self.executing.swap(true, Ordering::SeqCst) {
            return Err(DomainError::ExecutionFailed(
                "an execution is already in flight".to_string(),
            ));
        }
        let _guard = ExecutingGuard(Arc::clone(&self.executing));

        let abort_token = {
            let mut slot = self
                .abort
                .lock()
                .map_err(|_| DomainError::ExecutionFailed("abort lock poisoned".to_string()))?;
            *slot = CancellationToken::new();
            slot.clone()
        };

        let timeout_ms = Self::compute_timeout_ms(&self.config, &context.task);
        let prompt = Self::build_prompt(&context);
        let started = Instant::now();

        let mut child = Command::new(&self.config.binary)
            .args(&self.config.args)
            .current_dir(&context.work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DomainError::ExecutionFailed(format!("spawn {}: {e}", self.config.binary))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                warn!(error = %e, "failed to write prompt to worker stdin");
            }
            // Dropping stdin closes the pipe so the worker sees EOF.
        }

        let stdout_handle = child.stdout.take().map(|s| {
            self.spawn_reader(s, OutputStream::Stdout, &context)
        });
        let stderr_handle = child.stderr.take().map(|s| {
            self.spawn_reader(s, OutputStream::Stderr, &context)
        });

        debug!(
            task_id = %context.task.id,
            timeout_ms,
            "worker spawned"
        );

        let outcome = tokio::select! {
            status = child.wait() => WaitOutcome::Exited(status.map_err(|e| {
                DomainError::ExecutionFailed(format!("wait on worker: {e}"))
            })?),
            () = tokio::time::sleep(Duration::from_millis(timeout_ms)) => WaitOutcome::TimedOut,
            () = abort_token.cancelled() => WaitOutcome::Aborted,
        };

        let (status, timed_out, aborted) = match outcome {
            WaitOutcome::Exited(status) => (Some(status), false, false),
            WaitOutcome::TimedOut => (self.terminate_staged(&mut child).await, true, false),
            WaitOutcome::Aborted => (self.terminate_staged(&mut child).await, false, true),
        };

        let stdout = match stdout_handle {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        let stderr = match stderr_handle {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let success = !timed_out && !aborted && status.map(|s| s.success()).unwrap_or(false);
        let error = if timed_out {
            Some(format!("process timed out after {timeout_ms} ms"))
        } else if aborted {
            Some("execution aborted".to_string())
        } else if !success {
            let tail: String = stderr.lines().rev().take(5).collect::<Vec<_>>().join(" | ");
            Some(match status {
                Some(status) => format!("process exited with {status}: {tail}"),
                None => format!("process died without status: {tail}"),
            })
        } else {
            None
        };

        Ok(ExecutionResult {
            success,
            output: stdout,
            error,
            duration_ms,
            timed_out,
        })
    }

    fn is_executing(&self) -> bool {
        self.executing.load(Ordering::SeqCst)
    }

    fn abort(&self) {
        if let Ok(slot) = self.abort.lock() {
            slot.cancel();
        }
    }

    fn subscribe_output(&self) -> broadcast::Receiver<ExecutionOutput> {
        self.output_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::MemoryEntry;
    use crate::domain::models::MemoryKind;
    use std::path::PathBuf;

    fn shell_executor(script: &str, config: ExecutorConfig) -> ProcessExecutor {
        ProcessExecutor::new(ExecutorConfig {
            binary: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            ..config
        })
    }

    fn context(task: Task) -> ExecutionContext {
        ExecutionContext {
            task,
            memories: vec![MemoryEntry::new(MemoryKind::AgentLearning, "remember this")],
            work_dir: PathBuf::from("."),
            agent_id: Uuid::new_v4(),
            agent_name: "tester".to_string(),
            agent_skills: vec!["shell".to_string()],
        }
    }

    #[test]
    fn test_timeout_from_estimate_is_clamped() {
        let config = ExecutorConfig::default();
        // 1 minute * 2.0 = 120s, below the 5 minute floor
        let task = Task::new("t", "d").with_estimate(1);
        assert_eq!(
            ProcessExecutor::compute_timeout_ms(&config, &task),
            config.min_timeout_ms
        );
        // 90 minutes * 2.0 = 180 minutes, above the 2 hour ceiling
        let task = Task::new("t", "d").with_estimate(90);
        assert_eq!(
            ProcessExecutor::compute_timeout_ms(&config, &task),
            config.max_timeout_ms
        );
        // 10 minutes * 2.0 = 20 minutes, inside the bounds
        let task = Task::new("t", "d").with_estimate(10);
        assert_eq!(
            ProcessExecutor::compute_timeout_ms(&config, &task),
            20 * 60 * 1000
        );
    }

    #[test]
    fn test_timeout_heuristic_without_estimate() {
        let config = ExecutorConfig::default();
        let short = Task::new("t", "d");
        let base = ProcessExecutor::compute_timeout_ms(&config, &short);
        assert!(base >= config.fallback_timeout_ms);

        let long = Task::new("t", "d".repeat(500)).with_skill("rust").with_skill("sql");
        assert!(ProcessExecutor::compute_timeout_ms(&config, &long) > base);

        let huge = Task::new("t", "d".repeat(200_000));
        assert_eq!(
            ProcessExecutor::compute_timeout_ms(&config, &huge),
            config.max_timeout_ms
        );
    }

    #[tokio::test]
    async fn test_successful_execution_streams_output() {
        let executor = shell_executor("cat > /dev/null; echo one; echo two", ExecutorConfig::default());
        let mut output_rx = executor.subscribe_output();
        let task = Task::new("echo", "print two lines");
        let result = executor.execute(context(task)).await.unwrap();

        assert!(result.success);
        assert!(!result.timed_out);
        assert!(result.error.is_none());
        assert!(result.output.contains("one"));
        assert!(result.output.contains("two"));

        let first = output_rx.recv().await.unwrap();
        assert_eq!(first.chunk, "one");
        assert_eq!(first.stream, OutputStream::Stdout);
        assert!(!executor.is_executing());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let executor = shell_executor("echo oops >&2; exit 3", ExecutorConfig::default());
        let result = executor
            .execute(context(Task::new("fail", "exits nonzero")))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(!result.timed_out);
        let error = result.error.unwrap();
        assert!(error.contains("oops"), "stderr tail missing: {error}");
    }

    #[tokio::test]
    async fn test_timeout_reports_timed_out() {
        let config = ExecutorConfig {
            min_timeout_ms: 1,
            fallback_timeout_ms: 200,
            interrupt_grace_ms: 100,
            graceful_shutdown_ms: 100,
            ..ExecutorConfig::default()
        };
        let executor = shell_executor("sleep 30", config);
        let result = executor
            .execute(context(Task::new("slow", "")))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.timed_out);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_abort_terminates_child() {
        let config = ExecutorConfig {
            interrupt_grace_ms: 200,
            graceful_shutdown_ms: 200,
            ..ExecutorConfig::default()
        };
        let executor = Arc::new(shell_executor("sleep 30", config));
        let exec = Arc::clone(&executor);
        let handle =
            tokio::spawn(async move { exec.execute(context(Task::new("slow", ""))).await });

        // Give the child a moment to spawn, then abort.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(executor.is_executing());
        executor.abort();

        let result = handle.await.unwrap().unwrap();
        assert!(!result.success);
        assert!(!result.timed_out);
        assert!(result.error.unwrap().contains("aborted"));
        assert!(!executor.is_executing());
    }

    #[tokio::test]
    async fn test_second_execution_rejected_while_running() {
        let executor = Arc::new(shell_executor("sleep 5", ExecutorConfig::default()));
        let exec = Arc::clone(&executor);
        let handle =
            tokio::spawn(async move { exec.execute(context(Task::new("slow", ""))).await });
        tokio::time::sleep(Duration::from_millis(200)).await;

        let err = executor
            .execute(context(Task::new("other", "")))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::ExecutionFailed(_)));

        executor.abort();
        let _ = handle.await.unwrap();
    }

    #[test]
    fn test_prompt_includes_memories_and_skills() {
        let task = Task::new("title here", "body here");
        let ctx = context(task);
        let prompt = ProcessExecutor::build_prompt(&ctx);
        assert!(prompt.contains("title here"));
        assert!(prompt.contains("body here"));
        assert!(prompt.contains("shell"));
        assert!(prompt.contains("remember this"));
    }
}
