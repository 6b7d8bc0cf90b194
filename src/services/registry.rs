//! Agent registry writer: a JSON snapshot of the pool, rewritten
//! atomically (temp file + rename) on a short ticker and at shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::AgentProfile;
use crate::services::supervisor::AgentDirectory;

/// One agent's row in `agents.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryAgent {
    pub id: String,
    pub name: String,
    pub status: String,
    pub skills: Vec<String>,
    pub current_task: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub tasks_completed: u64,
    pub started_at: DateTime<Utc>,
}

impl From<&AgentProfile> for RegistryAgent {
    fn from(profile: &AgentProfile) -> Self {
        Self {
            id: profile.id.to_string(),
            name: profile.name.clone(),
            status: profile.status.as_str().to_string(),
            skills: profile.skills.iter().cloned().collect(),
            current_task: profile.current_task.map(|t| t.to_string()),
            last_heartbeat: profile.last_active,
            tasks_completed: profile.stats.tasks_completed,
            started_at: profile.stats.start_time,
        }
    }
}

/// The whole registry file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryFile {
    pub agents: Vec<RegistryAgent>,
    pub updated_at: DateTime<Utc>,
}

/// Periodic snapshot writer.
pub struct RegistryWriter {
    path: PathBuf,
    agents: Arc<dyn AgentDirectory>,
    interval: Duration,
    cancel: CancellationToken,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl RegistryWriter {
    pub fn new(
        path: impl Into<PathBuf>,
        agents: Arc<dyn AgentDirectory>,
        interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            agents,
            interval,
            cancel: CancellationToken::new(),
            ticker: Mutex::new(None),
        })
    }

    pub async fn start(self: &Arc<Self>) -> DomainResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| DomainError::Storage(format!("create registry dir: {e}")))?;
            }
        }
        self.write_snapshot().await?;

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = this.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = this.write_snapshot().await {
                            warn!(error = %e, "registry snapshot failed");
                        }
                    }
                }
            }
        });
        *self.ticker.lock().await = Some(handle);
        Ok(())
    }

    pub async fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.ticker.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// Write the current pool state.
    pub async fn write_snapshot(&self) -> DomainResult<()> {
        let profiles = self.agents.agent_snapshots().await;
        let rows: Vec<RegistryAgent> = profiles.iter().map(RegistryAgent::from).collect();
        self.write_file(rows).await
    }

    /// Final write at shutdown: an empty pool.
    pub async fn write_empty(&self) -> DomainResult<()> {
        self.write_file(Vec::new()).await
    }

    async fn write_file(&self, agents: Vec<RegistryAgent>) -> DomainResult<()> {
        let file = RegistryFile {
            agents,
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| DomainError::Storage(format!("write registry: {e}")))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| DomainError::Storage(format!("rename registry: {e}")))?;
        debug!(path = %self.path.display(), "registry snapshot written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::supervisor::FixedAgentDirectory;

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.json");
        let mut profile = AgentProfile::new("worker-1", vec!["rust".to_string()]);
        profile.stats.tasks_completed = 4;
        let directory = FixedAgentDirectory::new(vec![profile]);

        let writer = RegistryWriter::new(&path, directory, Duration::from_secs(5));
        writer.write_snapshot().await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let file: RegistryFile = serde_json::from_str(&raw).unwrap();
        assert_eq!(file.agents.len(), 1);
        assert_eq!(file.agents[0].name, "worker-1");
        assert_eq!(file.agents[0].status, "idle");
        assert_eq!(file.agents[0].tasks_completed, 4);
        assert!(file.agents[0].current_task.is_none());
    }

    #[tokio::test]
    async fn test_final_write_empties_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.json");
        let directory =
            FixedAgentDirectory::new(vec![AgentProfile::new("worker-1", vec![])]);

        let writer = RegistryWriter::new(&path, directory, Duration::from_secs(5));
        writer.write_snapshot().await.unwrap();
        writer.write_empty().await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let file: RegistryFile = serde_json::from_str(&raw).unwrap();
        assert!(file.agents.is_empty());
    }

    #[tokio::test]
    async fn test_ticker_refreshes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agents.json");
        let directory = FixedAgentDirectory::new(vec![]);

        let writer = RegistryWriter::new(&path, Arc::clone(&directory) as Arc<dyn AgentDirectory>, Duration::from_millis(30));
        writer.start().await.unwrap();

        directory.set(vec![AgentProfile::new("late-joiner", vec![])]).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        writer.stop().await;

        let raw = std::fs::read_to_string(&path).unwrap();
        let file: RegistryFile = serde_json::from_str(&raw).unwrap();
        assert_eq!(file.agents.len(), 1);
        assert_eq!(file.agents[0].name, "late-joiner");
    }
}
