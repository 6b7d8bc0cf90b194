//! Memory store port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::MemoryEntry;

/// Repository interface for agent memories with semantic-ish lookup.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Persist a memory entry.
    async fn store(&self, entry: MemoryEntry) -> DomainResult<MemoryEntry>;

    /// Get an entry by id.
    async fn get(&self, id: Uuid) -> DomainResult<Option<MemoryEntry>>;

    /// Find the entries most relevant to a free-text query, best first.
    async fn search(&self, query: &str, limit: usize) -> DomainResult<Vec<MemoryEntry>>;

    /// All entries written by one agent, newest first.
    async fn list_by_agent(&self, agent_id: Uuid) -> DomainResult<Vec<MemoryEntry>>;
}
