//! In-memory memory store with token-overlap relevance ranking.

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::MemoryEntry;
use crate::domain::ports::memory_store::MemoryStore;

/// Vec-backed [`MemoryStore`].
///
/// Relevance is token overlap between the query and entry content/tags,
/// weighted by the entry's importance. Good enough for recall context;
/// a vector index would slot in behind the same port.
#[derive(Default)]
pub struct MemMemoryStore {
    entries: Mutex<Vec<MemoryEntry>>,
}

impl MemMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
            .map(ToString::to_string)
            .collect()
    }

    fn relevance(entry: &MemoryEntry, query_tokens: &[String]) -> f64 {
        if query_tokens.is_empty() {
            return 0.0;
        }
        let haystack = {
            let mut text = entry.content.to_lowercase();
            for tag in &entry.tags {
                text.push(' ');
                text.push_str(&tag.to_lowercase());
            }
            text
        };
        let hits = query_tokens
            .iter()
            .filter(|t| haystack.contains(t.as_str()))
            .count();
        if hits == 0 {
            return 0.0;
        }
        (hits as f64 / query_tokens.len() as f64) * (0.5 + entry.importance / 2.0)
    }
}

#[async_trait]
impl MemoryStore for MemMemoryStore {
    async fn store(&self, entry: MemoryEntry) -> DomainResult<MemoryEntry> {
        let mut entries = self.entries.lock().await;
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<MemoryEntry>> {
        let entries = self.entries.lock().await;
        Ok(entries.iter().find(|e| e.id == id).cloned())
    }

    async fn search(&self, query: &str, limit: usize) -> DomainResult<Vec<MemoryEntry>> {
        let query_tokens = Self::tokenize(query);
        let entries = self.entries.lock().await;
        let mut scored: Vec<(f64, &MemoryEntry)> = entries
            .iter()
            .map(|e| (Self::relevance(e, &query_tokens), e))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(limit).map(|(_, e)| e.clone()).collect())
    }

    async fn list_by_agent(&self, agent_id: Uuid) -> DomainResult<Vec<MemoryEntry>> {
        let entries = self.entries.lock().await;
        let mut out: Vec<MemoryEntry> = entries
            .iter()
            .filter(|e| e.agent_id == Some(agent_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::MemoryKind;

    #[tokio::test]
    async fn test_search_ranks_by_overlap_and_importance() {
        let store = MemMemoryStore::new();
        store
            .store(
                MemoryEntry::new(MemoryKind::AgentLearning, "migrating the auth service to tokio")
                    .with_importance(0.9),
            )
            .await
            .unwrap();
        store
            .store(
                MemoryEntry::new(MemoryKind::AgentLearning, "auth token refresh flakiness")
                    .with_importance(0.2),
            )
            .await
            .unwrap();
        store
            .store(MemoryEntry::new(MemoryKind::Observation, "database vacuum schedule"))
            .await
            .unwrap();

        let results = store.search("auth service migration", 5).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].content.contains("migrating"));
    }

    #[tokio::test]
    async fn test_search_respects_limit() {
        let store = MemMemoryStore::new();
        for i in 0..10 {
            store
                .store(MemoryEntry::new(
                    MemoryKind::Observation,
                    format!("widget number {i}"),
                ))
                .await
                .unwrap();
        }
        let results = store.search("widget", 3).await.unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_list_by_agent_newest_first() {
        let store = MemMemoryStore::new();
        let agent = Uuid::new_v4();
        store
            .store(MemoryEntry::new(MemoryKind::Observation, "first").with_agent(agent))
            .await
            .unwrap();
        store
            .store(MemoryEntry::new(MemoryKind::Observation, "second").with_agent(agent))
            .await
            .unwrap();
        store
            .store(MemoryEntry::new(MemoryKind::Observation, "other"))
            .await
            .unwrap();

        let entries = store.list_by_agent(agent).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content, "second");
    }
}
