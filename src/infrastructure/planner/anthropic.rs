//! Anthropic Messages API planner and progress analyzer.
//!
//! Calls are rate-limited and retried with exponential backoff; the model
//! is asked for bare JSON and the reply is parsed defensively (fenced
//! blocks and prose around the JSON are tolerated).

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{MilestoneAssessment, PlannedTask, PlannerConfig};
use crate::domain::ports::planner::{AnalysisRequest, PlanRequest, ProgressAnalyzer, TaskPlanner};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<ApiMessage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

/// Anthropic-backed [`TaskPlanner`] and [`ProgressAnalyzer`].
pub struct AnthropicPlanner {
    config: PlannerConfig,
    api_key: String,
    client: Client,
    limiter: DirectLimiter,
}

impl AnthropicPlanner {
    /// Build a planner. The API key comes from the argument or the
    /// `ANTHROPIC_API_KEY` environment variable.
    pub fn new(config: PlannerConfig, api_key: Option<String>) -> DomainResult<Self> {
        let api_key = api_key
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
            .ok_or_else(|| DomainError::Planner("ANTHROPIC_API_KEY is not set".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DomainError::Planner(format!("http client: {e}")))?;

        let rpm = NonZeroU32::new(config.requests_per_minute.max(1))
            .unwrap_or(NonZeroU32::MIN);
        let limiter = RateLimiter::direct(Quota::per_minute(rpm));

        Ok(Self {
            config,
            api_key,
            client,
            limiter,
        })
    }

    async fn complete(&self, system: &str, user: &str) -> DomainResult<String> {
        self.limiter.until_ready().await;

        let request = MessagesRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            system: system.to_string(),
            messages: vec![ApiMessage {
                role: "user",
                content: user.to_string(),
            }],
        };

        let url = format!("{}/v1/messages", self.config.base_url);
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_elapsed_time(Some(Duration::from_secs(
                self.config.timeout_secs * u64::from(self.config.max_retries.max(1)),
            )))
            .build();

        let response = retry(policy, || async {
            let result = self
                .client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", &self.config.api_version)
                .header("content-type", "application/json")
                .json(&request)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    resp.json::<MessagesResponse>().await.map_err(|e| {
                        backoff::Error::permanent(DomainError::Planner(format!(
                            "decode response: {e}"
                        )))
                    })
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    let err = DomainError::Planner(format!("api returned {status}: {body}"));
                    if status.is_server_error() || status.as_u16() == 429 {
                        warn!(%status, "planner request failed, will retry");
                        Err(backoff::Error::transient(err))
                    } else {
                        Err(backoff::Error::permanent(err))
                    }
                }
                Err(e) => {
                    warn!(error = %e, "planner request failed, will retry");
                    Err(backoff::Error::transient(DomainError::Planner(e.to_string())))
                }
            }
        })
        .await?;

        let text: String = response
            .content
            .iter()
            .filter(|b| b.block_type == "text")
            .map(|b| b.text.as_str())
            .collect();
        debug!(chars = text.len(), "planner completion received");
        Ok(text)
    }
}

#[async_trait]
impl TaskPlanner for AnthropicPlanner {
    async fn plan_tasks(&self, request: &PlanRequest) -> DomainResult<Vec<PlannedTask>> {
        let system = "You plan work batches for a pool of autonomous software agents. \
                      Respond with a JSON array only, no prose. Each element: \
                      {\"title\", \"description\", \"skills\" (string array), \
                      \"estimated_minutes\" (integer), \"depends_on\" (array of \
                      zero-based indices into this batch)}.";

        let user = format!(
            "Objective: {}\nCurrent milestone: {}\nCompletion criteria:\n{}\n\n\
             Already completed in this milestone:\n{}\n\nRelevant context:\n{}\n\n\
             Propose at most {} new tasks that move the milestone toward its criteria.",
            request.objective_title,
            request.milestone_title,
            bullet_list(&request.completion_criteria),
            bullet_list(&request.completed_summaries),
            bullet_list(&request.memory_context),
            request.max_tasks,
        );

        let text = self.complete(system, &user).await?;
        let json = extract_json(&text)
            .ok_or_else(|| DomainError::Planner("no JSON found in planner reply".to_string()))?;
        let mut tasks: Vec<PlannedTask> = serde_json::from_str(json)
            .map_err(|e| DomainError::Planner(format!("bad planner JSON: {e}")))?;
        tasks.truncate(request.max_tasks);
        Ok(tasks)
    }
}

#[async_trait]
impl ProgressAnalyzer for AnthropicPlanner {
    async fn assess(&self, request: &AnalysisRequest) -> DomainResult<MilestoneAssessment> {
        let system = "You judge whether a milestone's completion criteria are satisfied \
                      by the work described. Respond with JSON only: {\"satisfied\": bool, \
                      \"judgements\": [{\"criterion\", \"satisfied\", \"reason\"}]}.";

        let user = format!(
            "Milestone: {}\nCompletion criteria:\n{}\n\nTask outcomes:\n{}",
            request.milestone_title,
            bullet_list(&request.completion_criteria),
            bullet_list(&request.task_summaries),
        );

        let text = self.complete(system, &user).await?;
        let json = extract_json(&text)
            .ok_or_else(|| DomainError::Planner("no JSON found in analyzer reply".to_string()))?;
        serde_json::from_str(json)
            .map_err(|e| DomainError::Planner(format!("bad analyzer JSON: {e}")))
    }
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        "- (none)".to_string()
    } else {
        items
            .iter()
            .map(|i| format!("- {i}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Find the outermost JSON value in a model reply, tolerating fenced code
/// blocks and surrounding prose.
fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim());
        }
    }
    let start = trimmed.find(['[', '{'])?;
    let open = trimmed.as_bytes()[start];
    let close = if open == b'[' { b']' } else { b'}' };
    let end = trimmed.rfind(close as char)?;
    if end > start {
        Some(&trimmed[start..=end])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bare_json() {
        let text = r#"[{"title": "a", "description": "b"}]"#;
        assert_eq!(extract_json(text), Some(text));
    }

    #[test]
    fn test_extract_fenced_json() {
        let text = "Here you go:\n```json\n[{\"title\": \"a\", \"description\": \"b\"}]\n```\nDone.";
        let json = extract_json(text).unwrap();
        assert!(json.starts_with('['));
        assert!(serde_json::from_str::<Vec<PlannedTask>>(json).is_ok());
    }

    #[test]
    fn test_extract_json_with_prose() {
        let text = "Sure! The plan: {\"satisfied\": true, \"judgements\": []} hope that helps";
        let json = extract_json(text).unwrap();
        let parsed: MilestoneAssessment = serde_json::from_str(json).unwrap();
        assert!(parsed.satisfied);
    }

    #[test]
    fn test_extract_json_missing() {
        assert!(extract_json("no structured data here").is_none());
    }

    #[test]
    fn test_planned_task_defaults() {
        let json = r#"[{"title": "t", "description": "d"}]"#;
        let tasks: Vec<PlannedTask> = serde_json::from_str(json).unwrap();
        assert!(tasks[0].skills.is_empty());
        assert!(tasks[0].depends_on.is_empty());
        assert!(tasks[0].estimated_minutes.is_none());
    }
}
