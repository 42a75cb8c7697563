//! Hand-off to the external enrichment pipeline (summary + speech).
//!
//! Submission only enqueues work and returns a task handle; the finished
//! result arrives later on the result channel.

use std::time::Duration;

use async_trait::async_trait;
use donebell_protocol::SourceId;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::DispatchError;

/// What the enrichment pipeline needs to summarize one completion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentRequest {
    #[serde(flatten)]
    pub source: SourceId,
    pub raw_output: String,
    /// The command that triggered this work, or a generic description.
    pub command: String,
    pub trace_id: String,
    pub speed: f32,
    pub correlation_id: String,
}

/// Handle for a queued enrichment task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub task_id: String,
}

#[async_trait]
pub trait EnrichmentDispatcher: Send + Sync {
    async fn submit(&self, request: EnrichmentRequest) -> Result<TaskHandle, DispatchError>;
}

/// Posts requests to `<base_url>/tasks` and reads back `{"task_id": ...}`.
pub struct HttpEnrichmentDispatcher {
    client: reqwest::Client,
    tasks_url: String,
}

impl HttpEnrichmentDispatcher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            tasks_url: format!("{}/tasks", base_url.trim_end_matches('/')),
        })
    }

    pub fn tasks_url(&self) -> &str {
        &self.tasks_url
    }
}

#[async_trait]
impl EnrichmentDispatcher for HttpEnrichmentDispatcher {
    async fn submit(&self, request: EnrichmentRequest) -> Result<TaskHandle, DispatchError> {
        let resp = self
            .client
            .post(&self.tasks_url)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DispatchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let handle: TaskHandle = resp
            .json()
            .await
            .map_err(|e| DispatchError::BadResponse(e.to_string()))?;
        if handle.task_id.trim().is_empty() {
            return Err(DispatchError::BadResponse("empty task_id".into()));
        }

        info!(
            component = "enrichment",
            event = "enrichment.submitted",
            source = %request.source,
            trace_id = %request.trace_id,
            task_id = %handle.task_id,
            "Submitted completion for enrichment"
        );
        Ok(handle)
    }
}

/// Stand-in when no pipeline URL is configured: every submission fails.
pub struct UnconfiguredDispatcher;

#[async_trait]
impl EnrichmentDispatcher for UnconfiguredDispatcher {
    async fn submit(&self, _request: EnrichmentRequest) -> Result<TaskHandle, DispatchError> {
        Err(DispatchError::NotConfigured)
    }
}
