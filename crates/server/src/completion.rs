//! The "completion signal accepted" pipeline.
//!
//! debounce → normalize → fingerprint → dedup → consume pending command →
//! submit for enrichment. Each step can short-circuit.

use std::sync::Arc;

use donebell_protocol::{new_id, SourceId};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::debounce::DebounceGate;
use crate::dedup::DeduplicationGate;
use crate::enrichment::{EnrichmentDispatcher, EnrichmentRequest, TaskHandle};
use crate::fingerprint::fingerprint;
use crate::normalize::normalize_output;
use crate::pending::PendingCommandRegistry;

/// Used when a completion arrives with no recorded command.
pub const DEFAULT_COMMAND: &str = "the previous task";
const MAX_ERROR_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Debounced,
    DuplicateContent,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::Debounced => "debounced",
            SkipReason::DuplicateContent => "duplicate_content",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CompletionOutcome {
    Dispatched {
        correlation_id: String,
        task: TaskHandle,
    },
    Skipped {
        reason: SkipReason,
    },
    Failed {
        error: String,
    },
}

pub struct CompletionPipeline {
    debounce: DebounceGate,
    dedup: DeduplicationGate,
    pending: Arc<PendingCommandRegistry>,
    dispatcher: Arc<dyn EnrichmentDispatcher>,
    default_speed: f32,
}

impl CompletionPipeline {
    pub fn new(
        debounce: DebounceGate,
        dedup: DeduplicationGate,
        pending: Arc<PendingCommandRegistry>,
        dispatcher: Arc<dyn EnrichmentDispatcher>,
        default_speed: f32,
    ) -> Self {
        Self {
            debounce,
            dedup,
            pending,
            dispatcher,
            default_speed,
        }
    }

    pub fn pending(&self) -> &Arc<PendingCommandRegistry> {
        &self.pending
    }

    /// Handle one "task finished" signal.
    ///
    /// The pending command is consumed before submission, so a failed submit
    /// loses the correlation rather than reusing it for a later completion.
    pub async fn on_completion(
        &self,
        source: &SourceId,
        raw_output: &str,
        trace_id: &str,
    ) -> CompletionOutcome {
        if !self.debounce.accept(source) {
            debug!(
                component = "completion",
                event = "completion.debounced",
                source = %source,
                trace_id,
                "Completion signal debounced"
            );
            return CompletionOutcome::Skipped {
                reason: SkipReason::Debounced,
            };
        }

        let normalized = normalize_output(raw_output);
        let content_hash = fingerprint(&normalized);
        if self.dedup.is_duplicate(source, &content_hash).await {
            return CompletionOutcome::Skipped {
                reason: SkipReason::DuplicateContent,
            };
        }

        let pending = self.pending.consume(source);
        let (command, speed, correlation_id) = match pending {
            Some(cmd) => {
                let command = if cmd.normalized.trim().is_empty() {
                    cmd.raw
                } else {
                    cmd.normalized
                };
                (command, cmd.speed, cmd.correlation_id)
            }
            None => (DEFAULT_COMMAND.to_string(), self.default_speed, new_id()),
        };

        let request = EnrichmentRequest {
            source: source.clone(),
            raw_output: raw_output.to_string(),
            command,
            trace_id: trace_id.to_string(),
            speed,
            correlation_id: correlation_id.clone(),
        };

        match self.dispatcher.submit(request).await {
            Ok(task) => {
                info!(
                    component = "completion",
                    event = "completion.dispatched",
                    source = %source,
                    trace_id,
                    correlation_id = %correlation_id,
                    task_id = %task.task_id,
                    fingerprint = %content_hash,
                    "Completion dispatched for enrichment"
                );
                CompletionOutcome::Dispatched {
                    correlation_id,
                    task,
                }
            }
            Err(e) => {
                let error = truncate_error(&e.to_string());
                warn!(
                    component = "completion",
                    event = "completion.dispatch_failed",
                    source = %source,
                    trace_id,
                    correlation_id = %correlation_id,
                    error = %error,
                    "Enrichment submission failed"
                );
                CompletionOutcome::Failed { error }
            }
        }
    }
}

fn truncate_error(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_CHARS {
        return message.to_string();
    }
    let mut out: String = message.chars().take(MAX_ERROR_CHARS).collect();
    out.push('…');
    out
}
