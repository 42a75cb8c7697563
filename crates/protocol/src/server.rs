//! Server → Observer messages

use serde::{Deserialize, Serialize};

use crate::types::EnrichmentResult;

/// Messages broadcast to every connected observer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A background agent finished a unit of work and its output was enriched.
    TaskCompleted {
        group: String,
        member: String,
        summary: String,
        audio: String,
        timestamp: f64,
    },
}

impl From<EnrichmentResult> for ServerMessage {
    fn from(result: EnrichmentResult) -> Self {
        ServerMessage::TaskCompleted {
            group: result.source.group,
            member: result.source.member,
            summary: result.summary,
            audio: result.audio,
            timestamp: result.timestamp,
        }
    }
}
