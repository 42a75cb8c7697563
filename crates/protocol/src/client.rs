//! Driver → Server hook payloads

use serde::{Deserialize, Serialize};

use crate::types::SourceId;

/// A "task finished" signal from the terminal driver, carrying the captured
/// pane output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionSignal {
    pub group: String,
    pub member: String,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl CompletionSignal {
    pub fn source(&self) -> SourceId {
        SourceId::new(self.group.clone(), self.member.clone())
    }
}

/// Sent by the terminal driver whenever it issues a command to a source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandIssued {
    pub group: String,
    pub member: String,
    pub raw: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized: Option<String>,
    /// Speech rate for the spoken summary, expected in [0.5, 2.0].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl CommandIssued {
    pub fn source(&self) -> SourceId {
        SourceId::new(self.group.clone(), self.member.clone())
    }
}
