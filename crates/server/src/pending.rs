//! Most recent command issued to each source, consumed by the next accepted
//! completion so the notification knows what triggered it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use donebell_protocol::{new_id, SourceId};
use serde::Serialize;

pub const MIN_SPEED: f32 = 0.5;
pub const MAX_SPEED: f32 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingCommand {
    pub correlation_id: String,
    pub source: SourceId,
    pub raw: String,
    pub normalized: String,
    pub created_at_ms: u64,
    pub speed: f32,
}

#[derive(Default)]
pub struct PendingCommandRegistry {
    commands: Mutex<HashMap<SourceId, PendingCommand>>,
}

impl PendingCommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the command for `source`, replacing any earlier one. Returns the
    /// correlation id, generated when not supplied.
    pub fn record(
        &self,
        source: SourceId,
        raw: String,
        normalized: String,
        speed: f32,
        correlation_id: Option<String>,
    ) -> String {
        let correlation_id = correlation_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(new_id);
        let command = PendingCommand {
            correlation_id: correlation_id.clone(),
            source: source.clone(),
            raw,
            normalized,
            created_at_ms: now_ms(),
            speed: clamp_speed(speed),
        };

        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(source, command);
        correlation_id
    }

    pub fn peek(&self, source: &SourceId) -> Option<PendingCommand> {
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(source)
            .cloned()
    }

    /// Read and remove in one step.
    pub fn consume(&self, source: &SourceId) -> Option<PendingCommand> {
        self.commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(source)
    }
}

/// Clamp to the supported speech-rate range; NaN falls back to 1.0.
pub fn clamp_speed(speed: f32) -> f32 {
    if speed.is_nan() {
        1.0
    } else {
        speed.clamp(MIN_SPEED, MAX_SPEED)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
