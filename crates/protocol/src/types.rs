//! Core types shared across the protocol

use std::fmt;

use serde::{Deserialize, Serialize};

/// One logical producer of completion events: a member (pane, role) within a
/// group (team, session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId {
    pub group: String,
    pub member: String,
}

impl SourceId {
    pub fn new(group: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            member: member.into(),
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.member)
    }
}

/// Finished enrichment for one completion, as published by the enrichment
/// pipeline on the result channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    #[serde(flatten)]
    pub source: SourceId,
    pub summary: String,
    /// Base64-encoded speech audio, empty when synthesis was skipped.
    #[serde(default)]
    pub audio: String,
    /// Unix timestamp in seconds.
    pub timestamp: f64,
}
