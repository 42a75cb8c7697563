//! donebell protocol
//!
//! Shared types for the completion notifier: the hook payloads sent by the
//! terminal driver, the results published by the enrichment pipeline and the
//! messages fanned out to observers over WebSocket. Everything is JSON.

use uuid::Uuid;

// Re-exports
pub mod client;
pub mod server;
pub mod types;

pub use client::{CommandIssued, CompletionSignal};
pub use server::ServerMessage;
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
