//! Per-source minimum spacing between accepted completion signals.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use donebell_protocol::SourceId;
use tokio::time::Instant;

/// In-process debounce, independent of content. Stale entries are harmless and
/// never removed.
pub struct DebounceGate {
    window: Duration,
    last_accepted: Mutex<HashMap<SourceId, Instant>>,
}

impl DebounceGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: Mutex::new(HashMap::new()),
        }
    }

    /// True if the signal may proceed. Rejections leave the timestamp alone.
    pub fn accept(&self, source: &SourceId) -> bool {
        let now = Instant::now();
        let mut last = self.last_accepted.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(prev) = last.get(source) {
            if now.saturating_duration_since(*prev) < self.window {
                return false;
            }
        }
        last.insert(source.clone(), now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn rejects_within_window_and_accepts_after() {
        let gate = DebounceGate::new(Duration::from_secs(10));
        let source = SourceId::new("team1", "pane-0");

        assert!(gate.accept(&source));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!gate.accept(&source));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(gate.accept(&source));
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_does_not_extend_window() {
        let gate = DebounceGate::new(Duration::from_secs(10));
        let source = SourceId::new("team1", "pane-0");

        assert!(gate.accept(&source));
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(!gate.accept(&source));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(gate.accept(&source));
    }

    #[tokio::test(start_paused = true)]
    async fn sources_are_isolated() {
        let gate = DebounceGate::new(Duration::from_secs(10));

        assert!(gate.accept(&SourceId::new("team1", "pane-0")));
        assert!(gate.accept(&SourceId::new("team1", "pane-1")));
        assert!(gate.accept(&SourceId::new("team2", "pane-0")));
        assert!(!gate.accept(&SourceId::new("team1", "pane-0")));
    }
}
