//! Content dedup backed by the shared key-value store.

use std::sync::Arc;
use std::time::Duration;

use donebell_protocol::SourceId;
use tracing::{debug, warn};

use crate::kv_store::KeyValueStore;

const KEY_PREFIX: &str = "donebell:dedup";
const SENTINEL: &str = "1";

pub struct DeduplicationGate {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl DeduplicationGate {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// True when this exact content was already dispatched for `source`
    /// within the TTL. A miss records the fingerprint.
    ///
    /// An existing record is never refreshed, so identical content re-qualifies
    /// once the original TTL runs out. Store errors fail open.
    pub async fn is_duplicate(&self, source: &SourceId, fingerprint: &str) -> bool {
        let key = dedup_key(source, fingerprint);

        match self.store.get(&key).await {
            Ok(Some(_)) => {
                debug!(
                    component = "dedup",
                    event = "dedup.hit",
                    source = %source,
                    fingerprint,
                    "Duplicate content suppressed"
                );
                return true;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    component = "dedup",
                    event = "dedup.lookup_failed",
                    source = %source,
                    error = %e,
                    "Dedup lookup failed, treating content as new"
                );
                return false;
            }
        }

        if let Err(e) = self.store.set_ex(&key, self.ttl, SENTINEL).await {
            warn!(
                component = "dedup",
                event = "dedup.record_failed",
                source = %source,
                error = %e,
                "Failed to record content fingerprint"
            );
        }
        false
    }
}

/// Keys are namespaced by source. Each id is length-prefixed so ids that
/// contain `:` (tmux-style `session:window`) cannot collide.
fn dedup_key(source: &SourceId, fingerprint: &str) -> String {
    format!(
        "{KEY_PREFIX}:{}:{}:{}:{}:{fingerprint}",
        source.group.len(),
        source.group,
        source.member.len(),
        source.member
    )
}
