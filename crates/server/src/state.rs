//! Application state, constructed once in `main` and shared with handlers.

use std::sync::Arc;

use crate::broadcast_hub::BroadcastHub;
use crate::completion::CompletionPipeline;
use crate::config::NotifierConfig;
use crate::debounce::DebounceGate;
use crate::dedup::DeduplicationGate;
use crate::enrichment::EnrichmentDispatcher;
use crate::kv_store::KeyValueStore;
use crate::pending::PendingCommandRegistry;
use crate::pubsub::LocalResultBus;
use crate::relay::LivenessSupervisor;

pub struct AppState {
    pub pipeline: CompletionPipeline,
    pub hub: Arc<BroadcastHub>,
    pub supervisor: LivenessSupervisor,
    pub results: Arc<LocalResultBus>,
    pub result_channel: String,
}

impl AppState {
    pub fn new(
        config: &NotifierConfig,
        store: Arc<dyn KeyValueStore>,
        dispatcher: Arc<dyn EnrichmentDispatcher>,
    ) -> Self {
        let hub = Arc::new(BroadcastHub::new());
        let results = Arc::new(LocalResultBus::new());
        let pipeline = CompletionPipeline::new(
            DebounceGate::new(config.debounce_window),
            DeduplicationGate::new(store, config.dedup_ttl),
            Arc::new(PendingCommandRegistry::new()),
            dispatcher,
            config.default_speed,
        );
        let supervisor = LivenessSupervisor::new(
            results.clone(),
            config.result_channel.clone(),
            Arc::clone(&hub),
        );

        Self {
            pipeline,
            hub,
            supervisor,
            results,
            result_channel: config.result_channel.clone(),
        }
    }
}
