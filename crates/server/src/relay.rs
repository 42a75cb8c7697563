//! Relay of enrichment results to observers, and its liveness supervisor.
//!
//! `RelaySubscriber` is a single long-lived loop:
//! idle → subscribing → listening → (terminated | cancelled).
//! It never restarts itself. `LivenessSupervisor::ensure_started` replaces a
//! loop that has terminated the next time a start is requested.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use donebell_protocol::{EnrichmentResult, ServerMessage};
use serde::Serialize;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broadcast_hub::BroadcastHub;
use crate::pubsub::ResultChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    Idle,
    Subscribing,
    Listening,
    Terminated,
    Cancelled,
}

impl RelayState {
    pub fn is_finished(self) -> bool {
        matches!(self, RelayState::Terminated | RelayState::Cancelled)
    }
}

pub struct RelaySubscriber {
    channel: Arc<dyn ResultChannel>,
    channel_name: String,
    hub: Arc<BroadcastHub>,
    state: watch::Sender<RelayState>,
}

impl RelaySubscriber {
    pub fn new(
        channel: Arc<dyn ResultChannel>,
        channel_name: String,
        hub: Arc<BroadcastHub>,
    ) -> (Self, watch::Receiver<RelayState>) {
        let (state, state_rx) = watch::channel(RelayState::Idle);
        (
            Self {
                channel,
                channel_name,
                hub,
                state,
            },
            state_rx,
        )
    }

    /// Run until cancelled or until the subscription fails. The subscription
    /// is closed on every exit path.
    pub async fn run(self, mut cancel: oneshot::Receiver<()>) -> RelayState {
        self.state.send_replace(RelayState::Subscribing);

        let subscribed = tokio::select! {
            biased;
            _ = &mut cancel => return self.finish(RelayState::Cancelled),
            subscribed = self.channel.subscribe(&self.channel_name) => subscribed,
        };
        let mut subscription = match subscribed {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(
                    component = "relay",
                    event = "relay.subscribe_failed",
                    channel = %self.channel_name,
                    error = %e,
                    "Result relay could not subscribe"
                );
                return self.finish(RelayState::Terminated);
            }
        };

        self.state.send_replace(RelayState::Listening);
        info!(
            component = "relay",
            event = "relay.listening",
            channel = %self.channel_name,
            "Result relay listening"
        );

        let exit = loop {
            tokio::select! {
                biased;
                _ = &mut cancel => break RelayState::Cancelled,
                received = subscription.next_message() => match received {
                    Ok(payload) => self.relay(&payload).await,
                    Err(e) => {
                        error!(
                            component = "relay",
                            event = "relay.receive_failed",
                            channel = %self.channel_name,
                            error = %e,
                            "Result relay stopped"
                        );
                        break RelayState::Terminated;
                    }
                },
            }
        };

        subscription.close().await;
        self.finish(exit)
    }

    async fn relay(&self, payload: &str) {
        let result: EnrichmentResult = match serde_json::from_str(payload) {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    component = "relay",
                    event = "relay.malformed_result",
                    error = %e,
                    payload_bytes = payload.len(),
                    "Skipping malformed enrichment result"
                );
                return;
            }
        };

        let result = sanitize_audio(result);
        debug!(
            component = "relay",
            event = "relay.result_received",
            source = %result.source,
            audio_bytes = result.audio.len(),
            "Relaying enrichment result"
        );
        self.hub.broadcast(&ServerMessage::from(result)).await;
    }

    fn finish(&self, exit: RelayState) -> RelayState {
        self.state.send_replace(exit);
        info!(
            component = "relay",
            event = "relay.exited",
            state = ?exit,
            "Result relay exited"
        );
        exit
    }
}

/// Observers must always be able to decode the audio they get.
fn sanitize_audio(mut result: EnrichmentResult) -> EnrichmentResult {
    if !result.audio.is_empty() && BASE64.decode(result.audio.as_bytes()).is_err() {
        warn!(
            component = "relay",
            event = "relay.invalid_audio",
            source = %result.source,
            "Dropping audio that is not valid base64"
        );
        result.audio.clear();
    }
    result
}

struct TrackedRelay {
    generation: u64,
    state: watch::Receiver<RelayState>,
    cancel: Option<oneshot::Sender<()>>,
    handle: JoinHandle<RelayState>,
}

impl TrackedRelay {
    fn current_state(&self) -> RelayState {
        let state = *self.state.borrow();
        // A panic leaves the last published state behind.
        if !state.is_finished() && self.handle.is_finished() {
            RelayState::Terminated
        } else {
            state
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StartOutcome {
    Started { generation: u64 },
    AlreadyRunning { generation: u64 },
    Restarted { generation: u64, previous: u64 },
}

impl StartOutcome {
    pub fn generation(&self) -> u64 {
        match *self {
            StartOutcome::Started { generation }
            | StartOutcome::AlreadyRunning { generation }
            | StartOutcome::Restarted { generation, .. } => generation,
        }
    }
}

/// Owns at most one relay task and replaces it on demand once it has ended.
pub struct LivenessSupervisor {
    channel: Arc<dyn ResultChannel>,
    channel_name: String,
    hub: Arc<BroadcastHub>,
    tracked: Mutex<Option<TrackedRelay>>,
    next_generation: AtomicU64,
}

impl LivenessSupervisor {
    pub fn new(channel: Arc<dyn ResultChannel>, channel_name: String, hub: Arc<BroadcastHub>) -> Self {
        Self {
            channel,
            channel_name,
            hub,
            tracked: Mutex::new(None),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Idempotent start; restarts the relay if the tracked one has ended.
    pub async fn ensure_started(&self) -> StartOutcome {
        let mut tracked = self.tracked.lock().await;

        let previous = match tracked.as_ref() {
            Some(relay) => {
                let state = relay.current_state();
                if !state.is_finished() {
                    return StartOutcome::AlreadyRunning {
                        generation: relay.generation,
                    };
                }
                warn!(
                    component = "relay",
                    event = "relay.restarting",
                    previous_generation = relay.generation,
                    previous_state = ?state,
                    "Result relay had stopped, starting a new one"
                );
                Some(relay.generation)
            }
            None => None,
        };

        let relay = self.spawn_relay();
        let generation = relay.generation;
        *tracked = Some(relay);

        match previous {
            Some(previous) => StartOutcome::Restarted {
                generation,
                previous,
            },
            None => StartOutcome::Started { generation },
        }
    }

    /// Cancel and await the tracked relay. No-op when nothing is tracked.
    pub async fn stop(&self) -> Option<RelayState> {
        let mut tracked = self.tracked.lock().await;
        let mut relay = tracked.take()?;

        if let Some(cancel) = relay.cancel.take() {
            let _ = cancel.send(());
        }
        let exit = match relay.handle.await {
            Ok(exit) => exit,
            Err(e) => {
                warn!(
                    component = "relay",
                    event = "relay.join_failed",
                    generation = relay.generation,
                    error = %e,
                    "Result relay task did not exit cleanly"
                );
                RelayState::Terminated
            }
        };

        info!(
            component = "relay",
            event = "relay.stopped",
            generation = relay.generation,
            state = ?exit,
            "Result relay stopped"
        );
        Some(exit)
    }

    /// State of the tracked relay, `None` when none has been started.
    pub async fn state(&self) -> Option<RelayState> {
        self.tracked
            .lock()
            .await
            .as_ref()
            .map(TrackedRelay::current_state)
    }

    pub async fn generation(&self) -> Option<u64> {
        self.tracked.lock().await.as_ref().map(|relay| relay.generation)
    }

    fn spawn_relay(&self) -> TrackedRelay {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (subscriber, state) = RelaySubscriber::new(
            Arc::clone(&self.channel),
            self.channel_name.clone(),
            Arc::clone(&self.hub),
        );
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let handle = tokio::spawn(subscriber.run(cancel_rx));

        info!(
            component = "relay",
            event = "relay.spawned",
            generation,
            channel = %self.channel_name,
            "Result relay task spawned"
        );

        TrackedRelay {
            generation,
            state,
            cancel: Some(cancel_tx),
            handle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::broadcast_hub::tests::RecordingObserver;
    use crate::error::RelayError;
    use crate::pubsub::{LocalResultBus, ResultSubscription};

    const CHANNEL: &str = "donebell:enrichment_results";

    /// Fails the first `failures` subscribe calls, then delegates to a bus.
    struct FlakyChannel {
        bus: Arc<LocalResultBus>,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl ResultChannel for FlakyChannel {
        async fn subscribe(
            &self,
            channel: &str,
        ) -> Result<Box<dyn ResultSubscription>, RelayError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(RelayError::Subscribe {
                    channel: channel.to_string(),
                    reason: "connection refused".into(),
                });
            }
            self.bus.subscribe(channel).await
        }
    }

    /// Subscription that fails on first receive and records whether it was
    /// closed.
    struct BrokenSubscription {
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ResultSubscription for BrokenSubscription {
        async fn next_message(&mut self) -> Result<String, RelayError> {
            Err(RelayError::Receive("connection reset".into()))
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct BrokenChannel {
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ResultChannel for BrokenChannel {
        async fn subscribe(
            &self,
            _channel: &str,
        ) -> Result<Box<dyn ResultSubscription>, RelayError> {
            Ok(Box::new(BrokenSubscription {
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    fn supervisor(channel: Arc<dyn ResultChannel>, hub: Arc<BroadcastHub>) -> LivenessSupervisor {
        LivenessSupervisor::new(channel, CHANNEL.to_string(), hub)
    }

    async fn wait_for_state(supervisor: &LivenessSupervisor, want: RelayState) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if supervisor.state().await == Some(want) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("relay did not reach expected state");
    }

    async fn wait_for_messages(observer: &RecordingObserver, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while observer.received().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("observer did not receive messages");
    }

    fn result_json(summary: &str) -> String {
        serde_json::json!({
            "group": "team1",
            "member": "pane-0",
            "summary": summary,
            "audio": "",
            "timestamp": 1700000000.0,
        })
        .to_string()
    }

    #[tokio::test]
    async fn ensure_started_is_idempotent_while_running() {
        let bus = Arc::new(LocalResultBus::new());
        let supervisor = supervisor(bus, Arc::new(BroadcastHub::new()));

        let first = supervisor.ensure_started().await;
        let second = supervisor.ensure_started().await;

        assert_eq!(first, StartOutcome::Started { generation: 1 });
        assert_eq!(second, StartOutcome::AlreadyRunning { generation: 1 });
        assert_eq!(supervisor.generation().await, Some(1));
        supervisor.stop().await;
    }

    #[tokio::test]
    async fn relays_results_and_skips_malformed_payloads() {
        let bus = Arc::new(LocalResultBus::new());
        let hub = Arc::new(BroadcastHub::new());
        let observer = RecordingObserver::new(1);
        hub.register(observer.clone()).await;

        let supervisor = supervisor(bus.clone(), hub);
        supervisor.ensure_started().await;
        wait_for_state(&supervisor, RelayState::Listening).await;

        bus.publish(CHANNEL, "{not json".into());
        bus.publish(CHANNEL, result_json("Fixed the flaky test"));
        wait_for_messages(&observer, 1).await;

        assert_eq!(
            observer.received(),
            vec![ServerMessage::TaskCompleted {
                group: "team1".into(),
                member: "pane-0".into(),
                summary: "Fixed the flaky test".into(),
                audio: String::new(),
                timestamp: 1700000000.0,
            }]
        );
        assert_eq!(supervisor.state().await, Some(RelayState::Listening));
        supervisor.stop().await;
    }

    #[tokio::test]
    async fn terminated_relay_is_replaced_on_next_start() {
        let bus = Arc::new(LocalResultBus::new());
        let channel = Arc::new(FlakyChannel {
            bus: bus.clone(),
            failures: AtomicUsize::new(1),
        });
        let hub = Arc::new(BroadcastHub::new());
        let observer = RecordingObserver::new(1);
        hub.register(observer.clone()).await;
        let supervisor = supervisor(channel, hub);

        assert_eq!(
            supervisor.ensure_started().await,
            StartOutcome::Started { generation: 1 }
        );
        wait_for_state(&supervisor, RelayState::Terminated).await;

        assert_eq!(
            supervisor.ensure_started().await,
            StartOutcome::Restarted {
                generation: 2,
                previous: 1
            }
        );
        wait_for_state(&supervisor, RelayState::Listening).await;

        bus.publish(CHANNEL, result_json("back online"));
        wait_for_messages(&observer, 1).await;
        supervisor.stop().await;
    }

    #[tokio::test]
    async fn receive_failure_terminates_and_closes_subscription() {
        let closed = Arc::new(AtomicBool::new(false));
        let channel = Arc::new(BrokenChannel {
            closed: closed.clone(),
        });
        let supervisor = supervisor(channel, Arc::new(BroadcastHub::new()));

        supervisor.ensure_started().await;
        wait_for_state(&supervisor, RelayState::Terminated).await;

        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(supervisor.stop().await, Some(RelayState::Terminated));
    }

    #[tokio::test]
    async fn stop_cancels_and_clears() {
        let bus = Arc::new(LocalResultBus::new());
        let supervisor = supervisor(bus.clone(), Arc::new(BroadcastHub::new()));

        supervisor.ensure_started().await;
        wait_for_state(&supervisor, RelayState::Listening).await;
        assert_eq!(bus.subscriber_count(CHANNEL), 1);

        assert_eq!(supervisor.stop().await, Some(RelayState::Cancelled));
        assert_eq!(supervisor.state().await, None);
        assert_eq!(bus.subscriber_count(CHANNEL), 0);
        assert_eq!(supervisor.stop().await, None);
    }

    #[test]
    fn invalid_audio_is_cleared() {
        let result = EnrichmentResult {
            source: donebell_protocol::SourceId::new("team1", "pane-0"),
            summary: "done".into(),
            audio: "not base64!!".into(),
            timestamp: 1.0,
        };
        assert!(sanitize_audio(result).audio.is_empty());

        let valid = EnrichmentResult {
            source: donebell_protocol::SourceId::new("team1", "pane-0"),
            summary: "done".into(),
            audio: BASE64.encode(b"RIFF"),
            timestamp: 1.0,
        };
        assert_eq!(sanitize_audio(valid).audio, BASE64.encode(b"RIFF"));
    }
}
