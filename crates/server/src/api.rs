//! HTTP endpoints used by the terminal driver and the enrichment pipeline.
//!
//! The driver posts completion signals and issued commands; the pipeline
//! posts finished results, which are published on the result channel for the
//! relay to pick up.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use donebell_protocol::{new_id, CommandIssued, CompletionSignal, SourceId};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::completion::CompletionOutcome;
use crate::pending::PendingCommand;
use crate::relay::StartOutcome;
use crate::state::AppState;

/// `POST /api/completion`
pub async fn completion_handler(
    State(state): State<Arc<AppState>>,
    Json(signal): Json<CompletionSignal>,
) -> Json<CompletionOutcome> {
    let source = signal.source();
    let trace_id = signal
        .trace_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(new_id);

    debug!(
        component = "api",
        event = "api.completion.received",
        source = %source,
        trace_id = %trace_id,
        output_bytes = signal.output.len(),
        "Completion signal received"
    );

    let outcome = state
        .pipeline
        .on_completion(&source, &signal.output, &trace_id)
        .await;
    if let CompletionOutcome::Skipped { reason } = &outcome {
        debug!(
            component = "api",
            event = "api.completion.skipped",
            source = %source,
            trace_id = %trace_id,
            reason = reason.as_str(),
            "Completion signal skipped"
        );
    }
    Json(outcome)
}

/// `POST /api/commands`
pub async fn record_command_handler(
    State(state): State<Arc<AppState>>,
    Json(cmd): Json<CommandIssued>,
) -> Json<Value> {
    let source = cmd.source();
    let normalized = cmd
        .normalized
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| collapse_whitespace(&cmd.raw));
    let speed = cmd.speed.unwrap_or(1.0);

    let correlation_id =
        state
            .pipeline
            .pending()
            .record(source.clone(), cmd.raw, normalized, speed, cmd.correlation_id);

    info!(
        component = "api",
        event = "api.command.recorded",
        source = %source,
        correlation_id = %correlation_id,
        "Pending command recorded"
    );
    Json(json!({ "correlation_id": correlation_id }))
}

/// `GET /api/commands/{group}/{member}`
pub async fn peek_command_handler(
    State(state): State<Arc<AppState>>,
    Path((group, member)): Path<(String, String)>,
) -> Result<Json<PendingCommand>, StatusCode> {
    state
        .pipeline
        .pending()
        .peek(&SourceId::new(group, member))
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// `POST /api/results` — raw JSON body, published verbatim.
pub async fn publish_result_handler(
    State(state): State<Arc<AppState>>,
    body: String,
) -> (StatusCode, Json<Value>) {
    let receivers = state.results.publish(&state.result_channel, body);
    (StatusCode::ACCEPTED, Json(json!({ "receivers": receivers })))
}

/// `POST /api/relay/start`
pub async fn relay_start_handler(State(state): State<Arc<AppState>>) -> Json<StartOutcome> {
    Json(state.supervisor.ensure_started().await)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DedupStoreKind, NotifierConfig};
    use crate::enrichment::UnconfiguredDispatcher;
    use crate::kv_store::MemoryStore;
    use std::time::Duration;

    fn app() -> Arc<AppState> {
        let config = NotifierConfig {
            bind: "127.0.0.1:0".parse().unwrap(),
            debounce_window: Duration::from_secs(10),
            dedup_ttl: Duration::from_secs(30),
            default_speed: 1.0,
            result_channel: "results".into(),
            enrichment_url: None,
            enrichment_timeout: Duration::from_secs(1),
            dedup_store: DedupStoreKind::Memory,
        };
        Arc::new(AppState::new(
            &config,
            Arc::new(MemoryStore::new()),
            Arc::new(UnconfiguredDispatcher),
        ))
    }

    #[tokio::test]
    async fn recorded_command_can_be_peeked() {
        let state = app();
        let Json(body) = record_command_handler(
            State(state.clone()),
            Json(CommandIssued {
                group: "team1".into(),
                member: "pane-0".into(),
                raw: "  run   the\ttests ".into(),
                normalized: None,
                speed: Some(5.0),
                correlation_id: None,
            }),
        )
        .await;

        let Json(pending) = peek_command_handler(
            State(state),
            Path(("team1".to_string(), "pane-0".to_string())),
        )
        .await
        .expect("pending command");

        assert_eq!(body["correlation_id"], pending.correlation_id.as_str());
        assert_eq!(pending.normalized, "run the tests");
        assert_eq!(pending.speed, 2.0);
    }

    #[tokio::test]
    async fn missing_command_is_not_found() {
        let result = peek_command_handler(
            State(app()),
            Path(("team1".to_string(), "nobody".to_string())),
        )
        .await;
        assert_eq!(result.err(), Some(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn completion_without_pipeline_reports_failure_then_debounces() {
        let state = app();
        let signal = CompletionSignal {
            group: "team1".into(),
            member: "pane-0".into(),
            output: "> fix bug\nDone.\n> ".into(),
            trace_id: None,
        };

        let Json(first) = completion_handler(State(state.clone()), Json(signal.clone())).await;
        let Json(second) = completion_handler(State(state), Json(signal)).await;

        assert_eq!(
            first,
            CompletionOutcome::Failed {
                error: "enrichment pipeline not configured".into()
            }
        );
        assert!(matches!(second, CompletionOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn results_reach_observers_through_the_relay() {
        use crate::broadcast_hub::tests::RecordingObserver;
        use crate::relay::RelayState;

        let state = app();
        let observer = RecordingObserver::new(1);
        state.hub.register(observer.clone()).await;

        let Json(started) = relay_start_handler(State(state.clone())).await;
        assert_eq!(started, StartOutcome::Started { generation: 1 });
        tokio::time::timeout(Duration::from_secs(2), async {
            while state.supervisor.state().await != Some(RelayState::Listening) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("relay listening");

        let body = r#"{"group":"team1","member":"pane-0","summary":"All tests pass","audio":"","timestamp":1.0}"#;
        let (code, Json(resp)) =
            publish_result_handler(State(state.clone()), body.to_string()).await;
        assert_eq!(code, StatusCode::ACCEPTED);
        assert_eq!(resp["receivers"], 1);

        tokio::time::timeout(Duration::from_secs(2), async {
            while observer.received().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("observer notified");
        state.supervisor.stop().await;
    }
}
