//! Three-level health report for operators.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::relay::RelayState;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub observers: usize,
    /// `None` until the relay has been started.
    pub relay: Option<RelayState>,
    pub relay_generation: Option<u64>,
    pub result_subscribers: usize,
}

pub fn classify(relay: Option<RelayState>) -> HealthStatus {
    match relay {
        Some(RelayState::Listening) => HealthStatus::Healthy,
        Some(RelayState::Terminated | RelayState::Cancelled) => HealthStatus::Unhealthy,
        Some(RelayState::Idle | RelayState::Subscribing) | None => HealthStatus::Degraded,
    }
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthReport>) {
    let relay = state.supervisor.state().await;
    let report = HealthReport {
        status: classify(relay),
        observers: state.hub.count().await,
        relay,
        relay_generation: state.supervisor.generation().await,
        result_subscribers: state.results.subscriber_count(&state.result_channel),
    };
    let code = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (code, Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_relay_states() {
        assert_eq!(classify(Some(RelayState::Listening)), HealthStatus::Healthy);
        assert_eq!(classify(Some(RelayState::Subscribing)), HealthStatus::Degraded);
        assert_eq!(classify(None), HealthStatus::Degraded);
        assert_eq!(classify(Some(RelayState::Terminated)), HealthStatus::Unhealthy);
        assert_eq!(classify(Some(RelayState::Cancelled)), HealthStatus::Unhealthy);
    }
}
