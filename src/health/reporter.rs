//! Health snapshot rendering.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;

use crate::resilience::{CircuitBreaker, CircuitState};
use crate::routing::{ModelFamily, RouteTarget, Router};

/// Features that always force the primary provider.
const FEATURE_FALLBACKS: [&str; 3] = ["web_search", "vision", "forced_tool_choice"];

/// Overall proxy status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Breaker section of the health document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub threshold: u32,
    pub open_duration_secs: u64,
    /// Whole seconds until a trial is admitted; only present while open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_secs: Option<u64>,
}

/// Document served at `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub secondary_model: Option<String>,
    pub routing: BTreeMap<ModelFamily, RouteTarget>,
    pub circuit_breaker: BreakerSnapshot,
    pub fallbacks: Vec<&'static str>,
}

/// Renders health snapshots from shared breaker state and the static routing table.
#[derive(Debug, Clone)]
pub struct HealthReporter {
    breaker: Arc<CircuitBreaker>,
    routing: BTreeMap<ModelFamily, RouteTarget>,
    secondary_model: Option<String>,
}

impl HealthReporter {
    pub fn new(router: &Router) -> Self {
        Self {
            breaker: Arc::clone(router.breaker()),
            routing: router.routing_table(),
            secondary_model: router.secondary_model().map(str::to_string),
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let view = self.breaker.view();
        let open_duration = self.breaker.open_duration();
        let now = Instant::now();

        let state = view.effective_state(now, open_duration);
        let remaining_secs = view
            .remaining_open(now, open_duration)
            .map(|d| d.as_secs() + u64::from(d.subsec_nanos() > 0));

        HealthSnapshot {
            status: if state == CircuitState::Closed {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            secondary_model: self.secondary_model.clone(),
            routing: self.routing.clone(),
            circuit_breaker: BreakerSnapshot {
                state,
                failure_count: view.consecutive_failures,
                threshold: self.breaker.threshold(),
                open_duration_secs: open_duration.as_secs(),
                remaining_secs,
            },
            fallbacks: FEATURE_FALLBACKS.to_vec(),
        }
    }
}
