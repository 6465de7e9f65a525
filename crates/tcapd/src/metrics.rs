//! Prometheus /metrics + health check HTTP endpoints
//!
//! Endpoints:
//!   GET /metrics  : Prometheus text format
//!   GET /healthz  : Liveness probe (always 200 if process is running)
//!   GET /readyz   : Readiness probe (200 once the last sweep succeeded)

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus_client::{
    encoding::text::encode,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tcap_core::{CapsuleStatus, TimeCapsule};

type StatusLabels = Vec<(String, String)>;

#[derive(Clone)]
pub struct SweepMetrics {
    pub sweeps: Counter,
    pub sweep_failures: Counter,
    pub delivered: Counter,
    pub purged: Counter,
    pub capsules: Family<StatusLabels, Gauge>,
}

impl SweepMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let metrics = SweepMetrics {
            sweeps: Counter::default(),
            sweep_failures: Counter::default(),
            delivered: Counter::default(),
            purged: Counter::default(),
            capsules: Family::default(),
        };

        registry.register(
            "tcap_sweeps",
            "Delivery sweeps completed",
            metrics.sweeps.clone(),
        );
        registry.register(
            "tcap_sweep_failures",
            "Delivery sweeps that returned an error",
            metrics.sweep_failures.clone(),
        );
        registry.register(
            "tcap_capsules_delivered",
            "Capsules moved to delivered by a sweep",
            metrics.delivered.clone(),
        );
        registry.register(
            "tcap_capsules_purged",
            "Capsules erased by self-destruct",
            metrics.purged.clone(),
        );
        registry.register(
            "tcap_capsules",
            "Stored capsules by lifecycle status",
            metrics.capsules.clone(),
        );

        metrics
    }

    /// Refresh the per-status gauge from a full store snapshot.
    pub fn observe_store(&self, capsules: &[TimeCapsule]) {
        for status in [
            CapsuleStatus::Draft,
            CapsuleStatus::Scheduled,
            CapsuleStatus::Delivered,
            CapsuleStatus::Opened,
            CapsuleStatus::Deleted,
        ] {
            let count = capsules.iter().filter(|c| c.status == status).count();
            self.capsules
                .get_or_create(&status_labels(status))
                .set(count as i64);
        }
    }
}

fn status_labels(status: CapsuleStatus) -> StatusLabels {
    vec![("status".to_string(), status.to_string())]
}

/// Shared health state updated by the daemon
#[derive(Clone)]
pub struct HealthState {
    pub registry: Arc<Registry>,
    pub ready: Arc<AtomicBool>,
}

/// Serve Prometheus metrics and health endpoints on `addr` (e.g. "127.0.0.1:9101")
pub async fn serve(addr: String, state: HealthState) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("metrics bind {addr}: {e}"))?;

    tracing::info!(addr = %addr, "metrics: listening on /metrics, /healthz, /readyz");

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("metrics server: {e}"))
}

fn router(state: HealthState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

fn render(registry: &Registry) -> Result<String, std::fmt::Error> {
    let mut body = String::new();
    encode(&mut body, registry)?;
    Ok(body)
}

async fn metrics_handler(State(state): State<HealthState>) -> impl IntoResponse {
    match render(&state.registry) {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Liveness probe: returns 200 if the process is running.
async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe: 200 once a sweep has succeeded, 503 otherwise.
async fn readyz_handler(State(state): State<HealthState>) -> impl IntoResponse {
    if state.ready.load(Ordering::SeqCst) {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "no successful sweep yet")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render() {
        let mut registry = Registry::default();
        let metrics = SweepMetrics::new(&mut registry);
        metrics.sweeps.inc();
        metrics.delivered.inc_by(3);

        let mut draft = TimeCapsule::new_draft("a", "alice", "age1alice", "t", 0);
        let scheduled = {
            let mut c = draft.clone();
            c.id = "b".into();
            c.status = CapsuleStatus::Scheduled;
            c
        };
        draft.title = "still a draft".into();
        metrics.observe_store(&[draft, scheduled]);

        let body = render(&registry).unwrap();
        assert!(body.contains("tcap_sweeps_total 1"));
        assert!(body.contains("tcap_capsules_delivered_total 3"));
        assert!(body.contains(r#"tcap_capsules{status="scheduled"} 1"#));
        assert!(body.contains(r#"tcap_capsules{status="opened"} 0"#));
    }

    #[tokio::test]
    async fn test_readyz_follows_flag() {
        let state = HealthState {
            registry: Arc::new(Registry::default()),
            ready: Arc::new(AtomicBool::new(false)),
        };
        let response = readyz_handler(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.ready.store(true, Ordering::SeqCst);
        let response = readyz_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
