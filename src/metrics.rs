use anyhow::Result;
use axum::{extract::State, routing::get, Json, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::scheduler::{RunStatus, StatusReceiver};

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

#[derive(Clone)]
struct HttpState {
    handle: PrometheusHandle,
    status: StatusReceiver,
}

impl Metrics {
    /// Install the Prometheus recorder for the `metrics` facade.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;
        Ok(Self { handle })
    }

    /// `/metrics` in Prometheus exposition format, `/healthz` with the last pass.
    pub fn router(&self, status: StatusReceiver) -> Router {
        router(self.handle.clone(), status)
    }
}

pub fn router(handle: PrometheusHandle, status: StatusReceiver) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .route("/healthz", get(health))
        .with_state(HttpState { handle, status })
}

async fn render_metrics(State(state): State<HttpState>) -> String {
    state.handle.render()
}

async fn health(State(state): State<HttpState>) -> Json<Option<RunStatus>> {
    Json(state.status.borrow().clone())
}
