//! Health endpoint: grounded on `paradigm-api/src/routes/health.rs`'s
//! `/health` + `/health/detailed` pair.

use autoscaler_core::engine::EngineStatus;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct HealthState {
    pub statuses: Arc<RwLock<HashMap<String, EngineStatus>>>,
    pub suppress_abort_on_fatal: bool,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/engines", get(engines_detail))
        .with_state(state)
}

async fn health_check(State(state): State<HealthState>) -> (StatusCode, Json<Value>) {
    let statuses = state.statuses.read().await;
    let any_failed = statuses.values().any(|s| matches!(s, EngineStatus::Failed(_)));
    let healthy = state.suppress_abort_on_fatal || !any_failed;
    let code = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        code,
        Json(json!({
            "status": if healthy { "ok" } else { "degraded" },
            "timestamp": Utc::now(),
            "version": env!("CARGO_PKG_VERSION"),
            "service": "autoscaler",
        })),
    )
}

async fn engines_detail(State(state): State<HealthState>) -> Json<Value> {
    let statuses = state.statuses.read().await;
    let engines: serde_json::Map<String, Value> = statuses
        .iter()
        .map(|(stream, status)| {
            let value = match status {
                EngineStatus::Running => json!({ "status": "running" }),
                EngineStatus::Failed(msg) => json!({ "status": "failed", "message": msg }),
            };
            (stream.clone(), value)
        })
        .collect();
    Json(json!({
        "timestamp": Utc::now(),
        "service": "autoscaler",
        "engines": engines,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_ok_when_no_engines_failed() {
        let state = HealthState {
            statuses: Arc::new(RwLock::new(HashMap::new())),
            suppress_abort_on_fatal: false,
        };
        let app = router(state);
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_degraded_when_an_engine_failed() {
        let mut map = HashMap::new();
        map.insert("orders".to_string(), EngineStatus::Failed("boom".into()));
        let state = HealthState {
            statuses: Arc::new(RwLock::new(map)),
            suppress_abort_on_fatal: false,
        };
        let app = router(state);
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
