//! Operational HTTP endpoints.
//!
//! - `/healthz` : liveness
//! - `/readyz`  : readiness (503 while the engine is idle)
//! - `/status`  : engine state as JSON
//! - `/metrics` : Prometheus text format

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::app_state::RelayApp;

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn readyz(State(app): State<RelayApp>) -> impl IntoResponse {
    if app.engine().is_active() {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "idle")
    }
}

pub async fn status(State(app): State<RelayApp>) -> impl IntoResponse {
    let engine = app.engine();
    let state = engine.state();
    Json(json!({
        "active": state.is_active(),
        "mode": state.mode.map(|m| m.as_str()),
        "transport": engine.transport_kind(),
        "origin_id": engine.origin_id(),
        "queued": engine.queued(),
    }))
}

pub async fn metrics(State(app): State<RelayApp>) -> Response {
    let extra = app.metrics_extra();
    let body = app.metrics().render(&extra);

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}
