//! Axum router wiring for the ops endpoints.

use axum::{routing::get, Router};

use crate::{app_state::RelayApp, ops};

pub fn build_router(app: RelayApp) -> Router {
    Router::new()
        .route("/healthz", get(ops::healthz))
        .route("/readyz", get(ops::readyz))
        .route("/status", get(ops::status))
        .route("/metrics", get(ops::metrics))
        .with_state(app)
}
