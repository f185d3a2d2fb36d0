//! Axum router for servex-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! CORS, tracing and security-header layers. The body limit and the `api`
//! rate limit are part of the router so scenario tests exercise them.
//! `/health` and the gateway webhook sit outside the `api` limit.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    middleware,
    routing::get,
    Json, Router,
};
use chrono::Utc;

use crate::{api_types::HealthResponse, rate_limit, state::AppState};

mod auth;
mod menu;
mod orders;
mod payments;
mod stream;
mod tables;

/// Build the complete application router wired to the given shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .merge(auth::router())
        .merge(tables::router())
        .merge(menu::router())
        .merge(orders::router())
        .merge(payments::router())
        .merge(stream::router())
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            rate_limit::api_limit,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(payments::webhook_router())
        .merge(api)
        .layer(DefaultBodyLimit::max(state.config.server.body_limit_bytes))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: st.build.service.to_string(),
        version: st.build.version.to_string(),
        store: st.store.backend().to_string(),
        timestamp: Utc::now(),
    })
}
