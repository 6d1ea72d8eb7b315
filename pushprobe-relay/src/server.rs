//! Axum router setup.

use crate::auth::{auth_middleware, Authenticator};
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::handlers::{devices, messages, test_runs, users};
use crate::rate_limit::RateLimiter;
use axum::extract::State;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use pushprobe_core::{DeviceRegistry, Dispatcher, Storage, TestRuns};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Shared handler state. Every field is a cheap handle.
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub registry: DeviceRegistry,
    pub test_runs: TestRuns,
    pub dispatcher: Arc<Dispatcher>,
    pub limiter: RateLimiter,
    pub auth: Arc<Authenticator>,
}

pub fn build_router(state: AppState, config: &RelayConfig) -> Router {
    // Routes that require a bearer token
    let authenticated = Router::new()
        .route("/users", get(users::list_users))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Routes used by devices and the delivery harness
    let public = Router::new()
        .route("/devices/register", post(devices::register_device))
        .route("/messages/send", post(messages::send_message))
        .route("/test/ack", post(test_runs::acknowledge))
        .route("/test/status", get(test_runs::status))
        .route("/health", get(health));

    Router::new()
        .merge(authenticated)
        .merge(public)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.max_payload_size))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<&'static str, RelayError> {
    state.storage.ping()?;
    Ok("ok")
}
