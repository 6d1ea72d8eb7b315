//! Push dispatch handler.

use crate::error::RelayError;
use crate::server::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use pushprobe_core::DispatchRequest;
use serde::Serialize;

#[derive(Serialize)]
pub struct SendFailure {
    pub device_id: String,
    pub error: String,
}

#[derive(Serialize)]
pub struct SendResponse {
    pub ok: bool,
    /// Devices that accepted the message.
    pub sent_count: usize,
    pub attempted: usize,
    pub failures: Vec<SendFailure>,
}

pub async fn send_message(
    State(state): State<AppState>,
    payload: Result<Json<DispatchRequest>, JsonRejection>,
) -> Result<Json<SendResponse>, RelayError> {
    let Json(req) = payload?;

    if !req.user_id.is_empty() && !state.limiter.check(&req.user_id) {
        tracing::warn!(user_id = %req.user_id, "send rate limit exceeded");
        return Err(RelayError::RateLimited);
    }

    let report = state.dispatcher.dispatch(&req).await?;

    let failures = report
        .failures()
        .map(|outcome| SendFailure {
            device_id: outcome.device_id.clone(),
            error: outcome.error.clone().unwrap_or_default(),
        })
        .collect();

    Ok(Json(SendResponse {
        ok: true,
        sent_count: report.succeeded,
        attempted: report.attempted,
        failures,
    }))
}
