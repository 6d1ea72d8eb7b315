//! Device registration handler.

use crate::error::RelayError;
use crate::server::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use pushprobe_core::RegisterOutcome;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct RegisterDeviceRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub fcm_token: String,
    #[serde(default)]
    pub platform: String,
}

#[derive(Serialize)]
pub struct RegisterDeviceResponse {
    pub ok: bool,
    pub outcome: RegisterOutcome,
}

pub async fn register_device(
    State(state): State<AppState>,
    payload: Result<Json<RegisterDeviceRequest>, JsonRejection>,
) -> Result<Json<RegisterDeviceResponse>, RelayError> {
    let Json(req) = payload?;

    let outcome = state
        .registry
        .register(&req.user_id, &req.device_id, &req.platform, &req.fcm_token)?;

    Ok(Json(RegisterDeviceResponse { ok: true, outcome }))
}
