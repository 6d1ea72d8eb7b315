//! Test-run acknowledgment and status handlers.

use crate::error::RelayError;
use crate::server::AppState;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::Json;
use pushprobe_core::TestRun;
use serde::Deserialize;

#[derive(Deserialize)]
pub struct NonceParams {
    #[serde(default)]
    pub nonce: String,
}

pub async fn acknowledge(
    State(state): State<AppState>,
    payload: Result<Json<NonceParams>, JsonRejection>,
) -> Result<Json<serde_json::Value>, RelayError> {
    let Json(req) = payload?;
    state.test_runs.acknowledge(&req.nonce)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

pub async fn status(
    State(state): State<AppState>,
    query: Result<Query<NonceParams>, QueryRejection>,
) -> Result<Json<TestRun>, RelayError> {
    let Query(params) = query?;
    let run = state.test_runs.get_status(&params.nonce)?;
    Ok(Json(run))
}
