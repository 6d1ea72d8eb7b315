use crate::auth::Principal;
use crate::error::RelayError;
use crate::server::AppState;
use axum::extract::State;
use axum::Extension;
use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct ListUsersResponse {
    pub ok: bool,
    pub users: Vec<String>,
    pub count: usize,
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<ListUsersResponse>, RelayError> {
    let users = state.registry.list_users()?;
    tracing::debug!(subject = %principal.subject, count = users.len(), "listed users");
    Ok(Json(ListUsersResponse {
        ok: true,
        count: users.len(),
        users,
    }))
}
