use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use crate::controllers::{AppJson, AppPath};
use crate::error::AppResult;
use crate::middleware::{AuthUser, StaffUser};
use crate::models::Allowance;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/allowances", put(assign_allowance))
        .route("/allowances/{event_id}", get(remaining_allowance))
}

// PUT /api/allowances
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AssignAllowanceRequest {
    #[validate(range(min = 1))]
    pub user_id: i64,
    #[validate(range(min = 1))]
    pub event_id: i64,
    #[validate(range(min = 0, max = 10000, message = "Квота должна быть от 0 до 10000"))]
    pub remaining: i32,
}

#[derive(Debug, Serialize)]
struct AllowanceResponse {
    success: bool,
    allowance: Allowance,
}

async fn assign_allowance(
    State(state): State<Arc<AppState>>,
    StaffUser(staff): StaffUser,
    AppJson(req): AppJson<AssignAllowanceRequest>,
) -> AppResult<impl IntoResponse> {
    req.validate()?;

    let allowance = state
        .ledger
        .assign(req.user_id, req.event_id, req.remaining, staff.user_id)
        .await?;
    Ok(Json(AllowanceResponse { success: true, allowance }))
}

// GET /api/allowances/{event_id}
#[derive(Debug, Serialize)]
struct RemainingResponse {
    success: bool,
    remaining: i32,
}

async fn remaining_allowance(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    AppPath(event_id): AppPath<i64>,
) -> AppResult<impl IntoResponse> {
    let remaining = state.ledger.get_remaining(user.user_id, event_id).await?;
    Ok(Json(RemainingResponse { success: true, remaining }))
}
