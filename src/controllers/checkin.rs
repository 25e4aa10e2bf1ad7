use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::controllers::reservations::ReservationsResponse;
use crate::controllers::AppJson;
use crate::error::AppResult;
use crate::middleware::StaffUser;
use crate::services::checkin::CheckInCommand;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/checkin/process", post(process_check_in))
        .route("/checkin/info", post(reservation_infos))
}

// POST /api/checkin/process
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProcessCheckInRequest {
    #[validate(range(min = 1))]
    pub event_id: i64,
    #[validate(range(min = 1))]
    pub user_id: i64,
    #[serde(default)]
    pub check_in: Vec<Uuid>,
    #[serde(default)]
    pub cancel: Vec<Uuid>,
}

async fn process_check_in(
    State(state): State<Arc<AppState>>,
    StaffUser(staff): StaffUser,
    AppJson(req): AppJson<ProcessCheckInRequest>,
) -> AppResult<StatusCode> {
    req.validate()?;

    let command = CheckInCommand {
        event_id: req.event_id,
        user_id: req.user_id,
        check_in: req.check_in,
        cancel: req.cancel,
    };
    let changed = state.checkin.process_check_in(command, staff.user_id).await?;
    if !changed.is_empty() {
        state.invalidate_seat_map(req.event_id).await;
    }
    Ok(StatusCode::NO_CONTENT)
}

// POST /api/checkin/info
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationInfoRequest {
    pub user_id: i64,
    pub event_id: i64,
    #[serde(default)]
    pub tokens: Vec<String>,
}

async fn reservation_infos(
    State(state): State<Arc<AppState>>,
    StaffUser(staff): StaffUser,
    AppJson(req): AppJson<ReservationInfoRequest>,
) -> AppResult<impl IntoResponse> {
    let reservations = state
        .checkin
        .get_reservation_infos(staff.user_id, req.user_id, req.event_id, &req.tokens)
        .await?;
    Ok(Json(ReservationsResponse { success: true, reservations }))
}
