use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::controllers::{AppJson, AppPath};
use crate::error::AppResult;
use crate::middleware::AuthUser;
use crate::models::Reservation;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/reservations", post(create_reservations))
        .route("/reservations", get(list_reservations))
        .route("/reservations/{id}", delete(delete_reservation))
        .route("/reservations/{id}/token", get(check_in_token))
}

// POST /api/reservations
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservationsRequest {
    #[validate(range(min = 1))]
    pub event_id: i64,
    #[validate(length(min = 1, message = "Нужно указать хотя бы одно место"))]
    pub seat_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct ReservationsResponse {
    pub success: bool,
    pub reservations: Vec<Reservation>,
}

async fn create_reservations(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    AppJson(req): AppJson<CreateReservationsRequest>,
) -> AppResult<impl IntoResponse> {
    req.validate()?;

    let reservations = state
        .allocator
        .create_reservations(user.user_id, req.event_id, &req.seat_ids)
        .await?;
    state.invalidate_seat_map(req.event_id).await;

    Ok(Json(ReservationsResponse { success: true, reservations }))
}

// GET /api/reservations
async fn list_reservations(State(state): State<Arc<AppState>>, user: AuthUser) -> AppResult<impl IntoResponse> {
    let reservations = state.allocator.list_reservations(user.user_id).await?;
    Ok(Json(ReservationsResponse { success: true, reservations }))
}

// DELETE /api/reservations/{id}
async fn delete_reservation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<StatusCode> {
    let deleted = state.allocator.delete_reservation(id, user.user_id).await?;
    state.invalidate_seat_map(deleted.event_id).await;
    Ok(StatusCode::NO_CONTENT)
}

// GET /api/reservations/{id}/token
#[derive(Debug, Serialize)]
struct TokenResponse {
    success: bool,
    token: String,
}

async fn check_in_token(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    AppPath(id): AppPath<Uuid>,
) -> AppResult<impl IntoResponse> {
    let token = state.checkin.issue_token(id, user.user_id).await?;
    Ok(Json(TokenResponse { success: true, token }))
}
