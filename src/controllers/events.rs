use axum::{
    body::Body,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::controllers::AppPath;
use crate::error::{AppError, AppResult, Resource};
use crate::models::{Event, LiveStatus, Location};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/events/{id}/seats", get(seat_map))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatView {
    pub id: i64,
    pub label: String,
    pub row: i32,
    pub number: i32,
    pub reserved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_status: Option<LiveStatus>,
}

#[derive(Debug, Serialize)]
pub struct SeatMap {
    pub success: bool,
    pub event: Event,
    pub location: Location,
    pub seats: Vec<SeatView>,
}

/// Карта мест события: все места локации и отметка занятых.
pub async fn build_seat_map(state: &AppState, event_id: i64) -> AppResult<SeatMap> {
    let event = state
        .store
        .find_event(event_id)
        .await?
        .ok_or(AppError::NotFound(Resource::Event))?;
    let location = state
        .store
        .find_location(event.location_id)
        .await?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("location {} of event {} is missing", event.location_id, event_id)))?;

    let taken: HashMap<i64, LiveStatus> = state
        .store
        .reservations_by_event(event_id)
        .await?
        .into_iter()
        .map(|r| (r.seat_id, r.live_status))
        .collect();

    let seats = state
        .store
        .seats_at_location(location.id)
        .await?
        .into_iter()
        .map(|seat| {
            let live_status = taken.get(&seat.id).copied();
            SeatView {
                id: seat.id,
                label: seat.label,
                row: seat.row,
                number: seat.number,
                reserved: live_status.is_some(),
                live_status,
            }
        })
        .collect();

    Ok(SeatMap { success: true, event, location, seats })
}

fn json_with_cache_header(json: String, cache: &'static str) -> Response {
    (
        [(header::CONTENT_TYPE, "application/json"), (header::HeaderName::from_static("x-cache"), cache)],
        Body::from(json),
    )
        .into_response()
}

// GET /api/events/{id}/seats
pub async fn seat_map(State(state): State<Arc<AppState>>, AppPath(event_id): AppPath<i64>) -> AppResult<Response> {
    // 1. Пытаемся отдать из кеша
    if let Some(cache) = &state.cache {
        match cache.get_seat_map(event_id).await {
            Ok(Some(cached)) => return Ok(json_with_cache_header(cached, "HIT")),
            Ok(None) => {}
            Err(e) => tracing::warn!("Seat map cache read failed for event {}: {:?}", event_id, e),
        }
    }

    // 2. Cache Miss: запоминаем поколение и собираем из хранилища
    let built_at = state.cache.as_ref().map(|c| c.seat_map_version(event_id));
    let map = build_seat_map(&state, event_id).await?;

    // 3. Сохраняем в кеш, если он есть
    let (Some(cache), Some(built_at)) = (&state.cache, built_at) else {
        return Ok(Json(map).into_response());
    };
    match serde_json::to_string(&map) {
        Ok(json) => {
            if let Err(e) = cache.save_seat_map(event_id, &json, built_at).await {
                tracing::error!("Failed to cache seat map for event {}: {:?}", event_id, e);
            }
            Ok(json_with_cache_header(json, "MISS"))
        }
        Err(e) => Err(AppError::Internal(e.into())),
    }
}
