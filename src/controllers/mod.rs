pub mod allowances;
pub mod checkin;
pub mod events;
pub mod live;
pub mod reservations;

use axum::{
    extract::{FromRequest, FromRequestParts},
    Router,
};
use std::sync::Arc;

use crate::error::AppError;

/// `Json`, который отклоняет тело через [`AppError`]: 400 и `{success:false,message}`
/// вместо 422 с текстом от axum.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

/// То же для параметров пути: `/reservations/not-a-uuid` даёт 400 в общем формате.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct AppPath<T>(pub T);

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(reservations::routes())
        .merge(checkin::routes())
        .merge(allowances::routes())
        .merge(events::routes())
        .merge(live::routes())
}
