//! error.rs
//!
//! Закрытый набор ошибок прикладного уровня. Каждая операция сама выбирает вид
//! ошибки, а граница HTTP переводит вид в статус по статической таблице
//! [`AppError::status`].

use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Что именно не нашлось.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Event,
    Seat,
    Reservation,
    Allowance,
    User,
}

impl Resource {
    fn message(self) -> &'static str {
        match self {
            Resource::Event => "Событие не найдено",
            Resource::Seat => "Место не найдено",
            Resource::Reservation => "Бронь не найдена",
            Resource::Allowance => "Квота для события не найдена",
            Resource::User => "Пользователь не найден",
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{}", .0.message())]
    NotFound(Resource),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("Одно или несколько мест уже забронированы")]
    SeatAlreadyReserved,
    #[error("Квота на бронирование исчерпана")]
    QuotaExceeded,
    #[error("{0}")]
    InvalidInput(String),
    #[error("Требуется авторизация")]
    Unauthorized,
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::SeatAlreadyReserved => StatusCode::CONFLICT,
            AppError::QuotaExceeded => StatusCode::NOT_ACCEPTABLE,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        AppError::InvalidInput(message.into())
    }
}

// Ожидаемые варианты StoreError каждая операция разбирает сама до `?`,
// сюда доходят только настоящие сбои хранилища.
impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Internal(anyhow::Error::new(err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::InvalidInput(err.to_string())
    }
}

// Кривой JSON или id не того типа (например "abc" вместо числа) — это ошибка клиента
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidInput(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::InvalidInput(rejection.body_text())
    }
}

#[derive(Serialize)]
pub struct ApiError {
    success: bool,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Internal(e) => {
                tracing::error!("request failed: {:?}", e);
                "Внутренняя ошибка сервера".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ApiError { success: false, message })).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_a_stable_status() {
        let table = [
            (AppError::NotFound(Resource::Seat), 404),
            (AppError::Forbidden("нет"), 403),
            (AppError::SeatAlreadyReserved, 409),
            (AppError::QuotaExceeded, 406),
            (AppError::invalid("bad"), 400),
            (AppError::Unauthorized, 401),
            (AppError::Internal(anyhow::anyhow!("boom")), 500),
        ];

        for (err, code) in table {
            assert_eq!(err.status().as_u16(), code, "{:?}", err);
        }
    }

    #[tokio::test]
    async fn malformed_json_is_invalid_input() {
        use axum::{body::Body, extract::FromRequest, http::Request, Json};

        let request = Request::builder()
            .header("content-type", "application/json")
            .body(Body::from(r#"{"ids": ["abc"]}"#))
            .unwrap();
        let rejection = Json::<std::collections::HashMap<String, Vec<i64>>>::from_request(request, &())
            .await
            .unwrap_err();

        let err = AppError::from(rejection);
        assert!(matches!(err, AppError::InvalidInput(_)));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn store_failures_are_internal() {
        let err: AppError = StoreError::Decode("bad row".into()).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
