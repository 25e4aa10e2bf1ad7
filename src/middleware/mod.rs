use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use base64::{engine::general_purpose, Engine as _};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::models::Role;
use crate::services::broadcast::Observer;

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub email: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_staff(&self) -> bool {
        self.role == Role::Staff
    }
}

impl From<&AuthUser> for Observer {
    fn from(user: &AuthUser) -> Self {
        Observer { user_id: user.user_id, email: user.email.clone() }
    }
}

/// Пользователь с ролью сотрудника. Остальным 401, как и без авторизации.
#[derive(Debug, Clone)]
pub struct StaffUser(pub AuthUser);

// "Basic base64(email:password)" -> (email, password)
fn parse_basic(value: &str) -> Option<(String, String)> {
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (email, password) = credentials.split_once(':')?;
    Some((email.to_string(), password.to_string()))
}

// Basic Auth extractor
impl FromRequestParts<Arc<crate::AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<crate::AppState>) -> Result<Self, Self::Rejection> {
        let (email, password) = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_basic)
            .ok_or(AppError::Unauthorized)?;

        let user = state
            .store
            .find_user_by_email(&email)
            .await?
            .filter(|u| u.is_active)
            .ok_or(AppError::Unauthorized)?;

        // bcrypt дорогой, не держим на нём рабочий поток рантайма
        let verified = {
            let user = user.clone();
            tokio::task::spawn_blocking(move || user.verify_password(&password))
                .await
                .map_err(|e| AppError::Internal(e.into()))?
        };
        if !verified {
            debug!("Wrong password for {}", email);
            return Err(AppError::Unauthorized);
        }

        Ok(AuthUser { user_id: user.id, email: user.email, role: user.role })
    }
}

impl FromRequestParts<Arc<crate::AppState>> for StaffUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<crate::AppState>) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_staff() {
            warn!("User {} tried a staff-only endpoint", user.user_id);
            return Err(AppError::Unauthorized);
        }
        Ok(StaffUser(user))
    }
}
