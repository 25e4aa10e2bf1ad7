use chrono::Duration;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::{Event, Reservation};

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid check-in token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

/// Содержимое токена, который участник показывает на входе.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckInClaims {
    pub rid: Uuid,
    pub uid: i64,
    pub eid: i64,
    pub exp: i64,
}

/// Подписывает и проверяет токены регистрации (HS256).
#[derive(Clone)]
pub struct CheckInTokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
    grace: Duration,
}

impl CheckInTokens {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            grace: Duration::hours(config.token_grace_hours),
        }
    }

    /// Токен действует до конца события плюс запас из конфигурации.
    pub fn issue(&self, reservation: &Reservation, event: &Event) -> Result<String, TokenError> {
        let claims = CheckInClaims {
            rid: reservation.id,
            uid: reservation.user_id,
            eid: reservation.event_id,
            exp: (event.ends_at + self.grace).timestamp(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    pub fn resolve(&self, token: &str) -> Result<CheckInClaims, TokenError> {
        let validation = Validation::new(Algorithm::HS256);
        Ok(decode::<CheckInClaims>(token, &self.decoding, &validation)?.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn tokens(secret: &str) -> CheckInTokens {
        CheckInTokens::new(&JwtConfig { secret: secret.into(), token_grace_hours: 1 })
    }

    fn event(ends_in_hours: i64) -> Event {
        let now = Utc::now();
        Event {
            id: 10,
            location_id: 1,
            title: "Concert".into(),
            starts_at: now,
            ends_at: now + Duration::hours(ends_in_hours),
            booking_deadline: now,
        }
    }

    #[test]
    fn issued_token_resolves_to_its_reservation() {
        let t = tokens("secret");
        let reservation = Reservation::new(1, 10, 100, Utc::now());
        let token = t.issue(&reservation, &event(3)).unwrap();

        let claims = t.resolve(&token).unwrap();
        assert_eq!(claims.rid, reservation.id);
        assert_eq!((claims.uid, claims.eid), (1, 10));
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let reservation = Reservation::new(1, 10, 100, Utc::now());
        let token = tokens("one").issue(&reservation, &event(3)).unwrap();
        assert!(tokens("two").resolve(&token).is_err());
    }

    #[test]
    fn token_expires_after_grace() {
        let t = tokens("secret");
        let reservation = Reservation::new(1, 10, 100, Utc::now());
        let token = t.issue(&reservation, &event(-5)).unwrap();
        assert!(t.resolve(&token).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(tokens("secret").resolve("not-a-token").is_err());
    }
}
