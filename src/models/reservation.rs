use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Существование брони. Удаление жёсткое, поэтому `Deleted` встречается
/// только в уведомлениях об освобождении места.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Deleted,
}

/// Статус брони в день мероприятия.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveStatus {
    Pending,
    CheckedIn,
    Cancelled,
}

impl LiveStatus {
    /// `pending -> checked_in`, `pending -> cancelled` и повтор текущего статуса.
    /// Из `cancelled` выхода нет.
    pub fn can_transition_to(self, next: LiveStatus) -> bool {
        matches!(
            (self, next),
            (LiveStatus::Pending, _)
                | (LiveStatus::CheckedIn, LiveStatus::CheckedIn)
                | (LiveStatus::Cancelled, LiveStatus::Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LiveStatus::Pending => "pending",
            LiveStatus::CheckedIn => "checked_in",
            LiveStatus::Cancelled => "cancelled",
        }
    }
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for LiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LiveStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LiveStatus::Pending),
            "checked_in" => Ok(LiveStatus::CheckedIn),
            "cancelled" => Ok(LiveStatus::Cancelled),
            other => Err(format!("unknown live status '{}'", other)),
        }
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ReservationStatus::Active),
            "deleted" => Ok(ReservationStatus::Deleted),
            other => Err(format!("unknown reservation status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: Uuid,
    pub user_id: i64,
    pub event_id: i64,
    pub seat_id: i64,
    pub created_at: DateTime<Utc>,
    pub status: ReservationStatus,
    pub live_status: LiveStatus,
}

impl Reservation {
    /// Новая активная бронь в статусе `pending`.
    pub fn new(user_id: i64, event_id: i64, seat_id: i64, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            event_id,
            seat_id,
            created_at,
            status: ReservationStatus::Active,
            live_status: LiveStatus::Pending,
        }
    }

    pub fn belongs_to(&self, user_id: i64, event_id: i64) -> bool {
        self.user_id == user_id && self.event_id == event_id
    }
}
