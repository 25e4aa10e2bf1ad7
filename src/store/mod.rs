//! Хранилище броней и квот.
//!
//! Трейт [`ReservationStore`] описывает всё, что нужно ядру от персистентности:
//! точечные выборки, выборки по пользователю и событию и три атомарные единицы
//! работы (вставка пачки броней + списание квоты, удаление брони + возврат квоты,
//! пакетная смена live-статусов). Уникальность `(event_id, seat_id)` проверяет
//! само хранилище, и нарушение возвращается как [`StoreError::UniqueViolation`].

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Allowance, Event, LiveStatus, Location, Reservation, Seat, User};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("active reservation already exists for this seat")]
    UniqueViolation,
    #[error("allowance has not enough remaining quota")]
    QuotaExceeded,
    #[error("allowance record is missing")]
    MissingAllowance,
    #[error("record not found")]
    NotFound,
    #[error("malformed row: {0}")]
    Decode(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Брони одного пользователя на одно событие, коммитятся вместе со списанием квоты.
#[derive(Debug, Clone)]
pub struct ReservationBatch {
    pub user_id: i64,
    pub event_id: i64,
    pub reservations: Vec<Reservation>,
}

impl ReservationBatch {
    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }
}

/// Смена live-статуса. `from` страхует от гонки двух сотрудников:
/// строка обновляется, только если статус всё ещё тот, что был прочитан.
#[derive(Debug, Clone, Copy)]
pub struct LiveStatusChange {
    pub reservation_id: Uuid,
    pub event_id: i64,
    pub user_id: i64,
    pub from: LiveStatus,
    pub to: LiveStatus,
}

#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn find_event(&self, event_id: i64) -> StoreResult<Option<Event>>;

    async fn find_location(&self, location_id: i64) -> StoreResult<Option<Location>>;

    async fn find_seats(&self, seat_ids: &[i64]) -> StoreResult<Vec<Seat>>;

    async fn seats_at_location(&self, location_id: i64) -> StoreResult<Vec<Seat>>;

    async fn find_allowance(&self, user_id: i64, event_id: i64) -> StoreResult<Option<Allowance>>;

    /// Staff assignment: sets the absolute baseline, creating the record if needed.
    /// `NotFound` if the user or the event does not exist.
    async fn upsert_allowance(&self, user_id: i64, event_id: i64, remaining: i32) -> StoreResult<Allowance>;

    /// Atomically adds `delta` to `remaining`. Fails with `QuotaExceeded` (state unchanged)
    /// if the result would be negative, `MissingAllowance` if there is no record.
    async fn adjust_allowance(&self, user_id: i64, event_id: i64, delta: i32) -> StoreResult<Allowance>;

    async fn find_reservation(&self, reservation_id: Uuid) -> StoreResult<Option<Reservation>>;

    async fn reservations_by_user(&self, user_id: i64) -> StoreResult<Vec<Reservation>>;

    async fn reservations_by_event(&self, event_id: i64) -> StoreResult<Vec<Reservation>>;

    /// Inserts the whole batch and decrements the allowance by `batch.len()` as one unit of
    /// work. On `UniqueViolation`, `QuotaExceeded` or `MissingAllowance` nothing is written.
    async fn commit_reservations(&self, batch: &ReservationBatch) -> StoreResult<()>;

    /// Deletes the reservation owned by `user_id` and gives one seat back to the allowance,
    /// as one unit of work. `NotFound` if the row is already gone.
    async fn delete_reservation(&self, reservation_id: Uuid, user_id: i64) -> StoreResult<Reservation>;

    /// Applies all changes or none. `NotFound` if any row no longer matches its change.
    async fn update_live_statuses(&self, changes: &[LiveStatusChange]) -> StoreResult<Vec<Reservation>>;

    async fn find_user(&self, user_id: i64) -> StoreResult<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
}
