use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Transaction};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{LiveStatusChange, ReservationBatch, ReservationStore, StoreError, StoreResult};
use crate::database::Database;
use crate::models::{Allowance, Event, Location, Reservation, Seat, User};

const RESERVATION_COLUMNS: &str =
    "id, user_id, event_id, seat_id, created_at, status, live_status";

#[derive(FromRow)]
struct ReservationRow {
    id: Uuid,
    user_id: i64,
    event_id: i64,
    seat_id: i64,
    created_at: DateTime<Utc>,
    status: String,
    live_status: String,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = StoreError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        Ok(Reservation {
            id: row.id,
            user_id: row.user_id,
            event_id: row.event_id,
            seat_id: row.seat_id,
            created_at: row.created_at,
            status: row.status.parse().map_err(StoreError::Decode)?,
            live_status: row.live_status.parse().map_err(StoreError::Decode)?,
        })
    }
}

#[derive(FromRow)]
struct UserRow {
    id: i64,
    email: String,
    password_hash: String,
    role: String,
    is_active: bool,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            role: row.role.parse().map_err(StoreError::Decode)?,
            is_active: row.is_active,
        })
    }
}

fn decode_all(rows: Vec<ReservationRow>) -> StoreResult<Vec<Reservation>> {
    rows.into_iter().map(Reservation::try_from).collect()
}

// Нарушение UNIQUE (event_id, seat_id) — ожидаемый исход гонки, остальное — сбой БД
fn classify(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return StoreError::UniqueViolation;
        }
    }
    StoreError::Database(err)
}

// Внешний ключ на несуществующего пользователя или событие
fn missing_reference(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_foreign_key_violation() {
            return StoreError::NotFound;
        }
    }
    StoreError::Database(err)
}

/// Хранилище поверх Postgres. Каждая единица работы — отдельная транзакция.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(db: &Database) -> Self {
        Self { pool: db.pool.clone() }
    }

    async fn allowance_exists(
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
        event_id: i64,
    ) -> StoreResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM allowances WHERE user_id = $1 AND event_id = $2)"
        )
        .bind(user_id)
        .bind(event_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(exists)
    }

    /// Добавляет `delta` к квоте внутри транзакции, не давая уйти в минус.
    async fn shift_allowance(
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
        event_id: i64,
        delta: i32,
    ) -> StoreResult<Allowance> {
        let updated = sqlx::query_as::<_, Allowance>(
            r#"
            UPDATE allowances
            SET remaining = remaining + $3
            WHERE user_id = $1 AND event_id = $2 AND remaining + $3 >= 0
            RETURNING user_id, event_id, remaining
            "#
        )
        .bind(user_id)
        .bind(event_id)
        .bind(delta)
        .fetch_optional(&mut **tx)
        .await?;

        match updated {
            Some(allowance) => Ok(allowance),
            None if Self::allowance_exists(tx, user_id, event_id).await? => Err(StoreError::QuotaExceeded),
            None => Err(StoreError::MissingAllowance),
        }
    }
}

#[async_trait]
impl ReservationStore for PgStore {
    async fn find_event(&self, event_id: i64) -> StoreResult<Option<Event>> {
        let event = sqlx::query_as::<_, Event>(
            "SELECT id, location_id, title, starts_at, ends_at, booking_deadline
             FROM events WHERE id = $1"
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(event)
    }

    async fn find_location(&self, location_id: i64) -> StoreResult<Option<Location>> {
        let location = sqlx::query_as::<_, Location>("SELECT id, name FROM locations WHERE id = $1")
            .bind(location_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(location)
    }

    async fn find_seats(&self, seat_ids: &[i64]) -> StoreResult<Vec<Seat>> {
        let seats = sqlx::query_as::<_, Seat>(
            "SELECT id, location_id, label, seat_row, seat_number
             FROM seats WHERE id = ANY($1)"
        )
        .bind(seat_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(seats)
    }

    async fn seats_at_location(&self, location_id: i64) -> StoreResult<Vec<Seat>> {
        let seats = sqlx::query_as::<_, Seat>(
            "SELECT id, location_id, label, seat_row, seat_number
             FROM seats WHERE location_id = $1
             ORDER BY seat_row, seat_number"
        )
        .bind(location_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(seats)
    }

    async fn find_allowance(&self, user_id: i64, event_id: i64) -> StoreResult<Option<Allowance>> {
        let allowance = sqlx::query_as::<_, Allowance>(
            "SELECT user_id, event_id, remaining FROM allowances WHERE user_id = $1 AND event_id = $2"
        )
        .bind(user_id)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(allowance)
    }

    async fn upsert_allowance(&self, user_id: i64, event_id: i64, remaining: i32) -> StoreResult<Allowance> {
        let allowance = sqlx::query_as::<_, Allowance>(
            r#"
            INSERT INTO allowances (user_id, event_id, remaining)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, event_id) DO UPDATE SET remaining = EXCLUDED.remaining
            RETURNING user_id, event_id, remaining
            "#
        )
        .bind(user_id)
        .bind(event_id)
        .bind(remaining)
        .fetch_one(&self.pool)
        .await
        .map_err(missing_reference)?;
        Ok(allowance)
    }

    async fn adjust_allowance(&self, user_id: i64, event_id: i64, delta: i32) -> StoreResult<Allowance> {
        let mut tx = self.pool.begin().await?;
        let allowance = Self::shift_allowance(&mut tx, user_id, event_id, delta).await?;
        tx.commit().await?;
        Ok(allowance)
    }

    async fn find_reservation(&self, reservation_id: Uuid) -> StoreResult<Option<Reservation>> {
        let row = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {} FROM reservations WHERE id = $1",
            RESERVATION_COLUMNS
        ))
        .bind(reservation_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Reservation::try_from).transpose()
    }

    async fn reservations_by_user(&self, user_id: i64) -> StoreResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {} FROM reservations WHERE user_id = $1 ORDER BY created_at, seat_id",
            RESERVATION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }

    async fn reservations_by_event(&self, event_id: i64) -> StoreResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {} FROM reservations WHERE event_id = $1 AND status = 'active' ORDER BY seat_id",
            RESERVATION_COLUMNS
        ))
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        decode_all(rows)
    }

    async fn commit_reservations(&self, batch: &ReservationBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let count = i32::try_from(batch.len()).map_err(|_| StoreError::QuotaExceeded)?;

        // Транзакция откатывается при drop, если до commit не дошли
        let mut tx = self.pool.begin().await?;

        let mut insert = QueryBuilder::<Postgres>::new(
            "INSERT INTO reservations (id, user_id, event_id, seat_id, created_at, status, live_status) "
        );
        insert.push_values(&batch.reservations, |mut row, r| {
            row.push_bind(r.id)
                .push_bind(r.user_id)
                .push_bind(r.event_id)
                .push_bind(r.seat_id)
                .push_bind(r.created_at)
                .push_bind(r.status.as_str())
                .push_bind(r.live_status.as_str());
        });

        if let Err(e) = insert.build().execute(&mut *tx).await {
            let err = classify(e);
            if matches!(err, StoreError::UniqueViolation) {
                debug!(
                    "reservation insert for event {} lost the race on a seat",
                    batch.event_id
                );
            }
            tx.rollback().await?;
            return Err(err);
        }

        if let Err(e) = Self::shift_allowance(&mut tx, batch.user_id, batch.event_id, -count).await {
            tx.rollback().await?;
            return Err(e);
        }

        tx.commit().await.map_err(classify)?;
        Ok(())
    }

    async fn delete_reservation(&self, reservation_id: Uuid, user_id: i64) -> StoreResult<Reservation> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, ReservationRow>(&format!(
            "DELETE FROM reservations WHERE id = $1 AND user_id = $2 RETURNING {}",
            RESERVATION_COLUMNS
        ))
        .bind(reservation_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let reservation = match row {
            Some(row) => Reservation::try_from(row)?,
            None => {
                tx.rollback().await?;
                return Err(StoreError::NotFound);
            }
        };

        if let Err(e) = Self::shift_allowance(&mut tx, user_id, reservation.event_id, 1).await {
            warn!(
                "could not return quota for reservation {} (user {}): {}",
                reservation_id, user_id, e
            );
            tx.rollback().await?;
            return Err(e);
        }

        tx.commit().await?;
        Ok(reservation)
    }

    async fn update_live_statuses(&self, changes: &[LiveStatusChange]) -> StoreResult<Vec<Reservation>> {
        let mut tx = self.pool.begin().await?;
        let mut updated = Vec::with_capacity(changes.len());

        for change in changes {
            let row = sqlx::query_as::<_, ReservationRow>(&format!(
                r#"
                UPDATE reservations
                SET live_status = $1
                WHERE id = $2 AND event_id = $3 AND user_id = $4 AND live_status = $5
                RETURNING {}
                "#,
                RESERVATION_COLUMNS
            ))
            .bind(change.to.as_str())
            .bind(change.reservation_id)
            .bind(change.event_id)
            .bind(change.user_id)
            .bind(change.from.as_str())
            .fetch_optional(&mut *tx)
            .await?;

            match row {
                Some(row) => updated.push(Reservation::try_from(row)?),
                None => {
                    tx.rollback().await?;
                    return Err(StoreError::NotFound);
                }
            }
        }

        tx.commit().await?;
        Ok(updated)
    }

    async fn find_user(&self, user_id: i64) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, password_hash, role, is_active FROM users WHERE id = $1"
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, password_hash, role, is_active FROM users WHERE email = $1"
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }
}
