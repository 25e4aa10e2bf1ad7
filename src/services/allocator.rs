//! allocator.rs
//!
//! Распределение мест под квоту пользователя.
//!
//! Проверка доступности мест — это снимок, а не блокировка. Настоящий арбитр —
//! ограничение уникальности `(event_id, seat_id)` в хранилище: если два запроса
//! прошли проверку на одно и то же место, закоммитится только один, второй
//! получит `SeatAlreadyReserved`, а его списание квоты откатится вместе со
//! вставкой.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult, Resource};
use crate::models::Reservation;
use crate::services::broadcast::{BroadcastRegistry, LiveUpdate};
use crate::services::ledger::AllowanceLedger;
use crate::services::notifications::{Notification, NotificationSink};
use crate::store::{ReservationBatch, ReservationStore, StoreError};

const NO_ALLOWANCE: &str = "Нет права бронировать места на это событие";
const NOT_OWNER: &str = "Бронь принадлежит другому пользователю";

#[derive(Clone)]
pub struct SeatAllocator {
    store: Arc<dyn ReservationStore>,
    ledger: AllowanceLedger,
    registry: Arc<BroadcastRegistry>,
    notifier: Arc<dyn NotificationSink>,
}

impl SeatAllocator {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        ledger: AllowanceLedger,
        registry: Arc<BroadcastRegistry>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self { store, ledger, registry, notifier }
    }

    /// Бронирует все `seat_ids` или ни одного.
    pub async fn create_reservations(
        &self,
        user_id: i64,
        event_id: i64,
        seat_ids: &[i64],
    ) -> AppResult<Vec<Reservation>> {
        if seat_ids.is_empty() {
            return Err(AppError::invalid("Список мест пуст"));
        }
        let mut unique = HashSet::with_capacity(seat_ids.len());
        if !seat_ids.iter().all(|id| unique.insert(*id)) {
            return Err(AppError::invalid("Места в запросе повторяются"));
        }

        // 1) событие
        let event = self
            .store
            .find_event(event_id)
            .await?
            .ok_or(AppError::NotFound(Resource::Event))?;

        // 2) все места должны быть в локации события
        let seats = self.store.find_seats(seat_ids).await?;
        let known: HashSet<i64> = seats
            .iter()
            .filter(|s| s.is_at(event.location_id))
            .map(|s| s.id)
            .collect();
        if let Some(missing) = seat_ids.iter().find(|id| !known.contains(id)) {
            info!("Seat {} is not part of event {}", missing, event_id);
            return Err(AppError::NotFound(Resource::Seat));
        }

        // 3-4) квота
        let remaining = match self.ledger.get_remaining(user_id, event_id).await {
            Ok(remaining) => remaining,
            Err(AppError::NotFound(Resource::Allowance)) => return Err(AppError::Forbidden(NO_ALLOWANCE)),
            Err(e) => return Err(e),
        };
        if usize::try_from(remaining).unwrap_or(0) < seat_ids.len() {
            return Err(AppError::QuotaExceeded);
        }

        // 5) снимок занятых мест
        let taken: HashSet<i64> = self
            .store
            .reservations_by_event(event_id)
            .await?
            .into_iter()
            .map(|r| r.seat_id)
            .collect();
        if seat_ids.iter().any(|id| taken.contains(id)) {
            return Err(AppError::SeatAlreadyReserved);
        }

        // 6) одна единица работы: вставка + списание
        let created_at = Utc::now();
        let batch = ReservationBatch {
            user_id,
            event_id,
            reservations: seat_ids
                .iter()
                .map(|&seat_id| Reservation::new(user_id, event_id, seat_id, created_at))
                .collect(),
        };

        match self.store.commit_reservations(&batch).await {
            Ok(()) => {}
            Err(StoreError::UniqueViolation) => {
                warn!(
                    "User {} lost a seat race on event {}, batch rolled back",
                    user_id, event_id
                );
                return Err(AppError::SeatAlreadyReserved);
            }
            Err(StoreError::QuotaExceeded) => return Err(AppError::QuotaExceeded),
            Err(StoreError::MissingAllowance) => return Err(AppError::Forbidden(NO_ALLOWANCE)),
            Err(e) => return Err(e.into()),
        }

        info!(
            "User {} reserved {} seat(s) on event {}",
            user_id,
            batch.len(),
            event_id
        );

        for reservation in &batch.reservations {
            self.registry.broadcast(event_id, &LiveUpdate::changed(reservation));
        }
        self.notifier
            .notify(Notification::reservations_created(user_id, batch.reservations.clone()));

        Ok(batch.reservations)
    }

    /// Удаляет бронь владельца и возвращает одно место в квоту.
    pub async fn delete_reservation(&self, reservation_id: Uuid, user_id: i64) -> AppResult<Reservation> {
        let reservation = self
            .store
            .find_reservation(reservation_id)
            .await?
            .ok_or(AppError::NotFound(Resource::Reservation))?;

        if reservation.user_id != user_id {
            return Err(AppError::Forbidden(NOT_OWNER));
        }
        if self.store.find_allowance(user_id, reservation.event_id).await?.is_none() {
            return Err(AppError::Forbidden(NO_ALLOWANCE));
        }

        let deleted = match self.store.delete_reservation(reservation_id, user_id).await {
            Ok(deleted) => deleted,
            // уже удалена параллельным запросом
            Err(StoreError::NotFound) => return Err(AppError::NotFound(Resource::Reservation)),
            Err(StoreError::MissingAllowance) => return Err(AppError::Forbidden(NO_ALLOWANCE)),
            Err(e) => return Err(e.into()),
        };

        info!(
            "Reservation {} (seat {}) deleted by user {}",
            deleted.id, deleted.seat_id, user_id
        );
        self.registry.broadcast(deleted.event_id, &LiveUpdate::released(&deleted));

        Ok(deleted)
    }

    pub async fn list_reservations(&self, user_id: i64) -> AppResult<Vec<Reservation>> {
        Ok(self.store.reservations_by_user(user_id).await?)
    }
}
