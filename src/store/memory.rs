use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::{LiveStatusChange, ReservationBatch, ReservationStore, StoreError, StoreResult};
use crate::models::{Allowance, Event, Location, Reservation, Seat, User};

#[derive(Default)]
struct Tables {
    locations: HashMap<i64, Location>,
    events: HashMap<i64, Event>,
    seats: HashMap<i64, Seat>,
    users: HashMap<i64, User>,
    allowances: HashMap<(i64, i64), i32>,
    reservations: HashMap<Uuid, Reservation>,
    // (event_id, seat_id) -> reservation id, аналог UNIQUE-ограничения в Postgres
    active_seats: HashMap<(i64, i64), Uuid>,
}

/// Хранилище в памяти для разработки и тестов.
///
/// Все таблицы лежат за одним мьютексом, поэтому каждая операция трейта
/// выполняется как одна транзакция.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_location(&self, location: Location) {
        self.tables().locations.insert(location.id, location);
    }

    pub fn add_event(&self, event: Event) {
        self.tables().events.insert(event.id, event);
    }

    pub fn add_seat(&self, seat: Seat) {
        self.tables().seats.insert(seat.id, seat);
    }

    pub fn add_user(&self, user: User) {
        self.tables().users.insert(user.id, user);
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn find_event(&self, event_id: i64) -> StoreResult<Option<Event>> {
        Ok(self.tables().events.get(&event_id).cloned())
    }

    async fn find_location(&self, location_id: i64) -> StoreResult<Option<Location>> {
        Ok(self.tables().locations.get(&location_id).cloned())
    }

    async fn find_seats(&self, seat_ids: &[i64]) -> StoreResult<Vec<Seat>> {
        let tables = self.tables();
        Ok(seat_ids
            .iter()
            .filter_map(|id| tables.seats.get(id).cloned())
            .collect())
    }

    async fn seats_at_location(&self, location_id: i64) -> StoreResult<Vec<Seat>> {
        let mut seats: Vec<Seat> = self
            .tables()
            .seats
            .values()
            .filter(|s| s.is_at(location_id))
            .cloned()
            .collect();
        seats.sort_by_key(|s| (s.row, s.number));
        Ok(seats)
    }

    async fn find_allowance(&self, user_id: i64, event_id: i64) -> StoreResult<Option<Allowance>> {
        Ok(self
            .tables()
            .allowances
            .get(&(user_id, event_id))
            .map(|&remaining| Allowance { user_id, event_id, remaining }))
    }

    async fn upsert_allowance(&self, user_id: i64, event_id: i64, remaining: i32) -> StoreResult<Allowance> {
        if remaining < 0 {
            return Err(StoreError::QuotaExceeded);
        }
        let mut tables = self.tables();
        // как внешние ключи allowances -> users/events в Postgres
        if !tables.users.contains_key(&user_id) || !tables.events.contains_key(&event_id) {
            return Err(StoreError::NotFound);
        }
        tables.allowances.insert((user_id, event_id), remaining);
        Ok(Allowance { user_id, event_id, remaining })
    }

    async fn adjust_allowance(&self, user_id: i64, event_id: i64, delta: i32) -> StoreResult<Allowance> {
        let mut tables = self.tables();
        let remaining = tables
            .allowances
            .get_mut(&(user_id, event_id))
            .ok_or(StoreError::MissingAllowance)?;

        let next = remaining.checked_add(delta).ok_or(StoreError::QuotaExceeded)?;
        if next < 0 {
            return Err(StoreError::QuotaExceeded);
        }
        *remaining = next;
        Ok(Allowance { user_id, event_id, remaining: next })
    }

    async fn find_reservation(&self, reservation_id: Uuid) -> StoreResult<Option<Reservation>> {
        Ok(self.tables().reservations.get(&reservation_id).cloned())
    }

    async fn reservations_by_user(&self, user_id: i64) -> StoreResult<Vec<Reservation>> {
        let mut found: Vec<Reservation> = self
            .tables()
            .reservations
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by_key(|r| (r.created_at, r.seat_id));
        Ok(found)
    }

    async fn reservations_by_event(&self, event_id: i64) -> StoreResult<Vec<Reservation>> {
        let mut found: Vec<Reservation> = self
            .tables()
            .reservations
            .values()
            .filter(|r| r.event_id == event_id)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.seat_id);
        Ok(found)
    }

    async fn commit_reservations(&self, batch: &ReservationBatch) -> StoreResult<()> {
        let mut tables = self.tables();

        // Сначала все проверки, потом запись: при любой ошибке состояние не меняется
        let mut claimed = std::collections::HashSet::new();
        for r in &batch.reservations {
            let key = (r.event_id, r.seat_id);
            if tables.active_seats.contains_key(&key) || !claimed.insert(key) {
                return Err(StoreError::UniqueViolation);
            }
        }

        let count = i32::try_from(batch.len()).map_err(|_| StoreError::QuotaExceeded)?;
        let remaining = tables
            .allowances
            .get_mut(&(batch.user_id, batch.event_id))
            .ok_or(StoreError::MissingAllowance)?;
        if *remaining < count {
            return Err(StoreError::QuotaExceeded);
        }
        *remaining -= count;

        for r in &batch.reservations {
            tables.active_seats.insert((r.event_id, r.seat_id), r.id);
            tables.reservations.insert(r.id, r.clone());
        }
        Ok(())
    }

    async fn delete_reservation(&self, reservation_id: Uuid, user_id: i64) -> StoreResult<Reservation> {
        let mut tables = self.tables();

        let reservation = match tables.reservations.get(&reservation_id) {
            Some(r) if r.user_id == user_id => r.clone(),
            _ => return Err(StoreError::NotFound),
        };
        let remaining = tables
            .allowances
            .get_mut(&(user_id, reservation.event_id))
            .ok_or(StoreError::MissingAllowance)?;
        // переполнение отклоняется до любых изменений, как и в Postgres
        *remaining = remaining.checked_add(1).ok_or(StoreError::QuotaExceeded)?;

        tables.reservations.remove(&reservation_id);
        tables.active_seats.remove(&(reservation.event_id, reservation.seat_id));
        Ok(reservation)
    }

    async fn update_live_statuses(&self, changes: &[LiveStatusChange]) -> StoreResult<Vec<Reservation>> {
        let mut tables = self.tables();

        for change in changes {
            match tables.reservations.get(&change.reservation_id) {
                Some(r) if r.belongs_to(change.user_id, change.event_id) && r.live_status == change.from => {}
                _ => return Err(StoreError::NotFound),
            }
        }

        let mut updated = Vec::with_capacity(changes.len());
        for change in changes {
            if let Some(r) = tables.reservations.get_mut(&change.reservation_id) {
                r.live_status = change.to;
                updated.push(r.clone());
            }
        }
        Ok(updated)
    }

    async fn find_user(&self, user_id: i64) -> StoreResult<Option<User>> {
        Ok(self.tables().users.get(&user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self
            .tables()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn store_with_allowance(remaining: i32) -> MemoryStore {
        let store = MemoryStore::new();
        store.tables().allowances.insert((1, 10), remaining);
        store
    }

    fn batch(seat_ids: &[i64]) -> ReservationBatch {
        let now = Utc::now();
        ReservationBatch {
            user_id: 1,
            event_id: 10,
            reservations: seat_ids.iter().map(|&s| Reservation::new(1, 10, s, now)).collect(),
        }
    }

    #[tokio::test]
    async fn commit_rejects_taken_seat_without_touching_quota() {
        let store = store_with_allowance(3);
        store.commit_reservations(&batch(&[100])).await.unwrap();

        let err = store.commit_reservations(&batch(&[101, 100])).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation));

        let allowance = store.find_allowance(1, 10).await.unwrap().unwrap();
        assert_eq!(allowance.remaining, 2);
        assert_eq!(store.reservations_by_event(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn commit_rejects_duplicate_seat_inside_batch() {
        let store = store_with_allowance(3);
        let err = store.commit_reservations(&batch(&[100, 100])).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation));
        assert!(store.reservations_by_event(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn adjust_never_goes_negative() {
        let store = store_with_allowance(1);
        let err = store.adjust_allowance(1, 10, -2).await.unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded));
        assert_eq!(store.find_allowance(1, 10).await.unwrap().unwrap().remaining, 1);
    }

    #[tokio::test]
    async fn delete_frees_seat_and_returns_quota() {
        let store = store_with_allowance(1);
        let b = batch(&[100]);
        store.commit_reservations(&b).await.unwrap();

        let deleted = store.delete_reservation(b.reservations[0].id, 1).await.unwrap();
        assert_eq!(deleted.seat_id, 100);
        assert_eq!(store.find_allowance(1, 10).await.unwrap().unwrap().remaining, 1);

        // место снова свободно
        store.commit_reservations(&batch(&[100])).await.unwrap();
    }

    #[tokio::test]
    async fn delete_fails_instead_of_clamping_full_allowance() {
        let store = store_with_allowance(1);
        let b = batch(&[100]);
        store.commit_reservations(&b).await.unwrap();
        store.tables().allowances.insert((1, 10), i32::MAX);

        let err = store.delete_reservation(b.reservations[0].id, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded));
        assert!(store.find_reservation(b.reservations[0].id).await.unwrap().is_some());
        assert_eq!(store.find_allowance(1, 10).await.unwrap().unwrap().remaining, i32::MAX);
    }

    #[tokio::test]
    async fn upsert_requires_known_user_and_event() {
        let store = MemoryStore::new();
        store.add_event(crate::models::Event {
            id: 10,
            location_id: 1,
            title: "Conference".into(),
            starts_at: Utc::now(),
            ends_at: Utc::now(),
            booking_deadline: Utc::now(),
        });

        let err = store.upsert_allowance(777, 10, 3).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
        assert!(store.find_allowance(777, 10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_of_foreign_reservation_is_not_found() {
        let store = store_with_allowance(1);
        let b = batch(&[100]);
        store.commit_reservations(&b).await.unwrap();

        let err = store.delete_reservation(b.reservations[0].id, 2).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }
}
