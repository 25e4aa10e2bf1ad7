// Общие заготовки для тестов сервисов: засеянное хранилище в памяти и
// собранные поверх него сервисы.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::{Allowance, Event, Location, Reservation, Role, Seat, User};
use crate::services::allocator::SeatAllocator;
use crate::services::broadcast::{BroadcastRegistry, Observer};
use crate::services::checkin::CheckInProcessor;
use crate::services::ledger::AllowanceLedger;
use crate::services::notifications::{Notification, NotificationSink};
use crate::services::tokens::CheckInTokens;
use crate::store::memory::MemoryStore;
use crate::store::{LiveStatusChange, ReservationBatch, ReservationStore, StoreResult};

pub const PASSWORD: &str = "secret";

#[derive(Default)]
pub struct RecordingSink(Mutex<Vec<Notification>>);

impl RecordingSink {
    pub fn taken(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: Notification) {
        self.0.lock().unwrap().push(notification);
    }
}

/// Заполняет хранилище: две локации, событие 10, места 100..=105 в
/// локации 1 и место 200 в локации 2; пользователи 1, 2 и сотрудник 9.
pub fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    store.add_location(Location { id: 1, name: "Main hall".into() });
    store.add_location(Location { id: 2, name: "Small hall".into() });

    let now = Utc::now();
    store.add_event(Event {
        id: 10,
        location_id: 1,
        title: "Conference".into(),
        starts_at: now + Duration::hours(1),
        ends_at: now + Duration::hours(5),
        booking_deadline: now + Duration::minutes(30),
    });

    for (i, id) in (100..=105).enumerate() {
        let number = i as i32 + 1;
        store.add_seat(Seat { id, location_id: 1, label: format!("A{}", number), row: 1, number });
    }
    store.add_seat(Seat { id: 200, location_id: 2, label: "A1".into(), row: 1, number: 1 });

    let hash = bcrypt::hash(PASSWORD, 4).unwrap();
    for (id, role) in [(1, Role::User), (2, Role::User), (9, Role::Staff)] {
        store.add_user(User {
            id,
            email: format!("user{}@example.com", id),
            password_hash: hash.clone(),
            role,
            is_active: true,
        });
    }
    store
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub registry: Arc<BroadcastRegistry>,
    pub notifier: Arc<RecordingSink>,
    pub ledger: AllowanceLedger,
    pub allocator: SeatAllocator,
    pub checkin: CheckInProcessor,
    pub user_id: i64,
    pub other_user_id: i64,
    pub staff_id: i64,
    pub event_id: i64,
}

impl Fixture {
    pub fn new() -> Self {
        let store = Arc::new(seeded_store());
        let registry = Arc::new(BroadcastRegistry::new());
        let notifier = Arc::new(RecordingSink::default());

        let dyn_store: Arc<dyn ReservationStore> = store.clone();
        let ledger = AllowanceLedger::new(dyn_store.clone());
        let allocator = SeatAllocator::new(dyn_store.clone(), ledger.clone(), registry.clone(), notifier.clone());
        let checkin = CheckInProcessor::new(
            dyn_store,
            CheckInTokens::new(&JwtConfig { secret: "test-secret".into(), token_grace_hours: 6 }),
            registry.clone(),
            notifier.clone(),
        );

        Self {
            store,
            registry,
            notifier,
            ledger,
            allocator,
            checkin,
            user_id: 1,
            other_user_id: 2,
            staff_id: 9,
            event_id: 10,
        }
    }

    pub async fn grant(&self, remaining: i32) {
        self.grant_to(self.user_id, remaining).await;
    }

    pub async fn grant_to(&self, user_id: i64, remaining: i32) {
        self.ledger.assign(user_id, self.event_id, remaining, self.staff_id).await.unwrap();
    }

    /// Аллокатор над другим хранилищем, с теми же реестром и уведомлениями.
    pub fn allocator_over(&self, store: Arc<dyn ReservationStore>) -> SeatAllocator {
        SeatAllocator::new(
            store.clone(),
            AllowanceLedger::new(store),
            self.registry.clone(),
            self.notifier.clone(),
        )
    }

    pub fn observer(&self) -> Observer {
        Observer { user_id: self.staff_id, email: "user9@example.com".into() }
    }
}

/// Хранилище, чей снимок занятых мест всегда пуст: так воспроизводится
/// гонка, в которой проверка проходит, а коммит упирается в уникальность.
pub struct StaleSnapshotStore(pub Arc<MemoryStore>);

#[async_trait]
impl ReservationStore for StaleSnapshotStore {
    async fn find_event(&self, event_id: i64) -> StoreResult<Option<Event>> {
        self.0.find_event(event_id).await
    }

    async fn find_location(&self, location_id: i64) -> StoreResult<Option<Location>> {
        self.0.find_location(location_id).await
    }

    async fn find_seats(&self, seat_ids: &[i64]) -> StoreResult<Vec<Seat>> {
        self.0.find_seats(seat_ids).await
    }

    async fn seats_at_location(&self, location_id: i64) -> StoreResult<Vec<Seat>> {
        self.0.seats_at_location(location_id).await
    }

    async fn find_allowance(&self, user_id: i64, event_id: i64) -> StoreResult<Option<Allowance>> {
        self.0.find_allowance(user_id, event_id).await
    }

    async fn upsert_allowance(&self, user_id: i64, event_id: i64, remaining: i32) -> StoreResult<Allowance> {
        self.0.upsert_allowance(user_id, event_id, remaining).await
    }

    async fn adjust_allowance(&self, user_id: i64, event_id: i64, delta: i32) -> StoreResult<Allowance> {
        self.0.adjust_allowance(user_id, event_id, delta).await
    }

    async fn find_reservation(&self, reservation_id: Uuid) -> StoreResult<Option<Reservation>> {
        self.0.find_reservation(reservation_id).await
    }

    async fn reservations_by_user(&self, user_id: i64) -> StoreResult<Vec<Reservation>> {
        self.0.reservations_by_user(user_id).await
    }

    async fn reservations_by_event(&self, _event_id: i64) -> StoreResult<Vec<Reservation>> {
        Ok(Vec::new())
    }

    async fn commit_reservations(&self, batch: &ReservationBatch) -> StoreResult<()> {
        self.0.commit_reservations(batch).await
    }

    async fn delete_reservation(&self, reservation_id: Uuid, user_id: i64) -> StoreResult<Reservation> {
        self.0.delete_reservation(reservation_id, user_id).await
    }

    async fn update_live_statuses(&self, changes: &[LiveStatusChange]) -> StoreResult<Vec<Reservation>> {
        self.0.update_live_statuses(changes).await
    }

    async fn find_user(&self, user_id: i64) -> StoreResult<Option<User>> {
        self.0.find_user(user_id).await
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.0.find_user_by_email(email).await
    }
}
