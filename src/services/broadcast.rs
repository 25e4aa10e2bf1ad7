//! broadcast.rs
//!
//! Реестр наблюдателей: событие -> набор открытых каналов сотрудников.
//!
//! Все изменения набора и его обход при рассылке идут под guard'ом ключа в
//! `DashMap`, поэтому рассылка никогда не видит наполовину изменённый набор.
//! Доставка через `try_send` не ждёт наблюдателя: закрытый или переполненный
//! канал просто удаляется из реестра.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{LiveStatus, Reservation, ReservationStatus};

/// Состояние одного места, как его видит наблюдатель.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatState {
    pub event_id: i64,
    pub reservation_id: Uuid,
    pub seat_id: i64,
    pub user_id: i64,
    pub status: ReservationStatus,
    pub live_status: LiveStatus,
}

impl From<&Reservation> for SeatState {
    fn from(r: &Reservation) -> Self {
        Self {
            event_id: r.event_id,
            reservation_id: r.id,
            seat_id: r.seat_id,
            user_id: r.user_id,
            status: r.status,
            live_status: r.live_status,
        }
    }
}

/// Сообщение сервер -> наблюдатель.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveUpdate {
    /// Полная картина при подключении
    Snapshot { event_id: i64, seats: Vec<SeatState> },
    /// Изменение одной брони
    SeatStatus(SeatState),
}

impl LiveUpdate {
    pub fn snapshot(event_id: i64, reservations: &[Reservation]) -> Self {
        LiveUpdate::Snapshot {
            event_id,
            seats: reservations.iter().map(SeatState::from).collect(),
        }
    }

    pub fn changed(reservation: &Reservation) -> Self {
        LiveUpdate::SeatStatus(SeatState::from(reservation))
    }

    pub fn released(reservation: &Reservation) -> Self {
        let mut state = SeatState::from(reservation);
        state.status = ReservationStatus::Deleted;
        LiveUpdate::SeatStatus(state)
    }
}

/// Кто держит канал. Хранится для аудита.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observer {
    pub user_id: i64,
    pub email: String,
}

/// Серверная сторона канала наблюдателя.
#[derive(Debug, Clone)]
pub struct ObserverConnection {
    pub id: Uuid,
    sender: mpsc::Sender<LiveUpdate>,
}

impl ObserverConnection {
    /// Новый канал ограниченной ёмкости. Приёмник читает задача сокета.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<LiveUpdate>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { id: Uuid::new_v4(), sender }, receiver)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

struct Member {
    observer: Observer,
    connection: ObserverConnection,
}

#[derive(Default)]
pub struct BroadcastRegistry {
    events: DashMap<i64, HashMap<Uuid, Member>>,
}

impl BroadcastRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Повторная регистрация того же соединения ничего не меняет.
    pub fn register_connection(&self, event_id: i64, connection: &ObserverConnection, observer: Observer) {
        let mut members = self.events.entry(event_id).or_default();
        if members.contains_key(&connection.id) {
            return;
        }
        info!(
            event_id,
            connection_id = %connection.id,
            observer_id = observer.user_id,
            observer = %observer.email,
            "observer registered"
        );
        members.insert(
            connection.id,
            Member {
                observer,
                connection: connection.clone(),
            },
        );
    }

    /// Можно вызывать для уже удалённого или неизвестного соединения.
    pub fn unregister_connection(&self, event_id: i64, connection_id: Uuid, observer: &Observer) -> bool {
        let removed = match self.events.get_mut(&event_id) {
            Some(mut members) => members.remove(&connection_id).is_some(),
            None => false,
        };
        if removed {
            info!(
                event_id,
                connection_id = %connection_id,
                observer_id = observer.user_id,
                "observer unregistered"
            );
        }
        self.drop_if_empty(event_id);
        removed
    }

    /// Рассылает `update` всем каналам события и возвращает число успешных доставок.
    pub fn broadcast(&self, event_id: i64, update: &LiveUpdate) -> usize {
        let mut delivered = 0;
        let mut pruned = 0;

        if let Some(mut members) = self.events.get_mut(&event_id) {
            members.retain(|id, member| match member.connection.sender.try_send(update.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(event_id, connection_id = %id, "observer channel closed, pruning");
                    pruned += 1;
                    false
                }
                Err(TrySendError::Full(_)) => {
                    warn!(
                        event_id,
                        connection_id = %id,
                        observer_id = member.observer.user_id,
                        "observer is not keeping up, dropping connection"
                    );
                    pruned += 1;
                    false
                }
            });
        }

        if pruned > 0 {
            self.drop_if_empty(event_id);
        }
        delivered
    }

    pub fn connection_count(&self, event_id: i64) -> usize {
        self.events.get(&event_id).map(|m| m.len()).unwrap_or(0)
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Удаляет каналы, чьи сокеты уже закрыты. Возвращает число удалённых.
    pub fn prune_closed(&self) -> usize {
        let mut pruned = 0;
        for mut entry in self.events.iter_mut() {
            let before = entry.len();
            entry.retain(|_, member| !member.connection.is_closed());
            pruned += before - entry.len();
        }
        self.events.retain(|_, members| !members.is_empty());
        pruned
    }

    // remove_if перепроверяет пустоту под блокировкой шарда
    fn drop_if_empty(&self, event_id: i64) {
        self.events.remove_if(&event_id, |_, members| members.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn staff() -> Observer {
        Observer { user_id: 99, email: "staff@example.com".into() }
    }

    fn update(event_id: i64) -> LiveUpdate {
        LiveUpdate::changed(&Reservation::new(1, event_id, 5, Utc::now()))
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let registry = BroadcastRegistry::new();
        let (conn, mut rx) = ObserverConnection::channel(8);

        registry.register_connection(1, &conn, staff());
        registry.register_connection(1, &conn, staff());
        assert_eq!(registry.connection_count(1), 1);

        assert_eq!(registry.broadcast(1, &update(1)), 1);
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unregister_tolerates_unknown_connections() {
        let registry = BroadcastRegistry::new();
        let (conn, _rx) = ObserverConnection::channel(8);

        assert!(!registry.unregister_connection(1, conn.id, &staff()));
        registry.register_connection(1, &conn, staff());
        assert!(registry.unregister_connection(1, conn.id, &staff()));
        assert!(!registry.unregister_connection(1, conn.id, &staff()));
        assert_eq!(registry.event_count(), 0);
    }

    #[tokio::test]
    async fn broadcast_is_scoped_to_event() {
        let registry = BroadcastRegistry::new();
        let (a, mut rx_a) = ObserverConnection::channel(8);
        let (b, mut rx_b) = ObserverConnection::channel(8);
        registry.register_connection(1, &a, staff());
        registry.register_connection(2, &b, staff());

        assert_eq!(registry.broadcast(1, &update(1)), 1);
        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn dead_connection_is_pruned_and_others_still_receive() {
        let registry = BroadcastRegistry::new();
        let (alive, mut rx_alive) = ObserverConnection::channel(8);
        let (dead, rx_dead) = ObserverConnection::channel(8);
        registry.register_connection(1, &alive, staff());
        registry.register_connection(1, &dead, staff());
        drop(rx_dead);

        assert_eq!(registry.broadcast(1, &update(1)), 1);
        assert_eq!(registry.connection_count(1), 1);
        assert!(rx_alive.recv().await.is_some());
    }

    #[test]
    fn saturated_connection_is_dropped() {
        let registry = BroadcastRegistry::new();
        let (slow, _rx) = ObserverConnection::channel(1);
        registry.register_connection(1, &slow, staff());

        assert_eq!(registry.broadcast(1, &update(1)), 1);
        assert_eq!(registry.broadcast(1, &update(1)), 0);
        assert_eq!(registry.connection_count(1), 0);
    }

    #[test]
    fn prune_closed_sweeps_all_events() {
        let registry = BroadcastRegistry::new();
        let (a, rx_a) = ObserverConnection::channel(4);
        let (b, _rx_b) = ObserverConnection::channel(4);
        registry.register_connection(1, &a, staff());
        registry.register_connection(2, &b, staff());
        drop(rx_a);

        assert_eq!(registry.prune_closed(), 1);
        assert_eq!(registry.event_count(), 1);
        assert_eq!(registry.connection_count(2), 1);
    }

    #[test]
    fn updates_serialize_with_type_tag() {
        let json = serde_json::to_value(update(3)).unwrap();
        assert_eq!(json["type"], "seat_status");
        assert_eq!(json["eventId"], 3);
        assert_eq!(json["liveStatus"], "pending");
    }
}
