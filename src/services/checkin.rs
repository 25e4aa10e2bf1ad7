//! checkin.rs
//!
//! Регистрация на входе в день события.
//!
//! Сотрудник отмечает брони участника как пришедшие или отменённые. Смена
//! статусов — одна единица работы: любой неизвестный, чужой или недопустимый
//! id отклоняет весь вызов. После коммита каждое реальное изменение
//! рассылается наблюдателям события; рассылка не входит в транзакцию.
//!
//! Проверка токенов, наоборот, best-effort: токен, который не удалось
//! разрешить, просто пропускается.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult, Resource};
use crate::models::{LiveStatus, Reservation};
use crate::services::broadcast::{BroadcastRegistry, LiveUpdate};
use crate::services::notifications::{Notification, NotificationSink};
use crate::services::tokens::CheckInTokens;
use crate::store::{LiveStatusChange, ReservationStore, StoreError};

/// Что сотрудник хочет сделать с бронями одного участника на одном событии.
#[derive(Debug, Clone, Default)]
pub struct CheckInCommand {
    pub event_id: i64,
    pub user_id: i64,
    pub check_in: Vec<Uuid>,
    pub cancel: Vec<Uuid>,
}

#[derive(Clone)]
pub struct CheckInProcessor {
    store: Arc<dyn ReservationStore>,
    tokens: CheckInTokens,
    registry: Arc<BroadcastRegistry>,
    notifier: Arc<dyn NotificationSink>,
}

impl CheckInProcessor {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        tokens: CheckInTokens,
        registry: Arc<BroadcastRegistry>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self { store, tokens, registry, notifier }
    }

    /// Возвращает брони, статус которых действительно изменился.
    /// Роль сотрудника у `actor_id` проверяет граница.
    pub async fn process_check_in(&self, command: CheckInCommand, actor_id: i64) -> AppResult<Vec<Reservation>> {
        let CheckInCommand { event_id, user_id, check_in, cancel } = command;

        let check_in_set: HashSet<Uuid> = check_in.iter().copied().collect();
        if cancel.iter().any(|id| check_in_set.contains(id)) {
            return Err(AppError::invalid("Бронь не может быть одновременно отмечена и отменена"));
        }

        let mut seen = HashSet::new();
        let mut changes = Vec::new();
        let requested = check_in
            .iter()
            .map(|id| (*id, LiveStatus::CheckedIn))
            .chain(cancel.iter().map(|id| (*id, LiveStatus::Cancelled)));

        for (reservation_id, target) in requested {
            if !seen.insert(reservation_id) {
                continue;
            }

            let reservation = self
                .store
                .find_reservation(reservation_id)
                .await?
                .filter(|r| r.belongs_to(user_id, event_id))
                .ok_or_else(|| {
                    AppError::invalid(format!(
                        "Бронь {} не найдена для пользователя {} на событии {}",
                        reservation_id, user_id, event_id
                    ))
                })?;

            if !reservation.live_status.can_transition_to(target) {
                return Err(AppError::invalid(format!(
                    "Нельзя перевести бронь {} из {} в {}",
                    reservation_id, reservation.live_status, target
                )));
            }
            // повторная отметка — успешный no-op
            if reservation.live_status == target {
                continue;
            }

            changes.push(LiveStatusChange {
                reservation_id,
                event_id,
                user_id,
                from: reservation.live_status,
                to: target,
            });
        }

        if changes.is_empty() {
            debug!("Check-in for user {} on event {} changed nothing", user_id, event_id);
            return Ok(Vec::new());
        }

        let changed = match self.store.update_live_statuses(&changes).await {
            Ok(changed) => changed,
            Err(StoreError::NotFound) => {
                return Err(AppError::invalid("Брони изменились во время обработки, повторите запрос"))
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            "Staff {} updated {} reservation(s) of user {} on event {}",
            actor_id,
            changed.len(),
            user_id,
            event_id
        );

        for reservation in &changed {
            let delivered = self.registry.broadcast(event_id, &LiveUpdate::changed(reservation));
            debug!("Live update for {} delivered to {} observer(s)", reservation.id, delivered);
        }
        self.notifier
            .notify(Notification::live_status_changed(actor_id, changed.clone()));

        Ok(changed)
    }

    /// Разрешает предъявленные токены. Невалидные токены пропускаются.
    pub async fn get_reservation_infos(
        &self,
        actor_id: i64,
        user_id: i64,
        event_id: i64,
        tokens: &[String],
    ) -> AppResult<Vec<Reservation>> {
        let mut found = Vec::new();
        let mut seen = HashSet::new();

        for token in tokens {
            let claims = match self.tokens.resolve(token) {
                Ok(claims) => claims,
                Err(e) => {
                    debug!("Skipping token presented to staff {}: {}", actor_id, e);
                    continue;
                }
            };
            if claims.uid != user_id || claims.eid != event_id || !seen.insert(claims.rid) {
                continue;
            }

            match self.store.find_reservation(claims.rid).await? {
                Some(r) if r.belongs_to(user_id, event_id) => found.push(r),
                _ => debug!("Token for reservation {} no longer resolves", claims.rid),
            }
        }

        if found.len() < tokens.len() {
            warn!(
                "Staff {} presented {} token(s) for user {} on event {}, {} resolved",
                actor_id,
                tokens.len(),
                user_id,
                event_id,
                found.len()
            );
        }
        Ok(found)
    }

    /// Выдаёт владельцу брони токен для входа.
    pub async fn issue_token(&self, reservation_id: Uuid, user_id: i64) -> AppResult<String> {
        let reservation = self
            .store
            .find_reservation(reservation_id)
            .await?
            .ok_or(AppError::NotFound(Resource::Reservation))?;
        if reservation.user_id != user_id {
            return Err(AppError::Forbidden("Бронь принадлежит другому пользователю"));
        }

        let event = self
            .store
            .find_event(reservation.event_id)
            .await?
            .ok_or(AppError::NotFound(Resource::Event))?;

        self.tokens
            .issue(&reservation, &event)
            .map_err(|e| AppError::Internal(e.into()))
    }
}
