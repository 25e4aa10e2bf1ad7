use std::sync::Arc;
use tracing::info;

use crate::error::{AppError, AppResult, Resource};
use crate::models::Allowance;
use crate::store::{ReservationStore, StoreError};

/// Учёт квот (user, event). Только арифметика над счётчиком в хранилище.
#[derive(Clone)]
pub struct AllowanceLedger {
    store: Arc<dyn ReservationStore>,
}

fn quota_count(count: u32) -> AppResult<i32> {
    i32::try_from(count).map_err(|_| AppError::invalid("Слишком большое количество мест"))
}

impl AllowanceLedger {
    pub fn new(store: Arc<dyn ReservationStore>) -> Self {
        Self { store }
    }

    pub async fn get_remaining(&self, user_id: i64, event_id: i64) -> AppResult<i32> {
        self.store
            .find_allowance(user_id, event_id)
            .await?
            .map(|a| a.remaining)
            .ok_or(AppError::NotFound(Resource::Allowance))
    }

    /// Списывает `count` мест, если их хватает. Иначе `QuotaExceeded` и без изменений.
    ///
    /// Бронирование сюда не ходит: аллокатор списывает квоту внутри
    /// `commit_reservations`, в одной транзакции со вставкой.
    pub async fn reserve(&self, user_id: i64, event_id: i64, count: u32) -> AppResult<Allowance> {
        let delta = -quota_count(count)?;
        self.shift(user_id, event_id, delta).await
    }

    /// Возвращает `count` мест. Верхней границы нет: базу мог поднять сотрудник.
    ///
    /// Удаление брони возвращает место само, внутри `delete_reservation` хранилища.
    pub async fn release(&self, user_id: i64, event_id: i64, count: u32) -> AppResult<Allowance> {
        let delta = quota_count(count)?;
        self.shift(user_id, event_id, delta).await
    }

    /// Назначение квоты сотрудником: абсолютное значение, не зависящее от уже взятых мест.
    pub async fn assign(&self, user_id: i64, event_id: i64, remaining: i32, actor_id: i64) -> AppResult<Allowance> {
        if remaining < 0 {
            return Err(AppError::invalid("Квота не может быть отрицательной"));
        }
        if self.store.find_event(event_id).await?.is_none() {
            return Err(AppError::NotFound(Resource::Event));
        }
        if self.store.find_user(user_id).await?.is_none() {
            return Err(AppError::NotFound(Resource::User));
        }

        let allowance = match self.store.upsert_allowance(user_id, event_id, remaining).await {
            Ok(allowance) => allowance,
            // пользователя удалили между проверкой и записью
            Err(StoreError::NotFound) => return Err(AppError::NotFound(Resource::User)),
            Err(e) => return Err(e.into()),
        };
        info!(
            "Allowance for user {} on event {} set to {} by staff {}",
            user_id, event_id, remaining, actor_id
        );
        Ok(allowance)
    }

    async fn shift(&self, user_id: i64, event_id: i64, delta: i32) -> AppResult<Allowance> {
        match self.store.adjust_allowance(user_id, event_id, delta).await {
            Ok(allowance) => Ok(allowance),
            Err(StoreError::QuotaExceeded) => Err(AppError::QuotaExceeded),
            Err(StoreError::MissingAllowance) => Err(AppError::NotFound(Resource::Allowance)),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::Fixture;
    use proptest::prelude::*;

    #[tokio::test]
    async fn missing_allowance_is_not_found() {
        let fx = Fixture::new();
        let err = fx.ledger.get_remaining(fx.user_id, fx.event_id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(Resource::Allowance)));
    }

    #[tokio::test]
    async fn reserve_fails_without_side_effects() {
        let fx = Fixture::new();
        fx.grant(2).await;

        let err = fx.ledger.reserve(fx.user_id, fx.event_id, 3).await.unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded));
        assert_eq!(fx.ledger.get_remaining(fx.user_id, fx.event_id).await.unwrap(), 2);

        let after = fx.ledger.reserve(fx.user_id, fx.event_id, 2).await.unwrap();
        assert_eq!(after.remaining, 0);
    }

    #[tokio::test]
    async fn release_has_no_upper_bound() {
        let fx = Fixture::new();
        fx.grant(1).await;

        let after = fx.ledger.release(fx.user_id, fx.event_id, 5).await.unwrap();
        assert_eq!(after.remaining, 6);
    }

    #[tokio::test]
    async fn assign_requires_known_event_and_non_negative_value() {
        let fx = Fixture::new();

        let err = fx.ledger.assign(fx.user_id, 404, 1, fx.staff_id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(Resource::Event)));

        let err = fx.ledger.assign(fx.user_id, fx.event_id, -1, fx.staff_id).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));

        let set = fx.ledger.assign(fx.user_id, fx.event_id, 4, fx.staff_id).await.unwrap();
        assert_eq!(set.remaining, 4);
    }

    #[tokio::test]
    async fn assign_to_unknown_user_is_not_found() {
        let fx = Fixture::new();

        let err = fx.ledger.assign(777, fx.event_id, 3, fx.staff_id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(Resource::User)));
        assert!(fx.store.find_allowance(777, fx.event_id).await.unwrap().is_none());
    }

    proptest! {
        #[test]
        fn remaining_never_goes_negative(start in 0i32..8, ops in prop::collection::vec((any::<bool>(), 0u32..5), 0..20)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let fx = Fixture::new();
                fx.grant(start).await;
                let mut expected = start;

                for (is_reserve, count) in ops {
                    let n = count as i32;
                    if is_reserve {
                        let result = fx.ledger.reserve(fx.user_id, fx.event_id, count).await;
                        if expected >= n {
                            prop_assert!(result.is_ok());
                            expected -= n;
                        } else {
                            prop_assert!(matches!(result, Err(AppError::QuotaExceeded)));
                        }
                    } else {
                        fx.ledger.release(fx.user_id, fx.event_id, count).await.unwrap();
                        expected += n;
                    }

                    let remaining = fx.ledger.get_remaining(fx.user_id, fx.event_id).await.unwrap();
                    prop_assert_eq!(remaining, expected);
                    prop_assert!(remaining >= 0);
                }
                Ok(())
            })?;
        }
    }
}
