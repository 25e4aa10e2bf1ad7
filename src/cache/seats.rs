use dashmap::DashMap;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::cache::CacheService;

fn seat_map_key(event_id: i64) -> String {
    format!("seats:{}", event_id)
}

/// Номер поколения карты мест по событиям. Растёт при каждой инвалидации;
/// карта, собранная при старом номере, в кеше не остаётся.
#[derive(Debug, Default)]
pub struct SeatMapVersions {
    versions: DashMap<i64, u64>,
}

impl SeatMapVersions {
    pub fn current(&self, event_id: i64) -> u64 {
        self.versions.get(&event_id).map(|v| *v).unwrap_or(0)
    }

    pub fn bump(&self, event_id: i64) -> u64 {
        let mut version = self.versions.entry(event_id).or_insert(0);
        *version += 1;
        *version
    }

    pub fn is_current(&self, event_id: i64, version: u64) -> bool {
        self.current(event_id) == version
    }
}

impl CacheService {
    /// Получить закешированную карту мест события (готовый JSON).
    pub async fn get_seat_map(&self, event_id: i64) -> Result<Option<String>, redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.get(seat_map_key(event_id)).await
    }

    /// Поколение, которое надо запомнить до чтения данных для карты.
    pub fn seat_map_version(&self, event_id: i64) -> u64 {
        self.versions.current(event_id)
    }

    /// Сохранить карту мест, собранную при поколении `built_at`, с TTL из конфигурации.
    ///
    /// Если за время сборки прошла инвалидация, только что записанный ключ
    /// удаляется. Проверка идёт после записи: инвалидация сначала меняет
    /// поколение, потом удаляет ключ, так что устаревшая карта не переживёт
    /// ни одного порядка событий.
    pub async fn save_seat_map(&self, event_id: i64, json: &str, built_at: u64) -> Result<bool, redis::RedisError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(seat_map_key(event_id), json, self.seat_map_ttl).await?;

        if self.versions.is_current(event_id, built_at) {
            return Ok(true);
        }
        debug!("Seat map for event {} went stale while building, dropping it", event_id);
        conn.del::<_, ()>(seat_map_key(event_id)).await?;
        Ok(false)
    }

    // Вызывается после любого изменения броней события
    pub async fn invalidate_seats(&self, event_id: i64) {
        self.versions.bump(event_id);
        let mut conn = self.conn.clone();
        match conn.del::<_, ()>(seat_map_key(event_id)).await {
            Ok(()) => info!("Invalidated seats cache for event {}", event_id),
            Err(e) => warn!("Failed to invalidate seats cache for event {}: {:?}", event_id, e),
        }
    }
}
