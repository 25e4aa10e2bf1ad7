use redis::{aio::MultiplexedConnection, Client};
use std::sync::Arc;
use tracing::info;

pub mod seats;

use seats::SeatMapVersions;

/// Кеш карты мест поверх Redis. Без `REDIS_URL` сервис работает без кеша.
#[derive(Clone)]
pub struct CacheService {
    conn: MultiplexedConnection,
    seat_map_ttl: u64,
    versions: Arc<SeatMapVersions>,
}

impl CacheService {
    pub async fn connect(redis_url: &str, seat_map_ttl: u64) -> redis::RedisResult<Self> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        info!("Redis connected");
        Ok(Self { conn, seat_map_ttl, versions: Arc::default() })
    }
}
