pub mod cache;
pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use services::{
    allocator::SeatAllocator,
    broadcast::BroadcastRegistry,
    checkin::CheckInProcessor,
    ledger::AllowanceLedger,
    notifications::{NotificationDispatcher, NotificationSink},
    tokens::CheckInTokens,
};
use store::{MemoryStore, PgStore, ReservationStore};

// Shared state для всего приложения
pub struct AppState {
    pub store: Arc<dyn ReservationStore>,
    pub cache: Option<cache::CacheService>,
    pub config: config::Config,
    pub registry: Arc<BroadcastRegistry>,
    pub ledger: AllowanceLedger,
    pub allocator: SeatAllocator,
    pub checkin: CheckInProcessor,
}

impl AppState {
    /// Поднимает хранилище, кеш и воркер уведомлений по конфигурации.
    pub async fn new(config: config::Config) -> anyhow::Result<Arc<Self>> {
        let store: Arc<dyn ReservationStore> = match &config.database.url {
            Some(url) => {
                let db = database::Database::connect(url, &config.database).await?;
                db.run_migrations().await?;
                Arc::new(PgStore::new(&db))
            }
            None => {
                warn!("DATABASE_URL is not set, using in-memory store");
                Arc::new(MemoryStore::new())
            }
        };

        // кеш необязателен: без Redis карта мест всегда строится из хранилища
        let cache = match &config.redis.url {
            Some(url) => match cache::CacheService::connect(url, config.redis.seat_map_ttl_seconds).await {
                Ok(cache) => Some(cache),
                Err(e) => {
                    warn!("Redis unavailable, seat map cache disabled: {:?}", e);
                    None
                }
            },
            None => None,
        };

        let notifier = NotificationDispatcher::spawn(&config.notifications, &config.circuit_breaker)?;
        info!("Notification dispatcher started");

        Ok(Self::with_parts(config, store, cache, Arc::new(notifier)))
    }

    pub fn with_parts(
        config: config::Config,
        store: Arc<dyn ReservationStore>,
        cache: Option<cache::CacheService>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Arc<Self> {
        let registry = Arc::new(BroadcastRegistry::new());
        let ledger = AllowanceLedger::new(store.clone());
        let allocator = SeatAllocator::new(store.clone(), ledger.clone(), registry.clone(), notifier.clone());
        let checkin = CheckInProcessor::new(
            store.clone(),
            CheckInTokens::new(&config.jwt),
            registry.clone(),
            notifier,
        );

        Arc::new(Self { store, cache, config, registry, ledger, allocator, checkin })
    }

    /// Сбрасывает закешированную карту мест события, если кеш включён.
    pub async fn invalidate_seat_map(&self, event_id: i64) {
        if let Some(cache) = &self.cache {
            cache.invalidate_seats(event_id).await;
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Seat Allocator API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        .nest("/api", controllers::routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
