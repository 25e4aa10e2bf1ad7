use anyhow::{anyhow, bail};
use serde::Deserialize;
use std::{env, fmt::Display, str::FromStr};

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub notifications: NotificationConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub live: LiveConfig,
    pub housekeeping: HousekeepingConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    pub log_json: bool,
}

// Настройки базы данных. Без URL используется хранилище в памяти
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub pool_size: u32,
    pub acquire_timeout_seconds: u64,
}

// Настройки Redis. Без URL кеш карты мест выключен
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: Option<String>,
    pub seat_map_ttl_seconds: u64,
}

// Подпись токенов регистрации на входе
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub token_grace_hours: i64,
}

// Внешний приёмник уведомлений (подтверждения по почте и т.п.)
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    pub webhook_url: Option<String>,
    pub timeout_seconds: u64,
}

// Настройки Circuit Breaker
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_seconds: u64,
}

// Каналы наблюдателей
#[derive(Debug, Clone, Deserialize)]
pub struct LiveConfig {
    pub channel_capacity: usize,
    pub ping_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HousekeepingConfig {
    pub interval_seconds: u64,
}

const DEV_JWT_SECRET: &str = "dev-only-check-in-secret";

impl Default for Config {
    fn default() -> Self {
        Config {
            app: AppConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
                environment: "development".to_string(),
                rust_log: "seat_allocator=debug,tower_http=debug".to_string(),
                log_json: false,
            },
            database: DatabaseConfig {
                url: None,
                pool_size: 20,
                acquire_timeout_seconds: 5,
            },
            redis: RedisConfig {
                url: None,
                seat_map_ttl_seconds: 60,
            },
            jwt: JwtConfig {
                secret: DEV_JWT_SECRET.to_string(),
                token_grace_hours: 6,
            },
            notifications: NotificationConfig {
                webhook_url: None,
                timeout_seconds: 10,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 5,
                timeout_seconds: 60,
            },
            live: LiveConfig {
                channel_capacity: 64,
                ping_interval_seconds: 30,
            },
            housekeeping: HousekeepingConfig { interval_seconds: 300 },
        }
    }
}

fn parsed<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow!("{} must be a valid value: {}", key, e)),
        Err(_) => Ok(default),
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let d = Config::default();

        let environment = env::var("ENVIRONMENT").unwrap_or(d.app.environment);
        let secret = match optional("JWT_SECRET") {
            Some(secret) => secret,
            None if environment == "development" => d.jwt.secret,
            None => bail!("JWT_SECRET must be set outside development"),
        };

        Ok(Config {
            app: AppConfig {
                host: env::var("HOST").unwrap_or(d.app.host),
                port: parsed("PORT", d.app.port)?,
                environment,
                rust_log: env::var("RUST_LOG").unwrap_or(d.app.rust_log),
                log_json: env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(d.app.log_json),
            },
            database: DatabaseConfig {
                url: optional("DATABASE_URL"),
                pool_size: parsed("DB_POOL_SIZE", d.database.pool_size)?,
                acquire_timeout_seconds: parsed("DB_ACQUIRE_TIMEOUT_SECONDS", d.database.acquire_timeout_seconds)?,
            },
            redis: RedisConfig {
                url: optional("REDIS_URL"),
                seat_map_ttl_seconds: parsed("SEAT_MAP_TTL_SECONDS", d.redis.seat_map_ttl_seconds)?,
            },
            jwt: JwtConfig {
                secret,
                token_grace_hours: parsed("CHECKIN_TOKEN_GRACE_HOURS", d.jwt.token_grace_hours)?,
            },
            notifications: NotificationConfig {
                webhook_url: optional("NOTIFY_WEBHOOK_URL"),
                timeout_seconds: parsed("NOTIFY_TIMEOUT_SECONDS", d.notifications.timeout_seconds)?,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: parsed("CIRCUIT_BREAKER_FAILURE_THRESHOLD", d.circuit_breaker.failure_threshold)?,
                timeout_seconds: parsed("CIRCUIT_BREAKER_TIMEOUT_SECONDS", d.circuit_breaker.timeout_seconds)?,
            },
            live: LiveConfig {
                channel_capacity: parsed("LIVE_CHANNEL_CAPACITY", d.live.channel_capacity)?,
                ping_interval_seconds: parsed("LIVE_PING_INTERVAL_SECONDS", d.live.ping_interval_seconds)?,
            },
            housekeeping: HousekeepingConfig {
                interval_seconds: parsed("HOUSEKEEPING_INTERVAL_SECONDS", d.housekeeping.interval_seconds)?,
            },
        })
    }
}
