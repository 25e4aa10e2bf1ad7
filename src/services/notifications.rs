//! notifications.rs
//!
//! Отправка уведомлений о новых и изменённых бронях во внешний сервис
//! (подтверждения по почте и т.п.).
//!
//! Ядро только кладёт сообщение в канал и сразу возвращается. Фоновый
//! воркер доставляет его на webhook через [`CircuitBreaker`]; сбои доставки
//! логируются и никогда не влияют на запрос, который их породил.

use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{CircuitBreakerConfig, NotificationConfig};
use crate::models::Reservation;
use crate::services::circuit_breaker::CircuitBreaker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ReservationsCreated,
    LiveStatusChanged,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub kind: NotificationKind,
    pub actor_id: i64,
    pub reservations: Vec<Reservation>,
}

impl Notification {
    pub fn reservations_created(actor_id: i64, reservations: Vec<Reservation>) -> Self {
        Self { kind: NotificationKind::ReservationsCreated, actor_id, reservations }
    }

    pub fn live_status_changed(actor_id: i64, reservations: Vec<Reservation>) -> Self {
        Self { kind: NotificationKind::LiveStatusChanged, actor_id, reservations }
    }
}

/// Приёмник уведомлений. `notify` не блокирует и не возвращает ошибок.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Передаёт уведомления фоновому воркеру через неограниченный канал.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::UnboundedSender<Notification>,
}

impl NotificationDispatcher {
    /// Запускает воркер доставки. Требует работающий tokio runtime.
    pub fn spawn(config: &NotificationConfig, breaker: &CircuitBreakerConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        let worker = NotificationWorker {
            webhook_url: config.webhook_url.clone(),
            http,
            breaker: CircuitBreaker::new(
                breaker.failure_threshold,
                Duration::from_secs(breaker.timeout_seconds),
            ),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker.run(rx));
        Ok(Self { tx })
    }
}

impl NotificationSink for NotificationDispatcher {
    fn notify(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            warn!("Notification worker is gone, dropping notification");
        }
    }
}

struct NotificationWorker {
    webhook_url: Option<String>,
    http: reqwest::Client,
    breaker: CircuitBreaker,
}

impl NotificationWorker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Notification>) {
        info!("Notification worker started");
        while let Some(notification) = rx.recv().await {
            self.deliver(&notification).await;
        }
        info!("Notification worker stopped");
    }

    async fn deliver(&self, notification: &Notification) {
        let Some(url) = &self.webhook_url else {
            debug!(
                "No webhook configured, {:?} for {} reservation(s) by user {} logged only",
                notification.kind,
                notification.reservations.len(),
                notification.actor_id
            );
            return;
        };

        if !self.breaker.can_execute() {
            warn!("Circuit breaker is OPEN - dropping {:?} notification", notification.kind);
            return;
        }

        let result = self
            .http
            .post(url)
            .json(notification)
            .send()
            .await
            .and_then(|resp| resp.error_for_status());

        match result {
            Ok(_) => self.breaker.record_success(),
            Err(e) => {
                error!("Notification delivery failed: {:?}", e);
                self.breaker.record_failure();
            }
        }
    }
}
