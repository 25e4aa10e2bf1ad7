//! circuit_breaker.rs
//!
//! Паттерн "Автоматический выключатель" для исходящих вызовов к внешним
//! сервисам. После серии сбоев запросы временно блокируются, по истечении
//! таймаута пропускается один пробный запрос.

use std::sync::{PoisonError, RwLock};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Состояния выключателя.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Нормальная работа, запросы разрешены.
    Closed,
    /// Запросы запрещены до истечения таймаута.
    Open,
    /// Разрешён пробный запрос.
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    /// Когда выключатель последний раз разомкнулся.
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: RwLock<Inner>,
    /// Счетчик последовательных сбоев.
    failure_count: AtomicU32,
    /// Порог сбоев, после которого выключатель переходит в Open.
    failure_threshold: u32,
    /// Сколько держать Open перед пробным запросом.
    timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner { state: CircuitState::Closed, opened_at: None }),
            failure_count: AtomicU32::new(0),
            failure_threshold: failure_threshold.max(1),
            timeout,
        }
    }

    /// Проверяет, можно ли выполнить следующий запрос.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let expired = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.timeout)
                    .unwrap_or(true);
                if expired {
                    inner.state = CircuitState::HalfOpen;
                    info!("Circuit breaker transitioning to HalfOpen state");
                }
                expired
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.state == CircuitState::HalfOpen {
            info!("Circuit breaker recovered - transitioning to Closed state");
        }
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        self.failure_count.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        match inner.state {
            CircuitState::Closed if failures >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                error!(
                    "Circuit breaker OPENED - {} failures reached threshold {}",
                    failures, self.failure_threshold
                );
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!("Circuit breaker test failed - returning to Open state");
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold() {
        let cb = CircuitBreaker::new(2, Duration::from_secs(60));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
    }

    #[test]
    fn half_open_after_timeout_then_recovers() {
        let cb = CircuitBreaker::new(1, Duration::ZERO);
        cb.record_failure();
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn failed_half_open_call_reopens() {
        let cb = CircuitBreaker::new(1, Duration::ZERO);
        cb.record_failure();
        assert!(cb.can_execute());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
