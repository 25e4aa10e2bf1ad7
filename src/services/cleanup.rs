use std::sync::Arc;
use tracing::{debug, info};

use crate::services::broadcast::BroadcastRegistry;

/// Периодическая уборка: закрытые каналы наблюдателей, которые никто
/// не отписал (оборванные сокеты, переполненные очереди).
pub struct CleanupService {
    registry: Arc<BroadcastRegistry>,
}

impl CleanupService {
    pub fn new(registry: Arc<BroadcastRegistry>) -> Self {
        Self { registry }
    }

    pub fn run_housekeeping(&self) -> CleanupStats {
        let pruned_connections = self.registry.prune_closed();
        let stats = CleanupStats {
            pruned_connections,
            observed_events: self.registry.event_count(),
        };

        if stats.pruned_connections > 0 {
            info!(
                "🧹 Pruned {} closed observer connection(s), {} event(s) still observed",
                stats.pruned_connections, stats.observed_events
            );
        } else {
            debug!("🧹 Nothing to prune, {} event(s) observed", stats.observed_events);
        }
        stats
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupStats {
    pub pruned_connections: usize,
    pub observed_events: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::broadcast::{Observer, ObserverConnection};

    fn observer() -> Observer {
        Observer { user_id: 9, email: "staff@example.com".into() }
    }

    #[test]
    fn prunes_dropped_receivers_and_empty_events() {
        let registry = Arc::new(BroadcastRegistry::new());
        let (alive, _rx_alive) = ObserverConnection::channel(4);
        let (dead, rx_dead) = ObserverConnection::channel(4);
        registry.register_connection(1, &alive, observer());
        registry.register_connection(2, &dead, observer());
        drop(rx_dead);

        let stats = CleanupService::new(registry.clone()).run_housekeeping();
        assert_eq!(stats, CleanupStats { pruned_connections: 1, observed_events: 1 });
        assert_eq!(registry.connection_count(2), 0);
        assert_eq!(registry.connection_count(1), 1);
    }
}
