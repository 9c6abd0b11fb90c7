use crate::MetricsRegistry;

const LEASES_GRANTED: &str = "leaderd_store_leases_granted_total";
const LEASES_REVOKED: &str = "leaderd_store_leases_revoked_total";
const LEASES_KEPT_ALIVE: &str = "leaderd_store_lease_keepalives_total";
const TXN_ATTEMPTED: &str = "leaderd_store_txn_attempted_total";
const TXN_SUCCEEDED: &str = "leaderd_store_txn_succeeded_total";
const WATCH_SUBSCRIPTIONS: &str = "leaderd_store_watch_subscriptions_total";
const REVISION: &str = "leaderd_store_revision";
const LIVE_LEASES: &str = "leaderd_store_live_leases";
const LIVE_KEYS: &str = "leaderd_store_live_keys";

/// Named metrics of the coordination store server.
pub struct StoreMetrics {
    registry: MetricsRegistry,
}

impl StoreMetrics {
    pub fn new() -> Self {
        let registry = MetricsRegistry::new();
        registry.register_counter(LEASES_GRANTED, "Leases granted");
        registry.register_counter(LEASES_REVOKED, "Leases explicitly revoked");
        registry.register_counter(LEASES_KEPT_ALIVE, "Successful lease keep-alives");
        registry.register_counter(TXN_ATTEMPTED, "Conditional puts attempted");
        registry.register_counter(TXN_SUCCEEDED, "Conditional puts that wrote the key");
        registry.register_counter(WATCH_SUBSCRIPTIONS, "Watch streams opened");
        registry.register_gauge(REVISION, "Current store revision");
        registry.register_gauge(LIVE_LEASES, "Leases currently alive");
        registry.register_gauge(LIVE_KEYS, "Keys currently stored");
        Self { registry }
    }

    pub fn lease_granted(&self) {
        self.registry.counter_inc(LEASES_GRANTED);
    }

    pub fn lease_revoked(&self) {
        self.registry.counter_inc(LEASES_REVOKED);
    }

    pub fn lease_kept_alive(&self) {
        self.registry.counter_inc(LEASES_KEPT_ALIVE);
    }

    pub fn txn(&self, succeeded: bool) {
        self.registry.counter_inc(TXN_ATTEMPTED);
        if succeeded {
            self.registry.counter_inc(TXN_SUCCEEDED);
        }
    }

    pub fn watch_subscribed(&self) {
        self.registry.counter_inc(WATCH_SUBSCRIPTIONS);
    }

    /// Refresh the gauges from a store snapshot.
    pub fn observe(&self, revision: u64, leases: usize, keys: usize) {
        self.registry.gauge_set(REVISION, revision as i64);
        self.registry.gauge_set(LIVE_LEASES, leases as i64);
        self.registry.gauge_set(LIVE_KEYS, keys as i64);
    }

    pub fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }

    pub fn render(&self) -> String {
        self.registry.render()
    }
}

impl Default for StoreMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_txn_counts_attempts_and_successes() {
        let metrics = StoreMetrics::new();
        metrics.txn(true);
        metrics.txn(false);
        assert_eq!(metrics.registry().counter_value(TXN_ATTEMPTED), Some(2));
        assert_eq!(metrics.registry().counter_value(TXN_SUCCEEDED), Some(1));
    }

    #[test]
    fn test_observe_sets_gauges() {
        let metrics = StoreMetrics::new();
        metrics.observe(42, 3, 1);
        let text = metrics.render();
        assert!(text.contains("leaderd_store_revision 42\n"));
        assert!(text.contains("leaderd_store_live_leases 3\n"));
        assert!(text.contains("leaderd_store_live_keys 1\n"));
    }
}
