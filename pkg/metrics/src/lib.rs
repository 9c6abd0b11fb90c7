//! Prometheus text exposition for the coordination store server.

pub mod store;

pub use store::StoreMetrics;

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// Thread-safe set of named counters and gauges.
pub struct MetricsRegistry {
    counters: RwLock<BTreeMap<String, Counter>>,
    gauges: RwLock<BTreeMap<String, Gauge>>,
}

struct Counter {
    value: AtomicU64,
    help: String,
}

struct Gauge {
    value: AtomicI64,
    help: String,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(BTreeMap::new()),
            gauges: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a counter. Re-registering keeps the existing value.
    pub fn register_counter(&self, name: &str, help: &str) {
        let mut counters = self.counters.write().unwrap_or_else(PoisonError::into_inner);
        counters.entry(name.to_string()).or_insert_with(|| Counter {
            value: AtomicU64::new(0),
            help: help.to_string(),
        });
    }

    /// Register a gauge. Re-registering keeps the existing value.
    pub fn register_gauge(&self, name: &str, help: &str) {
        let mut gauges = self.gauges.write().unwrap_or_else(PoisonError::into_inner);
        gauges.entry(name.to_string()).or_insert_with(|| Gauge {
            value: AtomicI64::new(0),
            help: help.to_string(),
        });
    }

    /// Add to a counter. Unknown names are ignored.
    pub fn counter_add(&self, name: &str, val: u64) {
        let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(c) = counters.get(name) {
            c.value.fetch_add(val, Ordering::Relaxed);
        }
    }

    pub fn counter_inc(&self, name: &str) {
        self.counter_add(name, 1);
    }

    pub fn counter_value(&self, name: &str) -> Option<u64> {
        let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
        counters.get(name).map(|c| c.value.load(Ordering::Relaxed))
    }

    /// Set a gauge. Unknown names are ignored.
    pub fn gauge_set(&self, name: &str, val: i64) {
        let gauges = self.gauges.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(g) = gauges.get(name) {
            g.value.store(val, Ordering::Relaxed);
        }
    }

    pub fn gauge_value(&self, name: &str) -> Option<i64> {
        let gauges = self.gauges.read().unwrap_or_else(PoisonError::into_inner);
        gauges.get(name).map(|g| g.value.load(Ordering::Relaxed))
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut output = String::new();

        let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
        for (name, counter) in counters.iter() {
            let _ = writeln!(output, "# HELP {} {}", name, counter.help);
            let _ = writeln!(output, "# TYPE {} counter", name);
            let _ = writeln!(output, "{} {}", name, counter.value.load(Ordering::Relaxed));
        }

        let gauges = self.gauges.read().unwrap_or_else(PoisonError::into_inner);
        for (name, gauge) in gauges.iter() {
            let _ = writeln!(output, "# HELP {} {}", name, gauge.help);
            let _ = writeln!(output, "# TYPE {} gauge", name);
            let _ = writeln!(output, "{} {}", name, gauge.value.load(Ordering::Relaxed));
        }

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_counters_then_gauges() {
        let registry = MetricsRegistry::new();
        registry.register_counter("requests_total", "Requests served");
        registry.register_gauge("open_streams", "Open streams");
        registry.counter_inc("requests_total");
        registry.counter_add("requests_total", 2);
        registry.gauge_set("open_streams", -1);

        let text = registry.render();
        assert_eq!(
            text,
            "# HELP requests_total Requests served\n\
             # TYPE requests_total counter\n\
             requests_total 3\n\
             # HELP open_streams Open streams\n\
             # TYPE open_streams gauge\n\
             open_streams -1\n"
        );
    }

    #[test]
    fn test_unknown_names_are_ignored() {
        let registry = MetricsRegistry::new();
        registry.counter_inc("missing");
        registry.gauge_set("missing", 4);
        assert_eq!(registry.counter_value("missing"), None);
        assert!(registry.render().is_empty());
    }

    #[test]
    fn test_reregister_keeps_value() {
        let registry = MetricsRegistry::new();
        registry.register_counter("c", "first");
        registry.counter_inc("c");
        registry.register_counter("c", "second");
        assert_eq!(registry.counter_value("c"), Some(1));
    }
}
