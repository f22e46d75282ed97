//! Engine counters for the Prometheus exposition endpoint

use prometheus::{IntCounter, Registry};

#[derive(Clone)]
pub struct EngineMetrics {
    /// Ticks accepted off the feed
    pub ticks_total: IntCounter,
    /// Trigger closures that committed
    pub triggers_total: IntCounter,
}

impl EngineMetrics {
    /// Create the counters and register them with `registry`
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let metrics = Self::detached();
        registry.register(Box::new(metrics.ticks_total.clone()))?;
        registry.register(Box::new(metrics.triggers_total.clone()))?;
        Ok(metrics)
    }

    /// Counters without a registry; used where the exposition endpoint
    /// is not running
    pub fn detached() -> Self {
        let ticks_total = IntCounter::new(
            "paper_perps_ticks_total",
            "Mark-price ticks processed by the trigger engine",
        )
        .expect("valid metric definition");
        let triggers_total = IntCounter::new(
            "paper_perps_triggers_total",
            "Automatic position closures committed by the trigger engine",
        )
        .expect("valid metric definition");
        Self {
            ticks_total,
            triggers_total,
        }
    }
}
