use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Prometheus metrics for the broker
pub struct BrokerMetrics {
    pub registry: Registry,

    // Message flow
    pub messages_published: IntCounter,
    pub messages_delivered: IntCounter,
    pub messages_dropped: IntCounter,

    // Connections and subscriptions
    pub connections: IntGauge,
    pub subscriptions: IntGauge,

    // Store traffic by operation
    pub store_ops: IntCounterVec,
}

impl BrokerMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let messages_published =
            IntCounter::new("tq_messages_published_total", "Messages accepted from publishers")?;
        registry.register(Box::new(messages_published.clone()))?;

        let messages_delivered =
            IntCounter::new("tq_messages_delivered_total", "Messages pushed to subscribers")?;
        registry.register(Box::new(messages_delivered.clone()))?;

        let messages_dropped = IntCounter::new(
            "tq_messages_dropped_total",
            "Published messages that had no live subscriber",
        )?;
        registry.register(Box::new(messages_dropped.clone()))?;

        let connections = IntGauge::new("tq_connections", "Open client connections")?;
        registry.register(Box::new(connections.clone()))?;

        let subscriptions = IntGauge::new("tq_subscriptions", "Active subscriptions")?;
        registry.register(Box::new(subscriptions.clone()))?;

        let store_ops = IntCounterVec::new(
            Opts::new("tq_store_operations_total", "Result store operations by type"),
            &["op"],
        )?;
        registry.register(Box::new(store_ops.clone()))?;

        Ok(BrokerMetrics {
            registry,
            messages_published,
            messages_delivered,
            messages_dropped,
            connections,
            subscriptions,
            store_ops,
        })
    }

    pub fn inc_store_op(&self, op: &str) {
        self.store_ops.with_label_values(&[op]).inc();
    }
}
