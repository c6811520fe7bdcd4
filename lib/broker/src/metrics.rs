use vise::{Counter, Gauge, Metrics};

/// Attribute stream broker metrics.
#[derive(Debug, Metrics)]
#[metrics(prefix = "attribute_broker")]
pub(crate) struct AttributeBrokerMetrics {
    /// Number of attribute streams currently indexed by the broker.
    pub active_streams: Gauge,
    /// Number of upstream subscriptions constructed.
    pub streams_created: Counter,
    /// Number of requests served from an already active stream.
    pub streams_reused: Counter,
    /// Number of explicitly non-shared streams handed out.
    pub fresh_streams: Counter,
    /// Number of streams evicted from the index.
    pub streams_evicted: Counter,
}

#[vise::register]
pub(crate) static METRICS: vise::Global<AttributeBrokerMetrics> = vise::Global::new();
