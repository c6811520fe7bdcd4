use attr_types::AttributeValue;
use std::time::Duration;

/// Configuration of the attribute stream broker.
#[derive(Clone, Debug)]
pub struct AttributeBrokerConfig {
    /// How long an upstream subscription is kept alive after its last
    /// subscriber left. A re-subscription within this window reuses the warm
    /// connection and its cached value.
    pub grace_period: Duration,

    /// Value injected when an upstream produced nothing within the caller's
    /// initial timeout.
    pub timeout_sentinel: AttributeValue,

    /// Value injected when an upstream completed without producing anything.
    pub empty_sentinel: AttributeValue,
}

impl Default for AttributeBrokerConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(3),
            timeout_sentinel: AttributeValue::error("timeout"),
            empty_sentinel: AttributeValue::error("empty"),
        }
    }
}
