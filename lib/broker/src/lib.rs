//! Reactive caching layer multiplexing live attribute streams from policy
//! information points to concurrent policy-evaluation subscribers.
//!
//! One upstream subscription is shared per distinct invocation, the most
//! recent value is replayed to late subscribers, and upstreams are kept warm
//! for a grace period after the last subscriber leaves.

mod broker;
pub use broker::AttributeStreamBroker;

mod config;
pub use config::AttributeBrokerConfig;

mod metrics;

mod stream;
pub use stream::{ActiveAttributeStream, AttributeSubscription, EvictionCallback};

mod timeout;
pub use timeout::{InitialTimeout, with_initial_timeout};
