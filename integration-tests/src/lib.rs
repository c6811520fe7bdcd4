//! Shared fixtures for attribute stream broker integration tests.

use attr_broker::{AttributeBrokerConfig, AttributeStreamBroker};
use attr_pip_api::{AttributeStream, PipStreamError, StaticPipRegistry};
use attr_types::{AttributeInvocation, AttributeValue, InvocationSettings};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const GRACE: Duration = Duration::from_millis(200);

/// Infinite upstream emitting 0, 1, 2, … spaced `interval` apart.
pub fn timed_integers(interval: Duration) -> AttributeStream {
    async_stream::stream! {
        let mut i = 0i64;
        loop {
            tokio::time::sleep(interval).await;
            yield Ok(AttributeValue::from(i));
            i += 1;
        }
    }
    .boxed()
}

pub fn invocation(name: &str) -> AttributeInvocation {
    invocation_with_settings(name, InvocationSettings::default())
}

pub fn invocation_with_settings(name: &str, settings: InvocationSettings) -> AttributeInvocation {
    AttributeInvocation::new(name, None, Vec::new(), BTreeMap::new(), settings)
        .expect("test invocation must be valid")
}

/// Counts how many upstreams were actually constructed.
#[derive(Clone, Default)]
pub struct ResolveCounter(Arc<AtomicUsize>);

impl ResolveCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// A broker over a registry serving `test.numbers` (integers spaced
/// `interval` apart), with a short grace period and named sentinels.
pub fn numbers_broker(interval: Duration) -> (AttributeStreamBroker, ResolveCounter) {
    let counter = ResolveCounter::default();
    let probe = counter.clone();
    let registry = StaticPipRegistry::new().with_pip(
        "test.numbers",
        move |_invocation: &AttributeInvocation| -> Result<AttributeStream, PipStreamError> {
            probe.bump();
            Ok(timed_integers(interval))
        },
    );
    let broker = AttributeStreamBroker::with_config(
        Arc::new(registry),
        AttributeBrokerConfig {
            grace_period: GRACE,
            timeout_sentinel: AttributeValue::error("time out"),
            empty_sentinel: AttributeValue::error("empty"),
        },
    );
    (broker, counter)
}
