use crate::config::AttributeBrokerConfig;
use crate::metrics::METRICS;
use crate::stream::{ActiveAttributeStream, EvictionCallback};
use crate::timeout::with_initial_timeout;
use attr_pip_api::{PipRegistry, PipStreamError};
use attr_types::{AttributeInvocation, AttributeValue};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Multiplexes live attribute streams to concurrent policy evaluations.
///
/// At most one upstream subscription exists per distinct invocation; new
/// subscribers get the most recent value replayed, and an upstream survives
/// for a configurable grace period after its last subscriber leaves. The
/// broker is an instance (no global state) and cheap to clone.
#[derive(Clone)]
pub struct AttributeStreamBroker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    config: AttributeBrokerConfig,
    pips: Arc<dyn PipRegistry>,
    streams: DashMap<AttributeInvocation, Arc<ActiveAttributeStream>>,
}

impl AttributeStreamBroker {
    pub fn new(pips: Arc<dyn PipRegistry>) -> Self {
        Self::with_config(pips, AttributeBrokerConfig::default())
    }

    pub fn with_config(pips: Arc<dyn PipRegistry>, config: AttributeBrokerConfig) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                config,
                pips,
                streams: DashMap::new(),
            }),
        }
    }

    /// Returns the subscriber-visible sequence of values for `invocation`,
    /// wrapped with the invocation's initial timeout.
    ///
    /// With `fresh == false` an equal in-flight invocation is reused; with
    /// `fresh == true` a private upstream is built for this caller. Either
    /// way the upstream is only subscribed once the returned stream is
    /// polled, and dropping the stream is the cancellation signal.
    pub fn attribute_stream(
        &self,
        invocation: &AttributeInvocation,
        fresh: bool,
    ) -> BoxStream<'static, Result<AttributeValue, PipStreamError>> {
        self.attribute_stream_with_timeout(invocation, fresh, invocation.initial_timeout())
    }

    /// Same as [`Self::attribute_stream`] with an explicit initial timeout.
    pub fn attribute_stream_with_timeout(
        &self,
        invocation: &AttributeInvocation,
        fresh: bool,
        initial_timeout: Duration,
    ) -> BoxStream<'static, Result<AttributeValue, PipStreamError>> {
        let stream = if fresh {
            // Fresh streams bypass the cache in both directions: they are
            // never indexed, so reuse-mode callers cannot observe them.
            METRICS.fresh_streams.inc();
            tracing::debug!(attribute = %invocation.name(), "creating fresh attribute stream");
            self.new_stream(invocation)
        } else {
            self.reuse_or_create(invocation)
        };
        let subscription = stream.subscribe();
        with_initial_timeout(
            subscription,
            initial_timeout,
            self.inner.config.timeout_sentinel.clone(),
            self.inner.config.empty_sentinel.clone(),
        )
        .boxed()
    }

    /// Number of invocations with an indexed active stream.
    pub fn active_stream_count(&self) -> usize {
        self.inner.streams.len()
    }

    fn reuse_or_create(&self, invocation: &AttributeInvocation) -> Arc<ActiveAttributeStream> {
        // Fast path: an equal invocation is already in flight.
        if let Some(existing) = self.inner.streams.get(invocation)
            && !existing.is_terminated()
        {
            METRICS.streams_reused.inc();
            tracing::debug!(attribute = %invocation.name(), "reusing active attribute stream");
            return Arc::clone(&existing);
        }

        // Build a candidate before touching the index so that PIP code never
        // runs under a registry lock, then publish it unless a concurrent
        // caller won the race. A losing candidate is simply dropped; its
        // upstream was never subscribed.
        let candidate = self.new_stream(invocation);
        match self.inner.streams.entry(invocation.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_terminated() {
                    // The entry terminated but its eviction callback has not
                    // landed yet. Once replaced, that callback no longer
                    // matches the indexed stream, so settle the outgoing
                    // entry's accounting here and book the candidate like a
                    // regular insertion.
                    METRICS.streams_evicted.inc();
                    METRICS.active_streams.dec_by(1);
                    entry.insert(Arc::clone(&candidate));
                    METRICS.active_streams.inc_by(1);
                    candidate
                } else {
                    METRICS.streams_reused.inc();
                    Arc::clone(entry.get())
                }
            }
            Entry::Vacant(entry) => {
                METRICS.active_streams.inc_by(1);
                entry.insert(Arc::clone(&candidate));
                candidate
            }
        }
    }

    fn new_stream(&self, invocation: &AttributeInvocation) -> Arc<ActiveAttributeStream> {
        let upstream = match self.inner.pips.resolve(invocation) {
            Ok(upstream) => upstream,
            Err(err) => {
                // Resolution failures reach current and future subscribers as
                // a terminal stream error rather than failing the lookup.
                tracing::warn!(attribute = %invocation.name(), %err, "failed to resolve upstream");
                futures::stream::once(futures::future::ready(Err(err))).boxed()
            }
        };
        METRICS.streams_created.inc();
        tracing::debug!(attribute = %invocation.name(), "creating active attribute stream");
        ActiveAttributeStream::new(
            invocation.clone(),
            upstream,
            self.eviction_callback(),
            self.inner.config.grace_period,
        )
    }

    fn eviction_callback(&self) -> EvictionCallback {
        // `Weak`, not `Arc`: the registry owns the streams and the streams
        // hold this callback, so a strong reference here would cycle.
        let broker: Weak<BrokerInner> = Arc::downgrade(&self.inner);
        Arc::new(move |stream: &Arc<ActiveAttributeStream>| {
            let Some(broker) = broker.upgrade() else {
                return;
            };
            let removed = broker
                .streams
                .remove_if(stream.invocation(), |_, current| Arc::ptr_eq(current, stream));
            if removed.is_some() {
                METRICS.streams_evicted.inc();
                METRICS.active_streams.dec_by(1);
                tracing::debug!(
                    attribute = %stream.invocation().name(),
                    "evicted attribute stream from index",
                );
            }
        })
    }
}

impl std::fmt::Debug for AttributeStreamBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeStreamBroker")
            .field("active_streams", &self.inner.streams.len())
            .finish_non_exhaustive()
    }
}
