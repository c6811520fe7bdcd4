use attr_pip_api::{AttributeStream, PipStreamError};
use attr_types::{AttributeInvocation, AttributeValue};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Invoked exactly once when a stream leaves its non-terminal lifetime. The
/// broker uses it to compare-and-delete its registry entry.
pub type EvictionCallback = Arc<dyn Fn(&Arc<ActiveAttributeStream>) + Send + Sync>;

type SubscriberSender = mpsc::UnboundedSender<Result<AttributeValue, PipStreamError>>;
type SubscriberReceiver = mpsc::UnboundedReceiver<Result<AttributeValue, PipStreamError>>;

/// One shared upstream subscription, multicast to any number of subscribers.
///
/// The upstream is subscribed when the first subscriber starts pulling and is
/// kept alive for a grace period after the last subscriber leaves. The most
/// recent value is replayed synchronously to subscribers that join later.
/// All state transitions run under a single non-suspending lock; upstream
/// cancellation and the eviction callback fire after the lock is released.
pub struct ActiveAttributeStream {
    invocation: AttributeInvocation,
    grace_period: Duration,
    on_evict: EvictionCallback,
    inner: Mutex<Inner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Constructed, upstream not yet subscribed.
    Idle,
    /// At least one subscriber; upstream pump running.
    Live,
    /// No subscribers; grace timer pending.
    Cooling,
    /// Upstream cancelled, completed or failed. Final.
    Terminated,
}

#[derive(Debug, Clone)]
enum Outcome {
    Completed,
    Failed(PipStreamError),
}

struct Inner {
    phase: Phase,
    /// The cold upstream, present until the first subscriber triggers the pump.
    upstream: Option<AttributeStream>,
    subscribers: HashMap<u64, SubscriberSender>,
    next_subscriber_id: u64,
    /// Replay buffer of capacity one.
    last_value: Option<AttributeValue>,
    outcome: Option<Outcome>,
    pump: Option<JoinHandle<()>>,
    grace: Option<JoinHandle<()>>,
    /// Bumped on every transition into or out of `Cooling` so that a grace
    /// timer losing the cancellation race fires as a no-op.
    grace_epoch: u64,
    evicted: bool,
}

impl Inner {
    fn register(&mut self, sender: SubscriberSender) -> u64 {
        let id = self.next_subscriber_id;
        self.next_subscriber_id += 1;
        self.subscribers.insert(id, sender);
        id
    }
}

/// Deferred side effect of an attach, executed after the state lock is gone.
enum PostAttach {
    Nothing,
    StartPump(AttributeStream),
    CancelGrace(JoinHandle<()>),
}

impl ActiveAttributeStream {
    /// Builds a stream in the idle state; `upstream` is not subscribed yet.
    pub fn new(
        invocation: AttributeInvocation,
        upstream: AttributeStream,
        on_evict: EvictionCallback,
        grace_period: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            invocation,
            grace_period,
            on_evict,
            inner: Mutex::new(Inner {
                phase: Phase::Idle,
                upstream: Some(upstream),
                subscribers: HashMap::new(),
                next_subscriber_id: 0,
                last_value: None,
                outcome: None,
                pump: None,
                grace: None,
                grace_epoch: 0,
                evicted: false,
            }),
        })
    }

    pub fn invocation(&self) -> &AttributeInvocation {
        &self.invocation
    }

    pub fn is_terminated(&self) -> bool {
        self.state().phase == Phase::Terminated
    }

    /// Hands out a subscription handle. The subscriber counter is not touched
    /// until the handle is first polled; a handle that is dropped unpolled
    /// never subscribes the upstream.
    pub fn subscribe(self: &Arc<Self>) -> AttributeSubscription {
        AttributeSubscription {
            stream: Arc::clone(self),
            state: SubscriptionState::Pending,
        }
    }

    fn state(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("attribute stream state poisoned")
    }

    fn attach(self: &Arc<Self>) -> (Option<u64>, SubscriberReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (id, action) = {
            let mut inner = self.state();
            match inner.phase {
                Phase::Terminated => {
                    // Late subscriber: replay the cached value, then the
                    // terminal outcome. Dropping `sender` closes the channel.
                    if let Some(value) = &inner.last_value {
                        let _ = sender.send(Ok(value.clone()));
                    }
                    if let Some(Outcome::Failed(err)) = &inner.outcome {
                        let _ = sender.send(Err(err.clone()));
                    }
                    return (None, receiver);
                }
                Phase::Idle => {
                    inner.phase = Phase::Live;
                    let id = inner.register(sender);
                    let upstream = inner
                        .upstream
                        .take()
                        .expect("idle stream owns its upstream");
                    (id, PostAttach::StartPump(upstream))
                }
                Phase::Live => {
                    if let Some(value) = &inner.last_value {
                        let _ = sender.send(Ok(value.clone()));
                    }
                    (inner.register(sender), PostAttach::Nothing)
                }
                Phase::Cooling => {
                    inner.phase = Phase::Live;
                    inner.grace_epoch += 1;
                    let grace = inner.grace.take();
                    if let Some(value) = &inner.last_value {
                        let _ = sender.send(Ok(value.clone()));
                    }
                    let action = grace.map_or(PostAttach::Nothing, PostAttach::CancelGrace);
                    (inner.register(sender), action)
                }
            }
        };
        match action {
            PostAttach::Nothing => {}
            PostAttach::StartPump(upstream) => {
                tracing::debug!(attribute = %self.invocation.name(), "subscribing upstream");
                self.spawn_pump(upstream);
            }
            PostAttach::CancelGrace(timer) => {
                tracing::debug!(
                    attribute = %self.invocation.name(),
                    "subscriber returned within grace period, keeping upstream",
                );
                timer.abort();
            }
        }
        (Some(id), receiver)
    }

    fn spawn_pump(self: &Arc<Self>, mut upstream: AttributeStream) {
        let stream = Arc::clone(self);
        let pump = tokio::spawn(async move {
            while let Some(item) = upstream.next().await {
                match item {
                    Ok(value) => stream.fan_out(value),
                    Err(err) => {
                        stream.fail(err);
                        return;
                    }
                }
            }
            stream.complete();
        });
        let mut inner = self.state();
        if inner.phase == Phase::Terminated {
            // The upstream already terminated in the meantime; nothing left
            // for the handle to cancel.
            pump.abort();
        } else {
            inner.pump = Some(pump);
        }
    }

    fn fan_out(&self, value: AttributeValue) {
        let inner = &mut *self.state();
        if inner.phase == Phase::Terminated {
            return;
        }
        inner.last_value = Some(value.clone());
        for sender in inner.subscribers.values() {
            // A closed channel means the subscriber is mid-drop; its detach
            // will settle the bookkeeping.
            let _ = sender.send(Ok(value.clone()));
        }
    }

    fn fail(self: &Arc<Self>, err: PipStreamError) {
        let (subscribers, grace, evict) = {
            let mut inner = self.state();
            if inner.phase == Phase::Terminated {
                return;
            }
            inner.phase = Phase::Terminated;
            inner.outcome = Some(Outcome::Failed(err.clone()));
            let subscribers: Vec<_> = inner.subscribers.drain().map(|(_, tx)| tx).collect();
            let grace = inner.grace.take();
            let evict = !inner.evicted;
            inner.evicted = true;
            (subscribers, grace, evict)
        };
        tracing::debug!(attribute = %self.invocation.name(), %err, "upstream failed terminally");
        for sender in subscribers {
            let _ = sender.send(Err(err.clone()));
        }
        if let Some(timer) = grace {
            timer.abort();
        }
        if evict {
            (self.on_evict)(self);
        }
    }

    fn complete(self: &Arc<Self>) {
        let (grace, evict) = {
            let mut inner = self.state();
            if inner.phase == Phase::Terminated {
                return;
            }
            inner.phase = Phase::Terminated;
            inner.outcome = Some(Outcome::Completed);
            // Dropping the senders completes every subscriber.
            inner.subscribers.clear();
            let grace = inner.grace.take();
            let evict = !inner.evicted;
            inner.evicted = true;
            (grace, evict)
        };
        tracing::debug!(attribute = %self.invocation.name(), "upstream completed");
        if let Some(timer) = grace {
            timer.abort();
        }
        if evict {
            (self.on_evict)(self);
        }
    }

    fn detach(self: &Arc<Self>, id: u64) {
        let epoch = {
            let mut inner = self.state();
            if inner.subscribers.remove(&id).is_none() {
                // Already drained by a terminal transition.
                return;
            }
            if inner.phase != Phase::Live || !inner.subscribers.is_empty() {
                return;
            }
            inner.phase = Phase::Cooling;
            inner.grace_epoch += 1;
            inner.grace_epoch
        };
        tracing::debug!(
            attribute = %self.invocation.name(),
            grace_ms = self.grace_period.as_millis() as u64,
            "last subscriber left, starting grace period",
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let stream = Arc::clone(self);
                let grace_period = self.grace_period;
                let timer = handle.spawn(async move {
                    tokio::time::sleep(grace_period).await;
                    stream.on_grace_elapsed(epoch);
                });
                let mut inner = self.state();
                if inner.phase == Phase::Cooling && inner.grace_epoch == epoch {
                    inner.grace = Some(timer);
                } else {
                    timer.abort();
                }
            }
            Err(_) => {
                // No runtime left to host the timer (teardown path): release
                // the upstream right away instead of leaking it.
                self.on_grace_elapsed(epoch);
            }
        }
    }

    fn on_grace_elapsed(self: &Arc<Self>, epoch: u64) {
        let (pump, evict) = {
            let mut inner = self.state();
            if inner.phase != Phase::Cooling || inner.grace_epoch != epoch {
                return;
            }
            inner.phase = Phase::Terminated;
            inner.outcome = Some(Outcome::Completed);
            inner.grace = None;
            let pump = inner.pump.take();
            let evict = !inner.evicted;
            inner.evicted = true;
            (pump, evict)
        };
        // Cancel the upstream synchronously so PIP resources are released
        // deterministically.
        if let Some(pump) = pump {
            pump.abort();
        }
        tracing::debug!(attribute = %self.invocation.name(), "grace period elapsed, upstream cancelled");
        if evict {
            (self.on_evict)(self);
        }
    }
}

impl fmt::Debug for ActiveAttributeStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.state();
        f.debug_struct("ActiveAttributeStream")
            .field("invocation", &self.invocation.name().as_str())
            .field("phase", &inner.phase)
            .field("subscribers", &inner.subscribers.len())
            .finish_non_exhaustive()
    }
}

enum SubscriptionState {
    /// Handed out, not yet polled.
    Pending,
    /// Counted in the subscriber counter (unless attached post-termination,
    /// in which case `id` is `None`).
    Attached {
        id: Option<u64>,
        receiver: SubscriberReceiver,
    },
    Finished,
}

/// Subscriber handle to an [`ActiveAttributeStream`].
///
/// Dropping the handle is the cancellation signal; it promptly decrements the
/// subscriber counter and may start the stream's grace period.
pub struct AttributeSubscription {
    stream: Arc<ActiveAttributeStream>,
    state: SubscriptionState,
}

impl AttributeSubscription {
    /// Returns the stream this subscription is attached to.
    pub fn stream(&self) -> &Arc<ActiveAttributeStream> {
        &self.stream
    }

    fn finish(&mut self) {
        if let SubscriptionState::Attached { id: Some(id), .. } =
            std::mem::replace(&mut self.state, SubscriptionState::Finished)
        {
            self.stream.detach(id);
        }
    }
}

impl Stream for AttributeSubscription {
    type Item = Result<AttributeValue, PipStreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if matches!(this.state, SubscriptionState::Pending) {
            let (id, receiver) = this.stream.attach();
            this.state = SubscriptionState::Attached { id, receiver };
        }
        let polled = match &mut this.state {
            SubscriptionState::Pending => unreachable!("attached above"),
            SubscriptionState::Finished => return Poll::Ready(None),
            SubscriptionState::Attached { receiver, .. } => receiver.poll_recv(cx),
        };
        match polled {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(value))) => Poll::Ready(Some(Ok(value))),
            Poll::Ready(Some(Err(err))) => {
                this.finish();
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for AttributeSubscription {
    fn drop(&mut self) {
        self.finish();
    }
}
