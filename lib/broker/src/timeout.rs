use attr_pip_api::PipStreamError;
use attr_types::AttributeValue;
use futures::Stream;
use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::Sleep;

/// Guards the subscriber-visible side of an attribute stream against a slow or
/// empty upstream.
///
/// * first upstream item arrives before the deadline: the output mirrors the
///   upstream verbatim;
/// * the deadline elapses first: `timeout_value` is injected, then the
///   upstream is mirrored when and if it produces;
/// * the upstream completes without a single value: `empty_value` is injected
///   before completion (after `timeout_value`, if that already fired);
/// * the upstream fails before producing: the error propagates unwrapped.
///
/// The deadline is per subscriber and does not touch the shared upstream.
pub fn with_initial_timeout<U>(
    upstream: U,
    initial_timeout: Duration,
    timeout_value: AttributeValue,
    empty_value: AttributeValue,
) -> InitialTimeout<U>
where
    U: Stream<Item = Result<AttributeValue, PipStreamError>>,
{
    InitialTimeout {
        upstream,
        deadline: tokio::time::sleep(initial_timeout),
        timeout_value: Some(timeout_value),
        empty_value: Some(empty_value),
        saw_item: false,
        finished: false,
    }
}

/// Stream returned by [`with_initial_timeout`].
#[pin_project]
pub struct InitialTimeout<U> {
    #[pin]
    upstream: U,
    #[pin]
    deadline: Sleep,
    /// Taken when the deadline fires; `None` afterwards.
    timeout_value: Option<AttributeValue>,
    empty_value: Option<AttributeValue>,
    /// True once the upstream produced an item (sentinels do not count).
    saw_item: bool,
    finished: bool,
}

impl<U> Stream for InitialTimeout<U>
where
    U: Stream<Item = Result<AttributeValue, PipStreamError>>,
{
    type Item = Result<AttributeValue, PipStreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.finished {
            return Poll::Ready(None);
        }
        match this.upstream.poll_next(cx) {
            Poll::Ready(Some(Ok(value))) => {
                *this.saw_item = true;
                Poll::Ready(Some(Ok(value)))
            }
            Poll::Ready(Some(Err(err))) => {
                *this.saw_item = true;
                *this.finished = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                *this.finished = true;
                if !*this.saw_item
                    && let Some(empty) = this.empty_value.take()
                {
                    return Poll::Ready(Some(Ok(empty)));
                }
                Poll::Ready(None)
            }
            Poll::Pending => {
                if !*this.saw_item
                    && this.timeout_value.is_some()
                    && this.deadline.as_mut().poll(cx).is_ready()
                {
                    let timeout = this
                        .timeout_value
                        .take()
                        .expect("checked to be present above");
                    return Poll::Ready(Some(Ok(timeout)));
                }
                Poll::Pending
            }
        }
    }
}
