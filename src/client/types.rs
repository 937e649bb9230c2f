use crate::{BoxStream, Error, Result};
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// Cancels one streaming call from outside the consuming task.
///
/// Dropping the stream is also cancellation; the handle exists for when the consumer
/// is owned elsewhere (UI tasks, timeouts).
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub(crate) fn cancel_pair() -> (CancelHandle, CancellationToken) {
    let token = CancellationToken::new();
    (
        CancelHandle {
            token: token.clone(),
        },
        token,
    )
}

/// Wrap any decoded stream so it can be cancelled through the returned handle.
pub fn cancellable<T>(inner: BoxStream<'static, T>) -> (ControlledStream<T>, CancelHandle) {
    let (handle, token) = cancel_pair();
    (ControlledStream::new(inner, token), handle)
}

/// Stream wrapper that tears the inner stream down as soon as cancellation is observed.
///
/// After a cancel it yields one `Error::Cancelled` and ends; undecoded bytes and the
/// transport behind the inner stream are dropped at that moment.
pub struct ControlledStream<T> {
    inner: Option<BoxStream<'static, T>>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl<T> ControlledStream<T> {
    pub(crate) fn new(inner: BoxStream<'static, T>, token: CancellationToken) -> Self {
        Self {
            inner: Some(inner),
            cancelled: Box::pin(token.cancelled_owned()),
        }
    }
}

impl<T> Stream for ControlledStream<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.inner = None;
            return Poll::Ready(Some(Err(Error::Cancelled)));
        }

        match inner.as_mut().poll_next(cx) {
            Poll::Ready(None) => {
                this.inner = None;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}
