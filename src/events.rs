use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Receiving end of a background task's events.
///
/// Once the owning task is stopped nothing more is delivered, including
/// events that were already queued, so a late network result can never reach
/// a torn-down UI.
#[derive(Debug)]
pub struct Events<T> {
    rx: mpsc::UnboundedReceiver<T>,
    token: CancellationToken,
}

impl<T> Events<T> {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<T>, token: CancellationToken) -> Self {
        Self { rx, token }
    }

    /// Next event, or `None` once the task finished or was stopped.
    pub async fn recv(&mut self) -> Option<T> {
        if self.token.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            event = self.rx.recv() => event,
        }
    }

    /// Drain whatever is queued right now without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        if self.token.is_cancelled() {
            return None;
        }
        self.rx.try_recv().ok()
    }
}

impl<T> Stream for Events<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        if self.token.is_cancelled() {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}
