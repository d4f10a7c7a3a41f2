use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) const SUBSCRIPTION_BUFFER: usize = 64;

/// Receiving end of a background loop. Dropping it, or calling
/// [`Subscription::cancel`], stops the loop: pending timers are abandoned and
/// an in-flight request is dropped. Cancelling more than once is a no-op.
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
    cancel: CancellationToken,
}

impl<T> Subscription<T> {
    pub(crate) fn new(rx: mpsc::Receiver<T>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Next item, or `None` once the loop finished or was cancelled.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token that cancels this subscription; usable from other tasks or from
    /// inside an item handler.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drains every remaining item until the loop completes.
    pub async fn collect(mut self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = self.rx.recv().await {
            items.push(item);
        }
        items
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

/// Sending half handed to the loop task.
pub(crate) struct Emitter<T> {
    tx: mpsc::Sender<T>,
    cancel: CancellationToken,
}

impl<T> Emitter<T> {
    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Delivers one item. Returns `false` when the consumer is gone or the
    /// subscription was cancelled, in which case the loop must stop.
    pub(crate) async fn emit(&self, item: T) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(item) => sent.is_ok(),
        }
    }

    /// Sleeps for `delay`; returns `false` if cancelled first.
    pub(crate) async fn wait(&self, delay: std::time::Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

/// Spawns `body` with a fresh channel and cancellation token. The join handle
/// lets a registry wait for the loop to be fully torn down.
pub(crate) fn spawn_loop<T, F, Fut>(
    parent: Option<&CancellationToken>,
    body: F,
) -> (Subscription<T>, JoinHandle<()>)
where
    T: Send + 'static,
    F: FnOnce(Emitter<T>) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
    let cancel = match parent {
        Some(parent) => parent.child_token(),
        None => CancellationToken::new(),
    };
    let emitter = Emitter {
        tx,
        cancel: cancel.clone(),
    };
    let task = tokio::spawn(body(emitter));
    (Subscription::new(rx, cancel), task)
}
