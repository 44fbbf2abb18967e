//! Consumer side of a broadcast channel.

use std::sync::Weak;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::Shared;

/// One consumer's registration with a [`Broadcast`](crate::Broadcast).
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription<T> {
    receiver: mpsc::Receiver<T>,
    handle: Unsubscribe<T>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(receiver: mpsc::Receiver<T>, handle: Unsubscribe<T>) -> Self {
        Self { receiver, handle }
    }

    /// Receive the next message.
    ///
    /// Messages already accepted are handed out first; after that `None` is
    /// returned once the subscription is cancelled or the channel is closed.
    /// Cancel-safe.
    pub async fn recv(&mut self) -> Option<T> {
        tokio::select! {
            biased;
            message = self.receiver.recv() => message,
            () = self.handle.cancel.cancelled() => None,
        }
    }

    /// Stop receiving messages. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        self.handle.unsubscribe();
    }

    /// A detached handle that unsubscribes this subscription.
    pub fn unsubscribe_handle(&self) -> Unsubscribe<T> {
        self.handle.clone()
    }

    /// Whether the subscription was cancelled, explicitly or by closing the channel.
    pub fn is_cancelled(&self) -> bool {
        self.handle.cancel.is_cancelled()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.handle.unsubscribe();
    }
}

/// Unsubscribe function for a single subscription.
///
/// Cancels the subscription's private signal and removes it from the
/// channel's active set. Idempotent and safe to call concurrently.
pub struct Unsubscribe<T> {
    id: u64,
    cancel: CancellationToken,
    channel: Weak<Shared<T>>,
}

impl<T> Unsubscribe<T> {
    pub(crate) fn new(id: u64, cancel: CancellationToken, channel: Weak<Shared<T>>) -> Self {
        Self {
            id,
            cancel,
            channel,
        }
    }

    /// Unsubscribe.
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
        if let Some(shared) = self.channel.upgrade() {
            shared.remove(self.id);
        }
    }
}

impl<T> Clone for Unsubscribe<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            cancel: self.cancel.clone(),
            channel: Weak::clone(&self.channel),
        }
    }
}
