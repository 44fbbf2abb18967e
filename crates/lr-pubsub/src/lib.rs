//! In-process publish/subscribe fan-out.
//!
//! [`Broadcast`] delivers every published message to every [`Subscription`]
//! registered when [`Broadcast::publish`] is called. Publishing waits until
//! each subscriber has either accepted the message or been cancelled, so a
//! consumer that stops reading delays the publisher but never the other
//! consumers.
//!
//! # Lifetime
//!
//! [`Broadcast::close`] is the teardown path: it removes every subscription
//! and wakes every pending [`Subscription::recv`], which then returns `None`.
//! Dropping the channel closes it as well, and dropping a [`Subscription`]
//! unsubscribes it, so neither side can leak the other.
//!
//! ```ignore
//! let broadcast = Broadcast::new();
//! let mut subscription = broadcast.subscribe();
//!
//! tokio::spawn(async move {
//!     while let Some(message) = subscription.recv().await {
//!         println!("{message}");
//!     }
//! });
//!
//! broadcast.publish("reload").await;
//! broadcast.close();
//! ```

mod subscription;

pub use subscription::{Subscription, Unsubscribe};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Messages a subscriber can hold before delivery waits on it.
const SUBSCRIPTION_BUFFER: usize = 1;

/// Multi-subscriber broadcast channel.
///
/// Share it behind an [`Arc`] when several tasks publish or subscribe.
pub struct Broadcast<T> {
    shared: Arc<Shared<T>>,
}

/// State reachable from both the channel and its subscriptions.
pub(crate) struct Shared<T> {
    subscribers: Mutex<Subscribers<T>>,
    /// Parent of every subscription's cancellation token.
    closed: CancellationToken,
}

struct Subscribers<T> {
    next_id: u64,
    entries: HashMap<u64, Entry<T>>,
}

/// Delivery side of one subscription.
struct Entry<T> {
    sender: mpsc::Sender<T>,
    cancel: CancellationToken,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Subscribers<T>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove a subscription from the active set.
    pub(crate) fn remove(&self, id: u64) {
        if self.lock().entries.remove(&id).is_some() {
            tracing::trace!(subscription = id, "Subscription removed");
        }
    }
}

impl<T> Broadcast<T> {
    /// Create an empty channel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                subscribers: Mutex::new(Subscribers {
                    next_id: 0,
                    entries: HashMap::new(),
                }),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Register a new subscriber.
    ///
    /// The subscription receives every message whose publication starts after
    /// this call returns, until it is unsubscribed or the channel is closed.
    /// Subscribing to a closed channel yields a subscription that is already
    /// cancelled.
    pub fn subscribe(&self) -> Subscription<T> {
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let cancel = self.shared.closed.child_token();

        let id = {
            let mut subscribers = self.shared.lock();
            let id = subscribers.next_id;
            subscribers.next_id += 1;
            if !self.shared.closed.is_cancelled() {
                subscribers.entries.insert(
                    id,
                    Entry {
                        sender,
                        cancel: cancel.clone(),
                    },
                );
            }
            id
        };

        tracing::trace!(subscription = id, "Subscription added");
        Subscription::new(
            receiver,
            Unsubscribe::new(id, cancel, Arc::downgrade(&self.shared)),
        )
    }

    /// Close the channel.
    ///
    /// Every subscription is removed and cancelled. Later publications are
    /// dropped and later subscriptions start out cancelled. Idempotent.
    pub fn close(&self) {
        let drained: Vec<Entry<T>> = {
            let mut subscribers = self.shared.lock();
            self.shared.closed.cancel();
            subscribers.entries.drain().map(|(_, entry)| entry).collect()
        };

        for entry in &drained {
            entry.cancel.cancel();
        }

        if !drained.is_empty() {
            tracing::debug!(subscribers = drained.len(), "Broadcast channel closed");
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.is_cancelled()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.shared.lock().entries.len()
    }
}

impl<T: Clone + Send + 'static> Broadcast<T> {
    /// Publish a message to every current subscriber.
    ///
    /// Waits until each subscriber has accepted the message or been
    /// cancelled. Deliveries run as independent tasks; a subscriber that
    /// never reads and is never cancelled keeps this call pending.
    ///
    /// Returns the number of subscribers that accepted the message.
    pub async fn publish(&self, message: T) -> usize {
        let targets: Vec<(mpsc::Sender<T>, CancellationToken)> = self
            .shared
            .lock()
            .entries
            .values()
            .map(|entry| (entry.sender.clone(), entry.cancel.clone()))
            .collect();

        if targets.is_empty() {
            return 0;
        }

        let mut deliveries = JoinSet::new();
        for (sender, cancel) in targets {
            let message = message.clone();
            deliveries.spawn(async move {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => false,
                    sent = sender.send(message) => sent.is_ok(),
                }
            });
        }

        let mut delivered = 0;
        while let Some(result) = deliveries.join_next().await {
            if matches!(result, Ok(true)) {
                delivered += 1;
            }
        }

        tracing::trace!(delivered, "Message published");
        delivered
    }
}

impl<T> Default for Broadcast<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Broadcast<T> {
    fn drop(&mut self) {
        self.close();
    }
}
