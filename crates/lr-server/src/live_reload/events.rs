//! Server-sent event stream fed by a broadcast channel.
//!
//! Each open stream holds one [`Subscription`]. The stream is dropped when
//! the client disconnects, which drops the subscription and unsubscribes it;
//! closing the channel ends every stream.

use std::convert::Infallible;
use std::time::Duration;

use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::Stream;
use lr_pubsub::{Broadcast, Subscription};
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Event type of reload and ping messages.
pub(crate) const MESSAGE_EVENT: &str = "message";

/// Data of the periodic keep-alive event.
pub(crate) const PING_DATA: &str = "ping";

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// One server-sent event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct StreamEvent {
    /// `event:` field.
    pub kind: String,
    /// `data:` field.
    pub data: String,
}

impl StreamEvent {
    pub(crate) fn new(kind: &str, data: &str) -> Self {
        Self {
            kind: kind.to_owned(),
            data: data.to_owned(),
        }
    }

    fn to_sse(&self) -> Event {
        Event::default().event(&self.kind).data(&self.data)
    }
}

/// Fan-out of events to open event streams.
pub(crate) struct EventStream {
    channel: Broadcast<StreamEvent>,
    keep_alive: Duration,
}

impl EventStream {
    pub(crate) fn new(keep_alive: Duration) -> Self {
        Self {
            channel: Broadcast::new(),
            keep_alive,
        }
    }

    /// Send an event to every open stream. Returns how many accepted it.
    pub(crate) async fn publish(&self, event: StreamEvent) -> usize {
        self.channel.publish(event).await
    }

    /// End every open stream and refuse new subscribers.
    pub(crate) fn close(&self) {
        self.channel.close();
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.channel.subscriber_count()
    }

    /// Open a stream for one client.
    ///
    /// The subscription is registered before this returns, so events
    /// published afterwards are delivered.
    pub(crate) fn open(&self) -> Response {
        let subscription = self.channel.subscribe();
        tracing::debug!(
            subscribers = self.channel.subscriber_count(),
            "Event stream opened"
        );
        let stream = event_stream(subscription, self.keep_alive);

        (
            [
                (CONTENT_TYPE, HeaderValue::from_static("text/event-stream")),
                (CACHE_CONTROL, HeaderValue::from_static("no-store")),
                (CONNECTION, HeaderValue::from_static("keep-alive")),
                (X_ACCEL_BUFFERING, HeaderValue::from_static("no")),
            ],
            Sse::new(stream),
        )
            .into_response()
    }
}

/// Published events interleaved with pings every `keep_alive`.
///
/// Ends when the subscription is cancelled or the channel closes.
fn event_stream(
    subscription: Subscription<StreamEvent>,
    keep_alive: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    let mut ticker = tokio::time::interval_at(Instant::now() + keep_alive, keep_alive);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    futures_util::stream::unfold(
        (subscription, ticker),
        |(mut subscription, mut ticker): (Subscription<StreamEvent>, Interval)| async move {
            let event = tokio::select! {
                message = subscription.recv() => message?.to_sse(),
                _ = ticker.tick() => Event::default().event(MESSAGE_EVENT).data(PING_DATA),
            };
            Some((Ok(event), (subscription, ticker)))
        },
    )
}
