//! Live reload for any upstream service.
//!
//! [`LiveReload`] wraps an upstream with a tower layer that:
//! - serves a server-sent event stream at the event path (`GET`)
//! - publishes a reload when the event path is `POST`ed to
//! - inserts a script listening to that stream into HTML and plain-text
//!   responses, streaming every other response through unchanged
//!
//! ```ignore
//! let live_reload = LiveReload::new(LiveReloadOptions::default());
//! let app = Router::new()
//!     .fallback_service(ServeDir::new("public"))
//!     .layer(live_reload.layer());
//!
//! // later, e.g. from a file watcher
//! live_reload.reload().await;
//! ```

mod events;
mod routing;
mod script;
mod service;
mod sniff;

use std::sync::Arc;
use std::time::Duration;

use lr_router::RouterConfig;

use events::{EventStream, MESSAGE_EVENT, StreamEvent};
pub use service::{LiveReloadLayer, LiveReloadService};

/// Data of the event that makes pages reload.
const RELOAD_DATA: &str = "reload";

/// Live reload settings.
#[derive(Clone, Debug)]
pub struct LiveReloadOptions {
    /// Path of the event stream. Should not shadow an upstream path.
    pub event_path: String,
    /// Send `Cache-Control: no-store` so reloads refetch every resource.
    pub disable_caching: bool,
    /// Interval between keep-alive pings on open event streams.
    pub keep_alive: Duration,
    /// Sniffing limits for responses without a content type.
    pub router: RouterConfig,
}

impl Default for LiveReloadOptions {
    fn default() -> Self {
        Self {
            event_path: lr_config::DEFAULT_EVENT_PATH.to_owned(),
            disable_caching: true,
            keep_alive: Duration::from_secs(10),
            router: RouterConfig::default(),
        }
    }
}

/// Shared live reload handle.
///
/// Cheap to clone. Dropping the last clone ends all open event streams.
#[derive(Clone)]
pub struct LiveReload {
    inner: Arc<Inner>,
}

struct Inner {
    options: LiveReloadOptions,
    events: EventStream,
    script: String,
}

impl LiveReload {
    /// Create a live reload handle.
    #[must_use]
    pub fn new(options: LiveReloadOptions) -> Self {
        let script = script::client_script(&options.event_path);
        let events = EventStream::new(options.keep_alive);
        Self {
            inner: Arc::new(Inner {
                options,
                events,
                script,
            }),
        }
    }

    /// Layer adding live reload to an upstream service.
    #[must_use]
    pub fn layer(&self) -> LiveReloadLayer {
        LiveReloadLayer::new(self.clone())
    }

    /// Path of the event stream.
    pub fn event_path(&self) -> &str {
        &self.inner.options.event_path
    }

    /// Tell every connected page to reload.
    ///
    /// Returns the number of event streams that accepted the event.
    pub async fn reload(&self) -> usize {
        let delivered = self
            .inner
            .events
            .publish(StreamEvent::new(MESSAGE_EVENT, RELOAD_DATA))
            .await;
        tracing::info!(clients = delivered, "Reload sent");
        delivered
    }

    /// End every open event stream and refuse new ones.
    ///
    /// Used on shutdown so long-lived connections don't hold it up.
    pub fn close(&self) {
        self.inner.events.close();
    }

    /// Number of open event streams.
    pub fn client_count(&self) -> usize {
        self.inner.events.subscriber_count()
    }
}
