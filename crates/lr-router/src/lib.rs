//! Response routing for body rewriting.
//!
//! A [`ResponseRouter`] sits between an upstream response producer and the
//! real output. It decides, exactly once and before any body byte reaches an
//! output, which [`Destination`] receives the body:
//!
//! 1. On the first header write a [`HeaderRule`] inspects status and headers.
//!    If it names a destination, routing is done and nothing is buffered.
//! 2. Otherwise body writes accumulate in a sniff buffer until either
//!    [`RouterConfig::sniff_size`] bytes arrived or
//!    [`RouterConfig::sniff_duration`] elapsed. A [`SniffRule`] then picks the
//!    destination from the buffered bytes, which are flushed to it in the same
//!    critical section.
//!
//! The decision is also published once through [`RoutingDecision`], so the
//! creator can await it instead of polling.
//!
//! ```ignore
//! let rewrite = BufferDestination::new();
//! let passthrough = BufferDestination::new();
//!
//! let (router, decision) = ResponseRouter::new(
//!     RouterConfig::default(),
//!     |head: &ResponseHead| head.headers.contains_key(CONTENT_TYPE).then(|| passthrough.clone()),
//!     |_: &ResponseHead, sniffed: &[u8]| if looks_like_html(sniffed) { rewrite.clone() } else { passthrough.clone() },
//! );
//! ```

mod destination;
mod router;
mod rules;

use std::time::Duration;

pub use destination::{BufferDestination, Destination};
pub use router::{ResponseRouter, RoutingDecision};
pub use rules::{HeaderRule, ResponseHead, SniffRule};

/// Default number of bytes inspected before sniff routing fires.
///
/// Matches the window used by standard content-type sniffing.
pub const DEFAULT_SNIFF_SIZE: usize = 512;

/// Default time to wait for [`DEFAULT_SNIFF_SIZE`] bytes.
pub const DEFAULT_SNIFF_DURATION: Duration = Duration::from_millis(100);

/// Sniffing limits for a [`ResponseRouter`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouterConfig {
    /// Buffered size that triggers sniff routing (0 disables the size trigger).
    pub sniff_size: usize,
    /// Delay after the header write that triggers sniff routing
    /// (zero disables the timer).
    pub sniff_duration: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            sniff_size: DEFAULT_SNIFF_SIZE,
            sniff_duration: DEFAULT_SNIFF_DURATION,
        }
    }
}
