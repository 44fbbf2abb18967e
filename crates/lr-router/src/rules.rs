//! Routing policies.
//!
//! Rules are plain values injected into the router, so the buffering
//! mechanism stays independent of what a caller wants rewritten. Closures
//! with the matching signature implement both traits.

use http::{HeaderMap, StatusCode};

/// Status and headers of the response being routed.
#[derive(Clone, Debug)]
pub struct ResponseHead {
    /// Response status.
    pub status: StatusCode,
    /// Response headers as written by the upstream.
    pub headers: HeaderMap,
}

impl Default for ResponseHead {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
        }
    }
}

/// Decides a destination from the response head alone.
///
/// Returning `None` abstains and defers the decision to the [`SniffRule`].
/// Rules run while the router holds its lock and must not call back into it.
pub trait HeaderRule<D>: Send + Sync {
    /// Pick a destination, or abstain.
    fn route(&self, head: &ResponseHead) -> Option<D>;
}

impl<D, F> HeaderRule<D> for F
where
    F: Fn(&ResponseHead) -> Option<D> + Send + Sync,
{
    fn route(&self, head: &ResponseHead) -> Option<D> {
        self(head)
    }
}

/// Decides a destination from the response head and the first body bytes.
///
/// Always returns a concrete destination. Runs under the router's lock.
pub trait SniffRule<D>: Send + Sync {
    /// Pick a destination for the sniffed bytes.
    fn route(&self, head: &ResponseHead, sniffed: &[u8]) -> D;
}

impl<D, F> SniffRule<D> for F
where
    F: Fn(&ResponseHead, &[u8]) -> D + Send + Sync,
{
    fn route(&self, head: &ResponseHead, sniffed: &[u8]) -> D {
        self(head, sniffed)
    }
}
