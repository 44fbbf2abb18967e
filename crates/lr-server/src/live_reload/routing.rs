//! Which responses get the reload script.
//!
//! Markup and plain text are buffered for rewriting; everything else streams
//! through untouched.

use std::io;

use axum::http::header::{CONTENT_DISPOSITION, CONTENT_ENCODING, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use lr_router::{BufferDestination, Destination, ResponseHead};

use super::sniff::{detect_content_type, essence};

/// Routing outcome for one response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Route {
    /// Forward bytes unchanged.
    Passthrough,
    /// Buffer the body and insert the script.
    Rewrite,
}

/// Destination for a routed response body.
///
/// Both collect what the router has seen. A passthrough buffer only ever
/// holds the sniffed prefix; the rest of the body bypasses the router.
#[derive(Clone, Debug)]
pub(crate) enum Target {
    Passthrough(BufferDestination),
    Rewrite(BufferDestination),
}

impl Destination for Target {
    fn write(&self, data: &[u8]) -> io::Result<()> {
        match self {
            Self::Passthrough(buffer) | Self::Rewrite(buffer) => buffer.write(data),
        }
    }
}

/// The two outputs of one response, chosen between by [`Route`].
#[derive(Clone)]
pub(crate) struct Targets {
    pub passthrough: BufferDestination,
    pub rewrite: BufferDestination,
}

impl Targets {
    pub(crate) fn pick(&self, route: Route) -> Target {
        match route {
            Route::Passthrough => Target::Passthrough(self.passthrough.clone()),
            Route::Rewrite => Target::Rewrite(self.rewrite.clone()),
        }
    }
}

/// Route from status and headers, or `None` to sniff the body.
pub(crate) fn route_by_header(head: &ResponseHead, head_request: bool) -> Option<Route> {
    if head_request || !has_body(head.status) || head.status == StatusCode::PARTIAL_CONTENT {
        return Some(Route::Passthrough);
    }

    let encoding = header_essence(&head.headers, &CONTENT_ENCODING);
    if encoding.as_deref().is_some_and(|encoding| encoding != "identity") {
        return Some(Route::Passthrough);
    }

    if header_essence(&head.headers, &CONTENT_DISPOSITION).as_deref() == Some("attachment") {
        return Some(Route::Passthrough);
    }

    match header_essence(&head.headers, &CONTENT_TYPE)?.as_str() {
        "text/html" | "text/plain" => Some(Route::Rewrite),
        _ => Some(Route::Passthrough),
    }
}

/// Route from the first body bytes.
pub(crate) fn route_by_content(sniffed: &[u8]) -> Route {
    match essence(detect_content_type(sniffed)).as_str() {
        "text/html" | "text/plain" => Route::Rewrite,
        _ => Route::Passthrough,
    }
}

fn has_body(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

/// Lowercased value of `name` without parameters; `None` when absent,
/// unreadable or empty.
fn header_essence(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    let value = essence(headers.get(name)?.to_str().ok()?);
    (!value.is_empty()).then_some(value)
}
