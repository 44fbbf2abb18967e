//! Error types for the live-reload server.

use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::proxy::ProxyError;

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Request to the event path with an unsupported method.
    #[error("method not allowed: {:?}", .0.as_str())]
    MethodNotAllowed(Method),

    /// The reload script could not be inserted into an HTML response.
    #[error("could not insert script into HTML: {0}")]
    Inject(#[from] lr_html::PatchError),

    /// The upstream response body failed before it was fully read.
    #[error("upstream body failed: {0}")]
    UpstreamBody(#[source] axum::Error),

    /// Reverse proxy failure.
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    /// Invalid upstream proxy URL.
    #[error("Invalid proxy URL {url}: {message}")]
    ProxyUrl {
        /// URL as configured.
        url: String,
        /// Parse failure.
        message: String,
    },

    /// Invalid watch pattern.
    #[error("Invalid watch pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    /// File watcher failure.
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::Proxy(_) | Self::UpstreamBody(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, self.to_string()).into_response()
    }
}
