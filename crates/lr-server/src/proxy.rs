//! Reverse proxy upstream with a retrying transport.
//!
//! Useful when the upstream is a development server that restarts on every
//! change: requests made while it is down are retried until it comes back.

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{CONNECTION, HOST};
use axum::http::{HeaderMap, HeaderName, Uri};
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;
use reqwest::Url;
use reqwest::redirect::Policy;
use tower::Service;

use crate::error::ServerError;

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Reverse proxy error.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// HTTP client could not be built.
    #[error("could not build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// Incoming request body could not be read.
    #[error("could not read request body: {0}")]
    Body(#[source] axum::Error),

    /// Every attempt failed.
    #[error("upstream request failed after {attempts} attempt(s): {source}")]
    Upstream {
        /// Number of attempts made.
        attempts: u32,
        /// Error of the last attempt.
        source: reqwest::Error,
    },
}

/// Fixed-delay retry schedule for failed upstream requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay between attempts.
    pub delay: Duration,
    /// Total attempts, including the first. At least 1.
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Retry every `delay` for roughly `max_time`.
    #[must_use]
    pub fn new(delay: Duration, max_time: Duration) -> Self {
        let attempts = max_time.as_millis() / delay.as_millis().max(1);
        Self {
            delay,
            max_attempts: u32::try_from(attempts).unwrap_or(u32::MAX).max(1),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(10))
    }
}

/// Upstream service forwarding every request to another HTTP server.
#[derive(Clone)]
pub struct ReverseProxy {
    inner: Arc<ProxyInner>,
}

struct ProxyInner {
    client: reqwest::Client,
    upstream: Url,
    retry: RetryPolicy,
}

impl ReverseProxy {
    /// Create a proxy to `upstream`.
    ///
    /// Redirects are passed to the browser rather than followed.
    pub fn new(upstream: Url, retry: RetryPolicy) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .build()
            .map_err(ProxyError::Client)?;

        Ok(Self {
            inner: Arc::new(ProxyInner {
                client,
                upstream,
                retry,
            }),
        })
    }

    /// Forward one request.
    pub async fn forward(&self, req: Request) -> Result<Response, ProxyError> {
        let (parts, body) = req.into_parts();
        // Buffered once so every attempt sends the same bytes.
        let body = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(ProxyError::Body)?;

        let url = upstream_url(&self.inner.upstream, &parts.uri);
        let mut headers = strip_hop_by_hop(&parts.headers);
        headers.remove(HOST);

        let retry = self.inner.retry;
        let mut attempt = 1;
        let upstream = loop {
            let result = self
                .inner
                .client
                .request(parts.method.clone(), url.clone())
                .headers(headers.clone())
                .body(body.clone())
                .send()
                .await;

            match result {
                Ok(response) => break response,
                Err(err) if attempt < retry.max_attempts => {
                    tracing::debug!(attempt, url = %url, error = %err, "Upstream request failed, retrying");
                    tokio::time::sleep(retry.delay).await;
                    attempt += 1;
                }
                Err(source) => {
                    return Err(ProxyError::Upstream {
                        attempts: attempt,
                        source,
                    });
                }
            }
        };

        let status = upstream.status();
        let headers = strip_hop_by_hop(upstream.headers());
        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

impl Service<Request> for ReverseProxy {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let proxy = self.clone();
        Box::pin(async move {
            let response = match proxy.forward(req).await {
                Ok(response) => response,
                Err(err) => {
                    tracing::warn!(error = %err, "Proxy request failed");
                    ServerError::from(err).into_response()
                }
            };
            Ok(response)
        })
    }
}

/// Join the request path onto the upstream path with a single slash and
/// merge both query strings.
fn upstream_url(upstream: &Url, uri: &Uri) -> Url {
    let mut url = upstream.clone();
    let base = upstream.path().trim_end_matches('/');
    let path = uri.path().trim_start_matches('/');
    url.set_path(&format!("{base}/{path}"));

    let query = match (upstream.query(), uri.query()) {
        (Some(base), Some(query)) if !base.is_empty() => Some(format!("{base}&{query}")),
        (base, query) => query.or(base).map(str::to_owned),
    };
    url.set_query(query.as_deref());
    url
}

/// Copy of `headers` without hop-by-hop headers, including any named in
/// `Connection`.
fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::try_from(name.trim()).ok())
        .collect();

    let mut forwarded = headers.clone();
    for name in HOP_BY_HOP {
        forwarded.remove(name);
    }
    for name in &listed {
        forwarded.remove(name);
    }
    forwarded
}
