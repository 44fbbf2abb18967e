//! Tower layer routing requests between the event stream and the upstream.

use std::convert::Infallible;
use std::task::{Context, Poll};

use axum::body::{Body, BodyDataStream};
use axum::extract::Request;
use axum::http::header::{ACCEPT_ENCODING, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::response::Parts;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use lr_router::{BufferDestination, ResponseHead, ResponseRouter, RoutingDecision};
use tower::{Layer, Service, ServiceExt};

use super::LiveReload;
use super::routing::{Target, Targets, route_by_content, route_by_header};
use super::script::csp_nonce;
use crate::error::ServerError;

/// Layer produced by [`LiveReload::layer`].
#[derive(Clone)]
pub struct LiveReloadLayer {
    live_reload: LiveReload,
}

impl LiveReloadLayer {
    pub(super) fn new(live_reload: LiveReload) -> Self {
        Self { live_reload }
    }
}

impl<S> Layer<S> for LiveReloadLayer {
    type Service = LiveReloadService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LiveReloadService {
            inner,
            live_reload: self.live_reload.clone(),
        }
    }
}

/// Service adding live reload to an upstream service.
#[derive(Clone)]
pub struct LiveReloadService<S> {
    inner: S,
    live_reload: LiveReload,
}

impl<S> Service<Request> for LiveReloadService<S>
where
    S: Service<Request, Error = Infallible> + Clone + Send + 'static,
    S::Response: IntoResponse,
    S::Future: Send,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Readiness is driven per request through `oneshot`.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let upstream = self.inner.clone();
        let live_reload = self.live_reload.clone();
        Box::pin(async move { Ok(live_reload.handle(upstream, req).await) })
    }
}

impl LiveReload {
    async fn handle<S>(&self, upstream: S, req: Request) -> Response
    where
        S: Service<Request, Error = Infallible> + Send + 'static,
        S::Response: IntoResponse,
        S::Future: Send,
    {
        if req.uri().path() != self.event_path() {
            return self.inject(upstream, req).await;
        }

        match *req.method() {
            Method::GET => self.inner.events.open(),
            Method::POST => {
                self.reload().await;
                StatusCode::OK.into_response()
            }
            _ => ServerError::MethodNotAllowed(req.method().clone()).into_response(),
        }
    }

    /// Run the upstream and insert the script into its response if it is
    /// markup or text.
    async fn inject<S>(&self, upstream: S, mut req: Request) -> Response
    where
        S: Service<Request, Error = Infallible> + Send + 'static,
        S::Response: IntoResponse,
        S::Future: Send,
    {
        let head_request = req.method() == Method::HEAD;
        // Compressed bodies cannot be patched.
        req.headers_mut()
            .insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

        let response = match upstream.oneshot(req).await {
            Ok(response) => response.into_response(),
            Err(never) => match never {},
        };
        let (mut parts, body) = response.into_parts();
        if self.inner.options.disable_caching {
            parts
                .headers
                .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        }

        let targets = Targets {
            passthrough: BufferDestination::new(),
            rewrite: BufferDestination::new(),
        };
        let (router, decision) = self.router(targets, head_request);
        router.write_header(parts.status, parts.headers.clone());

        let mut stream = body.into_data_stream();
        let target = match route_body(&router, decision, &mut stream).await {
            Ok(target) => target,
            Err(err) => return upstream_body_failed(err),
        };
        drop(router);

        match target {
            // The rest of the body is pulled only as fast as the client reads.
            Some(Target::Passthrough(prefix)) => {
                let prefix = prefix.take();
                let body = futures_util::stream::iter((!prefix.is_empty()).then_some(Ok(prefix)))
                    .chain(stream);
                Response::from_parts(parts, Body::from_stream(body))
            }
            Some(Target::Rewrite(buffer)) => {
                let mut original = buffer.take().to_vec();
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(data) => original.extend_from_slice(&data),
                        Err(err) => return upstream_body_failed(ServerError::UpstreamBody(err)),
                    }
                }
                self.rewrite(parts, &Bytes::from(original))
            }
            None => Response::from_parts(parts, Body::empty()),
        }
    }

    fn router(
        &self,
        targets: Targets,
        head_request: bool,
    ) -> (ResponseRouter<Target>, RoutingDecision<Target>) {
        let header_targets = targets.clone();
        ResponseRouter::new(
            self.inner.options.router,
            move |head: &ResponseHead| {
                route_by_header(head, head_request).map(|route| header_targets.pick(route))
            },
            move |_: &ResponseHead, sniffed: &[u8]| targets.pick(route_by_content(sniffed)),
        )
    }

    /// Build the response for a buffered body.
    fn rewrite(&self, mut parts: Parts, original: &Bytes) -> Response {
        let nonce = csp_nonce(&parts.headers);
        let attrs: Vec<(&str, &str)> = nonce
            .as_deref()
            .map(|nonce| ("nonce", nonce))
            .into_iter()
            .collect();

        let mut patched = match lr_html::insert_script(original, &attrs, &self.inner.script) {
            Ok(patched) => patched,
            Err(err) if parts.status != StatusCode::OK => {
                tracing::debug!(error = %err, status = %parts.status, "Serving unpatched error page");
                return Response::from_parts(parts, Body::from(original.clone()));
            }
            Err(err) => {
                tracing::warn!(error = %err, "Could not insert reload script");
                return ServerError::Inject(err).into_response();
            }
        };
        patched.push(b'\n');

        parts.headers.remove(CONTENT_LENGTH);
        if !parts.headers.contains_key(CONTENT_TYPE) {
            parts.headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            );
        }
        Response::from_parts(parts, Body::from(patched))
    }
}

/// Feed the upstream body into the router until it has picked a target.
///
/// Stops reading as soon as the decision is made, whether by the header
/// rule, the sniff size, the sniff timer or the end of the body. Everything
/// read so far has been flushed to the chosen target.
async fn route_body(
    router: &ResponseRouter<Target>,
    decision: RoutingDecision<Target>,
    stream: &mut BodyDataStream,
) -> Result<Option<Target>, ServerError> {
    let routed = decision.routed();
    tokio::pin!(routed);

    loop {
        tokio::select! {
            biased;
            target = &mut routed => return Ok(target),
            chunk = stream.next() => match chunk {
                Some(Ok(data)) => {
                    router.write(&data)?;
                }
                Some(Err(err)) => return Err(ServerError::UpstreamBody(err)),
                None => {
                    router.flush()?;
                    return Ok(routed.await);
                }
            },
        }
    }
}

fn upstream_body_failed(err: ServerError) -> Response {
    tracing::warn!(error = %err, "Reading upstream body failed");
    err.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live_reload::LiveReloadOptions;
    use axum::http::HeaderName;
    use axum::http::header::{CONTENT_DISPOSITION, CONTENT_SECURITY_POLICY};
    use lr_router::RouterConfig;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const SCRIPT_MARKER: &str = "new EventSource";
    const TEXT: &str = "plain text body";
    const HTML: &str = "<p>html body</p>";

    /// Upstream answering every request with a fixed body and headers.
    fn upstream(
        body: &'static str,
        headers: &'static [(HeaderName, &'static str)],
    ) -> impl Service<Request, Response = Response, Error = Infallible, Future: Send>
    + Clone
    + Send
    + 'static {
        upstream_with_status(StatusCode::OK, body, headers)
    }

    fn upstream_with_status(
        status: StatusCode,
        body: &'static str,
        headers: &'static [(HeaderName, &'static str)],
    ) -> impl Service<Request, Response = Response, Error = Infallible, Future: Send>
    + Clone
    + Send
    + 'static {
        tower::service_fn(move |_req: Request| async move {
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = status;
            for (name, value) in headers {
                response
                    .headers_mut()
                    .insert(name.clone(), HeaderValue::from_static(*value));
            }
            Ok::<_, Infallible>(response)
        })
    }

    fn live_reload() -> LiveReload {
        LiveReload::new(LiveReloadOptions::default())
    }

    fn get(path: &str) -> Request {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    async fn send<S>(live_reload: &LiveReload, upstream: S, req: Request) -> Response
    where
        S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
        S::Future: Send,
    {
        live_reload.layer().layer(upstream).oneshot(req).await.unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_unlabelled_text_gets_script() {
        let response = send(&live_reload(), upstream(TEXT, &[]), get("/")).await;

        assert_eq!(response.headers()[CACHE_CONTROL], "no-store");
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            "text/html; charset=utf-8"
        );
        let body = body_text(response).await;
        assert!(body.contains(TEXT), "{body}");
        assert!(body.contains(SCRIPT_MARKER), "{body}");
    }

    #[tokio::test]
    async fn test_caching_left_alone_when_enabled() {
        let live_reload = LiveReload::new(LiveReloadOptions {
            disable_caching: false,
            ..LiveReloadOptions::default()
        });
        let response = send(&live_reload, upstream(TEXT, &[]), get("/")).await;

        assert!(!response.headers().contains_key(CACHE_CONTROL));
        let body = body_text(response).await;
        assert!(body.contains(TEXT));
        assert!(body.contains(SCRIPT_MARKER));
    }

    #[tokio::test]
    async fn test_unlabelled_html_gets_script() {
        let body = body_text(send(&live_reload(), upstream(HTML, &[]), get("/")).await).await;
        assert!(body.contains(HTML));
        assert!(body.contains(SCRIPT_MARKER));
        assert!(body.ends_with("</html>\n"), "{body}");
    }

    #[tokio::test]
    async fn test_labelled_text_and_html_get_script() {
        static PLAIN: [(HeaderName, &str); 1] = [(CONTENT_TYPE, "text/plain")];
        static HTML_TYPE: [(HeaderName, &str); 1] = [(CONTENT_TYPE, "text/html")];

        for headers in [&PLAIN, &HTML_TYPE] {
            let response = send(&live_reload(), upstream(TEXT, headers), get("/")).await;
            let body = body_text(response).await;
            assert!(body.contains(TEXT));
            assert!(body.contains(SCRIPT_MARKER));
        }
    }

    #[tokio::test]
    async fn test_other_type_is_unchanged() {
        static HEADERS: [(HeaderName, &str); 1] = [(CONTENT_TYPE, "text/unknown")];
        let response = send(&live_reload(), upstream(TEXT, &HEADERS), get("/")).await;
        assert_eq!(body_text(response).await, TEXT);
    }

    #[tokio::test]
    async fn test_attachment_is_unchanged() {
        static HEADERS: [(HeaderName, &str); 2] = [
            (CONTENT_TYPE, "text/html"),
            (CONTENT_DISPOSITION, "attachment"),
        ];
        let response = send(&live_reload(), upstream(TEXT, &HEADERS), get("/")).await;
        assert_eq!(body_text(response).await, TEXT);
    }

    #[tokio::test]
    async fn test_head_request_is_unchanged() {
        static HEADERS: [(HeaderName, &str); 1] = [(CONTENT_TYPE, "text/html")];
        let req = Request::builder()
            .method(Method::HEAD)
            .uri("/")
            .body(Body::empty())
            .unwrap();
        let response = send(&live_reload(), upstream(HTML, &HEADERS), req).await;
        assert_eq!(body_text(response).await, HTML);
    }

    #[tokio::test]
    async fn test_rewrite_drops_content_length_and_keeps_status() {
        static HEADERS: [(HeaderName, &str); 2] =
            [(CONTENT_TYPE, "text/html"), (CONTENT_LENGTH, "16")];
        let response = send(
            &live_reload(),
            upstream_with_status(StatusCode::NOT_FOUND, HTML, &HEADERS),
            get("/missing"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(!response.headers().contains_key(CONTENT_LENGTH));
        assert_eq!(response.headers()[CONTENT_TYPE], "text/html");
        assert!(body_text(response).await.contains(SCRIPT_MARKER));
    }

    #[tokio::test]
    async fn test_upstream_sees_identity_encoding() {
        let echo = tower::service_fn(|req: Request| async move {
            let encoding = req.headers()[ACCEPT_ENCODING].clone();
            let mut response = Response::new(Body::empty());
            response.headers_mut().insert("x-seen-encoding", encoding);
            Ok::<_, Infallible>(response)
        });
        let req = Request::builder()
            .uri("/")
            .header(ACCEPT_ENCODING, "gzip, br")
            .body(Body::empty())
            .unwrap();

        let response = send(&live_reload(), echo, req).await;
        assert_eq!(response.headers()["x-seen-encoding"], "identity");
    }

    #[tokio::test]
    async fn test_csp_nonce_is_applied() {
        static HEADERS: [(HeaderName, &str); 2] = [
            (CONTENT_TYPE, "text/html"),
            (CONTENT_SECURITY_POLICY, "script-src 'nonce-abc123'"),
        ];
        let response = send(&live_reload(), upstream(HTML, &HEADERS), get("/")).await;
        let body = body_text(response).await;
        assert!(body.contains(r#"<script nonce="abc123">"#), "{body}");
    }

    #[tokio::test]
    async fn test_unpatchable_ok_page_is_server_error() {
        static HEADERS: [(HeaderName, &str); 1] = [(CONTENT_TYPE, "text/html")];
        let response = send(
            &live_reload(),
            upstream("<p>\0</p>", &HEADERS),
            get("/"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(
            body_text(response)
                .await
                .contains("could not insert script into HTML")
        );
    }

    #[tokio::test]
    async fn test_unpatchable_error_page_is_returned_as_is() {
        static HEADERS: [(HeaderName, &str); 1] = [(CONTENT_TYPE, "text/html")];
        let response = send(
            &live_reload(),
            upstream_with_status(StatusCode::BAD_GATEWAY, "<p>\0</p>", &HEADERS),
            get("/"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_text(response).await, "<p>\0</p>");
    }

    #[tokio::test]
    async fn test_failed_upstream_body_is_bad_gateway() {
        for content_type in [Some("text/html"), None] {
            let failing = tower::service_fn(move |_req: Request| async move {
                let chunks = futures_util::stream::iter([
                    Ok(Bytes::from_static(b"<html><head></head><body><p>first half")),
                    Err(std::io::Error::other("upstream reset")),
                ]);
                let mut response = Response::new(Body::from_stream(chunks));
                if let Some(content_type) = content_type {
                    response
                        .headers_mut()
                        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
                }
                Ok::<_, Infallible>(response)
            });

            let response = send(&live_reload(), failing, get("/")).await;

            assert_eq!(response.status(), StatusCode::BAD_GATEWAY, "{content_type:?}");
            assert_eq!(
                body_text(response).await,
                "upstream body failed: upstream reset"
            );
        }
    }

    #[tokio::test]
    async fn test_passthrough_body_is_read_on_demand() {
        const CHUNK: usize = 64 * 1024;
        const CHUNKS: usize = 256;

        for content_type in [Some("video/mp4"), None] {
            let pulled = Arc::new(AtomicUsize::new(0));
            let counting = {
                let pulled = Arc::clone(&pulled);
                tower::service_fn(move |_req: Request| {
                    let pulled = Arc::clone(&pulled);
                    async move {
                        let chunks = futures_util::stream::unfold(0, move |sent| {
                            let pulled = Arc::clone(&pulled);
                            async move {
                                if sent == CHUNKS {
                                    return None;
                                }
                                pulled.fetch_add(1, Ordering::SeqCst);
                                Some((Ok::<_, Infallible>(Bytes::from(vec![0u8; CHUNK])), sent + 1))
                            }
                        });
                        let mut response = Response::new(Body::from_stream(chunks));
                        if let Some(content_type) = content_type {
                            response
                                .headers_mut()
                                .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
                        }
                        Ok::<_, Infallible>(response)
                    }
                })
            };

            let response = send(&live_reload(), counting, get("/movie")).await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(
                pulled.load(Ordering::SeqCst) <= 1,
                "{content_type:?}: {} chunks read before the client asked",
                pulled.load(Ordering::SeqCst)
            );

            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            assert_eq!(body.len(), CHUNK * CHUNKS);
            assert_eq!(pulled.load(Ordering::SeqCst), CHUNKS);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_binary_body_streams_after_sniff_timeout() {
        let slow = tower::service_fn(|_req: Request| async move {
            let first = futures_util::stream::iter([Ok::<_, Infallible>(Bytes::from_static(
                b"\x89PNG\r\n\x1A\n",
            ))]);
            let body = Body::from_stream(first.chain(futures_util::stream::pending()));
            Ok::<_, Infallible>(Response::new(body))
        });
        let live_reload = LiveReload::new(LiveReloadOptions {
            router: RouterConfig {
                sniff_size: 512,
                sniff_duration: Duration::from_millis(100),
            },
            ..LiveReloadOptions::default()
        });
        let start = tokio::time::Instant::now();

        let response = send(&live_reload, slow, get("/image")).await;
        assert!(start.elapsed() >= Duration::from_millis(100));

        let mut body = response.into_body().into_data_stream();
        let first = body.next().await.unwrap().unwrap();
        assert_eq!(first, Bytes::from_static(b"\x89PNG\r\n\x1A\n"));
    }

    #[tokio::test]
    async fn test_event_path_rejects_other_methods() {
        let req = Request::builder()
            .method(Method::PUT)
            .uri("/livereloadevents")
            .body(Body::empty())
            .unwrap();
        let response = send(&live_reload(), upstream(TEXT, &[]), req).await;

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body_text(response).await, r#"method not allowed: "PUT""#);
    }

    #[tokio::test]
    async fn test_no_event_without_reload() {
        let response = send(&live_reload(), upstream(TEXT, &[]), get("/livereloadevents")).await;
        let mut body = response.into_body().into_data_stream();

        let next = tokio::time::timeout(Duration::from_millis(100), body.next()).await;
        assert!(next.is_err(), "got event where none was expected");
    }

    #[tokio::test]
    async fn test_reload_reaches_stream() {
        let live_reload = live_reload();
        let response = send(&live_reload, upstream(TEXT, &[]), get("/livereloadevents")).await;
        assert_eq!(response.headers()[CONTENT_TYPE], "text/event-stream");
        let mut body = response.into_body().into_data_stream();

        assert_eq!(live_reload.reload().await, 1);

        let frame = body.next().await.unwrap().unwrap();
        assert_eq!(frame, Bytes::from_static(b"event: message\ndata: reload\n\n"));
    }

    #[tokio::test]
    async fn test_post_triggers_reload() {
        let live_reload = live_reload();
        let stream = send(&live_reload, upstream(TEXT, &[]), get("/livereloadevents")).await;
        let mut body = stream.into_body().into_data_stream();

        let post = Request::builder()
            .method(Method::POST)
            .uri("/livereloadevents")
            .body(Body::empty())
            .unwrap();
        let response = send(&live_reload, upstream(TEXT, &[]), post).await;
        assert_eq!(response.status(), StatusCode::OK);

        let frame = body.next().await.unwrap().unwrap();
        assert_eq!(frame, Bytes::from_static(b"event: message\ndata: reload\n\n"));
    }

    #[tokio::test]
    async fn test_custom_event_path() {
        let live_reload = LiveReload::new(LiveReloadOptions {
            event_path: "/myEventPath".to_owned(),
            ..LiveReloadOptions::default()
        });
        let stream = send(&live_reload, upstream(TEXT, &[]), get("/myEventPath")).await;
        let mut body = stream.into_body().into_data_stream();
        live_reload.reload().await;

        let frame = body.next().await.unwrap().unwrap();
        assert_eq!(frame, Bytes::from_static(b"event: message\ndata: reload\n\n"));

        let page = send(&live_reload, upstream(TEXT, &[]), get("/livereloadevents")).await;
        let page = body_text(page).await;
        assert!(page.contains(r#"new EventSource("/myEventPath")"#), "{page}");
    }

    #[tokio::test]
    async fn test_close_ends_open_streams() {
        let live_reload = live_reload();
        let stream = send(&live_reload, upstream(TEXT, &[]), get("/livereloadevents")).await;
        assert_eq!(live_reload.client_count(), 1);

        live_reload.close();

        assert_eq!(body_text(stream).await, "");
    }
}
