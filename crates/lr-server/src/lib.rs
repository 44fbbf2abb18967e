//! Live-reload HTTP server.
//!
//! Serves a directory or proxies another HTTP server, inserting a small
//! script into every HTML and plain-text page. The script listens on a
//! server-sent event stream and reloads the page when told to.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::path::PathBuf;
//! use lr_server::{ServerConfig, Upstream, run_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig {
//!         upstream: Upstream::Directory(PathBuf::from("public")),
//!         ..ServerConfig::default()
//!     };
//!
//!     run_server(config).await.unwrap();
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Browser ──HTTP──► TraceLayer
//!                       │
//!                       └─► LiveReloadLayer
//!                               │
//!                               ├─► event path: SSE stream ◄── Broadcast ◄── reload()
//!                               │                                              ▲
//!                               │                               POST / FileWatcher
//!                               │
//!                               └─► upstream (ServeDir or ReverseProxy)
//!                                       │
//!                                       └─► ResponseRouter: passthrough or insert script
//! ```

mod error;
mod live_reload;
mod proxy;
mod watch;

use std::fmt;
use std::future::Future;
use std::path::PathBuf;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

pub use error::ServerError;
pub use live_reload::{LiveReload, LiveReloadLayer, LiveReloadOptions, LiveReloadService};
pub use lr_router::RouterConfig;
pub use proxy::{ProxyError, RetryPolicy, ReverseProxy};
pub use reqwest::Url;
pub use watch::{FileWatcher, WatchOptions};

/// Where responses come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Upstream {
    /// Serve files from a directory.
    Directory(PathBuf),
    /// Forward requests to another HTTP server.
    Proxy(Url),
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory(dir) => write!(f, "{}", dir.display()),
            Self::Proxy(url) => write!(f, "{url}"),
        }
    }
}

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Response source.
    pub upstream: Upstream,
    /// Live reload settings.
    pub live_reload: LiveReloadOptions,
    /// Retry schedule for [`Upstream::Proxy`].
    pub retry: RetryPolicy,
    /// File watching (`None` disables it; reloads then come only from `POST`).
    pub watch: Option<WatchOptions>,
    /// Log every request at info level.
    pub verbose: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 7979,
            upstream: Upstream::Directory(PathBuf::from(".")),
            live_reload: LiveReloadOptions::default(),
            retry: RetryPolicy::default(),
            watch: None,
            verbose: false,
        }
    }
}

/// Run the server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the address cannot be bound, the watcher cannot be
/// started or the proxy client cannot be built.
pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    serve(listener, config, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` completes.
///
/// Open event streams are ended on shutdown so they don't hold it up.
pub async fn serve<F>(
    listener: TcpListener,
    config: ServerConfig,
    shutdown: F,
) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let live_reload = LiveReload::new(config.live_reload.clone());
    let _watcher = config
        .watch
        .clone()
        .map(|options| FileWatcher::start(options, live_reload.clone()))
        .transpose()?;
    let app = build_app(&config, &live_reload)?;

    tracing::info!(
        address = %listener.local_addr()?,
        upstream = %config.upstream,
        event_path = live_reload.event_path(),
        "Starting server"
    );

    let closing = live_reload.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            closing.close();
        })
        .await?;

    Ok(())
}

fn build_app(config: &ServerConfig, live_reload: &LiveReload) -> Result<Router, ServerError> {
    let router = match &config.upstream {
        Upstream::Directory(dir) => Router::new().fallback_service(ServeDir::new(dir)),
        Upstream::Proxy(url) => {
            Router::new().fallback_service(ReverseProxy::new(url.clone(), config.retry)?)
        }
    };

    let level = if config.verbose {
        Level::INFO
    } else {
        Level::DEBUG
    };
    let trace = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(level))
        .on_response(DefaultOnResponse::new().level(level));

    Ok(router.layer(live_reload.layer()).layer(trace))
}

/// Wait for Ctrl-C.
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Could not listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, stopping server...");
}

/// Create server configuration from the `lr.toml` configuration.
///
/// # Errors
///
/// Returns [`ServerError::ProxyUrl`] if the proxy URL does not parse.
pub fn server_config_from_config(
    config: &lr_config::Config,
    verbose: bool,
) -> Result<ServerConfig, ServerError> {
    let upstream = match &config.upstream_resolved.source {
        lr_config::UpstreamSource::Directory(dir) => Upstream::Directory(dir.clone()),
        lr_config::UpstreamSource::Proxy(url) => {
            Upstream::Proxy(Url::parse(url).map_err(|err| ServerError::ProxyUrl {
                url: url.clone(),
                message: err.to_string(),
            })?)
        }
    };

    let live_reload = &config.live_reload;
    let watch = &config.watch_resolved;

    Ok(ServerConfig {
        host: config.server.host.clone(),
        port: config.server.port,
        upstream,
        live_reload: LiveReloadOptions {
            event_path: live_reload.event_path.clone(),
            disable_caching: live_reload.disable_caching,
            keep_alive: live_reload.keep_alive(),
            router: RouterConfig {
                sniff_size: live_reload.sniff_size,
                sniff_duration: live_reload.sniff_duration(),
            },
        },
        retry: RetryPolicy::new(
            config.upstream_resolved.retry_delay,
            config.upstream_resolved.retry_max,
        ),
        watch: watch.enabled.then(|| WatchOptions {
            dir: watch.dir.clone(),
            patterns: watch.patterns.clone(),
            debounce: watch.debounce,
        }),
        verbose,
    })
}
