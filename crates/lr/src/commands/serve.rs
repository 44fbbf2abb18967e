//! `lr serve` command implementation.

use std::path::PathBuf;

use clap::Args;
use lr_config::{CliSettings, Config, UpstreamSource};
use lr_server::{run_server, server_config_from_config};

use crate::error::CliError;
use crate::output::Output;

/// Arguments for the serve command.
#[derive(Args)]
pub(crate) struct ServeArgs {
    /// Directory to serve (overrides config).
    #[arg(conflicts_with = "proxy")]
    dir: Option<PathBuf>,

    /// Proxy this URL instead of serving a directory (overrides config).
    #[arg(long, env = "LR_PROXY")]
    proxy: Option<String>,

    /// Path to configuration file (default: auto-discover lr.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind to (overrides config).
    #[arg(short, long)]
    port: Option<u16>,

    /// Path of the reload event stream (overrides config).
    #[arg(long)]
    event_path: Option<String>,

    /// Directory to watch for changes (overrides config).
    #[arg(long)]
    watch: Option<PathBuf>,

    /// Don't watch for changes; reload only on `lr reload`.
    #[arg(long, conflicts_with = "watch")]
    no_watch: bool,

    /// Leave upstream `Cache-Control` headers alone.
    #[arg(long)]
    no_cache_control: bool,

    /// Enable verbose output (log every request).
    #[arg(short, long)]
    pub verbose: bool,
}

impl ServeArgs {
    /// Execute the serve command.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration fails or the server fails to start.
    pub(crate) async fn execute(self) -> Result<(), CliError> {
        let output = Output::new();
        let cli_settings = self.cli_settings();

        let config = Config::load(self.config.as_deref(), Some(&cli_settings))?;
        let server_config = server_config_from_config(&config, self.verbose)?;

        output.highlight(&format!(
            "lr serving on http://{}:{}",
            config.server.host, config.server.port
        ));
        match &config.upstream_resolved.source {
            UpstreamSource::Directory(dir) => output.field("Directory", &dir.display().to_string()),
            UpstreamSource::Proxy(url) => output.field("Proxy", url),
        }
        output.field("Events", &config.live_reload.event_path);
        match &server_config.watch {
            Some(watch) => output.field("Watching", &watch.dir.display().to_string()),
            None => output.field("Watching", "disabled"),
        }
        if let Some(path) = &config.config_path {
            output.field("Config", &path.display().to_string());
        }
        output.info("");

        run_server(server_config).await?;

        Ok(())
    }

    fn cli_settings(&self) -> CliSettings {
        CliSettings {
            host: self.host.clone(),
            port: self.port,
            upstream_dir: self.dir.clone(),
            proxy: self.proxy.clone(),
            event_path: self.event_path.clone(),
            disable_caching: self.no_cache_control.then_some(false),
            watch_dir: self.watch.clone(),
            watch_enabled: self.no_watch.then_some(false),
        }
    }
}
