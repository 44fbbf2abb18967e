//! Configuration management for the live-reload server.
//!
//! Parses `lr.toml` with serde and discovers it in the current directory or
//! any parent. CLI overrides are applied during load via [`CliSettings`].
//!
//! ## Environment Variable Expansion
//!
//! - `${VAR}` - expands to the value of VAR, errors if unset
//! - `${VAR:-default}` - expands to VAR if set, otherwise uses default
//!
//! Expanded fields: `server.host`, `upstream.proxy`.

mod expand;

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration filename to search for.
const CONFIG_FILENAME: &str = "lr.toml";

/// Default live-reload event path.
pub const DEFAULT_EVENT_PATH: &str = "/livereloadevents";

/// CLI settings that override configuration file values.
///
/// Only `Some` fields override the loaded config.
#[derive(Debug, Default)]
pub struct CliSettings {
    /// Override server host.
    pub host: Option<String>,
    /// Override server port.
    pub port: Option<u16>,
    /// Serve this directory (replaces any configured proxy).
    pub upstream_dir: Option<PathBuf>,
    /// Proxy to this URL (replaces any configured directory).
    pub proxy: Option<String>,
    /// Override the live-reload event path.
    pub event_path: Option<String>,
    /// Override the `Cache-Control: no-store` flag.
    pub disable_caching: Option<bool>,
    /// Watch this directory (enables watching).
    pub watch_dir: Option<PathBuf>,
    /// Override watch enabled flag.
    pub watch_enabled: Option<bool>,
}

/// Application configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Upstream configuration (paths are relative strings from TOML).
    upstream: UpstreamConfigRaw,
    /// Live reload configuration.
    pub live_reload: LiveReloadConfig,
    /// Watcher configuration (paths are relative strings from TOML).
    watch: WatchConfigRaw,

    /// Resolved upstream configuration (set after loading).
    #[serde(skip)]
    pub upstream_resolved: UpstreamConfig,
    /// Resolved watcher configuration (set after loading).
    #[serde(skip)]
    pub watch_resolved: WatchConfig,
    /// Path to the config file (set after loading).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::default_with_base(Path::new("."))
    }
}

/// Server configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host address.
    pub host: String,
    /// Server port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 7979,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct UpstreamConfigRaw {
    dir: Option<String>,
    proxy: Option<String>,
    retry_delay_ms: Option<u64>,
    retry_max_ms: Option<u64>,
}

/// Where responses come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamSource {
    /// Serve static files from a directory.
    Directory(PathBuf),
    /// Reverse-proxy to an HTTP server.
    Proxy(String),
}

/// Resolved upstream configuration.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Response source.
    pub source: UpstreamSource,
    /// Delay between proxy connection attempts.
    pub retry_delay: Duration,
    /// Total time budget for proxy connection attempts.
    pub retry_max: Duration,
}

impl UpstreamConfig {
    const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);
    const DEFAULT_RETRY_MAX: Duration = Duration::from_secs(10);

    fn with_source(source: UpstreamSource) -> Self {
        Self {
            source,
            retry_delay: Self::DEFAULT_RETRY_DELAY,
            retry_max: Self::DEFAULT_RETRY_MAX,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self::with_source(UpstreamSource::Directory(PathBuf::from(".")))
    }
}

/// Live reload configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LiveReloadConfig {
    /// Path serving the event stream and accepting reload requests.
    pub event_path: String,
    /// Send `Cache-Control: no-store` on proxied responses.
    pub disable_caching: bool,
    /// Seconds between keep-alive pings on open event streams.
    pub keep_alive_secs: u64,
    /// Bytes inspected before an unlabelled response is classified.
    pub sniff_size: usize,
    /// Milliseconds to wait for `sniff_size` bytes.
    pub sniff_duration_ms: u64,
}

impl LiveReloadConfig {
    /// Keep-alive interval.
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Sniff timeout.
    #[must_use]
    pub fn sniff_duration(&self) -> Duration {
        Duration::from_millis(self.sniff_duration_ms)
    }
}

impl Default for LiveReloadConfig {
    fn default() -> Self {
        Self {
            event_path: DEFAULT_EVENT_PATH.to_owned(),
            disable_caching: true,
            keep_alive_secs: 10,
            sniff_size: 512,
            sniff_duration_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct WatchConfigRaw {
    enabled: Option<bool>,
    dir: Option<String>,
    patterns: Option<Vec<String>>,
    debounce_ms: Option<u64>,
}

/// Resolved file watcher configuration.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Whether changes trigger reloads.
    pub enabled: bool,
    /// Directory watched recursively.
    pub dir: PathBuf,
    /// Glob patterns, relative to `dir`, of files that trigger reloads.
    pub patterns: Vec<String>,
    /// Quiet period before a changed path is reported.
    pub debounce: Duration,
}

impl WatchConfig {
    fn new(enabled: bool, dir: PathBuf) -> Self {
        Self {
            enabled,
            dir,
            patterns: vec!["**/*".to_owned()],
            debounce: Duration::from_millis(100),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self::new(true, PathBuf::from("."))
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error.
    #[error("Configuration error: {0}")]
    Validation(String),
    /// Environment variable error during expansion.
    #[error("Environment variable error in {field}: {message}")]
    EnvVar {
        /// Config field path (e.g., "`upstream.proxy`").
        field: String,
        /// Error message (e.g., "${`APP_URL`} not set").
        message: String,
    },
}

fn require_non_empty(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

fn require_http_url(url: &str, field: &str) -> Result<(), ConfigError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "{field} must start with http:// or https://"
        )));
    }
    Ok(())
}

fn require_positive(value: u64, field: &str) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Validation(format!(
            "{field} must be greater than 0"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from file with optional CLI settings.
    ///
    /// If `config_path` is provided, loads from that file. Otherwise searches
    /// for `lr.toml` in the current directory and its parents, falling back
    /// to defaults rooted at the current directory.
    ///
    /// CLI settings are applied after path resolution and the result is
    /// validated again.
    ///
    /// # Errors
    ///
    /// Returns error if an explicit `config_path` doesn't exist, parsing
    /// fails, or the merged configuration is invalid.
    pub fn load(
        config_path: Option<&Path>,
        cli_settings: Option<&CliSettings>,
    ) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Self::load_from_file(path)?
        } else if let Some(discovered) = Self::discover_config() {
            Self::load_from_file(&discovered)?
        } else {
            Self::default_with_cwd()
        };

        if let Some(settings) = cli_settings {
            config.apply_cli_settings(settings);
            config.validate()?;
        }

        Ok(config)
    }

    fn apply_cli_settings(&mut self, settings: &CliSettings) {
        if let Some(host) = &settings.host {
            self.server.host.clone_from(host);
        }
        if let Some(port) = settings.port {
            self.server.port = port;
        }
        if let Some(dir) = &settings.upstream_dir {
            self.upstream_resolved.source = UpstreamSource::Directory(dir.clone());
            if self.watch.dir.is_none() {
                self.watch_resolved.dir.clone_from(dir);
            }
        }
        if let Some(proxy) = &settings.proxy {
            self.upstream_resolved.source = UpstreamSource::Proxy(proxy.clone());
        }
        if let Some(event_path) = &settings.event_path {
            self.live_reload.event_path.clone_from(event_path);
        }
        if let Some(disable_caching) = settings.disable_caching {
            self.live_reload.disable_caching = disable_caching;
        }
        if let Some(dir) = &settings.watch_dir {
            self.watch_resolved.dir.clone_from(dir);
            self.watch_resolved.enabled = true;
        }
        if let Some(enabled) = settings.watch_enabled {
            self.watch_resolved.enabled = enabled;
        }
    }

    /// Search for config file in current directory and parents.
    fn discover_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        Self::discover_from(&current)
    }

    fn discover_from(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(CONFIG_FILENAME))
            .find(|candidate| candidate.is_file())
    }

    fn default_with_cwd() -> Self {
        let cwd = std::env::current_dir().unwrap_or_default();
        Self::default_with_base(&cwd)
    }

    /// Create default config with paths relative to given base directory.
    fn default_with_base(base: &Path) -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfigRaw::default(),
            live_reload: LiveReloadConfig::default(),
            watch: WatchConfigRaw::default(),
            upstream_resolved: UpstreamConfig::with_source(UpstreamSource::Directory(
                base.to_path_buf(),
            )),
            watch_resolved: WatchConfig::new(true, base.to_path_buf()),
            config_path: None,
        }
    }

    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        // Expand environment variables before path resolution
        config.expand_env_vars()?;

        let config_dir = path.parent().unwrap_or(Path::new("."));
        config.resolve_paths(config_dir)?;
        config.config_path = Some(path.to_path_buf());

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_upstream()?;
        self.validate_live_reload()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        require_non_empty(&self.server.host, "server.host")?;
        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "server.port cannot be 0".to_owned(),
            ));
        }
        Ok(())
    }

    fn validate_upstream(&self) -> Result<(), ConfigError> {
        if let UpstreamSource::Proxy(url) = &self.upstream_resolved.source {
            require_non_empty(url, "upstream.proxy")?;
            require_http_url(url, "upstream.proxy")?;
        }
        let retry_delay = u64::try_from(self.upstream_resolved.retry_delay.as_millis())
            .unwrap_or(u64::MAX);
        require_positive(retry_delay, "upstream.retry_delay_ms")?;
        Ok(())
    }

    fn validate_live_reload(&self) -> Result<(), ConfigError> {
        if !self.live_reload.event_path.starts_with('/') {
            return Err(ConfigError::Validation(
                "live_reload.event_path must start with /".to_owned(),
            ));
        }
        require_positive(self.live_reload.keep_alive_secs, "live_reload.keep_alive_secs")?;
        Ok(())
    }

    fn expand_env_vars(&mut self) -> Result<(), ConfigError> {
        self.server.host = expand::expand_env(&self.server.host, "server.host")?;
        if let Some(ref proxy) = self.upstream.proxy {
            self.upstream.proxy = Some(expand::expand_env(proxy, "upstream.proxy")?);
        }
        Ok(())
    }

    /// Resolve relative paths against the config directory.
    ///
    /// Rejects configs naming both an upstream directory and a proxy.
    fn resolve_paths(&mut self, config_dir: &Path) -> Result<(), ConfigError> {
        let source = match (&self.upstream.dir, &self.upstream.proxy) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Validation(
                    "upstream.dir and upstream.proxy are mutually exclusive".to_owned(),
                ));
            }
            (_, Some(proxy)) => UpstreamSource::Proxy(proxy.clone()),
            (dir, None) => UpstreamSource::Directory(config_dir.join(dir.as_deref().unwrap_or("."))),
        };

        let mut upstream = UpstreamConfig::with_source(source);
        if let Some(delay) = self.upstream.retry_delay_ms {
            upstream.retry_delay = Duration::from_millis(delay);
        }
        if let Some(max) = self.upstream.retry_max_ms {
            upstream.retry_max = Duration::from_millis(max);
        }

        // Without an explicit directory the watcher follows the served files,
        // or the config directory when proxying.
        let watch_dir = match (&self.watch.dir, &upstream.source) {
            (Some(dir), _) => config_dir.join(dir),
            (None, UpstreamSource::Directory(dir)) => dir.clone(),
            (None, UpstreamSource::Proxy(_)) => config_dir.to_path_buf(),
        };
        let mut watch = WatchConfig::new(self.watch.enabled.unwrap_or(true), watch_dir);
        if let Some(patterns) = &self.watch.patterns {
            watch.patterns.clone_from(patterns);
        }
        if let Some(debounce) = self.watch.debounce_ms {
            watch.debounce = Duration::from_millis(debounce);
        }

        self.upstream_resolved = upstream;
        self.watch_resolved = watch;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(toml: &str, base: &Path) -> Result<Config, ConfigError> {
        let mut config: Config = toml::from_str(toml)?;
        config.expand_env_vars()?;
        config.resolve_paths(base)?;
        config.validate()?;
        Ok(config)
    }

    fn assert_validation_error(result: Result<Config, ConfigError>, expected: &[&str]) {
        let err = result.expect_err("Expected validation to fail");
        assert!(
            matches!(err, ConfigError::Validation(_)),
            "Expected ConfigError::Validation, got {err:?}"
        );
        let msg = err.to_string();
        for s in expected {
            assert!(msg.contains(s), "Expected error to contain '{s}', got: {msg}");
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default_with_base(Path::new("/site"));
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 7979);
        assert_eq!(
            config.upstream_resolved.source,
            UpstreamSource::Directory(PathBuf::from("/site"))
        );
        assert_eq!(config.upstream_resolved.retry_delay, Duration::from_millis(500));
        assert_eq!(config.upstream_resolved.retry_max, Duration::from_secs(10));
        assert_eq!(config.live_reload.event_path, "/livereloadevents");
        assert!(config.live_reload.disable_caching);
        assert_eq!(config.live_reload.keep_alive(), Duration::from_secs(10));
        assert_eq!(config.live_reload.sniff_size, 512);
        assert_eq!(config.live_reload.sniff_duration(), Duration::from_millis(100));
        assert!(config.watch_resolved.enabled);
        assert_eq!(config.watch_resolved.dir, PathBuf::from("/site"));
        assert_eq!(config.watch_resolved.patterns, vec!["**/*".to_owned()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let config = parse(
            r#"
[server]
host = "0.0.0.0"
port = 9000

[upstream]
dir = "public"

[live_reload]
event_path = "/__reload"
disable_caching = false
keep_alive_secs = 30
sniff_size = 1024
sniff_duration_ms = 250

[watch]
dir = "src"
patterns = ["**/*.html", "**/*.css"]
debounce_ms = 50
"#,
            Path::new("/project"),
        )
        .unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(
            config.upstream_resolved.source,
            UpstreamSource::Directory(PathBuf::from("/project/public"))
        );
        assert_eq!(config.live_reload.event_path, "/__reload");
        assert!(!config.live_reload.disable_caching);
        assert_eq!(config.live_reload.keep_alive(), Duration::from_secs(30));
        assert_eq!(config.live_reload.sniff_size, 1024);
        assert_eq!(config.live_reload.sniff_duration(), Duration::from_millis(250));
        assert_eq!(config.watch_resolved.dir, PathBuf::from("/project/src"));
        assert_eq!(
            config.watch_resolved.patterns,
            vec!["**/*.html".to_owned(), "**/*.css".to_owned()]
        );
        assert_eq!(config.watch_resolved.debounce, Duration::from_millis(50));
    }

    #[test]
    fn test_watch_dir_follows_upstream_dir() {
        let config = parse("[upstream]\ndir = \"dist\"\n", Path::new("/project")).unwrap();
        assert_eq!(config.watch_resolved.dir, PathBuf::from("/project/dist"));
    }

    #[test]
    fn test_parse_proxy_upstream() {
        let config = parse(
            r#"
[upstream]
proxy = "http://localhost:3000"
retry_delay_ms = 100
retry_max_ms = 2000
"#,
            Path::new("/project"),
        )
        .unwrap();

        assert_eq!(
            config.upstream_resolved.source,
            UpstreamSource::Proxy("http://localhost:3000".to_owned())
        );
        assert_eq!(config.upstream_resolved.retry_delay, Duration::from_millis(100));
        assert_eq!(config.upstream_resolved.retry_max, Duration::from_secs(2));
        assert_eq!(config.watch_resolved.dir, PathBuf::from("/project"));
    }

    #[test]
    fn test_proxy_env_expansion() {
        // SAFETY: variable name is unique to this test
        unsafe {
            std::env::set_var("LR_CONFIG_APP_PORT", "4000");
        }
        let config = parse(
            "[upstream]\nproxy = \"http://localhost:${LR_CONFIG_APP_PORT}\"\n",
            Path::new("/project"),
        )
        .unwrap();
        assert_eq!(
            config.upstream_resolved.source,
            UpstreamSource::Proxy("http://localhost:4000".to_owned())
        );
        unsafe {
            std::env::remove_var("LR_CONFIG_APP_PORT");
        }
    }

    #[test]
    fn test_dir_and_proxy_are_exclusive() {
        assert_validation_error(
            parse(
                "[upstream]\ndir = \"public\"\nproxy = \"http://localhost:3000\"\n",
                Path::new("/project"),
            ),
            &["upstream.dir", "mutually exclusive"],
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let base = Path::new("/project");
        assert_validation_error(parse("[server]\nhost = \"\"\n", base), &["server.host", "empty"]);
        assert_validation_error(parse("[server]\nport = 0\n", base), &["server.port"]);
        assert_validation_error(
            parse("[upstream]\nproxy = \"ftp://files\"\n", base),
            &["upstream.proxy", "http"],
        );
        assert_validation_error(
            parse("[upstream]\nretry_delay_ms = 0\n", base),
            &["retry_delay_ms"],
        );
        assert_validation_error(
            parse("[live_reload]\nevent_path = \"events\"\n", base),
            &["event_path", "/"],
        );
        assert_validation_error(
            parse("[live_reload]\nkeep_alive_secs = 0\n", base),
            &["keep_alive_secs", "greater than 0"],
        );
    }

    #[test]
    fn test_unknown_type_is_parse_error() {
        let err = parse("[server]\nport = \"high\"\n", Path::new("/")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_cli_settings_override() {
        let mut config = Config::default_with_base(Path::new("/site"));
        config.apply_cli_settings(&CliSettings {
            host: Some("0.0.0.0".to_owned()),
            port: Some(8080),
            proxy: Some("http://localhost:3000".to_owned()),
            event_path: Some("/events".to_owned()),
            disable_caching: Some(false),
            watch_enabled: Some(false),
            ..CliSettings::default()
        });

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(
            config.upstream_resolved.source,
            UpstreamSource::Proxy("http://localhost:3000".to_owned())
        );
        assert_eq!(config.live_reload.event_path, "/events");
        assert!(!config.live_reload.disable_caching);
        assert!(!config.watch_resolved.enabled);
    }

    #[test]
    fn test_cli_upstream_dir_moves_default_watch_dir() {
        let mut config = Config::default_with_base(Path::new("/site"));
        config.apply_cli_settings(&CliSettings {
            upstream_dir: Some(PathBuf::from("/other")),
            ..CliSettings::default()
        });
        assert_eq!(config.watch_resolved.dir, PathBuf::from("/other"));

        config.apply_cli_settings(&CliSettings {
            watch_dir: Some(PathBuf::from("/src")),
            ..CliSettings::default()
        });
        assert_eq!(config.watch_resolved.dir, PathBuf::from("/src"));
        assert!(config.watch_resolved.enabled);
    }

    #[test]
    fn test_load_explicit_missing_file() {
        let err = Config::load(Some(Path::new("/nonexistent/lr.toml")), None).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_load_from_file_resolves_relative_to_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lr.toml");
        std::fs::write(&path, "[upstream]\ndir = \"www\"\n").unwrap();

        let config = Config::load(Some(&path), None).unwrap();

        assert_eq!(config.config_path, Some(path));
        assert_eq!(
            config.upstream_resolved.source,
            UpstreamSource::Directory(dir.path().join("www"))
        );
    }

    #[test]
    fn test_discover_in_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("lr.toml"), "").unwrap();

        assert_eq!(
            Config::discover_from(&nested),
            Some(dir.path().join("lr.toml"))
        );
    }
}
