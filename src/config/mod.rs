//! Configuration for the agent.
//!
//! Parses `cachefront.toml` with serde. Every section is optional and falls
//! back to defaults, and CLI flags ([`CliSettings`]) take precedence over file
//! values.
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8787
//!
//! [upstream]
//! origin = "http://127.0.0.1:3000"
//! timeout_secs = 30
//!
//! [cache]
//! name = "v1"
//! dir = ".cachefront"      # omit for an in-memory cache
//!
//! [install]
//! assets = ["/", "/live", "/gallery/myLittleVader.jpg"]
//! fallback = "/gallery/myLittleVader.jpg"
//!
//! [preload]
//! enabled = true
//! ```
//!
//! Relative asset and fallback paths are resolved against `upstream.origin`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

/// Configuration filename looked up in the working directory.
pub const CONFIG_FILENAME: &str = "cachefront.toml";

/// CLI settings that override configuration file values.
///
/// Only `Some` fields override the loaded config.
#[derive(Debug, Default)]
pub struct CliSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub origin: Option<String>,
    pub cache_dir: Option<PathBuf>,
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid URL in {field}: {value:?} ({source})")]
    InvalidUrl {
        field: &'static str,
        value: String,
        #[source]
        source: url::ParseError,
    },

    #[error("configuration error: {0}")]
    Validation(String),
}

/// Application configuration as written in the file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub cache: CacheConfig,
    pub install: InstallConfig,
    pub preload: PreloadConfig,
}

/// Listener configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8787,
        }
    }
}

/// The application the agent fronts.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL for origin-form requests and relative asset paths.
    pub origin: String,
    /// Per-request network timeout.
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            origin: "http://127.0.0.1:3000".to_owned(),
            timeout_secs: 30,
        }
    }
}

/// Cache Store configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Store (version) name written to.
    pub name: String,
    /// Directory for the durable store; `None` keeps entries in memory.
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "v1".to_owned(),
            dir: None,
        }
    }
}

/// Install-time assets.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    pub assets: Vec<String>,
    pub fallback: String,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            assets: vec!["/".to_owned()],
            fallback: "/".to_owned(),
        }
    }
}

/// Navigation preload configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PreloadConfig {
    /// Whether the host offers navigation preload to the worker.
    pub enabled: bool,
    /// Value of the preload marker header.
    pub header_value: String,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            header_value: "true".to_owned(),
        }
    }
}

impl Config {
    /// Load configuration with optional CLI settings.
    ///
    /// If `config_path` is provided it must exist. Otherwise `cachefront.toml`
    /// in the working directory is used when present, and defaults when not.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit path is missing, the file cannot be
    /// read or parsed, or the resulting URLs are invalid.
    pub fn load(
        config_path: Option<&Path>,
        cli_settings: Option<&CliSettings>,
    ) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) if !path.exists() => return Err(ConfigError::NotFound(path.to_path_buf())),
            Some(path) => Self::load_from_file(path)?,
            None => {
                let default_path = Path::new(CONFIG_FILENAME);
                if default_path.exists() {
                    Self::load_from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };

        if let Some(settings) = cli_settings {
            config.apply_cli_settings(settings);
        }

        config.validate()?;
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    fn apply_cli_settings(&mut self, settings: &CliSettings) {
        if let Some(host) = &settings.host {
            self.server.host.clone_from(host);
        }
        if let Some(port) = settings.port {
            self.server.port = port;
        }
        if let Some(origin) = &settings.origin {
            self.upstream.origin.clone_from(origin);
        }
        if let Some(dir) = &settings.cache_dir {
            self.cache.dir = Some(dir.clone());
        }
    }

    /// Checks that every URL resolves and the store name is usable.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.name.is_empty() {
            return Err(ConfigError::Validation("cache.name cannot be empty".into()));
        }
        let origin = self.origin()?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(
                "upstream.origin must start with http:// or https://".into(),
            ));
        }
        self.assets()?;
        self.fallback()?;
        Ok(())
    }

    /// `host:port` for the listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// The parsed upstream origin.
    pub fn origin(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.upstream.origin).map_err(|source| ConfigError::InvalidUrl {
            field: "upstream.origin",
            value: self.upstream.origin.clone(),
            source,
        })
    }

    /// Install assets resolved to absolute URLs, in file order.
    pub fn assets(&self) -> Result<Vec<Url>, ConfigError> {
        let origin = self.origin()?;
        self.install
            .assets
            .iter()
            .map(|asset| resolve(&origin, asset, "install.assets"))
            .collect()
    }

    /// The fallback asset resolved to an absolute URL.
    pub fn fallback(&self) -> Result<Url, ConfigError> {
        resolve(&self.origin()?, &self.install.fallback, "install.fallback")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.timeout_secs)
    }
}

// Absolute URLs pass through; anything else is joined onto the origin.
fn resolve(origin: &Url, value: &str, field: &'static str) -> Result<Url, ConfigError> {
    origin.join(value).map_err(|source| ConfigError::InvalidUrl {
        field,
        value: value.to_owned(),
        source,
    })
}
