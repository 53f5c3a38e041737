//! Client configuration.
//!
//! Configuration is an explicit value owned by each client; nothing is
//! process-global. [`ClientConfig::load`] layers three sources, later ones
//! winning:
//!
//! 1. Built-in defaults
//! 2. `<user config dir>/aurorawatch/config.ini`, section `[aurorawatch]`
//! 3. `AURORAWATCH_*` environment variables
//!
//! ```ini
//! [aurorawatch]
//! cache_dir = /var/cache/aurorawatch
//! base_url = https://aurorawatch-api.lancs.ac.uk/0.2/
//! lang = en
//! user_agent = my-aurora-lamp/1.0
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::TimeDelta;
use ini::Ini;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Default API location.
pub const DEFAULT_BASE_URL: &str = "http://aurorawatch-api.lancs.ac.uk/0.2/";

/// Color reported by `status_color` when the status is unknown.
pub const DEFAULT_UNKNOWN_STATUS_COLOR: &str = "#777777";

/// Expiry applied when the server sends no cache directive.
pub const DEFAULT_TTL_SECS: i64 = 180;

/// Shortest expiry applied when the server sends no cache directive.
pub const MIN_DEFAULT_TTL_SECS: i64 = 60;

/// Longest time any document is cached for.
pub const MAX_CACHE_SECS: i64 = 86_400;

/// Default request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Section and directory name used for configuration and cache files.
pub const APP_NAME: &str = "aurorawatch";

/// Configuration for one client instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// API base URL. Always ends with `/`.
    pub base_url: String,

    /// Language for descriptions and messages.
    pub lang: String,

    /// When false, the convenience reads (`status_level`, `status_color`, ...)
    /// report "unknown" instead of failing. Direct resource reads always fail.
    pub raise_on_error: bool,

    /// Color reported by `status_color` when the status is unknown.
    pub unknown_status_color: String,

    /// `User-Agent` sent with every request.
    pub user_agent: String,

    /// Optional `Referer` sent with every request.
    pub referer: Option<String>,

    pub request_timeout: Duration,

    /// Share fetched documents with other processes through the disk cache.
    pub use_disk_cache: bool,

    /// Override for the disk cache location.
    pub cache_dir: Option<PathBuf>,

    /// Expiry applied when the server omits one. Clamped to between one
    /// minute and one day.
    pub default_ttl: TimeDelta,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            lang: "en".to_string(),
            raise_on_error: true,
            unknown_status_color: DEFAULT_UNKNOWN_STATUS_COLOR.to_string(),
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
            referer: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            use_disk_cache: true,
            cache_dir: None,
            default_ttl: TimeDelta::seconds(DEFAULT_TTL_SECS),
        }
    }
}

impl ClientConfig {
    /// Load configuration from the user config file and environment.
    pub fn load() -> Result<Self> {
        let mut config = match config_file_path() {
            Some(path) => Self::load_from(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load configuration from a specific INI file.
    ///
    /// A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::default();
        if !path.exists() {
            debug!(path = %path.display(), "No config file");
            return Ok(config);
        }

        let ini = Ini::load_from_file(path)
            .map_err(|e| Error::Config(format!("could not read {}: {e}", path.display())))?;
        debug!(path = %path.display(), "Read config file");

        if let Some(section) = ini.section(Some(APP_NAME)) {
            config.apply_overrides(|key| {
                let name = key.strip_prefix("AURORAWATCH_")?.to_ascii_lowercase();
                section.get(&name).map(str::to_string)
            })?;
        } else {
            warn!(path = %path.display(), "Config file has no [{}] section", APP_NAME);
        }

        Ok(config)
    }

    /// Apply `AURORAWATCH_*` style overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("AURORAWATCH_BASE_URL") {
            self.base_url = url;
        }
        if let Some(lang) = lookup("AURORAWATCH_LANG") {
            self.lang = lang;
        }
        if let Some(agent) = lookup("AURORAWATCH_USER_AGENT") {
            self.user_agent = agent;
        }
        if let Some(dir) = lookup("AURORAWATCH_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(value) = lookup("AURORAWATCH_USE_DISK_CACHE") {
            self.use_disk_cache = parse_bool(&value).ok_or_else(|| {
                Error::Config(format!("use_disk_cache must be true or false, got '{value}'"))
            })?;
        }
        self.normalize();
        Ok(())
    }

    /// Enforce the trailing slash on the base URL.
    pub fn normalize(&mut self) {
        if self.base_url.is_empty() {
            self.base_url = DEFAULT_BASE_URL.to_string();
        }
        if !self.base_url.ends_with('/') {
            self.base_url.push('/');
        }
    }

    /// Where the disk cache lives.
    ///
    /// An override must be a non-empty absolute path and must not name an
    /// existing file. Without one, the per-user cache directory is used,
    /// falling back to the per-user config directory.
    pub fn resolve_cache_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            if dir.as_os_str().is_empty() {
                return Err(Error::Config("cache_dir is empty".to_string()));
            }
            if !dir.is_absolute() {
                return Err(Error::Config(format!(
                    "cache_dir must be an absolute path, got '{}'",
                    dir.display()
                )));
            }
            if dir.exists() && !dir.is_dir() {
                return Err(Error::Config(format!(
                    "cache_dir '{}' is not a directory",
                    dir.display()
                )));
            }
            return Ok(dir.clone());
        }

        dirs::cache_dir()
            .or_else(dirs::config_dir)
            .map(|base| base.join(APP_NAME))
            .ok_or_else(|| Error::Config("no per-user cache or config directory".to_string()))
    }
}

/// `<user config dir>/aurorawatch/config.ini`.
pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME).join("config.ini"))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
