//! Settings the client core consumes. Loading them from disk is the caller's
//! business; these types only describe and validate them.
//!
//! ```toml
//! [gopher]
//! default_server = "gopher://gopher.floodgap.com"
//! timeout = 30
//! use_ssl = false
//! # use_ipv6 = true        # leave unset to try every address
//! # tls_ca_file = "~/ca.pem"
//!
//! [cache]
//! enabled = true
//! directory = "~/.cache/gopher-client"
//! max_size_mb = 100
//! expiration_hours = 24
//!
//! [logging]
//! level = "info"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct GopherConfig {
    pub gopher: NetworkConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkConfig {
    pub default_server: String,
    /// Seconds.
    pub timeout: u64,
    /// Force TLS even for `gopher://` URLs.
    pub use_ssl: bool,
    pub use_ipv6: Option<bool>,
    pub tls_ca_file: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            default_server: "gopher://gopher.floodgap.com".to_string(),
            timeout: 30,
            use_ssl: false,
            use_ipv6: None,
            tls_ca_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub directory: String,
    pub max_size_mb: u64,
    pub expiration_hours: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            directory: "~/.cache/gopher-client".to_string(),
            max_size_mb: 100,
            expiration_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
        }
    }
}

impl GopherConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gopher.timeout == 0 {
            return Err(ConfigError::Invalid {
                field: "gopher.timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.cache.max_size_mb == 0 {
            return Err(ConfigError::Invalid {
                field: "cache.max_size_mb",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.cache.expiration_hours == 0 {
            return Err(ConfigError::Invalid {
                field: "cache.expiration_hours",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.cache.enabled && self.cache.directory.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "cache.directory",
                reason: "must not be empty when the cache is enabled".to_string(),
            });
        }
        Ok(())
    }
}

impl NetworkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn tls_ca_path(&self) -> Option<PathBuf> {
        self.tls_ca_file.as_deref().map(expand_home)
    }
}

impl CacheConfig {
    pub fn directory(&self) -> PathBuf {
        expand_home(&self.directory)
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn expiration(&self) -> Duration {
        Duration::from_secs(self.expiration_hours.saturating_mul(3600))
    }
}

/// Expand a leading `~` against `$HOME`. Left as-is when `HOME` is unset.
pub fn expand_home(path: &str) -> PathBuf {
    let rest = if path == "~" {
        Some("")
    } else {
        path.strip_prefix("~/")
    };
    match (rest, std::env::var("HOME")) {
        (Some(rest), Ok(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}
