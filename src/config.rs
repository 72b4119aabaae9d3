//! Client configuration parsed from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:8000/api";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const TOKEN_DIR_NAME: &str = "catalog-client";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl ClientTimeouts {
    #[must_use]
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    #[must_use]
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

/// Configuration errors surfaced at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid API base URL {value:?}: {reason}")]
    InvalidBaseUrl { value: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Parsed and normalized base URL, without a trailing `/`.
    pub api_base: String,
    pub token_dir: PathBuf,
    pub timeouts: ClientTimeouts,
    origin: String,
}

impl ClientConfig {
    /// Build typed client config from environment variables.
    ///
    /// Optional:
    /// - `CATALOG_API_BASE`: default `http://127.0.0.1:8000/api`
    /// - `CATALOG_TOKEN_DIR`: default `<config dir>/catalog-client`
    /// - `CATALOG_REQUEST_TIMEOUT_SECS`: default 30
    /// - `CATALOG_CONNECT_TIMEOUT_SECS`: default 10
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] if `CATALOG_API_BASE` is not an
    /// http(s) URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_base = std::env::var("CATALOG_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.into());
        let (api_base, origin) = parse_base(&raw_base)?;
        let token_dir = std::env::var("CATALOG_TOKEN_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_token_dir());
        let timeouts = ClientTimeouts {
            request_secs: env_parse_u64("CATALOG_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: env_parse_u64("CATALOG_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS),
        };
        Ok(Self { api_base, token_dir, timeouts, origin })
    }

    /// Config pointing at an explicit base URL with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] for a malformed base.
    pub fn with_base(api_base: &str, token_dir: PathBuf) -> Result<Self, ConfigError> {
        let (api_base, origin) = parse_base(api_base)?;
        Ok(Self { api_base, token_dir, timeouts: ClientTimeouts::default(), origin })
    }

    /// Apply command-line overrides on top of the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] for a malformed base override.
    pub fn with_overrides(mut self, api_base: Option<&str>, token_dir: Option<PathBuf>) -> Result<Self, ConfigError> {
        if let Some(base) = api_base {
            (self.api_base, self.origin) = parse_base(base)?;
        }
        if let Some(dir) = token_dir {
            self.token_dir = dir;
        }
        Ok(self)
    }

    /// ASCII origin (`scheme://host[:port]`) of the API base, with default
    /// ports elided. Token files are scoped to it.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }
}

/// Parse `raw` into a normalized base URL and its origin.
fn parse_base(raw: &str) -> Result<(String, String), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidBaseUrl { value: raw.to_owned(), reason };
    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme `{}`", url.scheme())));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(invalid("credentials are not allowed in the base URL".into()));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("query and fragment are not allowed in the base URL".into()));
    }
    let origin = url.origin().ascii_serialization();
    let api_base = url.as_str().trim_end_matches('/').to_owned();
    Ok((api_base, origin))
}

fn default_token_dir() -> PathBuf {
    dirs::config_dir().map_or_else(|| PathBuf::from("."), |dir| dir.join(TOKEN_DIR_NAME))
}

fn env_parse_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
