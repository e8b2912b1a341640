//! TOML configuration file for the TeamCity side of the plug.
//!
//! ```toml
//! server_url = "https://teamcity.example.com"
//! user = "bot"
//! password = "secret"
//! request_timeout_secs = 30      # optional
//! accept_invalid_certs = false   # optional
//! ```
//!
//! The file is read once at startup.  Any problem with it is fatal: the plug
//! cannot do anything useful without TeamCity credentials.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::config::DEFAULT_REQUEST_TIMEOUT;
use crate::domain::TeamCityConfig;

/// Error type for configuration file loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A required field is absent or empty.
    #[error("config field '{0}' is missing or empty")]
    MissingField(&'static str),

    /// `server_url` is not an absolute `http(s)` URL.
    #[error("config field 'server_url' is not an http(s) URL: {0}")]
    InvalidUrl(String),
}

/// On-disk schema.  Required fields are `Option` so that an absent field
/// and an empty one produce the same [`ConfigError::MissingField`].
#[derive(Debug, Deserialize)]
struct ConfigFile {
    server_url: Option<String>,
    user: Option<String>,
    password: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    request_timeout_secs: u64,
    #[serde(default)]
    accept_invalid_certs: bool,
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

/// Reads and validates the configuration file at `path`.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read, and otherwise the
/// errors of [`parse_config`].
pub fn load_config(path: &Path) -> Result<TeamCityConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&text)
}

/// Parses and validates configuration text.
///
/// # Errors
///
/// - [`ConfigError::Parse`] for invalid TOML or mistyped values.
/// - [`ConfigError::MissingField`] when `server_url`, `user` or `password`
///   is absent or blank.
/// - [`ConfigError::InvalidUrl`] when `server_url` is not `http://` or
///   `https://`.
pub fn parse_config(text: &str) -> Result<TeamCityConfig, ConfigError> {
    let file: ConfigFile = toml::from_str(text)?;

    let server_url = required("server_url", file.server_url)?;
    let user = required("user", file.user)?;
    let password = required("password", file.password)?;

    let lower = server_url.to_ascii_lowercase();
    let has_host = lower
        .split_once("://")
        .is_some_and(|(_, rest)| !rest.is_empty());
    if !(lower.starts_with("http://") || lower.starts_with("https://")) || !has_host {
        return Err(ConfigError::InvalidUrl(server_url));
    }

    let mut config = TeamCityConfig::new(server_url, user, password);
    config.request_timeout = Duration::from_secs(file.request_timeout_secs);
    config.accept_invalid_certs = file.accept_invalid_certs;
    Ok(config)
}

fn required(field: &'static str, value: Option<String>) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ConfigError::MissingField(field)),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
