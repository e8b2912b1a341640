//! Plug configuration types.
//!
//! [`PlugConfig`] is the single source of truth for all runtime settings.  It
//! is split in two halves matching the two remote systems the plug talks to:
//!
//! - [`DispatcherConfig`]: where the WebSocket dispatcher lives and how this
//!   plug identifies itself (from the command line).
//! - [`TeamCityConfig`]: where TeamCity lives and which credentials to use
//!   (from the configuration file).
//!
//! Both are built once at startup and then shared read-only.

use std::fmt;
use std::time::Duration;

use plug_core::PlugSession;

/// Delay between two dispatcher connection attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound on a single TeamCity HTTP call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// All runtime configuration for the plug.
#[derive(Debug, Clone)]
pub struct PlugConfig {
    pub dispatcher: DispatcherConfig,
    pub teamcity: TeamCityConfig,
}

/// Settings for the persistent dispatcher connection.
#[derive(Clone)]
pub struct DispatcherConfig {
    /// WebSocket endpoint of the dispatcher (`ws://` or `wss://`).
    pub url: String,

    /// Name this plug registers under.
    pub plug_name: String,

    /// Key sent in the login message.
    pub api_key: String,

    /// Fixed delay before retrying a failed or dropped connection.
    ///
    /// There is no backoff and no retry limit: the plug is a long-running
    /// background service and keeps dialing until it gets through.
    pub retry_interval: Duration,
}

impl DispatcherConfig {
    /// Creates a config with the default retry interval.
    pub fn new(
        url: impl Into<String>,
        plug_name: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            plug_name: plug_name.into(),
            api_key: api_key.into(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Builds the identity for one connection attempt.
    pub fn session(&self) -> PlugSession {
        PlugSession::new(self.plug_name.clone(), self.api_key.clone())
    }
}

impl fmt::Debug for DispatcherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatcherConfig")
            .field("url", &self.url)
            .field("plug_name", &self.plug_name)
            .field("api_key", &"<redacted>")
            .field("retry_interval", &self.retry_interval)
            .finish()
    }
}

/// Settings for the TeamCity REST client.
#[derive(Clone)]
pub struct TeamCityConfig {
    /// Root URL of the TeamCity server, e.g. `https://teamcity.example.com/`.
    pub server_url: String,

    /// HTTP Basic user.
    pub user: String,

    /// HTTP Basic password.
    pub password: String,

    /// Per-call timeout applied to every REST request.
    pub request_timeout: Duration,

    /// Accept self-signed or otherwise invalid TeamCity certificates.
    pub accept_invalid_certs: bool,
}

impl TeamCityConfig {
    /// Creates a config with the default timeout and strict certificate checks.
    pub fn new(
        server_url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            user: user.into(),
            password: password.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            accept_invalid_certs: false,
        }
    }
}

impl fmt::Debug for TeamCityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TeamCityConfig")
            .field("server_url", &self.server_url)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
