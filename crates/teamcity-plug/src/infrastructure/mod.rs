//! Infrastructure layer for teamcity-plug.
//!
//! Everything that touches the network or the file system lives here:
//!
//! - the outbound WebSocket connection to the dispatcher, with its retry loop
//!   and TLS policy;
//! - the TeamCity REST client behind the [`BuildService`] seam;
//! - loading the TOML configuration file.
//!
//! Request routing is the application layer's job; configuration types are
//! defined in the domain layer.
//!
//! [`BuildService`]: crate::application::BuildService

pub mod config_file;
pub mod dispatcher_conn;
pub mod teamcity;
pub mod tls;

pub use config_file::{load_config, ConfigError};
pub use dispatcher_conn::{ConnectionError, ConnectionManager, ConnectionState};
pub use teamcity::TeamCityClient;
