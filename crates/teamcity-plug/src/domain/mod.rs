//! Domain layer for teamcity-plug.
//!
//! Holds the runtime configuration structures.  They are plain data: no
//! environment reads, no file I/O.  `main.rs` and
//! [`crate::infrastructure::config_file`] are responsible for filling them in
//! from the command line and the configuration file.
//!
//! The envelope messages and the build-status mapping live in `plug-core`,
//! which this crate shares with its tests.

pub mod config;

pub use config::{DispatcherConfig, PlugConfig, TeamCityConfig};
