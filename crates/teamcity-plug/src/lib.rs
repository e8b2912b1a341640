//! teamcity-plug library crate.
//!
//! Connects a WebSocket job dispatcher to the TeamCity build queue: the
//! dispatcher asks the plug to launch plans and to report their status, and
//! the plug turns those requests into TeamCity REST calls.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher (JSON over WebSocket)
//!         ↕
//! [teamcity-plug]
//!   ├── domain/            Pure types: PlugConfig, DispatcherConfig, TeamCityConfig
//!   ├── application/       RequestDispatcher, BuildService seam
//!   └── infrastructure/
//!         ├── dispatcher_conn/  Connection manager (tokio-tungstenite)
//!         ├── teamcity/         REST/XML client (reqwest, quick-xml)
//!         ├── tls/              Dispatcher TLS policy (rustls)
//!         └── config_file/      TOML configuration
//!         ↕
//! TeamCity (XML over HTTP)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `plug-core` only; remote calls go
//!   through the [`application::BuildService`] trait.
//! - `infrastructure` depends on all other layers plus the network stack.

/// Domain layer: configuration types (no I/O).
pub mod domain;

/// Application layer: request routing and the build-service seam.
pub mod application;

/// Infrastructure layer: dispatcher connection, TeamCity client, config file.
pub mod infrastructure;
