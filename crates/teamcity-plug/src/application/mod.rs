//! Application layer for teamcity-plug.
//!
//! The application layer decides *what* happens to each dispatcher request;
//! it delegates *how* builds are queued and queried to a [`BuildService`]
//! implementation from the infrastructure layer.
//!
//! # Responsibilities
//!
//! - Resolving the action of an inbound envelope
//! - Routing `launchplan` / `getstatus` to the build service
//! - Turning every failure into a correlated error response
//!
//! # What does NOT belong here?
//!
//! - Sockets, HTTP, XML (that is infrastructure)
//! - Task spawning (the connection manager spawns one task per message)

pub mod build_service;
pub mod dispatch_request;

pub use build_service::{BuildService, BuildServiceError};
pub use dispatch_request::{DispatchError, RequestDispatcher};
