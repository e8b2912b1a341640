//! # plug-core
//!
//! Shared library for the TeamCity plug containing the dispatcher envelope
//! protocol and the small set of build-domain types the bridge reasons about.
//!
//! This crate has zero dependencies on sockets, HTTP clients, or async
//! runtimes.  Everything in it is a pure function over strings and plain
//! structs, which keeps the wire contract easy to test in isolation.
//!
//! # Architecture overview
//!
//! The plug sits between two remote systems:
//!
//! - a **dispatcher** that talks JSON over a persistent WebSocket and sends
//!   job-control requests (`launchplan`, `getstatus`), and
//! - a **TeamCity** server that exposes a REST/XML build queue.
//!
//! This crate owns the dispatcher side of that contract:
//!
//! - **`protocol`** – The flat JSON envelope: typed requests decoded from
//!   inbound frames, typed responses encoded into outbound frames, and the
//!   tolerant field readers used to correlate even malformed requests.
//!
//! - **`domain`** – The build status mapping (`finished`/`success` tags to
//!   booleans) and the per-connection session identity used for login and
//!   registration.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `plug_core::PlugResponse` instead of `plug_core::protocol::messages::PlugResponse`.
pub use domain::build::{BuildStatus, StatusReport};
pub use domain::session::PlugSession;
pub use protocol::codec::{decode_action, decode_request_id, CodecError};
pub use protocol::messages::{Action, GetStatusRequest, LaunchPlanRequest, PlugResponse};
