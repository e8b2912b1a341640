//! Domain layer: pure build-status and session types.
//!
//! Nothing here performs I/O.  The TeamCity client produces a [`BuildStatus`]
//! and the dispatcher turns it into a [`StatusReport`]; the connection
//! manager builds a fresh [`PlugSession`] for every connection attempt.

pub mod build;
pub mod session;

pub use build::{BuildStatus, StatusReport};
pub use session::PlugSession;
