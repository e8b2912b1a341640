//! Per-connection identity of the plug.

use std::fmt;

use crate::protocol::codec::{encode_login, encode_register};

/// Kind identifier every CI plug announces when registering.
pub const CI_PLUG_KIND: &str = "ciPlug";

/// Identity used for the login/registration handshake.
///
/// A session lives for exactly one connection attempt: the connection manager
/// builds a fresh one each time it dials the dispatcher, so nothing from a
/// previous connection leaks into the next.
#[derive(Clone, PartialEq, Eq)]
pub struct PlugSession {
    pub name: String,
    pub api_key: String,
    pub kind: String,
}

impl PlugSession {
    /// Creates a CI plug session.
    pub fn new(name: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_key: api_key.into(),
            kind: CI_PLUG_KIND.to_string(),
        }
    }

    /// First frame of the handshake: the API key.
    pub fn login_message(&self) -> String {
        encode_login(&self.api_key)
    }

    /// Second frame of the handshake: name and kind.
    pub fn register_message(&self) -> String {
        encode_register(&self.name, &self.kind)
    }
}

// Hand-written so the API key never ends up in logs.
impl fmt::Debug for PlugSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlugSession")
            .field("name", &self.name)
            .field("api_key", &"<redacted>")
            .field("kind", &self.kind)
            .finish()
    }
}
