//! Dispatcher message types.
//!
//! Every frame exchanged with the dispatcher is a single flat JSON object.
//! Inbound requests carry an `action` tag and a `requestId`; outbound
//! responses carry the same `requestId` so the dispatcher can match them to
//! its pending requests.
//!
//! ```json
//! {"action":"launchplan","requestId":"17","planName":"Proj_Build","objectSpec":"br:/main/task42@repo","comment":"","properties":{"branch":"main"}}
//! {"requestId":"17","value":"1045"}
//! ```
//!
//! Inbound requests are modelled as serde structs and decoded strictly by
//! [`crate::protocol::codec`].  Outbound responses are modelled as the
//! [`PlugResponse`] enum and only turned into JSON at the send site.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::protocol::codec;

/// Action tag of a build launch request.
pub const ACTION_LAUNCH_PLAN: &str = "launchplan";
/// Action tag of a build status request.
pub const ACTION_GET_STATUS: &str = "getstatus";
/// Action tag of the credential message sent right after connecting.
pub const ACTION_LOGIN: &str = "login";
/// Action tag of the registration message sent right after login.
pub const ACTION_REGISTER: &str = "register";

// ── Inbound requests ──────────────────────────────────────────────────────────

/// The action resolved from an inbound envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Queue a build for a plan.
    LaunchPlan,
    /// Report the progress of a previously queued build.
    GetStatus,
    /// Any other tag, including the empty tag produced for malformed frames.
    Unsupported(String),
}

impl Action {
    /// Maps an already-normalised (lower-case) action tag to an [`Action`].
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            ACTION_LAUNCH_PLAN => Self::LaunchPlan,
            ACTION_GET_STATUS => Self::GetStatus,
            other => Self::Unsupported(other.to_string()),
        }
    }

    /// Returns the wire tag for this action.
    pub fn tag(&self) -> &str {
        match self {
            Self::LaunchPlan => ACTION_LAUNCH_PLAN,
            Self::GetStatus => ACTION_GET_STATUS,
            Self::Unsupported(tag) => tag,
        }
    }
}

/// A `launchplan` request: queue a build of `plan_name` for `object_spec`.
///
/// `plan_name` and `object_spec` are required.  `comment` and `properties`
/// fall back to empty values when absent or `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchPlanRequest {
    /// TeamCity build configuration id (the "plan").
    pub plan_name: String,

    /// Source-control update specification, passed through untouched as a
    /// build parameter (e.g. `br:/main/scm003@repo@server:8087`).
    pub object_spec: String,

    /// Free text attached to the queued build.
    #[serde(default, deserialize_with = "null_as_default")]
    pub comment: String,

    /// Extra build parameters.
    ///
    /// Stored as a `BTreeMap` so the parameters are always emitted in the
    /// same order, which keeps the outgoing XML stable.  Entries whose value
    /// is `null` are dropped on the way in.
    #[serde(default, deserialize_with = "null_values_dropped")]
    pub properties: BTreeMap<String, String>,
}

/// A `getstatus` request for a previously queued build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetStatusRequest {
    /// Plan the build belongs to.  Informational only; TeamCity resolves the
    /// build from `execution_id` alone.
    pub plan_name: String,

    /// Build-queue id returned by an earlier `launchplan`.
    pub execution_id: String,
}

/// Deserializes an optional field, turning an explicit JSON `null` into the
/// type's default value.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Deserializes a string map that may itself be `null` and may hold `null`
/// values; both are skipped rather than rejected.
fn null_values_dropped<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Option::<BTreeMap<String, Option<String>>>::deserialize(deserializer)?;
    Ok(entries
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| value.map(|value| (key, value)))
        .collect())
}

// ── Outbound responses ────────────────────────────────────────────────────────

/// A response to one inbound request.
///
/// Every variant carries the `request_id` of the request it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlugResponse {
    /// Result of a `launchplan`.  `build_id` is empty when TeamCity refused
    /// the submission.
    LaunchPlan { request_id: String, build_id: String },

    /// Result of a `getstatus`.
    Status {
        request_id: String,
        is_finished: bool,
        succeeded: bool,
        explanation: String,
    },

    /// The request could not be handled.
    Error { request_id: String, message: String },
}

impl PlugResponse {
    /// Returns the correlation token this response answers.
    pub fn request_id(&self) -> &str {
        match self {
            Self::LaunchPlan { request_id, .. }
            | Self::Status { request_id, .. }
            | Self::Error { request_id, .. } => request_id,
        }
    }

    /// Returns `true` for [`PlugResponse::Error`].
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Encodes the response as a flat JSON object ready to be sent.
    pub fn encode(&self) -> String {
        match self {
            Self::LaunchPlan {
                request_id,
                build_id,
            } => codec::encode_launch_plan_response(request_id, build_id),
            Self::Status {
                request_id,
                is_finished,
                succeeded,
                explanation,
            } => codec::encode_status_response(request_id, *is_finished, *succeeded, explanation),
            Self::Error {
                request_id,
                message,
            } => codec::encode_error_response(request_id, message),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
