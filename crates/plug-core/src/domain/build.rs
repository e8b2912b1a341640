//! Build status as reported by TeamCity, and its mapping to the dispatcher's
//! `isFinished` / `succeeded` booleans.
//!
//! TeamCity reports two independent open-ended tags for a queued build:
//!
//! | tag        | TeamCity attribute | examples                          |
//! |------------|--------------------|-----------------------------------|
//! | `progress` | `state`            | `queued`, `running`, `finished`   |
//! | `result`   | `status`           | `SUCCESS`, `FAILURE`, `UNKNOWN`   |
//!
//! Both are compared case-insensitively and unknown values are never an
//! error: they simply map to "not finished" / "not succeeded".

/// Progress tag TeamCity uses once a build has completed.
pub const FINISHED_PROGRESS: &str = "finished";

/// Result tag TeamCity uses for a successful build.
pub const SUCCESS_RESULT: &str = "success";

/// Explanation sent when the status of a build cannot be resolved.
pub const UNKNOWN_ID_EXPLANATION: &str = "unknown id";

/// A snapshot of a queued build's progress, read on demand and never cached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStatus {
    /// Value of the `state` attribute, or empty when absent.
    pub progress: String,
    /// Value of the `status` attribute, or empty when absent.
    pub result: String,
}

impl BuildStatus {
    pub fn new(progress: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            progress: progress.into(),
            result: result.into(),
        }
    }

    /// `true` iff the progress tag is `finished` (any case).
    pub fn is_finished(&self) -> bool {
        self.progress.eq_ignore_ascii_case(FINISHED_PROGRESS)
    }

    /// `true` iff the result tag is `success` (any case).
    pub fn succeeded(&self) -> bool {
        self.result.eq_ignore_ascii_case(SUCCESS_RESULT)
    }
}

/// The three status fields sent back to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub is_finished: bool,
    pub succeeded: bool,
    /// Always empty for resolved builds: the TeamCity queue API exposes no
    /// human-readable reason.
    pub explanation: String,
}

impl StatusReport {
    /// Maps a status lookup to the report sent to the dispatcher.
    ///
    /// An unresolvable build (`None`) is reported as a *finished failure*
    /// with the explanation `"unknown id"`, so the dispatcher never waits on
    /// it forever.
    pub fn from_status(status: Option<&BuildStatus>) -> Self {
        match status {
            Some(status) => Self {
                is_finished: status.is_finished(),
                succeeded: status.succeeded(),
                explanation: String::new(),
            },
            None => Self::unknown_id(),
        }
    }

    /// Report for a build id the service could not resolve.
    pub fn unknown_id() -> Self {
        Self {
            is_finished: true,
            succeeded: false,
            explanation: UNKNOWN_ID_EXPLANATION.to_string(),
        }
    }
}
