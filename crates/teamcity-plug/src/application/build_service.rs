//! The seam between request dispatch and the remote build system.

use std::collections::BTreeMap;

use async_trait::async_trait;
use plug_core::BuildStatus;
use thiserror::Error;

/// Failures of a build-service call that are actual faults.
///
/// A refused submission or an unknown build is *not* an error: those come
/// back as an empty build id or `None` respectively.
#[derive(Debug, Error)]
pub enum BuildServiceError {
    /// The request could not be sent or the response could not be read.
    #[error("build service request failed: {0}")]
    Request(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The request payload could not be serialized.
    #[error("could not encode build request: {0}")]
    Encode(String),

    /// An endpoint URL could not be derived from the configured server URL.
    #[error("invalid build service url: {0}")]
    InvalidUrl(String),
}

/// Remote build orchestration operations used by the dispatcher.
///
/// Implementations must be shareable across concurrently dispatched
/// requests without extra locking.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BuildService: Send + Sync {
    /// Queues a build of `plan_id` and returns the build-queue id.
    ///
    /// Returns an empty string when the service refused the submission.
    async fn queue_build(
        &self,
        plan_id: &str,
        update_spec: &str,
        comment: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<String, BuildServiceError>;

    /// Looks up the status of a queued build.
    ///
    /// Returns `None` when the service does not know the build, including
    /// when `build_id` is blank.
    async fn query_status(&self, build_id: &str) -> Result<Option<BuildStatus>, BuildServiceError>;
}
