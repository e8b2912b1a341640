//! Per-message request routing and error containment.
//!
//! Each inbound frame goes through the same small state machine:
//!
//! ```text
//! Received ─► ActionResolved ─┬─► Handled           ─┐
//!                             ├─► UnsupportedAction ─┼─► ResponseSent
//!                             └─► Failed            ─┘
//! ```
//!
//! The dispatcher is stateless: frames are handled independently and a
//! failure in one of them never leaks into another.  [`RequestDispatcher::process_message`]
//! always produces a [`PlugResponse`] carrying the request id of its frame;
//! the final `ResponseSent` step belongs to the connection manager.

use std::sync::Arc;

use plug_core::protocol::codec::{decode_get_status, decode_launch_plan};
use plug_core::{
    decode_action, decode_request_id, Action, CodecError, GetStatusRequest, LaunchPlanRequest,
    PlugResponse, StatusReport,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::application::build_service::{BuildService, BuildServiceError};

/// Reasons a single request could not be handled.
///
/// The `Display` text of these errors is sent back verbatim in the `error`
/// field of the response.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("The action '{0}' is not supported")]
    UnsupportedAction(String),

    #[error(transparent)]
    Malformed(#[from] CodecError),

    #[error(transparent)]
    RemoteCall(#[from] BuildServiceError),
}

/// Routes dispatcher requests to a [`BuildService`].
///
/// Cloning is cheap; all clones share the same service handle.
#[derive(Clone)]
pub struct RequestDispatcher {
    service: Arc<dyn BuildService>,
}

impl RequestDispatcher {
    pub fn new(service: Arc<dyn BuildService>) -> Self {
        Self { service }
    }

    /// Handles one raw inbound frame and returns the response to send back.
    ///
    /// Never fails: decoding errors, unknown actions and remote failures are
    /// all converted to [`PlugResponse::Error`] with the frame's request id
    /// (empty if the frame was unreadable).
    pub async fn process_message(&self, raw: &str) -> PlugResponse {
        let request_id = decode_request_id(raw);
        let action = Action::from_tag(&decode_action(raw));

        debug!("request {request_id:?}: action {:?}", action.tag());

        match self.handle(&action, &request_id, raw).await {
            Ok(response) => response,
            Err(e) => {
                error!(
                    "error processing message {:?} (request {request_id:?}): {e}",
                    action.tag()
                );
                debug!("offending message: {raw}");
                PlugResponse::Error {
                    request_id,
                    message: e.to_string(),
                }
            }
        }
    }

    async fn handle(
        &self,
        action: &Action,
        request_id: &str,
        raw: &str,
    ) -> Result<PlugResponse, DispatchError> {
        match action {
            Action::LaunchPlan => {
                let request = decode_launch_plan(raw)?;
                self.launch_plan(request_id, request).await
            }
            Action::GetStatus => {
                let request = decode_get_status(raw)?;
                Ok(self.get_status(request_id, request).await)
            }
            Action::Unsupported(tag) => Err(DispatchError::UnsupportedAction(tag.clone())),
        }
    }

    async fn launch_plan(
        &self,
        request_id: &str,
        request: LaunchPlanRequest,
    ) -> Result<PlugResponse, DispatchError> {
        log_launch_plan(&request);

        let build_id = self
            .service
            .queue_build(
                &request.plan_name,
                &request.object_spec,
                &request.comment,
                &request.properties,
            )
            .await?;

        if build_id.is_empty() {
            warn!(
                "plan {} was not queued; replying with an empty build id",
                request.plan_name
            );
        } else {
            info!("plan {} queued as build {build_id}", request.plan_name);
        }

        Ok(PlugResponse::LaunchPlan {
            request_id: request_id.to_string(),
            build_id,
        })
    }

    /// A failed lookup is answered like an unknown build, never as an error.
    async fn get_status(&self, request_id: &str, request: GetStatusRequest) -> PlugResponse {
        info!(
            "plan status requested: plan={} execution_id={}",
            request.plan_name, request.execution_id
        );

        let status = match self.service.query_status(&request.execution_id).await {
            Ok(status) => status,
            Err(e) => {
                warn!("status query for build {} failed: {e}", request.execution_id);
                None
            }
        };

        let report = StatusReport::from_status(status.as_ref());

        PlugResponse::Status {
            request_id: request_id.to_string(),
            is_finished: report.is_finished,
            succeeded: report.succeeded,
            explanation: report.explanation,
        }
    }
}

fn log_launch_plan(request: &LaunchPlanRequest) {
    info!(
        "launch plan requested: plan={} object_spec={} comment={:?}",
        request.plan_name, request.object_spec, request.comment
    );
    for (key, value) in &request.properties {
        info!("\tproperty {key}: {value}");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
