//! TeamCity REST client.
//!
//! Three calls against the build queue are all the plug needs:
//!
//! | call                 | HTTP                              |
//! |----------------------|-----------------------------------|
//! | `check_connection`   | `GET  <server>/httpAuth/app/rest/buildQueue` |
//! | `queue_build`        | `POST <server>/httpAuth/app/rest/buildQueue` |
//! | `query_status`       | `GET  <server>/httpAuth/app/rest/buildQueue/<id>` |
//!
//! Every request carries HTTP Basic credentials and `Accept: application/xml`
//! and is bounded by the configured per-call timeout.  The underlying
//! `reqwest::Client` is immutable after construction and pools connections
//! internally, so one [`TeamCityClient`] is shared by all in-flight requests.

pub mod xml;

use std::collections::BTreeMap;

use async_trait::async_trait;
use plug_core::BuildStatus;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, ORIGIN};
use reqwest::{Response, Url};
use tracing::{debug, error, info, warn};

use crate::application::{BuildService, BuildServiceError};
use crate::domain::TeamCityConfig;

/// Build-queue endpoint, relative to the server root.
const QUEUE_BUILD_PATH: &str = "httpAuth/app/rest/buildQueue";

const XML_CONTENT_TYPE: &str = "application/xml";

/// [`BuildService`] backed by the TeamCity build-queue REST API.
pub struct TeamCityClient {
    http: reqwest::Client,
    base_url: Url,
    queue_url: Url,
    user: String,
    password: String,
}

impl TeamCityClient {
    /// Builds a client for the server described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`BuildServiceError::InvalidUrl`] if `server_url` is not an
    /// absolute URL, or [`BuildServiceError::Request`] if the HTTP client
    /// cannot be initialised.
    pub fn new(config: &TeamCityConfig) -> Result<Self, BuildServiceError> {
        let base_url = normalize_base_url(&config.server_url)?;
        let queue_url = base_url
            .join(QUEUE_BUILD_PATH)
            .map_err(|e| BuildServiceError::InvalidUrl(format!("{base_url}: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(XML_CONTENT_TYPE));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(request_error)?;

        Ok(Self {
            http,
            base_url,
            queue_url,
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    /// The server root every endpoint is resolved against (always ends in `/`).
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Checks that the server is reachable and accepts the credentials.
    ///
    /// Used once at startup.  Failures are logged and reported as `false`;
    /// they are never propagated.
    pub async fn check_connection(&self) -> bool {
        match self.get(self.queue_url.clone()).await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(
                    "TeamCity connectivity check against {} returned HTTP {}",
                    self.queue_url,
                    response.status()
                );
                false
            }
            Err(e) => {
                error!(
                    "TeamCity connectivity check against {} failed: {}",
                    self.queue_url,
                    error_chain(&e)
                );
                false
            }
        }
    }

    async fn get(&self, url: Url) -> Result<Response, reqwest::Error> {
        self.http
            .get(url)
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
    }
}

#[async_trait]
impl BuildService for TeamCityClient {
    async fn queue_build(
        &self,
        plan_id: &str,
        update_spec: &str,
        comment: &str,
        properties: &BTreeMap<String, String>,
    ) -> Result<String, BuildServiceError> {
        let body = xml::build_request_xml(plan_id, update_spec, comment, properties)?;
        debug!("queueing build of {plan_id}: {body}");

        let response = self
            .http
            .post(self.queue_url.clone())
            .basic_auth(&self.user, Some(&self.password))
            .header(CONTENT_TYPE, XML_CONTENT_TYPE)
            .header(ORIGIN, self.base_url.as_str())
            .body(body)
            .send()
            .await
            .map_err(request_error)?;

        if !response.status().is_success() {
            warn!(
                "TeamCity refused build of {plan_id}: HTTP {}",
                response.status()
            );
            return Ok(String::new());
        }

        let text = response.text().await.map_err(request_error)?;
        let build_id = xml::root_build_attribute(&text, "id").unwrap_or_default();
        info!("TeamCity accepted build of {plan_id} (id {build_id:?})");
        Ok(build_id)
    }

    async fn query_status(&self, build_id: &str) -> Result<Option<BuildStatus>, BuildServiceError> {
        // The bare queue URL lists the whole queue rather than one build.
        if build_id.trim().is_empty() {
            debug!("status query with empty build id; reporting unknown build");
            return Ok(None);
        }

        let mut url = self.queue_url.clone();
        url.path_segments_mut()
            .map_err(|()| BuildServiceError::InvalidUrl(self.queue_url.to_string()))?
            .push(build_id);

        let response = self.get(url).await.map_err(request_error)?;

        if !response.status().is_success() {
            debug!(
                "status query for build {build_id} returned HTTP {}",
                response.status()
            );
            return Ok(None);
        }

        let text = response.text().await.map_err(request_error)?;
        Ok(Some(BuildStatus {
            progress: xml::root_build_attribute(&text, "state").unwrap_or_default(),
            result: xml::root_build_attribute(&text, "status").unwrap_or_default(),
        }))
    }
}

/// Parses `server_url` and makes sure its path ends in `/`, so that joining
/// relative endpoints keeps any context path (`https://host/teamcity`).
fn normalize_base_url(server_url: &str) -> Result<Url, BuildServiceError> {
    let mut url = Url::parse(server_url)
        .map_err(|e| BuildServiceError::InvalidUrl(format!("{server_url}: {e}")))?;

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn request_error(e: reqwest::Error) -> BuildServiceError {
    BuildServiceError::Request(Box::new(e))
}

/// Renders an error together with its sources, e.g.
/// `error sending request - [connection refused]`.
fn error_chain(e: &dyn std::error::Error) -> String {
    let mut rendered = e.to_string();
    let mut source = e.source();
    while let Some(inner) = source {
        rendered.push_str(&format!(" - [{inner}]"));
        source = inner.source();
    }
    rendered
}
