//! TeamCity REST XML payloads.
//!
//! Build trigger request (`POST …/buildQueue`):
//!
//! ```xml
//! <build personal="false">
//!   <buildType id="Proj_Build"/>
//!   <comment><text>triggered by the dispatcher</text></comment>
//!   <properties>
//!     <property name="plasticscm.mergebot.update.spec" value="br:/main/scm003@repo"/>
//!     <property name="plasticscm.mergebot.branch" value="main"/>
//!   </properties>
//! </build>
//! ```
//!
//! Queue entry response (`POST …/buildQueue`, `GET …/buildQueue/<id>`):
//!
//! ```xml
//! <build id="1045" buildTypeId="Proj_Build" state="finished" status="SUCCESS"/>
//! ```
//!
//! Response parsing is tolerant: a missing body, root element or attribute is
//! reported as `None` and never as an error, so partial or evolving server
//! responses degrade to "unknown" instead of failing the request.

use std::collections::BTreeMap;

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Serialize;

use crate::application::BuildServiceError;

/// Namespace prepended to every build parameter the plug sends.
pub const PLUG_PROPERTY_PREFIX: &str = "plasticscm.mergebot.";

/// Parameter carrying the source-control update specification.
pub const UPDATE_SPEC_PROPERTY: &str = "plasticscm.mergebot.update.spec";

#[derive(Debug, Serialize)]
struct BuildRequest<'a> {
    #[serde(rename = "@personal")]
    personal: bool,
    #[serde(rename = "buildType")]
    build_type: BuildType<'a>,
    comment: Comment<'a>,
    properties: Properties,
}

#[derive(Debug, Serialize)]
struct BuildType<'a> {
    #[serde(rename = "@id")]
    id: &'a str,
}

#[derive(Debug, Serialize)]
struct Comment<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Properties {
    property: Vec<Property>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct Property {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@value")]
    value: String,
}

/// Serializes a non-personal build request for `plan_id`.
///
/// # Errors
///
/// Returns [`BuildServiceError::Encode`] if the XML serializer rejects the
/// payload.
pub fn build_request_xml(
    plan_id: &str,
    update_spec: &str,
    comment: &str,
    extra_properties: &BTreeMap<String, String>,
) -> Result<String, BuildServiceError> {
    let request = BuildRequest {
        personal: false,
        build_type: BuildType { id: plan_id },
        comment: Comment { text: comment },
        properties: Properties {
            property: build_properties(update_spec, extra_properties),
        },
    };

    quick_xml::se::to_string_with_root("build", &request)
        .map_err(|e| BuildServiceError::Encode(e.to_string()))
}

/// The mandatory update-spec parameter followed by every non-empty extra
/// parameter, all namespaced under [`PLUG_PROPERTY_PREFIX`].
fn build_properties(update_spec: &str, extra: &BTreeMap<String, String>) -> Vec<Property> {
    let mandatory = Property {
        name: UPDATE_SPEC_PROPERTY.to_string(),
        value: update_spec.to_string(),
    };

    let extras = extra
        .iter()
        .filter(|(key, value)| !key.is_empty() && !value.is_empty())
        .map(|(key, value)| Property {
            name: format!("{PLUG_PROPERTY_PREFIX}{key}"),
            value: value.clone(),
        });

    std::iter::once(mandatory).chain(extras).collect()
}

/// Reads attribute `name` of the root `<build>` element.
///
/// Returns `None` when the document is empty or malformed, when the root
/// element is not `build`, or when the attribute is absent.
pub fn root_build_attribute(xml: &str, name: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) | Ok(Event::Empty(element)) => {
                if element.name().as_ref() != b"build" {
                    return None;
                }
                let attribute = element.try_get_attribute(name).ok().flatten()?;
                return attribute.unescape_value().ok().map(|value| value.into_owned());
            }
            Ok(Event::Eof) | Err(_) => return None,
            // XML declaration, comments, whitespace before the root element.
            Ok(_) => {}
        }
    }
}
