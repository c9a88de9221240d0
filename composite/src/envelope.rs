//! Composite wire format.
//!
//! Request:
//!
//! ```json
//! {"compositeRequest": [{"referenceId": "RefId__0__", "method": "GET", "url": "..."}]}
//! ```
//!
//! Response:
//!
//! ```json
//! {"compositeResponse": [{"referenceId": "RefId__0__", "httpStatusCode": 200, "body": {}}]}
//! ```

use std::collections::BTreeMap;

use fanout_types::{CorrelationId, HttpMethod, SubResult, TransportError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of one outbound envelope call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeRequest {
    pub composite_request: Vec<WireSubRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSubRequest {
    pub reference_id: CorrelationId,
    pub method: HttpMethod,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub http_headers: BTreeMap<String, String>,
}

/// Decoded reply to one envelope call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeResponse {
    pub composite_response: Vec<WireSubResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireSubResponse {
    pub reference_id: CorrelationId,
    pub http_status_code: u16,
    #[serde(default)]
    pub body: Value,
}

impl EnvelopeResponse {
    /// Decode a reply body. Anything without a `compositeResponse` array is malformed.
    pub fn from_json(body: Value) -> Result<Self, TransportError> {
        serde_json::from_value(body).map_err(|e| TransportError::MalformedEnvelope {
            message: e.to_string(),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.composite_response.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.composite_response.is_empty()
    }

    /// Per-request results in the order the endpoint listed them.
    pub fn into_sub_results(self) -> impl Iterator<Item = SubResult> {
        self.composite_response.into_iter().map(|sub| {
            SubResult::completed(sub.reference_id, sub.http_status_code, sub.body)
        })
    }
}
