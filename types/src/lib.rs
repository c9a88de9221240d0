//! Core domain types for fanout.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! The connection pool, the dispatcher and the composite layer all speak in these types.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod error;
mod session;

pub use error::{TransportError, UsageError};
pub use session::{AccessToken, AuthenticatedSession, StaticSession, normalize_base_url};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Maximum number of sub-requests the remote endpoint accepts in one composite envelope.
pub const MAX_COMPOSITE_SUBREQUESTS: usize = 25;

/// Prefix used for generated correlation identifiers.
pub const DEFAULT_REFERENCE_PREFIX: &str = "RefId";

// ============================================================================
// HTTP Method
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl HttpMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unsupported HTTP method: {0}")]
pub struct UnknownMethodError(String);

impl FromStr for HttpMethod {
    type Err = UnknownMethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "HEAD" => Ok(Self::Head),
            _ => Err(UnknownMethodError(s.to_string())),
        }
    }
}

// ============================================================================
// Logical Request
// ============================================================================

/// One remote-API operation as the caller describes it.
///
/// Identity is positional until the composite layer assigns a [`CorrelationId`].
/// A caller may pin the identifier up front with [`LogicalRequest::with_reference_id`];
/// otherwise one is generated from the request's index in the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalRequest {
    pub path: String,
    pub method: HttpMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
}

impl LogicalRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method,
            body: None,
            headers: BTreeMap::new(),
            reference_id: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(HttpMethod::Post, path).with_body(body)
    }

    pub fn patch(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(HttpMethod::Patch, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_reference_id(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }
}

// ============================================================================
// Correlation
// ============================================================================

/// Stable per-operation identifier, echoed by the remote endpoint as `referenceId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Identifier derived from a request's global index in the batch: `<prefix>__<index>__`.
    #[must_use]
    pub fn generated(prefix: &str, index: usize) -> Self {
        Self(format!("{prefix}__{index}__"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ============================================================================
// Sub Results
// ============================================================================

/// Outcome of one logical request.
///
/// A non-2xx `Completed` status is business data, not an error. `Failed` means the
/// envelope carrying this request never produced a per-request answer.
#[derive(Debug, Clone, PartialEq)]
pub enum SubOutcome {
    Completed {
        status_code: u16,
        body: serde_json::Value,
    },
    Failed(TransportError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubResult {
    pub correlation_id: CorrelationId,
    pub outcome: SubOutcome,
}

impl SubResult {
    pub fn completed(
        correlation_id: impl Into<CorrelationId>,
        status_code: u16,
        body: serde_json::Value,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            outcome: SubOutcome::Completed { status_code, body },
        }
    }

    pub fn failed(correlation_id: impl Into<CorrelationId>, error: TransportError) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            outcome: SubOutcome::Failed(error),
        }
    }

    /// True when the remote endpoint answered this request with a 2xx status.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, SubOutcome::Completed { status_code, .. } if (200..300).contains(&status_code))
    }

    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self.outcome {
            SubOutcome::Completed { status_code, .. } => Some(status_code),
            SubOutcome::Failed(_) => None,
        }
    }

    #[must_use]
    pub fn body(&self) -> Option<&serde_json::Value> {
        match &self.outcome {
            SubOutcome::Completed { body, .. } => Some(body),
            SubOutcome::Failed(_) => None,
        }
    }

    #[must_use]
    pub fn transport_error(&self) -> Option<&TransportError> {
        match &self.outcome {
            SubOutcome::Completed { .. } => None,
            SubOutcome::Failed(error) => Some(error),
        }
    }
}
