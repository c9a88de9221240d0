use thiserror::Error;

/// Misuse of the dispatch machinery. Fatal to the call and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("connection pool is not open; open a session before submitting requests")]
    PoolClosed,
    #[error("chunk size must be at least 1, got {value}")]
    InvalidChunkSize { value: usize },
    #[error("chunk size {value} exceeds the endpoint limit of {limit} sub-requests per envelope")]
    ChunkSizeAboveLimit { value: usize, limit: usize },
    #[error("concurrency must be at least 1, got {value}")]
    InvalidConcurrency { value: usize },
    #[error("reference id {id:?} is used by more than one request in the batch")]
    DuplicateReferenceId { id: String },
    #[error("invalid base URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

/// Failure of one network call as a whole.
///
/// For an envelope call this covers every logical request in the envelope, so the
/// error is `Clone` and gets copied onto each affected sub-result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection failed: {message}")]
    Connect { message: String },
    #[error("request timed out")]
    Timeout,
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode response body: {message}")]
    Decode { message: String },
    #[error("malformed composite envelope: {message}")]
    MalformedEnvelope { message: String },
    #[error("call cancelled before completion")]
    Cancelled,
    #[error("request failed: {message}")]
    Request { message: String },
}

impl TransportError {
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the endpoint rejected the session's credential.
    ///
    /// Credentials are refreshed by whoever owns the session, never by the dispatcher.
    #[must_use]
    pub const fn is_authorization(&self) -> bool {
        matches!(self, Self::Status { status: 401 | 403, .. })
    }
}
