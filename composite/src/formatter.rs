//! Batch formatter: tag every request with a correlation id, then partition into
//! envelope-sized chunks.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use fanout_types::{CorrelationId, LogicalRequest, UsageError};

use crate::envelope::{EnvelopeRequest, WireSubRequest};

/// Path of the composite endpoint, relative to the session base URL.
pub const COMPOSITE_PATH: &str = "composite";

/// A logical request paired with the id the endpoint will echo back.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedRequest {
    pub correlation_id: CorrelationId,
    pub request: LogicalRequest,
}

/// Contiguous run of tagged requests that travels as one envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeChunk {
    index: usize,
    entries: Vec<TaggedRequest>,
}

impl EnvelopeChunk {
    /// Position of this chunk in the batch.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn entries(&self) -> &[TaggedRequest] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn correlation_ids(&self) -> impl Iterator<Item = &CorrelationId> {
        self.entries.iter().map(|entry| &entry.correlation_id)
    }

    #[must_use]
    pub fn to_envelope(&self) -> EnvelopeRequest {
        EnvelopeRequest {
            composite_request: self
                .entries
                .iter()
                .map(|entry| WireSubRequest {
                    reference_id: entry.correlation_id.clone(),
                    method: entry.request.method,
                    url: entry.request.path.clone(),
                    body: entry.request.body.clone(),
                    http_headers: entry.request.headers.clone(),
                })
                .collect(),
        }
    }

    /// The single network call that carries this chunk: `POST composite`.
    pub fn to_logical_request(&self) -> Result<LogicalRequest, serde_json::Error> {
        let body = serde_json::to_value(self.to_envelope())?;
        Ok(LogicalRequest::post(COMPOSITE_PATH, body))
    }
}

/// Output of [`format_batches`].
#[derive(Debug, Clone, PartialEq)]
pub struct FormattedBatch {
    pub chunks: Vec<EnvelopeChunk>,
    /// Input index of every request, keyed by its correlation id.
    pub positions: HashMap<CorrelationId, usize>,
}

impl FormattedBatch {
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.positions.len()
    }
}

/// Tag `requests` and split them into chunks of at most `chunk_size`.
///
/// Generated ids come from the global input index (`<prefix>__<index>__`), so they
/// stay unique across chunks. A request's own `reference_id` wins over the generated
/// one; any id appearing twice in the batch is rejected.
pub fn format_batches(
    requests: Vec<LogicalRequest>,
    chunk_size: usize,
    prefix: &str,
) -> Result<FormattedBatch, UsageError> {
    if chunk_size == 0 {
        return Err(UsageError::InvalidChunkSize { value: chunk_size });
    }

    let mut positions = HashMap::with_capacity(requests.len());
    let mut tagged = Vec::with_capacity(requests.len());
    for (index, request) in requests.into_iter().enumerate() {
        let correlation_id = request
            .reference_id
            .clone()
            .map_or_else(|| CorrelationId::generated(prefix, index), CorrelationId::new);

        match positions.entry(correlation_id.clone()) {
            Entry::Occupied(_) => {
                return Err(UsageError::DuplicateReferenceId {
                    id: correlation_id.into_inner(),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(index);
            }
        }
        tagged.push(TaggedRequest {
            correlation_id,
            request,
        });
    }

    let mut chunks = Vec::with_capacity(tagged.len().div_ceil(chunk_size));
    let mut remaining = tagged.into_iter().peekable();
    while remaining.peek().is_some() {
        let entries: Vec<TaggedRequest> = remaining.by_ref().take(chunk_size).collect();
        chunks.push(EnvelopeChunk {
            index: chunks.len(),
            entries,
        });
    }

    Ok(FormattedBatch { chunks, positions })
}
