//! Composite-envelope batching.
//!
//! # Architecture
//!
//! - [`format_batches`] - Assigns every logical request a [`CorrelationId`] from its
//!   global input index (or its own `reference_id`) and partitions the batch into
//!   [`EnvelopeChunk`]s of at most `chunk_size` requests.
//! - [`parse_results`] / [`settle_chunk`] - Unwrap envelope replies into one
//!   [`SubResult`] per request, tagged by correlation id.
//! - [`CompositeSession`] - Scoped facade: open a pool, `run_batch`, close.
//!
//! # Ordering
//!
//! Envelopes are dispatched concurrently and their results are collected as each one
//! completes. Within a chunk, results follow the endpoint's order; across chunks there
//! is no ordering guarantee. [`CompositeSession::run_batch_ordered`] and
//! [`restore_input_order`] put results back in input order.
//!
//! [`CorrelationId`]: fanout_types::CorrelationId
//! [`SubResult`]: fanout_types::SubResult

mod correlator;
mod envelope;
mod formatter;
mod session;

pub use correlator::{parse_results, restore_input_order, settle_chunk};
pub use envelope::{EnvelopeRequest, EnvelopeResponse, WireSubRequest, WireSubResponse};
pub use formatter::{COMPOSITE_PATH, EnvelopeChunk, FormattedBatch, TaggedRequest, format_batches};
pub use session::{CompositeError, CompositeSession};
