//! Batch result correlator: envelope replies back into per-request results.

use std::collections::{HashMap, HashSet};

use fanout_http::CallOutcome;
use fanout_types::{CorrelationId, SubResult, TransportError};

use crate::envelope::EnvelopeResponse;
use crate::formatter::EnvelopeChunk;

/// Flatten envelope replies into one sequence of sub-results.
///
/// Replies are taken in the order given (for a live batch, chunk completion order) and
/// each keeps its own internal order. Results are not rebound to input positions
/// here; see [`restore_input_order`].
pub fn parse_results<I>(responses: I) -> Vec<SubResult>
where
    I: IntoIterator<Item = EnvelopeResponse>,
{
    responses
        .into_iter()
        .flat_map(EnvelopeResponse::into_sub_results)
        .collect()
}

/// Turn the outcome of one envelope call into exactly one result per request in
/// `chunk`.
///
/// A failed call, or a reply that cannot be decoded, marks every request in the chunk
/// as failed. Requests the reply leaves out are marked failed; entries for ids the
/// chunk never sent are dropped.
pub fn settle_chunk(chunk: &EnvelopeChunk, outcome: CallOutcome) -> Vec<SubResult> {
    let response = match outcome {
        CallOutcome::Success(reply) => EnvelopeResponse::from_json(reply.body),
        CallOutcome::Failure(error) => Err(error),
    };

    let response = match response {
        Ok(response) => response,
        Err(error) => {
            tracing::warn!(
                chunk = chunk.index(),
                requests = chunk.len(),
                error = %error,
                "Envelope call failed; marking every request in the chunk as failed"
            );
            return fail_chunk(chunk, &error);
        }
    };

    if response.len() != chunk.len() {
        tracing::warn!(
            chunk = chunk.index(),
            expected = chunk.len(),
            received = response.len(),
            "Envelope reply has a different number of sub-results than were sent"
        );
    }

    let expected: HashSet<&CorrelationId> = chunk.correlation_ids().collect();
    let mut seen = HashSet::with_capacity(chunk.len());
    let mut results = Vec::with_capacity(chunk.len());
    for result in parse_results([response]) {
        if !expected.contains(&result.correlation_id) {
            tracing::warn!(
                chunk = chunk.index(),
                reference_id = %result.correlation_id,
                "Dropping sub-result for an id this chunk never sent"
            );
            continue;
        }
        if !seen.insert(result.correlation_id.clone()) {
            tracing::warn!(
                chunk = chunk.index(),
                reference_id = %result.correlation_id,
                "Dropping repeated sub-result"
            );
            continue;
        }
        results.push(result);
    }

    for id in chunk.correlation_ids() {
        if !seen.contains(id) {
            results.push(SubResult::failed(
                id.clone(),
                TransportError::MalformedEnvelope {
                    message: format!("no sub-result for referenceId {id}"),
                },
            ));
        }
    }

    results
}

fn fail_chunk(chunk: &EnvelopeChunk, error: &TransportError) -> Vec<SubResult> {
    chunk
        .correlation_ids()
        .map(|id| SubResult::failed(id.clone(), error.clone()))
        .collect()
}

/// Sort results back into the order their requests were given.
///
/// `positions` maps each correlation id to its input index. Results with an unknown
/// id keep their relative order at the end.
pub fn restore_input_order(results: &mut [SubResult], positions: &HashMap<CorrelationId, usize>) {
    results.sort_by_key(|result| {
        positions
            .get(&result.correlation_id)
            .copied()
            .unwrap_or(usize::MAX)
    });
}
