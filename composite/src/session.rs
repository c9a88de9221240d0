//! Composite session facade.

use std::collections::HashMap;
use std::time::Instant;

use fanout_config::DispatchSettings;
use fanout_http::{
    ConnectionPool, Dispatched, HttpTransport, PoolError, PoolStats, Transport, dispatch_stream,
};
use fanout_types::{AuthenticatedSession, CorrelationId, LogicalRequest, SubResult, UsageError};
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::correlator::{restore_input_order, settle_chunk};
use crate::formatter::{EnvelopeChunk, format_batches};

#[derive(Debug, Error)]
pub enum CompositeError {
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error("failed to open connection pool: {0}")]
    Pool(#[source] PoolError),
    #[error("failed to encode composite envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<PoolError> for CompositeError {
    fn from(error: PoolError) -> Self {
        match error {
            PoolError::Usage(usage) => Self::Usage(usage),
            other => Self::Pool(other),
        }
    }
}

/// Scoped handle that batches logical requests into composite envelopes.
///
/// Opening the session opens its connection pool; [`close`](Self::close) drains and
/// releases it. Dropping the session without closing cancels anything still in
/// flight.
pub struct CompositeSession<T: Transport = HttpTransport> {
    pool: ConnectionPool<T>,
    settings: DispatchSettings,
}

impl CompositeSession<HttpTransport> {
    pub fn open<S>(session: &S, settings: DispatchSettings) -> Result<Self, CompositeError>
    where
        S: AuthenticatedSession + ?Sized,
    {
        let pool = ConnectionPool::open(session, &settings)?;
        Ok(Self { pool, settings })
    }
}

impl<T: Transport> CompositeSession<T> {
    pub fn with_transport<S>(
        transport: T,
        session: &S,
        settings: DispatchSettings,
    ) -> Result<Self, CompositeError>
    where
        S: AuthenticatedSession + ?Sized,
    {
        let pool = ConnectionPool::with_transport(transport, session, &settings)?;
        Ok(Self { pool, settings })
    }

    /// Run every request through composite envelopes and return one result each.
    ///
    /// Results arrive grouped by chunk in chunk completion order, so they are not in
    /// input order across chunk boundaries. Use [`run_batch_ordered`](Self::run_batch_ordered)
    /// when input order matters.
    ///
    /// A failed envelope call does not abort the batch: each request it carried comes
    /// back as a failed result.
    pub async fn run_batch(
        &self,
        requests: Vec<LogicalRequest>,
    ) -> Result<Vec<SubResult>, CompositeError> {
        let (results, _) = self.execute(requests).await?;
        Ok(results)
    }

    /// Like [`run_batch`](Self::run_batch), with results sorted back into input order.
    pub async fn run_batch_ordered(
        &self,
        requests: Vec<LogicalRequest>,
    ) -> Result<Vec<SubResult>, CompositeError> {
        let (mut results, positions) = self.execute(requests).await?;
        restore_input_order(&mut results, &positions);
        Ok(results)
    }

    async fn execute(
        &self,
        requests: Vec<LogicalRequest>,
    ) -> Result<(Vec<SubResult>, HashMap<CorrelationId, usize>), CompositeError> {
        let started = Instant::now();
        let batch = format_batches(
            requests,
            self.settings.chunk_size(),
            self.settings.reference_prefix(),
        )?;
        let envelopes = batch
            .chunks
            .iter()
            .map(EnvelopeChunk::to_logical_request)
            .collect::<Result<Vec<_>, _>>()?;

        let mut completions = dispatch_stream(&self.pool, envelopes)?;
        let mut results = Vec::with_capacity(batch.request_count());
        let mut failed_chunks = 0usize;
        while let Some(Dispatched { index, outcome }) = completions.next().await {
            let Some(chunk) = batch.chunks.get(index) else {
                continue;
            };
            if !outcome.is_success() {
                failed_chunks += 1;
            }
            tracing::debug!(
                chunk = index,
                requests = chunk.len(),
                success = outcome.is_success(),
                "Envelope completed"
            );
            results.extend(settle_chunk(chunk, outcome));
        }

        let failed = results.iter().filter(|r| r.transport_error().is_some()).count();
        tracing::info!(
            requests = batch.request_count(),
            chunks = batch.chunks.len(),
            failed_chunks,
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Composite batch finished"
        );

        Ok((results, batch.positions))
    }

    /// Stop accepting work, wait for in-flight envelope calls, and release the pool.
    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Run `f` against this session, then close it whatever `f` returned.
    ///
    /// ```ignore
    /// let results = session
    ///     .scope(|s| Box::pin(async move { s.run_batch(requests).await }))
    ///     .await?;
    /// ```
    pub async fn scope<F, R>(self, f: F) -> R
    where
        F: for<'a> FnOnce(&'a Self) -> BoxFuture<'a, R>,
    {
        let output = f(&self).await;
        self.close().await;
        output
    }

    #[must_use]
    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_http::{CallOutcome, HttpReply, OutboundCall};
    use fanout_types::{AccessToken, StaticSession};

    struct NeverCalled;

    impl Transport for NeverCalled {
        async fn execute(&self, _call: OutboundCall) -> CallOutcome {
            panic!("no envelope should be sent");
        }
    }

    struct EmptyReply;

    impl Transport for EmptyReply {
        async fn execute(&self, _call: OutboundCall) -> CallOutcome {
            CallOutcome::Success(HttpReply {
                status: 200,
                body: serde_json::json!({"compositeResponse": []}),
            })
        }
    }

    fn session() -> StaticSession {
        StaticSession::new("https://acme.my.salesforce.com", &AccessToken::new("tok"), "62.0")
    }

    #[tokio::test]
    async fn duplicate_ids_fail_before_any_call() {
        let composite =
            CompositeSession::with_transport(NeverCalled, &session(), DispatchSettings::default())
                .unwrap();

        let err = composite
            .run_batch(vec![
                LogicalRequest::get("a").with_reference_id("x"),
                LogicalRequest::get("b").with_reference_id("x"),
            ])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CompositeError::Usage(UsageError::DuplicateReferenceId { .. })
        ));
        assert_eq!(composite.pool_stats().submitted, 0);
        composite.close().await;
    }

    #[tokio::test]
    async fn empty_batch_sends_nothing() {
        let composite =
            CompositeSession::with_transport(NeverCalled, &session(), DispatchSettings::default())
                .unwrap();

        let results = composite.run_batch(Vec::new()).await.unwrap();

        assert!(results.is_empty());
        composite.close().await;
    }

    #[tokio::test]
    async fn empty_reply_fails_each_request() {
        let composite =
            CompositeSession::with_transport(EmptyReply, &session(), DispatchSettings::default())
                .unwrap();

        let results = composite
            .run_batch(vec![LogicalRequest::get("a"), LogicalRequest::get("b")])
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.transport_error().is_some()));
        composite.close().await;
    }

    #[test]
    fn plain_http_session_is_rejected_by_default() {
        let insecure = StaticSession::with_base_url(
            "http://acme.test/services/data/v62.0",
            &AccessToken::new("tok"),
            "62.0",
        );

        let err = CompositeSession::with_transport(NeverCalled, &insecure, DispatchSettings::default())
            .err()
            .unwrap();

        assert!(matches!(
            err,
            CompositeError::Usage(UsageError::InvalidBaseUrl { .. })
        ));
    }

    #[test]
    fn pool_usage_errors_surface_as_usage() {
        let err = CompositeError::from(PoolError::Usage(UsageError::PoolClosed));
        assert!(matches!(err, CompositeError::Usage(UsageError::PoolClosed)));
    }
}
