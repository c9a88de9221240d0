//! Parallel dispatch over a [`ConnectionPool`].
//!
//! Results come back in **completion order**, not submission order. Each one carries
//! the index of the request that produced it so callers can correlate.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::StreamExt;
use futures_util::stream::{FuturesUnordered, Stream};

use fanout_types::{LogicalRequest, UsageError};

use crate::pool::{CallHandle, ConnectionPool};
use crate::transport::{CallOutcome, Transport};

/// One finished call.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    /// Position of the request in the sequence passed to the dispatcher.
    pub index: usize,
    pub outcome: CallOutcome,
}

struct IndexedCall {
    index: usize,
    handle: CallHandle,
}

impl Future for IndexedCall {
    type Output = Dispatched;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let index = self.index;
        Pin::new(&mut self.handle)
            .poll(cx)
            .map(|outcome| Dispatched { index, outcome })
    }
}

/// Outcomes of submitted calls, yielded as each one finishes.
pub struct DispatchStream {
    pending: FuturesUnordered<IndexedCall>,
}

impl DispatchStream {
    /// Calls not yet yielded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Stream for DispatchStream {
    type Item = Dispatched;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.pending.poll_next_unpin(cx)
    }
}

/// Submit every request and yield outcomes as they complete.
///
/// All submissions happen before this returns; the pool's concurrency cap decides how
/// many actually run at once.
pub fn dispatch_stream<T, I>(
    pool: &ConnectionPool<T>,
    requests: I,
) -> Result<DispatchStream, UsageError>
where
    T: Transport,
    I: IntoIterator<Item = LogicalRequest>,
{
    let pending = FuturesUnordered::new();
    for (index, request) in requests.into_iter().enumerate() {
        let handle = pool.submit(request)?;
        pending.push(IndexedCall { index, handle });
    }

    tracing::debug!(
        calls = pending.len(),
        concurrency = pool.concurrency(),
        "Dispatched calls"
    );
    Ok(DispatchStream { pending })
}

/// Submit every request and collect all outcomes, in completion order.
pub async fn dispatch<T, I>(
    pool: &ConnectionPool<T>,
    requests: I,
) -> Result<Vec<Dispatched>, UsageError>
where
    T: Transport,
    I: IntoIterator<Item = LogicalRequest>,
{
    Ok(dispatch_stream(pool, requests)?.collect().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fanout_config::DispatchSettings;
    use fanout_types::{AccessToken, StaticSession, TransportError};
    use std::collections::HashSet;
    use std::time::Duration;

    use crate::transport::{HttpReply, HttpTransport, OutboundCall};

    /// Sleeps for the number of milliseconds named by the last path segment.
    struct DelayTransport;

    impl Transport for DelayTransport {
        async fn execute(&self, call: OutboundCall) -> CallOutcome {
            let millis: u64 = call
                .url
                .rsplit('/')
                .next()
                .and_then(|segment| segment.parse().ok())
                .unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            if millis == 13 {
                return CallOutcome::Failure(TransportError::Timeout);
            }
            CallOutcome::Success(HttpReply {
                status: 200,
                body: serde_json::json!({ "waited": millis }),
            })
        }
    }

    fn session() -> StaticSession {
        StaticSession::with_base_url("https://acme.test/", &AccessToken::new("tok"), "62.0")
    }

    fn pool(concurrency: usize) -> ConnectionPool<DelayTransport> {
        let settings = DispatchSettings::default()
            .with_concurrency(concurrency)
            .unwrap();
        ConnectionPool::with_transport(DelayTransport, &session(), &settings).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn results_arrive_in_completion_order() {
        let pool = pool(4);
        let requests = [120, 10, 60]
            .into_iter()
            .map(|ms| LogicalRequest::get(format!("wait/{ms}")));

        let results = dispatch(&pool, requests).await.unwrap();
        pool.close().await;

        let order: Vec<usize> = results.iter().map(|d| d.index).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[tokio::test]
    async fn every_request_yields_exactly_one_result() {
        let pool = pool(3);
        let requests = (0..25).map(|i| LogicalRequest::get(format!("wait/{}", i % 5)));

        let results = dispatch(&pool, requests).await.unwrap();
        pool.close().await;

        assert_eq!(results.len(), 25);
        let indexes: HashSet<usize> = results.iter().map(|d| d.index).collect();
        assert_eq!(indexes, (0..25).collect());
    }

    #[tokio::test]
    async fn failed_calls_are_reported_alongside_successes() {
        let pool = pool(2);
        let requests = [1, 13, 2].map(|ms| LogicalRequest::get(format!("wait/{ms}")));

        let mut results = dispatch(&pool, requests).await.unwrap();
        pool.close().await;
        results.sort_by_key(|d| d.index);

        assert!(results[0].outcome.is_success());
        assert_eq!(
            results[1].outcome,
            CallOutcome::Failure(TransportError::Timeout)
        );
        assert!(results[2].outcome.is_success());
    }

    #[tokio::test]
    async fn empty_input_produces_no_calls() {
        let pool = pool(2);
        let results = dispatch(&pool, Vec::new()).await.unwrap();
        assert!(results.is_empty());
        assert_eq!(pool.stats().submitted, 0);
    }

    #[tokio::test]
    async fn dispatch_on_closed_pool_fails_fast() {
        let settings = DispatchSettings::default();
        let pool = ConnectionPool::<HttpTransport>::open(&session(), &settings).unwrap();
        pool.close().await;

        let err = dispatch(&pool, [LogicalRequest::get("limits")])
            .await
            .unwrap_err();
        assert_eq!(err, UsageError::PoolClosed);
    }
}
