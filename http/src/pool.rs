//! Scoped connection pool with a fixed concurrency cap.
//!
//! The pool is opened against one authenticated session and owns its transport (and
//! with it every socket) until it is closed or dropped:
//!
//! - [`ConnectionPool::submit`] spawns one call and returns a [`CallHandle`]. At most
//!   `concurrency` calls hold a permit at once; the rest wait in FIFO order.
//! - [`ConnectionPool::close`] refuses new submissions, waits for every outstanding
//!   call to resolve, then closes the permit semaphore.
//! - Dropping an open pool cancels whatever is still running.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};

use fanout_config::DispatchSettings;
use fanout_types::{AuthenticatedSession, LogicalRequest, TransportError, UsageError};
use thiserror::Error;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use url::Url;

use crate::transport::{CallOutcome, HttpTransport, OutboundCall, Transport};

const ACCEPT_ENCODING: &str = "Accept-Encoding";
const COMPRESSED_ENCODING: &str = "gzip";

#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Counters for one pool's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub submitted: usize,
    pub completed: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub outstanding: usize,
}

struct PoolInner<T> {
    transport: T,
    base_url: String,
    default_headers: Vec<(String, String)>,
    concurrency: usize,
    permits: Semaphore,
    closed: AtomicBool,
    /// Submitted but not yet resolved. `close` waits for this to reach zero.
    outstanding: watch::Sender<usize>,
    /// Flipped to `true` when the owning pool is dropped without `close`.
    cancel: watch::Sender<bool>,
    submitted: AtomicUsize,
    completed: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl<T> PoolInner<T> {
    fn prepare(&self, request: LogicalRequest) -> OutboundCall {
        OutboundCall {
            url: format!("{}{}", self.base_url, request.path.trim_start_matches('/')),
            headers: merge_headers(&self.default_headers, &request.headers),
            method: request.method,
            body: request.body,
        }
    }
}

/// Bounded pool of reusable connections bound to one session.
pub struct ConnectionPool<T: Transport = HttpTransport> {
    inner: Arc<PoolInner<T>>,
}

impl ConnectionPool<HttpTransport> {
    /// Open a reqwest-backed pool for `session`.
    pub fn open<S>(session: &S, settings: &DispatchSettings) -> Result<Self, PoolError>
    where
        S: AuthenticatedSession + ?Sized,
    {
        let transport = HttpTransport::new(settings)?;
        Ok(Self::with_transport(transport, session, settings)?)
    }
}

impl<T: Transport> ConnectionPool<T> {
    pub fn with_transport<S>(
        transport: T,
        session: &S,
        settings: &DispatchSettings,
    ) -> Result<Self, UsageError>
    where
        S: AuthenticatedSession + ?Sized,
    {
        let base_url = validate_base_url(session.base_url(), settings.allow_http())?;
        let concurrency = settings.concurrency();
        if concurrency == 0 {
            return Err(UsageError::InvalidConcurrency { value: concurrency });
        }

        let default_headers = session
            .headers()
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        tracing::debug!(
            base_url = %base_url,
            api_version = session.api_version(),
            concurrency,
            "Opened connection pool"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                transport,
                base_url,
                default_headers,
                concurrency,
                permits: Semaphore::new(concurrency),
                closed: AtomicBool::new(false),
                outstanding: watch::Sender::new(0),
                cancel: watch::Sender::new(false),
                submitted: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }),
        })
    }

    /// Enqueue one call. Fails if the pool has been closed.
    pub fn submit(&self, request: LogicalRequest) -> Result<CallHandle, UsageError> {
        // Count first, then check: `close` either sees this call or we see `closed`.
        let outstanding = OutstandingGuard::new(Arc::clone(&self.inner));
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(UsageError::PoolClosed);
        }

        let call = self.inner.prepare(request);
        self.inner.submitted.fetch_add(1, Ordering::Relaxed);

        let inner = Arc::clone(&self.inner);
        let mut cancel = self.inner.cancel.subscribe();
        let task = tokio::spawn(async move {
            let _outstanding = outstanding;
            tokio::select! {
                outcome = run_call(&inner, call) => outcome,
                () = cancelled(&mut cancel) => CallOutcome::Failure(TransportError::Cancelled),
            }
        });

        Ok(CallHandle { task })
    }

    /// Stop accepting calls and wait until every outstanding call has resolved.
    ///
    /// Idempotent. Calls already queued for a permit still run.
    pub async fn close(&self) {
        let already_closed = self.inner.closed.swap(true, Ordering::SeqCst);

        let mut outstanding = self.inner.outstanding.subscribe();
        while *outstanding.borrow_and_update() > 0 {
            // The sender lives in `inner`, so the channel outlives this loop.
            if outstanding.changed().await.is_err() {
                break;
            }
        }
        self.inner.permits.close();

        if !already_closed {
            let stats = self.stats();
            tracing::debug!(
                submitted = stats.submitted,
                completed = stats.completed,
                peak_in_flight = stats.peak_in_flight,
                "Closed connection pool"
            );
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            submitted: self.inner.submitted.load(Ordering::Relaxed),
            completed: self.inner.completed.load(Ordering::Relaxed),
            in_flight: self.inner.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.inner.peak_in_flight.load(Ordering::SeqCst),
            outstanding: *self.inner.outstanding.borrow(),
        }
    }
}

impl<T: Transport> Drop for ConnectionPool<T> {
    fn drop(&mut self) {
        let outstanding = *self.inner.outstanding.borrow();
        if !self.inner.closed.swap(true, Ordering::SeqCst) && outstanding > 0 {
            tracing::warn!(
                outstanding,
                "Connection pool dropped without close; cancelling in-flight calls"
            );
        }
        self.inner.cancel.send_replace(true);
        self.inner.permits.close();
    }
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow_and_update() {
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn run_call<T: Transport>(inner: &PoolInner<T>, call: OutboundCall) -> CallOutcome {
    let Ok(_permit) = inner.permits.acquire().await else {
        return CallOutcome::Failure(TransportError::Cancelled);
    };

    let _in_flight = InFlightGuard::enter(inner);
    let outcome = inner.transport.execute(call).await;
    inner.completed.fetch_add(1, Ordering::Relaxed);
    outcome
}

struct InFlightGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> InFlightGuard<'a> {
    fn enter<T>(inner: &'a PoolInner<T>) -> Self {
        let active = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        inner.peak_in_flight.fetch_max(active, Ordering::SeqCst);
        Self {
            counter: &inner.in_flight,
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Holds one unit of the outstanding count; released even if the task never runs.
struct OutstandingGuard<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> OutstandingGuard<T> {
    fn new(inner: Arc<PoolInner<T>>) -> Self {
        inner.outstanding.send_modify(|count| *count += 1);
        Self { inner }
    }
}

impl<T> Drop for OutstandingGuard<T> {
    fn drop(&mut self) {
        self.inner.outstanding.send_modify(|count| *count -= 1);
    }
}

/// Handle to one submitted call. Resolves to its [`CallOutcome`].
#[derive(Debug)]
pub struct CallHandle {
    task: JoinHandle<CallOutcome>,
}

impl CallHandle {
    /// Cancel the call. Awaiting the handle afterwards yields `Cancelled`.
    pub fn abort(&self) {
        self.task.abort();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Future for CallHandle {
    type Output = CallOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task).poll(cx).map(|joined| {
            joined.unwrap_or_else(|e| {
                if e.is_panic() {
                    tracing::warn!("Call task panicked: {e}");
                }
                CallOutcome::Failure(TransportError::Cancelled)
            })
        })
    }
}

/// Per-call headers override session defaults (case-insensitively), and compressed
/// transport is always requested.
fn merge_headers(
    defaults: &[(String, String)],
    overrides: &BTreeMap<String, String>,
) -> Vec<(String, String)> {
    let mut merged: Vec<(String, String)> = defaults
        .iter()
        .filter(|(name, _)| {
            !overrides.keys().any(|key| key.eq_ignore_ascii_case(name))
                && !name.eq_ignore_ascii_case(ACCEPT_ENCODING)
        })
        .cloned()
        .collect();
    merged.extend(
        overrides
            .iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case(ACCEPT_ENCODING))
            .map(|(name, value)| (name.clone(), value.clone())),
    );
    merged.push((ACCEPT_ENCODING.to_string(), COMPRESSED_ENCODING.to_string()));
    merged
}

fn validate_base_url(raw: &str, allow_http: bool) -> Result<String, UsageError> {
    let normalized = fanout_types::normalize_base_url(raw);
    let parsed = Url::parse(&normalized).map_err(|e| UsageError::InvalidBaseUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "https" => Ok(normalized),
        "http" if allow_http => Ok(normalized),
        "http" => Err(UsageError::InvalidBaseUrl {
            url: raw.to_string(),
            reason: "plain http requires allow_http".to_string(),
        }),
        other => Err(UsageError::InvalidBaseUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme {other:?}"),
        }),
    }
}
