//! Bounded HTTP connection pool and parallel dispatcher.
//!
//! # Architecture
//!
//! - [`ConnectionPool`] - Scoped pool bound to one [`AuthenticatedSession`]. Caps the
//!   number of simultaneous calls; excess submissions queue for a permit.
//! - [`Transport`] - The seam that performs one network call. [`HttpTransport`] is the
//!   reqwest-backed implementation; tests substitute instrumented doubles.
//! - [`dispatch`] / [`dispatch_stream`] - Submit a sequence of requests and collect
//!   their outcomes in **completion order**.
//!
//! # Error Handling
//!
//! Each call resolves to a [`CallOutcome`]: a decoded JSON reply for 2xx responses, or a
//! [`TransportError`] for connection failures, timeouts and non-2xx statuses. Misuse of
//! the pool (submitting after `close`) is a [`UsageError`], returned synchronously.
//!
//! [`AuthenticatedSession`]: fanout_types::AuthenticatedSession
//! [`TransportError`]: fanout_types::TransportError
//! [`UsageError`]: fanout_types::UsageError

mod dispatch;
mod pool;
mod transport;

use std::time::Duration;

use fanout_config::DispatchSettings;

pub use dispatch::{DispatchStream, Dispatched, dispatch, dispatch_stream};
pub use pool::{CallHandle, ConnectionPool, PoolError, PoolStats};
pub use transport::{CallOutcome, HttpReply, HttpTransport, OutboundCall, Transport};

// Note: reqwest only exposes tcp_keepalive (idle time); interval/retries use platform defaults.
const TCP_KEEPALIVE_SECS: u64 = 60;

const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// Client builder shared by every pool.
///
/// Redirects are never followed and plain http is refused unless the settings allow it.
fn client_builder(settings: &DispatchSettings) -> reqwest::ClientBuilder {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(settings.connect_timeout())
        .redirect(reqwest::redirect::Policy::none())
        .https_only(!settings.allow_http())
        .gzip(true)
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        // Idle connections kept per host match the concurrency cap
        .pool_max_idle_per_host(settings.concurrency())
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)));

    if let Some(timeout) = settings.timeout() {
        builder = builder.timeout(timeout);
    }

    builder
}

pub(crate) async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}
