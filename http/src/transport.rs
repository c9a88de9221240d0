//! One network call and its tagged outcome.

use std::future::Future;

use fanout_config::DispatchSettings;
use fanout_types::{HttpMethod, TransportError};
use reqwest::{Method, Response};

use crate::{client_builder, read_capped_error_body};

/// A fully prepared call: absolute URL, merged headers, optional JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundCall {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl OutboundCall {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// 2xx reply with its decoded JSON body (`Null` when the body was empty).
#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    pub body: serde_json::Value,
}

/// Outcome of one call.
///
/// This is a sum type that structurally distinguishes success from failure,
/// so a non-2xx response can never be mistaken for a payload.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    Success(HttpReply),
    Failure(TransportError),
}

impl CallOutcome {
    pub fn into_result(self) -> Result<HttpReply, TransportError> {
        match self {
            Self::Success(reply) => Ok(reply),
            Self::Failure(error) => Err(error),
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Performs a single network call.
pub trait Transport: Send + Sync + 'static {
    fn execute(&self, call: OutboundCall) -> impl Future<Output = CallOutcome> + Send;
}

/// reqwest-backed transport. One instance owns one connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(settings: &DispatchSettings) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: client_builder(settings).build()?,
        })
    }
}

impl Transport for HttpTransport {
    async fn execute(&self, call: OutboundCall) -> CallOutcome {
        let mut request = self.client.request(to_method(call.method), &call.url);
        for (name, value) in &call.headers {
            request = request.header(name, value);
        }
        if let Some(body) = &call.body {
            request = request.json(body);
        }

        match request.send().await {
            Ok(response) => classify_response(response).await,
            Err(e) => {
                tracing::debug!(error = %e, url = %call.url, "Request failed before a response");
                CallOutcome::Failure(transport_error(&e))
            }
        }
    }
}

fn to_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Head => Method::HEAD,
    }
}

async fn classify_response(response: Response) -> CallOutcome {
    let status = response.status();
    if !status.is_success() {
        let body = read_capped_error_body(response).await;
        return CallOutcome::Failure(TransportError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => return CallOutcome::Failure(transport_error(&e)),
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return CallOutcome::Success(HttpReply {
            status: status.as_u16(),
            body: serde_json::Value::Null,
        });
    }

    match serde_json::from_slice(&bytes) {
        Ok(body) => CallOutcome::Success(HttpReply {
            status: status.as_u16(),
            body,
        }),
        Err(e) => CallOutcome::Failure(TransportError::Decode {
            message: e.to_string(),
        }),
    }
}

fn transport_error(error: &reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_connect() {
        TransportError::Connect {
            message: error.to_string(),
        }
    } else if error.is_decode() || error.is_body() {
        TransportError::Decode {
            message: error.to_string(),
        }
    } else {
        TransportError::Request {
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_transport() -> HttpTransport {
        let settings = DispatchSettings::default()
            .with_allow_http(true)
            .with_timeout(Some(Duration::from_millis(500)));
        HttpTransport::new(&settings).unwrap()
    }

    fn call(method: HttpMethod, url: String) -> OutboundCall {
        OutboundCall {
            method,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    #[tokio::test]
    async fn success_decodes_json_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/composite"))
            .and(header("Authorization", "Bearer t"))
            .and(body_json(json!({"compositeRequest": []})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"compositeResponse": []})))
            .expect(1)
            .mount(&server)
            .await;

        let mut outbound = call(HttpMethod::Post, format!("{}/composite", server.uri()));
        outbound.headers.push(("Authorization".into(), "Bearer t".into()));
        outbound.body = Some(json!({"compositeRequest": []}));

        let outcome = test_transport().execute(outbound).await;

        assert_eq!(
            outcome,
            CallOutcome::Success(HttpReply {
                status: 200,
                body: json!({"compositeResponse": []}),
            })
        );
    }

    #[tokio::test]
    async fn empty_body_becomes_null() {
        let server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/sobjects/Account/001"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let outcome = test_transport()
            .execute(call(
                HttpMethod::Delete,
                format!("{}/sobjects/Account/001", server.uri()),
            ))
            .await;

        match outcome {
            CallOutcome::Success(reply) => {
                assert_eq!(reply.status, 204);
                assert_eq!(reply.body, serde_json::Value::Null);
            }
            other => panic!("expected Success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_2xx_status_is_a_transport_failure() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/composite"))
            .respond_with(
                ResponseTemplate::new(401).set_body_string(r#"[{"errorCode":"INVALID_SESSION_ID"}]"#),
            )
            .mount(&server)
            .await;

        let outcome = test_transport()
            .execute(call(HttpMethod::Post, format!("{}/composite", server.uri())))
            .await;

        match outcome {
            CallOutcome::Failure(error) => {
                assert!(error.is_authorization());
                assert!(matches!(
                    error,
                    TransportError::Status { status: 401, ref body } if body.contains("INVALID_SESSION_ID")
                ));
            }
            other => panic!("expected Failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_json_is_a_decode_failure() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/limits"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let outcome = test_transport()
            .execute(call(HttpMethod::Get, format!("{}/limits", server.uri())))
            .await;

        assert!(matches!(
            outcome,
            CallOutcome::Failure(TransportError::Decode { .. })
        ));
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let outcome = test_transport()
            .execute(call(HttpMethod::Get, format!("{}/slow", server.uri())))
            .await;

        assert_eq!(outcome, CallOutcome::Failure(TransportError::Timeout));
    }

    #[tokio::test]
    async fn refused_connection_is_reported() {
        // Bind then drop a listener so nothing accepts on the port.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let outcome = test_transport()
            .execute(call(HttpMethod::Get, format!("http://127.0.0.1:{port}/limits")))
            .await;

        assert!(matches!(
            outcome,
            CallOutcome::Failure(TransportError::Connect { .. } | TransportError::Request { .. })
        ));
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut outbound = call(HttpMethod::Get, "https://x.test/".to_string());
        outbound
            .headers
            .push(("Accept-Encoding".to_string(), "gzip".to_string()));
        assert_eq!(outbound.header("accept-encoding"), Some("gzip"));
        assert_eq!(outbound.header("authorization"), None);
    }
}
