//! The authenticated-session boundary.
//!
//! Token acquisition, refresh and API-version discovery belong to whoever implements
//! [`AuthenticatedSession`]. The dispatcher only reads the values it exposes.

use std::collections::BTreeMap;
use std::fmt;

/// Bearer credential.
///
/// Note: `Debug` is manually implemented to redact the token, preventing accidental
/// credential disclosure in logs or error messages.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// What the dispatcher consumes from an authenticated remote session.
pub trait AuthenticatedSession: Send + Sync {
    /// Base endpoint URL, ending in exactly one `/`.
    fn base_url(&self) -> &str;

    /// Default headers for every call: at least the bearer credential.
    fn headers(&self) -> &BTreeMap<String, String>;

    fn api_version(&self) -> &str;
}

/// Ensure `url` ends with exactly one trailing slash.
#[must_use]
pub fn normalize_base_url(url: &str) -> String {
    format!("{}/", url.trim_end_matches('/'))
}

/// A session whose credential was obtained elsewhere and does not change.
#[derive(Clone)]
pub struct StaticSession {
    base_url: String,
    api_version: String,
    headers: BTreeMap<String, String>,
}

impl StaticSession {
    /// Session rooted at `<instance_url>/services/data/v<api_version>/`.
    pub fn new(
        instance_url: &str,
        access_token: &AccessToken,
        api_version: impl Into<String>,
    ) -> Self {
        let api_version = api_version.into();
        let base_url = format!(
            "{}services/data/v{api_version}/",
            normalize_base_url(instance_url)
        );
        Self::with_base_url(&base_url, access_token, api_version)
    }

    /// Session rooted at an explicit base URL.
    pub fn with_base_url(
        base_url: &str,
        access_token: &AccessToken,
        api_version: impl Into<String>,
    ) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", access_token.expose_secret()),
        );
        headers.insert("Content-Type".to_string(), "application/json".to_string());

        Self {
            base_url: normalize_base_url(base_url),
            api_version: api_version.into(),
            headers,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

impl AuthenticatedSession for StaticSession {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    fn api_version(&self) -> &str {
        &self.api_version
    }
}

// Manual Debug impl to prevent leaking the bearer token in logs.
impl fmt::Debug for StaticSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: BTreeMap<&str, &str> = self
            .headers
            .iter()
            .map(|(name, value)| {
                if name.eq_ignore_ascii_case("authorization") {
                    (name.as_str(), "[REDACTED]")
                } else {
                    (name.as_str(), value.as_str())
                }
            })
            .collect();
        f.debug_struct("StaticSession")
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .field("headers", &headers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_trailing_slashes() {
        assert_eq!(normalize_base_url("https://x.test"), "https://x.test/");
        assert_eq!(normalize_base_url("https://x.test/"), "https://x.test/");
        assert_eq!(normalize_base_url("https://x.test///"), "https://x.test/");
    }

    #[test]
    fn instance_session_targets_versioned_data_api() {
        let token = AccessToken::new("00Dxx!token");
        let session = StaticSession::new("https://acme.my.salesforce.com/", &token, "62.0");

        assert_eq!(
            session.base_url(),
            "https://acme.my.salesforce.com/services/data/v62.0/"
        );
        assert_eq!(session.api_version(), "62.0");
        assert_eq!(session.headers()["Authorization"], "Bearer 00Dxx!token");
        assert_eq!(session.headers()["Content-Type"], "application/json");
    }

    #[test]
    fn debug_output_redacts_credentials() {
        let token = AccessToken::new("super-secret");
        let session = StaticSession::with_base_url("http://127.0.0.1:8080", &token, "62.0");

        let rendered = format!("{session:?} {token:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("[REDACTED]"));
        assert!(rendered.contains("AccessToken(<redacted>)"));
    }

    #[test]
    fn extra_headers_are_added() {
        let token = AccessToken::new("t");
        let session = StaticSession::with_base_url("http://localhost", &token, "62.0")
            .with_header("X-PrettyPrint", "1");
        assert_eq!(session.headers()["X-PrettyPrint"], "1");
        assert_eq!(session.base_url(), "http://localhost/");
    }
}
