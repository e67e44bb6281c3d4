//! Network executor abstraction for the fx client
//!
//! Defines the `HttpExecutor` trait that decouples session and pipeline logic
//! from the HTTP stack. `ReqwestExecutor` is the production implementation;
//! the `mock` module (feature `mock`) provides a scripted executor for tests.
//!
//! The executor only moves bytes. It never interprets status codes: a 401 is
//! a successful `send`. Classification happens in `classify_status`, and what
//! to do about it is the caller's concern.

#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod reqwest_executor;

pub use reqwest_executor::ReqwestExecutor;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub use reqwest::{Method, header};

/// Header carrying the per-request correlation identifier.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Generate a fresh correlation identifier (`req_<uuid-simple>`).
pub fn correlation_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

/// An outbound request, fully materialized.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Serialize `body` as JSON and set the content type.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, serde_json::Error> {
        let bytes = serde_json::to_vec(body)?;
        self.headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.body = Some(Bytes::from(bytes));
        Ok(self)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Append percent-encoded query parameters. The URL must be absolute.
    pub fn query<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self, InvalidUrl>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut url = reqwest::Url::parse(&self.url).map_err(|e| InvalidUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in pairs {
                query.append_pair(key.as_ref(), value.as_ref());
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        self.url = url.into();
        Ok(self)
    }

    /// Path component of the URL, without scheme, authority, or query.
    pub fn path(&self) -> String {
        url_path(&self.url)
    }
}

/// A URL that could not be parsed for query construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid url {url}: {reason}")]
pub struct InvalidUrl {
    pub url: String,
    pub reason: String,
}

/// A response as received. Non-2xx statuses are still `Ok` responses.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// The request never produced a response.
///
/// All variants are retryable from the caller's point of view; the core
/// itself never retries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("response body unreadable: {0}")]
    Body(String),

    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            TransportError::Timeout(_) => "timeout",
            TransportError::Connect(_) => "connect",
            TransportError::Body(_) => "body",
            TransportError::Other(_) => "other",
        }
    }

    /// Whether the caller may reasonably try again. Always true: the request
    /// never reached a verdict.
    pub fn is_retryable(&self) -> bool {
        true
    }
}

/// Boxed future returned by `HttpExecutor::send`.
pub type SendFuture<'a> =
    Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>>;

/// Abstraction over the network: `send(request) -> response | TransportError`.
///
/// Uses `Pin<Box<dyn Future>>` for dyn-compatibility (`Arc<dyn HttpExecutor>`).
pub trait HttpExecutor: Send + Sync {
    fn send(&self, request: HttpRequest) -> SendFuture<'_>;
}

/// Coarse classification of a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// The authority rejected the credential (401)
    Unauthorized,
    /// Malformed request (400, 422)
    Invalid,
    /// Server-side or gateway failure, worth retrying later (408, 429, 5xx)
    Transient,
    /// Any other non-success status
    Rejected,
}

/// Classify a response status code.
///
/// Only 401 counts as an authority rejection. 403 means the credential was
/// accepted but lacks permission, which must not end the session.
pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        401 => StatusClass::Unauthorized,
        400 | 422 => StatusClass::Invalid,
        408 | 429 | 500..=599 => StatusClass::Transient,
        _ => StatusClass::Rejected,
    }
}

/// Extract the path from an absolute or relative URL.
///
/// Relative URLs resolve against a placeholder origin, so a query holding
/// another URL never leaks into the path. Unparseable input yields `"/"`.
pub fn url_path(url: &str) -> String {
    let parsed = reqwest::Url::parse(url)
        .or_else(|_| reqwest::Url::parse(RELATIVE_ORIGIN).and_then(|base| base.join(url)));
    match parsed {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => "/".to_string(),
    }
}

const RELATIVE_ORIGIN: &str = "http://relative.invalid/";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_ids_are_prefixed_and_unique() {
        let a = correlation_id();
        let b = correlation_id();
        assert!(a.starts_with("req_"), "got: {a}");
        assert_eq!(a.len(), 4 + 32);
        assert_ne!(a, b);
    }

    #[test]
    fn json_body_sets_content_type() {
        let req = HttpRequest::post("https://api.test/convert")
            .json(&serde_json::json!({"amount": 5}))
            .unwrap();
        assert_eq!(
            req.headers.get(reqwest::header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(req.body.as_deref(), Some(br#"{"amount":5}"#.as_slice()));
    }

    #[test]
    fn query_pairs_are_percent_encoded() {
        let req = HttpRequest::get("https://api.test/api/v1/convert/history")
            .query([("pageNumber", "2"), ("startDate", "2024-01-01T00:00:00Z")])
            .unwrap();
        assert_eq!(
            req.url,
            "https://api.test/api/v1/convert/history?pageNumber=2&startDate=2024-01-01T00%3A00%3A00Z"
        );
        assert_eq!(req.path(), "/api/v1/convert/history");
    }

    #[test]
    fn empty_query_leaves_url_untouched() {
        let req = HttpRequest::get("https://api.test/rates")
            .query(Vec::<(&str, &str)>::new())
            .unwrap();
        assert_eq!(req.url, "https://api.test/rates");
    }

    #[test]
    fn relative_url_cannot_take_query() {
        let err = HttpRequest::get("/rates").query([("base", "USD")]).unwrap_err();
        assert_eq!(err.url, "/rates");
    }

    #[test]
    fn url_path_strips_authority_and_query() {
        assert_eq!(url_path("https://api.test/api/v1/rates?base=USD"), "/api/v1/rates");
        assert_eq!(url_path("http://127.0.0.1:8080"), "/");
        assert_eq!(url_path("/auth/login"), "/auth/login");
        assert_eq!(url_path("/convert/history?pageNumber=2"), "/convert/history");
    }

    #[test]
    fn url_path_ignores_urls_inside_the_query() {
        assert_eq!(url_path("/auth/login?next=https://x"), "/auth/login");
        assert_eq!(
            url_path("https://api.test/api/v1/auth/login?next=https://evil.test/rates"),
            "/api/v1/auth/login"
        );
        assert_eq!(url_path("/rates#https://x/other"), "/rates");
    }

    #[test]
    fn classify_success_range() {
        assert_eq!(classify_status(200), StatusClass::Success);
        assert_eq!(classify_status(204), StatusClass::Success);
    }

    #[test]
    fn classify_401_is_unauthorized() {
        assert_eq!(classify_status(401), StatusClass::Unauthorized);
    }

    #[test]
    fn classify_403_is_not_an_authority_rejection() {
        assert_eq!(classify_status(403), StatusClass::Rejected);
    }

    #[test]
    fn classify_validation_statuses() {
        assert_eq!(classify_status(400), StatusClass::Invalid);
        assert_eq!(classify_status(422), StatusClass::Invalid);
    }

    #[test]
    fn classify_transient_statuses() {
        for status in [408, 429, 500, 502, 503, 504] {
            assert_eq!(classify_status(status), StatusClass::Transient, "{status}");
        }
    }

    #[test]
    fn classify_unknown_is_rejected() {
        assert_eq!(classify_status(418), StatusClass::Rejected);
        assert_eq!(classify_status(404), StatusClass::Rejected);
    }

    #[test]
    fn response_success_and_json() {
        let resp = HttpResponse::new(200, r#"{"ok":true}"#);
        assert!(resp.is_success());
        let v: serde_json::Value = resp.json().unwrap();
        assert_eq!(v["ok"], true);
        assert!(!HttpResponse::new(401, "").is_success());
    }

    #[test]
    fn transport_error_labels() {
        assert_eq!(TransportError::Timeout("x".into()).label(), "timeout");
        assert_eq!(TransportError::Connect("x".into()).label(), "connect");
        assert!(TransportError::Body("x".into()).is_retryable());
    }
}
