//! Request pipeline
//!
//! Every call to the fx API goes through the same ordered chain:
//!
//! 1. `CorrelationStage` tags the request with a fresh `X-Correlation-ID`
//! 2. `CredentialStage` attaches the bearer token, waiting on the session's
//!    single-flight refresh first when the token is inside its refresh window
//! 3. dispatch through the `HttpExecutor`
//! 4. normalization of transport and status failures into `Error`; a 401
//!    ends the session before the error is returned
//!
//! Stages 1-2 are `Stage` trait objects and can be replaced with
//! `Pipeline::with_stages`. Nothing in the pipeline retries.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use session::{LOGIN_PATH, REASON_UNAUTHORIZED, REGISTER_PATH, SessionManager};
use tracing::{debug, warn};
use transport::header::{AUTHORIZATION, HeaderName, HeaderValue};
use transport::{
    CORRELATION_HEADER, HttpExecutor, HttpRequest, HttpResponse, StatusClass, classify_status,
    correlation_id,
};

use crate::error::{Error, Result};
use crate::metrics;

/// Boxed future returned by `Stage::prepare`.
pub type StageFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// A request on its way to the executor.
#[derive(Debug)]
pub struct Outbound {
    pub request: HttpRequest,
    pub correlation_id: Option<String>,
    /// Session generation of the bearer token attached by the credential
    /// stage, if one was attached.
    pub credential_generation: Option<u64>,
}

/// One pre-dispatch step. A stage that fails aborts the request.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;
    fn prepare<'a>(&'a self, outbound: &'a mut Outbound) -> StageFuture<'a>;
}

/// Attaches a unique correlation id. Never fails.
pub struct CorrelationStage;

impl Stage for CorrelationStage {
    fn name(&self) -> &'static str {
        "correlation"
    }

    fn prepare<'a>(&'a self, outbound: &'a mut Outbound) -> StageFuture<'a> {
        Box::pin(async move {
            let id = correlation_id();
            if let Ok(value) = HeaderValue::from_str(&id) {
                outbound
                    .request
                    .headers
                    .insert(HeaderName::from_static(CORRELATION_HEADER), value);
            }
            outbound.correlation_id = Some(id);
            Ok(())
        })
    }
}

/// Attaches the session's bearer token.
pub struct CredentialStage {
    session: SessionManager,
}

impl CredentialStage {
    pub fn new(session: SessionManager) -> Self {
        Self { session }
    }
}

impl Stage for CredentialStage {
    fn name(&self) -> &'static str {
        "credential"
    }

    fn prepare<'a>(&'a self, outbound: &'a mut Outbound) -> StageFuture<'a> {
        Box::pin(async move {
            if is_credential_exempt(&outbound.request.path()) {
                return Ok(());
            }

            let token = if self.session.should_refresh().await {
                Some(self.session.ensure_fresh_token().await?)
            } else {
                self.session.current_token().await
            };

            if let Some(token) = token {
                let value = HeaderValue::from_str(&format!("Bearer {}", token.value.expose()))
                    .map_err(|e| Error::Validation(format!("bearer token is not a valid header: {e}")))?;
                outbound.request.headers.insert(AUTHORIZATION, value);
                outbound.credential_generation = Some(token.generation);
            }
            Ok(())
        })
    }
}

/// Login and registration never carry a credential.
fn is_credential_exempt(path: &str) -> bool {
    path.ends_with(LOGIN_PATH) || path.ends_with(REGISTER_PATH)
}

/// Composed request pipeline. Cheap to clone.
#[derive(Clone)]
pub struct Pipeline {
    base_url: Arc<str>,
    executor: Arc<dyn HttpExecutor>,
    session: SessionManager,
    stages: Arc<[Box<dyn Stage>]>,
}

impl Pipeline {
    /// Pipeline with the standard correlation and credential stages.
    pub fn new(
        base_url: impl Into<String>,
        executor: Arc<dyn HttpExecutor>,
        session: SessionManager,
    ) -> Self {
        let stages: Vec<Box<dyn Stage>> = vec![
            Box::new(CorrelationStage),
            Box::new(CredentialStage::new(session.clone())),
        ];
        Self::with_stages(base_url, executor, session, stages)
    }

    pub fn with_stages(
        base_url: impl Into<String>,
        executor: Arc<dyn HttpExecutor>,
        session: SessionManager,
        stages: Vec<Box<dyn Stage>>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').into(),
            executor,
            session,
            stages: stages.into(),
        }
    }

    /// Absolute URL for an API path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Run `request` through every stage and return the successful response.
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut outbound = Outbound {
            request,
            correlation_id: None,
            credential_generation: None,
        };
        for stage in self.stages.iter() {
            if let Err(e) = stage.prepare(&mut outbound).await {
                warn!(stage = stage.name(), path = %outbound.request.path(), error = %e, "request aborted before dispatch");
                metrics::record_failure(e.kind());
                return Err(e);
            }
        }

        let Outbound {
            request,
            correlation_id,
            credential_generation,
        } = outbound;
        let correlation_id = correlation_id.unwrap_or_default();
        let method = request.method.clone();
        let path = request.path();

        let started = Instant::now();
        let sent = self.executor.send(request).await;
        let elapsed = started.elapsed();

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                metrics::record_request(method.as_str(), None, elapsed.as_secs_f64());
                metrics::record_transport_failure(e.label());
                let error = Error::Transport(e);
                warn!(
                    %correlation_id,
                    %method,
                    path = %path,
                    elapsed_ms = elapsed.as_millis() as u64,
                    retryable = error.is_retryable(),
                    error = %error,
                    "request failed"
                );
                metrics::record_failure(error.kind());
                return Err(error);
            }
        };

        metrics::record_request(method.as_str(), Some(response.status), elapsed.as_secs_f64());
        debug!(
            %correlation_id,
            %method,
            path = %path,
            status = response.status,
            elapsed_ms = elapsed.as_millis() as u64,
            "request completed"
        );

        let error = match classify_status(response.status) {
            StatusClass::Success => return Ok(response),
            StatusClass::Unauthorized => {
                match credential_generation {
                    Some(generation) => {
                        self.session
                            .invalidate_if_current(generation, REASON_UNAUTHORIZED)
                            .await;
                    }
                    None => self.session.force_invalidate(REASON_UNAUTHORIZED).await,
                }
                Error::Unauthorized
            }
            StatusClass::Invalid => Error::Validation(server_message(&response)),
            StatusClass::Transient | StatusClass::Rejected => Error::Rejected {
                status: response.status,
                message: server_message(&response),
            },
        };
        warn!(
            %correlation_id,
            %method,
            path = %path,
            status = response.status,
            kind = error.kind(),
            retryable = error.is_retryable(),
            error = %error,
            "request failed"
        );
        metrics::record_failure(error.kind());
        Err(error)
    }

    /// Execute and decode a JSON response body.
    pub async fn fetch<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<T> {
        let response = self.execute(request).await?;
        response
            .json()
            .map_err(|e| Error::Validation(format!("unexpected response body: {e}")))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
}

/// Best human-readable message in an error response.
fn server_message(response: &HttpResponse) -> String {
    if let Ok(body) = response.json::<ErrorBody>() {
        if let Some(message) = body.message.or(body.error_code) {
            return message;
        }
    }
    let text = response.text();
    if text.trim().is_empty() {
        format!("HTTP {}", response.status)
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{NOW, jwt, logged_in_client, test_client, token_reply};
    use common::NavigationCommand;
    use serde_json::json;
    use session::{LOGIN_ROUTE, REFRESH_PATH};
    use std::time::Duration;
    use transport::mock::MockReply;
    use transport::{Method, TransportError};

    fn rates_request(client: &crate::testing::TestClient) -> HttpRequest {
        HttpRequest::get(client.pipeline.url("/rates"))
    }

    #[tokio::test]
    async fn every_request_gets_its_own_correlation_id() {
        let client = test_client();
        client.mock.always(Method::GET, "/rates", MockReply::json(200, json!({})));

        client.pipeline.execute(rates_request(&client)).await.unwrap();
        client.pipeline.execute(rates_request(&client)).await.unwrap();

        let ids: Vec<_> = client
            .mock
            .requests()
            .iter()
            .map(|r| r.headers[CORRELATION_HEADER].to_str().unwrap().to_string())
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.iter().all(|id| id.starts_with("req_")));
        assert_ne!(ids[0], ids[1]);
    }

    #[tokio::test]
    async fn anonymous_requests_carry_no_credential() {
        let client = test_client();
        client.mock.always(Method::GET, "/rates", MockReply::json(200, json!({})));

        client.pipeline.execute(rates_request(&client)).await.unwrap();
        assert!(!client.mock.requests()[0].headers.contains_key(AUTHORIZATION));
    }

    #[tokio::test]
    async fn signed_in_requests_carry_bearer_token() {
        let client = logged_in_client().await;
        client.mock.always(Method::GET, "/rates", MockReply::json(200, json!({})));

        client.pipeline.execute(rates_request(&client)).await.unwrap();
        let sent = client.mock.requests().pop().unwrap();
        assert_eq!(
            sent.headers[AUTHORIZATION].to_str().unwrap(),
            format!("Bearer {}", jwt(NOW, 900))
        );
    }

    #[tokio::test]
    async fn login_and_register_paths_are_exempt() {
        let client = logged_in_client().await;
        client.mock.always(Method::POST, "/auth/register", MockReply::json(200, json!({})));

        client
            .pipeline
            .execute(HttpRequest::post(client.pipeline.url("/auth/register")))
            .await
            .unwrap();
        let sent = client.mock.requests().pop().unwrap();
        assert!(!sent.headers.contains_key(AUTHORIZATION));
        assert!(sent.headers.contains_key(CORRELATION_HEADER));
    }

    #[tokio::test]
    async fn login_with_redirect_query_stays_exempt() {
        let client = logged_in_client().await;
        client.mock.always(Method::POST, "/auth/login", MockReply::json(200, json!({})));

        let request = HttpRequest::post(client.pipeline.url("/auth/login"))
            .query([("next", "https://app.test/rates")])
            .unwrap();
        client.pipeline.execute(request).await.unwrap();

        let sent = client.mock.requests().pop().unwrap();
        assert_eq!(sent.path(), "/api/v1/auth/login");
        assert!(!sent.headers.contains_key(AUTHORIZATION));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_share_one_refresh() {
        let client = logged_in_client().await;
        let later = NOW + 700_000;
        client.clock.set(later);
        client.mock.push(
            Method::POST,
            REFRESH_PATH,
            token_reply(&jwt(later, 900), "rt_2").delayed(Duration::from_millis(100)),
        );
        client.mock.always(Method::GET, "/rates", MockReply::json(200, json!({})));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let pipeline = client.pipeline.clone();
            let request = rates_request(&client);
            handles.push(tokio::spawn(async move { pipeline.execute(request).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(client.mock.count(Method::POST, REFRESH_PATH), 1);
        let expected = format!("Bearer {}", jwt(later, 900));
        let rate_requests: Vec<_> = client
            .mock
            .requests()
            .into_iter()
            .filter(|r| r.path().ends_with("/rates"))
            .collect();
        assert_eq!(rate_requests.len(), 5);
        assert!(
            rate_requests
                .iter()
                .all(|r| r.headers[AUTHORIZATION].to_str().unwrap() == expected)
        );
    }

    #[tokio::test]
    async fn rejection_forces_logout() {
        let mut client = logged_in_client().await;
        client.mock.push(Method::GET, "/rates", MockReply::status(401));

        let err = client.pipeline.execute(rates_request(&client)).await.unwrap_err();

        assert_eq!(err, Error::Unauthorized);
        assert!(!client.session.is_authenticated());
        assert_eq!(
            client.nav.try_recv().unwrap(),
            NavigationCommand::to(LOGIN_ROUTE).with_param("reason", REASON_UNAUTHORIZED)
        );
        assert!(client.nav.try_recv().is_err());
    }

    #[tokio::test]
    async fn anonymous_rejection_still_invalidates() {
        let mut client = test_client();
        client.mock.push(Method::GET, "/rates", MockReply::status(401));

        let err = client.pipeline.execute(rates_request(&client)).await.unwrap_err();
        assert_eq!(err, Error::Unauthorized);
        assert_eq!(
            client.nav.try_recv().unwrap().param("reason"),
            Some(REASON_UNAUTHORIZED)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_of_superseded_token_is_ignored() {
        let mut client = logged_in_client().await;
        client.mock.push(
            Method::GET,
            "/rates",
            MockReply::status(401).delayed(Duration::from_millis(100)),
        );
        client.mock.always(Method::GET, "/rates", MockReply::json(200, json!({})));

        let pipeline = client.pipeline.clone();
        let request = rates_request(&client);
        let stale = tokio::spawn(async move { pipeline.execute(request).await });
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        let later = NOW + 700_000;
        client.clock.set(later);
        client
            .mock
            .push(Method::POST, REFRESH_PATH, token_reply(&jwt(later, 900), "rt_2"));
        client.pipeline.execute(rates_request(&client)).await.unwrap();

        assert_eq!(stale.await.unwrap().unwrap_err(), Error::Unauthorized);
        assert!(client.session.is_authenticated(), "refreshed session survives");
        assert!(client.nav.try_recv().is_err());
    }

    #[tokio::test]
    async fn refresh_failure_aborts_before_dispatch() {
        let client = logged_in_client().await;
        client.clock.set(NOW + 700_000);
        client.mock.push(Method::POST, REFRESH_PATH, MockReply::status(401));

        let err = client.pipeline.execute(rates_request(&client)).await.unwrap_err();

        assert!(matches!(err, Error::Session(session::Error::Refresh(_))));
        assert_eq!(client.mock.count(Method::GET, "/rates"), 0);
        assert!(!client.session.is_authenticated());
    }

    #[tokio::test]
    async fn failures_are_normalized() {
        let client = test_client();
        client.mock.push(
            Method::GET,
            "/rates",
            MockReply::json(400, json!({"message": "Invalid base currency"})),
        );
        client.mock.push(
            Method::GET,
            "/rates",
            MockReply::json(503, json!({"errorCode": "RATES_UNAVAILABLE"})),
        );
        client.mock.push(Method::GET, "/rates", MockReply::status(404));
        client.mock.push(
            Method::GET,
            "/rates",
            MockReply::error(TransportError::Timeout("30s".into())),
        );

        let mut results = Vec::new();
        for _ in 0..4 {
            results.push(client.pipeline.execute(rates_request(&client)).await.unwrap_err());
        }

        assert_eq!(results[0], Error::Validation("Invalid base currency".into()));
        assert_eq!(
            results[1],
            Error::Rejected {
                status: 503,
                message: "RATES_UNAVAILABLE".into()
            }
        );
        assert_eq!(
            results[2],
            Error::Rejected {
                status: 404,
                message: "HTTP 404".into()
            }
        );
        assert_eq!(results[3], Error::Transport(TransportError::Timeout("30s".into())));
    }

    #[tokio::test]
    async fn fetch_reports_bad_bodies_as_validation() {
        let client = test_client();
        client.mock.push(Method::GET, "/rates", MockReply::raw(200, "<html>"));

        let result: Result<serde_json::Value> = client.pipeline.fetch(rates_request(&client)).await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn requests_and_failures_are_counted() {
        use metrics_exporter_prometheus::PrometheusBuilder;

        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = ::metrics::set_default_local_recorder(&recorder);

        let client = test_client();
        client.mock.push(Method::GET, "/rates", MockReply::json(200, json!({})));
        client.mock.push(Method::GET, "/rates", MockReply::status(500));
        client.pipeline.execute(rates_request(&client)).await.unwrap();
        client.pipeline.execute(rates_request(&client)).await.unwrap_err();

        let output = handle.render();
        assert!(output.contains("client_requests_total"));
        assert!(output.contains("status=\"500\""));
        assert!(output.contains("client_request_failures_total{kind=\"rejected\"} 1"));
    }

    #[tokio::test]
    async fn transport_failures_are_counted_by_cause() {
        use metrics_exporter_prometheus::PrometheusBuilder;

        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = ::metrics::set_default_local_recorder(&recorder);

        let client = test_client();
        client.mock.push(
            Method::GET,
            "/rates",
            MockReply::error(TransportError::Connect("refused".into())),
        );
        client.mock.push(
            Method::GET,
            "/rates",
            MockReply::error(TransportError::Timeout("30s".into())),
        );
        for _ in 0..2 {
            let err = client.pipeline.execute(rates_request(&client)).await.unwrap_err();
            assert!(err.is_retryable());
        }

        let output = handle.render();
        assert!(output.contains("client_transport_failures_total{cause=\"connect\"} 1"));
        assert!(output.contains("client_transport_failures_total{cause=\"timeout\"} 1"));
        assert!(output.contains("client_request_failures_total{kind=\"transport\"} 2"));
    }
}
