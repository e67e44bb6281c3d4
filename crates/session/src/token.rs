//! Authority endpoint calls
//!
//! Login, registration, refresh, and logout talk to the authority directly
//! through the executor rather than through the request pipeline: these
//! calls carry no bearer credential (logout excepted) and must never trigger
//! a refresh themselves.
//!
//! Every response body is the standard envelope `{success, data, message}`.

use common::Secret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use transport::header::{AUTHORIZATION, HeaderName, HeaderValue};
use transport::{CORRELATION_HEADER, HttpExecutor, HttpRequest, correlation_id};

use crate::constants::{LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH, REGISTER_PATH};
use crate::error::{Error, Result};
use crate::user::User;

/// Standard response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: String,
    pub password: Secret<String>,
}

impl LoginRequest {
    pub fn new(username: impl Into<String>, password: impl Into<Secret<String>>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: Secret<String>,
    pub confirm_password: Secret<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshTokenRequest<'a> {
    refresh_token: &'a str,
}

/// Tokens plus profile, returned by both login and refresh.
///
/// `expires_in` is a delta in seconds from the response time.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(alias = "expiresInSeconds")]
    pub expires_in: u64,
    pub user: User,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Exchange username and password for a session.
pub async fn login(
    executor: &dyn HttpExecutor,
    base_url: &str,
    request: &LoginRequest,
) -> Result<LoginResponse> {
    let req = HttpRequest::post(endpoint(base_url, LOGIN_PATH))
        .json(request)
        .map_err(|e| Error::Validation(format!("encoding login request: {e}")))?;
    call(executor, req, Error::Authentication).await
}

/// Create an account. No session is established.
pub async fn register(
    executor: &dyn HttpExecutor,
    base_url: &str,
    request: &RegisterRequest,
) -> Result<User> {
    let req = HttpRequest::post(endpoint(base_url, REGISTER_PATH))
        .json(request)
        .map_err(|e| Error::Validation(format!("encoding register request: {e}")))?;
    call(executor, req, Error::Validation).await
}

/// Trade a refresh token for a new token pair.
pub async fn refresh(
    executor: &dyn HttpExecutor,
    base_url: &str,
    refresh_token: &str,
) -> Result<LoginResponse> {
    let req = HttpRequest::post(endpoint(base_url, REFRESH_PATH))
        .json(&RefreshTokenRequest { refresh_token })
        .map_err(|e| Error::Refresh(format!("encoding refresh request: {e}")))?;
    call(executor, req, Error::Refresh).await.map_err(|e| match e {
        Error::Transport(msg) => Error::Refresh(msg),
        other => other,
    })
}

/// Tell the authority to revoke `refresh_token`. Best-effort for callers.
pub async fn logout(
    executor: &dyn HttpExecutor,
    base_url: &str,
    access_token: &str,
    refresh_token: &str,
) -> Result<()> {
    let mut req = HttpRequest::post(endpoint(base_url, LOGOUT_PATH))
        .json(&RefreshTokenRequest { refresh_token })
        .map_err(|e| Error::Validation(format!("encoding logout request: {e}")))?;
    if let Ok(value) = HeaderValue::from_str(&format!("Bearer {access_token}")) {
        req = req.header(AUTHORIZATION, value);
    }

    let response = send(executor, req).await?;
    if response.is_success() {
        Ok(())
    } else {
        Err(Error::Authentication(rejection(response.status, &response.body)))
    }
}

/// Join the configured base URL and an endpoint path.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{path}", base_url.trim_end_matches('/'))
}

async fn send(executor: &dyn HttpExecutor, req: HttpRequest) -> Result<transport::HttpResponse> {
    let id = correlation_id();
    let mut req = req;
    if let Ok(value) = HeaderValue::from_str(&id) {
        req = req.header(HeaderName::from_static(CORRELATION_HEADER), value);
    }
    debug!(correlation_id = %id, method = %req.method, path = %req.path(), "authority request");
    executor
        .send(req)
        .await
        .map_err(|e| Error::Transport(e.to_string()))
}

async fn call<T: DeserializeOwned>(
    executor: &dyn HttpExecutor,
    req: HttpRequest,
    reject: fn(String) -> Error,
) -> Result<T> {
    let response = send(executor, req).await?;
    if !response.is_success() {
        return Err(reject(rejection(response.status, &response.body)));
    }

    let envelope: ApiEnvelope<T> = response
        .json()
        .map_err(|e| reject(format!("unreadable response: {e}")))?;
    match envelope {
        ApiEnvelope {
            success: true,
            data: Some(data),
            ..
        } => Ok(data),
        ApiEnvelope { message, .. } => Err(reject(
            message.unwrap_or_else(|| "request was not successful".to_string()),
        )),
    }
}

/// Message for a non-success response: the envelope message if present.
fn rejection(status: u16, body: &[u8]) -> String {
    let message = serde_json::from_slice::<ApiEnvelope<serde_json::Value>>(body)
        .ok()
        .and_then(|e| e.message);
    match message {
        Some(message) => format!("{status}: {message}"),
        None => format!("{status}: {}", String::from_utf8_lossy(body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::Role;
    use serde_json::json;
    use transport::mock::{MockExecutor, MockReply};
    use transport::{Method, TransportError};

    const BASE: &str = "https://api.test/api/v1/";

    fn login_body() -> serde_json::Value {
        json!({
            "success": true,
            "data": {
                "accessToken": "at_1",
                "refreshToken": "rt_1",
                "tokenType": "Bearer",
                "expiresIn": 900,
                "user": {"id": "u-1", "username": "ada", "email": "ada@x", "role": "User"}
            }
        })
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        assert_eq!(
            endpoint(BASE, LOGIN_PATH),
            "https://api.test/api/v1/auth/login"
        );
    }

    #[test]
    fn login_request_serializes_password() {
        let req = LoginRequest::new("ada", "pw");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json, json!({"username": "ada", "password": "pw"}));
        assert!(!format!("{req:?}").contains("pw\""));
    }

    #[tokio::test]
    async fn login_unwraps_envelope() {
        let mock = MockExecutor::new();
        mock.push(Method::POST, LOGIN_PATH, MockReply::json(200, login_body()));

        let resp = login(&mock, BASE, &LoginRequest::new("ada", "pw")).await.unwrap();
        assert_eq!(resp.access_token.expose(), "at_1");
        assert_eq!(resp.expires_in, 900);
        assert_eq!(resp.user.role, Role::User);

        let sent = &mock.requests()[0];
        assert!(sent.headers.contains_key(CORRELATION_HEADER));
        assert!(!sent.headers.contains_key(AUTHORIZATION));
    }

    #[tokio::test]
    async fn login_rejection_is_authentication_failure() {
        let mock = MockExecutor::new();
        mock.push(
            Method::POST,
            LOGIN_PATH,
            MockReply::json(401, json!({"success": false, "message": "Invalid credentials"})),
        );

        let err = login(&mock, BASE, &LoginRequest::new("ada", "bad")).await.unwrap_err();
        assert_eq!(err, Error::Authentication("401: Invalid credentials".into()));
    }

    #[tokio::test]
    async fn unsuccessful_envelope_is_rejection_even_with_200() {
        let mock = MockExecutor::new();
        mock.push(
            Method::POST,
            LOGIN_PATH,
            MockReply::json(200, json!({"success": false, "message": "Account locked"})),
        );
        let err = login(&mock, BASE, &LoginRequest::new("ada", "pw")).await.unwrap_err();
        assert_eq!(err, Error::Authentication("Account locked".into()));
    }

    #[tokio::test]
    async fn login_transport_failure_is_transport() {
        let mock = MockExecutor::new();
        mock.push(
            Method::POST,
            LOGIN_PATH,
            MockReply::error(TransportError::Connect("refused".into())),
        );
        let err = login(&mock, BASE, &LoginRequest::new("ada", "pw")).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn register_rejection_is_validation_failure() {
        let mock = MockExecutor::new();
        mock.push(
            Method::POST,
            REGISTER_PATH,
            MockReply::json(400, json!({"success": false, "message": "Username taken"})),
        );
        let req = RegisterRequest {
            username: "ada".into(),
            email: "ada@x".into(),
            password: "pw".into(),
            confirm_password: "pw".into(),
        };
        let err = register(&mock, BASE, &req).await.unwrap_err();
        assert_eq!(err, Error::Validation("400: Username taken".into()));
    }

    #[tokio::test]
    async fn refresh_failures_are_refresh_errors() {
        let mock = MockExecutor::new();
        mock.push(Method::POST, REFRESH_PATH, MockReply::status(401));
        mock.push(
            Method::POST,
            REFRESH_PATH,
            MockReply::error(TransportError::Timeout("slow".into())),
        );

        assert!(matches!(refresh(&mock, BASE, "rt").await, Err(Error::Refresh(_))));
        assert!(matches!(refresh(&mock, BASE, "rt").await, Err(Error::Refresh(_))));
    }

    #[tokio::test]
    async fn refresh_posts_refresh_token() {
        let mock = MockExecutor::new();
        mock.push(Method::POST, REFRESH_PATH, MockReply::json(200, login_body()));
        refresh(&mock, BASE, "rt_old").await.unwrap();

        let sent = &mock.requests()[0];
        let body: serde_json::Value = serde_json::from_slice(sent.body.as_ref().unwrap()).unwrap();
        assert_eq!(body, json!({"refreshToken": "rt_old"}));
    }

    #[tokio::test]
    async fn logout_sends_bearer_and_refresh_token() {
        let mock = MockExecutor::new();
        mock.push(Method::POST, LOGOUT_PATH, MockReply::json(200, json!({"success": true})));
        logout(&mock, BASE, "at_1", "rt_1").await.unwrap();

        let sent = &mock.requests()[0];
        assert_eq!(sent.headers[AUTHORIZATION], "Bearer at_1");
    }
}
