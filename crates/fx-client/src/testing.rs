//! Fixtures shared by the unit tests

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::{ChannelNavigator, ManualClock, MemoryStore, NavigationCommand};
use serde_json::json;
use session::{DEFAULT_LANDING_PATH, LOGIN_PATH, LoginRequest, SessionConfig, SessionManager};
use tokio::sync::mpsc::UnboundedReceiver;
use transport::Method;
use transport::mock::{MockExecutor, MockReply};

use crate::api::FxApi;
use crate::pipeline::Pipeline;

pub const BASE_URL: &str = "https://api.test/api/v1";
pub const NOW: u64 = 1_700_000_000_000;

pub struct TestClient {
    pub mock: Arc<MockExecutor>,
    pub session: SessionManager,
    pub pipeline: Pipeline,
    pub api: FxApi,
    pub nav: UnboundedReceiver<NavigationCommand>,
    pub clock: Arc<ManualClock>,
    pub durable: Arc<MemoryStore>,
}

pub fn test_client() -> TestClient {
    let mock = Arc::new(MockExecutor::new());
    let clock = Arc::new(ManualClock::new(NOW));
    let (navigator, nav) = ChannelNavigator::channel();
    let session = SessionManager::with_clock(
        SessionConfig {
            api_base_url: BASE_URL.into(),
            ..SessionConfig::default()
        },
        mock.clone(),
        Arc::new(MemoryStore::new()),
        Arc::new(navigator),
        clock.clone(),
    );
    let pipeline = Pipeline::new(BASE_URL, mock.clone(), session.clone());
    TestClient {
        api: FxApi::new(pipeline.clone()),
        mock,
        session,
        pipeline,
        nav,
        clock,
        durable: Arc::new(MemoryStore::new()),
    }
}

/// A client signed in as `ada` with a 15 minute token issued at `NOW`.
pub async fn logged_in_client() -> TestClient {
    let mut client = test_client();
    client
        .mock
        .push(Method::POST, LOGIN_PATH, token_reply(&jwt(NOW, 900), "rt_1"));
    client
        .session
        .login(LoginRequest::new("ada", "pw"), None)
        .await
        .unwrap();
    assert_eq!(client.nav.try_recv().unwrap().path, DEFAULT_LANDING_PATH);
    client
}

/// Unsigned token whose `exp` claim is `lifetime_secs` after `issued_millis`.
pub fn jwt(issued_millis: u64, lifetime_secs: u64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let claims = json!({
        "uid": "u-1",
        "role": "User",
        "iat": issued_millis / 1000,
        "exp": issued_millis / 1000 + lifetime_secs,
    });
    let body = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{body}.sig")
}

pub fn token_reply(access: &str, refresh: &str) -> MockReply {
    MockReply::json(
        200,
        json!({
            "success": true,
            "data": {
                "accessToken": access,
                "refreshToken": refresh,
                "tokenType": "Bearer",
                "expiresIn": 900,
                "user": {"id": "u-1", "username": "ada", "email": "ada@example.com", "role": "User"}
            }
        }),
    )
}
