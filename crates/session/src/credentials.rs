//! Session persistence in the short-lived scope
//!
//! The whole session (both tokens, the user, and the absolute expiry) is
//! stored as one JSON record under `SESSION_STORAGE_KEY`. A record that
//! cannot be read back is treated as absent: the user simply has to log in
//! again. Write failures are returned to the caller, which decides whether
//! they matter.

use std::sync::Arc;

use common::{KeyValueStore, Secret};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::SESSION_STORAGE_KEY;
use crate::error::{Error, Result};
use crate::token::LoginResponse;
use crate::user::User;

/// An authenticated session.
///
/// `expires_at` is a unix timestamp in milliseconds (absolute, not a delta),
/// computed from `LoginResponse.expires_in` when the session is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
    pub user: User,
    pub expires_at: u64,
}

impl Session {
    pub fn from_response(response: LoginResponse, now_millis: u64) -> Self {
        Self {
            expires_at: now_millis.saturating_add(response.expires_in.saturating_mul(1000)),
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            user: response.user,
        }
    }
}

/// Reads and writes the session record.
#[derive(Clone)]
pub struct CredentialStore {
    scope: Arc<dyn KeyValueStore>,
}

impl CredentialStore {
    pub fn new(scope: Arc<dyn KeyValueStore>) -> Self {
        Self { scope }
    }

    /// The persisted session, or `None` if missing or unreadable.
    pub async fn load(&self) -> Option<Session> {
        let raw = match self.scope.get(SESSION_STORAGE_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "session storage unreadable, starting signed out");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(error = %e, "discarding corrupt session record");
                None
            }
        }
    }

    pub async fn save(&self, session: &Session) -> Result<()> {
        let json = serde_json::to_string(session)
            .map_err(|e| Error::Storage(format!("serializing session: {e}")))?;
        self.scope
            .set(SESSION_STORAGE_KEY, json)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
        debug!(user = %session.user.username, "persisted session");
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        self.scope
            .remove(SESSION_STORAGE_KEY)
            .await
            .map_err(|e| Error::Storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::Role;
    use common::{MemoryStore, StoreFuture};

    fn test_session(expires_at: u64) -> Session {
        Session {
            access_token: "at_1".into(),
            refresh_token: "rt_1".into(),
            user: User {
                id: "u-1".into(),
                username: "ada".into(),
                email: "ada@example.com".into(),
                role: Role::User,
                is_active: true,
                last_login_at: None,
                created_at: None,
            },
            expires_at,
        }
    }

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, Option<String>> {
            Box::pin(async { Err(common::Error::Storage("disk on fire".into())) })
        }
        fn set<'a>(&'a self, _key: &'a str, _value: String) -> StoreFuture<'a, ()> {
            Box::pin(async { Err(common::Error::Storage("disk on fire".into())) })
        }
        fn remove<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, ()> {
            Box::pin(async { Err(common::Error::Storage("disk on fire".into())) })
        }
    }

    #[tokio::test]
    async fn save_then_load_is_identity() {
        let store = CredentialStore::new(Arc::new(MemoryStore::new()));
        let session = test_session(1_735_500_000_000);

        store.save(&session).await.unwrap();
        assert_eq!(store.load().await, Some(session));
    }

    #[tokio::test]
    async fn missing_record_loads_as_none() {
        let store = CredentialStore::new(Arc::new(MemoryStore::new()));
        assert_eq!(store.load().await, None);
    }

    #[tokio::test]
    async fn corrupt_record_loads_as_none() {
        let scope = Arc::new(MemoryStore::new());
        scope.set(SESSION_STORAGE_KEY, "{not json".into()).await.unwrap();

        let store = CredentialStore::new(scope);
        assert_eq!(store.load().await, None);
    }

    #[tokio::test]
    async fn clear_removes_record() {
        let store = CredentialStore::new(Arc::new(MemoryStore::new()));
        store.save(&test_session(1)).await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.load().await, None);
    }

    #[tokio::test]
    async fn storage_failures() {
        let store = CredentialStore::new(Arc::new(BrokenStore));
        assert_eq!(store.load().await, None, "read failure degrades to absent");
        assert!(matches!(
            store.save(&test_session(1)).await,
            Err(Error::Storage(_))
        ));
        assert!(matches!(store.clear().await, Err(Error::Storage(_))));
    }

    #[test]
    fn from_response_computes_absolute_expiry() {
        let response: LoginResponse = serde_json::from_value(serde_json::json!({
            "accessToken": "at",
            "refreshToken": "rt",
            "expiresIn": 900,
            "user": {"id": "u-1", "username": "ada", "email": "a@x", "role": "User"}
        }))
        .unwrap();
        let session = Session::from_response(response, 1_000);
        assert_eq!(session.expires_at, 901_000);
        assert_eq!(session.access_token.expose(), "at");
    }

    #[test]
    fn record_uses_camel_case() {
        let json = serde_json::to_value(test_session(5)).unwrap();
        assert_eq!(json["accessToken"], "at_1");
        assert_eq!(json["expiresAt"], 5);
    }
}
