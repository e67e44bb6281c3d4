//! Session lifecycle and single-flight refresh
//!
//! `SessionManager` owns the only mutable copy of the session. Everything
//! that changes it (login, refresh completion, logout, invalidation) runs
//! under one async mutex, and each change bumps a generation counter.
//!
//! Refresh is single-flight: the first caller that finds the token inside
//! the refresh window spawns one refresh task and parks a shared handle to
//! it in the core; every later caller joins that handle. The task finalizes
//! under the same mutex, so a result that arrives after the session it was
//! started for has ended (generation moved on) is discarded rather than
//! resurrecting the session.
//!
//! The presentation state (`AuthState`) is patched while the core lock is
//! held, so observers never see it disagree with the session.

use std::sync::Arc;

use common::{Clock, KeyValueStore, NavigationCommand, Navigator, Secret, SystemClock};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use state_store::Store;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use transport::HttpExecutor;

use crate::claims::{TokenClaims, decode_claims};
use crate::config::SessionConfig;
use crate::constants::{DEFAULT_LANDING_PATH, LOGIN_ROUTE, REASON_EXPIRED, REASON_REFRESH_FAILED};
use crate::credentials::{CredentialStore, Session};
use crate::error::{Error, Result};
use crate::metrics;
use crate::state::{AuthState, IS_ADMIN};
use crate::token::{self, LoginRequest, RegisterRequest};
use crate::user::User;

/// A bearer token plus the session generation it belongs to.
///
/// The generation lets callers tell whether a later rejection of this token
/// still concerns the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub value: Secret<String>,
    pub generation: u64,
}

type RefreshFuture = Shared<BoxFuture<'static, Result<AccessToken>>>;

struct Core {
    session: Option<Session>,
    generation: u64,
    in_flight: Option<RefreshFuture>,
}

struct Inner {
    config: SessionConfig,
    executor: Arc<dyn HttpExecutor>,
    credentials: CredentialStore,
    navigator: Arc<dyn Navigator>,
    clock: Arc<dyn Clock>,
    state: Store<AuthState>,
    core: Mutex<Core>,
}

/// Cheap-to-clone handle to the session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        executor: Arc<dyn HttpExecutor>,
        scope: Arc<dyn KeyValueStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self::with_clock(config, executor, scope, navigator, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: SessionConfig,
        executor: Arc<dyn HttpExecutor>,
        scope: Arc<dyn KeyValueStore>,
        navigator: Arc<dyn Navigator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                executor,
                credentials: CredentialStore::new(scope),
                navigator,
                clock,
                state: Store::new("auth", AuthState::default()),
                core: Mutex::new(Core {
                    session: None,
                    generation: 0,
                    in_flight: None,
                }),
            }),
        }
    }

    /// Observable authentication state.
    pub fn state(&self) -> &Store<AuthState> {
        &self.inner.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Restore a persisted session if it is still valid.
    ///
    /// An expired or unreadable record is removed and the manager starts
    /// signed out.
    pub async fn initialize(&self) {
        let loaded = self.inner.credentials.load().await;
        let now = self.now();

        let mut core = self.inner.core.lock().await;
        core.generation += 1;
        core.in_flight = None;
        match loaded {
            Some(session) if !expired_at(&session, now) => {
                info!(user = %session.user.username, "restored session");
                let user = session.user.clone();
                core.session = Some(session);
                self.inner.state.patch(|s| {
                    *s = AuthState {
                        user: Some(user),
                        is_authenticated: true,
                        ..AuthState::default()
                    }
                });
            }
            Some(_) => {
                info!(reason = REASON_EXPIRED, "persisted session dropped");
                core.session = None;
                self.clear_persisted().await;
                metrics::record_invalidation(REASON_EXPIRED);
                self.inner.state.patch(|s| *s = AuthState::default());
            }
            None => {
                debug!("no persisted session");
                core.session = None;
                self.inner.state.patch(|s| *s = AuthState::default());
            }
        }
    }

    /// Authenticate with username and password.
    ///
    /// On success the session is persisted and the user is sent to
    /// `return_url`, or the dashboard when none is given.
    pub async fn login(&self, request: LoginRequest, return_url: Option<&str>) -> Result<User> {
        self.inner.state.patch(|s| {
            s.is_loading = true;
            s.error = None;
        });

        let response = match token::login(
            self.inner.executor.as_ref(),
            &self.inner.config.api_base_url,
            &request,
        )
        .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(username = %request.username, error = %e, "login failed");
                self.fail_loading(&e);
                return Err(e);
            }
        };

        let session = Session::from_response(response, self.now());
        let user = session.user.clone();
        {
            let mut core = self.inner.core.lock().await;
            core.generation += 1;
            core.in_flight = None;
            if let Err(e) = self.inner.credentials.save(&session).await {
                warn!(error = %e, "session not persisted");
            }
            core.session = Some(session);
            self.inner.state.patch(|s| {
                *s = AuthState {
                    user: Some(user.clone()),
                    is_authenticated: true,
                    is_loading: false,
                    error: None,
                }
            });
        }

        info!(user = %user.username, role = user.role.as_str(), "logged in");
        self.inner
            .navigator
            .emit(NavigationCommand::to(return_url.unwrap_or(DEFAULT_LANDING_PATH)));
        Ok(user)
    }

    /// Create an account, then send the user to the login screen.
    pub async fn register(&self, request: RegisterRequest) -> Result<User> {
        self.inner.state.patch(|s| {
            s.is_loading = true;
            s.error = None;
        });

        match token::register(
            self.inner.executor.as_ref(),
            &self.inner.config.api_base_url,
            &request,
        )
        .await
        {
            Ok(user) => {
                self.inner.state.patch(|s| s.is_loading = false);
                info!(username = %user.username, "registered");
                self.inner
                    .navigator
                    .emit(NavigationCommand::to(LOGIN_ROUTE).with_param("registered", "true"));
                Ok(user)
            }
            Err(e) => {
                warn!(username = %request.username, error = %e, "registration failed");
                self.fail_loading(&e);
                Err(e)
            }
        }
    }

    /// End the session. Safe to call when already signed out.
    ///
    /// The authority is told to revoke the refresh token, but local state is
    /// cleared whether or not that succeeds.
    pub async fn logout(&self) {
        self.inner.state.patch(|s| s.is_loading = true);

        let tokens = {
            let core = self.inner.core.lock().await;
            core.session
                .as_ref()
                .map(|s| (s.access_token.clone(), s.refresh_token.clone()))
        };
        if let Some((access, refresh)) = tokens {
            let acknowledged = token::logout(
                self.inner.executor.as_ref(),
                &self.inner.config.api_base_url,
                access.expose(),
                refresh.expose(),
            )
            .await;
            if let Err(e) = acknowledged {
                warn!(error = %e, "authority did not acknowledge logout");
            }
        }

        {
            let mut core = self.inner.core.lock().await;
            end_session(&mut core);
            self.clear_persisted().await;
            self.inner.state.patch(|s| *s = AuthState::default());
        }

        info!("logged out");
        self.inner.navigator.emit(NavigationCommand::to(LOGIN_ROUTE));
    }

    /// Whether a session is active. Reads the presentation state.
    pub fn is_authenticated(&self) -> bool {
        self.inner.state.with_state(|s| s.is_authenticated)
    }

    pub fn current_user(&self) -> Option<User> {
        self.inner.state.with_state(|s| s.user.clone())
    }

    pub fn is_admin(&self) -> bool {
        self.inner.state.view(&IS_ADMIN)
    }

    pub fn clear_error(&self) {
        self.inner.state.patch(|s| s.error = None);
    }

    /// Replace the profile of the signed-in user. Ignored when signed out.
    pub async fn update_user(&self, user: User) {
        let mut core = self.inner.core.lock().await;
        let Some(session) = core.session.as_mut() else {
            debug!("no session, profile update ignored");
            return;
        };
        session.user = user.clone();
        if let Err(e) = self.inner.credentials.save(session).await {
            warn!(error = %e, "updated profile not persisted");
        }
        self.inner.state.patch(|s| s.user = Some(user));
    }

    /// Claims of the current access token, if there is one and it decodes.
    pub async fn claims(&self) -> Option<TokenClaims> {
        let core = self.inner.core.lock().await;
        core.session
            .as_ref()
            .and_then(|s| decode_claims(s.access_token.expose()).ok())
    }

    /// True when there is no session, the token has passed its expiry, or
    /// its claims cannot be read.
    pub async fn is_expired(&self) -> bool {
        let now = self.now();
        let core = self.inner.core.lock().await;
        core.session
            .as_ref()
            .is_none_or(|session| expired_at(session, now))
    }

    /// True when a session exists and its token is inside the refresh window.
    pub async fn should_refresh(&self) -> bool {
        let now = self.now();
        let core = self.inner.core.lock().await;
        core.session
            .as_ref()
            .is_some_and(|session| self.refresh_due(session, now))
    }

    /// The current token without any freshness check.
    pub async fn current_token(&self) -> Option<AccessToken> {
        let core = self.inner.core.lock().await;
        core.session.as_ref().map(|s| AccessToken {
            value: s.access_token.clone(),
            generation: core.generation,
        })
    }

    /// A token that is outside the refresh window, refreshing if needed.
    ///
    /// Concurrent callers share one refresh. If that refresh fails, every
    /// caller gets `Error::Refresh` and the session is invalidated once.
    pub async fn ensure_fresh_token(&self) -> Result<AccessToken> {
        let flight = {
            let mut core = self.inner.core.lock().await;
            let Some(session) = core.session.as_ref() else {
                return Err(Error::Refresh("no active session".into()));
            };
            if !self.refresh_due(session, self.now()) {
                return Ok(AccessToken {
                    value: session.access_token.clone(),
                    generation: core.generation,
                });
            }
            match &core.in_flight {
                Some(flight) => {
                    debug!("joining in-flight refresh");
                    flight.clone()
                }
                None => {
                    let flight = self.start_refresh(session.refresh_token.clone(), core.generation);
                    core.in_flight = Some(flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    /// End the session unconditionally and send the user to login with
    /// `reason` attached.
    pub async fn force_invalidate(&self, reason: &'static str) {
        let mut core = self.inner.core.lock().await;
        self.invalidate_locked(&mut core, reason).await;
    }

    /// End the session only if `generation` is still the current one.
    ///
    /// Returns whether the session was invalidated. A rejection of a token
    /// from an earlier generation says nothing about the current session.
    pub async fn invalidate_if_current(&self, generation: u64, reason: &'static str) -> bool {
        let mut core = self.inner.core.lock().await;
        if core.session.is_none() || core.generation != generation {
            debug!(generation, current = core.generation, "stale rejection ignored");
            return false;
        }
        self.invalidate_locked(&mut core, reason).await;
        true
    }

    fn start_refresh(&self, refresh_token: Secret<String>, generation: u64) -> RefreshFuture {
        let manager = self.clone();
        let task = tokio::spawn(async move { manager.run_refresh(refresh_token, generation).await });
        async move {
            task.await
                .unwrap_or_else(|e| Err(Error::Refresh(format!("refresh task ended abnormally: {e}"))))
        }
        .boxed()
        .shared()
    }

    async fn run_refresh(&self, refresh_token: Secret<String>, generation: u64) -> Result<AccessToken> {
        debug!(generation, "refreshing access token");
        let outcome = token::refresh(
            self.inner.executor.as_ref(),
            &self.inner.config.api_base_url,
            refresh_token.expose(),
        )
        .await;
        let now = self.now();

        let mut core = self.inner.core.lock().await;
        if core.generation != generation {
            // Logout, login, or invalidation happened meanwhile and already
            // cleared `in_flight`; a newer refresh may be parked there now.
            metrics::record_refresh("discarded");
            info!(generation, current = core.generation, "session changed during refresh, result discarded");
            return Err(Error::Refresh("session ended during refresh".into()));
        }
        core.in_flight = None;

        match outcome {
            Ok(response) => {
                let session = Session::from_response(response, now);
                core.generation += 1;
                let fresh = AccessToken {
                    value: session.access_token.clone(),
                    generation: core.generation,
                };
                if let Err(e) = self.inner.credentials.save(&session).await {
                    warn!(error = %e, "refreshed session not persisted");
                }
                let user = session.user.clone();
                core.session = Some(session);
                self.inner.state.patch(|s| {
                    s.user = Some(user);
                    s.is_authenticated = true;
                });
                metrics::record_refresh("success");
                info!(generation = core.generation, "access token refreshed");
                Ok(fresh)
            }
            Err(e) => {
                metrics::record_refresh("failure");
                warn!(error = %e, "token refresh failed, ending session");
                self.invalidate_locked(&mut core, REASON_REFRESH_FAILED).await;
                Err(match e {
                    Error::Refresh(_) => e,
                    other => Error::Refresh(other.to_string()),
                })
            }
        }
    }

    async fn invalidate_locked(&self, core: &mut MutexGuard<'_, Core>, reason: &'static str) {
        end_session(core);
        self.clear_persisted().await;
        self.inner.state.patch(|s| *s = AuthState::default());
        metrics::record_invalidation(reason);
        info!(reason, "session invalidated");
        self.inner
            .navigator
            .emit(NavigationCommand::to(LOGIN_ROUTE).with_param("reason", reason));
    }

    async fn clear_persisted(&self) {
        if let Err(e) = self.inner.credentials.clear().await {
            warn!(error = %e, "persisted session not cleared");
        }
    }

    fn fail_loading(&self, error: &Error) {
        let message = error.to_string();
        self.inner.state.patch(|s| {
            s.is_loading = false;
            s.error = Some(message);
        });
    }

    fn refresh_due(&self, session: &Session, now: u64) -> bool {
        let threshold = u64::try_from(self.inner.config.refresh_threshold.as_millis()).unwrap_or(u64::MAX);
        match expiry_millis(session) {
            Some(expiry) => now >= expiry.saturating_sub(threshold),
            None => true,
        }
    }

    fn now(&self) -> u64 {
        self.inner.clock.now_millis()
    }
}

fn end_session(core: &mut Core) {
    core.session = None;
    core.generation += 1;
    core.in_flight = None;
}

/// Effective expiry: the earlier of the recorded expiry and the token's own
/// `exp` claim. `None` when the claims cannot be read.
fn expiry_millis(session: &Session) -> Option<u64> {
    let claims = decode_claims(session.access_token.expose()).ok()?;
    Some(session.expires_at.min(claims.expires_at_millis()))
}

fn expired_at(session: &Session, now: u64) -> bool {
    expiry_millis(session).is_none_or(|expiry| now >= expiry)
}
