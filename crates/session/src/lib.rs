//! Client-side session management
//!
//! Owns the authenticated session of the fx client: login, registration,
//! logout, persistence in the short-lived scope, and single-flight access
//! token refresh. The crate never routes or renders anything; it emits
//! navigation commands and publishes an observable `AuthState`.
//!
//! Session flow:
//! 1. `SessionManager::initialize()` restores a still-valid persisted session
//! 2. `SessionManager::login()` exchanges credentials via `token::login()`
//! 3. Request pipelines call `ensure_fresh_token()`, which shares one
//!    `token::refresh()` between all concurrent callers
//! 4. A rejected token or failed refresh ends the session through
//!    `force_invalidate()` / `invalidate_if_current()`
//! 5. `SessionManager::logout()` revokes and clears everything

pub mod claims;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod manager;
mod metrics;
pub mod state;
pub mod token;
pub mod user;

pub use claims::{TokenClaims, decode_claims};
pub use config::SessionConfig;
pub use constants::*;
pub use credentials::{CredentialStore, Session};
pub use error::{Error, Result};
pub use manager::{AccessToken, SessionManager};
pub use state::AuthState;
pub use token::{LoginRequest, LoginResponse, RegisterRequest};
pub use user::{Role, User};
