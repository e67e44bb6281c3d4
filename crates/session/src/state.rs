//! Presentation-facing authentication state

use state_store::View;

use crate::user::{Role, User};

/// What the UI needs to know about the session. Tokens never appear here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    pub user: Option<User>,
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub error: Option<String>,
}

pub const IS_LOGGED_IN: View<AuthState, bool> =
    View::new("is_logged_in", |s: &AuthState| s.is_authenticated && s.user.is_some());

pub const IS_ADMIN: View<AuthState, bool> = View::new("is_admin", |s: &AuthState| {
    s.user.as_ref().is_some_and(User::is_admin)
});

pub const USER_ROLE: View<AuthState, Option<Role>> =
    View::new("user_role", |s: &AuthState| s.user.as_ref().map(|u| u.role));

pub const USERNAME: View<AuthState, String> = View::new("username", |s: &AuthState| {
    s.user.as_ref().map(|u| u.username.clone()).unwrap_or_default()
});

pub const USER_EMAIL: View<AuthState, String> = View::new("user_email", |s: &AuthState| {
    s.user.as_ref().map(|u| u.email.clone()).unwrap_or_default()
});
