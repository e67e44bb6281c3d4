//! Session constants
//!
//! Endpoint paths are relative to the configured API base URL.

use std::time::Duration;

/// Default API base URL for local development.
pub const DEFAULT_API_BASE_URL: &str = "https://localhost:5001/api/v1";

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const REFRESH_PATH: &str = "/auth/refresh-token";
pub const LOGOUT_PATH: &str = "/auth/logout";

/// Refresh proactively once the access token is this close to expiring.
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(300);

/// Key of the serialized session record in the short-lived scope.
pub const SESSION_STORAGE_KEY: &str = "auth_data";

/// Where the user lands after logging in, unless a return URL was given.
pub const DEFAULT_LANDING_PATH: &str = "/dashboard";

/// Entry point the user is sent to when the session ends.
pub const LOGIN_ROUTE: &str = "/auth/login";

/// Reason tags attached to forced invalidations.
pub const REASON_EXPIRED: &str = "expired";
pub const REASON_UNAUTHORIZED: &str = "unauthorized";
pub const REASON_REFRESH_FAILED: &str = "refresh-failed";
