use std::time::Duration;

use crate::constants::{DEFAULT_API_BASE_URL, DEFAULT_REFRESH_THRESHOLD};

/// Settings for a `SessionManager`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL the authority endpoints are joined onto
    pub api_base_url: String,
    /// How long before expiry a token is considered due for refresh
    pub refresh_threshold: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            refresh_threshold: DEFAULT_REFRESH_THRESHOLD,
        }
    }
}
