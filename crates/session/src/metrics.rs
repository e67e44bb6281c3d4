//! Session lifecycle metrics
//!
//! - `session_refresh_total` (counter): label `outcome` (`success`, `failure`, `discarded`)
//! - `session_invalidations_total` (counter): label `reason`

/// Record the end of one refresh attempt.
pub fn record_refresh(outcome: &'static str) {
    metrics::counter!("session_refresh_total", "outcome" => outcome).increment(1);
}

/// Record a forced end of session.
pub fn record_invalidation(reason: &'static str) {
    metrics::counter!("session_invalidations_total", "reason" => reason).increment(1);
}
