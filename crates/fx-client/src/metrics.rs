//! Request pipeline metrics
//!
//! - `client_requests_total` (counter): labels `method`, `status`
//! - `client_request_duration_seconds` (histogram): label `status`
//! - `client_request_failures_total` (counter): label `kind`
//! - `client_transport_failures_total` (counter): label `cause`
//!
//! Requests that never got a response are recorded with `status="none"`.

/// Record a completed exchange with the server.
pub fn record_request(method: &str, status: Option<u16>, duration_secs: f64) {
    let status = status.map_or_else(|| "none".to_string(), |s| s.to_string());
    metrics::counter!("client_requests_total", "method" => method.to_string(), "status" => status.clone())
        .increment(1);
    metrics::histogram!("client_request_duration_seconds", "status" => status).record(duration_secs);
}

/// Record a failed request by normalized failure kind.
pub fn record_failure(kind: &'static str) {
    metrics::counter!("client_request_failures_total", "kind" => kind).increment(1);
}

/// Record a request that never produced a response, by transport cause.
pub fn record_transport_failure(cause: &'static str) {
    metrics::counter!("client_transport_failures_total", "cause" => cause).increment(1);
}
