//! `HttpExecutor` backed by a shared `reqwest::Client`.

use std::time::Duration;

use tracing::{debug, instrument};

use crate::{HttpExecutor, HttpRequest, HttpResponse, SendFuture, TransportError};

/// Production executor. Applies a per-request timeout; never retries.
#[derive(Debug, Clone)]
pub struct ReqwestExecutor {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestExecutor {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    #[instrument(skip_all, fields(method = %request.method, path = %request.path()))]
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers)
            .timeout(self.timeout);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(format!("no response within {}s", self.timeout.as_secs()))
            } else if e.is_connect() {
                TransportError::Connect(e.to_string())
            } else {
                TransportError::Other(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?;

        debug!(status, bytes = body.len(), "response received");
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl HttpExecutor for ReqwestExecutor {
    fn send(&self, request: HttpRequest) -> SendFuture<'_> {
        Box::pin(self.execute(request))
    }
}
