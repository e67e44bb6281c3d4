//! Scripted in-memory executor for tests
//!
//! Routes are matched by method and path suffix, so tests do not need to
//! care about the configured base URL. Each route has a queue of one-shot
//! replies and an optional fallback reply used once the queue is empty.
//! Every request is recorded before any scripted delay elapses.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::{HttpExecutor, HttpRequest, HttpResponse, Method, SendFuture, TransportError};

/// One scripted outcome for a request.
#[derive(Debug, Clone)]
pub struct MockReply {
    outcome: Result<HttpResponse, TransportError>,
    delay: Option<Duration>,
}

impl MockReply {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            outcome: Ok(HttpResponse::new(status, body.to_string())),
            delay: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            outcome: Ok(HttpResponse::new(status, "")),
            delay: None,
        }
    }

    pub fn raw(status: u16, body: &'static str) -> Self {
        Self {
            outcome: Ok(HttpResponse::new(status, body)),
            delay: None,
        }
    }

    pub fn error(error: TransportError) -> Self {
        Self {
            outcome: Err(error),
            delay: None,
        }
    }

    /// Resolve only after `delay` (virtual time under `start_paused`).
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

struct Route {
    method: Method,
    path: String,
    queued: VecDeque<MockReply>,
    fallback: Option<MockReply>,
}

impl Route {
    fn matches(&self, method: &Method, path: &str) -> bool {
        self.method == *method && path.ends_with(&self.path)
    }
}

/// Executor that replays scripted replies and records requests.
#[derive(Default)]
pub struct MockExecutor {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply used exactly once, after earlier queued replies.
    pub fn push(&self, method: Method, path: &str, reply: MockReply) {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        match routes
            .iter_mut()
            .find(|r| r.method == method && r.path == path)
        {
            Some(route) => route.queued.push_back(reply),
            None => routes.push(Route {
                method,
                path: path.to_string(),
                queued: VecDeque::from([reply]),
                fallback: None,
            }),
        }
    }

    /// Reply used whenever the route's queue is empty.
    pub fn always(&self, method: Method, path: &str, reply: MockReply) {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        match routes
            .iter_mut()
            .find(|r| r.method == method && r.path == path)
        {
            Some(route) => route.fallback = Some(reply),
            None => routes.push(Route {
                method,
                path: path.to_string(),
                queued: VecDeque::new(),
                fallback: Some(reply),
            }),
        }
    }

    /// All requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of requests received for `method` on a path ending in `path`.
    pub fn count(&self, method: Method, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.method == method && r.path().ends_with(path))
            .count()
    }

    fn next_reply(&self, request: &HttpRequest) -> MockReply {
        let path = request.path();
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        let route = routes
            .iter_mut()
            .find(|r| r.matches(&request.method, &path));
        match route {
            Some(route) => match route.queued.pop_front() {
                Some(reply) => reply,
                None => route
                    .fallback
                    .clone()
                    .unwrap_or_else(|| MockReply::raw(404, r#"{"message":"mock queue empty"}"#)),
            },
            None => MockReply::raw(404, r#"{"message":"no mock route"}"#),
        }
    }
}

impl HttpExecutor for MockExecutor {
    fn send(&self, request: HttpRequest) -> SendFuture<'_> {
        let reply = self.next_reply(&request);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        Box::pin(async move {
            if let Some(delay) = reply.delay {
                tokio::time::sleep(delay).await;
            }
            reply.outcome
        })
    }
}
