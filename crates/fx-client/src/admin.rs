//! Administrative endpoints
//!
//! Usage statistics, health, cache control, rate synchronization and the
//! server log. These share the request pipeline with `FxApi`, so they carry
//! the same correlation id and bearer token. Authorization is the server's
//! call: a non-admin gets a 403, which is reported as `Error::Rejected` and
//! leaves the session alone.

use serde::{Deserialize, Serialize};
use serde_json::json;
use transport::{HttpRequest, Method};

use crate::api::{PageRequest, PagedResponse};
use crate::error::{Error, Result};
use crate::pipeline::Pipeline;

pub const API_USAGE_PATH: &str = "/admin/api-usage";
pub const HEALTH_PATH: &str = "/admin/health";
pub const CACHE_STATS_PATH: &str = "/admin/cache/stats";
pub const CACHE_CLEAR_PATH: &str = "/admin/cache/clear";
pub const SYNC_RATES_PATH: &str = "/admin/sync-rates";
pub const LOGS_PATH: &str = "/admin/logs";
pub const LOGS_EXPORT_PATH: &str = "/admin/logs/export";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiUsageStats {
    pub total_requests: u64,
    pub requests_today: u64,
    pub average_response_time: f64,
    pub cache_hit_rate: f64,
    pub external_api_calls: u64,
    pub active_users: u64,
    #[serde(default)]
    pub top_endpoints: Vec<EndpointStat>,
    #[serde(default)]
    pub requests_trend: Vec<TrendPoint>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStat {
    pub endpoint: String,
    pub method: String,
    pub count: u64,
    pub average_time: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrendPoint {
    pub date: String,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthState,
    #[serde(default)]
    pub total_duration: String,
    #[serde(default)]
    pub entries: Vec<HealthEntry>,
}

impl HealthReport {
    /// Names of the checks that are not healthy.
    pub fn failing(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.status != HealthState::Healthy)
            .map(|e| e.name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthEntry {
    pub name: String,
    pub status: HealthState,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_items: u64,
    #[serde(default)]
    pub memory_usage: String,
    pub hit_count: u64,
    pub miss_count: u64,
    pub hit_rate: f64,
    #[serde(default)]
    pub recent_items: Vec<CacheItem>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheItem {
    pub key: String,
    pub size: u64,
    pub expires_at: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warning,
    Information,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "Error",
            LogLevel::Warning => "Warning",
            LogLevel::Information => "Information",
            LogLevel::Debug => "Debug",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "information" | "info" => Ok(LogLevel::Information),
            "debug" => Ok(LogLevel::Debug),
            other => Err(Error::Validation(format!("unknown log level {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub stack_trace: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

/// Server log filters. Unset fields are not sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogFilter {
    pub level: Option<LogLevel>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub endpoint: Option<String>,
    pub search: Option<String>,
}

impl LogFilter {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(level) = self.level {
            pairs.push(("level", level.as_str().to_string()));
        }
        if let Some(v) = &self.start_date {
            pairs.push(("startDate", v.clone()));
        }
        if let Some(v) = &self.end_date {
            pairs.push(("endDate", v.clone()));
        }
        if let Some(v) = &self.endpoint {
            pairs.push(("endpoint", v.clone()));
        }
        if let Some(v) = &self.search {
            pairs.push(("search", v.clone()));
        }
        pairs
    }

    /// The export endpoint only honors level and date range.
    fn export_pairs(&self) -> Vec<(&'static str, String)> {
        self.query_pairs()
            .into_iter()
            .filter(|(key, _)| matches!(*key, "level" | "startDate" | "endDate"))
            .collect()
    }
}

/// Typed client for the admin endpoints. Cheap to clone.
#[derive(Clone)]
pub struct AdminApi {
    pipeline: Pipeline,
}

impl AdminApi {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    pub async fn api_usage(&self) -> Result<ApiUsageStats> {
        self.pipeline
            .fetch(HttpRequest::get(self.pipeline.url(API_USAGE_PATH)))
            .await
    }

    pub async fn health(&self) -> Result<HealthReport> {
        self.pipeline
            .fetch(HttpRequest::get(self.pipeline.url(HEALTH_PATH)))
            .await
    }

    pub async fn cache_stats(&self) -> Result<CacheStats> {
        self.pipeline
            .fetch(HttpRequest::get(self.pipeline.url(CACHE_STATS_PATH)))
            .await
    }

    /// Clear every server cache, or only keys matching `pattern`.
    pub async fn clear_cache(&self, pattern: Option<&str>) -> Result<()> {
        let body = match pattern {
            Some(pattern) => json!({ "pattern": pattern }),
            None => json!({}),
        };
        self.post_empty(CACHE_CLEAR_PATH, &body).await
    }

    /// Pull fresh rates from the upstream provider now.
    pub async fn sync_rates(&self) -> Result<()> {
        self.post_empty(SYNC_RATES_PATH, &json!({})).await
    }

    pub async fn logs(&self, page: PageRequest, filter: &LogFilter) -> Result<PagedResponse<LogEntry>> {
        let mut pairs = vec![
            ("pageNumber", page.page_number.to_string()),
            ("pageSize", page.page_size.to_string()),
        ];
        pairs.extend(filter.query_pairs());
        let request = HttpRequest::get(self.pipeline.url(LOGS_PATH))
            .query(pairs)
            .map_err(|e| Error::Validation(e.to_string()))?;
        self.pipeline.fetch(request).await
    }

    /// Server log as CSV text.
    pub async fn export_logs(&self, filter: &LogFilter) -> Result<String> {
        let request = HttpRequest::get(self.pipeline.url(LOGS_EXPORT_PATH))
            .query(filter.export_pairs())
            .map_err(|e| Error::Validation(e.to_string()))?;
        Ok(self.pipeline.execute(request).await?.text())
    }

    pub async fn clear_logs(&self) -> Result<()> {
        let request = HttpRequest::new(Method::DELETE, self.pipeline.url(LOGS_PATH));
        self.pipeline.execute(request).await.map(|_| ())
    }

    async fn post_empty(&self, path: &str, body: &serde_json::Value) -> Result<()> {
        let request = HttpRequest::post(self.pipeline.url(path))
            .json(body)
            .map_err(|e| Error::Validation(format!("encoding {path} body: {e}")))?;
        self.pipeline.execute(request).await.map(|_| ())
    }
}
