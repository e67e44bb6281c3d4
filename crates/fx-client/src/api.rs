//! Typed fx API calls and wire models
//!
//! Data endpoints return bare JSON bodies (no `{success, data}` envelope),
//! camelCase on the wire. Timestamps are passed through as the server's
//! ISO-8601 strings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use transport::HttpRequest;

use crate::error::{Error, Result};
use crate::pipeline::Pipeline;

pub const CURRENCIES_ALL_PATH: &str = "/currencies/all";
pub const RATES_PATH: &str = "/rates";
pub const CONVERT_PATH: &str = "/convert";
pub const BATCH_CONVERT_PATH: &str = "/convert/batch";
pub const HISTORY_PATH: &str = "/convert/history";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Currency {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub decimal_places: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// All rates for one base currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRates {
    pub base_currency: String,
    #[serde(default)]
    pub last_updated: Option<String>,
    pub rates: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertRequest {
    pub from_currency: String,
    pub to_currency: String,
    pub amount: f64,
}

impl ConvertRequest {
    pub fn new(from: impl Into<String>, to: impl Into<String>, amount: f64) -> Self {
        Self {
            from_currency: from.into(),
            to_currency: to.into(),
            amount,
        }
    }
}

/// One completed conversion. This is also the recent-conversions entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertResponse {
    pub from_currency: String,
    pub to_currency: String,
    pub original_amount: f64,
    pub converted_amount: f64,
    pub exchange_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchConvertRequest {
    pub conversions: Vec<ConvertRequest>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchConvertResponse {
    pub conversions: Vec<ConvertResponse>,
    #[serde(default)]
    pub success_count: u32,
    #[serde(default)]
    pub failed_count: u32,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversionStatus {
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

/// A conversion as recorded server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionHistoryEntry {
    pub id: String,
    pub from_currency: String,
    pub to_currency: String,
    pub original_amount: f64,
    pub converted_amount: f64,
    pub exchange_rate: f64,
    pub status: ConversionStatus,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedResponse<T> {
    pub items: Vec<T>,
    pub page_number: u32,
    pub page_size: u32,
    pub total_count: u64,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub has_previous_page: bool,
    #[serde(default)]
    pub has_next_page: bool,
}

/// 1-based page selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page_number: u32,
    pub page_size: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page_number: 1,
            page_size: 10,
        }
    }
}

/// Optional history filters. Unset fields are not sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryFilter {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub from_currency: Option<String>,
    pub to_currency: Option<String>,
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
}

impl HistoryFilter {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(v) = &self.start_date {
            pairs.push(("startDate", v.clone()));
        }
        if let Some(v) = &self.end_date {
            pairs.push(("endDate", v.clone()));
        }
        if let Some(v) = &self.from_currency {
            pairs.push(("fromCurrency", v.clone()));
        }
        if let Some(v) = &self.to_currency {
            pairs.push(("toCurrency", v.clone()));
        }
        if let Some(v) = self.min_amount {
            pairs.push(("minAmount", v.to_string()));
        }
        if let Some(v) = self.max_amount {
            pairs.push(("maxAmount", v.to_string()));
        }
        pairs
    }
}

/// Typed client for the fx endpoints. Cheap to clone.
#[derive(Clone)]
pub struct FxApi {
    pipeline: Pipeline,
}

impl FxApi {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub async fn all_currencies(&self) -> Result<Vec<Currency>> {
        let request = HttpRequest::get(self.pipeline.url(CURRENCIES_ALL_PATH));
        self.pipeline.fetch(request).await
    }

    pub async fn rates(&self, base: &str) -> Result<ExchangeRates> {
        let request = HttpRequest::get(self.pipeline.url(RATES_PATH))
            .query([("base", base)])
            .map_err(|e| Error::Validation(e.to_string()))?;
        self.pipeline.fetch(request).await
    }

    pub async fn convert(&self, request: &ConvertRequest) -> Result<ConvertResponse> {
        let request = HttpRequest::post(self.pipeline.url(CONVERT_PATH))
            .json(request)
            .map_err(|e| Error::Validation(format!("encoding conversion: {e}")))?;
        self.pipeline.fetch(request).await
    }

    pub async fn batch_convert(&self, request: &BatchConvertRequest) -> Result<BatchConvertResponse> {
        let request = HttpRequest::post(self.pipeline.url(BATCH_CONVERT_PATH))
            .json(request)
            .map_err(|e| Error::Validation(format!("encoding batch conversion: {e}")))?;
        self.pipeline.fetch(request).await
    }

    pub async fn history(
        &self,
        page: PageRequest,
        filter: &HistoryFilter,
    ) -> Result<PagedResponse<ConversionHistoryEntry>> {
        let mut pairs = vec![
            ("pageNumber", page.page_number.to_string()),
            ("pageSize", page.page_size.to_string()),
        ];
        pairs.extend(filter.query_pairs());
        let request = HttpRequest::get(self.pipeline.url(HISTORY_PATH))
            .query(pairs)
            .map_err(|e| Error::Validation(e.to_string()))?;
        self.pipeline.fetch(request).await
    }
}
