//! Data layer of the fx client
//!
//! Everything that talks to the fx API after authentication: the request
//! pipeline, typed endpoint calls, the exchange-rate cache, and the
//! conversion store with its durable recent/favorites lists. `AdminApi`
//! covers the server's administrative endpoints over the same pipeline.
//!
//! Request flow:
//! 1. A store (`CurrencyStore`, `ConversionStore`) calls `FxApi`
//! 2. `FxApi` builds an `HttpRequest` and hands it to the `Pipeline`
//! 3. The pipeline tags it, attaches a fresh bearer token (joining the
//!    session's single-flight refresh if needed), and dispatches it
//! 4. Failures come back as one normalized `Error`; a 401 ends the session
//! 5. The store patches its state container, which notifies subscribers

pub mod admin;
pub mod api;
pub mod conversions;
pub mod error;
pub mod history;
mod metrics;
pub mod pipeline;
pub mod rates;

#[cfg(test)]
pub(crate) mod testing;

pub use admin::{
    AdminApi, ApiUsageStats, CacheItem, CacheStats, EndpointStat, HealthEntry, HealthReport,
    HealthState, LogEntry, LogFilter, LogLevel, TrendPoint,
};
pub use api::{
    BatchConvertRequest, BatchConvertResponse, ConversionHistoryEntry, ConversionStatus,
    ConvertRequest, ConvertResponse, Currency, ExchangeRates, FxApi, HistoryFilter, PageRequest,
    PagedResponse,
};
pub use conversions::{ConversionState, ConversionStore, HistoryPageInfo};
pub use error::{Error, Result};
pub use history::{FavoritePair, MAX_RECENT};
pub use pipeline::{CorrelationStage, CredentialStage, Outbound, Pipeline, Stage};
pub use rates::{CurrencyOption, CurrencyState, CurrencyStore, ExchangeRateSnapshot, RatesConfig};
