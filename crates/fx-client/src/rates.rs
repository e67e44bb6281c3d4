//! Exchange-rate cache with freshness tracking and background polling
//!
//! `CurrencyStore` keeps one snapshot of rates (for one base currency) plus
//! the currency catalogue in a `Store<CurrencyState>`. A snapshot older than
//! `RatesConfig::stale_after` is stale; staleness never triggers a fetch by
//! itself. Callers refresh explicitly, or run `start_polling`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use common::{Clock, SystemClock};
use state_store::{Store, View};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{Currency, ExchangeRates, FxApi};
use crate::error::{Error, Result};

pub const DEFAULT_BASE_CURRENCY: &str = "USD";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatesConfig {
    pub default_base: String,
    pub poll_interval: Duration,
    pub stale_after: Duration,
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            default_base: DEFAULT_BASE_CURRENCY.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

/// Rates for one base currency as fetched at `retrieved_at` (unix millis).
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeRateSnapshot {
    pub base_currency: String,
    pub rates: BTreeMap<String, f64>,
    pub retrieved_at: u64,
    pub source_updated_at: Option<String>,
}

impl ExchangeRateSnapshot {
    fn from_rates(rates: ExchangeRates, retrieved_at: u64) -> Self {
        Self {
            base_currency: rates.base_currency,
            rates: rates.rates,
            retrieved_at,
            source_updated_at: rates.last_updated,
        }
    }

    /// Stale once strictly more than `stale_after` has elapsed.
    pub fn is_stale_at(&self, now_millis: u64, stale_after: Duration) -> bool {
        now_millis.saturating_sub(self.retrieved_at) > stale_after.as_millis() as u64
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurrencyState {
    pub currencies: Vec<Currency>,
    pub snapshot: Option<ExchangeRateSnapshot>,
    pub base_currency: String,
    pub selected_currencies: Vec<String>,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl CurrencyState {
    pub fn rate_for(&self, code: &str) -> Option<f64> {
        self.snapshot.as_ref()?.rates.get(code).copied()
    }

    pub fn currency(&self, code: &str) -> Option<&Currency> {
        self.currencies.iter().find(|c| c.code == code)
    }
}

/// A selectable currency with its display label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyOption {
    pub value: String,
    pub label: String,
}

/// `(code, rate)` pairs of the current snapshot, sorted by code.
pub const RATES_LIST: View<CurrencyState, Vec<(String, f64)>> =
    View::new("rates_list", |s: &CurrencyState| {
        s.snapshot
            .as_ref()
            .map(|snap| snap.rates.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default()
    });

pub const CURRENCY_OPTIONS: View<CurrencyState, Vec<CurrencyOption>> =
    View::new("currency_options", |s: &CurrencyState| {
        s.currencies
            .iter()
            .map(|c| CurrencyOption {
                value: c.code.clone(),
                label: format!("{} - {}", c.code, c.name),
            })
            .collect()
    });

struct Inner {
    api: FxApi,
    config: RatesConfig,
    clock: Arc<dyn Clock>,
    state: Store<CurrencyState>,
}

/// Cheap-to-clone handle to the currency cache.
#[derive(Clone)]
pub struct CurrencyStore {
    inner: Arc<Inner>,
}

impl CurrencyStore {
    pub fn new(api: FxApi, config: RatesConfig) -> Self {
        Self::with_clock(api, config, Arc::new(SystemClock))
    }

    pub fn with_clock(api: FxApi, config: RatesConfig, clock: Arc<dyn Clock>) -> Self {
        let state = CurrencyState {
            base_currency: config.default_base.clone(),
            ..CurrencyState::default()
        };
        Self {
            inner: Arc::new(Inner {
                api,
                config,
                clock,
                state: Store::new("currency", state),
            }),
        }
    }

    pub fn state(&self) -> &Store<CurrencyState> {
        &self.inner.state
    }

    pub fn config(&self) -> &RatesConfig {
        &self.inner.config
    }

    /// Fetch the currency catalogue.
    pub async fn load_currencies(&self) -> Result<Vec<Currency>> {
        self.begin_loading();
        match self.inner.api.all_currencies().await {
            Ok(currencies) => {
                debug!(count = currencies.len(), "loaded currencies");
                self.inner.state.patch(|s| {
                    s.currencies = currencies.clone();
                    s.is_loading = false;
                });
                Ok(currencies)
            }
            Err(e) => {
                self.fail_loading(&e);
                Err(e)
            }
        }
    }

    /// Fetch rates for `base`, or for the current base currency. On success
    /// `base` becomes the current base currency.
    pub async fn load_rates(&self, base: Option<&str>) -> Result<ExchangeRateSnapshot> {
        let base = match base {
            Some(base) => base.to_string(),
            None => self.inner.state.with_state(|s| s.base_currency.clone()),
        };
        self.begin_loading();
        match self.fetch_snapshot(&base).await {
            Ok(snapshot) => {
                self.inner.state.patch(|s| {
                    s.snapshot = Some(snapshot.clone());
                    s.base_currency = base;
                    s.is_loading = false;
                });
                Ok(snapshot)
            }
            Err(e) => {
                self.fail_loading(&e);
                Err(e)
            }
        }
    }

    /// Fetch rates for `base` and replace the snapshot. Leaves the loading
    /// flag and error untouched.
    pub async fn refresh(&self, base: &str) -> Result<ExchangeRateSnapshot> {
        let snapshot = self.fetch_snapshot(base).await?;
        self.inner
            .state
            .patch(|s| s.snapshot = Some(snapshot.clone()));
        Ok(snapshot)
    }

    /// The cached snapshot, if it is for `base`.
    pub fn get_snapshot(&self, base: &str) -> Option<ExchangeRateSnapshot> {
        self.inner.state.with_state(|s| {
            s.snapshot
                .as_ref()
                .filter(|snap| snap.base_currency == base)
                .cloned()
        })
    }

    /// Whether the cached snapshot is stale. No snapshot counts as stale.
    pub fn is_stale(&self) -> bool {
        let now = self.inner.clock.now_millis();
        self.inner.state.with_state(|s| match &s.snapshot {
            Some(snapshot) => snapshot.is_stale_at(now, self.inner.config.stale_after),
            None => true,
        })
    }

    /// Change the base currency. The current snapshot is kept until the
    /// caller refreshes.
    pub fn set_base_currency(&self, code: &str) {
        self.inner
            .state
            .patch(|s| s.base_currency = code.to_string());
    }

    /// Returns whether `code` is selected afterwards.
    pub fn toggle_selected_currency(&self, code: &str) -> bool {
        self.inner.state.patch(|s| {
            let before = s.selected_currencies.len();
            s.selected_currencies.retain(|c| c != code);
            if s.selected_currencies.len() == before {
                s.selected_currencies.push(code.to_string());
                true
            } else {
                false
            }
        })
    }

    pub fn set_selected_currencies(&self, codes: Vec<String>) {
        self.inner.state.patch(|s| s.selected_currencies = codes);
    }

    pub fn clear_error(&self) {
        self.inner.state.patch(|s| s.error = None);
    }

    /// Refresh the current base currency now and then every `interval`.
    ///
    /// Each tick runs as its own task, so a slow tick never delays the next
    /// one and ticks may overlap. Abort the returned handle to stop
    /// scheduling; ticks already started run to completion.
    pub fn start_polling(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        info!(interval_secs = interval.as_secs(), "starting rate polling");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let store = store.clone();
                tokio::spawn(async move { store.poll_tick().await });
            }
        })
    }

    async fn poll_tick(&self) {
        let base = self.inner.state.with_state(|s| s.base_currency.clone());
        match self.refresh(&base).await {
            Ok(snapshot) => {
                debug!(base = %base, rates = snapshot.rates.len(), "polled rates");
            }
            Err(e) => {
                warn!(base = %base, error = %e, "rate poll failed, will retry next tick");
            }
        }
    }

    async fn fetch_snapshot(&self, base: &str) -> Result<ExchangeRateSnapshot> {
        let rates = self.inner.api.rates(base).await?;
        Ok(ExchangeRateSnapshot::from_rates(
            rates,
            self.inner.clock.now_millis(),
        ))
    }

    fn begin_loading(&self) {
        self.inner.state.patch(|s| {
            s.is_loading = true;
            s.error = None;
        });
    }

    fn fail_loading(&self, error: &Error) {
        warn!(error = %error, "currency request failed");
        self.inner.state.patch(|s| {
            s.is_loading = false;
            s.error = Some(error.user_message());
        });
    }
}
