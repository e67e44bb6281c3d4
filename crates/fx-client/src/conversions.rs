//! Conversions, recent history, favorites, and server-side history paging
//!
//! Recent conversions and favorites are mirrored to the durable scope after
//! every change. The mirror is written from the state as it is when the
//! write starts (under `persist`), so a write never replaces a newer list
//! with an older one.

use std::sync::Arc;

use common::KeyValueStore;
use state_store::{Store, View};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::api::{
    BatchConvertRequest, BatchConvertResponse, ConversionHistoryEntry, ConvertRequest,
    ConvertResponse, FxApi, HistoryFilter, PageRequest, PagedResponse,
};
use crate::error::{Error, Result};
use crate::history::{self, DurableHistory, FavoritePair, prepend_bounded};

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionState {
    /// Newest first, at most `history::MAX_RECENT`.
    pub recent_conversions: Vec<ConvertResponse>,
    /// The currently loaded page of server history.
    pub history: Vec<ConversionHistoryEntry>,
    pub favorites: Vec<FavoritePair>,
    pub is_loading: bool,
    pub is_converting: bool,
    pub error: Option<String>,
    pub total_history_count: u64,
    pub total_pages: u32,
    pub current_page: u32,
    pub page_size: u32,
}

impl Default for ConversionState {
    fn default() -> Self {
        let page = PageRequest::default();
        Self {
            recent_conversions: Vec::new(),
            history: Vec::new(),
            favorites: Vec::new(),
            is_loading: false,
            is_converting: false,
            error: None,
            total_history_count: 0,
            total_pages: 0,
            current_page: page.page_number,
            page_size: page.page_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryPageInfo {
    pub current_page: u32,
    pub page_size: u32,
    pub total_count: u64,
    pub total_pages: u32,
}

pub const LAST_CONVERSION: View<ConversionState, Option<ConvertResponse>> =
    View::new("last_conversion", |s: &ConversionState| {
        s.recent_conversions.first().cloned()
    });

pub const HISTORY_PAGE_INFO: View<ConversionState, HistoryPageInfo> =
    View::new("history_page_info", |s: &ConversionState| HistoryPageInfo {
        current_page: s.current_page,
        page_size: s.page_size,
        total_count: s.total_history_count,
        total_pages: s.total_pages,
    });

pub const HAS_MORE_HISTORY: View<ConversionState, bool> =
    View::new("has_more_history", |s: &ConversionState| {
        s.current_page < s.total_pages
    });

struct Inner {
    api: FxApi,
    durable: DurableHistory,
    state: Store<ConversionState>,
    persist: Mutex<()>,
}

/// Cheap-to-clone handle to the conversion store.
#[derive(Clone)]
pub struct ConversionStore {
    inner: Arc<Inner>,
}

impl ConversionStore {
    pub fn new(api: FxApi, durable_scope: Arc<dyn KeyValueStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                durable: DurableHistory::new(durable_scope),
                state: Store::new("conversion", ConversionState::default()),
                persist: Mutex::new(()),
            }),
        }
    }

    pub fn state(&self) -> &Store<ConversionState> {
        &self.inner.state
    }

    /// Load favorites and recent conversions from the durable scope.
    pub async fn initialize(&self) {
        let favorites = self.inner.durable.load_favorites().await;
        let recent = self.inner.durable.load_recent().await;
        debug!(
            favorites = favorites.len(),
            recent = recent.len(),
            "restored conversion lists"
        );
        self.inner.state.patch(|s| {
            s.favorites = favorites;
            s.recent_conversions = recent;
            s.recent_conversions.truncate(history::MAX_RECENT);
        });
    }

    pub async fn convert(&self, request: ConvertRequest) -> Result<ConvertResponse> {
        self.begin_converting();
        match self.inner.api.convert(&request).await {
            Ok(response) => {
                debug!(
                    from = %response.from_currency,
                    to = %response.to_currency,
                    amount = response.original_amount,
                    "conversion completed"
                );
                self.inner.state.patch(|s| {
                    prepend_bounded(&mut s.recent_conversions, [response.clone()]);
                    s.is_converting = false;
                });
                self.persist_recent().await;
                Ok(response)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Convert several amounts in one request. Every returned conversion is
    /// recorded, in response order, ahead of older entries.
    pub async fn batch_convert(
        &self,
        conversions: Vec<ConvertRequest>,
    ) -> Result<BatchConvertResponse> {
        self.begin_converting();
        let request = BatchConvertRequest { conversions };
        match self.inner.api.batch_convert(&request).await {
            Ok(response) => {
                if response.failed_count > 0 {
                    warn!(
                        succeeded = response.success_count,
                        failed = response.failed_count,
                        "batch conversion partially failed"
                    );
                }
                self.inner.state.patch(|s| {
                    prepend_bounded(
                        &mut s.recent_conversions,
                        response.conversions.iter().cloned(),
                    );
                    s.is_converting = false;
                });
                self.persist_recent().await;
                Ok(response)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Load one page of server-side history.
    pub async fn load_history(
        &self,
        page: PageRequest,
        filter: &HistoryFilter,
    ) -> Result<PagedResponse<ConversionHistoryEntry>> {
        self.inner.state.patch(|s| {
            s.is_loading = true;
            s.error = None;
        });
        match self.inner.api.history(page, filter).await {
            Ok(response) => {
                let total_pages = if response.total_pages > 0 {
                    response.total_pages
                } else {
                    page_count(response.total_count, response.page_size)
                };
                self.inner.state.patch(|s| {
                    s.history = response.items.clone();
                    s.total_history_count = response.total_count;
                    s.total_pages = total_pages;
                    s.current_page = response.page_number;
                    s.page_size = response.page_size;
                    s.is_loading = false;
                });
                Ok(response)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Returns whether the pair was added.
    pub async fn add_favorite(&self, pair: FavoritePair) -> bool {
        let added = self
            .inner
            .state
            .patch(|s| history::add_favorite(&mut s.favorites, pair));
        if added {
            self.persist_favorites().await;
        }
        added
    }

    /// Returns whether the pair was present.
    pub async fn remove_favorite(&self, pair: &FavoritePair) -> bool {
        let removed = self
            .inner
            .state
            .patch(|s| history::remove_favorite(&mut s.favorites, pair));
        if removed {
            self.persist_favorites().await;
        }
        removed
    }

    /// Returns whether the pair is a favorite afterwards.
    pub async fn toggle_favorite(&self, pair: FavoritePair) -> bool {
        let now_favorite = self
            .inner
            .state
            .patch(|s| history::toggle_favorite(&mut s.favorites, pair));
        self.persist_favorites().await;
        now_favorite
    }

    pub fn is_favorite(&self, pair: &FavoritePair) -> bool {
        self.inner
            .state
            .with_state(|s| s.favorites.contains(pair))
    }

    pub fn recent_conversions(&self) -> Vec<ConvertResponse> {
        self.inner
            .state
            .with_state(|s| s.recent_conversions.clone())
    }

    /// Empty the recent list and drop its durable copy.
    pub async fn clear_recent(&self) {
        let _guard = self.inner.persist.lock().await;
        self.inner.state.patch(|s| s.recent_conversions.clear());
        if let Err(e) = self.inner.durable.clear_recent().await {
            warn!(error = %e, "failed to remove persisted recent conversions");
        }
    }

    pub fn set_page(&self, page: u32) {
        self.inner.state.patch(|s| s.current_page = page.max(1));
    }

    /// Change the page size and return to the first page.
    pub fn set_page_size(&self, size: u32) {
        self.inner.state.patch(|s| {
            s.page_size = size.max(1);
            s.current_page = 1;
        });
    }

    /// The page selection currently held in state.
    pub fn current_page(&self) -> PageRequest {
        self.inner.state.with_state(|s| PageRequest {
            page_number: s.current_page,
            page_size: s.page_size,
        })
    }

    pub fn clear_error(&self) {
        self.inner.state.patch(|s| s.error = None);
    }

    async fn persist_recent(&self) {
        let _guard = self.inner.persist.lock().await;
        let recent = self.recent_conversions();
        if let Err(e) = self.inner.durable.save_recent(&recent).await {
            warn!(error = %e, "failed to persist recent conversions");
        }
    }

    async fn persist_favorites(&self) {
        let _guard = self.inner.persist.lock().await;
        let favorites = self.inner.state.with_state(|s| s.favorites.clone());
        if let Err(e) = self.inner.durable.save_favorites(&favorites).await {
            warn!(error = %e, "failed to persist favorites");
        }
    }

    fn begin_converting(&self) {
        self.inner.state.patch(|s| {
            s.is_converting = true;
            s.error = None;
        });
    }

    fn fail(&self, error: &Error) {
        warn!(kind = error.kind(), error = %error, "conversion request failed");
        self.inner.state.patch(|s| {
            s.is_converting = false;
            s.is_loading = false;
            s.error = Some(error.user_message());
        });
    }
}

fn page_count(total: u64, page_size: u32) -> u32 {
    if page_size == 0 {
        return 0;
    }
    total.div_ceil(u64::from(page_size)) as u32
}
