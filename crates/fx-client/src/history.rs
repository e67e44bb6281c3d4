//! Bounded recent conversions and favorite pairs
//!
//! Both lists live in the durable scope as JSON arrays. A missing or
//! unreadable array loads as empty; the user loses a convenience list, never
//! a session.

use std::sync::Arc;

use common::KeyValueStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::ConvertResponse;

/// Capacity of the recent conversions list.
pub const MAX_RECENT: usize = 10;

pub const FAVORITES_KEY: &str = "currency_favorites";
pub const RECENT_KEY: &str = "recent_conversions";

/// An ordered currency pair. `USD→EUR` and `EUR→USD` are different pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoritePair {
    pub from_currency: String,
    pub to_currency: String,
}

impl FavoritePair {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from_currency: from.into(),
            to_currency: to.into(),
        }
    }
}

impl std::fmt::Display for FavoritePair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.from_currency, self.to_currency)
    }
}

/// Prepend `entries` (kept in their given order) and evict the oldest.
pub fn prepend_bounded<T>(list: &mut Vec<T>, entries: impl IntoIterator<Item = T>) {
    let mut merged: Vec<T> = entries.into_iter().collect();
    merged.append(list);
    merged.truncate(MAX_RECENT);
    *list = merged;
}

/// Remove `pair` if present, append it otherwise. Returns whether the pair is
/// a favorite afterwards.
pub fn toggle_favorite(favorites: &mut Vec<FavoritePair>, pair: FavoritePair) -> bool {
    if remove_favorite(favorites, &pair) {
        false
    } else {
        favorites.push(pair);
        true
    }
}

/// Append `pair` unless already present. Returns whether it was added.
pub fn add_favorite(favorites: &mut Vec<FavoritePair>, pair: FavoritePair) -> bool {
    if favorites.contains(&pair) {
        return false;
    }
    favorites.push(pair);
    true
}

/// Returns whether `pair` was present.
pub fn remove_favorite(favorites: &mut Vec<FavoritePair>, pair: &FavoritePair) -> bool {
    let before = favorites.len();
    favorites.retain(|p| p != pair);
    favorites.len() != before
}

/// Durable-scope persistence of both lists.
#[derive(Clone)]
pub struct DurableHistory {
    scope: Arc<dyn KeyValueStore>,
}

impl DurableHistory {
    pub fn new(scope: Arc<dyn KeyValueStore>) -> Self {
        Self { scope }
    }

    pub async fn load_favorites(&self) -> Vec<FavoritePair> {
        self.load_list(FAVORITES_KEY).await
    }

    pub async fn load_recent(&self) -> Vec<ConvertResponse> {
        self.load_list(RECENT_KEY).await
    }

    pub async fn save_favorites(&self, favorites: &[FavoritePair]) -> common::Result<()> {
        self.save_list(FAVORITES_KEY, favorites).await
    }

    pub async fn save_recent(&self, recent: &[ConvertResponse]) -> common::Result<()> {
        self.save_list(RECENT_KEY, recent).await
    }

    pub async fn clear_recent(&self) -> common::Result<()> {
        self.scope.remove(RECENT_KEY).await
    }

    async fn load_list<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        let raw = match self.scope.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(key, error = %e, "durable storage unreadable, using empty list");
                return Vec::new();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(key, error = %e, "discarding corrupt list");
            Vec::new()
        })
    }

    async fn save_list<T: Serialize>(&self, key: &str, list: &[T]) -> common::Result<()> {
        let json = serde_json::to_string(list)
            .map_err(|e| common::Error::Storage(format!("serializing {key}: {e}")))?;
        self.scope.set(key, json).await
    }
}
