//! Persistence of the subscription list.
//!
//! The whole list lives under one key and is always read and written as a
//! single unit. Access goes through [`FeedStore::lock`]: the returned guard
//! is the only way to load or save, so every load-mutate-save sequence in
//! this process runs inside one mutual-exclusion scope.
//!
//! Another process may share the database (`feedbot command` next to a
//! running `feedbot serve`). Writes that depend on what was read therefore
//! go through [`FeedStoreGuard::modify`], which re-reads and writes inside a
//! single storage transaction.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

use crate::storage::{DatabaseError, KvStore};

/// Key holding the subscription list.
///
/// Part of the persisted-state contract. Changing it requires adding the old
/// value to [`LEGACY_FEEDS_KEYS`] so [`FeedStore::migrate_legacy_keys`] moves
/// existing data across.
pub const FEEDS_KEY: &str = "feedbot.subscriptions.v1";

/// Keys used by earlier deployments, newest last.
pub const LEGACY_FEEDS_KEYS: &[&str] = &["feeds", "dev.manybugs.feed"];

/// One subscription: a feed URL bound to a destination channel.
///
/// `updated` is the watermark, in seconds since the Unix epoch: the timestamp
/// of the newest item already reported for this subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    #[serde(rename = "URL", alias = "Url")]
    pub url: String,
    #[serde(rename = "ChannelID", alias = "ChannelId")]
    pub channel_id: String,
    #[serde(rename = "Updated")]
    pub updated: i64,
}

impl Feed {
    /// New subscription whose watermark is `now`, so only items published
    /// after subscribing are reported.
    pub fn new(url: impl Into<String>, channel_id: impl Into<String>, now: i64) -> Self {
        Self {
            url: url.into(),
            channel_id: channel_id.into(),
            updated: now,
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to read feeds: {0}")]
    Read(#[source] DatabaseError),

    #[error("Failed to write feeds: {0}")]
    Write(#[source] DatabaseError),

    #[error("Stored feeds are not valid: {0}")]
    Corrupt(#[source] serde_json::Error),

    #[error("Failed to encode feeds: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Subscription list persisted in a [`KvStore`].
pub struct FeedStore {
    kv: Arc<dyn KvStore>,
    lock: Mutex<()>,
}

impl FeedStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            lock: Mutex::new(()),
        }
    }

    /// Wait for exclusive access to the subscription list.
    pub async fn lock(&self) -> FeedStoreGuard<'_> {
        FeedStoreGuard {
            kv: self.kv.as_ref(),
            _guard: self.lock.lock().await,
        }
    }

    /// Move data stored under a legacy key to [`FEEDS_KEY`].
    ///
    /// Runs only when the current key is empty. The first legacy key holding
    /// a decodable list wins; it is written under the current key and then
    /// removed. Undecodable legacy data is left untouched and logged.
    ///
    /// Returns the number of subscriptions migrated.
    pub async fn migrate_legacy_keys(&self) -> Result<usize, StorageError> {
        let _guard = self.lock.lock().await;

        if self.kv.get(FEEDS_KEY).await.map_err(StorageError::Read)?.is_some() {
            return Ok(0);
        }

        for legacy_key in LEGACY_FEEDS_KEYS.iter().rev() {
            let Some(bytes) = self.kv.get(legacy_key).await.map_err(StorageError::Read)? else {
                continue;
            };

            let feeds: Vec<Feed> = match serde_json::from_slice(&bytes) {
                Ok(feeds) => feeds,
                Err(e) => {
                    tracing::error!(
                        key = %legacy_key,
                        error = %e,
                        "Legacy feed list is not decodable, leaving it in place"
                    );
                    continue;
                }
            };

            let encoded = serde_json::to_vec(&feeds).map_err(StorageError::Encode)?;
            self.kv
                .set(FEEDS_KEY, &encoded)
                .await
                .map_err(StorageError::Write)?;
            if let Err(e) = self.kv.delete(legacy_key).await {
                // Migration never reruns once the current key is populated
                tracing::warn!(key = %legacy_key, error = %e, "Failed to delete legacy feed key");
            }

            tracing::info!(
                from = %legacy_key,
                to = FEEDS_KEY,
                feeds = feeds.len(),
                "Migrated feed list from legacy key"
            );
            return Ok(feeds.len());
        }

        Ok(0)
    }
}

/// Exclusive handle on the subscription list. Dropping it releases the lock.
pub struct FeedStoreGuard<'a> {
    kv: &'a dyn KvStore,
    _guard: MutexGuard<'a, ()>,
}

impl FeedStoreGuard<'_> {
    /// Load the full subscription list.
    ///
    /// Never fails: read or decode errors are logged and yield an empty list.
    /// Callers that save afterwards should use [`Self::try_load`] instead, so
    /// a transient read error cannot turn into an overwrite with nothing.
    pub async fn load(&self) -> Vec<Feed> {
        match self.try_load().await {
            Ok(feeds) => feeds,
            Err(e) => {
                tracing::error!(error = %e, "Error loading feeds");
                Vec::new()
            }
        }
    }

    /// Load the full subscription list, surfacing storage errors.
    pub async fn try_load(&self) -> Result<Vec<Feed>, StorageError> {
        match self.kv.get(FEEDS_KEY).await.map_err(StorageError::Read)? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(StorageError::Corrupt),
            None => Ok(Vec::new()),
        }
    }

    /// Replace the stored subscription list with `feeds`.
    pub async fn save(&self, feeds: &[Feed]) -> Result<(), StorageError> {
        let encoded = serde_json::to_vec(feeds).map_err(StorageError::Encode)?;
        self.kv
            .set(FEEDS_KEY, &encoded)
            .await
            .map_err(StorageError::Write)
    }

    /// Load, mutate and save the list as one storage transaction.
    ///
    /// The guard only excludes this process. `modify` also excludes other
    /// processes writing the same database, so their changes are never
    /// overwritten by a list read before them. `mutate` sees the list as
    /// currently stored; returning `None` saves nothing.
    pub async fn modify<T, F>(&self, mutate: F) -> Result<Option<T>, StorageError>
    where
        F: FnOnce(&mut Vec<Feed>) -> Option<T> + Send,
        T: Send,
    {
        let mut mutate = Some(mutate);
        let mut outcome: Result<Option<T>, StorageError> = Ok(None);
        let mut read = false;

        let result = self
            .kv
            .update(FEEDS_KEY, &mut |current| {
                read = true;
                let mut feeds: Vec<Feed> = match current {
                    Some(bytes) => match serde_json::from_slice(bytes) {
                        Ok(feeds) => feeds,
                        Err(e) => {
                            outcome = Err(StorageError::Corrupt(e));
                            return None;
                        }
                    },
                    None => Vec::new(),
                };

                let value = mutate.take().and_then(|mutate| mutate(&mut feeds))?;
                match serde_json::to_vec(&feeds) {
                    Ok(encoded) => {
                        outcome = Ok(Some(value));
                        Some(encoded)
                    }
                    Err(e) => {
                        outcome = Err(StorageError::Encode(e));
                        None
                    }
                }
            })
            .await;

        match result {
            Ok(_) => outcome,
            Err(e) if read => Err(StorageError::Write(e)),
            Err(e) => Err(StorageError::Read(e)),
        }
    }
}
