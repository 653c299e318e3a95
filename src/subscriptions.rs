use std::sync::Arc;

use crate::store::{Feed, FeedStore, StorageError};

/// Result of a delete request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The first matching subscription was removed and the list saved.
    Deleted(Feed),
    /// Nothing in the channel matched the URL or position.
    NotFound,
}

/// List/add/delete over the same store the poller uses.
///
/// Every operation takes the store lock for its whole load-mutate-save
/// sequence.
#[derive(Clone)]
pub struct SubscriptionManager {
    store: Arc<FeedStore>,
}

impl SubscriptionManager {
    pub fn new(store: Arc<FeedStore>) -> Self {
        Self { store }
    }

    /// URLs subscribed in `channel_id`, in the order they were added.
    /// Read failures yield an empty list.
    pub async fn list(&self, channel_id: &str) -> Vec<String> {
        let guard = self.store.lock().await;
        guard
            .load()
            .await
            .into_iter()
            .filter(|feed| feed.channel_id == channel_id)
            .map(|feed| feed.url)
            .collect()
    }

    /// Subscribe `channel_id` to `url`, watermarked at the current time.
    ///
    /// Duplicates are allowed: each subscription is tracked independently.
    pub async fn add(&self, channel_id: &str, url: &str) -> Result<Feed, StorageError> {
        let guard = self.store.lock().await;

        let feed = Feed::new(url, channel_id, chrono::Utc::now().timestamp());
        let pushed = feed.clone();
        guard
            .modify(move |feeds| {
                feeds.push(pushed);
                Some(())
            })
            .await?;

        tracing::info!(channel = %channel_id, feed = %url, "Feed added");
        Ok(feed)
    }

    /// Remove the first subscription in `channel_id` whose URL equals
    /// `url_or_index`, or whose 1-based position among the channel's own
    /// subscriptions (as shown by [`Self::list`]) is written exactly as
    /// `url_or_index`. `"02"` or `"+2"` name no position.
    pub async fn delete(
        &self,
        channel_id: &str,
        url_or_index: &str,
    ) -> Result<DeleteOutcome, StorageError> {
        let guard = self.store.lock().await;

        let removed = guard
            .modify(|feeds| {
                let index = feeds
                    .iter()
                    .enumerate()
                    .filter(|(_, feed)| feed.channel_id == channel_id)
                    .enumerate()
                    .find(|(channel_pos, (_, feed))| {
                        feed.url == url_or_index || (channel_pos + 1).to_string() == url_or_index
                    })
                    .map(|(_, (index, _))| index)?;
                Some(feeds.remove(index))
            })
            .await?;

        let Some(removed) = removed else {
            return Ok(DeleteOutcome::NotFound);
        };

        tracing::info!(channel = %channel_id, feed = %removed.url, "Feed deleted");
        Ok(DeleteOutcome::Deleted(removed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Database, DatabaseError, KvStore};
    use crate::store::FEEDS_KEY;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Reads from a real database; writes fail once `fail_writes` is set.
    struct WriteFailingKv {
        db: Database,
        fail_writes: AtomicBool,
    }

    #[async_trait]
    impl KvStore for WriteFailingKv {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, DatabaseError> {
            self.db.get(key).await
        }

        async fn set(&self, key: &str, value: &[u8]) -> Result<(), DatabaseError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(DatabaseError::Other(sqlx::Error::PoolClosed));
            }
            self.db.set(key, value).await
        }

        async fn delete(&self, key: &str) -> Result<(), DatabaseError> {
            self.db.delete(key).await
        }

        async fn update(
            &self,
            key: &str,
            apply: &mut (dyn for<'v> FnMut(Option<&'v [u8]>) -> Option<Vec<u8>> + Send),
        ) -> Result<bool, DatabaseError> {
            let current = self.db.get(key).await?;
            match apply(current.as_deref()) {
                Some(value) => self.set(key, &value).await.map(|()| true),
                None => Ok(false),
            }
        }
    }

    async fn test_manager() -> (Database, SubscriptionManager) {
        let db = Database::open(":memory:").await.unwrap();
        let store = Arc::new(FeedStore::new(Arc::new(db.clone())));
        (db, SubscriptionManager::new(store))
    }

    async fn seed(manager: &SubscriptionManager, channel: &str, urls: &[&str]) {
        for url in urls {
            manager.add(channel, url).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_list_empty_channel() {
        let (_db, manager) = test_manager().await;
        assert!(manager.list("c1").await.is_empty());
    }

    #[tokio::test]
    async fn test_list_filters_by_channel_in_insertion_order() {
        let (_db, manager) = test_manager().await;
        manager.add("c1", "a").await.unwrap();
        manager.add("c2", "x").await.unwrap();
        manager.add("c1", "b").await.unwrap();

        assert_eq!(manager.list("c1").await, vec!["a", "b"]);
        assert_eq!(manager.list("c2").await, vec!["x"]);
    }

    #[tokio::test]
    async fn test_add_sets_watermark_to_now() {
        let (_db, manager) = test_manager().await;
        let before = chrono::Utc::now().timestamp();
        let feed = manager.add("c1", "https://example.com/feed").await.unwrap();
        let after = chrono::Utc::now().timestamp();

        assert!(feed.updated >= before && feed.updated <= after);
        assert_eq!(feed.channel_id, "c1");
    }

    #[tokio::test]
    async fn test_add_allows_duplicates() {
        let (_db, manager) = test_manager().await;
        seed(&manager, "c1", &["a", "a"]).await;
        assert_eq!(manager.list("c1").await, vec!["a", "a"]);
    }

    #[tokio::test]
    async fn test_add_then_delete_round_trip() {
        let (_db, manager) = test_manager().await;
        seed(&manager, "c1", &["a", "b"]).await;
        let before = manager.list("c1").await;

        manager.add("c1", "new").await.unwrap();
        let outcome = manager.delete("c1", "new").await.unwrap();

        assert!(matches!(outcome, DeleteOutcome::Deleted(ref f) if f.url == "new"));
        assert_eq!(manager.list("c1").await, before);
    }

    #[tokio::test]
    async fn test_delete_by_position() {
        let (_db, manager) = test_manager().await;
        seed(&manager, "c1", &["a", "b", "c"]).await;

        let outcome = manager.delete("c1", "2").await.unwrap();
        assert!(matches!(outcome, DeleteOutcome::Deleted(ref f) if f.url == "b"));
        assert_eq!(manager.list("c1").await, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_delete_position_is_relative_to_channel() {
        let (_db, manager) = test_manager().await;
        manager.add("c2", "other-1").await.unwrap();
        manager.add("c1", "a").await.unwrap();
        manager.add("c2", "other-2").await.unwrap();
        manager.add("c1", "b").await.unwrap();

        let outcome = manager.delete("c1", "2").await.unwrap();
        assert!(matches!(outcome, DeleteOutcome::Deleted(ref f) if f.url == "b"));
        assert_eq!(manager.list("c2").await, vec!["other-1", "other-2"]);
    }

    #[tokio::test]
    async fn test_delete_position_must_match_exactly() {
        let (_db, manager) = test_manager().await;
        seed(&manager, "c1", &["a", "b", "c"]).await;

        for arg in ["02", "+2", " 2", "2.0"] {
            assert_eq!(
                manager.delete("c1", arg).await.unwrap(),
                DeleteOutcome::NotFound,
                "arg: {:?}",
                arg
            );
        }
        assert_eq!(manager.list("c1").await, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_delete_removes_first_match_only() {
        let (_db, manager) = test_manager().await;
        seed(&manager, "c1", &["a", "b", "a"]).await;

        manager.delete("c1", "a").await.unwrap();
        assert_eq!(manager.list("c1").await, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_delete_not_found() {
        let (_db, manager) = test_manager().await;
        seed(&manager, "c1", &["a"]).await;
        manager.add("c2", "b").await.unwrap();

        assert_eq!(manager.delete("c1", "b").await.unwrap(), DeleteOutcome::NotFound);
        assert_eq!(manager.delete("c1", "0").await.unwrap(), DeleteOutcome::NotFound);
        assert_eq!(manager.delete("c1", "2").await.unwrap(), DeleteOutcome::NotFound);
        assert_eq!(manager.delete("c3", "1").await.unwrap(), DeleteOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_mutations_refuse_to_overwrite_unreadable_data() {
        let (db, manager) = test_manager().await;
        db.set(FEEDS_KEY, b"{corrupt").await.unwrap();

        assert!(matches!(
            manager.add("c1", "a").await,
            Err(StorageError::Corrupt(_))
        ));
        assert!(matches!(
            manager.delete("c1", "a").await,
            Err(StorageError::Corrupt(_))
        ));
        // The unreadable value is still there for an operator to inspect
        assert_eq!(db.get(FEEDS_KEY).await.unwrap().as_deref(), Some(&b"{corrupt"[..]));
    }

    #[tokio::test]
    async fn test_add_reports_write_failure() {
        let (db, manager) = test_manager().await;
        db.close().await;
        assert!(manager.add("c1", "a").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_write_failure_is_not_not_found() {
        let kv = Arc::new(WriteFailingKv {
            db: Database::open(":memory:").await.unwrap(),
            fail_writes: AtomicBool::new(false),
        });
        let manager = SubscriptionManager::new(Arc::new(FeedStore::new(kv.clone())));
        seed(&manager, "c1", &["a"]).await;

        kv.fail_writes.store(true, Ordering::SeqCst);
        assert!(matches!(
            manager.delete("c1", "a").await,
            Err(StorageError::Write(_))
        ));
        // Missing entries are still reported as not found without writing
        assert_eq!(manager.delete("c1", "zzz").await.unwrap(), DeleteOutcome::NotFound);
        assert_eq!(manager.list("c1").await, vec!["a"]);
    }
}
