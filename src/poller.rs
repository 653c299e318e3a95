//! One polling cycle across every subscription.
//!
//! For each subscription, in stored order: fetch, parse, select the items
//! newer than its watermark, post them oldest first, then advance the
//! watermark in memory. The whole list is written back once at the end.
//!
//! A failure on one subscription is reported to its channel and leaves its
//! watermark untouched; the next subscription is processed as usual. If the
//! final write fails, nothing is retracted: the next cycle may re-announce
//! items, but never skips one.
//!
//! The final write merges the advanced watermarks into the list as stored at
//! that moment, so subscriptions added or deleted by another process during
//! the cycle are kept as that process left them.

use std::sync::Arc;

use crate::feed::{parse_feed, select_new, watermark_before, Fetcher, Item};
use crate::notifier::Notifier;
use crate::store::{Feed, FeedStore};

/// Outcome of one [`Poller::run_cycle`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Subscriptions processed.
    pub feeds: usize,
    /// Item notifications delivered.
    pub notified: usize,
    /// Subscriptions whose fetch or parse failed.
    pub failed: usize,
    /// Whether the updated list was written back.
    pub persisted: bool,
}

/// Message announcing a new item.
pub fn item_message(item: &Item, feed_title: Option<&str>) -> String {
    match feed_title {
        Some(feed_title) => format!("{} | {}\n{}", item.title, feed_title, item.link),
        None => format!("{}\n{}", item.title, item.link),
    }
}

pub struct Poller {
    store: Arc<FeedStore>,
    fetcher: Fetcher,
    notifier: Arc<dyn Notifier>,
}

impl Poller {
    pub fn new(store: Arc<FeedStore>, fetcher: Fetcher, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            fetcher,
            notifier,
        }
    }

    /// Run one cycle. Holds the store lock throughout, so subscription
    /// commands issued meanwhile wait for it to finish.
    pub async fn run_cycle(&self) -> CycleReport {
        let guard = self.store.lock().await;

        let mut feeds = match guard.try_load().await {
            Ok(feeds) => feeds,
            Err(e) => {
                tracing::error!(error = %e, "Cannot read subscriptions, skipping cycle");
                return CycleReport::default();
            }
        };

        let mut report = CycleReport {
            feeds: feeds.len(),
            ..CycleReport::default()
        };

        for feed in feeds.iter_mut() {
            match self.poll_feed(feed).await {
                Some(notified) => report.notified += notified,
                None => report.failed += 1,
            }
        }

        if !feeds.is_empty() {
            let saved = guard
                .modify(|stored| {
                    merge_watermarks(stored, &feeds);
                    Some(())
                })
                .await;
            match saved {
                Ok(_) => report.persisted = true,
                Err(e) => {
                    tracing::error!(error = %e, "Error saving feeds; new items may be announced again")
                }
            }
        }

        tracing::info!(
            feeds = report.feeds,
            notified = report.notified,
            failed = report.failed,
            persisted = report.persisted,
            "Feed cycle complete"
        );

        report
    }

    /// Process one subscription, advancing `feed.updated` past whatever was
    /// announced. Returns the number of items posted, or `None` if the feed
    /// could not be fetched or parsed.
    async fn poll_feed(&self, feed: &mut Feed) -> Option<usize> {
        let bytes = match self.fetcher.fetch(&feed.url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(feed = %feed.url, channel = %feed.channel_id, error = %e, "Error fetching feed");
                self.report(feed, &format!("Error fetching: {} ({})", feed.url, e))
                    .await;
                return None;
            }
        };

        let parsed = match parse_feed(&bytes) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(feed = %feed.url, channel = %feed.channel_id, error = %e, "Error parsing feed");
                self.report(feed, &format!("Error parsing: {}", feed.url))
                    .await;
                return None;
            }
        };

        let selection = select_new(parsed.items, feed.updated);
        if selection.is_empty() {
            tracing::debug!(feed = %feed.url, watermark = feed.updated, "No new items");
            return Some(0);
        }

        for (index, (ts, item)) in selection.items.iter().enumerate() {
            let text = item_message(item, parsed.title.as_deref());
            if let Err(e) = self.notifier.post(&feed.channel_id, &text).await {
                let watermark = watermark_before(&selection, index, feed.updated);
                tracing::error!(
                    feed = %feed.url,
                    channel = %feed.channel_id,
                    item_timestamp = ts,
                    watermark = watermark,
                    error = %e,
                    "Error posting item; remaining items deferred to next cycle"
                );
                feed.updated = watermark;
                return Some(index);
            }
        }

        tracing::debug!(
            feed = %feed.url,
            items = selection.items.len(),
            watermark = selection.watermark,
            "Announced new items"
        );
        feed.updated = selection.watermark;
        Some(selection.items.len())
    }

    async fn report(&self, feed: &Feed, text: &str) {
        if let Err(e) = self.notifier.post(&feed.channel_id, text).await {
            tracing::error!(channel = %feed.channel_id, error = %e, "Error posting message");
        }
    }
}

/// Advance each stored subscription's watermark to the one reached in this
/// cycle. The n-th occurrence of a (url, channel) pair in `polled` matches
/// the n-th occurrence in `stored`; subscriptions only present on one side
/// are left alone. Watermarks never move backwards.
fn merge_watermarks(stored: &mut [Feed], polled: &[Feed]) {
    let mut matched = vec![false; stored.len()];

    for feed in polled {
        let slot = stored.iter().enumerate().position(|(i, candidate)| {
            !matched[i] && candidate.url == feed.url && candidate.channel_id == feed.channel_id
        });
        let Some(i) = slot else {
            continue;
        };
        matched[i] = true;
        stored[i].updated = stored[i].updated.max(feed.updated);
    }
}
