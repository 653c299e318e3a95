//! Shared helpers for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use feedbot::feed::{FetchOptions, Fetcher};
use feedbot::notifier::{Notifier, NotifyError};
use feedbot::plugin::FeedBot;
use feedbot::storage::Database;
use feedbot::store::FeedStore;
use std::sync::{Arc, Mutex};

/// Keeps every message in memory instead of posting it.
#[derive(Default)]
pub struct RecordingNotifier {
    posts: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn posts(&self) -> Vec<(String, String)> {
        self.posts.lock().unwrap().clone()
    }

    pub fn texts_for(&self, channel_id: &str) -> Vec<String> {
        self.posts()
            .into_iter()
            .filter(|(channel, _)| channel == channel_id)
            .map(|(_, text)| text)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn post(&self, channel_id: &str, text: &str) -> Result<(), NotifyError> {
        self.posts
            .lock()
            .unwrap()
            .push((channel_id.to_string(), text.to_string()));
        Ok(())
    }
}

/// A bot over a fresh in-memory database. Nothing is scheduled.
pub async fn test_bot() -> (FeedBot, Arc<FeedStore>, Arc<RecordingNotifier>) {
    let db = Database::open(":memory:").await.unwrap();
    let store = Arc::new(FeedStore::new(Arc::new(db)));
    let notifier = Arc::new(RecordingNotifier::default());
    let fetcher = Fetcher::new(FetchOptions::default()).unwrap();
    let bot = FeedBot::from_parts(store.clone(), fetcher, notifier.clone());
    (bot, store, notifier)
}

/// RSS 2.0 document titled "Blog" with one item per `(title, unix_ts)`.
pub fn rss(items: &[(&str, i64)]) -> String {
    let items: String = items
        .iter()
        .map(|(title, ts)| {
            let date = chrono::DateTime::from_timestamp(*ts, 0).unwrap().to_rfc2822();
            format!(
                "<item><title>{t}</title><link>https://example.com/{t}</link><pubDate>{d}</pubDate></item>",
                t = title,
                d = date
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Blog</title>{}</channel></rss>"#,
        items
    )
}
