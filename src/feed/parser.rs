use feed_rs::parser;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Parse error: {0}")]
pub struct ParseError(#[from] parser::ParseFeedError);

/// A feed decoded into the pieces the poller needs.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub items: Vec<Item>,
}

/// One feed entry. Ephemeral: never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub title: String,
    pub link: String,
    /// Publication time, seconds since the Unix epoch.
    pub published: Option<i64>,
    /// Last-modified time, seconds since the Unix epoch.
    pub updated: Option<i64>,
}

impl Item {
    /// Timestamp used for ordering and for the watermark.
    ///
    /// The publication time wins; the last-modified time is only a fallback.
    /// Preferring `updated` would re-announce old posts every time a feed
    /// edits them.
    pub fn timestamp(&self) -> Option<i64> {
        self.published.or(self.updated)
    }
}

pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    let feed = parser::parse(bytes)?;

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default();
            let title = entry
                .title
                .map(|t| t.content)
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| "Untitled".to_string());

            Item {
                title,
                link,
                published: entry.published.map(|dt| dt.timestamp()),
                updated: entry.updated.map(|dt| dt.timestamp()),
            }
        })
        .collect();

    Ok(ParsedFeed {
        title: feed.title.map(|t| t.content).filter(|t| !t.trim().is_empty()),
        items,
    })
}
