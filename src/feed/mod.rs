//! Getting from a feed URL to the list of items worth announcing.
//!
//! - [`fetcher`] - single HTTP GET with a timeout, size cap and a real user agent
//! - [`parser`] - RSS/Atom decoding via the `feed-rs` crate
//! - [`watermark`] - selects items newer than a subscription's watermark
//!
//! # Example
//!
//! ```ignore
//! let bytes = fetcher.fetch(&feed.url).await?;
//! let parsed = parse_feed(&bytes)?;
//! let selection = select_new(parsed.items, feed.updated);
//! ```

mod fetcher;
mod parser;
mod watermark;

pub use fetcher::{FetchError, FetchOptions, Fetcher, DEFAULT_USER_AGENT};
pub use parser::{parse_feed, Item, ParseError, ParsedFeed};
pub use watermark::{select_new, watermark_before, Selection};
