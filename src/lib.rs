//! Feed bot: polls RSS/Atom feeds on a fixed schedule and posts new items to
//! the chat channels subscribed to them.

pub mod command;
pub mod config;
pub mod feed;
pub mod notifier;
pub mod plugin;
pub mod poller;
pub mod scheduler;
pub mod storage;
pub mod store;
pub mod subscriptions;
pub mod util;
