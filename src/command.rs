//! The `/feed` slash command.
//!
//! ```text
//! /feed list
//! /feed add <url>
//! /feed del <url_or_index>
//! /feed help
//! ```
//!
//! Anything that does not fit one of these shapes gets the usage text back;
//! user input never produces a hard error.

use thiserror::Error;

use crate::notifier::Notifier;
use crate::store::StorageError;
use crate::subscriptions::{DeleteOutcome, SubscriptionManager};

pub const TRIGGER: &str = "feed";
pub const DESCRIPTION: &str = "Manage your feeds";

pub const USAGE: &str = "```
Usage: /feed <command> [args]
/feed list
	List all feeds
/feed add <url>
	Add a feed
/feed del <url_or_index>
	Delete a feed
/feed help
	Show this help
```";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    List,
    Add { url: String },
    Delete { url_or_index: String },
    Help,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Not a /feed command")]
    WrongTrigger,
    #[error("Missing subcommand")]
    MissingSubcommand,
    #[error("Unknown subcommand: {0}")]
    UnknownSubcommand(String),
    #[error("Wrong number of arguments for {0}")]
    WrongArgumentCount(&'static str),
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let fields: Vec<&str> = line.split_whitespace().collect();

        match fields.as_slice() {
            [trigger, ..] if trigger.strip_prefix('/') != Some(TRIGGER) => {
                Err(CommandError::WrongTrigger)
            }
            [] => Err(CommandError::WrongTrigger),
            [_] => Err(CommandError::MissingSubcommand),
            [_, "help", ..] => Ok(Command::Help),
            [_, "list"] => Ok(Command::List),
            [_, "list", ..] => Err(CommandError::WrongArgumentCount("list")),
            [_, "add", url] => Ok(Command::Add {
                url: url.to_string(),
            }),
            [_, "add", ..] => Err(CommandError::WrongArgumentCount("add")),
            [_, "del", arg] => Ok(Command::Delete {
                url_or_index: arg.to_string(),
            }),
            [_, "del", ..] => Err(CommandError::WrongArgumentCount("del")),
            [_, other, ..] => Err(CommandError::UnknownSubcommand(other.to_string())),
        }
    }
}

/// Who issued a command, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandContext {
    pub channel_id: String,
    pub user_name: Option<String>,
}

impl CommandContext {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            user_name: None,
        }
    }

    pub fn with_user(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = Some(user_name.into());
        self
    }

    fn user(&self) -> &str {
        self.user_name.as_deref().unwrap_or("anonymous")
    }
}

/// Reply shown to the user who issued the command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub text: String,
}

impl CommandResponse {
    fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn usage() -> Self {
        Self::new(USAGE)
    }
}

fn storage_failure(e: &StorageError) -> CommandResponse {
    match e {
        StorageError::Read(_) | StorageError::Corrupt(_) => {
            CommandResponse::new("Error: unable to load feeds")
        }
        StorageError::Write(_) | StorageError::Encode(_) => {
            CommandResponse::new("Error: unable to save feeds")
        }
    }
}

/// Parse and run one command line.
///
/// Successful adds and deletes are also announced in the channel so
/// everyone there sees who changed the subscription list.
pub async fn execute(
    manager: &SubscriptionManager,
    notifier: &dyn Notifier,
    ctx: &CommandContext,
    line: &str,
) -> CommandResponse {
    let command = match Command::parse(line) {
        Ok(command) => command,
        Err(e) => {
            tracing::debug!(channel = %ctx.channel_id, error = %e, "Invalid command");
            return CommandResponse::usage();
        }
    };

    match command {
        Command::Help => CommandResponse::usage(),
        Command::List => {
            let urls = manager.list(&ctx.channel_id).await;
            if urls.is_empty() {
                return CommandResponse::new("No feeds in this channel.");
            }
            let mut text = String::from("Feeds in this channel:\n\n");
            for (i, url) in urls.iter().enumerate() {
                text.push_str(&format!("{}. {}\n", i + 1, url));
            }
            CommandResponse::new(text)
        }
        Command::Add { url } => match manager.add(&ctx.channel_id, &url).await {
            Ok(feed) => {
                announce(
                    notifier,
                    ctx,
                    &format!("**New feed added!**\n\n{} by @{}", feed.url, ctx.user()),
                )
                .await;
                CommandResponse::new(format!("Feed added: {}", feed.url))
            }
            Err(e) => {
                tracing::error!(channel = %ctx.channel_id, feed = %url, error = %e, "Error adding feed");
                storage_failure(&e)
            }
        },
        Command::Delete { url_or_index } => {
            match manager.delete(&ctx.channel_id, &url_or_index).await {
                Ok(DeleteOutcome::Deleted(feed)) => {
                    announce(
                        notifier,
                        ctx,
                        &format!("**Feed deleted!**\n\n{} by @{}", feed.url, ctx.user()),
                    )
                    .await;
                    CommandResponse::new(format!("Feed deleted: {}", feed.url))
                }
                Ok(DeleteOutcome::NotFound) => CommandResponse::new(format!(
                    "{} is not found in this channel. Please check the URL and try again.",
                    url_or_index
                )),
                Err(e) => {
                    tracing::error!(channel = %ctx.channel_id, arg = %url_or_index, error = %e, "Error deleting feed");
                    storage_failure(&e)
                }
            }
        }
    }
}

async fn announce(notifier: &dyn Notifier, ctx: &CommandContext, text: &str) {
    if let Err(e) = notifier.post(&ctx.channel_id, text).await {
        tracing::warn!(channel = %ctx.channel_id, error = %e, "Error posting announcement");
    }
}
