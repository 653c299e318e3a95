use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use feedbot::command::{CommandContext, DESCRIPTION, TRIGGER};
use feedbot::config::Config;
use feedbot::plugin::{ActivationError, FeedBot, PluginHooks};
use feedbot::storage::DatabaseError;

/// Get the config directory path (~/.config/feedbot/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    let config_dir = PathBuf::from(home).join(".config").join("feedbot");
    Ok(config_dir)
}

/// Create the config directory if needed, restricted to the current user.
fn ensure_config_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
        tracing::info!(path = %config_dir.display(), "Created config directory");
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }

    Ok(())
}

#[derive(Parser, Debug)]
#[command(
    name = "feedbot",
    about = "Chat bot that posts new RSS/Atom items to subscribed channels"
)]
struct Args {
    /// Config file (default: ~/.config/feedbot/config.toml)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Poll on schedule and read `<channel_id> /feed ...` lines from stdin
    Serve {
        /// User the stdin commands are attributed to
        #[arg(long)]
        user: Option<String>,
    },
    /// Run one polling cycle now and exit
    Poll,
    /// Run one /feed command, e.g. `feedbot command --channel town-square add <url>`
    Command {
        #[arg(long)]
        channel: String,
        #[arg(long)]
        user: Option<String>,
        /// Subcommand and arguments, without the leading /feed
        #[arg(required = true, trailing_var_arg = true)]
        words: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    tracing::debug!(?config, "Effective configuration");

    // Relative database paths follow the config file when one was given
    let base_dir = match &args.config {
        Some(path) => path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
        None => {
            ensure_config_dir(&config_dir)?;
            config_dir
        }
    };
    let db_path = config.database_path(&base_dir);

    let opened = match &args.mode {
        Mode::Serve { .. } => FeedBot::activate(&config, &db_path).await,
        Mode::Poll | Mode::Command { .. } => FeedBot::open(&config, &db_path).await,
    };
    let bot = match opened {
        Ok(bot) => bot,
        Err(ActivationError::Database(DatabaseError::InstanceLocked)) => {
            eprintln!(
                "Error: Another instance of feedbot appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => return Err(e).context("Failed to start feedbot"),
    };

    match args.mode {
        Mode::Serve { user } => serve(&bot, user).await,
        Mode::Poll => {
            let report = bot.run_cycle().await;
            println!(
                "Polled {} feeds: {} new items, {} failed{}",
                report.feeds,
                report.notified,
                report.failed,
                if report.persisted || report.feeds == 0 {
                    ""
                } else {
                    " (watermarks not saved)"
                }
            );
        }
        Mode::Command {
            channel,
            user,
            words,
        } => {
            let mut ctx = CommandContext::new(channel);
            if let Some(user) = user {
                ctx = ctx.with_user(user);
            }
            let line = format!("/{} {}", TRIGGER, words.join(" "));
            let reply = bot.execute_command(&ctx, &line).await;
            println!("{}", reply.text);
        }
    }

    bot.deactivate().await;
    Ok(())
}

/// Read commands from stdin until EOF, Ctrl-C or a read error.
async fn serve(bot: &FeedBot, user: Option<String>) {
    eprintln!(
        "feedbot: /{} ({}). Enter `<channel_id> /{} help`; Ctrl-D to stop.",
        TRIGGER, DESCRIPTION, TRIGGER
    );
    serve_lines(bot, tokio::io::BufReader::new(tokio::io::stdin()), user.as_deref()).await;
}

/// Run each `<channel_id> /feed ...` line from `input` and print the reply.
/// Returns when the input ends or fails, or on Ctrl-C.
async fn serve_lines<R>(bot: &FeedBot, input: R, user: Option<&str>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read commands, shutting down");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((channel, command)) = line.split_once(char::is_whitespace) else {
            eprintln!("Expected `<channel_id> /{} ...`", TRIGGER);
            continue;
        };

        let mut ctx = CommandContext::new(channel);
        if let Some(user) = user {
            ctx = ctx.with_user(user);
        }
        let reply = bot.execute_command(&ctx, command.trim()).await;
        println!("{}", reply.text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedbot::feed::{FetchOptions, Fetcher};
    use feedbot::notifier::{BotIdentity, ConsoleNotifier};
    use feedbot::storage::Database;
    use feedbot::store::FeedStore;
    use std::sync::Arc;

    async fn test_bot() -> FeedBot {
        let db = Database::open(":memory:").await.unwrap();
        FeedBot::from_parts(
            Arc::new(FeedStore::new(Arc::new(db))),
            Fetcher::new(FetchOptions::default()).unwrap(),
            Arc::new(ConsoleNotifier::new(BotIdentity::default())),
        )
    }

    #[tokio::test]
    async fn test_serve_runs_each_line_until_eof() {
        let bot = test_bot().await;
        let input: &[u8] = b"c1 /feed add https://a.example/rss\n\nnot-a-command\nc2 /feed add https://b.example/rss\n";

        serve_lines(&bot, input, Some("alice")).await;

        assert_eq!(bot.subscriptions().list("c1").await, vec!["https://a.example/rss"]);
        assert_eq!(bot.subscriptions().list("c2").await, vec!["https://b.example/rss"]);
    }

    #[tokio::test]
    async fn test_serve_stops_on_read_error_and_still_deactivates() {
        let bot = test_bot().await;
        // Invalid UTF-8 makes the line reader fail on the second line
        let input: &[u8] =
            b"c1 /feed add https://a.example/rss\n\xff\xfe\nc1 /feed add https://b.example/rss\n";

        serve_lines(&bot, input, None).await;

        assert_eq!(bot.subscriptions().list("c1").await, vec!["https://a.example/rss"]);
        bot.deactivate().await;
    }
}
