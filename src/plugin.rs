//! Host contract and the bot's runtime context.
//!
//! A host drives the bot through two entry points, [`PluginHooks::run_cycle`]
//! and [`PluginHooks::execute_command`]. [`FeedBot`] is the one
//! implementation: built on activation, torn down on deactivation.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::command::{self, CommandContext, CommandResponse};
use crate::config::Config;
use crate::feed::{FetchError, Fetcher};
use crate::notifier::{ConsoleNotifier, Notifier, NotifyError, WebhookNotifier};
use crate::poller::{CycleReport, Poller};
use crate::scheduler::{self, JobHandle};
use crate::storage::{Database, DatabaseError};
use crate::store::{FeedStore, StorageError};
use crate::subscriptions::SubscriptionManager;

/// Name of the recurring polling job.
pub const CYCLE_JOB: &str = "FeedCycle";

#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("Failed to open database: {0}")]
    Database(#[from] DatabaseError),
    #[error("Failed to migrate stored subscriptions: {0}")]
    Migration(#[from] StorageError),
    #[error("Failed to build HTTP client: {0}")]
    Fetcher(#[from] FetchError),
    #[error("Failed to build notifier: {0}")]
    Notifier(#[from] NotifyError),
    #[error("Database path is not valid UTF-8: {0}")]
    InvalidPath(String),
}

/// Entry points the host runtime calls.
#[async_trait]
pub trait PluginHooks: Send + Sync {
    /// Poll every subscription once.
    async fn run_cycle(&self) -> CycleReport;

    /// Handle one `/feed ...` line typed in `ctx.channel_id`.
    async fn execute_command(&self, ctx: &CommandContext, line: &str) -> CommandResponse;
}

pub struct FeedBot {
    poller: Arc<Poller>,
    subscriptions: SubscriptionManager,
    notifier: Arc<dyn Notifier>,
    db: Option<Database>,
    job: Option<JobHandle>,
}

impl FeedBot {
    /// Open storage and build every component, without scheduling cycles.
    ///
    /// Subscriptions saved under older storage keys are moved to the
    /// current key before anything reads them.
    pub async fn open(config: &Config, db_path: &Path) -> Result<Self, ActivationError> {
        let db_path_str = db_path
            .to_str()
            .ok_or_else(|| ActivationError::InvalidPath(db_path.display().to_string()))?;
        let db = Database::open(db_path_str).await?;

        let store = Arc::new(FeedStore::new(Arc::new(db.clone())));
        let migrated = store.migrate_legacy_keys().await?;
        if migrated > 0 {
            tracing::info!(feeds = migrated, "Migrated subscriptions from legacy storage key");
        }

        let notifier: Arc<dyn Notifier> = match &config.notifier.webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(
                SecretString::from(url.expose_secret().to_string()),
                config.bot.clone(),
            )?),
            None => {
                tracing::info!("No webhook configured, printing messages to stdout");
                Arc::new(ConsoleNotifier::new(config.bot.clone()))
            }
        };

        let fetcher = Fetcher::new(config.fetch_options())?;
        let mut bot = Self::from_parts(store, fetcher, notifier);
        bot.db = Some(db);
        Ok(bot)
    }

    /// [`FeedBot::open`], then schedule a cycle at every wall-clock multiple
    /// of the configured interval.
    pub async fn activate(config: &Config, db_path: &Path) -> Result<Self, ActivationError> {
        let mut bot = Self::open(config, db_path).await?;
        bot.start(config.fetch_interval());
        tracing::info!(
            trigger = command::TRIGGER,
            interval_minutes = config.fetch_interval_minutes,
            "Feed bot activated"
        );
        Ok(bot)
    }

    /// Assemble a bot from already-built components. Nothing is scheduled.
    pub fn from_parts(store: Arc<FeedStore>, fetcher: Fetcher, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            poller: Arc::new(Poller::new(store.clone(), fetcher, notifier.clone())),
            subscriptions: SubscriptionManager::new(store),
            notifier,
            db: None,
            job: None,
        }
    }

    /// Start the recurring cycle. A schedule already running is dropped,
    /// which stops it without waiting for its in-flight run.
    pub fn start(&mut self, interval: Duration) {
        let poller = self.poller.clone();
        self.job = Some(scheduler::schedule(CYCLE_JOB, interval, move || {
            let poller = poller.clone();
            async move {
                poller.run_cycle().await;
            }
        }));
    }

    pub fn is_scheduled(&self) -> bool {
        self.job.is_some()
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// Stop the schedule, letting an in-flight cycle finish, then close storage.
    pub async fn deactivate(mut self) {
        if let Some(job) = self.job.take() {
            job.close().await;
        }
        if let Some(db) = self.db.take() {
            db.close().await;
        }
        tracing::info!("Feed bot deactivated");
    }
}

#[async_trait]
impl PluginHooks for FeedBot {
    async fn run_cycle(&self) -> CycleReport {
        self.poller.run_cycle().await
    }

    async fn execute_command(&self, ctx: &CommandContext, line: &str) -> CommandResponse {
        command::execute(&self.subscriptions, self.notifier.as_ref(), ctx, line).await
    }
}
