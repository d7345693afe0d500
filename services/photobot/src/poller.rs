//! Telegram long-polling loop.

use crate::handlers::BotHandler;
use crate::telegram::{TelegramClient, TelegramError, Update};
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Source of bot updates
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn fetch_updates(
        &self,
        offset: i64,
        timeout: Duration,
    ) -> Result<Vec<Update>, TelegramError>;
}

#[async_trait]
impl UpdateSource for TelegramClient {
    async fn fetch_updates(
        &self,
        offset: i64,
        timeout: Duration,
    ) -> Result<Vec<Update>, TelegramError> {
        self.get_updates(offset, timeout).await
    }
}

/// Poller settings
#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub poll_timeout: Duration,
    pub retry_delay: Duration,
    pub max_in_flight: usize,
}

/// Pulls updates and hands each one to the handler on its own task.
///
/// Different users are served concurrently, but the updates of one user
/// run in the order they were received: each task waits for the previous
/// task of the same sender.
pub struct UpdatePoller {
    source: Arc<dyn UpdateSource>,
    handler: Arc<BotHandler>,
    settings: PollerSettings,
    in_flight: Arc<Semaphore>,
    tails: Mutex<HashMap<i64, JoinHandle<()>>>,
}

impl UpdatePoller {
    pub fn new(
        source: Arc<dyn UpdateSource>,
        handler: Arc<BotHandler>,
        settings: PollerSettings,
    ) -> Self {
        let in_flight = Arc::new(Semaphore::new(settings.max_in_flight.max(1)));
        Self {
            source,
            handler,
            settings,
            in_flight,
            tails: Mutex::new(HashMap::new()),
        }
    }

    /// Poll until `shutdown` is cancelled
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!("Starting update poller");

        let mut offset = 0;

        loop {
            let batch = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                batch = self.source.fetch_updates(offset, self.settings.poll_timeout) => batch,
            };

            let updates = match batch {
                Ok(updates) => updates,
                Err(e) => {
                    error!(error = %e, "Failed to fetch updates");
                    metrics::counter!("photobot.poll.errors").increment(1);

                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.retry_delay) => continue,
                    }
                }
            };

            offset = next_offset(offset, &updates);
            self.tails.lock().retain(|_, task| !task.is_finished());

            for update in updates {
                self.dispatch(update).await?;
            }
        }

        info!("Update poller stopped");
        Ok(())
    }

    async fn dispatch(&self, update: Update) -> Result<()> {
        let permit = self
            .in_flight
            .clone()
            .acquire_owned()
            .await
            .context("Failed to acquire update permit")?;

        debug!(update_id = update.update_id, "Dispatching update");
        metrics::counter!("photobot.updates.received").increment(1);

        let sender = update.sender_id();
        let previous = sender.and_then(|id| self.tails.lock().remove(&id));

        let handler = self.handler.clone();
        let task = tokio::spawn(async move {
            if let Some(previous) = previous {
                // a panicked predecessor must not stall the user
                let _ = previous.await;
            }
            handler.handle_update(update).await;
            drop(permit);
        });

        if let Some(id) = sender {
            self.tails.lock().insert(id, task);
        }

        Ok(())
    }
}

/// Offset acknowledging every update in `updates`
fn next_offset(current: i64, updates: &[Update]) -> i64 {
    updates
        .iter()
        .map(|u| u.update_id + 1)
        .max()
        .map_or(current, |next| next.max(current))
}
