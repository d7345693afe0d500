//! Message dispatch and the per-update error boundary.

use crate::batch::BatchNotifier;
use crate::ingest::PhotoIngestor;
use crate::matcher::{QueryError, SearchMode};
use crate::messages::{self, Locale};
use crate::search::{SearchError, SearchService};
use crate::telegram::{CallbackQuery, ChatTransport, Message, Update, HELP_CALLBACK};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// A parsed text message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Search { query: String, mode: SearchMode },
    DeleteLastSearch,
    Count,
    Unknown(String),
}

impl Command {
    /// Parse a text message. Commands match by command word, case-insensitive,
    /// with an optional `@botname` suffix; plain text is a single search.
    pub fn parse(text: &str) -> Command {
        let text = text.trim();

        let Some(rest) = text.strip_prefix('/') else {
            return Command::Search {
                query: text.to_string(),
                mode: SearchMode::First,
            };
        };

        let (word, args) = match rest.split_once(char::is_whitespace) {
            Some((word, args)) => (word, args.trim()),
            None => (rest, ""),
        };
        let word = word.split('@').next().unwrap_or_default().to_lowercase();

        match word.as_str() {
            "start" => Command::Start,
            "help" | "aiuto" => Command::Help,
            "search" | "cerca" => Command::Search {
                query: args.to_string(),
                mode: SearchMode::First,
            },
            "searchall" | "cercatutte" => Command::Search {
                query: args.to_string(),
                mode: SearchMode::All,
            },
            "delete" | "elimina" => Command::DeleteLastSearch,
            "count" | "conta" => Command::Count,
            _ => Command::Unknown(word),
        }
    }
}

/// Handler settings
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub default_locale: Locale,
    pub literal_marker: String,
    pub max_results_sent: usize,
}

/// Dispatches updates to the upload, query and delete paths
pub struct BotHandler {
    transport: Arc<dyn ChatTransport>,
    ingestor: Arc<PhotoIngestor>,
    search: Arc<SearchService>,
    batch: Arc<BatchNotifier>,
    settings: HandlerSettings,
}

impl BotHandler {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        ingestor: Arc<PhotoIngestor>,
        search: Arc<SearchService>,
        batch: Arc<BatchNotifier>,
        settings: HandlerSettings,
    ) -> Self {
        Self {
            transport,
            ingestor,
            search,
            batch,
            settings,
        }
    }

    fn locale_for(&self, language_code: Option<&str>) -> Locale {
        Locale::from_language_code(language_code, self.settings.default_locale)
    }

    /// Handle one update. Any failure is logged and answered with the generic
    /// failure message; nothing propagates to the poller.
    #[instrument(skip(self, update), fields(update_id = update.update_id))]
    pub async fn handle_update(&self, update: Update) {
        if let Some(callback) = update.callback_query {
            self.handle_callback(callback).await;
            return;
        }

        let Some(message) = update.message else {
            debug!("Ignoring update without message");
            return;
        };

        let Some(user) = message.from.clone() else {
            debug!("Ignoring message without sender");
            return;
        };
        if user.is_bot {
            return;
        }

        let chat_id = message.chat.id;
        let locale = self.locale_for(user.language_code.as_deref());

        if let Err(e) = self.handle_message(&message, user.id, &user.first_name, locale).await {
            warn!(
                error = %format!("{:#}", e),
                user_id = user.id,
                chat_id,
                "Handler failed"
            );
            metrics::counter!("photobot.handler.failures").increment(1);

            if let Err(e) = self
                .transport
                .send_text(chat_id, &messages::failure(locale))
                .await
            {
                warn!(error = %e, chat_id, "Failed to report failure to user");
            }
        }
    }

    async fn handle_message(
        &self,
        message: &Message,
        user_id: i64,
        first_name: &str,
        locale: Locale,
    ) -> Result<()> {
        let chat_id = message.chat.id;

        if !message.photo.is_empty() {
            return self.handle_photo(message, user_id, first_name, locale).await;
        }

        let Some(ref text) = message.text else {
            return Ok(());
        };

        match Command::parse(text) {
            Command::Start => self.reply(chat_id, &messages::start(locale)).await,
            Command::Help => self.send_help(chat_id, locale).await,
            Command::Search { query, mode } => {
                self.handle_search(chat_id, user_id, &query, mode, locale)
                    .await
            }
            Command::DeleteLastSearch => self.handle_delete(chat_id, user_id, locale).await,
            Command::Count => {
                let count = self.search.count_images(user_id).await?;
                self.reply(chat_id, &messages::image_count(locale, count))
                    .await
            }
            Command::Unknown(word) => {
                debug!(command = %word, "Unknown command");
                self.transport
                    .send_text_with_help(
                        chat_id,
                        &messages::unknown_command(locale),
                        messages::help_button(locale),
                    )
                    .await
                    .context("Failed to send reply")
            }
        }
    }

    async fn handle_callback(&self, callback: CallbackQuery) {
        if let Err(e) = self.transport.answer_callback(&callback.id).await {
            warn!(error = %e, "Failed to answer callback query");
        }

        if callback.data.as_deref() != Some(HELP_CALLBACK) {
            return;
        }

        let chat_id = callback
            .message
            .as_ref()
            .map(|m| m.chat.id)
            .unwrap_or(callback.from.id);
        let locale = self.locale_for(callback.from.language_code.as_deref());

        if let Err(e) = self.send_help(chat_id, locale).await {
            warn!(error = %e, chat_id, "Failed to send help");
        }
    }

    /// Upload path
    async fn handle_photo(
        &self,
        message: &Message,
        user_id: i64,
        first_name: &str,
        locale: Locale,
    ) -> Result<()> {
        let chat_id = message.chat.id;
        let photo = message
            .largest_photo()
            .context("Photo message without sizes")?;

        self.reply(chat_id, &messages::photo_received(locale, first_name))
            .await?;

        let image = self
            .transport
            .download_file(&photo.file_id)
            .await
            .context("Failed to download photo")?;

        let stored = self
            .ingestor
            .ingest(
                user_id,
                &photo.file_unique_id,
                image,
                message.caption.as_deref(),
            )
            .await?;

        self.reply(
            chat_id,
            &messages::photo_saved(locale, &stored.labels.to_string()),
        )
        .await?;

        self.batch.photo_stored(user_id, chat_id, locale);
        Ok(())
    }

    /// Query path
    async fn handle_search(
        &self,
        chat_id: i64,
        user_id: i64,
        query: &str,
        mode: SearchMode,
        locale: Locale,
    ) -> Result<()> {
        let outcome = match self.search.search(user_id, query, mode).await {
            Ok(outcome) => outcome,
            Err(SearchError::InvalidQuery(QueryError::Empty)) => {
                return self.reply(chat_id, &messages::search_usage(locale)).await;
            }
            Err(SearchError::Backend(e)) => return Err(e),
        };

        if outcome.is_empty() {
            let shown = query
                .trim()
                .trim_start_matches(self.settings.literal_marker.as_str())
                .trim();
            return self
                .transport
                .send_text_with_help(
                    chat_id,
                    &messages::not_found(locale, shown),
                    messages::help_button(locale),
                )
                .await
                .context("Failed to send reply");
        }

        if let Some(ref synonym) = outcome.synonym_used {
            self.reply(chat_id, &messages::synonym_used(locale, synonym))
                .await?;
        }

        let total = outcome.hits.len();
        if mode == SearchMode::All {
            self.reply(chat_id, &messages::found(locale, total)).await?;
            if total > self.settings.max_results_sent {
                self.reply(
                    chat_id,
                    &messages::results_truncated(locale, self.settings.max_results_sent),
                )
                .await?;
            }
        }

        for hit in outcome.hits.iter().take(self.settings.max_results_sent) {
            let image = self.search.image_bytes(&hit.key).await?;

            self.transport
                .send_photo(chat_id, image, hit.labels.to_string())
                .await
                .context("Failed to send photo")?;
        }

        info!(user_id, sent = total.min(self.settings.max_results_sent), "Search results sent");
        Ok(())
    }

    /// Delete path
    async fn handle_delete(&self, chat_id: i64, user_id: i64, locale: Locale) -> Result<()> {
        let deleted = self.search.delete_last_search(user_id).await?;

        let text = if deleted == 0 {
            messages::nothing_to_delete(locale)
        } else {
            messages::deleted(locale, deleted)
        };

        self.reply(chat_id, &text).await
    }

    async fn send_help(&self, chat_id: i64, locale: Locale) -> Result<()> {
        self.reply(
            chat_id,
            &messages::help(locale, &self.settings.literal_marker),
        )
        .await
    }

    async fn reply(&self, chat_id: i64, text: &str) -> Result<()> {
        self.transport
            .send_text(chat_id, text)
            .await
            .context("Failed to send reply")
    }
}
