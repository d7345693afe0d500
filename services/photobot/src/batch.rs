use crate::messages::{self, Locale};
use crate::session::{SessionStore, UserId};
use crate::telegram::ChatTransport;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Sends one "N photos saved" confirmation after a quiet period.
///
/// Every upload aborts the pending job and schedules a new one; the job only
/// reports if its batch generation is still the latest when it fires.
pub struct BatchNotifier {
    sessions: Arc<SessionStore>,
    transport: Arc<dyn ChatTransport>,
    window: Duration,
}

impl BatchNotifier {
    pub fn new(
        sessions: Arc<SessionStore>,
        transport: Arc<dyn ChatTransport>,
        window: Duration,
    ) -> Self {
        Self {
            sessions,
            transport,
            window,
        }
    }

    /// Register a stored photo and (re)schedule the summary
    pub fn photo_stored(&self, user_id: UserId, chat_id: i64, locale: Locale) {
        let ticket = self.sessions.begin_upload(user_id);

        debug!(
            user_id,
            generation = ticket.generation,
            count = ticket.count,
            "Batch summary rescheduled"
        );

        let sessions = self.sessions.clone();
        let transport = self.transport.clone();
        let window = self.window;

        let job = tokio::spawn(async move {
            tokio::time::sleep(window).await;

            let Some(summary) = sessions.finish_batch(user_id, ticket.generation) else {
                return;
            };

            let text = messages::batch_summary(locale, summary.count);
            if let Err(e) = transport.send_text(chat_id, &text).await {
                warn!(error = %e, user_id, "Failed to send batch summary");
            }
        });

        self.sessions
            .set_pending(user_id, ticket.generation, job.abort_handle());
    }
}
