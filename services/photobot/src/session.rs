//! Per-user scratch state: the last search result and the upload batch.
//!
//! Sessions live in memory for the lifetime of the process and are evicted
//! after an idle TTL. A session with a pending batch summary is never
//! evicted, otherwise the summary job would lose its counter.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::task::AbortHandle;
use tracing::debug;

/// Telegram user identifier
pub type UserId = i64;

/// Upload batch bookkeeping for one user
#[derive(Debug, Default)]
pub struct UploadBatch {
    /// Photos received since the last summary
    pub count: u32,
    /// Incremented on every upload; a summary job only fires for the latest
    pub generation: u64,
    /// When the first photo of the batch arrived
    pub started_at: Option<DateTime<Utc>>,
    pending: Option<AbortHandle>,
}

#[derive(Debug)]
struct UserSession {
    last_search: Vec<String>,
    batch: UploadBatch,
    last_seen: Instant,
}

impl UserSession {
    fn new() -> Self {
        Self {
            last_search: Vec::new(),
            batch: UploadBatch::default(),
            last_seen: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_seen = Instant::now();
    }
}

/// Ticket returned when an upload joins a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchTicket {
    pub generation: u64,
    pub count: u32,
}

/// A finished batch, reported by the summary job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub count: u32,
    pub started_at: Option<DateTime<Utc>>,
}

/// Explicit store for per-user session state
pub struct SessionStore {
    sessions: RwLock<HashMap<UserId, UserSession>>,
    idle_ttl: Duration,
}

impl SessionStore {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_ttl,
        }
    }

    /// Replace the user's last search result
    pub fn record_last_search(&self, user_id: UserId, keys: Vec<String>) {
        let mut sessions = self.sessions.write();
        let session = sessions.entry(user_id).or_insert_with(UserSession::new);
        session.last_search = keys;
        session.touch();
    }

    /// The user's last search result
    pub fn last_search(&self, user_id: UserId) -> Vec<String> {
        self.sessions
            .read()
            .get(&user_id)
            .map(|s| s.last_search.clone())
            .unwrap_or_default()
    }

    /// Remove and return the user's last search result
    pub fn take_last_search(&self, user_id: UserId) -> Vec<String> {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(&user_id) {
            Some(session) => {
                session.touch();
                std::mem::take(&mut session.last_search)
            }
            None => Vec::new(),
        }
    }

    /// Register an upload: bump the batch counter and generation, and abort
    /// the previously pending summary job.
    pub fn begin_upload(&self, user_id: UserId) -> BatchTicket {
        let mut sessions = self.sessions.write();
        let session = sessions.entry(user_id).or_insert_with(UserSession::new);
        session.touch();

        let batch = &mut session.batch;
        if let Some(pending) = batch.pending.take() {
            pending.abort();
        }
        if batch.count == 0 {
            batch.started_at = Some(Utc::now());
        }
        batch.count += 1;
        batch.generation += 1;

        BatchTicket {
            generation: batch.generation,
            count: batch.count,
        }
    }

    /// Attach the summary job for `generation`. If a newer upload already
    /// arrived the job is stale and is aborted right away.
    pub fn set_pending(&self, user_id: UserId, generation: u64, handle: AbortHandle) {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(&user_id) {
            Some(session) if session.batch.generation == generation => {
                session.batch.pending = Some(handle);
            }
            _ => handle.abort(),
        }
    }

    /// Close the batch if `generation` is still the latest one
    pub fn finish_batch(&self, user_id: UserId, generation: u64) -> Option<BatchSummary> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(&user_id)?;
        let batch = &mut session.batch;

        if batch.generation != generation || batch.count == 0 {
            return None;
        }

        let summary = BatchSummary {
            count: batch.count,
            started_at: batch.started_at.take(),
        };
        batch.count = 0;
        batch.pending = None;

        Some(summary)
    }

    /// Photos received in the user's current batch
    pub fn batch_count(&self, user_id: UserId) -> u32 {
        self.sessions
            .read()
            .get(&user_id)
            .map(|s| s.batch.count)
            .unwrap_or(0)
    }

    /// Evict sessions idle for longer than the TTL, returns how many
    pub fn evict_idle(&self) -> usize {
        self.evict_idle_at(Instant::now())
    }

    fn evict_idle_at(&self, now: Instant) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();

        sessions.retain(|_, session| {
            session.batch.pending.is_some()
                || now.saturating_duration_since(session.last_seen) < self.idle_ttl
        });

        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, remaining = sessions.len(), "Evicted idle sessions");
        }
        evicted
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
