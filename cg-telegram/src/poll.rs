//! Long-poll pull pipeline: fetch batches with `getUpdates`, dispatch them,
//! advance the offset cursor, and retry transport failures forever at a fixed
//! backoff. The session only ends through its cancellation token.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::BotApi;
use crate::dispatch::{DispatchOutcome, UpdateDispatcher};
use crate::error::Result;
use crate::types::Update;

pub const DEFAULT_WAIT: Duration = Duration::from_secs(30);
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Where a batch of updates comes from. Production uses [`BotApi`]; tests
/// script their own sources.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn fetch(&self, offset: Option<i64>, wait: Duration) -> Result<Vec<Update>>;
}

#[async_trait]
impl UpdateSource for BotApi {
    async fn fetch(&self, offset: Option<i64>, wait: Duration) -> Result<Vec<Update>> {
        self.get_updates(offset, wait).await
    }
}

/// Lifecycle of a poll session. `BackingOff` means the last fetch failed and
/// the session is sleeping before it retries with the same cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Running,
    BackingOff,
    Stopped,
}

impl PollState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::BackingOff => "backing_off",
            Self::Stopped => "stopped",
        }
    }
}

/// Counters reported when a session stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    /// Non-empty batches received.
    pub batches: u64,
    /// Updates handed to the dispatcher, including ones that failed there.
    pub updates_dispatched: u64,
    pub dispatch_failures: u64,
    pub fetch_failures: u64,
    /// Cursor at shutdown; `None` when no update was ever received.
    pub final_offset: Option<i64>,
}

/// One bot's long-poll loop.
///
/// The cursor is `max(update_id) + 1` over everything received so far and is
/// committed once per batch, after the whole batch was dispatched. Updates
/// inside a batch are dispatched in arrival order, exactly as the server sent
/// them. A batch where every dispatch fails still advances the cursor;
/// redelivery is not a retry mechanism.
pub struct PollSession {
    bot_id: i64,
    source: Arc<dyn UpdateSource>,
    dispatcher: Arc<dyn UpdateDispatcher>,
    wait: Duration,
    retry_backoff: Duration,
    offset: Option<i64>,
    state: PollState,
    consecutive_failures: u32,
    summary: PollSummary,
}

impl PollSession {
    pub fn new(
        bot_id: i64,
        source: Arc<dyn UpdateSource>,
        dispatcher: Arc<dyn UpdateDispatcher>,
    ) -> Self {
        Self {
            bot_id,
            source,
            dispatcher,
            wait: DEFAULT_WAIT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            offset: None,
            state: PollState::Stopped,
            consecutive_failures: 0,
            summary: PollSummary::default(),
        }
    }

    /// Server-side hold per `getUpdates` call.
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Fixed sleep between retries after a failed fetch.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn offset(&self) -> Option<i64> {
        self.offset
    }

    /// Run until `shutdown` fires. Fetch errors never end the loop; they put
    /// the session into `BackingOff` and it retries with the cursor it had.
    #[tracing::instrument(level = "info", skip_all, fields(bot_id = self.bot_id))]
    pub async fn run(mut self, shutdown: CancellationToken) -> PollSummary {
        self.state = PollState::Running;
        info!(
            wait = ?self.wait,
            retry_backoff = ?self.retry_backoff,
            "long-poll session started"
        );

        loop {
            let fetched = tokio::select! {
                _ = shutdown.cancelled() => break,
                fetched = self.source.fetch(self.offset, self.wait) => fetched,
            };

            match fetched {
                Ok(updates) => {
                    if self.state == PollState::BackingOff {
                        info!(
                            after_failures = self.consecutive_failures,
                            "getUpdates recovered"
                        );
                    }
                    self.state = PollState::Running;
                    self.consecutive_failures = 0;
                    if updates.is_empty() {
                        continue;
                    }
                    self.summary.batches += 1;
                    self.dispatch_batch(updates).await;
                }
                Err(error) => {
                    self.state = PollState::BackingOff;
                    self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                    self.summary.fetch_failures += 1;
                    warn!(
                        %error,
                        attempt = self.consecutive_failures,
                        delay = ?self.retry_backoff,
                        "getUpdates failed; backing off before retry"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.retry_backoff) => {}
                    }
                }
            }
        }

        self.state = PollState::Stopped;
        self.summary.final_offset = self.offset;
        info!(
            batches = self.summary.batches,
            updates_dispatched = self.summary.updates_dispatched,
            dispatch_failures = self.summary.dispatch_failures,
            fetch_failures = self.summary.fetch_failures,
            final_offset = ?self.summary.final_offset,
            "long-poll session stopped"
        );
        self.summary
    }

    async fn dispatch_batch(&mut self, updates: Vec<Update>) {
        // Compute the next cursor over the whole batch up front; dispatch
        // results must not influence it.
        let mut next_offset = self.offset;
        for update in &updates {
            let candidate = update.update_id.saturating_add(1);
            if next_offset.is_none_or(|current| candidate > current) {
                next_offset = Some(candidate);
            }
        }
        debug!(
            count = updates.len(),
            next_offset = ?next_offset,
            "dispatching update batch"
        );

        for update in updates {
            let update_id = update.update_id;
            let outcome = self.dispatcher.dispatch(self.bot_id, update).await;
            self.summary.updates_dispatched += 1;
            if outcome == DispatchOutcome::Failed {
                self.summary.dispatch_failures += 1;
                warn!(update_id, "update handling failed; continuing with batch");
            }
        }

        self.offset = next_offset;
    }
}
