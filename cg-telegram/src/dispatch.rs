//! Seam between update delivery (webhook or long poll) and update handling.

use async_trait::async_trait;

use crate::types::Update;

/// What routing did with a single update.
///
/// Delivery loops only count these; they never abort on `Failed`. One bad
/// update must not take down the batch or the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler ran to completion.
    Handled,
    /// The update was already processed and was dropped by de-duplication.
    Duplicate,
    /// No handler applies (unknown kind, unknown or inactive bot).
    Skipped,
    /// A handler ran and failed; the error was logged with update context.
    Failed,
}

/// Routes one decoded update for one bot.
///
/// Implementations must be idempotent per `(bot_id, update_id)`: both
/// delivery paths can redeliver, and webhook plus polling must never double
/// apply the same update.
#[async_trait]
pub trait UpdateDispatcher: Send + Sync {
    async fn dispatch(&self, bot_id: i64, update: Update) -> DispatchOutcome;
}
