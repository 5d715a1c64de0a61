//! Telegram Bot API transport for CoachGate.
//!
//! Pure HTTP client plus the two update delivery pipelines: webhook push
//! (callers decode one update per request) and long-poll pull
//! ([`PollSession`]). Update handling itself lives behind the
//! [`UpdateDispatcher`] seam; this crate never interprets message content.

mod api;
mod dispatch;
mod error;
mod poll;
mod types;

pub use api::{BotApi, token_fingerprint};
pub use dispatch::{DispatchOutcome, UpdateDispatcher};
pub use error::{Result, TelegramError};
pub use poll::{
    DEFAULT_RETRY_BACKOFF, DEFAULT_WAIT, PollSession, PollState, PollSummary, UpdateSource,
};
pub use types::{
    CallbackQuery, Chat, FileInfo, Message, PhotoSize, Update, UpdateKind, User, Voice,
    WebhookInfo,
};
