//! The `poll` command: long-poll delivery for one bot.
//!
//! Webhook and poll delivery must never run at the same time for the same
//! bot, so the first thing this command does is deregister any existing
//! webhook. Only then does the poll session start.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use cg_telegram::{
    BotApi, PollSession, PollSummary, UpdateDispatcher, UpdateSource, token_fingerprint,
};

use crate::config::CoachGateConfig;
use crate::handlers;
use crate::registry::{BotDirectory, StaticBotDirectory};
use crate::server;

/// Webhook lifecycle access the poll command needs, behind a seam so the
/// delete-before-poll ordering is observable in tests.
#[async_trait]
trait WebhookControl: Send + Sync {
    async fn deregister_webhook(&self) -> cg_telegram::Result<()>;
}

#[async_trait]
impl WebhookControl for BotApi {
    async fn deregister_webhook(&self) -> cg_telegram::Result<()> {
        self.delete_webhook(false).await?;
        Ok(())
    }
}

pub async fn run(cfg: CoachGateConfig, bot_id: Option<i64>) -> anyhow::Result<()> {
    let directory: Arc<dyn BotDirectory> =
        Arc::new(StaticBotDirectory::new(cfg.bots.clone())?);
    let bot = directory.select(bot_id)?;
    info!(
        bot_id = bot.id,
        bot = %bot.name,
        token = %token_fingerprint(&bot.token),
        wait_seconds = cfg.poll.wait_seconds,
        retry_backoff_seconds = cfg.poll.retry_backoff_seconds,
        "long-poll delivery selected"
    );

    let api = Arc::new(BotApi::new(&bot.token).context("build bot api")?);
    let dispatcher = handlers::standard_router(&cfg, directory)?;

    let shutdown = CancellationToken::new();
    tokio::spawn(server::shutdown_signal(shutdown.clone()));

    let summary = deregister_and_run(
        bot.id,
        api,
        dispatcher,
        Duration::from_secs(cfg.poll.wait_seconds),
        Duration::from_secs(cfg.poll.retry_backoff_seconds),
        shutdown,
    )
    .await?;
    info!(
        batches = summary.batches,
        updates_dispatched = summary.updates_dispatched,
        dispatch_failures = summary.dispatch_failures,
        fetch_failures = summary.fetch_failures,
        final_offset = ?summary.final_offset,
        "poll command finished"
    );
    Ok(())
}

/// Deregister the bot's webhook, then run the poll session to completion.
///
/// Mutual exclusion with webhook delivery: getUpdates is refused while a
/// webhook is registered, and both at once would double-deliver anyway. A
/// failed deregistration aborts before any fetch.
async fn deregister_and_run<S>(
    bot_id: i64,
    transport: Arc<S>,
    dispatcher: Arc<dyn UpdateDispatcher>,
    wait: Duration,
    retry_backoff: Duration,
    shutdown: CancellationToken,
) -> anyhow::Result<PollSummary>
where
    S: UpdateSource + WebhookControl + 'static,
{
    transport
        .deregister_webhook()
        .await
        .context("deregister webhook before polling")?;
    info!(bot_id, "existing webhook deregistered");

    let session = PollSession::new(bot_id, transport, dispatcher)
        .with_wait(wait)
        .with_retry_backoff(retry_backoff);
    Ok(session.run(shutdown).await)
}
