//! Webhook administration: register, inspect, and remove webhook
//! registrations against the Bot API control plane.
//!
//! Bots are processed independently and concurrently; one bot's failure is
//! its own report line, never an aborted run. All three operations are
//! idempotent on the Telegram side.

use std::fmt;

use anyhow::bail;
use futures_util::future::join_all;
use tracing::{info, warn};

use cg_telegram::{BotApi, token_fingerprint};

use crate::registry::{BotDirectory, BotRegistration};

#[derive(Debug, Clone)]
pub struct WebhookOpReport {
    pub bot_id: i64,
    pub bot_name: String,
    /// Log-safe token stand-in, never the token itself.
    pub token_fingerprint: String,
    pub outcome: WebhookOpOutcome,
}

#[derive(Debug, Clone)]
pub enum WebhookOpOutcome {
    Registered {
        url: String,
    },
    Status {
        url: String,
        pending_update_count: i64,
        last_error: Option<String>,
    },
    Deleted,
    Failed {
        error: String,
    },
}

impl fmt::Display for WebhookOpOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registered { url } => write!(f, "registered {url}"),
            Self::Status {
                url,
                pending_update_count,
                last_error,
            } => {
                let url = if url.is_empty() { "(no webhook)" } else { url };
                write!(f, "{url}, {pending_update_count} pending")?;
                if let Some(last_error) = last_error {
                    write!(f, ", last error: {last_error}")?;
                }
                Ok(())
            }
            Self::Deleted => write!(f, "webhook deleted"),
            Self::Failed { error } => write!(f, "failed: {error}"),
        }
    }
}

/// `setWebhook` for every active bot, pointing each at
/// `{base_url}/webhook/{bot_id}`. `api_base` overrides the production Bot
/// API server (local bot API, test double).
pub async fn register_all(
    directory: &dyn BotDirectory,
    api_base: Option<&str>,
    base_url: &str,
    secret: Option<&str>,
) -> anyhow::Result<Vec<WebhookOpReport>> {
    let base_url = base_url.trim();
    if base_url.is_empty() {
        bail!("webhook base url is empty");
    }
    per_active_bot(directory, |bot| {
        let url = webhook_url(base_url, bot.id);
        let secret = secret.map(str::to_string);
        async move {
            let api = bot_api(&bot.token, api_base)?;
            api.set_webhook(&url, secret.as_deref()).await?;
            Ok(WebhookOpOutcome::Registered { url })
        }
    })
    .await
}

/// `getWebhookInfo` for every active bot.
pub async fn status_all(
    directory: &dyn BotDirectory,
    api_base: Option<&str>,
) -> anyhow::Result<Vec<WebhookOpReport>> {
    per_active_bot(directory, |bot| async move {
        let api = bot_api(&bot.token, api_base)?;
        let info = api.get_webhook_info().await?;
        Ok(WebhookOpOutcome::Status {
            url: info.url,
            pending_update_count: info.pending_update_count,
            last_error: info.last_error_message,
        })
    })
    .await
}

/// `deleteWebhook` for every active bot.
pub async fn drop_all(
    directory: &dyn BotDirectory,
    api_base: Option<&str>,
) -> anyhow::Result<Vec<WebhookOpReport>> {
    per_active_bot(directory, |bot| async move {
        let api = bot_api(&bot.token, api_base)?;
        api.delete_webhook(false).await?;
        Ok(WebhookOpOutcome::Deleted)
    })
    .await
}

fn bot_api(token: &str, api_base: Option<&str>) -> cg_telegram::Result<BotApi> {
    let api = BotApi::new(token)?;
    Ok(match api_base {
        Some(base) => api.with_api_base(base),
        None => api,
    })
}

async fn per_active_bot<F, Fut>(
    directory: &dyn BotDirectory,
    op: F,
) -> anyhow::Result<Vec<WebhookOpReport>>
where
    F: Fn(BotRegistration) -> Fut,
    Fut: Future<Output = cg_telegram::Result<WebhookOpOutcome>>,
{
    let bots = directory.active();
    if bots.is_empty() {
        bail!("no active bot registration; add one under [[bots]]");
    }

    let results = join_all(bots.iter().cloned().map(&op)).await;
    let reports = bots
        .into_iter()
        .zip(results)
        .map(|(bot, result)| {
            let fingerprint = token_fingerprint(&bot.token);
            let outcome = match result {
                Ok(outcome) => {
                    info!(
                        bot_id = bot.id,
                        bot = %bot.name,
                        token = %fingerprint,
                        outcome = %outcome,
                        "webhook operation succeeded"
                    );
                    outcome
                }
                Err(error) => {
                    warn!(
                        bot_id = bot.id,
                        bot = %bot.name,
                        token = %fingerprint,
                        %error,
                        "webhook operation failed"
                    );
                    WebhookOpOutcome::Failed {
                        error: error.to_string(),
                    }
                }
            };
            WebhookOpReport {
                bot_id: bot.id,
                bot_name: bot.name,
                token_fingerprint: fingerprint,
                outcome,
            }
        })
        .collect();
    Ok(reports)
}

fn webhook_url(base_url: &str, bot_id: i64) -> String {
    format!("{}/webhook/{bot_id}", base_url.trim_end_matches('/'))
}
