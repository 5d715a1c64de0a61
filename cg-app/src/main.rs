//! CoachGate main binary: Telegram update delivery and AI response
//! validation for the coaching platform.

mod config;
mod dispatch;
mod handlers;
mod poll_runner;
mod registry;
mod routes;
mod secret;
mod server;
mod webhook_ops;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Parser)]
#[command(name = "coachgate", version, about = "Telegram bot gateway for the coaching platform")]
struct Cli {
    /// Config file path (default: $COACHGATE_CONFIG or ./coachgate.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the webhook endpoint and health probe (default).
    Serve,
    /// Run long-poll delivery for one bot.
    Poll {
        /// Bot id to poll; default is the active bot with the lowest id.
        #[arg(long)]
        bot: Option<i64>,
    },
    /// Webhook registration admin operations, one report per bot.
    Webhook {
        /// Bot API server override (local bot API server); default is
        /// api.telegram.org.
        #[arg(long)]
        api_base: Option<String>,
        #[command(subcommand)]
        op: WebhookCommand,
    },
    /// Validate config and report what serve/poll would use.
    Doctor,
}

#[derive(Debug, Subcommand)]
enum WebhookCommand {
    /// Register `{base_url}/webhook/{bot_id}` for every active bot.
    Set,
    /// Report current webhook registration per active bot.
    Status,
    /// Remove the webhook registration of every active bot.
    Delete,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;
    install_panic_hook();

    let cli = Cli::parse();
    let cfg = config::CoachGateConfig::load(cli.config).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => server::serve(cfg).await,
        Command::Poll { bot } => poll_runner::run(cfg, bot).await,
        Command::Webhook { api_base, op } => run_webhook_op(cfg, op, api_base.as_deref()).await,
        Command::Doctor => server::doctor(cfg).await,
    }
}

async fn run_webhook_op(
    cfg: config::CoachGateConfig,
    op: WebhookCommand,
    api_base: Option<&str>,
) -> anyhow::Result<()> {
    let directory = registry::StaticBotDirectory::new(cfg.bots.clone())?;
    let reports = match op {
        WebhookCommand::Set => {
            let base_url = cfg
                .webhook
                .base_url
                .as_deref()
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .context("webhook.base_url is required for `webhook set`")?;
            webhook_ops::register_all(&directory, api_base, base_url, cfg.webhook.secret.as_deref())
                .await?
        }
        WebhookCommand::Status => webhook_ops::status_all(&directory, api_base).await?,
        WebhookCommand::Delete => webhook_ops::drop_all(&directory, api_base).await?,
    };
    for report in &reports {
        println!(
            "bot {} ({}, token {}): {}",
            report.bot_id, report.bot_name, report.token_fingerprint, report.outcome
        );
    }
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(v) => v,
        Err(_) => EnvFilter::new("info,coachgate=debug,cg_app=debug,cg_telegram=debug,cg_ai=debug,tower_http=info"),
    };
    let log_format = std::env::var("COACHGATE_LOG_FORMAT")
        .unwrap_or_else(|_| "json".to_string())
        .to_ascii_lowercase();

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(true)
                .init();
        }
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .pretty()
                .init();
        }
        "compact" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .compact()
                .init();
        }
        other => {
            return Err(anyhow::anyhow!(
                "unsupported COACHGATE_LOG_FORMAT={other:?}; expected one of: json, pretty, compact"
            ));
        }
    }

    tracing::info!(
        log_format = %log_format,
        env_filter = ?std::env::var("RUST_LOG").ok(),
        "tracing initialized"
    );
    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_payload_to_string(panic_info.payload());
        tracing::error!(
            panic_location = %location,
            panic_payload = %payload,
            "panic captured"
        );
        default_hook(panic_info);
    }));
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return msg.to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}
