//! CoachGate HTTP server: webhook ingestion plus the health probe.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use cg_telegram::UpdateDispatcher;

use crate::config::CoachGateConfig;
use crate::handlers;
use crate::registry::{BotDirectory, StaticBotDirectory};
use crate::routes::{self, AppState};
use crate::secret::SecretPolicy;

pub async fn serve(cfg: CoachGateConfig) -> Result<()> {
    let started_at = Instant::now();
    let addr: SocketAddr = cfg
        .server
        .bind_addr
        .parse()
        .with_context(|| format!("parse bind addr {:?}", cfg.server.bind_addr))?;

    let directory: Arc<dyn BotDirectory> =
        Arc::new(StaticBotDirectory::new(cfg.bots.clone())?);
    let secret = Arc::new(SecretPolicy::new(cfg.webhook.secret.clone()));
    tracing::info!(
        bind_addr = %addr,
        http_timeout_seconds = cfg.server.http_timeout_seconds,
        http_max_in_flight = cfg.server.http_max_in_flight,
        bots_registered = directory.all().len(),
        bots_active = directory.active().len(),
        model = %cfg.ai.model,
        webhook_base_url = ?cfg.webhook.base_url,
        "server configuration loaded"
    );
    if secret.is_open() {
        tracing::warn!(
            "webhook.secret is not configured; the webhook endpoint accepts unauthenticated calls"
        );
    }

    let listener = preflight_bind_listener(addr).await?;
    let dispatcher: Arc<dyn UpdateDispatcher> = handlers::standard_router(&cfg, directory.clone())?;

    let state = AppState {
        dispatcher,
        secret,
        directory,
        started_at,
    };

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let app = routes::router(state)
        .layer(GlobalConcurrencyLimitLayer::new(cfg.server.http_max_in_flight))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(cfg.server.http_timeout_seconds),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    let shutdown = CancellationToken::new();
    tracing::info!(%addr, "coachgate serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;
    tracing::info!("http server shutdown completed");
    Ok(())
}

/// Validate the config and report what a `serve` or `poll` run would use.
pub async fn doctor(cfg: CoachGateConfig) -> Result<()> {
    let directory = StaticBotDirectory::new(cfg.bots.clone())?;
    let default_bot = match directory.select(None) {
        Ok(bot) => format!("{} ({})", bot.id, bot.name),
        Err(error) => format!("none ({error})"),
    };
    tracing::info!(
        bind_addr = %cfg.server.bind_addr,
        bots_registered = directory.all().len(),
        bots_active = directory.active().len(),
        default_poll_bot = %default_bot,
        model = %cfg.ai.model,
        ai_api_key_configured = cfg.ai.api_key.as_deref().is_some_and(|k| !k.trim().is_empty()),
        webhook_base_url = ?cfg.webhook.base_url,
        webhook_secret_configured = cfg.webhook.secret.is_some(),
        "config ok"
    );
    Ok(())
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    tracing::info!(%addr, "preflight bind check starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("preflight bind failed for {addr}: {e}"))?;
    tracing::info!(%addr, "preflight bind check passed");
    Ok(listener)
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

pub(crate) async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to await ctrl-c signal");
        } else {
            tracing::warn!("received ctrl-c; beginning graceful shutdown");
        }
    }
    shutdown.cancel();
}
