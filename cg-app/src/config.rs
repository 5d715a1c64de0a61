//! CoachGate configuration loader.
//!
//! TOML file, then environment overrides, then a validation pass. Whether a
//! command actually has the bots or credentials it needs is resolved at
//! command time, not here.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

use crate::registry::BotRegistration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoachGateConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub bots: Vec<BotRegistration>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub http_max_in_flight: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_http_max_in_flight() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            http_timeout_seconds: default_http_timeout_seconds(),
            http_max_in_flight: default_http_max_in_flight(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookConfig {
    /// Public base URL webhooks are registered under; each bot gets
    /// `{base_url}/webhook/{bot_id}`.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Shared secret Telegram echoes back in the secret-token header. Absent
    /// means the endpoint runs in open mode.
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    /// Server-side hold per `getUpdates` call, in seconds.
    #[serde(default = "default_poll_wait_seconds")]
    pub wait_seconds: u64,
    /// Fixed sleep between retries after a failed fetch, in seconds.
    #[serde(default = "default_poll_retry_backoff_seconds")]
    pub retry_backoff_seconds: u64,
}

fn default_poll_wait_seconds() -> u64 {
    30
}

fn default_poll_retry_backoff_seconds() -> u64 {
    5
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            wait_seconds: default_poll_wait_seconds(),
            retry_backoff_seconds: default_poll_retry_backoff_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    /// Override for OpenAI-compatible proxies and local runtimes.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Consecutive parse failures before the failure tracker escalates.
    #[serde(default = "default_parse_failure_alert_threshold")]
    pub parse_failure_alert_threshold: u32,
    #[serde(default = "default_max_ingredients")]
    pub max_ingredients: usize,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_parse_failure_alert_threshold() -> u32 {
    5
}

fn default_max_ingredients() -> usize {
    50
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: default_model(),
            parse_failure_alert_threshold: default_parse_failure_alert_threshold(),
            max_ingredients: default_max_ingredients(),
        }
    }
}

impl CoachGateConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = path.unwrap_or_else(default_config_path);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;
        Self::from_toml_str(&contents)
            .map_err(|e| anyhow::anyhow!("config {}: {e}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let mut cfg: CoachGateConfig =
            toml::from_str(contents).map_err(|e| anyhow::anyhow!("parse failed: {e}"))?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("COACHGATE_BIND_ADDR") {
            if !v.trim().is_empty() {
                self.server.bind_addr = v;
            }
        }
        if let Ok(v) = std::env::var("COACHGATE_WEBHOOK_BASE_URL") {
            if !v.trim().is_empty() {
                self.webhook.base_url = Some(v);
            }
        }
        if let Ok(v) = std::env::var("COACHGATE_WEBHOOK_SECRET") {
            if !v.trim().is_empty() {
                self.webhook.secret = Some(v);
            }
        }
        if let Ok(v) = std::env::var("COACHGATE_AI_API_KEY") {
            if !v.trim().is_empty() {
                self.ai.api_key = Some(v);
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.server.bind_addr.parse::<SocketAddr>().is_err() {
            return Err(anyhow::anyhow!(
                "server.bind_addr {:?} is not a socket address",
                self.server.bind_addr
            ));
        }
        if self.server.http_max_in_flight == 0 {
            return Err(anyhow::anyhow!("server.http_max_in_flight must be > 0"));
        }
        if self.ai.model.trim().is_empty() {
            return Err(anyhow::anyhow!("ai.model is required"));
        }
        if self.ai.max_ingredients == 0 {
            return Err(anyhow::anyhow!("ai.max_ingredients must be > 0"));
        }
        if self.poll.wait_seconds == 0 {
            return Err(anyhow::anyhow!("poll.wait_seconds must be > 0"));
        }
        if self.poll.retry_backoff_seconds == 0 {
            return Err(anyhow::anyhow!("poll.retry_backoff_seconds must be > 0"));
        }
        if let Some(base_url) = self.webhook.base_url.as_deref() {
            // Telegram only delivers webhooks to https endpoints.
            if !base_url.trim().starts_with("https://") {
                return Err(anyhow::anyhow!(
                    "webhook.base_url must start with https://, got {base_url:?}"
                ));
            }
        }
        Ok(())
    }
}

pub fn default_config_path() -> PathBuf {
    match std::env::var("COACHGATE_CONFIG") {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => PathBuf::from("coachgate.toml"),
    }
}
