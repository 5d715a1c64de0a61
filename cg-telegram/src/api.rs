//! Thin per-bot client for the Bot API methods the pipeline needs.
//!
//! Every call goes through the same `{api_base}/bot{token}/{method}` envelope:
//! `ok == true` unwraps the `result` payload, `ok == false` becomes a typed
//! [`TelegramError::Api`] carrying the server's description. Transport and
//! decode problems map to [`TelegramError::Http`] and
//! [`TelegramError::ResponseFormat`] so callers can retry uniformly.

use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

use crate::error::{Result, TelegramError};
use crate::types::{FileInfo, Message, Update, WebhookInfo};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// Extra client-side budget on top of the server-side long-poll wait, so the
/// request deadline always lands after the server has had its full window.
const LONG_POLL_GRACE: Duration = Duration::from_secs(5);
const ALLOWED_UPDATES: &str = r#"["message","edited_message","callback_query"]"#;

#[derive(Clone, Debug)]
pub struct BotApi {
    http: reqwest::Client,
    token: String,
    api_base: String,
}

impl BotApi {
    pub fn new(token: &str) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Self::from_client(token, http)
    }

    /// Build over a caller-owned client. The cheap path when one process
    /// serves many bots: one client pool, one `BotApi` per token.
    pub fn from_client(token: &str, http: reqwest::Client) -> Result<Self> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TelegramError::InvalidInput("bot token is empty".into()));
        }
        Ok(Self {
            http,
            token: token.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
        })
    }

    /// Share a pre-built client instead of the per-instance default.
    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Point at a non-default API server (local bot API, test double).
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// Loggable stand-in for the token. Never log the token itself.
    pub fn token_fingerprint(&self) -> String {
        token_fingerprint(&self.token)
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// Download URL for a `file_path` obtained via [`BotApi::get_file`].
    pub fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{}", self.api_base, self.token, file_path)
    }

    /// One long-poll fetch. `wait` is the server-side hold; the request's own
    /// timeout is `wait` plus [`LONG_POLL_GRACE`] so the server always closes
    /// the window first.
    pub async fn get_updates(&self, offset: Option<i64>, wait: Duration) -> Result<Vec<Update>> {
        let mut query = vec![
            ("timeout", wait.as_secs().to_string()),
            ("allowed_updates", ALLOWED_UPDATES.to_string()),
        ];
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }
        let response = self
            .http
            .get(self.method_url("getUpdates"))
            .timeout(wait + LONG_POLL_GRACE)
            .query(&query)
            .send()
            .await?;
        self.decode("getUpdates", response).await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to_message_id: Option<i64>,
    ) -> Result<Message> {
        // Reply text is built from HTML-escaped fields; HTML parse mode
        // renders the entities instead of showing them literally.
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });
        if let Some(message_id) = reply_to_message_id {
            body["reply_to_message_id"] = serde_json::json!(message_id);
        }
        let response = self
            .http
            .post(self.method_url("sendMessage"))
            .json(&body)
            .send()
            .await?;
        self.decode("sendMessage", response).await
    }

    pub async fn set_webhook(&self, url: &str, secret_token: Option<&str>) -> Result<bool> {
        let mut body = serde_json::json!({
            "url": url,
            "allowed_updates": ["message", "edited_message", "callback_query"],
        });
        if let Some(secret) = secret_token {
            body["secret_token"] = serde_json::json!(secret);
        }
        let response = self
            .http
            .post(self.method_url("setWebhook"))
            .json(&body)
            .send()
            .await?;
        self.decode("setWebhook", response).await
    }

    pub async fn delete_webhook(&self, drop_pending_updates: bool) -> Result<bool> {
        let body = serde_json::json!({ "drop_pending_updates": drop_pending_updates });
        let response = self
            .http
            .post(self.method_url("deleteWebhook"))
            .json(&body)
            .send()
            .await?;
        self.decode("deleteWebhook", response).await
    }

    pub async fn get_webhook_info(&self) -> Result<WebhookInfo> {
        let response = self
            .http
            .get(self.method_url("getWebhookInfo"))
            .send()
            .await?;
        self.decode("getWebhookInfo", response).await
    }

    pub async fn get_file(&self, file_id: &str) -> Result<FileInfo> {
        let response = self
            .http
            .get(self.method_url("getFile"))
            .query(&[("file_id", file_id)])
            .send()
            .await?;
        self.decode("getFile", response).await
    }

    async fn decode<T: DeserializeOwned>(
        &self,
        method: &'static str,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status().as_u16();
        let body = response.text().await?;
        decode_envelope(method, status, &body)
    }
}

/// Unwrap the standard Bot API response envelope.
///
/// The API reports failures both through HTTP status and through
/// `ok == false` in the body; the body is authoritative, so the status only
/// shows up in error text when the body itself is unusable.
fn decode_envelope<T: DeserializeOwned>(method: &str, status: u16, body: &str) -> Result<T> {
    let envelope: ApiEnvelope<T> = serde_json::from_str(body).map_err(|error| {
        TelegramError::ResponseFormat(format!(
            "{method} returned undecodable body (status {status}): {error}"
        ))
    })?;
    if !envelope.ok {
        return Err(TelegramError::Api {
            error_code: envelope.error_code,
            description: envelope
                .description
                .unwrap_or_else(|| format!("{method} failed with status {status}")),
        });
    }
    envelope.result.ok_or_else(|| {
        TelegramError::ResponseFormat(format!("{method} succeeded without a result payload"))
    })
}

/// First four SHA-256 bytes of the token as lowercase hex. Stable per token,
/// safe to log and show in operator reports.
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.trim().as_bytes());
    to_lower_hex(&digest[..4])
}

fn to_lower_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: serde::Deserialize<'de>"))]
struct ApiEnvelope<T> {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::{BotApi, TelegramError, decode_envelope, token_fingerprint};
    use crate::types::{Update, WebhookInfo};

    #[test]
    fn envelope_unwraps_ok_result() {
        let body = r#"{"ok":true,"result":[{"update_id":5}]}"#;
        let updates: Vec<Update> = decode_envelope("getUpdates", 200, body).expect("decodes");
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].update_id, 5);
    }

    #[test]
    fn envelope_failure_carries_code_and_description() {
        let body = r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#;
        let err = decode_envelope::<Vec<Update>>("getUpdates", 401, body)
            .expect_err("ok=false must fail");
        match err {
            TelegramError::Api {
                error_code,
                description,
            } => {
                assert_eq!(error_code, Some(401));
                assert_eq!(description, "Unauthorized");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn envelope_failure_without_description_falls_back_to_status() {
        let body = r#"{"ok":false}"#;
        let err =
            decode_envelope::<bool>("setWebhook", 502, body).expect_err("ok=false must fail");
        match err {
            TelegramError::Api { description, .. } => {
                assert_eq!(description, "setWebhook failed with status 502");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn envelope_ok_without_result_is_a_format_error() {
        let body = r#"{"ok":true}"#;
        let err = decode_envelope::<WebhookInfo>("getWebhookInfo", 200, body)
            .expect_err("missing result must fail");
        assert!(matches!(err, TelegramError::ResponseFormat(_)));
    }

    #[test]
    fn envelope_rejects_non_json_bodies() {
        let err = decode_envelope::<bool>("deleteWebhook", 502, "<html>bad gateway</html>")
            .expect_err("html must fail");
        match err {
            TelegramError::ResponseFormat(message) => {
                assert!(message.contains("status 502"), "got: {message}");
            }
            other => panic!("expected ResponseFormat error, got {other:?}"),
        }
    }

    #[test]
    fn token_fingerprint_is_short_stable_hex() {
        let a = token_fingerprint("123456:ABC-secret");
        let b = token_fingerprint("123456:ABC-secret");
        let c = token_fingerprint("999999:other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn api_urls_embed_token_and_trim_base_slash() {
        let api = BotApi::new("123:token")
            .expect("client builds")
            .with_api_base("http://127.0.0.1:8081/");
        assert_eq!(
            api.file_url("photos/file_1.jpg"),
            "http://127.0.0.1:8081/file/bot123:token/photos/file_1.jpg"
        );
        assert_eq!(api.token_fingerprint().len(), 8);
    }

    #[test]
    fn empty_token_is_rejected() {
        let err = BotApi::new("   ").expect_err("blank token must fail");
        assert!(matches!(err, TelegramError::InvalidInput(_)));
    }

    #[test]
    fn from_client_validates_token_and_defaults_the_api_base() {
        let http = reqwest::Client::new();
        let err =
            BotApi::from_client("   ", http.clone()).expect_err("blank token must fail");
        assert!(matches!(err, TelegramError::InvalidInput(_)));

        let api = BotApi::from_client("123:token", http).expect("client builds");
        assert_eq!(
            api.file_url("photos/file_1.jpg"),
            "https://api.telegram.org/file/bot123:token/photos/file_1.jpg"
        );
    }
}
