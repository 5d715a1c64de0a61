//! Seam between update handlers and AI backends.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

/// One completion request. A present `image_url` switches vision-capable
/// providers into their multimodal request shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AiRequest {
    pub system: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AiResponse {
    /// Raw model text, pre-sanitization. Callers must validate before use.
    pub content: String,
    /// Model the backend reports having used; falls back to the configured id.
    pub model: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Stable identifier stored on interaction records ("openai", ...).
    fn provider_id(&self) -> &str;

    /// Configured model identifier.
    fn model_id(&self) -> &str;

    async fn complete(&self, request: &AiRequest) -> Result<AiResponse>;
}
