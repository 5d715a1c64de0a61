//! Chat-completions provider for OpenAI and OpenAI-compatible endpoints.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AiError, Result};
use crate::provider::{AiProvider, AiRequest, AiResponse};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: &str, model: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(AiError::InvalidInput("api key is empty".into()));
        }
        if model.trim().is_empty() {
            return Err(AiError::InvalidInput("model is empty".into()));
        }
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            api_key: api_key.trim().to_string(),
            model: model.trim().to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Point at any OpenAI-compatible server (proxy, local runtime).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    fn provider_id(&self) -> &str {
        "openai"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn complete(&self, request: &AiRequest) -> Result<AiResponse> {
        let body = ChatCompletionsRequest::new(&self.model, request);

        let response = self
            .http
            .post(self.chat_completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(AiError::Provider(format!(
                "openai chat status={status} body={text}"
            )));
        }

        let parsed: ChatCompletionsResponse = serde_json::from_str(&text)?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                AiError::ResponseFormat("openai response had no message content".into())
            })?;

        Ok(AiResponse {
            content,
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
            prompt_tokens: parsed.usage.as_ref().and_then(|u| u.prompt_tokens),
            completion_tokens: parsed.usage.as_ref().and_then(|u| u.completion_tokens),
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
}

impl ChatCompletionsRequest {
    fn new(model: &str, request: &AiRequest) -> Self {
        let mut messages = Vec::with_capacity(2);
        if !request.system.trim().is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: MessageContent::Text(request.system.clone()),
            });
        }
        let content = match &request.image_url {
            Some(url) => MessageContent::Parts(vec![
                ContentPart::Text {
                    text: request.prompt.clone(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url: url.clone() },
                },
            ]),
            None => MessageContent::Text(request.prompt.clone()),
        };
        messages.push(ChatMessage {
            role: "user",
            content,
        });
        Self {
            model: model.to_string(),
            messages,
            response_format: ResponseFormat {
                r#type: "json_object",
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::{ChatCompletionsRequest, ChatCompletionsResponse, OpenAiProvider};
    use crate::error::AiError;
    use crate::provider::AiRequest;

    fn request(image_url: Option<&str>) -> AiRequest {
        AiRequest {
            system: "You are a nutrition analyst.".to_string(),
            prompt: "2 eggs and toast".to_string(),
            image_url: image_url.map(str::to_string),
        }
    }

    #[test]
    fn text_request_serializes_plain_content_and_json_mode() {
        let body = ChatCompletionsRequest::new("gpt-4o-mini", &request(None));
        let value = serde_json::to_value(&body).expect("serializes");

        assert_eq!(value["model"], "gpt-4o-mini");
        assert_eq!(value["response_format"]["type"], "json_object");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["role"], "user");
        assert_eq!(value["messages"][1]["content"], "2 eggs and toast");
    }

    #[test]
    fn vision_request_serializes_content_parts() {
        let body =
            ChatCompletionsRequest::new("gpt-4o", &request(Some("https://files.test/p.jpg")));
        let value = serde_json::to_value(&body).expect("serializes");

        let content = &value["messages"][1]["content"];
        assert!(content.is_array());
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[0]["text"], "2 eggs and toast");
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(content[1]["image_url"]["url"], "https://files.test/p.jpg");
    }

    #[test]
    fn empty_system_prompt_is_omitted() {
        let body = ChatCompletionsRequest::new(
            "gpt-4o-mini",
            &AiRequest {
                system: "  ".to_string(),
                prompt: "hi".to_string(),
                image_url: None,
            },
        );
        let value = serde_json::to_value(&body).expect("serializes");
        let messages = value["messages"].as_array().expect("messages array");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
    }

    #[test]
    fn response_decodes_content_and_usage() {
        let body = r#"{
            "model": "gpt-4o-mini-2024",
            "choices": [{"message": {"role": "assistant", "content": "{\"dish_name\":\"Toast\"}"}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 30}
        }"#;
        let parsed: ChatCompletionsResponse = serde_json::from_str(body).expect("decodes");
        assert_eq!(parsed.model.as_deref(), Some("gpt-4o-mini-2024"));
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("{\"dish_name\":\"Toast\"}")
        );
        let usage = parsed.usage.expect("usage present");
        assert_eq!(usage.prompt_tokens, Some(120));
        assert_eq!(usage.completion_tokens, Some(30));
    }

    #[test]
    fn response_tolerates_missing_optional_fields() {
        let parsed: ChatCompletionsResponse =
            serde_json::from_str(r#"{"choices": []}"#).expect("decodes");
        assert!(parsed.choices.is_empty());
        assert!(parsed.model.is_none());
        assert!(parsed.usage.is_none());
    }

    #[test]
    fn construction_rejects_blank_credentials() {
        let err = OpenAiProvider::new(" ", "gpt-4o-mini").expect_err("blank key");
        assert!(matches!(err, AiError::InvalidInput(_)));
        let err = OpenAiProvider::new("sk-test", "").expect_err("blank model");
        assert!(matches!(err, AiError::InvalidInput(_)));
    }

    #[test]
    fn base_url_override_builds_the_endpoint() {
        let provider = OpenAiProvider::new("sk-test", "gpt-4o-mini")
            .expect("provider builds")
            .with_base_url("http://127.0.0.1:9090/v1/");
        assert_eq!(
            provider.chat_completions_url(),
            "http://127.0.0.1:9090/v1/chat/completions"
        );
    }
}
