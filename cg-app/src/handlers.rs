//! Per-update-kind handlers and the seams they run behind.
//!
//! A handler may return an error; the router logs it with update context and
//! keeps going. Nothing a handler does can take down a delivery path.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use cg_ai::{
    AiProvider, AiRequest, InteractionKind, InteractionRecord, InteractionSink,
    MemoryInteractionLog, OpenAiProvider, ParseFailureTracker, ResponseSchema, SanitizeLimits,
    ValidatedResponse, sanitize_response, truncate_chars,
};
use cg_telegram::{BotApi, Update, UpdateKind};

use crate::config::CoachGateConfig;
use crate::dispatch::UpdateRouter;
use crate::registry::{BotDirectory, BotRegistration};

/// Client text fed into a prompt is capped to bound request size.
const MAX_INPUT_CHARS: usize = 2000;
const INTERACTION_LOG_CAPACITY: usize = 1024;

const TEXT_SYSTEM_PROMPT: &str = "You are a nutrition analyst for a coaching platform. \
    The user describes a meal they ate. Respond with a single JSON object with the fields \
    dish_name (string), calories, protein, fat, carbs (numbers, grams except calories in kcal) \
    and confidence (number, 0-100). No other text.";

const VISION_SYSTEM_PROMPT: &str = "You are a nutrition analyst for a coaching platform. \
    The user sends a photo of a meal, optionally with a caption. Respond with a single JSON \
    object with the fields dish_name (string), calories, protein, fat, carbs (numbers), \
    confidence (number, 0-100), ingredients (array of objects with name, calories, protein, \
    fat, carbs) and notes (string, one short coaching remark). No other text.";

const PHOTO_ONLY_PROMPT: &str = "Analyze the meal shown in the photo.";
const PARSE_FAILURE_REPLY: &str =
    "I couldn't analyze that meal just now. Please try again in a moment.";
const VOICE_REPLY: &str =
    "Voice notes aren't supported yet. Please describe your meal in text or send a photo.";

/// One update kind's handling logic.
#[async_trait]
pub trait UpdateHandler: Send + Sync {
    async fn handle(&self, bot: &BotRegistration, update: &Update) -> anyhow::Result<()>;
}

/// Outbound Telegram access the handlers need, behind a seam so tests run
/// without a network.
#[async_trait]
pub trait ReplyTransport: Send + Sync {
    async fn send_reply(
        &self,
        bot: &BotRegistration,
        chat_id: i64,
        text: &str,
        reply_to_message_id: Option<i64>,
    ) -> anyhow::Result<()>;

    /// Resolve a photo `file_id` to a fetchable URL, when the file exists.
    async fn photo_url(&self, bot: &BotRegistration, file_id: &str)
    -> anyhow::Result<Option<String>>;
}

/// Production transport: one shared HTTP client, a per-bot [`BotApi`] per
/// call so every bot keeps its own token.
pub struct TelegramTransport {
    http: reqwest::Client,
}

impl TelegramTransport {
    pub fn new() -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("build telegram http client")?;
        Ok(Self { http })
    }

    fn api(&self, bot: &BotRegistration) -> anyhow::Result<BotApi> {
        BotApi::from_client(&bot.token, self.http.clone())
            .with_context(|| format!("build bot api for bot {}", bot.id))
    }
}

#[async_trait]
impl ReplyTransport for TelegramTransport {
    async fn send_reply(
        &self,
        bot: &BotRegistration,
        chat_id: i64,
        text: &str,
        reply_to_message_id: Option<i64>,
    ) -> anyhow::Result<()> {
        self.api(bot)?
            .send_message(chat_id, text, reply_to_message_id)
            .await
            .context("sendMessage")?;
        Ok(())
    }

    async fn photo_url(
        &self,
        bot: &BotRegistration,
        file_id: &str,
    ) -> anyhow::Result<Option<String>> {
        let api = self.api(bot)?;
        let info = api.get_file(file_id).await.context("getFile")?;
        Ok(info.file_path.map(|path| api.file_url(&path)))
    }
}

/// Analyzes meal messages: build the prompt, call the provider, validate the
/// response, reply from validated fields only, and append an interaction
/// record. Raw model output never reaches the client.
pub struct MealAnalysisHandler {
    transport: Arc<dyn ReplyTransport>,
    provider: Arc<dyn AiProvider>,
    sink: Arc<dyn InteractionSink>,
    tracker: Arc<ParseFailureTracker>,
    limits: SanitizeLimits,
}

impl MealAnalysisHandler {
    pub fn new(
        transport: Arc<dyn ReplyTransport>,
        provider: Arc<dyn AiProvider>,
        sink: Arc<dyn InteractionSink>,
        tracker: Arc<ParseFailureTracker>,
        limits: SanitizeLimits,
    ) -> Self {
        Self {
            transport,
            provider,
            sink,
            tracker,
            limits,
        }
    }
}

#[async_trait]
impl UpdateHandler for MealAnalysisHandler {
    async fn handle(&self, bot: &BotRegistration, update: &Update) -> anyhow::Result<()> {
        let Some(message) = update.message.as_ref().or(update.edited_message.as_ref()) else {
            debug!(update_id = update.update_id, "no message payload; nothing to analyze");
            return Ok(());
        };
        let chat_id = message.chat.id;

        if message.voice.is_some() {
            self.transport
                .send_reply(bot, chat_id, VOICE_REPLY, Some(message.message_id))
                .await
                .context("send voice notice")?;
            return Ok(());
        }

        let input = message.text_or_caption().unwrap_or_default().to_string();
        let photo = message.largest_photo();
        if input.is_empty() && photo.is_none() {
            debug!(
                update_id = update.update_id,
                "message has neither text nor photo; skipping"
            );
            return Ok(());
        }

        let (kind, schema, system, image_url) = match photo {
            Some(photo) => {
                let url = self
                    .transport
                    .photo_url(bot, &photo.file_id)
                    .await
                    .context("resolve photo url")?;
                (
                    InteractionKind::Vision,
                    ResponseSchema::SmartFood,
                    VISION_SYSTEM_PROMPT,
                    url,
                )
            }
            None => (
                InteractionKind::Text,
                ResponseSchema::Food,
                TEXT_SYSTEM_PROMPT,
                None,
            ),
        };

        let prompt = if input.is_empty() {
            PHOTO_ONLY_PROMPT.to_string()
        } else {
            truncate_chars(&input, MAX_INPUT_CHARS).to_string()
        };
        let request = AiRequest {
            system: system.to_string(),
            prompt,
            image_url,
        };

        let started = Instant::now();
        let response = self
            .provider
            .complete(&request)
            .await
            .context("ai completion")?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let validated = sanitize_response(&response.content, schema, &self.limits);
        self.tracker.observe(
            self.provider.provider_id(),
            self.provider.model_id(),
            validated.parse_error(),
        );

        let reply = if validated.parse_error() {
            PARSE_FAILURE_REPLY.to_string()
        } else {
            format_reply(&validated)
        };
        self.transport
            .send_reply(bot, chat_id, &reply, Some(message.message_id))
            .await
            .context("send analysis reply")?;

        let record = InteractionRecord {
            id: ulid::Ulid::new().to_string(),
            client_id: update.from_user().map(|user| user.id).unwrap_or(chat_id),
            coach_id: bot.coach_id,
            kind,
            client_input: input,
            request_payload: serde_json::to_value(&request).unwrap_or(serde_json::Value::Null),
            raw_response: response.content,
            // Both halves of the outcome: the reply text the client saw and
            // the validated analysis it was built from.
            final_output: serde_json::json!({
                "reply": reply,
                "validated": serde_json::to_value(&validated).unwrap_or(serde_json::Value::Null),
            }),
            provider: self.provider.provider_id().to_string(),
            model: response.model,
            duration_ms,
            created_at: Utc::now(),
        };
        // The reply already went out; a log write problem stays internal.
        if let Err(error) = self.sink.record(record).await {
            warn!(
                bot_id = bot.id,
                update_id = update.update_id,
                error = format!("{error:#}"),
                "interaction log write failed"
            );
        }
        Ok(())
    }
}

/// Reply text built exclusively from validated, already-escaped fields.
fn format_reply(validated: &ValidatedResponse) -> String {
    let analysis = validated.analysis();
    let mut out = format!("<b>{}</b>", analysis.dish_name);
    if let Some(calories) = analysis.calories {
        out.push_str(&format!("\nCalories: {calories:.0} kcal"));
    }
    let mut macros = Vec::new();
    if let Some(protein) = analysis.protein {
        macros.push(format!("protein {protein:.0} g"));
    }
    if let Some(fat) = analysis.fat {
        macros.push(format!("fat {fat:.0} g"));
    }
    if let Some(carbs) = analysis.carbs {
        macros.push(format!("carbs {carbs:.0} g"));
    }
    if !macros.is_empty() {
        out.push_str(&format!("\nMacros: {}", macros.join(", ")));
    }
    if let Some(confidence) = analysis.confidence {
        out.push_str(&format!("\nConfidence: {confidence:.0}%"));
    }
    let ingredients = validated.ingredients();
    if !ingredients.is_empty() {
        out.push_str("\n\nIngredients:");
        for ingredient in ingredients {
            match ingredient.calories {
                Some(calories) => out.push_str(&format!(
                    "\n- {} ({calories:.0} kcal)",
                    ingredient.name
                )),
                None => out.push_str(&format!("\n- {}", ingredient.name)),
            }
        }
    }
    if let ValidatedResponse::SmartFood(smart) = validated {
        if let Some(notes) = smart.notes.as_deref() {
            out.push_str(&format!("\n\n{notes}"));
        }
    }
    out
}

/// Acknowledges inline-keyboard callbacks. Unknown tags are absorbed, not
/// errors: an old keyboard may outlive the tag set.
pub struct CallbackHandler {
    transport: Arc<dyn ReplyTransport>,
}

impl CallbackHandler {
    pub fn new(transport: Arc<dyn ReplyTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl UpdateHandler for CallbackHandler {
    async fn handle(&self, bot: &BotRegistration, update: &Update) -> anyhow::Result<()> {
        let Some(query) = update.callback_query.as_ref() else {
            debug!(update_id = update.update_id, "no callback payload; skipping");
            return Ok(());
        };
        let Some(chat_id) = update.chat_id() else {
            debug!(
                update_id = update.update_id,
                callback_id = %query.id,
                "callback without an origin chat; skipping"
            );
            return Ok(());
        };
        let tag = query.data.as_deref().unwrap_or_default();
        let reply = match tag {
            "log_meal" => "Meal logged. Keep it up!",
            "discard" => "Discarded. Nothing was logged.",
            other => {
                debug!(
                    update_id = update.update_id,
                    callback_id = %query.id,
                    tag = other,
                    "unknown callback tag absorbed"
                );
                return Ok(());
            }
        };
        self.transport
            .send_reply(bot, chat_id, reply, None)
            .await
            .context("send callback reply")?;
        Ok(())
    }
}

/// Wire the standard handler set: meal analysis on messages and edits,
/// callback acknowledgment on callback queries.
pub fn standard_router(
    cfg: &CoachGateConfig,
    directory: Arc<dyn BotDirectory>,
) -> anyhow::Result<Arc<UpdateRouter>> {
    let api_key = cfg
        .ai
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .context("ai.api_key is required (set COACHGATE_AI_API_KEY)")?;
    let mut provider = OpenAiProvider::new(api_key, &cfg.ai.model)?;
    if let Some(base_url) = cfg.ai.base_url.as_deref() {
        provider = provider.with_base_url(base_url);
    }
    let provider: Arc<dyn AiProvider> = Arc::new(provider);
    let sink: Arc<dyn InteractionSink> = Arc::new(MemoryInteractionLog::new(
        INTERACTION_LOG_CAPACITY,
    ));
    let tracker = Arc::new(ParseFailureTracker::new(
        cfg.ai.parse_failure_alert_threshold,
    ));
    let limits = SanitizeLimits {
        max_ingredients: cfg.ai.max_ingredients,
        ..SanitizeLimits::default()
    };
    let transport: Arc<dyn ReplyTransport> = Arc::new(TelegramTransport::new()?);

    let meal = Arc::new(MealAnalysisHandler::new(
        transport.clone(),
        provider,
        sink,
        tracker,
        limits,
    ));
    let callback = Arc::new(CallbackHandler::new(transport));

    Ok(Arc::new(
        UpdateRouter::new(directory)
            .with_handler(UpdateKind::Message, meal.clone())
            .with_handler(UpdateKind::EditedMessage, meal)
            .with_handler(UpdateKind::CallbackQuery, callback),
    ))
}
