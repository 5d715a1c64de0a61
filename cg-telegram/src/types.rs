//! Wire types for the subset of the Bot API this crate consumes.
//!
//! Every optional field is `#[serde(default)]` so unknown bot configurations
//! and older API servers decode without errors; unknown fields are ignored.

use serde::Deserialize;

/// One inbound update, delivered either by webhook push or `getUpdates` pull.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub edited_message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

impl Update {
    /// Classify the update by which payload field is present.
    ///
    /// Checks in the order message, edited_message, callback_query; an update
    /// carrying none of them is `Unsupported` and gets skipped by routing.
    pub fn kind(&self) -> UpdateKind {
        if self.message.is_some() {
            UpdateKind::Message
        } else if self.edited_message.is_some() {
            UpdateKind::EditedMessage
        } else if self.callback_query.is_some() {
            UpdateKind::CallbackQuery
        } else {
            UpdateKind::Unsupported
        }
    }

    /// Chat the update belongs to, when one can be determined.
    pub fn chat_id(&self) -> Option<i64> {
        if let Some(message) = self.message.as_ref().or(self.edited_message.as_ref()) {
            return Some(message.chat.id);
        }
        self.callback_query
            .as_ref()
            .and_then(|query| query.message.as_ref())
            .map(|message| message.chat.id)
    }

    /// The human who produced the update, when Telegram reports one.
    pub fn from_user(&self) -> Option<&User> {
        if let Some(message) = self.message.as_ref().or(self.edited_message.as_ref()) {
            return message.from.as_ref();
        }
        self.callback_query.as_ref().map(|query| &query.from)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    Message,
    EditedMessage,
    CallbackQuery,
    Unsupported,
}

impl UpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::EditedMessage => "edited_message",
            Self::CallbackQuery => "callback_query",
            Self::Unsupported => "unsupported",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub date: i64,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub photo: Vec<PhotoSize>,
    #[serde(default)]
    pub voice: Option<Voice>,
}

impl Message {
    /// Trimmed text, falling back to the media caption.
    pub fn text_or_caption(&self) -> Option<&str> {
        let text = self.text.as_deref().map(str::trim);
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            return Some(text);
        }
        self.caption
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// Telegram lists photo renditions smallest first; the last is the
    /// highest-resolution one.
    pub fn largest_photo(&self) -> Option<&PhotoSize> {
        self.photo.last()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(default, rename = "type")]
    pub chat_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Voice {
    pub file_id: String,
    #[serde(default)]
    pub duration: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

/// Result payload of `getWebhookInfo`.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookInfo {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub pending_update_count: i64,
    #[serde(default)]
    pub last_error_date: Option<i64>,
    #[serde(default)]
    pub last_error_message: Option<String>,
}

/// Result payload of `getFile`; `file_path` is what `BotApi::file_url` needs.
#[derive(Debug, Clone, Deserialize)]
pub struct FileInfo {
    pub file_id: String,
    #[serde(default)]
    pub file_size: Option<i64>,
    #[serde(default)]
    pub file_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::{Update, UpdateKind};
    use serde_json::json;

    fn decode(value: serde_json::Value) -> Update {
        serde_json::from_value(value).expect("update fixture decodes")
    }

    #[test]
    fn text_message_update_decodes_and_classifies() {
        let update = decode(json!({
            "update_id": 42,
            "message": {
                "message_id": 7,
                "from": {"id": 99, "first_name": "Dana", "username": "dana"},
                "chat": {"id": 99, "type": "private"},
                "date": 1735689600,
                "text": "2 eggs and toast"
            }
        }));

        assert_eq!(update.kind(), UpdateKind::Message);
        assert_eq!(update.chat_id(), Some(99));
        assert_eq!(update.from_user().map(|u| u.id), Some(99));
        let message = update.message.expect("message present");
        assert_eq!(message.text_or_caption(), Some("2 eggs and toast"));
    }

    #[test]
    fn photo_update_keeps_largest_rendition_last() {
        let update = decode(json!({
            "update_id": 43,
            "message": {
                "message_id": 8,
                "chat": {"id": 5, "type": "private"},
                "caption": "  lunch  ",
                "photo": [
                    {"file_id": "small", "width": 90, "height": 90},
                    {"file_id": "large", "width": 800, "height": 800}
                ]
            }
        }));

        let message = update.message.expect("message present");
        assert_eq!(
            message.largest_photo().map(|p| p.file_id.as_str()),
            Some("large")
        );
        assert_eq!(message.text_or_caption(), Some("lunch"));
    }

    #[test]
    fn callback_query_update_resolves_chat_through_origin_message() {
        let update = decode(json!({
            "update_id": 44,
            "callback_query": {
                "id": "cbq-1",
                "from": {"id": 12, "first_name": "Lee"},
                "message": {
                    "message_id": 3,
                    "chat": {"id": -100200, "type": "group"}
                },
                "data": "log_meal"
            }
        }));

        assert_eq!(update.kind(), UpdateKind::CallbackQuery);
        assert_eq!(update.chat_id(), Some(-100200));
        assert_eq!(update.from_user().map(|u| u.id), Some(12));
    }

    #[test]
    fn update_without_known_payload_is_unsupported_but_still_decodes() {
        let update = decode(json!({
            "update_id": 45,
            "channel_post": {"message_id": 1, "chat": {"id": 2, "type": "channel"}}
        }));

        assert_eq!(update.kind(), UpdateKind::Unsupported);
        assert_eq!(update.chat_id(), None);
        assert!(update.from_user().is_none());
    }

    #[test]
    fn edited_message_classifies_before_callback() {
        let update = decode(json!({
            "update_id": 46,
            "edited_message": {
                "message_id": 9,
                "chat": {"id": 7, "type": "private"},
                "text": "3 eggs and toast"
            }
        }));

        assert_eq!(update.kind(), UpdateKind::EditedMessage);
        assert_eq!(update.chat_id(), Some(7));
    }
}
