//! AI provider access and response sanitization for CoachGate.
//!
//! Model output is untrusted input. The only path from a provider response
//! to storage or a client reply runs through [`sanitize_response`], which is
//! total: every input produces a typed, clamped, escaped value, with
//! `parse_error` marking the fallback case.

mod analysis;
mod error;
mod interaction;
mod openai;
mod provider;
mod sanitize;

pub use analysis::{
    DEFAULT_PARSE_FAILURE_THRESHOLD, FoodAnalysis, Ingredient, ParseFailureTracker,
    ResponseSchema, SanitizeLimits, SmartFoodAnalysis, ValidatedResponse, sanitize_response,
};
pub use error::{AiError, Result};
pub use interaction::{InteractionKind, InteractionRecord, InteractionSink, MemoryInteractionLog};
pub use openai::OpenAiProvider;
pub use provider::{AiProvider, AiRequest, AiResponse};
pub use sanitize::{
    clamp_range, coerce_f64, escape_html, sanitize_display, strip_code_fence, truncate_chars,
};
