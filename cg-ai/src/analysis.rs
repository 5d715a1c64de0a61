//! Validated response types and the sanitizer that produces them.
//!
//! Raw model output goes through two stages: generic JSON (`serde_json::Value`)
//! and then a validated, clamped, escaped variant. Only the validated stage
//! may be stored, rendered, or sent to a client; the raw stage exists solely
//! inside [`sanitize_response`] and the diagnostic interaction log.

use std::sync::atomic::{AtomicU32, Ordering};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, warn};

use crate::sanitize::{clamp_range, coerce_f64, sanitize_display, strip_code_fence};

pub const DEFAULT_PARSE_FAILURE_THRESHOLD: u32 = 5;

const FALLBACK_DISH_NAME: &str = "Unknown dish";

/// Caps applied while validating a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SanitizeLimits {
    /// Ingredients kept per analysis; overflow is truncated, never an error.
    pub max_ingredients: usize,
    /// Character cap for dish and ingredient names.
    pub max_name_chars: usize,
    /// Character cap for the free-text notes field.
    pub max_notes_chars: usize,
}

impl Default for SanitizeLimits {
    fn default() -> Self {
        Self {
            max_ingredients: 50,
            max_name_chars: 256,
            max_notes_chars: 1024,
        }
    }
}

/// Which response shape the prompt asked the model for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSchema {
    Food,
    SmartFood,
}

impl ResponseSchema {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Food => "food",
            Self::SmartFood => "smart_food",
        }
    }
}

/// Nutrition summary for one meal. All numeric fields are already clamped
/// (nutrients to >= 0, confidence to 0..=100) and all text already escaped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoodAnalysis {
    pub dish_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calories: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protein: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carbs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// True only when the response could not be parsed at all and this is
    /// the fallback instance. Field-level coercion failures do not set it.
    pub parse_error: bool,
}

impl FoodAnalysis {
    pub fn fallback() -> Self {
        Self {
            dish_name: FALLBACK_DISH_NAME.to_string(),
            calories: None,
            protein: None,
            fat: None,
            carbs: None,
            confidence: None,
            parse_error: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ingredient {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calories: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protein: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carbs: Option<f64>,
}

/// The richer coaching shape: per-ingredient breakdown plus free-text notes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SmartFoodAnalysis {
    #[serde(flatten)]
    pub analysis: FoodAnalysis,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ingredients: Vec<Ingredient>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl SmartFoodAnalysis {
    pub fn fallback() -> Self {
        Self {
            analysis: FoodAnalysis::fallback(),
            ingredients: Vec::new(),
            notes: None,
        }
    }
}

/// A response that finished validation. The `schema` tag makes the stage
/// explicit wherever one of these is stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "schema", rename_all = "snake_case")]
pub enum ValidatedResponse {
    Food(FoodAnalysis),
    SmartFood(SmartFoodAnalysis),
}

impl ValidatedResponse {
    pub fn parse_error(&self) -> bool {
        self.analysis().parse_error
    }

    pub fn analysis(&self) -> &FoodAnalysis {
        match self {
            Self::Food(analysis) => analysis,
            Self::SmartFood(smart) => &smart.analysis,
        }
    }

    pub fn ingredients(&self) -> &[Ingredient] {
        match self {
            Self::Food(_) => &[],
            Self::SmartFood(smart) => &smart.ingredients,
        }
    }
}

/// Validate raw model output against `schema`. Total: any input yields a
/// usable value. Unparseable input produces the schema's fallback with
/// `parse_error = true` and a warning; unknown fields are dropped; fields
/// that fail numeric coercion stay absent rather than defaulting to zero.
pub fn sanitize_response(
    raw: &str,
    schema: ResponseSchema,
    limits: &SanitizeLimits,
) -> ValidatedResponse {
    let body = strip_code_fence(raw);
    let root: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(error) => {
            warn!(
                %error,
                schema = schema.as_str(),
                response_chars = raw.chars().count(),
                "AI response is not valid JSON; serving fallback"
            );
            return fallback_for(schema);
        }
    };
    let Some(map) = root.as_object() else {
        warn!(
            schema = schema.as_str(),
            "AI response is valid JSON but not an object; serving fallback"
        );
        return fallback_for(schema);
    };

    match schema {
        ResponseSchema::Food => ValidatedResponse::Food(food_from_map(map, limits)),
        ResponseSchema::SmartFood => ValidatedResponse::SmartFood(SmartFoodAnalysis {
            analysis: food_from_map(map, limits),
            ingredients: ingredients_from_map(map, limits),
            notes: notes_from_map(map, limits),
        }),
    }
}

fn fallback_for(schema: ResponseSchema) -> ValidatedResponse {
    match schema {
        ResponseSchema::Food => ValidatedResponse::Food(FoodAnalysis::fallback()),
        ResponseSchema::SmartFood => ValidatedResponse::SmartFood(SmartFoodAnalysis::fallback()),
    }
}

fn food_from_map(map: &Map<String, Value>, limits: &SanitizeLimits) -> FoodAnalysis {
    FoodAnalysis {
        dish_name: dish_name_from_map(map, limits),
        calories: nutrient_from_map(map, "calories"),
        protein: nutrient_from_map(map, "protein"),
        fat: nutrient_from_map(map, "fat"),
        carbs: nutrient_from_map(map, "carbs"),
        confidence: confidence_from_map(map),
        parse_error: false,
    }
}

fn dish_name_from_map(map: &Map<String, Value>, limits: &SanitizeLimits) -> String {
    let name = map
        .get("dish_name")
        .and_then(Value::as_str)
        .map(|raw| sanitize_display(raw, limits.max_name_chars))
        .unwrap_or_default();
    if name.is_empty() {
        FALLBACK_DISH_NAME.to_string()
    } else {
        name
    }
}

/// Nutrition values cannot be negative; clamp instead of rejecting so a
/// sloppy `-5` still becomes a usable 0.
fn nutrient_from_map(map: &Map<String, Value>, key: &str) -> Option<f64> {
    map.get(key).and_then(coerce_f64).map(|v| v.max(0.0))
}

fn confidence_from_map(map: &Map<String, Value>) -> Option<f64> {
    map.get("confidence")
        .and_then(coerce_f64)
        .map(|v| clamp_range(v, 0.0, 100.0))
}

fn ingredients_from_map(map: &Map<String, Value>, limits: &SanitizeLimits) -> Vec<Ingredient> {
    let Some(Value::Array(items)) = map.get("ingredients") else {
        return Vec::new();
    };
    if items.len() > limits.max_ingredients {
        warn!(
            total = items.len(),
            kept = limits.max_ingredients,
            "ingredient list over cap; truncating"
        );
    }
    items
        .iter()
        .take(limits.max_ingredients)
        .filter_map(|item| ingredient_from_value(item, limits))
        .collect()
}

fn ingredient_from_value(value: &Value, limits: &SanitizeLimits) -> Option<Ingredient> {
    let map = value.as_object()?;
    let name = map
        .get("name")
        .and_then(Value::as_str)
        .map(|raw| sanitize_display(raw, limits.max_name_chars))?;
    if name.is_empty() {
        return None;
    }
    Some(Ingredient {
        name,
        calories: nutrient_from_map(map, "calories"),
        protein: nutrient_from_map(map, "protein"),
        fat: nutrient_from_map(map, "fat"),
        carbs: nutrient_from_map(map, "carbs"),
    })
}

fn notes_from_map(map: &Map<String, Value>, limits: &SanitizeLimits) -> Option<String> {
    map.get("notes")
        .and_then(Value::as_str)
        .map(|raw| sanitize_display(raw, limits.max_notes_chars))
        .filter(|notes| !notes.is_empty())
}

/// Counts consecutive parse failures per process and escalates the log level
/// once the configured threshold is reached. Pure observability: it never
/// changes what the caller returns.
pub struct ParseFailureTracker {
    threshold: u32,
    consecutive: AtomicU32,
}

impl ParseFailureTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: AtomicU32::new(0),
        }
    }

    /// Feed one sanitize outcome; returns the current failure streak.
    pub fn observe(&self, provider: &str, model: &str, parse_error: bool) -> u32 {
        if !parse_error {
            self.consecutive.store(0, Ordering::Relaxed);
            return 0;
        }
        let streak = self.consecutive.fetch_add(1, Ordering::Relaxed) + 1;
        if streak >= self.threshold {
            error!(
                provider,
                model,
                streak,
                threshold = self.threshold,
                "AI responses are failing to parse repeatedly"
            );
        } else {
            warn!(provider, model, streak, "AI response failed to parse; fallback served");
        }
        streak
    }
}

impl Default for ParseFailureTracker {
    fn default() -> Self {
        Self::new(DEFAULT_PARSE_FAILURE_THRESHOLD)
    }
}
