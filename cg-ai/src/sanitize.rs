//! String and number primitives the response validator is built from.
//!
//! Everything here is total: bad input degrades to trimmed text, an absent
//! number, or an empty string, never to an error.

use serde_json::Value;

/// Strip one enclosing Markdown code fence.
///
/// Models wrap JSON in ```` ```json ... ``` ```` no matter how firmly the
/// prompt says not to. Tolerates a language tag after the opening fence,
/// prose before the fence and after the closing one, and a missing closing
/// fence. Input without a fence passes through trimmed.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };
    let after_open = &trimmed[open + 3..];
    // The language tag runs to the end of the opening line; a single-line
    // fence has no newline, so strip the tag characters directly.
    let body = match after_open.find('\n') {
        Some(newline) => &after_open[newline + 1..],
        None => after_open.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    let body = match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    };
    body.trim()
}

/// Best-effort numeric read: JSON numbers pass through, numeric-looking
/// strings are parsed, everything else is absent. Non-finite values are
/// absent too, so `"1e999"` cannot smuggle an infinity into a record.
pub fn coerce_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|v| v.is_finite())
}

pub fn clamp_range(value: f64, lo: f64, hi: f64) -> f64 {
    value.clamp(lo, hi)
}

/// Escape the five HTML-significant characters for Telegram HTML replies and
/// any downstream web rendering of stored output.
pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Cut to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(raw: &str, max_chars: usize) -> &str {
    match raw.char_indices().nth(max_chars) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}

/// Display-string pipeline: trim, cap the length, then escape. The cap
/// applies to source characters so an entity expansion can't be split.
pub fn sanitize_display(raw: &str, max_chars: usize) -> String {
    escape_html(truncate_chars(raw.trim(), max_chars))
}
