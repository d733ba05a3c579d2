//! Repair of JSON values that arrive double-encoded.
//!
//! Models occasionally send an array or object argument as a JSON *string*
//! (`"[{\"title\":\"x\"}]"` instead of `[{"title":"x"}]`), and some tool
//! backends wrap their payloads the same way. [`normalize`] walks a value and
//! decodes every string that parses as a JSON array or object.

use serde_json::Value;

/// Recursively decode strings that hold a JSON array or object.
///
/// Strings that merely look like JSON but fail to parse are left untouched,
/// as are scalars. Already-structured values come back unchanged.
pub fn normalize(value: Value) -> Value {
    match value {
        Value::String(s) => match decode_embedded(&s) {
            Some(decoded) => normalize(decoded),
            None => Value::String(s),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, normalize(value)))
                .collect(),
        ),
        other => other,
    }
}

fn decode_embedded(s: &str) -> Option<Value> {
    let trimmed = s.trim();
    let bracketed = (trimmed.starts_with('[') && trimmed.ends_with(']'))
        || (trimmed.starts_with('{') && trimmed.ends_with('}'));
    if !bracketed {
        return None;
    }
    let decoded = serde_json::from_str(trimmed).ok()?;
    tracing::trace!(len = trimmed.len(), "Decoded JSON embedded in a string");
    Some(decoded)
}
