//! Structured-output handling for provider text.

use serde_json::Value;

/// Append the JSON schema contract to a prompt.
pub fn with_schema(prompt: &str, schema: &Value) -> String {
    let schema_text = serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
    format!(
        "{}\n\nRespond with JSON only, no commentary. The JSON must conform to this schema:\n{}",
        prompt, schema_text
    )
}

/// Pull the JSON value out of a completion and check its top-level type.
///
/// Code fences and surrounding prose are ignored. When the schema wants an
/// array and the model wrapped it in a single-field object, the array is
/// unwrapped.
pub fn parse_structured(text: &str, schema: &Value) -> Result<Value, String> {
    let expected = schema.get("type").and_then(Value::as_str);
    let body = strip_fences(text);

    let value = match expected {
        Some("array") => slice_between(body, '[', ']')
            .or_else(|| slice_between(body, '{', '}'))
            .ok_or_else(|| "no JSON array in response".to_string())?,
        Some("object") => {
            slice_between(body, '{', '}').ok_or_else(|| "no JSON object in response".to_string())?
        }
        _ => slice_between(body, '[', ']')
            .or_else(|| slice_between(body, '{', '}'))
            .or_else(|| serde_json::from_str::<Value>(body.trim()).ok())
            .ok_or_else(|| "no JSON in response".to_string())?,
    };

    match (expected, value) {
        (Some("array"), Value::Array(items)) => Ok(Value::Array(items)),
        (Some("array"), Value::Object(map)) => {
            let mut arrays = map.into_iter().filter(|(_, v)| v.is_array());
            match (arrays.next(), arrays.next()) {
                (Some((_, array)), None) => Ok(array),
                _ => Err("expected a JSON array".to_string()),
            }
        }
        (Some("object"), v @ Value::Object(_)) => Ok(v),
        (Some("array"), _) => Err("expected a JSON array".to_string()),
        (Some("object"), _) => Err("expected a JSON object".to_string()),
        (_, v) => Ok(v),
    }
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line
    let rest = rest.split_once('\n').map_or(rest, |(_, body)| body);
    rest.rsplit_once("```").map_or(rest, |(body, _)| body).trim()
}

/// Parse the text between the first `open` and the last `close`.
fn slice_between(text: &str, open: char, close: char) -> Option<Value> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn array_schema() -> Value {
        json!({"type": "array", "items": {"type": "object"}})
    }

    #[test]
    fn parses_fenced_array_with_prose() {
        let text = "Here you go:\n```json\n[{\"round_name\": \"Seed\"}]\n```\nThanks";
        let value = parse_structured(text, &array_schema()).unwrap();
        assert_eq!(value[0]["round_name"], "Seed");
    }

    #[test]
    fn parses_bare_array_with_leading_text() {
        let value = parse_structured("Rounds: [] ", &array_schema()).unwrap();
        assert_eq!(value, json!([]));
    }

    #[test]
    fn unwraps_single_array_field() {
        let value = parse_structured("{\"rounds\": [{\"a\": 1}]}", &array_schema()).unwrap();
        assert_eq!(value, json!([{"a": 1}]));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_structured("I could not find anything.", &array_schema()).is_err());
        assert!(parse_structured("[not json", &array_schema()).is_err());
        assert!(parse_structured("\"text\"", &json!({"type": "object"})).is_err());
    }

    #[test]
    fn schema_is_appended_to_prompt() {
        let prompt = with_schema("Extract rounds.", &array_schema());
        assert!(prompt.starts_with("Extract rounds."));
        assert!(prompt.contains("\"array\""));
    }
}
