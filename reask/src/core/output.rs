//! Interpretation of raw model text against a schema.
//!
//! Parsing is independent of validation: a parsed document may still fail
//! every validator, and a parse failure never runs validators at all.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::schema::{ScalarType, SchemaKind, SchemaNode};

static FENCED_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").expect("fenced block regex is valid")
});

/// Raw output that could not be interpreted as the schema's encoding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseFailure {
    pub raw: String,
    pub error: String,
}

/// Result of interpreting model text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ParsedOutput {
    Parsed { value: Value },
    Failed(ParseFailure),
}

impl ParsedOutput {
    pub fn value(&self) -> Option<&Value> {
        match self {
            ParsedOutput::Parsed { value } => Some(value),
            ParsedOutput::Failed(_) => None,
        }
    }
}

/// Parse `raw` for the given schema root.
///
/// Scalar roots take the text itself (coerced to the scalar type when
/// possible). Object and list roots expect JSON, optionally wrapped in a
/// fenced code block or surrounded by prose.
pub fn parse_output(raw: &str, schema: &SchemaNode) -> ParsedOutput {
    match &schema.kind {
        SchemaKind::Scalar(ScalarType::String) => ParsedOutput::Parsed {
            value: Value::String(raw.trim().to_string()),
        },
        SchemaKind::Scalar(scalar) => {
            let text = Value::String(raw.trim().to_string());
            let value = match scalar {
                ScalarType::Any => extract_json(raw).unwrap_or(text),
                _ => scalar.coerce(&text).unwrap_or(text),
            };
            ParsedOutput::Parsed { value }
        }
        SchemaKind::Object(_) | SchemaKind::List(_) => match extract_json(raw) {
            Some(value) => match (&schema.kind, &value) {
                (SchemaKind::Object(_), Value::Object(_)) | (SchemaKind::List(_), Value::Array(_)) => {
                    ParsedOutput::Parsed {
                        value: coerce_value(value, schema),
                    }
                }
                (SchemaKind::Object(_), _) => failed(raw, "expected a JSON object"),
                _ => failed(raw, "expected a JSON array"),
            },
            None => failed(raw, "no valid JSON found in output"),
        },
    }
}

/// Parse the answer to a partial reask, which must be a JSON object.
pub fn parse_reask_answer(raw: &str) -> ParsedOutput {
    match extract_json(raw) {
        Some(value @ Value::Object(_)) => ParsedOutput::Parsed { value },
        Some(_) => failed(raw, "expected a JSON object"),
        None => failed(raw, "no valid JSON found in output"),
    }
}

fn failed(raw: &str, error: &str) -> ParsedOutput {
    ParsedOutput::Failed(ParseFailure {
        raw: raw.to_string(),
        error: error.to_string(),
    })
}

/// Find the first JSON document in `raw`.
///
/// Tries, in order: a fenced code block, the whole trimmed text, then the
/// widest `{...}` / `[...]` span.
pub fn extract_json(raw: &str) -> Option<Value> {
    if let Some(caps) = FENCED_BLOCK_RE.captures(raw)
        && let Some(block) = caps.get(1)
        && let Ok(value) = serde_json::from_str(block.as_str().trim())
    {
        return Some(value);
    }
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close))
            && start < end
            && let Ok(value) = serde_json::from_str(&trimmed[start..=end])
        {
            return Some(value);
        }
    }
    None
}

/// Coerce scalar leaves to their declared types; unconvertible leaves are kept as-is.
pub fn coerce_value(value: Value, schema: &SchemaNode) -> Value {
    match (&schema.kind, value) {
        (SchemaKind::Scalar(scalar), value) => scalar.coerce(&value).unwrap_or(value),
        (SchemaKind::Object(fields), Value::Object(mut map)) => {
            let mut out = Map::new();
            for field in fields {
                if let Some(child) = map.remove(&field.name) {
                    out.insert(field.name.clone(), coerce_value(child, &field.node));
                }
            }
            // Unknown keys are kept in the parsed view; validation drops them.
            out.extend(map);
            Value::Object(out)
        }
        (SchemaKind::List(element), Value::Array(items)) => Value::Array(
            items
                .into_iter()
                .map(|item| coerce_value(item, element))
                .collect(),
        ),
        (_, other) => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::SchemaField;
    use serde_json::json;

    fn age_schema() -> SchemaNode {
        SchemaNode::object(vec![SchemaField::required("age", SchemaNode::integer())])
    }

    #[test]
    fn parses_json_inside_code_fence() {
        let raw = "Sure! Here you go:\n```json\n{\"age\": \"20\"}\n```\nAnything else?";
        assert_eq!(
            parse_output(raw, &age_schema()),
            ParsedOutput::Parsed {
                value: json!({"age": 20})
            }
        );
    }

    #[test]
    fn keeps_unconvertible_scalars_for_validators() {
        let parsed = parse_output("{\"age\": \"twenty\"}", &age_schema());
        assert_eq!(parsed.value(), Some(&json!({"age": "twenty"})));
    }

    #[test]
    fn extracts_json_surrounded_by_prose() {
        let parsed = parse_output("The answer is {\"age\": 3} as requested.", &age_schema());
        assert_eq!(parsed.value(), Some(&json!({"age": 3})));
    }

    #[test]
    fn wrong_top_level_shape_is_a_parse_failure() {
        let parsed = parse_output("[1, 2]", &age_schema());
        let ParsedOutput::Failed(failure) = parsed else {
            panic!("expected failure");
        };
        assert_eq!(failure.error, "expected a JSON object");
        assert_eq!(failure.raw, "[1, 2]");
    }

    #[test]
    fn non_json_is_a_parse_failure() {
        let parsed = parse_output("I cannot help with that.", &age_schema());
        assert!(matches!(parsed, ParsedOutput::Failed(_)));
    }

    #[test]
    fn string_root_takes_trimmed_text() {
        let parsed = parse_output("  hello world \n", &SchemaNode::string());
        assert_eq!(parsed.value(), Some(&json!("hello world")));
    }
}
