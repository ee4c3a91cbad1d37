//! Build schema trees from JSON Schema documents.
//!
//! Supported keywords: `type`, `properties`, `required`, `items`, `enum`,
//! `pattern`, `minLength`/`maxLength`, `minItems`/`maxItems`,
//! `minimum`/`maximum`, `description`, plus the `x-on-fail` extension naming
//! the remediation for every validator derived from that node.

use std::sync::Arc;

use anyhow::{Context, Result};
use jsonschema::Draft;
use serde_json::{Map, Value};
use tracing::debug;

use crate::core::schema::{ScalarType, SchemaField, SchemaNode};
use crate::core::types::{Metadata, OnFailAction, ValidationResult};
use crate::core::validator::{
    IsType, MatchType, RegexMatch, Required, ValidChoices, ValidLength, ValidRange, Validator,
};
use crate::error::ReaskError;

pub const ON_FAIL_KEY: &str = "x-on-fail";

/// Translate a JSON Schema document into a rooted [`SchemaNode`].
///
/// The document must itself be a valid Draft 2020-12 schema.
pub fn from_json_schema(schema: &Value) -> Result<SchemaNode> {
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .map_err(|err| ReaskError::Schema(err.to_string()))
        .context("compile json schema")?;
    let node = translate(schema, "$")?;
    let root = node
        .into_root()
        .map_err(|errors| ReaskError::Schema(errors.join("; ")))?;
    debug!(validators = count_validators(&root), "schema translated");
    Ok(root)
}

fn translate(schema: &Value, at: &str) -> Result<SchemaNode> {
    let Some(obj) = schema.as_object() else {
        // `true` / `false` schemas: accept anything.
        return Ok(SchemaNode::scalar(ScalarType::Any));
    };
    let on_fail = on_fail_for(obj, at)?;
    let (kind, nullable) = declared_type(obj);

    let mut node = match kind.as_deref() {
        Some("object") | None if obj.contains_key("properties") => translate_object(obj, at, on_fail)?,
        Some("object") => SchemaNode::object(Vec::new()),
        Some("array") => {
            let element = match obj.get("items") {
                Some(items) => translate(items, &format!("{at}[*]"))?,
                None => SchemaNode::scalar(ScalarType::Any),
            };
            SchemaNode::list(element)
        }
        Some(other) => {
            let scalar = scalar_type(other).ok_or_else(|| {
                ReaskError::Schema(format!("unsupported type '{other}' at {at}"))
            })?;
            let node = SchemaNode::scalar(scalar);
            if scalar == ScalarType::Any {
                node
            } else {
                node.validator_arc(when_present(
                    IsType::new(scalar).with_on_fail(on_fail),
                    nullable,
                ))
            }
        }
        None => SchemaNode::scalar(ScalarType::Any),
    };

    for validator in keyword_validators(obj, at, on_fail)? {
        node = node.validator_arc(when_present_arc(validator, nullable));
    }
    if let Some(description) = obj.get("description").and_then(Value::as_str) {
        node = node.describe(description);
    }
    Ok(node)
}

fn translate_object(
    obj: &Map<String, Value>,
    at: &str,
    on_fail: OnFailAction,
) -> Result<SchemaNode> {
    let required = obj
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect::<Vec<_>>())
        .unwrap_or_default();
    let mut fields = Vec::new();
    if let Some(properties) = obj.get("properties").and_then(Value::as_object) {
        for (name, child) in properties {
            let child_at = format!("{at}.{name}");
            let mut node = translate(child, &child_at)?;
            if required.contains(&name.as_str()) {
                let child_on_fail = child
                    .as_object()
                    .map(|child| on_fail_for(child, &child_at))
                    .transpose()?
                    .unwrap_or(on_fail);
                // Presence check runs before the type and keyword checks.
                node.validators
                    .insert(0, Arc::new(Required::new().with_on_fail(child_on_fail)));
                fields.push(SchemaField::required(name.clone(), node));
            } else {
                fields.push(SchemaField::optional(name.clone(), node));
            }
        }
    }
    Ok(SchemaNode::object(fields))
}

fn keyword_validators(
    obj: &Map<String, Value>,
    at: &str,
    on_fail: OnFailAction,
) -> Result<Vec<Arc<dyn Validator>>> {
    let mut validators: Vec<Arc<dyn Validator>> = Vec::new();
    if let Some(choices) = obj.get("enum").and_then(Value::as_array) {
        validators.push(Arc::new(ValidChoices::new(choices.clone()).with_on_fail(on_fail)));
    }
    if let Some(pattern) = obj.get("pattern").and_then(Value::as_str) {
        let regex = RegexMatch::new(pattern, MatchType::Search)
            .with_context(|| format!("pattern at {at}"))?;
        validators.push(Arc::new(regex.with_on_fail(on_fail)));
    }
    for (min_key, max_key) in [("minLength", "maxLength"), ("minItems", "maxItems")] {
        let min = obj.get(min_key).and_then(Value::as_u64).map(to_usize);
        let max = obj.get(max_key).and_then(Value::as_u64).map(to_usize);
        if min.is_some() || max.is_some() {
            validators.push(Arc::new(ValidLength::new(min, max).with_on_fail(on_fail)));
        }
    }
    let min = obj.get("minimum").and_then(Value::as_f64);
    let max = obj.get("maximum").and_then(Value::as_f64);
    if min.is_some() || max.is_some() {
        validators.push(Arc::new(ValidRange::new(min, max).with_on_fail(on_fail)));
    }
    Ok(validators)
}

fn on_fail_for(obj: &Map<String, Value>, at: &str) -> Result<OnFailAction> {
    match obj.get(ON_FAIL_KEY) {
        None => Ok(OnFailAction::Reask),
        Some(raw) => serde_json::from_value(raw.clone()).map_err(|_| {
            ReaskError::Schema(format!("invalid {ON_FAIL_KEY} value {raw} at {at}")).into()
        }),
    }
}

/// Declared type, ignoring a `"null"` member of a type list.
fn declared_type(obj: &Map<String, Value>) -> (Option<String>, bool) {
    match obj.get("type") {
        Some(Value::String(kind)) => (Some(kind.clone()), kind == "null"),
        Some(Value::Array(kinds)) => {
            let nullable = kinds.iter().any(|kind| kind == "null");
            let kind = kinds
                .iter()
                .filter_map(Value::as_str)
                .find(|kind| *kind != "null")
                .map(str::to_string);
            (kind, nullable)
        }
        _ => (None, false),
    }
}

fn scalar_type(kind: &str) -> Option<ScalarType> {
    match kind {
        "string" => Some(ScalarType::String),
        "integer" => Some(ScalarType::Integer),
        "number" => Some(ScalarType::Float),
        "boolean" => Some(ScalarType::Boolean),
        "null" => Some(ScalarType::Any),
        _ => None,
    }
}

fn to_usize(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

fn count_validators(node: &SchemaNode) -> usize {
    use crate::core::schema::SchemaKind;
    node.validators.len()
        + match &node.kind {
            SchemaKind::Scalar(_) => 0,
            SchemaKind::Object(fields) => fields.iter().map(|f| count_validators(&f.node)).sum(),
            SchemaKind::List(element) => count_validators(element),
        }
}

fn when_present(validator: impl Validator + 'static, nullable: bool) -> Arc<dyn Validator> {
    when_present_arc(Arc::new(validator), nullable)
}

fn when_present_arc(inner: Arc<dyn Validator>, nullable: bool) -> Arc<dyn Validator> {
    Arc::new(WhenPresent { inner, nullable })
}

/// Keyword checks apply only to values that are there; absence is `required`'s job.
#[derive(Debug)]
struct WhenPresent {
    inner: Arc<dyn Validator>,
    nullable: bool,
}

impl Validator for WhenPresent {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn on_fail(&self) -> OnFailAction {
        self.inner.on_fail()
    }

    fn validate(&self, value: Option<&Value>, metadata: &Metadata) -> ValidationResult {
        match value {
            None => ValidationResult::Pass,
            Some(Value::Null) if self.nullable => ValidationResult::Pass,
            Some(_) => self.inner.validate(value, metadata),
        }
    }

    fn describe(&self) -> Option<String> {
        self.inner.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::executor::validate;
    use crate::core::path::JsonPath;
    use crate::core::schema::SchemaKind;
    use serde_json::json;

    fn person() -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "minLength": 1, "description": "Full name"},
                "age": {"type": "integer", "minimum": 0, "maximum": 150},
                "tier": {"type": "string", "enum": ["free", "pro"], "x-on-fail": "filter"},
                "nickname": {"type": ["string", "null"], "pattern": "^[a-z]+$"}
            },
            "required": ["name", "age"]
        })
    }

    #[test]
    fn translates_fields_and_paths() {
        let root = from_json_schema(&person()).expect("translate");
        let SchemaKind::Object(fields) = &root.kind else {
            panic!("expected object");
        };
        let names = fields.iter().map(|f| f.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, ["name", "age", "tier", "nickname"]);
        assert!(fields[0].required);
        assert!(!fields[2].required);
        let age = root.find(&JsonPath::parse("$.age").expect("path")).expect("age node");
        assert_eq!(age.path.to_string(), "$.age");
        let validator_names = age.validators.iter().map(|v| v.name()).collect::<Vec<_>>();
        assert_eq!(validator_names, ["required", "is-integer", "valid-range"]);
        assert_eq!(fields[0].node.description.as_deref(), Some("Full name"));
    }

    #[test]
    fn keyword_validators_drive_validation() {
        let root = from_json_schema(&person()).expect("translate");
        let parsed = json!({"name": "Ada", "age": 200, "tier": "gold", "nickname": null});
        let response = validate(&parsed, &root, &Metadata::new()).expect("validate");

        let reasks = response.value.reasks();
        assert_eq!(reasks.len(), 1);
        assert_eq!(reasks[0].path.to_string(), "$.age");
        // Filtered enum value is dropped; null is allowed for a nullable type.
        let output = response.value.output().expect("output");
        assert!(output.get("tier").is_none());
        assert_eq!(output["nickname"], Value::Null);
    }

    #[test]
    fn absent_optional_field_passes() {
        let root = from_json_schema(&person()).expect("translate");
        let response =
            validate(&json!({"name": "Ada", "age": 3}), &root, &Metadata::new()).expect("validate");
        assert!(response.passed());
    }

    #[test]
    fn missing_required_field_is_reasked() {
        let root = from_json_schema(&person()).expect("translate");
        let response = validate(&json!({"name": "Ada"}), &root, &Metadata::new()).expect("validate");
        let reasks = response.value.reasks();
        assert_eq!(reasks.len(), 1);
        assert_eq!(reasks[0].path.to_string(), "$.age");
    }

    #[test]
    fn lists_use_item_schema() {
        let schema = json!({
            "type": "array",
            "items": {"type": "integer"},
            "maxItems": 3
        });
        let root = from_json_schema(&schema).expect("translate");
        let SchemaKind::List(element) = &root.kind else {
            panic!("expected list");
        };
        assert_eq!(element.path.to_string(), "$[*]");
        assert_eq!(root.validators.len(), 1);
    }

    #[test]
    fn rejects_invalid_documents() {
        let err = from_json_schema(&json!({"type": 12})).expect_err("invalid schema");
        assert!(matches!(
            err.downcast_ref::<ReaskError>(),
            Some(ReaskError::Schema(_))
        ));

        let err = from_json_schema(&json!({"type": "string", "x-on-fail": "explode"}))
            .expect_err("invalid on-fail");
        assert!(err.to_string().contains("x-on-fail"));
    }

    #[test]
    fn invalid_on_fail_names_the_field() {
        let err = from_json_schema(&json!({
            "type": "object",
            "properties": {"tier": {"type": "string", "x-on-fail": "explode"}},
            "required": ["tier"]
        }))
        .expect_err("invalid on-fail");
        assert!(err.to_string().contains("at $.tier"), "{err}");
    }
}
