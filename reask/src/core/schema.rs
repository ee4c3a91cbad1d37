//! Typed description of the expected output shape.
//!
//! A schema is a tree of scalar/object/list nodes. Every node carries its
//! validators (applied in declaration order), a stable [`JsonPath`] and an
//! optional description used when rendering the schema into a prompt.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value, json};

use crate::core::path::{JsonPath, Segment};
use crate::core::validator::Validator;

/// Leaf value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    String,
    Integer,
    Float,
    Boolean,
    /// Any JSON value, including nested structures.
    Any,
}

impl ScalarType {
    pub fn as_str(self) -> &'static str {
        match self {
            ScalarType::String => "string",
            ScalarType::Integer => "integer",
            ScalarType::Float => "float",
            ScalarType::Boolean => "boolean",
            ScalarType::Any => "any",
        }
    }

    /// Whether `value` already has this type.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            ScalarType::String => value.is_string(),
            ScalarType::Integer => value.is_i64() || value.is_u64(),
            ScalarType::Float => value.is_number(),
            ScalarType::Boolean => value.is_boolean(),
            ScalarType::Any => true,
        }
    }

    /// Best-effort conversion of `value` into this type.
    ///
    /// Returns `None` when the value cannot be represented; callers keep the
    /// original value and let validators report the mismatch.
    pub fn coerce(self, value: &Value) -> Option<Value> {
        if self.matches(value) && self != ScalarType::Float {
            return Some(value.clone());
        }
        match (self, value) {
            (ScalarType::String, Value::Number(n)) => Some(Value::String(n.to_string())),
            (ScalarType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
            (ScalarType::Integer, Value::String(s)) => {
                s.trim().parse::<i64>().ok().map(|n| Value::Number(n.into()))
            }
            (ScalarType::Integer, Value::Number(n)) => n
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| Value::Number((f as i64).into())),
            (ScalarType::Float, Value::Number(_)) => Some(value.clone()),
            (ScalarType::Float, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number),
            (ScalarType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named child of an object node.
#[derive(Debug, Clone)]
pub struct SchemaField {
    pub name: String,
    /// Rendered into prompts; enforcement is up to the node's validators.
    pub required: bool,
    pub node: SchemaNode,
}

impl SchemaField {
    pub fn required(name: impl Into<String>, node: SchemaNode) -> Self {
        Self {
            name: name.into(),
            required: true,
            node,
        }
    }

    pub fn optional(name: impl Into<String>, node: SchemaNode) -> Self {
        Self {
            name: name.into(),
            required: false,
            node,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SchemaKind {
    Scalar(ScalarType),
    Object(Vec<SchemaField>),
    /// Single element template shared by every list item.
    List(Box<SchemaNode>),
}

/// One position in the expected output shape.
#[derive(Debug, Clone)]
pub struct SchemaNode {
    pub kind: SchemaKind,
    pub validators: Vec<Arc<dyn Validator>>,
    pub path: JsonPath,
    pub description: Option<String>,
}

impl SchemaNode {
    pub fn scalar(scalar: ScalarType) -> Self {
        Self::with_kind(SchemaKind::Scalar(scalar))
    }

    pub fn string() -> Self {
        Self::scalar(ScalarType::String)
    }

    pub fn integer() -> Self {
        Self::scalar(ScalarType::Integer)
    }

    pub fn object(fields: Vec<SchemaField>) -> Self {
        Self::with_kind(SchemaKind::Object(fields))
    }

    pub fn list(element: SchemaNode) -> Self {
        Self::with_kind(SchemaKind::List(Box::new(element)))
    }

    fn with_kind(kind: SchemaKind) -> Self {
        Self {
            kind,
            validators: Vec::new(),
            path: JsonPath::root(),
            description: None,
        }
    }

    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    pub fn validator_arc(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.kind, SchemaKind::Scalar(_))
    }

    /// Assign paths from the root down and check structural invariants.
    ///
    /// Returns the stable error messages when the tree is malformed.
    pub fn into_root(mut self) -> Result<Self, Vec<String>> {
        self.assign_paths(JsonPath::root());
        let errors = self.check_structure();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(errors)
        }
    }

    fn assign_paths(&mut self, path: JsonPath) {
        match &mut self.kind {
            SchemaKind::Scalar(_) => {}
            SchemaKind::Object(fields) => {
                for field in fields {
                    field.node.assign_paths(path.child(&field.name));
                }
            }
            SchemaKind::List(element) => element.assign_paths(path.each()),
        }
        self.path = path;
    }

    /// Structural invariants: unique sibling names, non-empty names, unique paths.
    pub fn check_structure(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();
        self.check_inner(&mut seen, &mut errors);
        errors
    }

    fn check_inner(&self, seen: &mut HashSet<JsonPath>, errors: &mut Vec<String>) {
        if !seen.insert(self.path.clone()) {
            errors.push(format!("duplicate path {}", self.path));
        }
        match &self.kind {
            SchemaKind::Scalar(_) => {}
            SchemaKind::Object(fields) => {
                let mut names = HashSet::new();
                for field in fields {
                    if field.name.is_empty() {
                        errors.push(format!("empty field name under {}", self.path));
                    } else if field.name.contains(['.', '[', ']']) {
                        errors.push(format!(
                            "field name '{}' under {} may not contain '.', '[' or ']'",
                            field.name, self.path
                        ));
                    }
                    if !names.insert(field.name.as_str()) {
                        errors.push(format!(
                            "duplicate field '{}' under {}",
                            field.name, self.path
                        ));
                    }
                    field.node.check_inner(seen, errors);
                }
            }
            SchemaKind::List(element) => element.check_inner(seen, errors),
        }
    }

    /// Find the node addressed by a concrete document path (`[n]` matches `[*]`).
    pub fn find(&self, path: &JsonPath) -> Option<&SchemaNode> {
        let mut node = self;
        for segment in path.segments() {
            node = match (&node.kind, segment) {
                (SchemaKind::Object(fields), Segment::Key(key)) => {
                    &fields.iter().find(|f| &f.name == key)?.node
                }
                (SchemaKind::List(element), Segment::Index(_) | Segment::Each) => element,
                _ => return None,
            };
        }
        Some(node)
    }

    /// Render the tree as a JSON-Schema-like document for prompts.
    pub fn to_prompt_schema(&self) -> Value {
        let mut doc = match &self.kind {
            SchemaKind::Scalar(ScalarType::Any) => json!({}),
            SchemaKind::Scalar(ScalarType::Float) => json!({"type": "number"}),
            SchemaKind::Scalar(scalar) => json!({"type": scalar.as_str()}),
            SchemaKind::Object(fields) => {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for field in fields {
                    properties.insert(field.name.clone(), field.node.to_prompt_schema());
                    if field.required {
                        required.push(Value::String(field.name.clone()));
                    }
                }
                json!({"type": "object", "properties": properties, "required": required})
            }
            SchemaKind::List(element) => {
                json!({"type": "array", "items": element.to_prompt_schema()})
            }
        };
        if let Value::Object(map) = &mut doc {
            if let Some(description) = &self.description {
                map.insert("description".to_string(), json!(description));
            }
            let rules = self
                .validators
                .iter()
                .map(|v| match v.describe() {
                    Some(text) => format!("{}: {}", v.name(), text),
                    None => v.name().to_string(),
                })
                .collect::<Vec<_>>();
            if !rules.is_empty() {
                map.insert("validators".to_string(), json!(rules));
            }
        }
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::validator::{IsType, ValidLength};

    fn user_schema() -> SchemaNode {
        SchemaNode::object(vec![
            SchemaField::required("name", SchemaNode::string()),
            SchemaField::optional(
                "tags",
                SchemaNode::list(SchemaNode::string().validator(ValidLength::new(None, Some(8)))),
            ),
        ])
    }

    #[test]
    fn into_root_assigns_paths() {
        let root = user_schema().into_root().expect("valid schema");
        let SchemaKind::Object(fields) = &root.kind else {
            panic!("expected object");
        };
        assert_eq!(fields[0].node.path.to_string(), "$.name");
        let SchemaKind::List(element) = &fields[1].node.kind else {
            panic!("expected list");
        };
        assert_eq!(element.path.to_string(), "$.tags[*]");
    }

    #[test]
    fn duplicate_sibling_names_are_rejected() {
        let schema = SchemaNode::object(vec![
            SchemaField::required("a", SchemaNode::string()),
            SchemaField::required("a", SchemaNode::integer()),
        ]);
        let errors = schema.into_root().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("duplicate field 'a'")));
        assert!(errors.iter().any(|e| e.contains("duplicate path $.a")));
    }

    #[test]
    fn find_matches_concrete_indices_against_templates() {
        let root = user_schema().into_root().expect("valid schema");
        let path = JsonPath::root().child("tags").index(4);
        let node = root.find(&path).expect("node");
        assert_eq!(node.path.to_string(), "$.tags[*]");
        assert!(root.find(&JsonPath::root().child("missing")).is_none());
    }

    #[test]
    fn coerce_parses_numeric_strings() {
        assert_eq!(ScalarType::Integer.coerce(&json!("20")), Some(json!(20)));
        assert_eq!(ScalarType::Integer.coerce(&json!("twenty")), None);
        assert_eq!(ScalarType::Integer.coerce(&json!(3.0)), Some(json!(3)));
        assert_eq!(ScalarType::Float.coerce(&json!("2.5")), Some(json!(2.5)));
        assert_eq!(ScalarType::Boolean.coerce(&json!("TRUE")), Some(json!(true)));
        assert_eq!(ScalarType::String.coerce(&json!(7)), Some(json!("7")));
    }

    #[test]
    fn prompt_schema_lists_validators_and_required_fields() {
        let schema = SchemaNode::object(vec![SchemaField::required(
            "age",
            SchemaNode::integer().validator(IsType::new(ScalarType::Integer)),
        )]);
        let doc = schema.to_prompt_schema();
        assert_eq!(doc["required"], json!(["age"]));
        assert_eq!(doc["properties"]["age"]["type"], json!("integer"));
        assert_eq!(
            doc["properties"]["age"]["validators"],
            json!(["is-integer: must be integer"])
        );
    }
}
