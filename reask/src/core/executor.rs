//! Validation executor.
//!
//! Walks parsed output in tandem with the schema tree, runs every node's
//! validators in declaration order and applies the winning remediation.
//! Container validators see the container after its children were remediated.

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::output::ParseFailure;
use crate::core::path::JsonPath;
use crate::core::schema::{SchemaKind, SchemaNode};
use crate::core::tree::{ReAsk, ReAskKind, Validated};
use crate::core::types::{FailResult, Metadata, OnFailAction, ValidationResult};
use crate::error::ReaskError;

/// Validator name recorded when a container has the wrong JSON type.
pub const STRUCTURE_VALIDATOR: &str = "structure";
/// Validator name recorded for whole-document parse failures.
pub const PARSE_VALIDATOR: &str = "parse";

/// One failing validator at one document path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathFailure {
    pub path: JsonPath,
    pub validator: String,
    pub on_fail: OnFailAction,
    pub result: FailResult,
}

/// Remediated document plus every failure seen while producing it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResponse {
    pub value: Validated,
    pub failures: Vec<PathFailure>,
}

impl ValidationResponse {
    /// Whole-document reask for output that could not be parsed.
    pub fn parse_failure(failure: &ParseFailure) -> Self {
        let result = FailResult::new(failure.error.clone());
        Self {
            value: Validated::ReAsk(ReAsk {
                kind: ReAskKind::Skeleton,
                path: JsonPath::root(),
                incorrect_value: Some(Value::String(failure.raw.clone())),
                fail_results: vec![result.clone()],
            }),
            failures: vec![PathFailure {
                path: JsonPath::root(),
                validator: PARSE_VALIDATOR.to_string(),
                on_fail: OnFailAction::Reask,
                result,
            }],
        }
    }

    pub fn passed(&self) -> bool {
        !self.value.has_reasks() && !self.value.is_refrained()
    }
}

/// Validate a parsed document against the schema root.
///
/// A filtered root yields no output, the same as a refrain.
#[instrument(skip_all, fields(root = %schema.path))]
pub fn validate(
    parsed: &Value,
    schema: &SchemaNode,
    metadata: &Metadata,
) -> Result<ValidationResponse> {
    let (value, failures) = validate_at(Some(parsed), schema, JsonPath::root(), metadata)?;
    let value = value.unwrap_or(Validated::Refrained);
    debug!(
        failures = failures.len(),
        reasks = value.reasks().len(),
        "validated output"
    );
    Ok(ValidationResponse { value, failures })
}

/// Validate one value (or its absence) against one schema node at a concrete path.
///
/// Returns `None` when the value was filtered, or absent and left absent.
pub fn validate_at(
    value: Option<&Value>,
    node: &SchemaNode,
    path: JsonPath,
    metadata: &Metadata,
) -> Result<(Option<Validated>, Vec<PathFailure>)> {
    let mut walk = Walk {
        metadata,
        failures: Vec::new(),
    };
    let validated = walk.node(value, node, path)?;
    Ok((validated, walk.failures))
}

struct Walk<'a> {
    metadata: &'a Metadata,
    failures: Vec<PathFailure>,
}

/// Failures at one node that survived the exception/refrain short-circuit.
struct NodeFailure {
    on_fail: OnFailAction,
    result: FailResult,
}

enum NodeOutcome {
    Pass,
    Refrain,
    Failed(Vec<NodeFailure>),
}

impl Walk<'_> {
    fn node(
        &mut self,
        value: Option<&Value>,
        schema: &SchemaNode,
        path: JsonPath,
    ) -> Result<Option<Validated>> {
        let rebuilt = match (&schema.kind, value) {
            (SchemaKind::Object(fields), Some(Value::Object(map))) => {
                let mut entries = Vec::with_capacity(fields.len());
                for field in fields {
                    let child =
                        self.node(map.get(&field.name), &field.node, path.child(&field.name))?;
                    if let Some(child) = child {
                        entries.push((field.name.clone(), child));
                    }
                }
                Some(Validated::Object(entries))
            }
            (SchemaKind::List(element), Some(Value::Array(items))) => {
                let mut kept = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    if let Some(child) = self.node(Some(item), element, path.index(index))? {
                        kept.push(child);
                    }
                }
                Some(Validated::List(kept))
            }
            (SchemaKind::Object(_) | SchemaKind::List(_), Some(other)) if !other.is_null() => {
                return Ok(Some(self.structure_mismatch(schema, other, path)));
            }
            _ => None,
        };

        let current = match &rebuilt {
            Some(tree) => Some(tree.to_value()),
            None => value.cloned(),
        };
        let keep = |current: Option<Value>| rebuilt.clone().or(current.map(Validated::Value));

        match self.run_validators(current.as_ref(), schema, &path)? {
            NodeOutcome::Pass => Ok(keep(current)),
            NodeOutcome::Refrain => Ok(Some(Validated::Refrained)),
            NodeOutcome::Failed(failures) => {
                Ok(self.remediate(current, failures, schema, path, keep))
            }
        }
    }

    fn structure_mismatch(&mut self, schema: &SchemaNode, value: &Value, path: JsonPath) -> Validated {
        let expected = match schema.kind {
            SchemaKind::Object(_) => "an object",
            _ => "a list",
        };
        let result = FailResult::new(format!("Expected {expected}, got {value}."));
        self.failures.push(PathFailure {
            path: path.clone(),
            validator: STRUCTURE_VALIDATOR.to_string(),
            on_fail: OnFailAction::Reask,
            result: result.clone(),
        });
        Validated::ReAsk(ReAsk {
            kind: ReAskKind::Field,
            path,
            incorrect_value: Some(value.clone()),
            fail_results: vec![result],
        })
    }

    fn run_validators(
        &mut self,
        value: Option<&Value>,
        schema: &SchemaNode,
        path: &JsonPath,
    ) -> Result<NodeOutcome> {
        let mut failed = Vec::new();
        for validator in &schema.validators {
            let ValidationResult::Fail(result) = validator.validate(value, self.metadata) else {
                continue;
            };
            let on_fail = validator.on_fail();
            debug!(%path, validator = validator.name(), %on_fail, "validator failed");
            self.failures.push(PathFailure {
                path: path.clone(),
                validator: validator.name().to_string(),
                on_fail,
                result: result.clone(),
            });
            match on_fail {
                OnFailAction::Exception => {
                    return Err(ReaskError::Validator {
                        path: path.to_string(),
                        validator: validator.name().to_string(),
                        message: result.error_message,
                    }
                    .into());
                }
                OnFailAction::Refrain => return Ok(NodeOutcome::Refrain),
                _ => failed.push(NodeFailure { on_fail, result }),
            }
        }
        if failed.is_empty() {
            Ok(NodeOutcome::Pass)
        } else {
            Ok(NodeOutcome::Failed(failed))
        }
    }

    fn remediate(
        &self,
        current: Option<Value>,
        failures: Vec<NodeFailure>,
        schema: &SchemaNode,
        path: JsonPath,
        keep: impl FnOnce(Option<Value>) -> Option<Validated>,
    ) -> Option<Validated> {
        let winner = failures
            .iter()
            .map(|failure| failure.on_fail)
            .max_by_key(|action| action.precedence())
            .unwrap_or(OnFailAction::Noop);
        let wants_reask = failures
            .iter()
            .any(|f| matches!(f.on_fail, OnFailAction::Reask | OnFailAction::FixReask));
        let reask = |current: Option<Value>, failures: Vec<NodeFailure>| {
            Some(Validated::ReAsk(ReAsk {
                kind: ReAskKind::Field,
                path: path.clone(),
                incorrect_value: current,
                fail_results: failures.into_iter().map(|f| f.result).collect(),
            }))
        };

        match winner {
            OnFailAction::Filter => None,
            OnFailAction::Fix | OnFailAction::FixReask => {
                let fix = failures.iter().find_map(|f| f.result.fix_value.clone());
                let plain_fix = failures.iter().any(|f| f.on_fail == OnFailAction::Fix);
                match fix {
                    Some(fix) if plain_fix || self.revalidates(&fix, schema) => {
                        Some(Validated::Value(fix))
                    }
                    _ if wants_reask => reask(current, failures),
                    _ => keep(current),
                }
            }
            OnFailAction::Reask => reask(current, failures),
            // Exception and refrain short-circuit in `run_validators`.
            OnFailAction::Noop | OnFailAction::Exception | OnFailAction::Refrain => keep(current),
        }
    }

    fn revalidates(&self, fix: &Value, schema: &SchemaNode) -> bool {
        schema
            .validators
            .iter()
            .all(|validator| validator.validate(Some(fix), self.metadata).is_pass())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{ScalarType, SchemaField};
    use crate::core::validator::{FnValidator, IsType, Required, ValidChoices, ValidRange};
    use serde_json::json;

    fn meta() -> Metadata {
        Metadata::new()
    }

    fn age_schema(on_fail: OnFailAction) -> SchemaNode {
        SchemaNode::object(vec![SchemaField::required(
            "age",
            SchemaNode::integer().validator(IsType::new(ScalarType::Integer).with_on_fail(on_fail)),
        )])
        .into_root()
        .expect("valid schema")
    }

    #[test]
    fn clean_document_passes_unchanged() {
        let response = validate(&json!({"age": 20}), &age_schema(OnFailAction::Reask), &meta())
            .expect("validate");
        assert!(response.passed());
        assert!(response.failures.is_empty());
        assert_eq!(response.value.output(), Some(json!({"age": 20})));
    }

    #[test]
    fn reask_wraps_the_failing_field() {
        let response = validate(
            &json!({"age": "twenty"}),
            &age_schema(OnFailAction::Reask),
            &meta(),
        )
        .expect("validate");
        let reasks = response.value.reasks();
        assert_eq!(reasks.len(), 1);
        assert_eq!(reasks[0].path.to_string(), "$.age");
        assert_eq!(reasks[0].incorrect_value, Some(json!("twenty")));
        assert_eq!(response.failures[0].validator, "is-integer");
    }

    #[test]
    fn fix_substitutes_and_round_trips() {
        let schema = SchemaNode::object(vec![SchemaField::required(
            "score",
            SchemaNode::integer()
                .validator(ValidRange::new(Some(0.0), Some(10.0)).with_on_fail(OnFailAction::Fix)),
        )])
        .into_root()
        .expect("valid schema");
        let response = validate(&json!({"score": 42}), &schema, &meta()).expect("validate");
        assert_eq!(response.value.output(), Some(json!({"score": 10})));
        assert_eq!(response.failures.len(), 1);

        let fixed = response.value.to_value();
        let again = validate(&fixed, &schema, &meta()).expect("revalidate");
        assert!(again.failures.is_empty());
        assert!(!again.value.has_reasks());
    }

    #[test]
    fn fix_reask_degrades_when_fix_fails_other_validators() {
        let odd = FnValidator::new("odd", OnFailAction::Reask, |value, _| {
            match value.and_then(Value::as_i64) {
                Some(n) if n % 2 == 1 => ValidationResult::Pass,
                _ => ValidationResult::fail("must be odd"),
            }
        });
        let node = SchemaNode::integer()
            .validator(ValidRange::new(None, Some(10.0)).with_on_fail(OnFailAction::FixReask))
            .validator(odd);
        let (value, failures) =
            validate_at(Some(&json!(12)), &node, JsonPath::root(), &meta()).expect("validate");
        let Some(Validated::ReAsk(reask)) = value else {
            panic!("expected reask");
        };
        assert_eq!(reask.fail_results.len(), 2);
        assert_eq!(failures.len(), 2);

        let (value, _) =
            validate_at(Some(&json!(11)), &node, JsonPath::root(), &meta()).expect("validate");
        assert!(matches!(value, Some(Validated::ReAsk(_))));
    }

    #[test]
    fn fix_reask_applies_fix_that_revalidates() {
        let node = SchemaNode::integer()
            .validator(ValidRange::new(None, Some(10.0)).with_on_fail(OnFailAction::FixReask));
        let (value, _) =
            validate_at(Some(&json!(12)), &node, JsonPath::root(), &meta()).expect("validate");
        assert_eq!(value, Some(Validated::Value(json!(10))));
    }

    #[test]
    fn filter_removes_list_elements_preserving_order() {
        let schema = SchemaNode::list(SchemaNode::string().validator(
            ValidChoices::new(vec![json!("a"), json!("c"), json!("e")])
                .with_on_fail(OnFailAction::Filter),
        ))
        .into_root()
        .expect("valid schema");
        let response = validate(&json!(["a", "b", "c", "d", "e"]), &schema, &meta())
            .expect("validate");
        assert_eq!(response.value.output(), Some(json!(["a", "c", "e"])));
        assert_eq!(response.failures.len(), 2);
        assert_eq!(response.failures[0].path.to_string(), "$[1]");
    }

    #[test]
    fn filter_outranks_reask_on_the_same_node() {
        let node = SchemaNode::string()
            .validator(ValidChoices::new(vec![json!("x")]))
            .validator(ValidChoices::new(vec![json!("y")]).with_on_fail(OnFailAction::Filter));
        let (value, failures) =
            validate_at(Some(&json!("z")), &node, JsonPath::root(), &meta()).expect("validate");
        assert_eq!(value, None);
        assert_eq!(failures.len(), 2);
    }

    #[test]
    fn exception_aborts_with_typed_error() {
        let err = validate(
            &json!({"age": "twenty"}),
            &age_schema(OnFailAction::Exception),
            &meta(),
        )
        .unwrap_err();
        let typed = err.downcast_ref::<ReaskError>().expect("typed error");
        assert!(matches!(typed, ReaskError::Validator { path, .. } if path == "$.age"));
    }

    #[test]
    fn refrain_suppresses_whole_output() {
        let response = validate(
            &json!({"age": "twenty"}),
            &age_schema(OnFailAction::Refrain),
            &meta(),
        )
        .expect("validate");
        assert!(response.value.is_refrained());
        assert_eq!(response.value.output(), None);
        assert!(!response.passed());
    }

    #[test]
    fn noop_keeps_value_and_records_failure() {
        let response = validate(
            &json!({"age": "twenty"}),
            &age_schema(OnFailAction::Noop),
            &meta(),
        )
        .expect("validate");
        assert!(response.passed());
        assert_eq!(response.value.output(), Some(json!({"age": "twenty"})));
        assert_eq!(response.failures.len(), 1);
    }

    #[test]
    fn absent_field_is_validated_as_absent() {
        let schema = SchemaNode::object(vec![
            SchemaField::required("name", SchemaNode::string().validator(Required::new())),
            SchemaField::optional("nick", SchemaNode::string()),
        ])
        .into_root()
        .expect("valid schema");
        let response = validate(&json!({}), &schema, &meta()).expect("validate");
        let reasks = response.value.reasks();
        assert_eq!(reasks.len(), 1);
        assert_eq!(reasks[0].path.to_string(), "$.name");
        assert_eq!(reasks[0].incorrect_value, None);
        assert_eq!(response.value.to_value(), json!({"name": null}));
    }

    #[test]
    fn unknown_keys_are_dropped() {
        let response = validate(
            &json!({"age": 3, "extra": true}),
            &age_schema(OnFailAction::Reask),
            &meta(),
        )
        .expect("validate");
        assert_eq!(response.value.output(), Some(json!({"age": 3})));
    }

    #[test]
    fn container_type_mismatch_is_a_structure_reask() {
        let schema = SchemaNode::object(vec![SchemaField::required(
            "tags",
            SchemaNode::list(SchemaNode::string()),
        )])
        .into_root()
        .expect("valid schema");
        let response = validate(&json!({"tags": "a,b"}), &schema, &meta()).expect("validate");
        assert_eq!(response.failures[0].validator, STRUCTURE_VALIDATOR);
        assert_eq!(response.value.reasks()[0].path.to_string(), "$.tags");
    }

    #[test]
    fn container_validators_see_remediated_children() {
        let schema = SchemaNode::list(
            SchemaNode::integer()
                .validator(ValidRange::new(Some(0.0), None).with_on_fail(OnFailAction::Filter)),
        )
        .validator(FnValidator::new("non-empty", OnFailAction::Reask, |value, _| {
            match value.and_then(Value::as_array) {
                Some(items) if !items.is_empty() => ValidationResult::Pass,
                _ => ValidationResult::fail("list is empty"),
            }
        }))
        .into_root()
        .expect("valid schema");
        let response = validate(&json!([-1, -2]), &schema, &meta()).expect("validate");
        let reasks = response.value.reasks();
        assert_eq!(reasks.len(), 1);
        assert!(reasks[0].path.is_root());
        assert_eq!(reasks[0].incorrect_value, Some(json!([])));
    }

    #[test]
    fn parse_failure_is_a_skeleton_reask() {
        let response = ValidationResponse::parse_failure(&ParseFailure {
            raw: "nope".to_string(),
            error: "no valid JSON found in output".to_string(),
        });
        let reasks = response.value.reasks();
        assert_eq!(reasks[0].kind, ReAskKind::Skeleton);
        assert_eq!(response.failures[0].validator, PARSE_VALIDATOR);
    }
}
