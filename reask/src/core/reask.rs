//! Reask decisions and partial-answer splicing.
//!
//! Rendering the follow-up prompt is I/O-free but template driven, so it
//! lives in `io::prompt`; this module decides *what* to ask for and merges
//! corrected values back into the last validated tree.

use anyhow::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::core::executor::{self, PARSE_VALIDATOR, PathFailure, ValidationResponse};
use crate::core::output::{ParseFailure, coerce_value};
use crate::core::path::{JsonPath, lookup};
use crate::core::schema::SchemaNode;
use crate::core::tree::{ReAskKind, Validated};
use crate::core::types::{FailResult, Metadata, OnFailAction};

/// How much of the document the next request regenerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaskScope {
    Full,
    Partial,
}

/// One unresolved location, flattened for prompt rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedPath {
    pub path: JsonPath,
    pub incorrect_value: Option<Value>,
    pub messages: Vec<String>,
}

/// Everything needed to render the next request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReaskPlan {
    pub scope: ReaskScope,
    /// Unresolved locations in depth-first, left-to-right order.
    pub failed: Vec<FailedPath>,
    /// Previous document with unresolved fields showing their incorrect values.
    pub previous: Value,
    /// Set when the previous output could not be parsed at all.
    pub unparsed: Option<ParseFailure>,
}

impl ReaskPlan {
    pub fn paths(&self) -> Vec<JsonPath> {
        self.failed.iter().map(|failed| failed.path.clone()).collect()
    }
}

/// Decide whether another request is needed and what it must cover.
///
/// Returns `None` when the tree holds no unresolved locations. A parse failure
/// always forces a full-document request.
pub fn plan_reask(validated: &Validated, full_schema_reask: bool) -> Option<ReaskPlan> {
    let reasks = validated.reasks();
    if reasks.is_empty() {
        return None;
    }
    let unparsed = reasks
        .iter()
        .find(|reask| reask.kind == ReAskKind::Skeleton)
        .map(|reask| ParseFailure {
            raw: reask
                .incorrect_value
                .as_ref()
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            error: reask.messages().join("; "),
        });
    let scope = if full_schema_reask || unparsed.is_some() {
        ReaskScope::Full
    } else {
        ReaskScope::Partial
    };
    let failed = reasks
        .iter()
        .map(|reask| FailedPath {
            path: reask.path.clone(),
            incorrect_value: reask.incorrect_value.clone(),
            messages: reask.messages().into_iter().map(str::to_string).collect(),
        })
        .collect();
    let previous = if unparsed.is_some() {
        Value::Null
    } else {
        validated.to_value()
    };
    Some(ReaskPlan {
        scope,
        failed,
        previous,
        unparsed,
    })
}

/// Merge a partial-reask answer into the previous validated tree.
///
/// The answer is a JSON object keyed by path strings (`{"$.b": ...}`); an
/// answer shaped like the document itself is also accepted. Each corrected
/// value is coerced and validated against its own schema node only. Paths
/// the answer omits keep their previous placeholder.
pub fn apply_partial_answer(
    base: &Validated,
    answer: &Map<String, Value>,
    paths: &[JsonPath],
    schema: &SchemaNode,
    metadata: &Metadata,
) -> Result<ValidationResponse> {
    let document = Value::Object(answer.clone());

    let mut failures = Vec::new();
    let mut splices = Vec::with_capacity(paths.len());
    for path in paths {
        let Some(node) = schema.find(path) else {
            continue;
        };
        let corrected = answer
            .get(&path.to_string())
            .or_else(|| if path.is_root() { None } else { lookup(&document, path) });
        let Some(corrected) = corrected else {
            debug!(%path, "path missing from partial answer");
            failures.push(PathFailure {
                path: path.clone(),
                validator: PARSE_VALIDATOR.to_string(),
                on_fail: OnFailAction::Reask,
                result: FailResult::new(format!("No corrected value returned for {path}.")),
            });
            continue;
        };
        let coerced = coerce_value(corrected.clone(), node);
        let (value, node_failures) =
            executor::validate_at(Some(&coerced), node, path.clone(), metadata)?;
        failures.extend(node_failures);
        splices.push((path.clone(), value));
    }

    let mut merged = base.clone();
    for (path, value) in splices {
        if !merged.splice(&path, value) {
            debug!(%path, "could not splice corrected value");
        }
    }
    Ok(ValidationResponse {
        value: merged,
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{ScalarType, SchemaField};
    use crate::core::validator::{IsType, ValidChoices};
    use serde_json::json;

    fn ab_schema() -> SchemaNode {
        SchemaNode::object(vec![
            SchemaField::required("a", SchemaNode::string()),
            SchemaField::required(
                "b",
                SchemaNode::string().validator(ValidChoices::new(vec![json!("good")])),
            ),
        ])
        .into_root()
        .expect("valid schema")
    }

    fn answer(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("answer must be an object"),
        }
    }

    fn ab_validated() -> Validated {
        executor::validate(&json!({"a": "ok", "b": "bad"}), &ab_schema(), &Metadata::new())
            .expect("validate")
            .value
    }

    #[test]
    fn clean_tree_needs_no_reask() {
        let validated = Validated::Object(vec![("a".to_string(), Validated::Value(json!(1)))]);
        assert!(plan_reask(&validated, false).is_none());
        assert!(plan_reask(&validated, true).is_none());
    }

    #[test]
    fn partial_plan_lists_only_failing_paths() {
        let plan = plan_reask(&ab_validated(), false).expect("plan");
        assert_eq!(plan.scope, ReaskScope::Partial);
        assert_eq!(plan.paths(), vec![JsonPath::root().child("b")]);
        assert_eq!(plan.failed[0].incorrect_value, Some(json!("bad")));
        assert!(plan.failed[0].messages[0].contains("'bad'"));
    }

    #[test]
    fn full_plan_carries_previous_document() {
        let plan = plan_reask(&ab_validated(), true).expect("plan");
        assert_eq!(plan.scope, ReaskScope::Full);
        assert_eq!(plan.previous, json!({"a": "ok", "b": "bad"}));
    }

    #[test]
    fn skeleton_reask_forces_full_scope() {
        let response = ValidationResponse::parse_failure(&ParseFailure {
            raw: "garbage".to_string(),
            error: "no valid JSON found in output".to_string(),
        });
        let plan = plan_reask(&response.value, false).expect("plan");
        assert_eq!(plan.scope, ReaskScope::Full);
        let unparsed = plan.unparsed.expect("unparsed");
        assert_eq!(unparsed.raw, "garbage");
    }

    #[test]
    fn partial_answer_is_spliced_into_base() {
        let schema = ab_schema();
        let base = ab_validated();
        let paths = vec![JsonPath::root().child("b")];
        let response = apply_partial_answer(
            &base,
            &answer(json!({"$.b": "good"})),
            &paths,
            &schema,
            &Metadata::new(),
        )
        .expect("apply");
        assert!(response.passed());
        assert_eq!(response.value.output(), Some(json!({"a": "ok", "b": "good"})));
    }

    #[test]
    fn document_shaped_answer_is_accepted() {
        let schema = ab_schema();
        let paths = vec![JsonPath::root().child("b")];
        let response = apply_partial_answer(
            &ab_validated(),
            &answer(json!({"b": "good"})),
            &paths,
            &schema,
            &Metadata::new(),
        )
        .expect("apply");
        assert_eq!(response.value.output(), Some(json!({"a": "ok", "b": "good"})));
    }

    #[test]
    fn omitted_paths_keep_their_reask() {
        let schema = ab_schema();
        let paths = vec![JsonPath::root().child("b")];
        let response =
            apply_partial_answer(&ab_validated(), &Map::new(), &paths, &schema, &Metadata::new())
                .expect("apply");
        assert_eq!(response.value.reasks().len(), 1);
        assert_eq!(response.failures[0].validator, PARSE_VALIDATOR);
    }

    #[test]
    fn corrected_values_are_revalidated() {
        let schema = SchemaNode::object(vec![SchemaField::required(
            "age",
            SchemaNode::integer().validator(IsType::new(ScalarType::Integer)),
        )])
        .into_root()
        .expect("valid schema");
        let base = executor::validate(&json!({"age": "twenty"}), &schema, &Metadata::new())
            .expect("validate")
            .value;
        let paths = vec![JsonPath::root().child("age")];

        let still_bad = apply_partial_answer(
            &base,
            &answer(json!({"$.age": "zwanzig"})),
            &paths,
            &schema,
            &Metadata::new(),
        )
        .expect("apply");
        assert_eq!(still_bad.value.reasks()[0].incorrect_value, Some(json!("zwanzig")));

        let fixed = apply_partial_answer(
            &base,
            &answer(json!({"$.age": "20"})),
            &paths,
            &schema,
            &Metadata::new(),
        )
        .expect("apply");
        assert_eq!(fixed.value.output(), Some(json!({"age": 20})));
    }
}
