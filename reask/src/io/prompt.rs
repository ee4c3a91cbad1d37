//! Prompt formatting and reask request assembly.
//!
//! Caller prompts use `${name}` placeholders filled from prompt params, plus
//! `${output_schema}` and the built-in `${gr.<name>}` snippets. Reask prompts
//! are rendered from minijinja templates that callers may override.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::core::history::Iteration;
use crate::core::output::ParseFailure;
use crate::core::reask::{ReaskPlan, ReaskScope, plan_reask};
use crate::core::schema::SchemaNode;
use crate::core::types::ModelRequest;

const REASK_FULL_TEMPLATE: &str = include_str!("prompts/reask_full.md");
const REASK_PARTIAL_TEMPLATE: &str = include_str!("prompts/reask_partial.md");
const REASK_INSTRUCTIONS_TEMPLATE: &str = include_str!("prompts/reask_instructions.md");

/// `${gr.complete_json_suffix}`: schema plus a JSON-only instruction.
pub const COMPLETE_JSON_SUFFIX: &str = "\n\nGiven below is a JSON schema that describes the \
expected output. Return a JSON document that conforms to it. Respond with JSON only, \
without prose or code fences.\n\n${output_schema}\n";

/// `${gr.json_suffix_without_examples}`: JSON-only instruction without the schema.
pub const JSON_SUFFIX_WITHOUT_EXAMPLES: &str = "\n\nRespond with a JSON document that \
matches the schema above and nothing else.\n";

/// `${gr.complete_string_suffix}`: plain-text answer instruction.
pub const COMPLETE_STRING_SUFFIX: &str = "\n\nRespond only with the requested text, \
without explanations or surrounding quotes.\n";

static CONSTANT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{gr\.([A-Za-z_][A-Za-z0-9_]*)\}").expect("constant regex is valid")
});

static VARIABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("variable regex is valid")
});

fn constant(name: &str) -> Option<&'static str> {
    match name {
        "complete_json_suffix" => Some(COMPLETE_JSON_SUFFIX),
        "json_suffix_without_examples" => Some(JSON_SUFFIX_WITHOUT_EXAMPLES),
        "complete_string_suffix" => Some(COMPLETE_STRING_SUFFIX),
        _ => None,
    }
}

/// Fill `${...}` placeholders in a caller prompt.
///
/// Built-in snippets expand first, so they may themselves reference
/// `${output_schema}`. Unknown placeholders are left untouched.
pub fn format_prompt(template: &str, params: &Map<String, Value>, schema: &SchemaNode) -> String {
    let expanded = CONSTANT_RE.replace_all(template, |caps: &Captures| {
        constant(&caps[1]).map_or_else(|| caps[0].to_string(), str::to_string)
    });
    VARIABLE_RE
        .replace_all(&expanded, |caps: &Captures| {
            let name = &caps[1];
            if name == "output_schema" {
                return pretty(&schema.to_prompt_schema());
            }
            match params.get(name) {
                Some(Value::String(text)) => text.clone(),
                Some(other) => other.to_string(),
                None => {
                    debug!(placeholder = name, "prompt placeholder has no value");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Follow-up prompt text for one reask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedReask {
    pub prompt: String,
    pub instructions: String,
}

#[derive(Debug, Clone, Serialize)]
struct FailedPathContext {
    path: String,
    incorrect_value: String,
    messages: Vec<String>,
    schema: String,
}

/// Template engine wrapper around minijinja.
#[derive(Debug, Clone)]
pub struct PromptEngine {
    env: Environment<'static>,
    reask_prompt: Option<String>,
    reask_instructions: Option<String>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        Self {
            env,
            reask_prompt: None,
            reask_instructions: None,
        }
    }

    /// Replace the built-in reask prompt template (minijinja syntax).
    pub fn with_reask_prompt(mut self, template: impl Into<String>) -> Self {
        self.reask_prompt = Some(template.into());
        self
    }

    pub fn with_reask_instructions(mut self, template: impl Into<String>) -> Self {
        self.reask_instructions = Some(template.into());
        self
    }

    /// Render the prompt and instructions for a reask plan.
    #[instrument(skip_all, fields(scope = ?plan.scope, failed = plan.failed.len()))]
    pub fn render_reask(&self, plan: &ReaskPlan, schema: &SchemaNode) -> Result<RenderedReask> {
        let failed = plan
            .failed
            .iter()
            .map(|failed| FailedPathContext {
                path: failed.path.to_string(),
                incorrect_value: failed
                    .incorrect_value
                    .as_ref()
                    .map_or_else(|| "(missing)".to_string(), Value::to_string),
                messages: failed.messages.clone(),
                schema: schema
                    .find(&failed.path)
                    .map(|node| node.to_prompt_schema().to_string())
                    .unwrap_or_default(),
            })
            .collect::<Vec<_>>();
        let answer_example = pretty(&Value::Object(
            plan.failed
                .iter()
                .map(|failed| {
                    (
                        failed.path.to_string(),
                        Value::String("<corrected value>".to_string()),
                    )
                })
                .collect(),
        ));
        let unparsed: Option<&ParseFailure> = plan.unparsed.as_ref();
        let ctx = context! {
            scope => plan.scope,
            json => !schema.is_scalar(),
            failed => failed,
            previous => pretty(&plan.previous),
            unparsed => unparsed,
            output_schema => pretty(&schema.to_prompt_schema()),
            answer_example => answer_example,
        };

        let prompt_template = match (&self.reask_prompt, plan.scope) {
            (Some(custom), _) => custom.as_str(),
            (None, ReaskScope::Full) => REASK_FULL_TEMPLATE,
            (None, ReaskScope::Partial) => REASK_PARTIAL_TEMPLATE,
        };
        let instructions_template = self
            .reask_instructions
            .as_deref()
            .unwrap_or(REASK_INSTRUCTIONS_TEMPLATE);

        let prompt = self
            .env
            .render_str(prompt_template, ctx.clone())
            .context("render reask prompt")?;
        let instructions = self
            .env
            .render_str(instructions_template, ctx)
            .context("render reask instructions")?;
        Ok(RenderedReask {
            prompt: prompt.trim().to_string(),
            instructions: instructions.trim().to_string(),
        })
    }
}

/// The request for the next attempt and the plan it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct NextRequest {
    pub request: ModelRequest,
    pub plan: ReaskPlan,
}

/// Build the follow-up request for a finished attempt.
///
/// Returns `None` when the attempt left nothing unresolved. Scalar roots are
/// always reasked in full since the whole document is the one value.
pub fn build_next_request(
    previous: &Iteration,
    schema: &SchemaNode,
    full_schema_reask: bool,
    engine: &PromptEngine,
    kwargs: &Map<String, Value>,
) -> Result<Option<NextRequest>> {
    let Some(validation) = previous.validation.as_ref() else {
        return Ok(None);
    };
    let full = full_schema_reask || schema.is_scalar();
    let Some(plan) = plan_reask(&validation.value, full) else {
        return Ok(None);
    };
    let rendered = engine.render_reask(&plan, schema)?;
    debug!(
        iteration = previous.index,
        scope = ?plan.scope,
        paths = plan.failed.len(),
        "built reask request"
    );
    Ok(Some(NextRequest {
        request: ModelRequest {
            prompt: Some(rendered.prompt),
            instructions: Some(rendered.instructions),
            msg_history: Vec::new(),
            kwargs: kwargs.clone(),
        },
        plan,
    }))
}
