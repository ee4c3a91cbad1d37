//! Validator protocol and the built-in validators.
//!
//! A validator inspects one value (or its absence) and returns pass or fail.
//! It is pure with respect to `(value, metadata)`: anything it needs from
//! earlier iterations must arrive through metadata.

use std::fmt;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use regex::Regex;
use serde_json::{Number, Value};

use crate::core::schema::ScalarType;
use crate::core::types::{FailResult, Metadata, OnFailAction, ValidationResult};

/// A named unit of output policy.
pub trait Validator: Send + Sync + fmt::Debug {
    /// Stable identifier used in failure records and prompts.
    fn name(&self) -> &str;

    fn on_fail(&self) -> OnFailAction;

    fn validate(&self, value: Option<&Value>, metadata: &Metadata) -> ValidationResult;

    /// Short human description rendered into schema prompts.
    fn describe(&self) -> Option<String> {
        None
    }
}

/// Render a value for error messages (`<absent>` for missing values).
pub fn display_value(value: Option<&Value>) -> String {
    match value {
        None => "<absent>".to_string(),
        Some(Value::String(s)) => format!("'{s}'"),
        Some(other) => other.to_string(),
    }
}

/// Value must equal one of a fixed set of choices.
#[derive(Debug, Clone)]
pub struct ValidChoices {
    choices: Vec<Value>,
    on_fail: OnFailAction,
}

impl ValidChoices {
    pub fn new(choices: Vec<Value>) -> Self {
        Self {
            choices,
            on_fail: OnFailAction::Reask,
        }
    }

    pub fn with_on_fail(mut self, on_fail: OnFailAction) -> Self {
        self.on_fail = on_fail;
        self
    }
}

impl Validator for ValidChoices {
    fn name(&self) -> &str {
        "valid-choices"
    }

    fn on_fail(&self) -> OnFailAction {
        self.on_fail
    }

    fn validate(&self, value: Option<&Value>, _metadata: &Metadata) -> ValidationResult {
        match value {
            Some(v) if self.choices.contains(v) => ValidationResult::Pass,
            _ => ValidationResult::fail(format!(
                "Value {} is not in choices {}.",
                display_value(value),
                Value::Array(self.choices.clone())
            )),
        }
    }

    fn describe(&self) -> Option<String> {
        Some(format!(
            "one of {}",
            Value::Array(self.choices.clone())
        ))
    }
}

/// How [`RegexMatch`] applies its pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    /// Pattern may match anywhere in the string.
    Search,
    /// Pattern must match the whole string.
    FullMatch,
}

/// String value must match a regular expression.
#[derive(Debug, Clone)]
pub struct RegexMatch {
    regex: Regex,
    match_type: MatchType,
    on_fail: OnFailAction,
}

impl RegexMatch {
    pub fn new(pattern: &str, match_type: MatchType) -> Result<Self> {
        let anchored = match match_type {
            MatchType::Search => pattern.to_string(),
            MatchType::FullMatch => format!("^(?:{pattern})$"),
        };
        let regex =
            Regex::new(&anchored).map_err(|err| anyhow!("invalid regex '{pattern}': {err}"))?;
        Ok(Self {
            regex,
            match_type,
            on_fail: OnFailAction::Reask,
        })
    }

    pub fn with_on_fail(mut self, on_fail: OnFailAction) -> Self {
        self.on_fail = on_fail;
        self
    }
}

impl Validator for RegexMatch {
    fn name(&self) -> &str {
        "regex-match"
    }

    fn on_fail(&self) -> OnFailAction {
        self.on_fail
    }

    fn validate(&self, value: Option<&Value>, _metadata: &Metadata) -> ValidationResult {
        match value {
            Some(Value::String(s)) if self.regex.is_match(s) => ValidationResult::Pass,
            _ => ValidationResult::fail(format!(
                "Result must match {} (mode: {:?}), got {}.",
                self.regex.as_str(),
                self.match_type,
                display_value(value)
            )),
        }
    }

    fn describe(&self) -> Option<String> {
        Some(format!("matches {}", self.regex.as_str()))
    }
}

/// String or list length must fall within `[min, max]`.
///
/// Over-long values carry a truncated fix value.
#[derive(Debug, Clone)]
pub struct ValidLength {
    min: Option<usize>,
    max: Option<usize>,
    on_fail: OnFailAction,
}

impl ValidLength {
    pub fn new(min: Option<usize>, max: Option<usize>) -> Self {
        Self {
            min,
            max,
            on_fail: OnFailAction::Reask,
        }
    }

    pub fn with_on_fail(mut self, on_fail: OnFailAction) -> Self {
        self.on_fail = on_fail;
        self
    }

    fn truncated(value: &Value, max: usize) -> Option<Value> {
        match value {
            Value::String(s) => Some(Value::String(s.chars().take(max).collect())),
            Value::Array(items) => Some(Value::Array(items.iter().take(max).cloned().collect())),
            _ => None,
        }
    }
}

impl Validator for ValidLength {
    fn name(&self) -> &str {
        "length"
    }

    fn on_fail(&self) -> OnFailAction {
        self.on_fail
    }

    fn validate(&self, value: Option<&Value>, _metadata: &Metadata) -> ValidationResult {
        let len = match value {
            Some(Value::String(s)) => s.chars().count(),
            Some(Value::Array(items)) => items.len(),
            _ => {
                return ValidationResult::fail(format!(
                    "Value {} has no length.",
                    display_value(value)
                ));
            }
        };
        if let Some(min) = self.min
            && len < min
        {
            return ValidationResult::fail(format!(
                "Value has length {len}, please return a value with length at least {min}."
            ));
        }
        if let Some(max) = self.max
            && len > max
        {
            let mut fail = FailResult::new(format!(
                "Value has length {len}, please return a value with length at most {max}."
            ));
            if let Some(fix) = value.and_then(|v| Self::truncated(v, max)) {
                fail = fail.with_fix(fix);
            }
            return ValidationResult::Fail(fail);
        }
        ValidationResult::Pass
    }

    fn describe(&self) -> Option<String> {
        Some(format!(
            "length between {} and {}",
            self.min.map_or("0".to_string(), |m| m.to_string()),
            self.max.map_or("unbounded".to_string(), |m| m.to_string())
        ))
    }
}

/// Numeric value must fall within `[min, max]`; the fix clamps to the violated bound.
#[derive(Debug, Clone)]
pub struct ValidRange {
    min: Option<f64>,
    max: Option<f64>,
    on_fail: OnFailAction,
}

impl ValidRange {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            min,
            max,
            on_fail: OnFailAction::Reask,
        }
    }

    pub fn with_on_fail(mut self, on_fail: OnFailAction) -> Self {
        self.on_fail = on_fail;
        self
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

impl Validator for ValidRange {
    fn name(&self) -> &str {
        "valid-range"
    }

    fn on_fail(&self) -> OnFailAction {
        self.on_fail
    }

    fn validate(&self, value: Option<&Value>, _metadata: &Metadata) -> ValidationResult {
        let Some(n) = value.and_then(Value::as_f64) else {
            return ValidationResult::fail(format!(
                "Value {} is not a number.",
                display_value(value)
            ));
        };
        if let Some(min) = self.min
            && n < min
        {
            return ValidationResult::Fail(
                FailResult::new(format!("Value {n} is less than {min}.")).with_fix(number_value(min)),
            );
        }
        if let Some(max) = self.max
            && n > max
        {
            return ValidationResult::Fail(
                FailResult::new(format!("Value {n} is greater than {max}."))
                    .with_fix(number_value(max)),
            );
        }
        ValidationResult::Pass
    }

    fn describe(&self) -> Option<String> {
        Some(format!(
            "number in range [{}, {}]",
            self.min.map_or("-inf".to_string(), |m| m.to_string()),
            self.max.map_or("inf".to_string(), |m| m.to_string())
        ))
    }
}

/// Value must have a given scalar type (`is-integer`, `is-float`, ...).
///
/// A string that parses as the expected type fails with the parsed value as fix.
#[derive(Debug, Clone)]
pub struct IsType {
    expected: ScalarType,
    name: String,
    on_fail: OnFailAction,
}

impl IsType {
    pub fn new(expected: ScalarType) -> Self {
        Self {
            expected,
            name: format!("is-{}", expected.as_str()),
            on_fail: OnFailAction::Reask,
        }
    }

    pub fn with_on_fail(mut self, on_fail: OnFailAction) -> Self {
        self.on_fail = on_fail;
        self
    }
}

impl Validator for IsType {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_fail(&self) -> OnFailAction {
        self.on_fail
    }

    fn validate(&self, value: Option<&Value>, _metadata: &Metadata) -> ValidationResult {
        let Some(v) = value else {
            return ValidationResult::fail(format!("Expected {}, got <absent>.", self.expected));
        };
        if self.expected.matches(v) {
            return ValidationResult::Pass;
        }
        let fail = FailResult::new(format!("Expected {}, got {}.", self.expected, display_value(value)));
        match self.expected.coerce(v).filter(|coerced| self.expected.matches(coerced)) {
            Some(fix) => ValidationResult::Fail(fail.with_fix(fix)),
            None => ValidationResult::Fail(fail),
        }
    }

    fn describe(&self) -> Option<String> {
        Some(format!("must be {}", self.expected))
    }
}

/// Value must be present and non-null.
#[derive(Debug, Clone)]
pub struct Required {
    on_fail: OnFailAction,
}

impl Required {
    pub fn new() -> Self {
        Self {
            on_fail: OnFailAction::Reask,
        }
    }

    pub fn with_on_fail(mut self, on_fail: OnFailAction) -> Self {
        self.on_fail = on_fail;
        self
    }
}

impl Default for Required {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator for Required {
    fn name(&self) -> &str {
        "required"
    }

    fn on_fail(&self) -> OnFailAction {
        self.on_fail
    }

    fn validate(&self, value: Option<&Value>, _metadata: &Metadata) -> ValidationResult {
        match value {
            None | Some(Value::Null) => ValidationResult::fail("Value is required but missing."),
            Some(_) => ValidationResult::Pass,
        }
    }
}

/// Value must satisfy a JSON Schema fragment.
pub struct JsonSchemaConstraint {
    schema: Value,
    compiled: jsonschema::Validator,
    on_fail: OnFailAction,
}

impl JsonSchemaConstraint {
    pub fn new(schema: Value) -> Result<Self> {
        let compiled = jsonschema::validator_for(&schema)
            .map_err(|err| anyhow!("invalid schema constraint: {err}"))?;
        Ok(Self {
            schema,
            compiled,
            on_fail: OnFailAction::Reask,
        })
    }

    pub fn with_on_fail(mut self, on_fail: OnFailAction) -> Self {
        self.on_fail = on_fail;
        self
    }
}

impl fmt::Debug for JsonSchemaConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonSchemaConstraint")
            .field("schema", &self.schema)
            .field("on_fail", &self.on_fail)
            .finish()
    }
}

impl Validator for JsonSchemaConstraint {
    fn name(&self) -> &str {
        "json-schema"
    }

    fn on_fail(&self) -> OnFailAction {
        self.on_fail
    }

    fn validate(&self, value: Option<&Value>, _metadata: &Metadata) -> ValidationResult {
        let instance = value.cloned().unwrap_or(Value::Null);
        if self.compiled.is_valid(&instance) {
            return ValidationResult::Pass;
        }
        let messages = self
            .compiled
            .iter_errors(&instance)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        ValidationResult::fail(messages.join("; "))
    }

    fn describe(&self) -> Option<String> {
        Some(format!("satisfies {}", self.schema))
    }
}

type ValidateFn = dyn Fn(Option<&Value>, &Metadata) -> ValidationResult + Send + Sync;

/// Closure-backed validator for one-off policies.
#[derive(Clone)]
pub struct FnValidator {
    name: String,
    on_fail: OnFailAction,
    func: Arc<ValidateFn>,
}

impl FnValidator {
    pub fn new(
        name: impl Into<String>,
        on_fail: OnFailAction,
        func: impl Fn(Option<&Value>, &Metadata) -> ValidationResult + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            on_fail,
            func: Arc::new(func),
        }
    }
}

impl fmt::Debug for FnValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnValidator")
            .field("name", &self.name)
            .field("on_fail", &self.on_fail)
            .finish()
    }
}

impl Validator for FnValidator {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_fail(&self) -> OnFailAction {
        self.on_fail
    }

    fn validate(&self, value: Option<&Value>, metadata: &Metadata) -> ValidationResult {
        (self.func)(value, metadata)
    }
}
