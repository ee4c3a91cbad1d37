//! Shared deterministic types for the validation core.
//!
//! These types define stable contracts between the executor, the reask
//! assembler and the runner. They do not depend on I/O.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form metadata handed to every validator of a call.
pub type Metadata = Map<String, Value>;

/// Remediation applied when a validator reports failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailAction {
    /// Wrap the value in a reask placeholder and ask the model again.
    Reask,
    /// Substitute the validator's fix value.
    Fix,
    /// Drop the value (object key or list element).
    Filter,
    /// Produce no output for the whole document.
    Refrain,
    /// Abort the call.
    Exception,
    /// Keep the value, record the failure only.
    Noop,
    /// Fix when the fixed value re-validates cleanly, otherwise reask.
    FixReask,
}

impl OnFailAction {
    /// Rank used to pick one remediation when several validators fail the same node.
    ///
    /// `exception > refrain > filter > fix/fix_reask > reask > noop`.
    pub fn precedence(self) -> u8 {
        match self {
            OnFailAction::Exception => 5,
            OnFailAction::Refrain => 4,
            OnFailAction::Filter => 3,
            OnFailAction::Fix | OnFailAction::FixReask => 2,
            OnFailAction::Reask => 1,
            OnFailAction::Noop => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OnFailAction::Reask => "reask",
            OnFailAction::Fix => "fix",
            OnFailAction::Filter => "filter",
            OnFailAction::Refrain => "refrain",
            OnFailAction::Exception => "exception",
            OnFailAction::Noop => "noop",
            OnFailAction::FixReask => "fix_reask",
        }
    }
}

impl fmt::Display for OnFailAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remediation for model output that cannot be parsed at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseFailureAction {
    /// Ask for the whole document again.
    #[default]
    Reask,
    /// Abort the call.
    Exception,
}

/// Failure reported by a validator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailResult {
    pub error_message: String,
    /// Alternative value the executor may substitute.
    pub fix_value: Option<Value>,
}

impl FailResult {
    pub fn new(error_message: impl Into<String>) -> Self {
        Self {
            error_message: error_message.into(),
            fix_value: None,
        }
    }

    pub fn with_fix(mut self, fix_value: Value) -> Self {
        self.fix_value = Some(fix_value);
        self
    }
}

/// Outcome of one validator on one value.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    Pass,
    Fail(FailResult),
}

impl ValidationResult {
    pub fn fail(error_message: impl Into<String>) -> Self {
        ValidationResult::Fail(FailResult::new(error_message))
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, ValidationResult::Pass)
    }
}

/// Chat role for message-history entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Exact request handed to the model collaborator for one iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModelRequest {
    pub prompt: Option<String>,
    pub instructions: Option<String>,
    pub msg_history: Vec<Message>,
    /// Per-call keyword overrides forwarded to the transport untouched.
    pub kwargs: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_orders_actions() {
        let mut actions = vec![
            OnFailAction::Noop,
            OnFailAction::Fix,
            OnFailAction::Exception,
            OnFailAction::Reask,
            OnFailAction::Filter,
            OnFailAction::Refrain,
        ];
        actions.sort_by_key(|action| std::cmp::Reverse(action.precedence()));
        assert_eq!(
            actions,
            vec![
                OnFailAction::Exception,
                OnFailAction::Refrain,
                OnFailAction::Filter,
                OnFailAction::Fix,
                OnFailAction::Reask,
                OnFailAction::Noop,
            ]
        );
        assert_eq!(
            OnFailAction::Fix.precedence(),
            OnFailAction::FixReask.precedence()
        );
    }

    #[test]
    fn actions_deserialize_from_snake_case() {
        let action: OnFailAction = serde_json::from_str("\"fix_reask\"").expect("parse");
        assert_eq!(action, OnFailAction::FixReask);
        assert_eq!(action.to_string(), "fix_reask");
    }
}
