//! Fatal error taxonomy.
//!
//! Everything else propagates as `anyhow::Error` with context; these variants
//! exist so callers can tell configuration problems and `exception` validators
//! apart with `downcast_ref::<ReaskError>()`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReaskError {
    #[error("no prompt and no message history: provide a prompt or a non-empty msg_history")]
    MissingPrompt,

    #[error("invalid output schema: {0}")]
    Schema(String),

    #[error("validation failed for {path}: validator '{validator}' raised: {message}")]
    Validator {
        path: String,
        validator: String,
        message: String,
    },

    #[error("{target} validation failed: {message}")]
    InputValidation { target: String, message: String },

    #[error("could not parse model output: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validator_error_names_path_and_validator() {
        let err = ReaskError::Validator {
            path: "$.age".to_string(),
            validator: "is-integer".to_string(),
            message: "not an integer".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("$.age"));
        assert!(rendered.contains("is-integer"));
    }

    #[test]
    fn downcasts_through_anyhow() {
        let err: anyhow::Error = ReaskError::MissingPrompt.into();
        assert_eq!(
            err.downcast_ref::<ReaskError>(),
            Some(&ReaskError::MissingPrompt)
        );
    }
}
