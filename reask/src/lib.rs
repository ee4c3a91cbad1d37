//! Validation-and-reask engine for language model output.
//!
//! A [`Guard`] asks a model for output shaped by a schema tree, validates
//! the parsed document field by field, and when validation fails builds a
//! corrective follow-up request and retries, up to a bounded number of
//! attempts. The architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (schema, validators, executor,
//!   reask planning, call records). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (model transports, prompt
//!   rendering, config, schema sources, remote validation, call logs).
//!
//! Orchestration modules ([`runner`], [`async_runner`], [`guard`]) drive core
//! logic through the collaborators.

pub mod async_runner;
pub mod context;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod guard;
pub mod io;
pub mod logging;
pub mod runner;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use crate::core::history::{Call, CallStatus, History, ValidationOutcome};
pub use crate::core::schema::{ScalarType, SchemaField, SchemaNode};
pub use crate::core::tree::{ReAsk, Validated};
pub use crate::core::types::{Message, ModelRequest, OnFailAction, Role};
pub use crate::error::ReaskError;
pub use crate::guard::{CallOptions, Guard};
pub use crate::io::model::{AsyncModel, Model};
pub use crate::runner::InputTarget;
