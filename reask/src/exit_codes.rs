//! Stable exit codes for `reask` CLI commands.

/// Output parsed and passed validation.
pub const OK: i32 = 0;
/// The call completed but validation did not pass (unresolved reasks or refrain).
pub const VALIDATION_FAILED: i32 = 1;
/// Invalid config/schema, an `exception` validator, or a model transport error.
pub const FATAL: i32 = 2;
