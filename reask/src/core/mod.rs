//! Deterministic, pure logic shared by the runners.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod executor;
pub mod history;
pub mod output;
pub mod path;
pub mod reask;
pub mod schema;
pub mod tree;
pub mod types;
pub mod validator;
