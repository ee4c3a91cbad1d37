//! Side-effecting collaborators: model transports, prompt rendering,
//! configuration, schema sources, remote validation and call logs.

pub mod call_log;
pub mod config;
pub mod model;
pub mod process;
pub mod prompt;
pub mod remote;
pub mod schema_source;
