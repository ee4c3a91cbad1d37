//! Call logs written below the configured `call_log_dir`.
//!
//! Layout: `<dir>/<call_id>/meta.json` plus one numbered directory per
//! attempt holding the prompt, raw output, validated tree and failures.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::history::{Call, CallInputs, CallStatus, Iteration};
use crate::io::model::render_request;

#[derive(Debug, Clone, Serialize)]
struct CallMeta<'a> {
    id: &'a str,
    status: CallStatus,
    error: Option<&'a str>,
    iterations: usize,
    inputs: &'a CallInputs,
}

#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub prompt_path: PathBuf,
    pub raw_output_path: PathBuf,
    pub validated_path: PathBuf,
    pub failures_path: PathBuf,
}

impl IterationPaths {
    pub fn new(call_dir: &Path, index: u32) -> Self {
        let dir = call_dir.join(index.to_string());
        Self {
            dir: dir.clone(),
            prompt_path: dir.join("prompt.txt"),
            raw_output_path: dir.join("raw_output.txt"),
            validated_path: dir.join("validated.json"),
            failures_path: dir.join("failures.json"),
        }
    }
}

/// Write the full record of a finished call; returns the call directory.
pub fn write_call(dir: &Path, call: &Call) -> Result<PathBuf> {
    let call_dir = dir.join(&call.id);
    fs::create_dir_all(&call_dir)
        .with_context(|| format!("create call log dir {}", call_dir.display()))?;

    write_json(
        &call_dir.join("meta.json"),
        &CallMeta {
            id: &call.id,
            status: call.status,
            error: call.error.as_deref(),
            iterations: call.iterations.len(),
            inputs: &call.inputs,
        },
    )?;
    for iteration in &call.iterations {
        write_iteration(&call_dir, iteration)?;
    }
    Ok(call_dir)
}

fn write_iteration(call_dir: &Path, iteration: &Iteration) -> Result<IterationPaths> {
    let paths = IterationPaths::new(call_dir, iteration.index);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create iteration dir {}", paths.dir.display()))?;

    // Write in deterministic order to keep logs stable.
    write_text(&paths.prompt_path, &render_request(&iteration.inputs.request))?;
    if let Some(raw) = &iteration.raw_output {
        write_text(&paths.raw_output_path, raw)?;
    }
    if let Some(validation) = &iteration.validation {
        write_json(&paths.validated_path, &validation.value)?;
        write_json(&paths.failures_path, &validation.failures)?;
    }
    Ok(paths)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::executor::ValidationResponse;
    use crate::core::history::IterationInputs;
    use crate::core::output::ParseFailure;
    use crate::core::types::ModelRequest;

    #[test]
    fn iteration_paths_are_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = IterationPaths::new(&temp.path().join("call-1"), 2);
        assert!(paths.dir.ends_with(Path::new("call-1/2")));
        assert!(paths.prompt_path.ends_with("prompt.txt"));
        assert!(paths.raw_output_path.ends_with("raw_output.txt"));
        assert!(paths.validated_path.ends_with("validated.json"));
        assert!(paths.failures_path.ends_with("failures.json"));
    }

    #[test]
    fn writes_meta_and_iterations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut call = Call::new("call-7", CallInputs::default());
        call.status = CallStatus::Fail;
        let mut iteration = Iteration::new(
            1,
            IterationInputs {
                request: ModelRequest {
                    prompt: Some("hello".to_string()),
                    ..ModelRequest::default()
                },
                reask_scope: None,
                reask_paths: Vec::new(),
                supplied_output: false,
            },
        );
        iteration.raw_output = Some("not json".to_string());
        iteration.validation = Some(ValidationResponse::parse_failure(&ParseFailure {
            raw: "not json".to_string(),
            error: "no valid JSON found in output".to_string(),
        }));
        call.iterations.push(iteration);

        let call_dir = write_call(temp.path(), &call).expect("write call");
        let meta = fs::read_to_string(call_dir.join("meta.json")).expect("meta");
        assert!(meta.contains("\"status\": \"fail\""));
        let paths = IterationPaths::new(&call_dir, 1);
        assert_eq!(fs::read_to_string(&paths.prompt_path).expect("prompt"), "hello");
        assert!(paths.raw_output_path.is_file());
        let validated = fs::read_to_string(&paths.validated_path).expect("validated");
        assert!(validated.contains("$reask"));
        assert!(paths.failures_path.is_file());
    }
}
