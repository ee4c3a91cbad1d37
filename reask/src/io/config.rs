//! Guard configuration stored as TOML (default `reask.toml`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::types::ParseFailureAction;
use crate::error::ReaskError;
use crate::io::model::CommandModel;

/// Guard configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to the values a
/// guard built in code would use.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GuardConfig {
    /// Corrective attempts after the first model call.
    pub num_reasks: u32,

    /// Regenerate the whole document on every reask instead of failing paths only.
    pub full_schema_reask: bool,

    pub parse_failure_action: ParseFailureAction,

    /// Keep at most this many calls in memory; 0 keeps everything.
    pub history_limit: usize,

    /// Write per-call logs below this directory when set.
    pub call_log_dir: Option<PathBuf>,

    pub model: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Command that reads the request on stdin and prints the completion
    /// (e.g. `["llm","-m","gpt-4o-mini"]`).
    pub command: Vec<String>,

    /// Wall-clock budget for one model call in seconds.
    pub timeout_secs: u64,

    /// Discard model stdout beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            command: vec!["llm".to_string()],
            timeout_secs: 120,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            num_reasks: 1,
            full_schema_reask: false,
            parse_failure_action: ParseFailureAction::Reask,
            history_limit: 0,
            call_log_dir: None,
            model: ModelConfig::default(),
        }
    }
}

impl GuardConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.timeout_secs == 0 {
            return Err(ReaskError::Config("model.timeout_secs must be > 0".to_string()).into());
        }
        if self.model.output_limit_bytes == 0 {
            return Err(
                ReaskError::Config("model.output_limit_bytes must be > 0".to_string()).into(),
            );
        }
        if self.model.command.is_empty() || self.model.command[0].trim().is_empty() {
            return Err(
                ReaskError::Config("model.command must be a non-empty array".to_string()).into(),
            );
        }
        Ok(())
    }

    pub fn command_model(&self) -> Result<CommandModel> {
        CommandModel::new(
            self.model.command.clone(),
            Duration::from_secs(self.model.timeout_secs),
            self.model.output_limit_bytes,
        )
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `GuardConfig::default()`.
pub fn load_config(path: &Path) -> Result<GuardConfig> {
    if !path.exists() {
        let cfg = GuardConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: GuardConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &GuardConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, GuardConfig::default());
        assert_eq!(cfg.num_reasks, 1);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("reask.toml");
        let cfg = GuardConfig {
            num_reasks: 3,
            full_schema_reask: true,
            parse_failure_action: ParseFailureAction::Exception,
            call_log_dir: Some(PathBuf::from("logs")),
            ..GuardConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("reask.toml");
        fs::write(&path, "num_reasks = 0\n[model]\ncommand = [\"cat\"]\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.num_reasks, 0);
        assert_eq!(cfg.model.command, vec!["cat".to_string()]);
        assert_eq!(cfg.model.timeout_secs, 120);
    }

    #[test]
    fn zero_timeout_is_a_config_error() {
        let cfg = GuardConfig {
            model: ModelConfig {
                timeout_secs: 0,
                ..ModelConfig::default()
            },
            ..GuardConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ReaskError>(),
            Some(ReaskError::Config(_))
        ));
    }
}
