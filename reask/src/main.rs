//! Validation-and-reask CLI.
//!
//! `check` validates an output produced elsewhere; `run` asks the configured
//! command model and reasks until the output passes or reasks run out.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use reask::exit_codes;
use reask::io::config::{GuardConfig, load_config};
use reask::io::schema_source::from_json_schema;
use reask::{CallOptions, Guard, ValidationOutcome, logging};

const DEFAULT_CONFIG: &str = "reask.toml";

#[derive(Parser)]
#[command(
    name = "reask",
    version,
    about = "Validate language model output and reask until it conforms"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse and validate a known model output (no reasks).
    Check {
        /// JSON Schema describing the expected output.
        #[arg(long)]
        schema: PathBuf,
        /// File holding the raw model output.
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
    /// Call the configured command model and reask on validation failures.
    Run {
        #[arg(long)]
        schema: PathBuf,
        /// File holding the prompt template.
        #[arg(long)]
        prompt: PathBuf,
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        /// Overrides `num_reasks` from the config.
        #[arg(long)]
        num_reasks: Option<u32>,
        #[arg(long)]
        full_schema_reask: bool,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::FATAL
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Check {
            schema,
            output,
            config,
        } => cmd_check(&schema, &output, &config),
        Command::Run {
            schema,
            prompt,
            config,
            num_reasks,
            full_schema_reask,
        } => cmd_run(&schema, &prompt, &config, num_reasks, full_schema_reask),
    }
}

fn cmd_check(schema_path: &Path, output_path: &Path, config_path: &Path) -> Result<i32> {
    let config = load_config(config_path)?;
    let guard = load_guard(schema_path, &config)?;
    let raw = fs::read_to_string(output_path)
        .with_context(|| format!("read {}", output_path.display()))?;
    let outcome = guard.parse(&raw, CallOptions::default())?;
    report(&outcome)
}

fn cmd_run(
    schema_path: &Path,
    prompt_path: &Path,
    config_path: &Path,
    num_reasks: Option<u32>,
    full_schema_reask: bool,
) -> Result<i32> {
    let config = load_config(config_path)?;
    let model = config.command_model()?;
    let mut guard = load_guard(schema_path, &config)?;
    if full_schema_reask {
        guard = guard.with_full_schema_reask(true);
    }
    let prompt = fs::read_to_string(prompt_path)
        .with_context(|| format!("read {}", prompt_path.display()))?;
    let mut opts = CallOptions::default().prompt(prompt);
    if let Some(num_reasks) = num_reasks {
        opts = opts.num_reasks(num_reasks);
    }
    let outcome = guard.call(&model, opts)?;
    report(&outcome)
}

fn load_guard(schema_path: &Path, config: &GuardConfig) -> Result<Guard> {
    let raw = fs::read_to_string(schema_path)
        .with_context(|| format!("read {}", schema_path.display()))?;
    let schema: Value = serde_json::from_str(&raw).context("parse schema json")?;
    Guard::from_config(from_json_schema(&schema)?, config)
}

/// Print the outcome as JSON and map it to an exit code.
fn report(outcome: &ValidationOutcome) -> Result<i32> {
    let payload = serde_json::to_string_pretty(outcome).context("serialize outcome")?;
    println!("{payload}");
    Ok(if outcome.validation_passed {
        exit_codes::OK
    } else {
        exit_codes::VALIDATION_FAILED
    })
}
