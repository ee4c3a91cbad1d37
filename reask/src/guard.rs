//! Caller-facing facade.
//!
//! A [`Guard`] owns an output schema, the reask settings and the call
//! history. Each invocation gets its own [`CallContext`]; one guard can
//! serve many concurrent invocations.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use serde_json::{Map, Value};

use crate::context::CallContext;
use crate::core::history::{CallInputs, History, ValidationOutcome};
use crate::core::schema::SchemaNode;
use crate::core::types::{Message, Metadata, ModelRequest, ParseFailureAction};
use crate::core::validator::Validator;
use crate::error::ReaskError;
use crate::io::config::GuardConfig;
use crate::io::model::{AsyncModel, Model};
use crate::io::prompt::PromptEngine;
use crate::io::remote::{RemoteRequest, RemoteValidation, run_remote};
use crate::io::schema_source;
use crate::runner::{GuardSettings, InputTarget, InputValidators, RunRequest, Runner};

/// Per-invocation overrides.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub prompt: Option<String>,
    pub instructions: Option<String>,
    pub msg_history: Option<Vec<Message>>,
    pub prompt_params: Map<String, Value>,
    pub num_reasks: Option<u32>,
    pub full_schema_reask: Option<bool>,
    pub metadata: Metadata,
    /// Forwarded to the model on every attempt.
    pub kwargs: Map<String, Value>,
}

impl CallOptions {
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn msg_history(mut self, messages: Vec<Message>) -> Self {
        self.msg_history = Some(messages);
        self
    }

    pub fn prompt_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.prompt_params.insert(key.into(), value.into());
        self
    }

    pub fn num_reasks(mut self, num_reasks: u32) -> Self {
        self.num_reasks = Some(num_reasks);
        self
    }

    pub fn full_schema_reask(mut self, full: bool) -> Self {
        self.full_schema_reask = Some(full);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }
}

/// Stands in for the model when only supplied output is validated.
struct NoModel;

impl Model for NoModel {
    fn complete(&self, _request: &ModelRequest) -> Result<String> {
        Err(anyhow!("no model available for reask"))
    }
}

#[derive(Clone)]
pub struct Guard {
    schema: SchemaNode,
    prompt: Option<String>,
    instructions: Option<String>,
    msg_history: Vec<Message>,
    settings: GuardSettings,
    prompts: PromptEngine,
    inputs: InputValidators,
    history: History,
    remote: Option<Arc<dyn RemoteValidation>>,
}

impl Guard {
    /// Guard for a structured output; fails on a malformed schema tree.
    pub fn new(schema: SchemaNode) -> Result<Self> {
        let root = schema
            .into_root()
            .map_err(|errors| ReaskError::Schema(errors.join("; ")))?;
        Ok(Self::with_root(root))
    }

    /// Guard whose output is plain text.
    pub fn for_string() -> Self {
        Self::with_root(SchemaNode::string())
    }

    pub fn from_json_schema(schema: &Value) -> Result<Self> {
        Ok(Self::with_root(schema_source::from_json_schema(schema)?))
    }

    /// Apply the file-level settings of `config`.
    pub fn from_config(schema: SchemaNode, config: &GuardConfig) -> Result<Self> {
        config.validate()?;
        let mut guard = Self::new(schema)?
            .with_num_reasks(config.num_reasks)
            .with_full_schema_reask(config.full_schema_reask)
            .with_parse_failure_action(config.parse_failure_action)
            .with_history_limit(config.history_limit);
        guard.settings.call_log_dir = config.call_log_dir.clone();
        Ok(guard)
    }

    fn with_root(schema: SchemaNode) -> Self {
        Self {
            schema,
            prompt: None,
            instructions: None,
            msg_history: Vec::new(),
            settings: GuardSettings {
                num_reasks: 1,
                full_schema_reask: false,
                parse_failure_action: ParseFailureAction::Reask,
                call_log_dir: None,
            },
            prompts: PromptEngine::new(),
            inputs: InputValidators::default(),
            history: History::default(),
            remote: None,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_msg_history(mut self, messages: Vec<Message>) -> Self {
        self.msg_history = messages;
        self
    }

    pub fn with_num_reasks(mut self, num_reasks: u32) -> Self {
        self.settings.num_reasks = num_reasks;
        self
    }

    pub fn with_full_schema_reask(mut self, full: bool) -> Self {
        self.settings.full_schema_reask = full;
        self
    }

    pub fn with_parse_failure_action(mut self, action: ParseFailureAction) -> Self {
        self.settings.parse_failure_action = action;
        self
    }

    /// Override the minijinja template of reask prompts.
    pub fn with_reask_prompt(mut self, template: impl Into<String>) -> Self {
        self.prompts = self.prompts.with_reask_prompt(template);
        self
    }

    pub fn with_reask_instructions(mut self, template: impl Into<String>) -> Self {
        self.prompts = self.prompts.with_reask_instructions(template);
        self
    }

    /// Keep at most `limit` finished calls; 0 keeps all. Starts a fresh history.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history = History::new(limit);
        self
    }

    pub fn with_call_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.settings.call_log_dir = Some(dir.into());
        self
    }

    /// Run invocations through `remote` instead of the local loop.
    pub fn with_remote(mut self, remote: Arc<dyn RemoteValidation>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Attach a validator to the output root.
    pub fn use_validator(mut self, validator: impl Validator + 'static) -> Self {
        self.schema.validators.push(Arc::new(validator));
        self
    }

    pub fn use_many(mut self, validators: impl IntoIterator<Item = Arc<dyn Validator>>) -> Self {
        self.schema.validators.extend(validators);
        self
    }

    /// Attach a validator to one of the call inputs.
    pub fn use_on(mut self, target: InputTarget, validator: impl Validator + 'static) -> Self {
        self.inputs.add(target, Arc::new(validator));
        self
    }

    pub fn schema(&self) -> &SchemaNode {
        &self.schema
    }

    /// Every finished call of this guard, most recent last.
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Call `model`, validate, and reask until the output passes or reasks run out.
    pub fn call<M: Model>(&self, model: &M, opts: CallOptions) -> Result<ValidationOutcome> {
        self.run_blocking(Some(model), None, opts)
    }

    pub async fn call_async<M: AsyncModel>(
        &self,
        model: &M,
        opts: CallOptions,
    ) -> Result<ValidationOutcome> {
        self.run_nonblocking(Some(model), None, opts).await
    }

    /// Validate output produced elsewhere; no reasks are possible.
    pub fn parse(&self, llm_output: &str, opts: CallOptions) -> Result<ValidationOutcome> {
        self.run_blocking(None::<&NoModel>, Some(llm_output), opts)
    }

    /// Validate output produced elsewhere, reasking `model` when it fails.
    pub fn parse_with<M: Model>(
        &self,
        llm_output: &str,
        model: &M,
        opts: CallOptions,
    ) -> Result<ValidationOutcome> {
        self.run_blocking(Some(model), Some(llm_output), opts)
    }

    pub async fn parse_async<M: AsyncModel>(
        &self,
        llm_output: &str,
        model: &M,
        opts: CallOptions,
    ) -> Result<ValidationOutcome> {
        self.run_nonblocking(Some(model), Some(llm_output), opts).await
    }

    /// Shorthand for [`Guard::parse`] with default options.
    pub fn validate(&self, llm_output: &str) -> Result<ValidationOutcome> {
        self.parse(llm_output, CallOptions::default())
    }

    fn run_blocking<M: Model>(
        &self,
        model: Option<&M>,
        llm_output: Option<&str>,
        opts: CallOptions,
    ) -> Result<ValidationOutcome> {
        let (settings, request, ctx) = self.prepare(opts, llm_output, model.is_some());
        if let Some(remote) = &self.remote {
            return self.run_remote(remote.as_ref(), &settings, &request, &ctx);
        }
        self.runner(settings).run(model, request, &ctx)
    }

    async fn run_nonblocking<M: AsyncModel>(
        &self,
        model: Option<&M>,
        llm_output: Option<&str>,
        opts: CallOptions,
    ) -> Result<ValidationOutcome> {
        let (settings, request, ctx) = self.prepare(opts, llm_output, model.is_some());
        if let Some(remote) = &self.remote {
            return self.run_remote(remote.as_ref(), &settings, &request, &ctx);
        }
        self.runner(settings).run_async(model, request, &ctx).await
    }

    fn runner(&self, settings: GuardSettings) -> Runner<'_> {
        Runner {
            schema: &self.schema,
            prompts: &self.prompts,
            inputs: &self.inputs,
            history: &self.history,
            settings,
        }
    }

    fn prepare(
        &self,
        opts: CallOptions,
        llm_output: Option<&str>,
        has_model: bool,
    ) -> (GuardSettings, RunRequest, CallContext) {
        let mut settings = self.settings.clone();
        if let Some(num_reasks) = opts.num_reasks {
            settings.num_reasks = num_reasks;
        }
        if let Some(full) = opts.full_schema_reask {
            settings.full_schema_reask = full;
        }
        let effective_reasks = if has_model { settings.num_reasks } else { 0 };
        let ctx = CallContext::new(opts.kwargs, opts.metadata, effective_reasks);
        let request = RunRequest {
            prompt: opts.prompt.or_else(|| self.prompt.clone()),
            instructions: opts.instructions.or_else(|| self.instructions.clone()),
            msg_history: opts.msg_history.unwrap_or_else(|| self.msg_history.clone()),
            prompt_params: opts.prompt_params,
            llm_output: llm_output.map(str::to_string),
        };
        (settings, request, ctx)
    }

    fn run_remote(
        &self,
        remote: &dyn RemoteValidation,
        settings: &GuardSettings,
        request: &RunRequest,
        ctx: &CallContext,
    ) -> Result<ValidationOutcome> {
        let remote_request = RemoteRequest {
            call_id: ctx.call_id.clone(),
            output_schema: self.schema.to_prompt_schema(),
            prompt: request.prompt.clone(),
            instructions: request.instructions.clone(),
            msg_history: request.msg_history.clone(),
            prompt_params: request.prompt_params.clone(),
            llm_output: request.llm_output.clone(),
            num_reasks: settings.num_reasks,
            full_schema_reask: settings.full_schema_reask,
            metadata: ctx.metadata.clone(),
            kwargs: ctx.kwargs.clone(),
        };
        let inputs = CallInputs {
            prompt: request.prompt.clone(),
            instructions: request.instructions.clone(),
            msg_history: request.msg_history.clone(),
            prompt_params: request.prompt_params.clone(),
            num_reasks: settings.num_reasks,
            full_schema_reask: settings.full_schema_reask,
            metadata: ctx.metadata.clone(),
            model: Some("remote".to_string()),
        };
        run_remote(remote, &remote_request, inputs, &self.history, ctx)
    }
}
