//! Iteration loop: call the model, parse, validate, reask.
//!
//! The blocking [`Runner::run`] and the async `Runner::run_async` share one
//! [`Driver`]; they differ only in how the Calling step waits for the model.
//! Iterations of one call are strictly sequential because each reask is built
//! from the previous attempt.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, anyhow};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::context::CallContext;
use crate::core::executor::{self, ValidationResponse};
use crate::core::history::{
    Call, CallInputs, CallStatus, History, Iteration, IterationInputs, ValidationOutcome,
};
use crate::core::output::{ParsedOutput, parse_output, parse_reask_answer};
use crate::core::path::JsonPath;
use crate::core::reask::{ReaskScope, apply_partial_answer};
use crate::core::schema::SchemaNode;
use crate::core::tree::{ReAskKind, Validated};
use crate::core::types::{Message, Metadata, ModelRequest, ParseFailureAction};
use crate::core::validator::Validator;
use crate::error::ReaskError;
use crate::io::call_log;
use crate::io::model::Model;
use crate::io::prompt::{PromptEngine, build_next_request, format_prompt};

/// Runner lifecycle; transitions are logged at `debug`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Initializing,
    Calling,
    Parsing,
    Validating,
    Reasking,
    Done,
    Failed,
}

/// Call input that may carry its own validators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputTarget {
    Prompt,
    Instructions,
    MsgHistory,
}

impl fmt::Display for InputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InputTarget::Prompt => "prompt",
            InputTarget::Instructions => "instructions",
            InputTarget::MsgHistory => "msg_history",
        })
    }
}

/// Validators applied to the call inputs before the first model call.
///
/// A fix rewrites the input; any other unresolved failure is fatal, since
/// inputs are never reasked.
#[derive(Debug, Clone, Default)]
pub struct InputValidators {
    prompt: Vec<Arc<dyn Validator>>,
    instructions: Vec<Arc<dyn Validator>>,
    msg_history: Vec<Arc<dyn Validator>>,
}

impl InputValidators {
    pub fn add(&mut self, target: InputTarget, validator: Arc<dyn Validator>) {
        match target {
            InputTarget::Prompt => self.prompt.push(validator),
            InputTarget::Instructions => self.instructions.push(validator),
            InputTarget::MsgHistory => self.msg_history.push(validator),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prompt.is_empty() && self.instructions.is_empty() && self.msg_history.is_empty()
    }

    fn check(
        &self,
        target: InputTarget,
        text: &str,
        metadata: &Metadata,
    ) -> Result<String> {
        let validators = match target {
            InputTarget::Prompt => &self.prompt,
            InputTarget::Instructions => &self.instructions,
            InputTarget::MsgHistory => &self.msg_history,
        };
        if validators.is_empty() {
            return Ok(text.to_string());
        }
        let mut node = SchemaNode::string();
        node.validators = validators.clone();
        let input = Value::String(text.to_string());
        let (validated, failures) =
            executor::validate_at(Some(&input), &node, JsonPath::root(), metadata)?;
        match validated {
            Some(Validated::Value(Value::String(fixed))) => Ok(fixed),
            Some(Validated::Value(other)) => Ok(other.to_string()),
            _ => {
                let message = failures
                    .iter()
                    .map(|failure| failure.result.error_message.as_str())
                    .collect::<Vec<_>>()
                    .join("; ");
                Err(ReaskError::InputValidation {
                    target: target.to_string(),
                    message,
                }
                .into())
            }
        }
    }
}

/// Guard-level settings for one run.
#[derive(Debug, Clone)]
pub struct GuardSettings {
    pub num_reasks: u32,
    pub full_schema_reask: bool,
    pub parse_failure_action: ParseFailureAction,
    pub call_log_dir: Option<PathBuf>,
}

/// What the caller asked for in one invocation.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub prompt: Option<String>,
    pub instructions: Option<String>,
    pub msg_history: Vec<Message>,
    pub prompt_params: Map<String, Value>,
    /// Output supplied by the caller; the first attempt skips the model.
    pub llm_output: Option<String>,
}

/// Borrowed view of everything a run needs.
pub struct Runner<'a> {
    pub schema: &'a SchemaNode,
    pub prompts: &'a PromptEngine,
    pub inputs: &'a InputValidators,
    pub history: &'a History,
    pub settings: GuardSettings,
}

impl Runner<'_> {
    /// Run one invocation, blocking on the model for every attempt.
    ///
    /// Without a model only caller-supplied output is validated and no reask
    /// is possible.
    pub fn run<M: Model>(
        &self,
        model: Option<&M>,
        request: RunRequest,
        ctx: &CallContext,
    ) -> Result<ValidationOutcome> {
        let _entered = ctx.span.enter();
        let mut driver = Driver::begin(self, request, ctx, model.map(|m| m.name().to_string()))?;
        loop {
            match driver.step() {
                Step::Done => break,
                Step::Supplied(raw) => driver.record_output(raw)?,
                Step::Call(request) => {
                    let raw = match model {
                        Some(model) => model.complete(&request),
                        None => Err(anyhow!("no model available for reask")),
                    };
                    match raw {
                        Ok(raw) => driver.record_output(raw)?,
                        Err(err) => return Err(driver.fail(err)),
                    }
                }
            }
        }
        driver.finish()
    }
}

/// Next action the caller of a [`Driver`] must take.
pub(crate) enum Step {
    Call(ModelRequest),
    Supplied(String),
    Done,
}

struct Pending {
    request: ModelRequest,
    scope: Option<ReaskScope>,
    paths: Vec<JsonPath>,
    supplied: Option<String>,
}

/// Owns the in-flight [`Call`] and pushes it to history exactly once.
///
/// Dropping the recorder before the call finished records it as cancelled,
/// keeping the attempts made so far.
struct CallRecorder<'a> {
    call: Option<Call>,
    history: &'a History,
    log_dir: Option<PathBuf>,
}

impl CallRecorder<'_> {
    fn current_iteration(&mut self) -> Option<&mut Iteration> {
        self.call.as_mut().and_then(|call| call.iterations.last_mut())
    }

    fn finish(&mut self, status: CallStatus, error: Option<String>) -> Option<Call> {
        let mut call = self.call.take()?;
        call.status = status;
        call.error = error;
        info!(
            call_id = %call.id,
            status = ?call.status,
            iterations = call.iterations.len(),
            "call finished"
        );
        if let Some(dir) = &self.log_dir
            && let Err(err) = call_log::write_call(dir, &call)
        {
            warn!(err = %err, "failed to write call log");
        }
        self.history.push(call.clone());
        Some(call)
    }
}

impl Drop for CallRecorder<'_> {
    fn drop(&mut self) {
        if self.call.is_some() {
            warn!("call dropped before completion");
            self.finish(CallStatus::Cancelled, None);
        }
    }
}

/// State machine shared by the blocking and async loops.
pub(crate) struct Driver<'a> {
    runner: &'a Runner<'a>,
    ctx: &'a CallContext,
    recorder: CallRecorder<'a>,
    state: RunnerState,
    max_attempts: u32,
    can_reask: bool,
    pending: Option<Pending>,
    /// Last validated tree that partial answers are spliced into.
    base: Option<Validated>,
    passed: bool,
    started: Option<Instant>,
}

impl<'a> Driver<'a> {
    /// Initializing: record the call, format and check inputs, queue attempt 1.
    pub(crate) fn begin(
        runner: &'a Runner<'a>,
        request: RunRequest,
        ctx: &'a CallContext,
        model_name: Option<String>,
    ) -> Result<Self> {
        let settings = &runner.settings;
        let can_reask = model_name.is_some();
        let num_reasks = if can_reask { settings.num_reasks } else { 0 };
        let inputs = CallInputs {
            prompt: request.prompt.clone(),
            instructions: request.instructions.clone(),
            msg_history: request.msg_history.clone(),
            prompt_params: request.prompt_params.clone(),
            num_reasks,
            full_schema_reask: settings.full_schema_reask,
            metadata: ctx.metadata.clone(),
            model: model_name,
        };
        let mut driver = Self {
            runner,
            ctx,
            recorder: CallRecorder {
                call: Some(Call::new(ctx.call_id.clone(), inputs)),
                history: runner.history,
                log_dir: settings.call_log_dir.clone(),
            },
            state: RunnerState::Initializing,
            max_attempts: num_reasks.saturating_add(1),
            can_reask,
            pending: None,
            base: None,
            passed: false,
            started: None,
        };
        match driver.initial_request(request) {
            Ok(pending) => {
                driver.pending = Some(pending);
                Ok(driver)
            }
            Err(err) => Err(driver.fail(err)),
        }
    }

    fn initial_request(&self, request: RunRequest) -> Result<Pending> {
        if request.llm_output.is_none()
            && request.prompt.is_none()
            && request.msg_history.is_empty()
        {
            return Err(ReaskError::MissingPrompt.into());
        }
        let schema = self.runner.schema;
        let inputs = self.runner.inputs;
        let metadata = &self.ctx.metadata;
        let params = &request.prompt_params;

        let prompt = request
            .prompt
            .map(|prompt| format_prompt(&prompt, params, schema))
            .map(|prompt| inputs.check(InputTarget::Prompt, &prompt, metadata))
            .transpose()?;
        let instructions = request
            .instructions
            .map(|text| format_prompt(&text, params, schema))
            .map(|text| inputs.check(InputTarget::Instructions, &text, metadata))
            .transpose()?;
        let mut msg_history = Vec::with_capacity(request.msg_history.len());
        for message in request.msg_history {
            let content = format_prompt(&message.content, params, schema);
            msg_history.push(Message {
                role: message.role,
                content: inputs.check(InputTarget::MsgHistory, &content, metadata)?,
            });
        }

        Ok(Pending {
            request: ModelRequest {
                prompt,
                instructions,
                msg_history,
                kwargs: self.ctx.kwargs.clone(),
            },
            scope: None,
            paths: Vec::new(),
            supplied: request.llm_output,
        })
    }

    fn transition(&mut self, next: RunnerState) {
        debug!(from = ?self.state, to = ?next, "runner transition");
        self.state = next;
    }

    /// Start the next attempt, if any.
    pub(crate) fn step(&mut self) -> Step {
        let Some(pending) = self.pending.take() else {
            return Step::Done;
        };
        let Some(call) = self.recorder.call.as_mut() else {
            return Step::Done;
        };
        let index = u32::try_from(call.iterations.len() + 1).unwrap_or(u32::MAX);
        call.iterations.push(Iteration::new(
            index,
            IterationInputs {
                request: pending.request.clone(),
                reask_scope: pending.scope,
                reask_paths: pending.paths,
                supplied_output: pending.supplied.is_some(),
            },
        ));
        debug!(iteration = index, "starting attempt");
        self.started = Some(Instant::now());
        match pending.supplied {
            Some(raw) => Step::Supplied(raw),
            None => {
                self.transition(RunnerState::Calling);
                Step::Call(pending.request)
            }
        }
    }

    /// Parse and validate the output of the current attempt, then queue a reask if needed.
    ///
    /// Fatal errors finalize the call before they are returned.
    pub(crate) fn record_output(&mut self, raw: String) -> Result<()> {
        match self.process_output(raw) {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail(err)),
        }
    }

    fn process_output(&mut self, raw: String) -> Result<()> {
        self.transition(RunnerState::Parsing);
        let runner = self.runner;
        let ctx = self.ctx;
        let schema = runner.schema;
        let settings = &runner.settings;
        let metadata = &ctx.metadata;
        let elapsed = self
            .started
            .take()
            .map(|started| u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX));

        let iteration = self
            .recorder
            .current_iteration()
            .ok_or_else(|| anyhow!("no attempt in progress"))?;
        iteration.raw_output = Some(raw.clone());
        iteration.duration_ms = elapsed;
        let partial = iteration.inputs.reask_scope == Some(ReaskScope::Partial);
        let paths = iteration.inputs.reask_paths.clone();
        let parsed = if partial {
            parse_reask_answer(&raw)
        } else {
            parse_output(&raw, schema)
        };
        iteration.parsed_output = Some(parsed.clone());

        self.transition(RunnerState::Validating);
        if let ParsedOutput::Failed(failure) = &parsed {
            debug!(error = %failure.error, "output could not be parsed");
            if settings.parse_failure_action == ParseFailureAction::Exception {
                return Err(ReaskError::Parse(failure.error.clone()).into());
            }
        }
        let response = match (&self.base, &parsed) {
            // An unusable partial answer omits every requested path; the last tree stands.
            (Some(base), parsed) if partial => {
                let omitted = Map::new();
                let answer = match parsed {
                    ParsedOutput::Parsed {
                        value: Value::Object(answer),
                    } => answer,
                    _ => &omitted,
                };
                apply_partial_answer(base, answer, &paths, schema, metadata)?
            }
            (_, ParsedOutput::Failed(failure)) => ValidationResponse::parse_failure(failure),
            (_, ParsedOutput::Parsed { value }) => executor::validate(value, schema, metadata)?,
        };

        let reasks = response.value.reasks();
        let skeleton = reasks.iter().any(|reask| reask.kind == ReAskKind::Skeleton);
        let unresolved = reasks.len();
        let refrained = response.value.is_refrained();
        debug!(
            failures = response.failures.len(),
            unresolved, refrained, "attempt validated"
        );
        if !skeleton {
            self.base = Some(response.value.clone());
        }
        self.passed = response.passed();

        let iteration = self
            .recorder
            .current_iteration()
            .ok_or_else(|| anyhow!("no attempt in progress"))?;
        iteration.validation = Some(response);
        let attempts = iteration.index;

        if refrained {
            self.transition(RunnerState::Failed);
            return Ok(());
        }
        if unresolved == 0 {
            self.transition(RunnerState::Done);
            return Ok(());
        }
        if !self.can_reask || attempts >= self.max_attempts {
            debug!(attempts, unresolved, "reasks exhausted");
            self.transition(RunnerState::Failed);
            return Ok(());
        }

        let next = build_next_request(
            iteration,
            schema,
            settings.full_schema_reask,
            runner.prompts,
            &ctx.kwargs,
        )?;
        if let Some(next) = next {
            self.transition(RunnerState::Reasking);
            let paths = match next.plan.scope {
                ReaskScope::Partial => next.plan.paths(),
                ReaskScope::Full => Vec::new(),
            };
            self.pending = Some(Pending {
                request: next.request,
                scope: Some(next.plan.scope),
                paths,
                supplied: None,
            });
        }
        Ok(())
    }

    /// Finalize the call as errored and hand the error back.
    pub(crate) fn fail(&mut self, err: anyhow::Error) -> anyhow::Error {
        self.transition(RunnerState::Failed);
        self.pending = None;
        warn!(err = %err, "call failed");
        self.recorder
            .finish(CallStatus::Error, Some(format!("{err:#}")));
        err
    }

    /// Finalize a completed call (passed or with unresolved reasks).
    pub(crate) fn finish(mut self) -> Result<ValidationOutcome> {
        let status = if self.passed {
            CallStatus::Pass
        } else {
            CallStatus::Fail
        };
        let call = self
            .recorder
            .finish(status, None)
            .ok_or_else(|| anyhow!("call already finalized"))?;
        Ok(ValidationOutcome::from_call(&call))
    }
}
