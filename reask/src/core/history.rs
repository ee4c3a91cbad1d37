//! Call and iteration records, and the process-wide call history.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::executor::ValidationResponse;
use crate::core::output::ParsedOutput;
use crate::core::path::JsonPath;
use crate::core::reask::ReaskScope;
use crate::core::tree::ReAsk;
use crate::core::types::{Message, Metadata, ModelRequest};

/// Exact request of one attempt and how it was built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationInputs {
    pub request: ModelRequest,
    /// `None` for the first attempt.
    pub reask_scope: Option<ReaskScope>,
    /// Paths a partial reask asked the model to correct.
    pub reask_paths: Vec<JsonPath>,
    /// The output was handed in by the caller instead of requested from the model.
    pub supplied_output: bool,
}

/// One attempt: request, raw text, parse result and validation outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Iteration {
    /// 1-based attempt number.
    pub index: u32,
    pub inputs: IterationInputs,
    pub raw_output: Option<String>,
    pub parsed_output: Option<ParsedOutput>,
    pub validation: Option<ValidationResponse>,
    pub duration_ms: Option<u64>,
}

impl Iteration {
    pub fn new(index: u32, inputs: IterationInputs) -> Self {
        Self {
            index,
            inputs,
            raw_output: None,
            parsed_output: None,
            validation: None,
            duration_ms: None,
        }
    }

    pub fn reasks(&self) -> Vec<&ReAsk> {
        self.validation
            .as_ref()
            .map(|response| response.value.reasks())
            .unwrap_or_default()
    }
}

/// Call-level request as the caller made it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CallInputs {
    pub prompt: Option<String>,
    pub instructions: Option<String>,
    pub msg_history: Vec<Message>,
    pub prompt_params: Map<String, Value>,
    pub num_reasks: u32,
    pub full_schema_reask: bool,
    pub metadata: Metadata,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    /// Still running (never stored in history).
    Pending,
    Pass,
    Fail,
    Error,
    /// The caller dropped the invocation before it finished.
    Cancelled,
}

/// Full record of one top-level invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Call {
    pub id: String,
    pub inputs: CallInputs,
    pub iterations: Vec<Iteration>,
    pub status: CallStatus,
    pub error: Option<String>,
}

impl Call {
    pub fn new(id: impl Into<String>, inputs: CallInputs) -> Self {
        Self {
            id: id.into(),
            inputs,
            iterations: Vec::new(),
            status: CallStatus::Pending,
            error: None,
        }
    }

    pub fn last_iteration(&self) -> Option<&Iteration> {
        self.iterations.last()
    }

    /// Raw text of the most recent attempt that produced output.
    pub fn raw_output(&self) -> Option<&str> {
        self.iterations
            .iter()
            .rev()
            .find_map(|iteration| iteration.raw_output.as_deref())
    }

    pub fn validation(&self) -> Option<&ValidationResponse> {
        self.iterations
            .iter()
            .rev()
            .find_map(|iteration| iteration.validation.as_ref())
    }

    /// Unresolved locations of the final attempt.
    pub fn reasks(&self) -> Vec<&ReAsk> {
        self.validation()
            .map(|response| response.value.reasks())
            .unwrap_or_default()
    }

    pub fn validated_output(&self) -> Option<Value> {
        self.validation().and_then(|response| response.value.output())
    }

    /// Attempts that went to the model (caller-supplied output excluded).
    pub fn model_calls(&self) -> usize {
        self.iterations
            .iter()
            .filter(|iteration| !iteration.inputs.supplied_output)
            .count()
    }
}

/// What the caller gets back from one invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationOutcome {
    pub call_id: String,
    pub raw_llm_output: Option<String>,
    pub validated_output: Option<Value>,
    /// Unresolved locations, when retries were exhausted.
    pub reask: Option<Vec<ReAsk>>,
    pub validation_passed: bool,
    pub error: Option<String>,
}

impl ValidationOutcome {
    pub fn from_call(call: &Call) -> Self {
        let reasks = call.reasks().into_iter().cloned().collect::<Vec<_>>();
        Self {
            call_id: call.id.clone(),
            raw_llm_output: call.raw_output().map(str::to_string),
            validated_output: call.validated_output(),
            reask: (!reasks.is_empty()).then_some(reasks),
            validation_passed: call.status == CallStatus::Pass,
            error: call.error.clone(),
        }
    }
}

/// Shared, append-only record of finished calls (most recent last).
///
/// Cloning is cheap and every clone appends to the same record.
#[derive(Debug, Clone, Default)]
pub struct History {
    calls: Arc<Mutex<VecDeque<Call>>>,
    /// Oldest calls are evicted beyond this many entries; 0 keeps everything.
    limit: usize,
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            calls: Arc::default(),
            limit,
        }
    }

    pub fn push(&self, call: Call) {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        calls.push_back(call);
        if self.limit > 0 {
            while calls.len() > self.limit {
                calls.pop_front();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last(&self) -> Option<Call> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .back()
            .cloned()
    }

    pub fn get(&self, call_id: &str) -> Option<Call> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|call| call.id == call_id)
            .cloned()
    }

    /// Snapshot in completion order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}
