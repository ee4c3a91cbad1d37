//! Remote validation collaborator.
//!
//! When a Guard is configured with a [`RemoteValidation`], the whole
//! call/parse/validate/reask loop runs elsewhere and this process only
//! records what came back.

use anyhow::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::context::CallContext;
use crate::core::history::{Call, CallInputs, CallStatus, History, Iteration, ValidationOutcome};
use crate::core::types::{Message, Metadata};

/// Everything the remote side needs to run one invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteRequest {
    pub call_id: String,
    /// Schema rendered the way prompts see it.
    pub output_schema: Value,
    pub prompt: Option<String>,
    pub instructions: Option<String>,
    pub msg_history: Vec<Message>,
    pub prompt_params: Map<String, Value>,
    pub llm_output: Option<String>,
    pub num_reasks: u32,
    pub full_schema_reask: bool,
    pub metadata: Metadata,
    pub kwargs: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteResponse {
    pub raw_llm_output: Option<String>,
    pub validated_output: Option<Value>,
    pub validation_passed: bool,
    pub error: Option<String>,
    /// Attempts made remotely, recorded into the local call as-is.
    pub iterations: Vec<Iteration>,
}

/// Runs a full invocation outside this process.
///
/// Blocking; async callers run it inline on their task, like the other
/// non-model steps of a call.
pub trait RemoteValidation: Send + Sync {
    fn validate(&self, request: &RemoteRequest) -> Result<RemoteResponse>;
}

/// Run a remote invocation and record it in `history` like a local call.
///
/// Transport errors are recorded with status Error and returned.
pub fn run_remote(
    remote: &dyn RemoteValidation,
    request: &RemoteRequest,
    inputs: CallInputs,
    history: &History,
    ctx: &CallContext,
) -> Result<ValidationOutcome> {
    let _entered = ctx.span.enter();
    let mut call = Call::new(ctx.call_id.clone(), inputs);
    let response = match remote.validate(request) {
        Ok(response) => response,
        Err(err) => {
            warn!(err = %err, "remote validation failed");
            call.status = CallStatus::Error;
            call.error = Some(format!("{err:#}"));
            history.push(call);
            return Err(err);
        }
    };
    debug!(
        iterations = response.iterations.len(),
        passed = response.validation_passed,
        "remote validation finished"
    );

    call.iterations = response.iterations;
    call.error = response.error.clone();
    call.status = match (&response.error, response.validation_passed) {
        (Some(_), _) => CallStatus::Error,
        (None, true) => CallStatus::Pass,
        (None, false) => CallStatus::Fail,
    };
    let mut outcome = ValidationOutcome::from_call(&call);
    // The remote summary wins over what can be derived from its iterations.
    outcome.raw_llm_output = response.raw_llm_output.or(outcome.raw_llm_output);
    outcome.validated_output = response.validated_output.or(outcome.validated_output);
    history.push(call);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::json;

    struct Fixed(Result<RemoteResponse, String>);

    impl RemoteValidation for Fixed {
        fn validate(&self, _request: &RemoteRequest) -> Result<RemoteResponse> {
            self.0.clone().map_err(|err| anyhow!(err))
        }
    }

    fn request(ctx: &CallContext) -> RemoteRequest {
        RemoteRequest {
            call_id: ctx.call_id.clone(),
            output_schema: json!({"type": "object"}),
            prompt: Some("hi".to_string()),
            instructions: None,
            msg_history: Vec::new(),
            prompt_params: Map::new(),
            llm_output: None,
            num_reasks: 1,
            full_schema_reask: false,
            metadata: Metadata::new(),
            kwargs: Map::new(),
        }
    }

    #[test]
    fn records_remote_outcome_as_call() {
        let history = History::default();
        let ctx = CallContext::new(Map::new(), Metadata::new(), 1);
        let remote = Fixed(Ok(RemoteResponse {
            raw_llm_output: Some("{\"age\": 20}".to_string()),
            validated_output: Some(json!({"age": 20})),
            validation_passed: true,
            ..RemoteResponse::default()
        }));

        let outcome = run_remote(&remote, &request(&ctx), CallInputs::default(), &history, &ctx)
            .expect("remote run");
        assert!(outcome.validation_passed);
        assert_eq!(outcome.validated_output, Some(json!({"age": 20})));
        assert_eq!(outcome.call_id, ctx.call_id);
        let call = history.last().expect("recorded");
        assert_eq!(call.status, CallStatus::Pass);
    }

    #[test]
    fn transport_error_is_recorded_and_returned() {
        let history = History::default();
        let ctx = CallContext::new(Map::new(), Metadata::new(), 1);
        let remote = Fixed(Err("connection refused".to_string()));

        let err = run_remote(&remote, &request(&ctx), CallInputs::default(), &history, &ctx)
            .expect_err("should fail");
        assert!(err.to_string().contains("connection refused"));
        let call = history.last().expect("recorded");
        assert_eq!(call.status, CallStatus::Error);
        assert_eq!(call.error.as_deref(), Some("connection refused"));
    }
}
