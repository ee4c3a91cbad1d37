//! Async invocation tests: same loop as the blocking runner, concurrent
//! independent calls, and cancellation by dropping the future.

use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use serde_json::json;

use reask::core::types::ModelRequest;
use reask::io::model::{AsyncBuffered, AsyncStreamingModel};
use reask::test_support::{ScriptedAsyncModel, ScriptedReply, age_schema};
use reask::{CallOptions, CallStatus, Guard, OnFailAction};

fn age_guard(num_reasks: u32) -> Guard {
    Guard::new(age_schema(OnFailAction::Reask))
        .expect("schema")
        .with_prompt("How old is the user?")
        .with_num_reasks(num_reasks)
}

#[tokio::test]
async fn async_call_reasks_like_blocking_call() {
    let guard = age_guard(1);
    let model = ScriptedAsyncModel::new(vec![r#"{"age": "twenty"}"#, r#"{"$.age": "20"}"#]);

    let outcome = guard
        .call_async(&model, CallOptions::default())
        .await
        .expect("call");

    assert!(outcome.validation_passed);
    assert_eq!(outcome.validated_output, Some(json!({"age": 20})));
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn async_parse_uses_model_only_for_reasks() {
    let guard = age_guard(2);
    let model = ScriptedAsyncModel::new(vec![r#"{"age": 9}"#]);

    let outcome = guard
        .parse_async(r#"{"age": "nine"}"#, &model, CallOptions::default())
        .await
        .expect("parse");

    assert!(outcome.validation_passed);
    assert_eq!(model.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_keep_separate_records() {
    let guard = age_guard(1);

    let calls = (0..8).map(|n| {
        let guard = guard.clone();
        tokio::spawn(async move {
            let model = ScriptedAsyncModel::new(vec![format!(r#"{{"age": {n}}}"#).as_str()]);
            guard
                .call_async(&model, CallOptions::default().metadata("n", n))
                .await
                .expect("call")
        })
    });
    let outcomes = futures::future::join_all(calls).await;

    let mut ids = Vec::new();
    for (n, outcome) in outcomes.into_iter().enumerate() {
        let outcome = outcome.expect("join");
        assert_eq!(outcome.validated_output, Some(json!({"age": n})));
        ids.push(outcome.call_id);
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);
    assert_eq!(guard.history().len(), 8);
    for call in guard.history().calls() {
        let n = call.inputs.metadata["n"].as_u64().expect("n");
        assert_eq!(call.validated_output(), Some(json!({"age": n})));
    }
}

#[tokio::test]
async fn dropped_call_is_recorded_as_cancelled() {
    let guard = age_guard(2);
    let model = ScriptedAsyncModel::new(vec![
        ScriptedReply::from(r#"{"age": "old"}"#),
        ScriptedReply::Hang,
    ]);

    let result = tokio::time::timeout(
        Duration::from_millis(50),
        guard.call_async(&model, CallOptions::default()),
    )
    .await;

    assert!(result.is_err(), "call should time out");
    assert_eq!(model.calls(), 2);
    let call = guard.history().last().expect("recorded");
    assert_eq!(call.status, CallStatus::Cancelled);
    assert_eq!(call.iterations.len(), 2);
    assert!(call.iterations[0].validation.is_some());
}

struct Chunks(Vec<&'static str>);

impl AsyncStreamingModel for Chunks {
    fn stream<'a>(&'a self, _request: &'a ModelRequest) -> BoxStream<'a, anyhow::Result<String>> {
        stream::iter(self.0.iter().map(|chunk| Ok(chunk.to_string()))).boxed()
    }
}

#[tokio::test]
async fn streamed_chunks_are_buffered_before_parsing() {
    let guard = age_guard(0);
    let model = AsyncBuffered(Chunks(vec!["{\"ag", "e\": ", "5}"]));

    let outcome = guard
        .call_async(&model, CallOptions::default())
        .await
        .expect("call");

    assert!(outcome.validation_passed);
    assert_eq!(outcome.validated_output, Some(json!({"age": 5})));
}
