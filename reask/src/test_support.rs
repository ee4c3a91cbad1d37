//! Test-only models and schema builders.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use anyhow::{Result, anyhow};

use crate::core::schema::{ScalarType, SchemaField, SchemaNode};
use crate::core::types::{ModelRequest, OnFailAction};
use crate::core::validator::{IsType, ValidChoices};
use crate::io::model::{AsyncModel, Model};

/// One scripted model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    Text(String),
    /// Transport error with this message.
    Error(String),
    /// Never resolves (async only); blocking models treat it as an error.
    Hang,
}

impl From<&str> for ScriptedReply {
    fn from(text: &str) -> Self {
        ScriptedReply::Text(text.to_string())
    }
}

#[derive(Debug, Default)]
struct Script {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl Script {
    fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::default(),
        }
    }

    fn next(&self, request: &ModelRequest) -> Option<ScriptedReply> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn requests(&self) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Blocking model answering from a fixed script, recording every request.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    script: Script,
}

impl ScriptedModel {
    pub fn new(replies: Vec<impl Into<ScriptedReply>>) -> Self {
        Self {
            script: Script::new(replies.into_iter().map(Into::into).collect()),
        }
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.script.requests()
    }

    pub fn calls(&self) -> usize {
        self.requests().len()
    }
}

impl Model for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn complete(&self, request: &ModelRequest) -> Result<String> {
        match self.script.next(request) {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Error(message)) => Err(anyhow!(message)),
            Some(ScriptedReply::Hang) => Err(anyhow!("scripted model cannot hang when blocking")),
            None => Err(anyhow!("scripted model exhausted")),
        }
    }
}

/// Async counterpart of [`ScriptedModel`].
#[derive(Debug, Default)]
pub struct ScriptedAsyncModel {
    script: Script,
}

impl ScriptedAsyncModel {
    pub fn new(replies: Vec<impl Into<ScriptedReply>>) -> Self {
        Self {
            script: Script::new(replies.into_iter().map(Into::into).collect()),
        }
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.script.requests()
    }

    pub fn calls(&self) -> usize {
        self.requests().len()
    }
}

impl AsyncModel for ScriptedAsyncModel {
    fn name(&self) -> &str {
        "scripted-async"
    }

    async fn complete(&self, request: &ModelRequest) -> Result<String> {
        match self.script.next(request) {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Error(message)) => Err(anyhow!(message)),
            Some(ScriptedReply::Hang) => futures::future::pending().await,
            None => Err(anyhow!("scripted model exhausted")),
        }
    }
}

/// `{age: integer}` with an `is-integer` check using `on_fail`.
pub fn age_schema(on_fail: OnFailAction) -> SchemaNode {
    SchemaNode::object(vec![SchemaField::required(
        "age",
        SchemaNode::integer().validator(IsType::new(ScalarType::Integer).with_on_fail(on_fail)),
    )])
}

/// `{a: string, b: one of ["x", "y"]}`; only `b` carries a validator.
pub fn ab_schema() -> SchemaNode {
    SchemaNode::object(vec![
        SchemaField::required("a", SchemaNode::string()),
        SchemaField::required(
            "b",
            SchemaNode::string().validator(ValidChoices::new(vec!["x".into(), "y".into()])),
        ),
    ])
}
