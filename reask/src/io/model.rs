//! Model collaborators.
//!
//! The [`Model`] and [`AsyncModel`] traits decouple the runners from the
//! actual transport. Streaming transports are buffered into complete text
//! through [`Buffered`] / [`AsyncBuffered`] before parsing. Tests use scripted
//! models that return predetermined outputs without any transport.

use std::future::Future;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::{debug, instrument, warn};

use crate::core::types::{ModelRequest, Role};
use crate::io::process::run_command_with_timeout;

/// Blocking text-completion transport.
pub trait Model: Send + Sync {
    /// Name recorded in call inputs.
    fn name(&self) -> &str {
        "model"
    }

    fn complete(&self, request: &ModelRequest) -> Result<String>;
}

/// Non-blocking text-completion transport.
pub trait AsyncModel: Send + Sync {
    fn name(&self) -> &str {
        "async-model"
    }

    fn complete(&self, request: &ModelRequest) -> impl Future<Output = Result<String>> + Send;
}

/// Blocking transport yielding text chunks.
pub trait StreamingModel: Send + Sync {
    fn name(&self) -> &str {
        "streaming-model"
    }

    fn stream<'a>(
        &'a self,
        request: &'a ModelRequest,
    ) -> Result<Box<dyn Iterator<Item = Result<String>> + Send + 'a>>;
}

/// Non-blocking transport yielding text chunks.
pub trait AsyncStreamingModel: Send + Sync {
    fn name(&self) -> &str {
        "async-streaming-model"
    }

    fn stream<'a>(&'a self, request: &'a ModelRequest) -> BoxStream<'a, Result<String>>;
}

impl<M: Model + ?Sized> Model for &M {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn complete(&self, request: &ModelRequest) -> Result<String> {
        (**self).complete(request)
    }
}

/// Buffers a [`StreamingModel`] into a [`Model`].
#[derive(Debug, Clone)]
pub struct Buffered<S>(pub S);

impl<S: StreamingModel> Model for Buffered<S> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn complete(&self, request: &ModelRequest) -> Result<String> {
        let mut text = String::new();
        for chunk in self.0.stream(request)? {
            text.push_str(&chunk?);
        }
        Ok(text)
    }
}

/// Buffers an [`AsyncStreamingModel`] into an [`AsyncModel`].
#[derive(Debug, Clone)]
pub struct AsyncBuffered<S>(pub S);

impl<S: AsyncStreamingModel> AsyncModel for AsyncBuffered<S> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn complete(&self, request: &ModelRequest) -> impl Future<Output = Result<String>> + Send {
        async move {
            let mut stream = self.0.stream(request);
            let mut text = String::new();
            while let Some(chunk) = stream.next().await {
                text.push_str(&chunk?);
            }
            Ok(text)
        }
    }
}

/// Closure-backed [`Model`].
pub struct FnModel<F> {
    name: String,
    func: F,
}

impl<F> FnModel<F>
where
    F: Fn(&ModelRequest) -> Result<String> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Model for FnModel<F>
where
    F: Fn(&ModelRequest) -> Result<String> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn complete(&self, request: &ModelRequest) -> Result<String> {
        (self.func)(request)
    }
}

/// Flatten a request into the text sent to text-only transports.
///
/// Instructions come first, then message history as `role: content` lines,
/// then the prompt.
pub fn render_request(request: &ModelRequest) -> String {
    let mut parts = Vec::new();
    if let Some(instructions) = request.instructions.as_deref().filter(|s| !s.trim().is_empty()) {
        parts.push(instructions.trim().to_string());
    }
    for message in &request.msg_history {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        parts.push(format!("{role}: {}", message.content.trim()));
    }
    if let Some(prompt) = request.prompt.as_deref() {
        parts.push(prompt.trim().to_string());
    }
    parts.join("\n\n")
}

/// Environment variable carrying the call kwargs (JSON) to [`CommandModel`] children.
pub const KWARGS_ENV: &str = "REASK_KWARGS";

/// [`Model`] that pipes the rendered request into a command and reads stdout.
#[derive(Debug, Clone)]
pub struct CommandModel {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandModel {
    pub fn new(command: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Result<Self> {
        if command.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(anyhow!("model command must be a non-empty array"));
        }
        Ok(Self {
            command,
            timeout,
            output_limit_bytes,
        })
    }
}

impl Model for CommandModel {
    fn name(&self) -> &str {
        &self.command[0]
    }

    #[instrument(skip_all, fields(program = %self.command[0], timeout_secs = self.timeout.as_secs()))]
    fn complete(&self, request: &ModelRequest) -> Result<String> {
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]);
        if !request.kwargs.is_empty() {
            let kwargs = serde_json::to_string(&request.kwargs).context("serialize kwargs")?;
            cmd.env(KWARGS_ENV, kwargs);
        }
        let input = render_request(request);
        let output = run_command_with_timeout(
            cmd,
            Some(input.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run model command {}", self.command[0]))?;

        if output.timed_out {
            warn!("model command timed out");
            return Err(anyhow!(
                "model command timed out after {:?}",
                self.timeout
            ));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "model command failed");
            return Err(anyhow!(
                "model command failed with status {:?}: {}",
                output.status.code(),
                output.stderr_tail().unwrap_or_default()
            ));
        }
        debug!(bytes = output.stdout.len(), "model command completed");
        Ok(output.stdout_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Message;
    use futures::stream;

    struct Chunks(Vec<&'static str>);

    impl StreamingModel for Chunks {
        fn stream<'a>(
            &'a self,
            _request: &'a ModelRequest,
        ) -> Result<Box<dyn Iterator<Item = Result<String>> + Send + 'a>> {
            Ok(Box::new(self.0.iter().map(|chunk| Ok(chunk.to_string()))))
        }
    }

    impl AsyncStreamingModel for Chunks {
        fn stream<'a>(&'a self, _request: &'a ModelRequest) -> BoxStream<'a, Result<String>> {
            stream::iter(self.0.iter().map(|chunk| Ok(chunk.to_string()))).boxed()
        }
    }

    #[test]
    fn buffered_concatenates_chunks() {
        let model = Buffered(Chunks(vec!["{\"age\": ", "20", "}"]));
        let text = model.complete(&ModelRequest::default()).expect("complete");
        assert_eq!(text, "{\"age\": 20}");
    }

    #[test]
    fn async_buffered_concatenates_chunks() {
        let model = AsyncBuffered(Chunks(vec!["a", "b", "c"]));
        let request = ModelRequest::default();
        let text = futures::executor::block_on(model.complete(&request)).expect("complete");
        assert_eq!(text, "abc");
    }

    #[test]
    fn render_request_orders_sections() {
        let request = ModelRequest {
            prompt: Some("What is your age?".to_string()),
            instructions: Some("Answer in JSON.".to_string()),
            msg_history: vec![Message::new(Role::User, "hi")],
            ..ModelRequest::default()
        };
        assert_eq!(
            render_request(&request),
            "Answer in JSON.\n\nuser: hi\n\nWhat is your age?"
        );
    }

    #[test]
    fn command_model_rejects_empty_command() {
        assert!(CommandModel::new(Vec::new(), Duration::from_secs(1), 1024).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn command_model_reads_stdout() {
        let model = CommandModel::new(vec!["cat".to_string()], Duration::from_secs(5), 4096)
            .expect("model");
        let request = ModelRequest {
            prompt: Some("{\"age\": 20}".to_string()),
            ..ModelRequest::default()
        };
        assert_eq!(model.complete(&request).expect("complete"), "{\"age\": 20}");
    }

    #[cfg(unix)]
    #[test]
    fn command_model_surfaces_failures() {
        let model = CommandModel::new(
            vec!["sh".to_string(), "-c".to_string(), "echo nope >&2; exit 3".to_string()],
            Duration::from_secs(5),
            4096,
        )
        .expect("model");
        let err = model.complete(&ModelRequest::default()).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
