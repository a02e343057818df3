//! The pluggable unit-of-work boundary consumed by nodes.
//!
//! Concrete backends (language models, search, retrieval, function
//! execution) live behind the [`Tool`] trait and are selected at build time;
//! the engine never inspects their runtime type. Streaming output uses an
//! explicit channel-backed [`MessageStream`]: finite, not restartable, and
//! cancellable by dropping the receiving half.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::InvokeContext;
use crate::message::Message;

/// Execution context handed to a tool for one invocation.
#[derive(Clone, Debug)]
pub struct ToolContext {
    /// Name of the node driving this invocation.
    pub node: String,
    /// Causal identity of the run.
    pub invoke: InvokeContext,
}

/// Errors a tool can surface to the engine.
///
/// The core records a failure and re-raises it; retry policy, if any,
/// belongs to the tool itself.
#[derive(Debug, Error, Diagnostic)]
pub enum ToolError {
    /// The wrapped unit of work failed.
    #[error("tool '{tool}' failed: {message}")]
    #[diagnostic(code(topicflow::tool::invocation))]
    Invocation { tool: String, message: String },

    /// The streaming variant failed mid-production.
    #[error("tool '{tool}' stream failed: {message}")]
    #[diagnostic(code(topicflow::tool::stream))]
    Stream { tool: String, message: String },

    /// JSON (de)serialization error while preparing requests or responses.
    #[error(transparent)]
    #[diagnostic(code(topicflow::tool::serde_json))]
    Serde(#[from] serde_json::Error),
}

impl ToolError {
    pub fn invocation(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invocation {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Capability descriptor advertised by function-call tools.
///
/// At build time the workflow hands every language-model-backend node the
/// specs of the function-call nodes listening downstream of it, so the
/// backend can offer those callables to its model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallableSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the accepted arguments.
    pub parameters: serde_json::Value,
}

/// A pluggable unit of work: one-shot and streaming invocation plus
/// capability metadata.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable name used in lifecycle events and diagnostics.
    fn name(&self) -> &str;

    /// Run to completion on an ordered message batch.
    async fn invoke(
        &self,
        ctx: ToolContext,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>, ToolError>;

    /// Produce output incrementally. The default adapter runs
    /// [`invoke`](Self::invoke) and yields its result as a single batch, so
    /// only genuinely incremental backends need to override this.
    async fn stream(
        &self,
        ctx: ToolContext,
        messages: Vec<Message>,
    ) -> Result<MessageStream, ToolError> {
        let output = self.invoke(ctx, messages).await?;
        Ok(MessageStream::from_batches(vec![output]))
    }

    /// `Some` when this tool is itself callable by a model (a function
    /// tool); the returned spec is what gets advertised upstream.
    fn callable_spec(&self) -> Option<CallableSpec> {
        None
    }

    /// Accept the callable specs of downstream function tools. Backends
    /// that cannot drive function calls ignore this.
    fn bind_callables(&self, _specs: &[CallableSpec]) {}
}

impl fmt::Debug for dyn Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool").field("name", &self.name()).finish()
    }
}

/// A finite, non-restartable sequence of message batches.
///
/// Producers push batches (or one terminal error) through a bounded channel;
/// the consumer pulls with [`next`](Self::next) until `None`. Dropping the
/// stream cancels the producer's sends.
pub struct MessageStream {
    receiver: flume::Receiver<Result<Vec<Message>, ToolError>>,
}

impl MessageStream {
    /// Bounded producer/consumer pair for incremental backends.
    #[must_use]
    pub fn channel(capacity: usize) -> (MessageStreamSender, MessageStream) {
        let (tx, rx) = flume::bounded(capacity.max(1));
        (
            MessageStreamSender { sender: tx },
            MessageStream { receiver: rx },
        )
    }

    /// Stream over a fixed set of batches; used by the one-shot adapter.
    #[must_use]
    pub fn from_batches(batches: Vec<Vec<Message>>) -> Self {
        let (tx, rx) = flume::bounded(batches.len().max(1));
        for batch in batches {
            // Capacity matches the batch count, so these sends cannot block.
            let _ = tx.send(Ok(batch));
        }
        MessageStream { receiver: rx }
    }

    /// Pull the next batch. `None` once the producer is done.
    pub async fn next(&mut self) -> Option<Result<Vec<Message>, ToolError>> {
        self.receiver.recv_async().await.ok()
    }

    /// Adapt into a `futures` stream for combinator-based consumers.
    pub fn into_async_stream(
        self,
    ) -> impl futures_util::stream::Stream<Item = Result<Vec<Message>, ToolError>> {
        self.receiver.into_stream()
    }

    /// Drain the remainder into one flat message sequence, stopping at the
    /// first error.
    pub async fn collect_remaining(mut self) -> Result<Vec<Message>, ToolError> {
        let mut out = Vec::new();
        while let Some(batch) = self.next().await {
            out.extend(batch?);
        }
        Ok(out)
    }
}

impl fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageStream")
            .field("pending", &self.receiver.len())
            .finish()
    }
}

/// Producer half of a [`MessageStream`].
#[derive(Clone)]
pub struct MessageStreamSender {
    sender: flume::Sender<Result<Vec<Message>, ToolError>>,
}

impl MessageStreamSender {
    /// Push a batch, waiting if the consumer is applying backpressure.
    /// Errors when the consumer dropped the stream (cooperative cancel).
    pub async fn send(&self, batch: Vec<Message>) -> Result<(), ToolError> {
        self.sender
            .send_async(Ok(batch))
            .await
            .map_err(|_| ToolError::Stream {
                tool: String::new(),
                message: "stream consumer dropped".to_string(),
            })
    }

    /// Terminate the stream with an error. Consumers see it as the final item.
    pub async fn fail(&self, error: ToolError) {
        let _ = self.sender.send_async(Err(error)).await;
    }
}

type FnToolHandler = Arc<
    dyn Fn(ToolContext, Vec<Message>) -> BoxFuture<'static, Result<Vec<Message>, ToolError>>
        + Send
        + Sync,
>;

/// Closure adapter implementing [`Tool`], for tests and small inline nodes.
///
/// # Examples
///
/// ```
/// use topicflow::message::Message;
/// use topicflow::tool::FnTool;
///
/// let upper = FnTool::sync("uppercase", |messages| {
///     messages
///         .into_iter()
///         .map(|m| Message::assistant(&m.content.to_uppercase()))
///         .collect()
/// });
/// ```
#[derive(Clone)]
pub struct FnTool {
    name: String,
    handler: FnToolHandler,
}

impl FnTool {
    /// Wrap an async handler.
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ToolContext, Vec<Message>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Vec<Message>, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            handler: Arc::new(move |ctx, messages| Box::pin(handler(ctx, messages))),
        }
    }

    /// Wrap an infallible synchronous transformation.
    pub fn sync<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Message>) -> Vec<Message> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        Self::new(name, move |_ctx, messages| {
            let handler = Arc::clone(&handler);
            async move { Ok(handler(messages)) }
        })
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        ctx: ToolContext,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>, ToolError> {
        (self.handler)(ctx, messages).await
    }
}
