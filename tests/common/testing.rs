#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::time::{Duration, sleep};

use topicflow::event::InvokeContext;
use topicflow::message::Message;
use topicflow::tool::{CallableSpec, MessageStream, Tool, ToolContext, ToolError};

pub fn ctx(request: &str) -> InvokeContext {
    InvokeContext::new("conv-test", request)
}

/// Uppercases every message, answering as assistant.
#[derive(Debug, Default)]
pub struct UppercaseTool;

#[async_trait]
impl Tool for UppercaseTool {
    fn name(&self) -> &str {
        "uppercase"
    }

    async fn invoke(
        &self,
        _ctx: ToolContext,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>, ToolError> {
        Ok(messages
            .into_iter()
            .map(|m| Message::assistant(&m.content.to_uppercase()))
            .collect())
    }
}

/// Appends a fixed suffix to the last message's content.
#[derive(Debug)]
pub struct SuffixTool {
    pub suffix: &'static str,
}

#[async_trait]
impl Tool for SuffixTool {
    fn name(&self) -> &str {
        "suffix"
    }

    async fn invoke(
        &self,
        _ctx: ToolContext,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>, ToolError> {
        let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        Ok(vec![Message::assistant(&format!("{last}{}", self.suffix))])
    }
}

/// Always fails.
#[derive(Debug)]
pub struct FailingTool {
    pub reason: &'static str,
}

impl Default for FailingTool {
    fn default() -> Self {
        Self { reason: "boom" }
    }
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "failing"
    }

    async fn invoke(
        &self,
        _ctx: ToolContext,
        _messages: Vec<Message>,
    ) -> Result<Vec<Message>, ToolError> {
        Err(ToolError::invocation(self.name(), self.reason))
    }
}

/// Fails its first invocation, then behaves like [`SuffixTool`].
#[derive(Debug)]
pub struct FailOnceTool {
    pub suffix: &'static str,
    failed: AtomicBool,
}

impl FailOnceTool {
    pub fn new(suffix: &'static str) -> Self {
        Self {
            suffix,
            failed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Tool for FailOnceTool {
    fn name(&self) -> &str {
        "fail_once"
    }

    async fn invoke(
        &self,
        _ctx: ToolContext,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>, ToolError> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            return Err(ToolError::invocation(self.name(), "transient failure"));
        }
        let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        Ok(vec![Message::assistant(&format!("{last}{}", self.suffix))])
    }
}

/// Sleeps before echoing, tagging output with the tool's label.
#[derive(Debug)]
pub struct DelayedTool {
    pub label: &'static str,
    pub delay_ms: u64,
}

#[async_trait]
impl Tool for DelayedTool {
    fn name(&self) -> &str {
        self.label
    }

    async fn invoke(
        &self,
        _ctx: ToolContext,
        _messages: Vec<Message>,
    ) -> Result<Vec<Message>, ToolError> {
        sleep(Duration::from_millis(self.delay_ms)).await;
        Ok(vec![Message::assistant(&format!("ran:{}", self.label))])
    }
}

/// Tracks concurrent invocations; asserts the per-node mutual exclusion
/// guard by exposing the maximum overlap ever observed.
#[derive(Debug, Default)]
pub struct ConcurrencyProbeTool {
    current: AtomicUsize,
    pub max_seen: Arc<AtomicUsize>,
    pub invocations: Arc<AtomicUsize>,
}

impl ConcurrencyProbeTool {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Tool for ConcurrencyProbeTool {
    fn name(&self) -> &str {
        "concurrency_probe"
    }

    async fn invoke(
        &self,
        _ctx: ToolContext,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>, ToolError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        self.invocations.fetch_add(1, Ordering::SeqCst);
        sleep(Duration::from_millis(20)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![Message::assistant(&format!(
            "probe:{}",
            messages.len()
        ))])
    }
}

/// Streams the last message back word by word, one batch per word.
#[derive(Debug, Default)]
pub struct WordStreamTool;

#[async_trait]
impl Tool for WordStreamTool {
    fn name(&self) -> &str {
        "word_stream"
    }

    async fn invoke(
        &self,
        ctx: ToolContext,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>, ToolError> {
        self.stream(ctx, messages).await?.collect_remaining().await
    }

    async fn stream(
        &self,
        _ctx: ToolContext,
        messages: Vec<Message>,
    ) -> Result<MessageStream, ToolError> {
        let words: Vec<String> = messages
            .last()
            .map(|m| m.content.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        let (tx, rx) = MessageStream::channel(4);
        tokio::spawn(async move {
            for word in words {
                if tx.send(vec![Message::assistant(&word)]).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

/// A function tool that advertises a callable spec and echoes tool results.
#[derive(Debug)]
pub struct CallableEchoTool {
    pub callable_name: &'static str,
}

#[async_trait]
impl Tool for CallableEchoTool {
    fn name(&self) -> &str {
        self.callable_name
    }

    async fn invoke(
        &self,
        _ctx: ToolContext,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>, ToolError> {
        let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        Ok(vec![Message::tool(&format!("{}:{last}", self.callable_name))])
    }

    fn callable_spec(&self) -> Option<CallableSpec> {
        Some(CallableSpec {
            name: self.callable_name.to_string(),
            description: format!("test callable {}", self.callable_name),
            parameters: serde_json::json!({"type": "object"}),
        })
    }
}

/// A backend stand-in that records whatever callables get cross-wired to it.
#[derive(Debug, Default)]
pub struct RecordingBackendTool {
    pub bound: Arc<Mutex<Vec<CallableSpec>>>,
}

impl RecordingBackendTool {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Tool for RecordingBackendTool {
    fn name(&self) -> &str {
        "recording_backend"
    }

    async fn invoke(
        &self,
        _ctx: ToolContext,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>, ToolError> {
        Ok(messages)
    }

    fn bind_callables(&self, specs: &[CallableSpec]) {
        self.bound
            .lock()
            .expect("bound specs poisoned")
            .extend(specs.to_vec());
    }
}
