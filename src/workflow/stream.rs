//! Caller-facing handle for streaming workflow runs.

use std::fmt;

use crate::message::Message;
use crate::workflow::runner::WorkflowError;

/// Items travelling over the bounded hand-off queue between the run driver
/// and the caller.
pub(crate) enum StreamItem {
    Batch(Vec<Message>),
    Failed(WorkflowError),
}

/// Incremental output of a streaming run.
///
/// Finite and not restartable: pull with [`next`](Self::next) until `None`.
/// A run error arrives as the final item, after any output that was already
/// produced. Dropping the stream cancels the run cooperatively: the driver
/// observes the closed channel and drains without launching further work.
pub struct OutputStream {
    pub(crate) receiver: flume::Receiver<StreamItem>,
}

impl OutputStream {
    /// Pull the next output batch.
    pub async fn next(&mut self) -> Option<Result<Vec<Message>, WorkflowError>> {
        match self.receiver.recv_async().await {
            Ok(StreamItem::Batch(batch)) => Some(Ok(batch)),
            Ok(StreamItem::Failed(error)) => Some(Err(error)),
            Err(_) => None,
        }
    }

    /// Adapt into a `futures` stream for combinator-based consumers.
    pub fn into_async_stream(
        self,
    ) -> impl futures_util::stream::Stream<Item = Result<Vec<Message>, WorkflowError>> {
        use futures_util::StreamExt;
        self.receiver.into_stream().map(|item| match item {
            StreamItem::Batch(batch) => Ok(batch),
            StreamItem::Failed(error) => Err(error),
        })
    }

    /// Drain the remainder into one flat message sequence, stopping at the
    /// first error.
    pub async fn collect_remaining(mut self) -> Result<Vec<Message>, WorkflowError> {
        let mut out = Vec::new();
        while let Some(item) = self.next().await {
            out.extend(item?);
        }
        Ok(out)
    }
}

impl fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputStream")
            .field("pending", &self.receiver.len())
            .finish()
    }
}
