//! The workflow orchestrator: ready-queue scheduling, synchronous and
//! concurrent draining, suspension, and recovery seeding.
//!
//! Execution is a reactive fixpoint. Caller input is published to the input
//! topic; every successful publish fans out to the subscribers whose
//! expressions newly evaluate true; each ready node consumes its topics,
//! runs its tool, and publishes results, which re-enters the same handler.
//! The run ends when the ready queue empties, a stop is requested, or a
//! human-request topic suspends the graph.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use uuid::Uuid;

use crate::event::{EventRecord, EventStore, EventStoreError, InvokeContext, has_open_request};
use crate::message::Message;
use crate::node::{ConsumeRecord, Node, NodeError};
use crate::tool::ToolError;
use crate::topic::{Topic, TopicEvent, TopicKind};
use crate::workflow::recovery::{self, RecoveryError};
use crate::workflow::stream::{OutputStream, StreamItem};

/// Errors surfaced by workflow execution.
#[derive(Debug, Error, Diagnostic)]
pub enum WorkflowError {
    /// A node's wrapped tool failed. Recorded, then re-raised; the run stays
    /// open in the event store so it can be resumed.
    #[error("node '{node}' failed")]
    #[diagnostic(code(topicflow::workflow::node_failed))]
    NodeFailed {
        node: String,
        #[source]
        source: ToolError,
    },

    /// Input gathering failed (unknown topic or corrupt provenance).
    #[error(transparent)]
    #[diagnostic(code(topicflow::workflow::node_input))]
    NodeInput(#[from] NodeError),

    /// The event store rejected a read or write.
    #[error(transparent)]
    #[diagnostic(code(topicflow::workflow::store))]
    Store(#[from] EventStoreError),

    /// A persisted run could not be replayed into the current build.
    #[error(transparent)]
    #[diagnostic(code(topicflow::workflow::recovery))]
    Recovery(#[from] RecoveryError),

    /// A node task panicked or was aborted.
    #[error("node task join error: {0}")]
    #[diagnostic(code(topicflow::workflow::join))]
    Join(#[from] JoinError),

    /// A streaming run finished without ever producing output.
    #[error("workflow '{workflow}' produced no output")]
    #[diagnostic(
        code(topicflow::workflow::no_output),
        help("Check publication gates along the path to the output topic.")
    )]
    NoOutput { workflow: String },
}

/// What a concurrent node task hands back to the orchestrator.
struct NodeTaskResult {
    name: String,
    result: Result<Vec<Message>, ToolError>,
    consumed_event_ids: Vec<Uuid>,
    consume_records: Vec<ConsumeRecord>,
}

/// Mutable state of one execution pass. Local to each `invoke`/`stream`
/// call, which keeps the workflow itself re-entrant per logical run.
#[derive(Debug, Default)]
struct RunState {
    /// FIFO of ready-but-not-yet-invoked node names.
    queue: VecDeque<String>,
    /// Names currently sitting in `queue`.
    enqueued: FxHashSet<String>,
    /// Names with an in-flight task (concurrent mode only).
    running: FxHashSet<String>,
    /// A human-request topic received a node publish; the graph is paused.
    suspended: bool,
    /// Stop enqueuing: a failure occurred or the caller went away.
    halted: bool,
    /// Terminal-topic events produced by nodes during this pass.
    produced: usize,
}

/// A built, validated pub/sub workflow.
///
/// Owns the topic set, the node set, and the topic→subscriber adjacency
/// derived at build time. Construction goes through
/// [`WorkflowBuilder`](crate::workflow::WorkflowBuilder).
#[derive(Debug)]
pub struct Workflow {
    name: String,
    topics: FxHashMap<String, Arc<Topic>>,
    topic_nodes: FxHashMap<String, Vec<String>>,
    nodes: FxHashMap<String, Arc<Node>>,
    /// Node registration order; the deterministic tie-break for re-enqueues.
    node_order: Vec<String>,
    input_topic: String,
    /// Output and human-request topics, in declaration order.
    terminal_topics: Vec<String>,
    store: Arc<dyn EventStore>,
    stop: AtomicBool,
    stream_capacity: usize,
}

impl Workflow {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        name: String,
        topics: FxHashMap<String, Arc<Topic>>,
        topic_nodes: FxHashMap<String, Vec<String>>,
        nodes: FxHashMap<String, Arc<Node>>,
        node_order: Vec<String>,
        input_topic: String,
        terminal_topics: Vec<String>,
        store: Arc<dyn EventStore>,
        stream_capacity: usize,
    ) -> Self {
        Self {
            name,
            topics,
            topic_nodes,
            nodes,
            node_order,
            input_topic,
            terminal_topics,
            store,
            stop: AtomicBool::new(false),
            stream_capacity,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn input_topic(&self) -> &str {
        &self.input_topic
    }

    #[must_use]
    pub fn topic(&self, name: &str) -> Option<&Arc<Topic>> {
        self.topics.get(name)
    }

    #[must_use]
    pub fn topics(&self) -> &FxHashMap<String, Arc<Topic>> {
        &self.topics
    }

    #[must_use]
    pub fn node(&self, name: &str) -> Option<&Arc<Node>> {
        self.nodes.get(name)
    }

    #[must_use]
    pub fn subscribers(&self, topic: &str) -> &[String] {
        self.topic_nodes
            .get(topic)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn event_store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Request a cooperative stop. Checked before every dequeue, before
    /// every task launch, and before every fresh pass; in-flight tool calls
    /// finish and their results are persisted, then the run drains.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Clear a previously requested stop so new passes can run.
    pub fn clear_stop(&self) {
        self.stop.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Run a request to completion synchronously.
    ///
    /// A fresh request seeds the input topic; a request with an open
    /// (non-terminated) history in the event store is restored first, and
    /// `input` is then appended as the reply to any pending human request.
    /// The result is every message consumed from output and human-request
    /// topics, in logical-timestamp order.
    #[tracing::instrument(
        skip(self, context, input),
        fields(workflow = %self.name, request = %context.request_id),
        err
    )]
    pub async fn invoke(
        &self,
        context: &InvokeContext,
        input: Vec<Message>,
    ) -> Result<Vec<Message>, WorkflowError> {
        // Prior history decides fresh-vs-resume, so it is read before this
        // attempt records anything.
        let prior = self.store.get_request_events(&context.request_id).await?;
        self.store
            .record_event(EventRecord::workflow_invoke(context, &self.name, input.clone()))
            .await?;
        let mut run = RunState::default();
        self.seed(context, &mut run, input, &prior).await?;

        while !self.stop_requested() {
            let Some(name) = run.queue.pop_front() else {
                break;
            };
            run.enqueued.remove(&name);
            let node = Arc::clone(self.nodes.get(&name).expect("queued node exists after build"));
            let Some(gathered) = node.collect_input(&self.topics)? else {
                continue;
            };
            self.record_gather(context, &name, &node, &gathered.messages).await?;

            tracing::debug!(node = %name, messages = gathered.messages.len(), "invoking node");
            match node.invoke(context, gathered.messages).await {
                Ok(output) => {
                    self.record_completion(context, &name, &node, &gathered.consume_records, &output)
                        .await?;
                    for target in node.publish_targets() {
                        self.publish_and_fanout(
                            context,
                            &mut run,
                            target,
                            output.clone(),
                            &name,
                            gathered.consumed_event_ids.clone(),
                            None,
                        )
                        .await?;
                    }
                }
                Err(error) => {
                    self.record_failure(context, &name, &node, &error).await;
                    return Err(WorkflowError::NodeFailed { node: name, source: error });
                }
            }
        }

        let outputs = self.collect_outputs(context).await?;
        if run.suspended || self.stop_requested() {
            // The request stays open in the store so a later call resumes it.
            tracing::info!(
                workflow = %self.name,
                suspended = run.suspended,
                "run paused without terminal record"
            );
            return Ok(outputs);
        }
        self.store
            .record_event(EventRecord::workflow_respond(context, &self.name, outputs.clone()))
            .await?;
        Ok(outputs)
    }

    /// Run a request with concurrent node tasks and incremental output.
    ///
    /// Every ready node launches as an independent task (never two for the
    /// same node name at once); completions publish exactly as in
    /// [`invoke`](Self::invoke). Output-topic batches are handed to the
    /// returned stream as they are produced, through a bounded queue whose
    /// blocking sends give the caller natural backpressure. The stream ends
    /// with an error item if a node failed or nothing was ever produced.
    pub async fn stream(
        self: Arc<Self>,
        context: &InvokeContext,
        input: Vec<Message>,
    ) -> Result<OutputStream, WorkflowError> {
        let prior = self.store.get_request_events(&context.request_id).await?;
        self.store
            .record_event(EventRecord::workflow_invoke(context, &self.name, input.clone()))
            .await?;
        let mut run = RunState::default();
        self.seed(context, &mut run, input, &prior).await?;

        let (tx, rx) = flume::bounded(self.stream_capacity);
        let ctx = context.clone();
        tokio::spawn(async move {
            self.drive_stream(ctx, run, tx).await;
        });
        Ok(OutputStream { receiver: rx })
    }

    /// Seed a pass: fresh requests reset topics and publish the caller's
    /// input; open requests are replayed from the store, ready nodes are
    /// re-enqueued, and the caller's input answers any pending human request.
    async fn seed(
        &self,
        context: &InvokeContext,
        run: &mut RunState,
        input: Vec<Message>,
        prior: &[EventRecord],
    ) -> Result<(), WorkflowError> {
        if has_open_request(prior) {
            recovery::restore_topics(&self.name, &self.topics, &self.nodes, prior)?;
            for name in &self.node_order {
                self.maybe_enqueue(run, name);
            }
            if !input.is_empty() {
                self.append_human_replies(context, run, input).await?;
            }
            tracing::info!(
                workflow = %self.name,
                request = %context.request_id,
                enqueued = run.queue.len(),
                "resumed open request"
            );
        } else {
            for topic in self.topics.values() {
                topic.reset();
            }
            let publisher = self.name.clone();
            self.publish_and_fanout(context, run, &self.input_topic, input, &publisher, vec![], None)
                .await?;
        }
        Ok(())
    }

    /// Append `input` as the reply to every human-request topic whose last
    /// event is an unanswered node publish. The reply joins the same causal
    /// chain (provenance = pending request event) and fans out to the
    /// topic's subscribers.
    async fn append_human_replies(
        &self,
        context: &InvokeContext,
        run: &mut RunState,
        input: Vec<Message>,
    ) -> Result<(), WorkflowError> {
        let publisher = self.name.clone();
        for topic_name in &self.terminal_topics {
            let topic = self.topics.get(topic_name).expect("terminal topic exists after build");
            if topic.kind() != TopicKind::HumanRequest {
                continue;
            }
            let events = topic.events();
            let Some(last) = events.last() else {
                continue;
            };
            if last.publisher == self.name {
                continue; // already answered
            }
            tracing::debug!(topic = %topic_name, "appending human reply");
            self.publish_and_fanout(
                context,
                run,
                topic_name,
                input.clone(),
                &publisher,
                vec![last.id],
                None,
            )
            .await?;
        }
        Ok(())
    }

    /// The publish handler: gate-checked append, store record, caller
    /// delivery for terminal topics, suspension for human requests, and
    /// subscriber fan-out. Invoked exactly once per successful publish.
    #[allow(clippy::too_many_arguments)]
    async fn publish_and_fanout(
        &self,
        context: &InvokeContext,
        run: &mut RunState,
        target: &str,
        messages: Vec<Message>,
        publisher: &str,
        consumed_event_ids: Vec<Uuid>,
        delivery: Option<&flume::Sender<StreamItem>>,
    ) -> Result<(), WorkflowError> {
        let topic = self.topics.get(target).expect("publish target exists after build");
        let Some(event) = topic.publish(messages, publisher, consumed_event_ids) else {
            return Ok(());
        };
        self.store
            .record_event(EventRecord::topic_publish(context, target, event.clone()))
            .await?;

        let kind = topic.kind();
        if kind.is_terminal() && publisher != self.name {
            run.produced += 1;
            if let Some(tx) = delivery
                && tx
                    .send_async(StreamItem::Batch(event.messages.clone()))
                    .await
                    .is_err()
            {
                // Caller dropped the stream: drain without launching more.
                tracing::debug!(workflow = %self.name, "output stream dropped, halting");
                run.halted = true;
            }
        }

        if kind == TopicKind::HumanRequest && publisher != self.name {
            run.suspended = true;
            tracing::info!(
                workflow = %self.name,
                topic = %target,
                "suspended pending human reply"
            );
            return Ok(());
        }

        if run.halted || self.stop_requested() {
            return Ok(());
        }
        if let Some(subscribers) = self.topic_nodes.get(target) {
            for subscriber in subscribers {
                self.maybe_enqueue(run, subscriber);
            }
        }
        Ok(())
    }

    /// Enqueue `name` if it is ready, not already queued, and not running.
    /// Running nodes are re-checked when their task completes instead.
    fn maybe_enqueue(&self, run: &mut RunState, name: &str) {
        if run.enqueued.contains(name) || run.running.contains(name) {
            return;
        }
        let Some(node) = self.nodes.get(name) else {
            return;
        };
        if node.can_invoke(&self.topics) {
            run.queue.push_back(name.to_string());
            run.enqueued.insert(name.to_string());
        }
    }

    /// Consume every terminal topic as the workflow's own consumer and
    /// return the payloads in logical-timestamp order.
    async fn collect_outputs(
        &self,
        context: &InvokeContext,
    ) -> Result<Vec<Message>, WorkflowError> {
        let mut collected: Vec<TopicEvent> = Vec::new();
        for topic_name in &self.terminal_topics {
            let topic = self.topics.get(topic_name).expect("terminal topic exists after build");
            let events = topic.consume(&self.name);
            if events.is_empty() {
                continue;
            }
            self.store
                .record_event(EventRecord::topic_consume(
                    context,
                    topic_name,
                    &self.name,
                    events[0].offset,
                    events[events.len() - 1].offset + 1,
                    events.iter().map(|e| e.id).collect(),
                ))
                .await?;
            collected.extend(events);
        }
        collected.sort_by(|a, b| (a.at, a.offset, a.id).cmp(&(b.at, b.offset, b.id)));
        Ok(collected.into_iter().flat_map(|e| e.messages).collect())
    }

    async fn record_gather(
        &self,
        context: &InvokeContext,
        name: &str,
        node: &Node,
        messages: &[Message],
    ) -> Result<(), WorkflowError> {
        self.store
            .record_event(EventRecord::node_invoke(context, name, messages.to_vec()))
            .await?;
        self.store
            .record_event(EventRecord::tool_invoke(
                context,
                node.tool().name(),
                name,
                messages.to_vec(),
            ))
            .await?;
        Ok(())
    }

    /// Persist a successful invocation: the cursor movements first, then the
    /// respond records. Consume records are durably acknowledged only here:
    /// a node that consumed and then failed leaves no consume record, so
    /// replay re-offers it the same events.
    async fn record_completion(
        &self,
        context: &InvokeContext,
        name: &str,
        node: &Node,
        consume_records: &[ConsumeRecord],
        output: &[Message],
    ) -> Result<(), WorkflowError> {
        for rec in consume_records {
            self.store
                .record_event(EventRecord::topic_consume(
                    context,
                    &rec.topic,
                    name,
                    rec.first_offset,
                    rec.up_to,
                    rec.event_ids.clone(),
                ))
                .await?;
        }
        self.store
            .record_event(EventRecord::tool_respond(
                context,
                node.tool().name(),
                name,
                output.to_vec(),
            ))
            .await?;
        self.store
            .record_event(EventRecord::node_respond(context, name, output.to_vec()))
            .await?;
        Ok(())
    }

    /// Best-effort persistence of a failure; the error is re-raised by the
    /// caller regardless, and no terminal record is written so the run
    /// stays resumable.
    async fn record_failure(
        &self,
        context: &InvokeContext,
        name: &str,
        node: &Node,
        error: &ToolError,
    ) {
        let reason = error.to_string();
        let _ = self
            .store
            .record_event(EventRecord::tool_fail(
                context,
                node.tool().name(),
                name,
                reason.clone(),
            ))
            .await;
        let _ = self
            .store
            .record_event(EventRecord::node_fail(context, name, reason))
            .await;
    }

    /// Drive a streaming pass to completion and close the hand-off queue.
    #[tracing::instrument(skip(self, context, run, tx), fields(workflow = %self.name, request = %context.request_id))]
    async fn drive_stream(
        self: Arc<Self>,
        context: InvokeContext,
        mut run: RunState,
        tx: flume::Sender<StreamItem>,
    ) {
        match self.drive_concurrent(&context, &mut run, &tx).await {
            Ok(()) => {
                let outputs = match self.collect_outputs(&context).await {
                    Ok(outputs) => outputs,
                    Err(error) => {
                        let _ = tx.send_async(StreamItem::Failed(error)).await;
                        return;
                    }
                };
                if run.produced == 0 && !run.suspended && !run.halted && !self.stop_requested() {
                    let error = WorkflowError::NoOutput {
                        workflow: self.name.clone(),
                    };
                    let _ = self
                        .store
                        .record_event(EventRecord::workflow_fail(
                            &context,
                            &self.name,
                            error.to_string(),
                        ))
                        .await;
                    let _ = tx.send_async(StreamItem::Failed(error)).await;
                    return;
                }
                if !run.suspended && !run.halted && !self.stop_requested() {
                    let _ = self
                        .store
                        .record_event(EventRecord::workflow_respond(&context, &self.name, outputs))
                        .await;
                }
            }
            Err(error) => {
                // Surfaced after any output already delivered; no terminal
                // record, so the request can be resumed.
                let _ = tx.send_async(StreamItem::Failed(error)).await;
            }
        }
        // Dropping tx closes the stream for the caller.
    }

    /// Concurrent drain: launch every ready node as a task, publish on
    /// completion, loop until no work remains. At most one in-flight task
    /// per node name at any time.
    async fn drive_concurrent(
        &self,
        context: &InvokeContext,
        run: &mut RunState,
        delivery: &flume::Sender<StreamItem>,
    ) -> Result<(), WorkflowError> {
        let mut join_set: JoinSet<NodeTaskResult> = JoinSet::new();
        let mut failure: Option<WorkflowError> = None;

        loop {
            if failure.is_none() && !run.halted && !self.stop_requested() {
                self.launch_ready(context, run, &mut join_set, &mut failure).await;
                if failure.is_some() {
                    run.halted = true;
                }
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            match joined {
                Ok(task) => {
                    let NodeTaskResult {
                        name,
                        result,
                        consumed_event_ids,
                        consume_records,
                    } = task;
                    run.running.remove(&name);
                    let node =
                        Arc::clone(self.nodes.get(&name).expect("completed node exists after build"));
                    match result {
                        Ok(output) => {
                            // Completed work is persisted and published even
                            // when a sibling task already failed; only new
                            // launches are blocked.
                            if let Err(error) = self
                                .record_completion(context, &name, &node, &consume_records, &output)
                                .await
                            {
                                failure.get_or_insert(error);
                                run.halted = true;
                                continue;
                            }
                            for target in node.publish_targets() {
                                if let Err(error) = self
                                    .publish_and_fanout(
                                        context,
                                        run,
                                        target,
                                        output.clone(),
                                        &name,
                                        consumed_event_ids.clone(),
                                        Some(delivery),
                                    )
                                    .await
                                {
                                    failure.get_or_insert(error);
                                    run.halted = true;
                                    break;
                                }
                            }
                            // Data may have arrived for this node while it ran.
                            if !run.halted && !self.stop_requested() {
                                self.maybe_enqueue(run, &name);
                            }
                        }
                        Err(error) => {
                            self.record_failure(context, &name, &node, &error).await;
                            failure.get_or_insert(WorkflowError::NodeFailed {
                                node: name,
                                source: error,
                            });
                            run.halted = true;
                        }
                    }
                }
                Err(join_error) => {
                    failure.get_or_insert(WorkflowError::Join(join_error));
                    run.halted = true;
                }
            }
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Launch every queued node that is not already running. Nodes whose
    /// name is currently in flight are deferred, preserving queue order.
    async fn launch_ready(
        &self,
        context: &InvokeContext,
        run: &mut RunState,
        join_set: &mut JoinSet<NodeTaskResult>,
        failure: &mut Option<WorkflowError>,
    ) {
        let mut deferred: VecDeque<String> = VecDeque::new();
        while let Some(name) = run.queue.pop_front() {
            if self.stop_requested() {
                run.queue.push_front(name);
                break;
            }
            if run.running.contains(&name) {
                deferred.push_back(name);
                continue;
            }
            run.enqueued.remove(&name);
            let node = Arc::clone(self.nodes.get(&name).expect("queued node exists after build"));
            let gathered = match node.collect_input(&self.topics) {
                Ok(Some(gathered)) => gathered,
                Ok(None) => continue,
                Err(error) => {
                    *failure = Some(error.into());
                    break;
                }
            };
            if let Err(error) = self
                .record_gather(context, &name, &node, &gathered.messages)
                .await
            {
                *failure = Some(error);
                break;
            }

            tracing::debug!(node = %name, messages = gathered.messages.len(), "launching node task");
            run.running.insert(name.clone());
            let task_context = context.clone();
            let consumed_event_ids = gathered.consumed_event_ids;
            let consume_records = gathered.consume_records;
            let messages = gathered.messages;
            join_set.spawn(async move {
                let result = node.invoke(&task_context, messages).await;
                NodeTaskResult {
                    name,
                    result,
                    consumed_event_ids,
                    consume_records,
                }
            });
        }
        // Deferred names stay enqueued and retry after the next completion.
        for name in deferred {
            run.queue.push_back(name);
        }
    }
}
