mod common;

use std::sync::Arc;

use common::testing::{FailOnceTool, SuffixTool, UppercaseTool, ctx};
use topicflow::condition::SubscriptionExpr;
use topicflow::event::{EventData, EventStore, InvokeContext, MemoryEventStore, has_open_request};
use topicflow::message::Message;
use topicflow::node::Node;
use topicflow::tool::FnTool;
use topicflow::topic::{Topic, TopicKind};
use topicflow::workflow::{Workflow, WorkflowBuilder, WorkflowError};

/// in -> upper -> mid -> finisher -> out
fn two_stage(store: Arc<MemoryEventStore>, finisher: Node) -> Workflow {
    WorkflowBuilder::new("pipeline")
        .add_topic(Topic::new("in", TopicKind::Input))
        .add_topic(Topic::new("out", TopicKind::Output))
        .add_node(
            Node::new("upper", UppercaseTool)
                .subscribe(SubscriptionExpr::topic("in"))
                .publish_to("mid"),
        )
        .add_node(finisher)
        .with_event_store(store)
        .build()
        .unwrap()
}

fn count_node_invokes(records: &[topicflow::event::EventRecord], node: &str) -> usize {
    records
        .iter()
        .filter(|r| matches!(&r.data, EventData::NodeInvoke { node: n, .. } if n == node))
        .count()
}

#[tokio::test]
async fn resume_after_node_failure_completes_the_run() {
    let store = Arc::new(MemoryEventStore::new());
    let workflow = two_stage(
        Arc::clone(&store),
        Node::new("finisher", FailOnceTool::new("!"))
            .subscribe(SubscriptionExpr::topic("mid"))
            .publish_to("out"),
    );

    let context = ctx("req-resume");
    let err = workflow
        .invoke(&context, vec![Message::user("hello")])
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NodeFailed { ref node, .. } if node == "finisher"));

    // Upstream work is persisted, the run is open.
    let records = store.get_request_events("req-resume").await.unwrap();
    assert!(has_open_request(&records));
    let mid_events_before: Vec<_> = workflow.topic("mid").unwrap().events();
    assert_eq!(mid_events_before.len(), 1);

    // Resume under the same request id; the tool works this time.
    let resumed = workflow.invoke(&context.next_run(), vec![]).await.unwrap();
    assert_eq!(resumed.len(), 1);
    assert_eq!(resumed[0].content, "HELLO!");

    // Replay reproduced the identical mid event (same id, same offset).
    let mid_events_after = workflow.topic("mid").unwrap().events();
    assert_eq!(mid_events_after, mid_events_before);

    // Upstream ran once in total; the failed node ran once per attempt.
    let records = store.get_request_events("req-resume").await.unwrap();
    assert_eq!(count_node_invokes(&records, "upper"), 1);
    assert_eq!(count_node_invokes(&records, "finisher"), 2);
    assert!(!has_open_request(&records));

    // Identical to an uninterrupted run.
    let store2 = Arc::new(MemoryEventStore::new());
    let uninterrupted = two_stage(
        Arc::clone(&store2),
        Node::new("finisher", SuffixTool { suffix: "!" })
            .subscribe(SubscriptionExpr::topic("mid"))
            .publish_to("out"),
    );
    let direct = uninterrupted
        .invoke(&ctx("req-direct"), vec![Message::user("hello")])
        .await
        .unwrap();
    assert_eq!(
        direct.iter().map(|m| &m.content).collect::<Vec<_>>(),
        resumed.iter().map(|m| &m.content).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn replay_into_a_different_structure_fails_loudly() {
    let store = Arc::new(MemoryEventStore::new());
    let workflow = two_stage(
        Arc::clone(&store),
        Node::new("finisher", FailOnceTool::new("!"))
            .subscribe(SubscriptionExpr::topic("mid"))
            .publish_to("out"),
    );

    let context = ctx("req-drift");
    let _ = workflow
        .invoke(&context, vec![Message::user("hello")])
        .await
        .unwrap_err();

    // A rebuilt workflow without the "mid" topic cannot absorb the history.
    let renamed = WorkflowBuilder::new("pipeline")
        .add_topic(Topic::new("in", TopicKind::Input))
        .add_topic(Topic::new("out", TopicKind::Output))
        .add_node(
            Node::new("upper", UppercaseTool)
                .subscribe(SubscriptionExpr::topic("in"))
                .publish_to("middle"),
        )
        .add_node(
            Node::new("finisher", SuffixTool { suffix: "!" })
                .subscribe(SubscriptionExpr::topic("middle"))
                .publish_to("out"),
        )
        .with_event_store(store.clone())
        .build()
        .unwrap();

    let err = renamed.invoke(&context.next_run(), vec![]).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Recovery(_)));
}

#[tokio::test]
async fn human_request_suspends_and_reply_appends_to_the_chain() {
    let store = Arc::new(MemoryEventStore::new());
    let workflow = WorkflowBuilder::new("hitl")
        .add_topic(Topic::new("in", TopicKind::Input))
        .add_topic(Topic::new("ask_user", TopicKind::HumanRequest))
        .add_topic(Topic::new("out", TopicKind::Output))
        .add_node(
            Node::new("clarifier", FnTool::sync("clarifier", |_| {
                vec![Message::assistant("which city?")]
            }))
            .subscribe(SubscriptionExpr::topic("in"))
            .publish_to("ask_user"),
        )
        .add_node(
            Node::new("responder", FnTool::sync("responder", |messages| {
                let last = messages.last().cloned().unwrap_or_default();
                vec![Message::assistant(&format!("weather in {}", last.content))]
            }))
            .subscribe(SubscriptionExpr::topic("ask_user"))
            .publish_to("out"),
        )
        .with_event_store(store.clone())
        .build()
        .unwrap();

    // First call: the clarifier asks and the graph suspends. The responder,
    // though subscribed to the human topic, must not fire yet.
    let context = ctx("req-hitl");
    let paused = workflow
        .invoke(&context, vec![Message::user("weather?")])
        .await
        .unwrap();
    assert_eq!(paused.len(), 1);
    assert_eq!(paused[0].content, "which city?");

    let records = store.get_request_events("req-hitl").await.unwrap();
    assert!(has_open_request(&records));
    assert_eq!(count_node_invokes(&records, "responder"), 0);
    let request_event = workflow.topic("ask_user").unwrap().events()[0].clone();

    // Second call with the same request id: the reply is appended into the
    // same causal chain and the graph advances.
    let result = workflow
        .invoke(&context.next_run(), vec![Message::user("Paris")])
        .await
        .unwrap();

    let ask_events = workflow.topic("ask_user").unwrap().events();
    assert_eq!(ask_events.len(), 2);
    assert_eq!(ask_events[1].consumed_event_ids, vec![request_event.id]);
    assert_eq!(ask_events[1].publisher, "hitl");

    // The reply itself plus the responder's answer, in logical order.
    assert_eq!(
        result.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
        vec!["Paris", "weather in Paris"]
    );

    let records = store.get_request_events("req-hitl").await.unwrap();
    assert_eq!(count_node_invokes(&records, "responder"), 1);
    assert!(!has_open_request(&records));
}

#[tokio::test]
async fn fresh_request_after_a_closed_one_starts_clean() {
    let store = Arc::new(MemoryEventStore::new());
    let workflow = two_stage(
        Arc::clone(&store),
        Node::new("finisher", SuffixTool { suffix: "!" })
            .subscribe(SubscriptionExpr::topic("mid"))
            .publish_to("out"),
    );

    let first = workflow
        .invoke(&ctx("req-a"), vec![Message::user("one")])
        .await
        .unwrap();
    assert_eq!(first[0].content, "ONE!");

    // A new request id resets topic state entirely.
    let second = workflow
        .invoke(&ctx("req-b"), vec![Message::user("two")])
        .await
        .unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].content, "TWO!");
    assert_eq!(workflow.topic("in").unwrap().len(), 1);
}

#[tokio::test]
async fn streaming_resume_matches_synchronous_resume() {
    let store = Arc::new(MemoryEventStore::new());
    let workflow = Arc::new(two_stage(
        Arc::clone(&store),
        Node::new("finisher", FailOnceTool::new("!"))
            .subscribe(SubscriptionExpr::topic("mid"))
            .publish_to("out"),
    ));

    let context = InvokeContext::new("conv-test", "req-stream-resume");
    let mut stream = Arc::clone(&workflow)
        .stream(&context, vec![Message::user("hello")])
        .await
        .unwrap();
    let mut failed = false;
    while let Some(item) = stream.next().await {
        if item.is_err() {
            failed = true;
        }
    }
    assert!(failed);

    let records = store.get_request_events("req-stream-resume").await.unwrap();
    assert!(has_open_request(&records));

    // Resume over the streaming API as well.
    let mut stream = workflow.stream(&context.next_run(), vec![]).await.unwrap();
    let mut outputs = Vec::new();
    while let Some(item) = stream.next().await {
        outputs.extend(item.unwrap());
    }
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].content, "HELLO!");
}
