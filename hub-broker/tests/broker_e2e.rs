//! End-to-end broker tests over a real gRPC connection.

use std::sync::Arc;
use std::time::Duration;

use hub_broker::AgentHubService;
use hub_client::{ClientError, HubClient};
use hub_config::ClientConfig;
use hub_proto::a2a::{message_text, text_message};
use hub_proto::pb::{
    agent_event, AgentCard, AgentSkill, Artifact, EventRouting, Message, Role, Task, TaskState,
    TaskStatus,
};
use hub_proto::AgentHubServer;
use hub_telemetry::HubMetrics;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::Code;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);
const SILENCE: Duration = Duration::from_millis(200);

async fn spawn_broker() -> (HubClient, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let service = AgentHubService::new(Arc::new(HubMetrics::new()));
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        Server::builder()
            .add_service(AgentHubServer::new(service))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                let _ = stop_rx.await;
            })
            .await
            .unwrap();
    });

    let client = HubClient::connect(&ClientConfig::for_endpoint(addr.to_string()))
        .await
        .unwrap();
    (client, stop_tx)
}

fn routed(from: &str, to: &str) -> EventRouting {
    EventRouting {
        from_agent_id: from.to_owned(),
        to_agent_id: to.to_owned(),
        ..EventRouting::default()
    }
}

fn task_update(id: &str, state: TaskState, text: &str) -> Task {
    Task {
        id: id.to_owned(),
        context_id: "ctx".to_owned(),
        status: Some(TaskStatus {
            state: state as i32,
            update: Some(text_message(Role::Agent, text)),
            timestamp: None,
        }),
        ..Task::default()
    }
}

fn unwrap_message(event: hub_proto::pb::AgentEvent) -> Message {
    match event.payload {
        Some(agent_event::Payload::Message(message)) => message,
        other => panic!("expected message payload, got {other:?}"),
    }
}

#[tokio::test]
async fn direct_message_reaches_only_the_target() {
    let (client, _stop) = spawn_broker().await;

    let mut a = client.subscribe_messages("A").await.unwrap();
    let mut c = client.subscribe_messages("C").await.unwrap();

    let mut message = text_message(Role::User, "hi");
    message.message_id = "m1".to_owned();
    client
        .publish_message(message, routed("B", "A"), None)
        .await
        .unwrap();

    let event = timeout(RECV_TIMEOUT, a.message()).await.unwrap().unwrap().unwrap();
    assert_eq!(unwrap_message(event).message_id, "m1");
    assert!(timeout(SILENCE, c.message()).await.is_err());
}

#[tokio::test]
async fn broadcast_reaches_every_subscriber_once() {
    let (client, _stop) = spawn_broker().await;

    let mut streams = Vec::new();
    for name in ["A1", "A2", "A3"] {
        streams.push(client.subscribe_messages(name).await.unwrap());
    }

    client
        .publish_message(text_message(Role::User, "fanout"), routed("B", ""), None)
        .await
        .unwrap();

    for stream in &mut streams {
        let event = timeout(RECV_TIMEOUT, stream.message())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(message_text(&unwrap_message(event)), "fanout");
    }
    for stream in &mut streams {
        assert!(timeout(SILENCE, stream.message()).await.is_err());
    }
}

#[tokio::test]
async fn task_lifecycle_accumulates_history_then_freezes() {
    let (client, _stop) = spawn_broker().await;

    for (state, text) in [
        (TaskState::Submitted, "u1"),
        (TaskState::Working, "u2"),
        (TaskState::Completed, "u3"),
    ] {
        client
            .publish_task_update(task_update("t1", state, text), routed("worker", ""), None)
            .await
            .unwrap();
    }

    let task = client.get_task("t1", 0).await.unwrap();
    assert_eq!(task.status.unwrap().state, TaskState::Completed as i32);
    let texts: Vec<String> = task.history.iter().map(message_text).collect();
    assert_eq!(texts, ["u1", "u2", "u3"]);

    let tail = client.get_task("t1", 2).await.unwrap();
    let texts: Vec<String> = tail.history.iter().map(message_text).collect();
    assert_eq!(texts, ["u2", "u3"]);

    let err = client
        .publish_task_update(
            task_update("t1", TaskState::Working, "late"),
            routed("worker", ""),
            None,
        )
        .await
        .unwrap_err();
    assert_status(&err, Code::FailedPrecondition);
}

#[tokio::test]
async fn cancelled_subscription_is_cleaned_up() {
    let (client, _stop) = spawn_broker().await;

    let stream = client
        .subscribe_tasks("A", Vec::new(), Vec::new())
        .await
        .unwrap();
    drop(stream);
    tokio::time::sleep(SILENCE).await;

    // Publishing at the departed subscriber still succeeds; there is simply
    // nobody left to deliver to.
    client
        .publish_task_update(
            task_update("t1", TaskState::Submitted, "u1"),
            routed("worker", "A"),
            None,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn task_type_filter_is_enforced() {
    let (client, _stop) = spawn_broker().await;

    let mut filtered = client
        .subscribe_tasks("W", vec!["echo".to_owned()], Vec::new())
        .await
        .unwrap();

    let mut other = task_update("t-other", TaskState::Submitted, "nope");
    other.metadata = Some(hub_proto::a2a::json_to_struct(
        &serde_json::json!({ "task_type": "translate" }),
    ));
    client
        .publish_task_update(other, routed("worker", ""), None)
        .await
        .unwrap();

    let mut wanted = task_update("t-echo", TaskState::Submitted, "yes");
    wanted.metadata = Some(hub_proto::a2a::json_to_struct(
        &serde_json::json!({ "task_type": "echo" }),
    ));
    client
        .publish_task_update(wanted, routed("worker", ""), None)
        .await
        .unwrap();

    let event = timeout(RECV_TIMEOUT, filtered.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match event.payload {
        Some(agent_event::Payload::StatusUpdate(update)) => {
            assert_eq!(update.task_id, "t-echo");
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[tokio::test]
async fn artifacts_append_and_respect_terminal_state() {
    let (client, _stop) = spawn_broker().await;

    client
        .publish_task_update(
            task_update("t1", TaskState::Working, "u1"),
            routed("worker", ""),
            None,
        )
        .await
        .unwrap();

    let artifact = Artifact {
        artifact_id: "a1".to_owned(),
        name: "result".to_owned(),
        ..Artifact::default()
    };
    client
        .publish_task_artifact("t1", artifact, routed("worker", ""), None)
        .await
        .unwrap();

    let task = client.get_task("t1", 0).await.unwrap();
    assert_eq!(task.artifacts.len(), 1);
    assert_eq!(task.artifacts[0].artifact_id, "a1");

    let err = client
        .publish_task_artifact("ghost", Artifact::default(), routed("worker", ""), None)
        .await
        .unwrap_err();
    assert_status(&err, Code::NotFound);

    client
        .publish_task_update(
            task_update("t1", TaskState::Completed, "done"),
            routed("worker", ""),
            None,
        )
        .await
        .unwrap();
    let err = client
        .publish_task_artifact("t1", Artifact::default(), routed("worker", ""), None)
        .await
        .unwrap_err();
    assert_status(&err, Code::FailedPrecondition);
}

#[tokio::test]
async fn cancel_is_observable_once() {
    let (client, _stop) = spawn_broker().await;

    client
        .publish_task_update(
            task_update("t1", TaskState::Submitted, "u1"),
            routed("worker", ""),
            None,
        )
        .await
        .unwrap();

    let task = client.cancel_task("t1", "no longer needed").await.unwrap();
    assert_eq!(task.status.unwrap().state, TaskState::Cancelled as i32);
    assert_eq!(
        message_text(task.history.last().unwrap()),
        "no longer needed"
    );

    let err = client.cancel_task("t1", "again").await.unwrap_err();
    assert_status(&err, Code::FailedPrecondition);

    let err = client.cancel_task("ghost", "na").await.unwrap_err();
    assert_status(&err, Code::NotFound);
}

#[tokio::test]
async fn list_tasks_filters_by_context_and_state() {
    let (client, _stop) = spawn_broker().await;

    client
        .publish_task_update(
            task_update("t1", TaskState::Submitted, "a"),
            routed("worker", ""),
            None,
        )
        .await
        .unwrap();
    client
        .publish_task_update(
            task_update("t2", TaskState::Working, "b"),
            routed("worker", ""),
            None,
        )
        .await
        .unwrap();

    let all = client.list_tasks("", Vec::new(), 0).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, "t1");

    let working = client
        .list_tasks("ctx", vec![TaskState::Working], 0)
        .await
        .unwrap();
    assert_eq!(working.len(), 1);
    assert_eq!(working[0].id, "t2");

    let none = client.list_tasks("elsewhere", Vec::new(), 0).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn registration_is_discoverable_and_replayed_as_update() {
    let (client, _stop) = spawn_broker().await;

    let mut events = client
        .subscribe_agent_events(
            "cortex",
            vec!["agent.registered".to_owned(), "agent.updated".to_owned()],
        )
        .await
        .unwrap();

    let card = AgentCard {
        protocol_version: "1.0".to_owned(),
        name: "echo".to_owned(),
        description: "echoes text".to_owned(),
        version: "0.1.0".to_owned(),
        capabilities: None,
        skills: vec![AgentSkill {
            id: "echo".to_owned(),
            name: "echo".to_owned(),
            description: "returns its input".to_owned(),
            ..AgentSkill::default()
        }],
    };

    let response = client
        .register(card.clone(), vec!["messages".to_owned()])
        .await
        .unwrap();
    assert!(response.success);
    assert_eq!(response.agent_id, "echo");

    let event = timeout(RECV_TIMEOUT, events.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match event.payload {
        Some(agent_event::Payload::CardEvent(card_event)) => {
            assert_eq!(card_event.event_type, "registered");
            assert_eq!(card_event.card.unwrap().skills.len(), 1);
        }
        other => panic!("unexpected payload: {other:?}"),
    }

    client.register(card, Vec::new()).await.unwrap();
    let event = timeout(RECV_TIMEOUT, events.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match event.payload {
        Some(agent_event::Payload::CardEvent(card_event)) => {
            assert_eq!(card_event.event_type, "updated");
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[tokio::test]
async fn broker_card_advertises_streaming() {
    let (client, _stop) = spawn_broker().await;
    let card = client.broker_card().await.unwrap().unwrap();
    assert_eq!(card.name, "agenthub");
    assert!(card.capabilities.unwrap().streaming);
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let (client, _stop) = spawn_broker().await;
    let err = client.get_task("ghost", 0).await.unwrap_err();
    assert_status(&err, Code::NotFound);
}

fn assert_status(err: &ClientError, code: Code) {
    match err {
        ClientError::Rejected { source } => assert_eq!(source.code(), code, "{source}"),
        other => panic!("expected status error, got {other}"),
    }
}
