//! gRPC façade over the subscription registry, task store, agent registry,
//! and router.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use hub_proto::a2a;
use hub_proto::pb::{
    agent_event, AgentCapabilities, AgentCard, AgentCardEvent, AgentEvent, CancelTaskRequest,
    EventRouting, GetAgentCardRequest, GetAgentCardResponse, GetTaskRequest, ListTasksRequest,
    ListTasksResponse, Message, Priority, PublishMessageRequest, PublishResponse,
    PublishTaskArtifactRequest, PublishTaskUpdateRequest, RegisterAgentRequest,
    RegisterAgentResponse, Role, SubscribeToAgentEventsRequest, SubscribeToMessagesRequest,
    SubscribeToTasksRequest, Task, TaskArtifactUpdateEvent, TaskState, TaskStatusUpdateEvent,
};
use hub_proto::AgentHub;
use hub_telemetry::{HubMetrics, TraceContext};
use tokio::sync::mpsc;
use tonic::{Request, Response, Status};
use tracing::{info, warn};
use uuid::Uuid;

use crate::agents::AgentRegistry;
use crate::router::Router;
use crate::subscriptions::{EventFilter, StreamKind, Subscriber, SubscriptionRegistry, QUEUE_CAPACITY};
use crate::tasks::{TaskStore, TaskStoreError};

const DEFAULT_CANCEL_REASON: &str = "cancelled by request";

/// The AgentHub broker service.
#[derive(Debug)]
pub struct AgentHubService {
    subscriptions: Arc<SubscriptionRegistry>,
    tasks: Arc<TaskStore>,
    agents: Arc<AgentRegistry>,
    router: Router,
    metrics: Arc<HubMetrics>,
    card: AgentCard,
}

impl AgentHubService {
    /// Creates a broker service publishing to the given metrics set.
    #[must_use]
    pub fn new(metrics: Arc<HubMetrics>) -> Self {
        let subscriptions = Arc::new(SubscriptionRegistry::new());
        Self {
            router: Router::new(Arc::clone(&subscriptions), Arc::clone(&metrics)),
            subscriptions,
            tasks: Arc::new(TaskStore::new()),
            agents: Arc::new(AgentRegistry::new()),
            metrics,
            card: broker_card(),
        }
    }

    /// Returns the task store.
    #[must_use]
    pub fn tasks(&self) -> &Arc<TaskStore> {
        &self.tasks
    }

    /// Returns the agent registry.
    #[must_use]
    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    /// Returns the subscription registry.
    #[must_use]
    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.subscriptions
    }

    fn envelope(
        &self,
        payload: agent_event::Payload,
        routing: EventRouting,
        trace: Option<TraceContext>,
    ) -> AgentEvent {
        let mut event = AgentEvent {
            event_id: Uuid::new_v4().to_string(),
            timestamp: Some(a2a::now()),
            payload: Some(payload),
            routing: Some(routing),
            trace_id: String::new(),
            span_id: String::new(),
        };
        trace
            .unwrap_or_else(TraceContext::new_root)
            .apply_event(&mut event);
        event
    }

    fn open_stream(
        &self,
        kind: StreamKind,
        agent_id: String,
        filter: EventFilter,
    ) -> EventStream {
        let (queue, receiver) = mpsc::channel(QUEUE_CAPACITY);
        let subscriber = self
            .subscriptions
            .add(kind, agent_id.clone(), filter, queue);
        self.metrics.subscription_opened();
        info!(
            agent_id = %agent_id,
            stream = kind.as_str(),
            queue = subscriber.id(),
            "subscribed"
        );
        Box::pin(SubscriptionStream {
            receiver,
            _guard: SubscriptionGuard {
                registry: Arc::clone(&self.subscriptions),
                metrics: Arc::clone(&self.metrics),
                kind,
                subscriber,
            },
        })
    }
}

/// Boxed event stream returned by every subscribe RPC.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<AgentEvent, Status>> + Send>>;

struct SubscriptionStream {
    receiver: mpsc::Receiver<AgentEvent>,
    _guard: SubscriptionGuard,
}

impl Stream for SubscriptionStream {
    type Item = Result<AgentEvent, Status>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx).map(|item| item.map(Ok))
    }
}

/// Removes the subscription exactly once, whether the client cancelled,
/// the stream errored, or the server is shutting down.
struct SubscriptionGuard {
    registry: Arc<SubscriptionRegistry>,
    metrics: Arc<HubMetrics>,
    kind: StreamKind,
    subscriber: Arc<Subscriber>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if self.registry.remove(self.kind, &self.subscriber) {
            self.metrics.subscription_closed();
            info!(
                agent_id = %self.subscriber.agent_id(),
                stream = self.kind.as_str(),
                queue = self.subscriber.id(),
                "unsubscribed"
            );
        }
    }
}

#[tonic::async_trait]
impl AgentHub for AgentHubService {
    async fn publish_message(
        &self,
        request: Request<PublishMessageRequest>,
    ) -> Result<Response<PublishResponse>, Status> {
        let trace = TraceContext::from_metadata(request.metadata());
        let request = request.into_inner();
        let message = request
            .message
            .ok_or_else(|| Status::invalid_argument("message is required"))?;
        validate_message(&message)?;

        let event = self.envelope(
            agent_event::Payload::Message(message),
            request.routing.unwrap_or_default(),
            trace,
        );
        self.router.route(StreamKind::Messages, &event).await;
        Ok(Response::new(PublishResponse {
            event_id: event.event_id,
        }))
    }

    async fn publish_task_update(
        &self,
        request: Request<PublishTaskUpdateRequest>,
    ) -> Result<Response<PublishResponse>, Status> {
        let trace = TraceContext::from_metadata(request.metadata());
        let request = request.into_inner();
        let task = request
            .task
            .ok_or_else(|| Status::invalid_argument("task is required"))?;

        let stored = self.tasks.upsert(task).map_err(status_from)?;
        let update = TaskStatusUpdateEvent {
            task_id: stored.id.clone(),
            context_id: stored.context_id.clone(),
            status: stored.status.clone(),
            metadata: stored.metadata.clone(),
        };
        let event = self.envelope(
            agent_event::Payload::StatusUpdate(update),
            request.routing.unwrap_or_default(),
            trace,
        );
        self.router.route(StreamKind::Tasks, &event).await;
        Ok(Response::new(PublishResponse {
            event_id: event.event_id,
        }))
    }

    async fn publish_task_artifact(
        &self,
        request: Request<PublishTaskArtifactRequest>,
    ) -> Result<Response<PublishResponse>, Status> {
        let trace = TraceContext::from_metadata(request.metadata());
        let request = request.into_inner();
        if request.task_id.trim().is_empty() {
            return Err(Status::invalid_argument("task_id is required"));
        }
        let artifact = request
            .artifact
            .ok_or_else(|| Status::invalid_argument("artifact is required"))?;

        let stored = self
            .tasks
            .append_artifact(&request.task_id, artifact.clone())
            .map_err(status_from)?;
        let update = TaskArtifactUpdateEvent {
            task_id: stored.id.clone(),
            context_id: stored.context_id.clone(),
            artifact: Some(artifact),
            metadata: stored.metadata.clone(),
        };
        let event = self.envelope(
            agent_event::Payload::ArtifactUpdate(update),
            request.routing.unwrap_or_default(),
            trace,
        );
        self.router.route(StreamKind::Tasks, &event).await;
        Ok(Response::new(PublishResponse {
            event_id: event.event_id,
        }))
    }

    type SubscribeToMessagesStream = EventStream;

    async fn subscribe_to_messages(
        &self,
        request: Request<SubscribeToMessagesRequest>,
    ) -> Result<Response<Self::SubscribeToMessagesStream>, Status> {
        let request = request.into_inner();
        require_agent_id(&request.agent_id)?;
        Ok(Response::new(self.open_stream(
            StreamKind::Messages,
            request.agent_id,
            EventFilter::All,
        )))
    }

    type SubscribeToTasksStream = EventStream;

    async fn subscribe_to_tasks(
        &self,
        request: Request<SubscribeToTasksRequest>,
    ) -> Result<Response<Self::SubscribeToTasksStream>, Status> {
        let request = request.into_inner();
        require_agent_id(&request.agent_id)?;
        let states = request
            .states
            .iter()
            .filter_map(|raw| TaskState::try_from(*raw).ok())
            .filter(|state| *state != TaskState::Unspecified)
            .collect();
        Ok(Response::new(self.open_stream(
            StreamKind::Tasks,
            request.agent_id,
            EventFilter::Tasks {
                task_types: request.task_types,
                states,
            },
        )))
    }

    type SubscribeToAgentEventsStream = EventStream;

    async fn subscribe_to_agent_events(
        &self,
        request: Request<SubscribeToAgentEventsRequest>,
    ) -> Result<Response<Self::SubscribeToAgentEventsStream>, Status> {
        let request = request.into_inner();
        require_agent_id(&request.agent_id)?;
        Ok(Response::new(self.open_stream(
            StreamKind::AgentEvents,
            request.agent_id,
            EventFilter::AgentEvents {
                event_types: request.event_types,
            },
        )))
    }

    async fn get_task(
        &self,
        request: Request<GetTaskRequest>,
    ) -> Result<Response<Task>, Status> {
        let request = request.into_inner();
        let task = self
            .tasks
            .get(&request.task_id, request.history_limit as usize)
            .map_err(status_from)?;
        Ok(Response::new(task))
    }

    async fn cancel_task(
        &self,
        request: Request<CancelTaskRequest>,
    ) -> Result<Response<Task>, Status> {
        let request = request.into_inner();
        let reason = if request.reason.trim().is_empty() {
            DEFAULT_CANCEL_REASON
        } else {
            request.reason.as_str()
        };
        let task = self
            .tasks
            .cancel(&request.task_id, reason)
            .map_err(status_from)?;
        info!(task_id = %task.id, "task cancelled");
        Ok(Response::new(task))
    }

    async fn list_tasks(
        &self,
        request: Request<ListTasksRequest>,
    ) -> Result<Response<ListTasksResponse>, Status> {
        let request = request.into_inner();
        let context_id = (!request.context_id.is_empty()).then_some(request.context_id.as_str());
        let states: Vec<TaskState> = request
            .states
            .iter()
            .filter_map(|raw| TaskState::try_from(*raw).ok())
            .filter(|state| *state != TaskState::Unspecified)
            .collect();
        let tasks = self
            .tasks
            .list(context_id, &states, request.limit as usize);
        Ok(Response::new(ListTasksResponse { tasks }))
    }

    async fn get_agent_card(
        &self,
        _request: Request<GetAgentCardRequest>,
    ) -> Result<Response<GetAgentCardResponse>, Status> {
        Ok(Response::new(GetAgentCardResponse {
            card: Some(self.card.clone()),
        }))
    }

    async fn register_agent(
        &self,
        request: Request<RegisterAgentRequest>,
    ) -> Result<Response<RegisterAgentResponse>, Status> {
        let trace = TraceContext::from_metadata(request.metadata());
        let request = request.into_inner();
        let card = request
            .card
            .ok_or_else(|| Status::invalid_argument("card is required"))?;
        if card.name.trim().is_empty() {
            return Err(Status::invalid_argument("agent name is required"));
        }

        let agent_id = card.name.clone();
        let replaced = self.agents.register(card.clone(), request.subscriptions);
        let event_type = if replaced { "updated" } else { "registered" };
        info!(agent_id = %agent_id, event_type, "agent registered");

        // A routing failure must not fail the registration.
        let event = self.envelope(
            agent_event::Payload::CardEvent(AgentCardEvent {
                agent_id: agent_id.clone(),
                card: Some(card),
                event_type: event_type.to_owned(),
            }),
            EventRouting {
                from_agent_id: agent_id.clone(),
                to_agent_id: String::new(),
                event_type: format!("agent.{event_type}"),
                subscriptions: Vec::new(),
                priority: Priority::High as i32,
            },
            trace,
        );
        let started = self.router.route(StreamKind::AgentEvents, &event).await;
        if started == 0 && !self.subscriptions.is_empty(StreamKind::AgentEvents) {
            warn!(agent_id = %agent_id, "agent event matched no subscriber");
        }

        Ok(Response::new(RegisterAgentResponse {
            success: true,
            agent_id,
            error: String::new(),
        }))
    }
}

fn broker_card() -> AgentCard {
    AgentCard {
        protocol_version: "1.0".to_owned(),
        name: "agenthub".to_owned(),
        description: "A2A message broker with task storage and agent discovery".to_owned(),
        version: env!("CARGO_PKG_VERSION").to_owned(),
        capabilities: Some(AgentCapabilities {
            streaming: true,
            push_notifications: false,
        }),
        skills: Vec::new(),
    }
}

fn require_agent_id(agent_id: &str) -> Result<(), Status> {
    if agent_id.trim().is_empty() {
        return Err(Status::invalid_argument("agent_id is required"));
    }
    Ok(())
}

fn validate_message(message: &Message) -> Result<(), Status> {
    if message.message_id.trim().is_empty() {
        return Err(Status::invalid_argument("message_id is required"));
    }
    match Role::try_from(message.role) {
        Ok(Role::User | Role::Agent) => {}
        _ => return Err(Status::invalid_argument("message role is required")),
    }
    if message.content.is_empty() {
        return Err(Status::invalid_argument("message content is empty"));
    }
    Ok(())
}

fn status_from(err: TaskStoreError) -> Status {
    match err {
        TaskStoreError::NotFound { .. } => Status::not_found(err.to_string()),
        TaskStoreError::Terminal { .. } | TaskStoreError::InvalidTransition { .. } => {
            Status::failed_precondition(err.to_string())
        }
        TaskStoreError::MissingField { .. } => Status::invalid_argument(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_proto::a2a::text_message;
    use hub_proto::pb::TaskStatus;
    use tokio_stream::StreamExt;

    fn service() -> AgentHubService {
        AgentHubService::new(Arc::new(HubMetrics::new()))
    }

    fn publish_request(message: Message, to: &str) -> Request<PublishMessageRequest> {
        Request::new(PublishMessageRequest {
            message: Some(message),
            routing: Some(EventRouting {
                from_agent_id: "tester".to_owned(),
                to_agent_id: to.to_owned(),
                ..EventRouting::default()
            }),
        })
    }

    #[tokio::test]
    async fn publish_rejects_invalid_messages() {
        let service = service();

        let mut missing_id = text_message(Role::User, "hi");
        missing_id.message_id.clear();
        let err = service
            .publish_message(publish_request(missing_id, ""))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);

        let mut no_role = text_message(Role::User, "hi");
        no_role.role = Role::Unspecified as i32;
        let err = service
            .publish_message(publish_request(no_role, ""))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);

        let mut empty = text_message(Role::User, "hi");
        empty.content.clear();
        let err = service
            .publish_message(publish_request(empty, ""))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn subscribe_requires_agent_id() {
        let service = service();
        let err = match service
            .subscribe_to_messages(Request::new(SubscribeToMessagesRequest {
                agent_id: "  ".to_owned(),
            }))
            .await
        {
            Ok(_) => panic!("expected an error"),
            Err(err) => err,
        };
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn direct_message_reaches_subscriber_stream() {
        let service = service();
        let mut stream = service
            .subscribe_to_messages(Request::new(SubscribeToMessagesRequest {
                agent_id: "a".to_owned(),
            }))
            .await
            .unwrap()
            .into_inner();

        let mut message = text_message(Role::User, "hi");
        message.message_id = "m1".to_owned();
        service
            .publish_message(publish_request(message, "a"))
            .await
            .unwrap();

        let event = stream.next().await.unwrap().unwrap();
        match event.payload {
            Some(agent_event::Payload::Message(received)) => {
                assert_eq!(received.message_id, "m1");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
        assert!(!event.event_id.is_empty());
        assert!(!event.trace_id.is_empty());
    }

    #[tokio::test]
    async fn dropping_stream_unsubscribes_once() {
        let service = service();
        let stream = service
            .subscribe_to_messages(Request::new(SubscribeToMessagesRequest {
                agent_id: "a".to_owned(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(service.subscriptions().len(StreamKind::Messages), 1);

        drop(stream);
        assert!(service.subscriptions().is_empty(StreamKind::Messages));

        // A publish targeted at the departed agent succeeds with no deliveries.
        let mut message = text_message(Role::User, "late");
        message.message_id = "m2".to_owned();
        service
            .publish_message(publish_request(message, "a"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn task_update_envelopes_status_event() {
        let service = service();
        let mut stream = service
            .subscribe_to_tasks(Request::new(SubscribeToTasksRequest {
                agent_id: "worker".to_owned(),
                task_types: Vec::new(),
                states: Vec::new(),
            }))
            .await
            .unwrap()
            .into_inner();

        let task = Task {
            id: "t1".to_owned(),
            context_id: "ctx".to_owned(),
            status: Some(TaskStatus {
                state: TaskState::Submitted as i32,
                update: Some(text_message(Role::User, "start")),
                timestamp: None,
            }),
            ..Task::default()
        };
        service
            .publish_task_update(Request::new(PublishTaskUpdateRequest {
                task: Some(task),
                routing: Some(EventRouting::default()),
            }))
            .await
            .unwrap();

        let event = stream.next().await.unwrap().unwrap();
        match event.payload {
            Some(agent_event::Payload::StatusUpdate(update)) => {
                assert_eq!(update.task_id, "t1");
                assert_eq!(
                    update.status.unwrap().state,
                    TaskState::Submitted as i32
                );
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn terminal_update_maps_to_failed_precondition() {
        let service = service();
        for state in [TaskState::Submitted, TaskState::Completed] {
            service
                .publish_task_update(Request::new(PublishTaskUpdateRequest {
                    task: Some(Task {
                        id: "t1".to_owned(),
                        status: Some(TaskStatus {
                            state: state as i32,
                            update: None,
                            timestamp: None,
                        }),
                        ..Task::default()
                    }),
                    routing: None,
                }))
                .await
                .unwrap();
        }

        let err = service
            .publish_task_update(Request::new(PublishTaskUpdateRequest {
                task: Some(Task {
                    id: "t1".to_owned(),
                    status: Some(TaskStatus {
                        state: TaskState::Working as i32,
                        update: None,
                        timestamp: None,
                    }),
                    ..Task::default()
                }),
                routing: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::FailedPrecondition);
    }

    #[tokio::test]
    async fn unknown_artifact_target_is_not_found() {
        let service = service();
        let err = service
            .publish_task_artifact(Request::new(PublishTaskArtifactRequest {
                task_id: "ghost".to_owned(),
                artifact: Some(hub_proto::pb::Artifact::default()),
                routing: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn registration_broadcasts_card_event() {
        let service = service();
        let mut stream = service
            .subscribe_to_agent_events(Request::new(SubscribeToAgentEventsRequest {
                agent_id: "cortex".to_owned(),
                event_types: vec!["agent.registered".to_owned(), "agent.updated".to_owned()],
            }))
            .await
            .unwrap()
            .into_inner();

        let card = AgentCard {
            name: "echo".to_owned(),
            ..AgentCard::default()
        };
        let response = service
            .register_agent(Request::new(RegisterAgentRequest {
                card: Some(card.clone()),
                subscriptions: vec!["messages".to_owned()],
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.success);
        assert_eq!(response.agent_id, "echo");

        let event = stream.next().await.unwrap().unwrap();
        match event.payload {
            Some(agent_event::Payload::CardEvent(card_event)) => {
                assert_eq!(card_event.event_type, "registered");
                assert_eq!(card_event.agent_id, "echo");
            }
            other => panic!("unexpected payload: {other:?}"),
        }

        // Second registration replaces the card and emits an update.
        service
            .register_agent(Request::new(RegisterAgentRequest {
                card: Some(card),
                subscriptions: Vec::new(),
            }))
            .await
            .unwrap();
        assert_eq!(service.agents().len(), 1);

        let event = stream.next().await.unwrap().unwrap();
        match event.payload {
            Some(agent_event::Payload::CardEvent(card_event)) => {
                assert_eq!(card_event.event_type, "updated");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn register_requires_name() {
        let service = service();
        let err = service
            .register_agent(Request::new(RegisterAgentRequest {
                card: Some(AgentCard::default()),
                subscriptions: Vec::new(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }
}
