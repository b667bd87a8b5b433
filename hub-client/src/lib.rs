//! Typed wrapper over the generated AgentHub gRPC client.
//!
//! Adds endpoint configuration, trace-context injection on every publish,
//! and small typed methods in place of raw request structs.

#![warn(missing_docs, clippy::pedantic)]

use hub_config::ClientConfig;
use hub_proto::pb::{
    AgentCard, AgentEvent, Artifact, CancelTaskRequest, EventRouting, GetAgentCardRequest,
    GetTaskRequest, ListTasksRequest, Message, PublishMessageRequest, PublishTaskArtifactRequest,
    PublishTaskUpdateRequest, RegisterAgentRequest, RegisterAgentResponse,
    SubscribeToAgentEventsRequest, SubscribeToMessagesRequest, SubscribeToTasksRequest, Task,
    TaskState,
};
use hub_proto::AgentHubClient;
use hub_telemetry::TraceContext;
use thiserror::Error;
use tonic::transport::Channel;
use tonic::{Request, Status, Streaming};
use tracing::debug;

/// Result alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the broker client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The broker could not be reached.
    #[error("broker transport error: {source}")]
    Transport {
        /// Underlying tonic transport failure.
        #[from]
        source: tonic::transport::Error,
    },

    /// The broker rejected the request.
    #[error("broker rejected request: {source}")]
    Rejected {
        /// gRPC status returned by the broker.
        #[from]
        source: Status,
    },
}

/// Connected AgentHub client.
///
/// Cheap to clone; clones share the underlying channel.
#[derive(Debug, Clone)]
pub struct HubClient {
    inner: AgentHubClient<Channel>,
}

impl HubClient {
    /// Connects to the broker named by the supplied configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] when the endpoint is unreachable.
    pub async fn connect(config: &ClientConfig) -> ClientResult<Self> {
        debug!(endpoint = config.endpoint(), "connecting to broker");
        let inner = AgentHubClient::connect(config.endpoint().to_owned()).await?;
        Ok(Self { inner })
    }

    /// Registers an agent card with the broker.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the RPC fails.
    pub async fn register(
        &self,
        card: AgentCard,
        subscriptions: Vec<String>,
    ) -> ClientResult<RegisterAgentResponse> {
        let mut client = self.inner.clone();
        let response = client
            .register_agent(Request::new(RegisterAgentRequest {
                card: Some(card),
                subscriptions,
            }))
            .await?;
        Ok(response.into_inner())
    }

    /// Publishes a message, continuing `trace` when one is supplied.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the RPC fails.
    pub async fn publish_message(
        &self,
        message: Message,
        routing: EventRouting,
        trace: Option<&TraceContext>,
    ) -> ClientResult<String> {
        let mut client = self.inner.clone();
        let request = traced(
            PublishMessageRequest {
                message: Some(message),
                routing: Some(routing),
            },
            trace,
        );
        let response = client.publish_message(request).await?;
        Ok(response.into_inner().event_id)
    }

    /// Publishes a task status update.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the RPC fails.
    pub async fn publish_task_update(
        &self,
        task: Task,
        routing: EventRouting,
        trace: Option<&TraceContext>,
    ) -> ClientResult<String> {
        let mut client = self.inner.clone();
        let request = traced(
            PublishTaskUpdateRequest {
                task: Some(task),
                routing: Some(routing),
            },
            trace,
        );
        let response = client.publish_task_update(request).await?;
        Ok(response.into_inner().event_id)
    }

    /// Publishes an artifact for an existing task.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the RPC fails.
    pub async fn publish_task_artifact(
        &self,
        task_id: impl Into<String>,
        artifact: Artifact,
        routing: EventRouting,
        trace: Option<&TraceContext>,
    ) -> ClientResult<String> {
        let mut client = self.inner.clone();
        let request = traced(
            PublishTaskArtifactRequest {
                task_id: task_id.into(),
                artifact: Some(artifact),
                routing: Some(routing),
            },
            trace,
        );
        let response = client.publish_task_artifact(request).await?;
        Ok(response.into_inner().event_id)
    }

    /// Opens the message stream for `agent_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the RPC fails.
    pub async fn subscribe_messages(
        &self,
        agent_id: impl Into<String>,
    ) -> ClientResult<Streaming<AgentEvent>> {
        let mut client = self.inner.clone();
        let response = client
            .subscribe_to_messages(Request::new(SubscribeToMessagesRequest {
                agent_id: agent_id.into(),
            }))
            .await?;
        Ok(response.into_inner())
    }

    /// Opens the task stream for `agent_id` with optional filters.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the RPC fails.
    pub async fn subscribe_tasks(
        &self,
        agent_id: impl Into<String>,
        task_types: Vec<String>,
        states: Vec<TaskState>,
    ) -> ClientResult<Streaming<AgentEvent>> {
        let mut client = self.inner.clone();
        let response = client
            .subscribe_to_tasks(Request::new(SubscribeToTasksRequest {
                agent_id: agent_id.into(),
                task_types,
                states: state_values(states),
            }))
            .await?;
        Ok(response.into_inner())
    }

    /// Opens the agent-event stream for `agent_id` with an optional
    /// event-type filter.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the RPC fails.
    pub async fn subscribe_agent_events(
        &self,
        agent_id: impl Into<String>,
        event_types: Vec<String>,
    ) -> ClientResult<Streaming<AgentEvent>> {
        let mut client = self.inner.clone();
        let response = client
            .subscribe_to_agent_events(Request::new(SubscribeToAgentEventsRequest {
                agent_id: agent_id.into(),
                event_types,
            }))
            .await?;
        Ok(response.into_inner())
    }

    /// Fetches a task, truncating history to the last `history_limit`
    /// messages when non-zero.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the RPC fails.
    pub async fn get_task(
        &self,
        task_id: impl Into<String>,
        history_limit: u32,
    ) -> ClientResult<Task> {
        let mut client = self.inner.clone();
        let response = client
            .get_task(Request::new(GetTaskRequest {
                task_id: task_id.into(),
                history_limit,
            }))
            .await?;
        Ok(response.into_inner())
    }

    /// Cancels an active task.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the RPC fails.
    pub async fn cancel_task(
        &self,
        task_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> ClientResult<Task> {
        let mut client = self.inner.clone();
        let response = client
            .cancel_task(Request::new(CancelTaskRequest {
                task_id: task_id.into(),
                reason: reason.into(),
            }))
            .await?;
        Ok(response.into_inner())
    }

    /// Lists stored tasks, optionally filtered by context and states.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the RPC fails.
    pub async fn list_tasks(
        &self,
        context_id: impl Into<String>,
        states: Vec<TaskState>,
        limit: u32,
    ) -> ClientResult<Vec<Task>> {
        let mut client = self.inner.clone();
        let response = client
            .list_tasks(Request::new(ListTasksRequest {
                context_id: context_id.into(),
                states: state_values(states),
                limit,
            }))
            .await?;
        Ok(response.into_inner().tasks)
    }

    /// Fetches the broker's own agent card.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] when the RPC fails.
    pub async fn broker_card(&self) -> ClientResult<Option<AgentCard>> {
        let mut client = self.inner.clone();
        let response = client
            .get_agent_card(Request::new(GetAgentCardRequest {}))
            .await?;
        Ok(response.into_inner().card)
    }
}

fn traced<T>(payload: T, trace: Option<&TraceContext>) -> Request<T> {
    let mut request = Request::new(payload);
    let context = trace.map_or_else(TraceContext::new_root, TraceContext::child);
    context.inject_metadata(request.metadata_mut());
    request
}

fn state_values(states: Vec<TaskState>) -> Vec<i32> {
    states.into_iter().map(|state| state as i32).collect()
}
