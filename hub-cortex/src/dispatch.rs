//! The Cortex event loop: subscribe, decide, act.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hub_client::{ClientResult, HubClient};
use hub_proto::a2a::{data_part, json_to_struct, text_message};
use hub_proto::pb::{
    agent_event, AgentCapabilities, AgentCard, AgentEvent, AgentSkill, EventRouting, Message,
    Priority, Role,
};
use hub_telemetry::{HubMetrics, TraceContext};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::AgentCatalog;
use crate::decision::{Action, DecisionEngine};
use crate::state::SessionStateManager;

/// Reply sent when the decision engine fails.
pub const APOLOGY: &str =
    "I'm sorry, something went wrong while handling that request. Please try again.";

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Publishing seam so the dispatch loop can run against a mock broker.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes a message through the broker, continuing `trace`.
    async fn publish_message(
        &self,
        message: Message,
        routing: EventRouting,
        trace: Option<&TraceContext>,
    ) -> ClientResult<String>;
}

#[async_trait]
impl EventPublisher for HubClient {
    async fn publish_message(
        &self,
        message: Message,
        routing: EventRouting,
        trace: Option<&TraceContext>,
    ) -> ClientResult<String> {
        HubClient::publish_message(self, message, routing, trace).await
    }
}

/// The orchestrator: holds the agent catalog and session state, and turns
/// decisions into published messages.
pub struct Cortex {
    agent_id: String,
    publisher: Arc<dyn EventPublisher>,
    engine: Arc<dyn DecisionEngine>,
    state: Arc<dyn SessionStateManager>,
    catalog: Arc<AgentCatalog>,
    metrics: Arc<HubMetrics>,
}

impl std::fmt::Debug for Cortex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cortex")
            .field("agent_id", &self.agent_id)
            .field("known_agents", &self.catalog.len())
            .finish_non_exhaustive()
    }
}

impl Cortex {
    /// Wires the orchestrator together.
    #[must_use]
    pub fn new(
        agent_id: impl Into<String>,
        publisher: Arc<dyn EventPublisher>,
        engine: Arc<dyn DecisionEngine>,
        state: Arc<dyn SessionStateManager>,
        metrics: Arc<HubMetrics>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            publisher,
            engine,
            state,
            catalog: Arc::new(AgentCatalog::new()),
            metrics,
        }
    }

    /// Returns the agent id the orchestrator registers under.
    #[must_use]
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Returns the live agent catalog.
    #[must_use]
    pub fn catalog(&self) -> &Arc<AgentCatalog> {
        &self.catalog
    }

    /// Returns the card the orchestrator registers with the broker.
    #[must_use]
    pub fn card(&self) -> AgentCard {
        AgentCard {
            protocol_version: "1.0".to_owned(),
            name: self.agent_id.clone(),
            description: "Session-aware orchestrator that routes requests to registered agents"
                .to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            capabilities: Some(AgentCapabilities {
                streaming: true,
                push_notifications: false,
            }),
            skills: vec![AgentSkill {
                id: "orchestrate".to_owned(),
                name: "Orchestration".to_owned(),
                description: "Decides which registered agent should handle each request"
                    .to_owned(),
                tags: vec!["routing".to_owned()],
                examples: Vec::new(),
                input_modes: vec!["text".to_owned()],
                output_modes: vec!["text".to_owned()],
            }],
        }
    }

    /// Handles one event from either subscription stream.
    pub async fn handle_event(&self, event: AgentEvent) {
        let trace = TraceContext::from_event(&event);
        let routing = event.routing.unwrap_or_default();
        match event.payload {
            Some(agent_event::Payload::CardEvent(card_event)) => {
                if let Some(card) = card_event.card {
                    info!(
                        agent = %card_event.agent_id,
                        event_type = %card_event.event_type,
                        "agent discovered"
                    );
                    self.catalog.upsert(card);
                } else {
                    debug!(agent = %card_event.agent_id, "card event without card");
                }
            }
            Some(agent_event::Payload::Message(message)) => {
                self.handle_message(message, &routing, trace.as_ref()).await;
            }
            Some(other) => {
                debug!(event_id = %event.event_id, payload = ?other, "ignoring payload kind");
            }
            None => {
                debug!(event_id = %event.event_id, "event without payload");
            }
        }
    }

    async fn handle_message(
        &self,
        mut message: Message,
        routing: &EventRouting,
        trace: Option<&TraceContext>,
    ) {
        if routing.from_agent_id == self.agent_id {
            debug!(message_id = %message.message_id, "ignoring own message");
            return;
        }

        let context_id = self.resolve_context(&message).await;
        message.context_id = context_id.clone();
        self.state.append_message(&context_id, message.clone()).await;

        let history = self.state.history(&context_id).await;
        let agents = self.catalog.snapshot();
        let decision = match self.engine.decide(&history, &agents, &message).await {
            Ok(decision) => decision,
            Err(err) => {
                warn!(context_id = %context_id, %err, "decision failed");
                self.publish_chat(&context_id, APOLOGY, trace).await;
                return;
            }
        };
        info!(
            context_id = %context_id,
            actions = decision.actions.len(),
            "decision made"
        );

        if !decision.reasoning.is_empty() {
            let mut reasoning = text_message(Role::Agent, decision.reasoning.clone());
            reasoning.context_id = context_id.clone();
            reasoning.metadata = Some(json_to_struct(
                &serde_json::json!({ "cortex.reasoning": true }),
            ));
            self.state.append_message(&context_id, reasoning).await;
        }

        for action in decision.actions {
            self.execute(&context_id, action, trace).await;
        }
    }

    /// Recovers the session for an inbound message: the task index wins,
    /// then the message's own context, then a fresh one.
    async fn resolve_context(&self, message: &Message) -> String {
        if !message.task_id.is_empty() {
            if let Some(task) = self.state.resolve_task(&message.task_id).await {
                return task.context_id;
            }
        }
        if !message.context_id.is_empty() {
            return message.context_id.clone();
        }
        Uuid::new_v4().to_string()
    }

    async fn execute(&self, context_id: &str, action: Action, trace: Option<&TraceContext>) {
        match action {
            Action::ChatResponse { text } => {
                self.publish_chat(context_id, &text, trace).await;
            }
            Action::TaskRequest {
                task_type,
                target_agent,
                payload,
            } => {
                let task_id = Uuid::new_v4().to_string();
                let mut message = text_message(
                    Role::User,
                    format!("Please handle this `{task_type}` task."),
                );
                message.context_id = context_id.to_owned();
                message.task_id = task_id.clone();
                if !payload.is_null() {
                    message.content.push(data_part(&payload, "task payload"));
                }
                message.metadata = Some(json_to_struct(
                    &serde_json::json!({ "task_type": task_type }),
                ));

                self.state
                    .register_task(&task_id, context_id, &task_type)
                    .await;

                let routing = EventRouting {
                    from_agent_id: self.agent_id.clone(),
                    to_agent_id: target_agent.clone(),
                    event_type: "task.request".to_owned(),
                    subscriptions: Vec::new(),
                    priority: Priority::Medium as i32,
                };
                match self.publisher.publish_message(message, routing, trace).await {
                    Ok(event_id) => info!(
                        task_id = %task_id,
                        target = %target_agent,
                        event_id = %event_id,
                        "task requested"
                    ),
                    Err(err) => {
                        self.metrics.record_publish_failure();
                        warn!(task_id = %task_id, target = %target_agent, %err, "publish failed");
                    }
                }
            }
        }
    }

    async fn publish_chat(&self, context_id: &str, text: &str, trace: Option<&TraceContext>) {
        let mut message = text_message(Role::Agent, text);
        message.context_id = context_id.to_owned();
        let routing = EventRouting {
            from_agent_id: self.agent_id.clone(),
            to_agent_id: String::new(),
            event_type: "chat.response".to_owned(),
            subscriptions: Vec::new(),
            priority: Priority::Medium as i32,
        };
        if let Err(err) = self.publisher.publish_message(message, routing, trace).await {
            self.metrics.record_publish_failure();
            warn!(context_id = %context_id, %err, "publish failed");
        }
    }
}

/// Registers with the broker and consumes both subscription streams until
/// `shutdown` flips.
///
/// # Errors
///
/// Returns [`hub_client::ClientError`] when the initial registration fails;
/// stream failures afterwards are retried with backoff.
pub async fn run(
    cortex: Arc<Cortex>,
    client: HubClient,
    shutdown: watch::Receiver<bool>,
) -> ClientResult<()> {
    let response = client
        .register(
            cortex.card(),
            vec!["messages".to_owned(), "agent_events".to_owned()],
        )
        .await?;
    info!(agent_id = %response.agent_id, "registered with broker");

    let messages = tokio::spawn(consume(
        Arc::clone(&cortex),
        client.clone(),
        StreamSelect::Messages,
        shutdown.clone(),
    ));
    let events = tokio::spawn(consume(
        cortex,
        client,
        StreamSelect::AgentEvents,
        shutdown,
    ));
    let _ = messages.await;
    let _ = events.await;
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum StreamSelect {
    Messages,
    AgentEvents,
}

impl StreamSelect {
    const fn name(self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::AgentEvents => "agent_events",
        }
    }
}

async fn consume(
    cortex: Arc<Cortex>,
    client: HubClient,
    select: StreamSelect,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        if *shutdown.borrow() {
            return;
        }

        let stream = match select {
            StreamSelect::Messages => client.subscribe_messages(cortex.agent_id()).await,
            StreamSelect::AgentEvents => {
                client
                    .subscribe_agent_events(
                        cortex.agent_id(),
                        vec!["agent.registered".to_owned(), "agent.updated".to_owned()],
                    )
                    .await
            }
        };

        match stream {
            Ok(mut stream) => {
                info!(stream = select.name(), "stream open");
                backoff = INITIAL_BACKOFF;
                loop {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                return;
                            }
                        }
                        next = stream.message() => match next {
                            Ok(Some(event)) => cortex.handle_event(event).await,
                            Ok(None) => {
                                warn!(stream = select.name(), "stream closed by broker");
                                break;
                            }
                            Err(status) => {
                                warn!(stream = select.name(), %status, "stream error");
                                break;
                            }
                        }
                    }
                }
            }
            Err(err) => warn!(stream = select.name(), %err, "subscribe failed"),
        }

        tokio::select! {
            () = tokio::time::sleep(backoff) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
