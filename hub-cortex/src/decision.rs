//! The decision seam: `history × available agents × new event → actions`.

use async_trait::async_trait;
use hub_proto::pb::{AgentCard, Message};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias for decision engines.
pub type DecisionResult<T> = Result<T, DecisionError>;

/// Errors surfaced by decision engines.
#[derive(Debug, Error)]
pub enum DecisionError {
    /// The engine is missing credentials or misconfigured.
    #[error("decision engine not configured: {reason}")]
    Configuration {
        /// Additional context for the failure.
        reason: String,
    },

    /// The model endpoint could not be reached or timed out.
    #[error("decision transport error: {reason}")]
    Transport {
        /// Additional context about the error.
        reason: String,
    },

    /// The model responded with something that is not a decision.
    #[error("malformed decision: {reason}")]
    Malformed {
        /// Why the response could not be parsed.
        reason: String,
    },
}

impl DecisionError {
    /// Convenience constructor for configuration issues.
    #[must_use]
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for transport failures.
    #[must_use]
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for unparseable responses.
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

/// One step the orchestrator should take in response to an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Action {
    /// Reply to the conversation directly.
    #[serde(rename = "chat.response")]
    ChatResponse {
        /// The reply text.
        text: String,
    },

    /// Delegate a task to a registered agent.
    #[serde(rename = "task.request")]
    TaskRequest {
        /// Task type recorded in the task metadata.
        task_type: String,
        /// Name of the agent that should handle the task.
        target_agent: String,
        /// Structured payload forwarded to the agent.
        #[serde(default)]
        payload: serde_json::Value,
    },
}

/// The outcome of one decision call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// The model's reasoning; recorded in session history, never published.
    #[serde(default)]
    pub reasoning: String,
    /// Actions to execute, in order.
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// Pluggable decision maker: mock for tests, remote model in production.
#[async_trait]
pub trait DecisionEngine: Send + Sync {
    /// Decides what to do about `event` given the session history and the
    /// currently registered agents.
    async fn decide(
        &self,
        history: &[Message],
        agents: &[AgentCard],
        event: &Message,
    ) -> DecisionResult<Decision>;
}

type MockFn =
    dyn Fn(&[Message], &[AgentCard], &Message) -> DecisionResult<Decision> + Send + Sync;

/// Deterministic engine backed by a closure, for tests.
pub struct MockDecisionEngine {
    decide: Box<MockFn>,
}

impl MockDecisionEngine {
    /// Wraps a closure as a decision engine.
    pub fn new<F>(decide: F) -> Self
    where
        F: Fn(&[Message], &[AgentCard], &Message) -> DecisionResult<Decision>
            + Send
            + Sync
            + 'static,
    {
        Self {
            decide: Box::new(decide),
        }
    }

    /// Engine that returns the same decision for every event.
    #[must_use]
    pub fn always(decision: Decision) -> Self {
        Self::new(move |_, _, _| Ok(decision.clone()))
    }

    /// Engine that fails every call.
    #[must_use]
    pub fn failing(reason: &str) -> Self {
        let reason = reason.to_owned();
        Self::new(move |_, _, _| Err(DecisionError::transport(reason.clone())))
    }
}

impl std::fmt::Debug for MockDecisionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDecisionEngine").finish_non_exhaustive()
    }
}

#[async_trait]
impl DecisionEngine for MockDecisionEngine {
    async fn decide(
        &self,
        history: &[Message],
        agents: &[AgentCard],
        event: &Message,
    ) -> DecisionResult<Decision> {
        (self.decide)(history, agents, event)
    }
}
