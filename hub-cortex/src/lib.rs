//! Cortex: the session-aware orchestrator that decides, via an LLM, which
//! registered agent should handle each incoming request, and executes the
//! decision by publishing back through the AgentHub broker.

#![warn(missing_docs, clippy::pedantic)]

mod catalog;
mod decision;
mod dispatch;
mod http;
mod remote;
mod state;

pub use catalog::AgentCatalog;
pub use decision::{
    Action, Decision, DecisionEngine, DecisionError, DecisionResult, MockDecisionEngine,
};
pub use dispatch::{run, Cortex, EventPublisher, APOLOGY};
pub use remote::RemoteDecisionEngine;
pub use state::{InMemorySessionManager, SessionStateManager, TaskContext};
