//! The AgentHub broker: bounded fan-out routing of A2A traffic, in-memory
//! task storage, and agent registration, fronted by a gRPC service.

#![warn(missing_docs, clippy::pedantic)]

mod agents;
mod router;
mod service;
mod subscriptions;
mod tasks;

pub use agents::{AgentRegistry, RegisteredAgent};
pub use router::{Router, SEND_TIMEOUT};
pub use service::AgentHubService;
pub use subscriptions::{
    EventFilter, StreamKind, Subscriber, SubscriptionRegistry, QUEUE_CAPACITY,
};
pub use tasks::{TaskStore, TaskStoreError, TaskStoreResult};
