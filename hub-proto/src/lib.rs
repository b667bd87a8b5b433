//! Protobuf schema and gRPC bindings for the AgentHub broker.
//!
//! The generated types double as the in-process data model; the [`a2a`]
//! module layers constructors, metadata conversion, and the task state
//! machine on top of them.

#![warn(clippy::pedantic)]

/// Generated protobuf types for the `agenthub.v1` package.
#[allow(clippy::pedantic, clippy::all, missing_docs)]
pub mod pb {
    tonic::include_proto!("agenthub.v1");
}

pub mod a2a;

pub use pb::agent_hub_client::AgentHubClient;
pub use pb::agent_hub_server::{AgentHub, AgentHubServer};
