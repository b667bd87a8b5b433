//! Per-stream subscription tables: which delivery queues receive which
//! events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use hub_proto::a2a::metadata_string;
use hub_proto::pb::{agent_event, AgentEvent, TaskState};
use tokio::sync::mpsc;

/// Capacity of every subscriber delivery queue.
pub const QUEUE_CAPACITY: usize = 10;

/// The three event streams the broker serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// A2A messages.
    Messages,
    /// Task status and artifact updates.
    Tasks,
    /// Agent registration events.
    AgentEvents,
}

impl StreamKind {
    /// Returns the stream name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::Tasks => "tasks",
            Self::AgentEvents => "agent_events",
        }
    }
}

/// Subscriber-side predicate applied before enqueueing an event.
///
/// Filters are conjunctive; an empty list matches everything.
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Match every event on the stream.
    All,
    /// Match task events by task type and state.
    Tasks {
        /// Accepted task types (from task metadata); empty = all.
        task_types: Vec<String>,
        /// Accepted task states; empty = all.
        states: Vec<TaskState>,
    },
    /// Match agent events by routing event type.
    AgentEvents {
        /// Accepted event types; empty = all.
        event_types: Vec<String>,
    },
}

impl EventFilter {
    /// Returns `true` when the event passes this filter.
    #[must_use]
    pub fn matches(&self, event: &AgentEvent) -> bool {
        match self {
            Self::All => true,
            Self::Tasks {
                task_types,
                states,
            } => {
                let (task_type, state) = task_event_attributes(event);
                let type_ok = task_types.is_empty()
                    || task_type.is_some_and(|t| task_types.iter().any(|want| *want == t));
                let state_ok = states.is_empty()
                    || state.is_none_or(|s| states.contains(&s));
                type_ok && state_ok
            }
            Self::AgentEvents { event_types } => {
                event_types.is_empty()
                    || event
                        .routing
                        .as_ref()
                        .is_some_and(|r| event_types.contains(&r.event_type))
            }
        }
    }
}

fn task_event_attributes(event: &AgentEvent) -> (Option<String>, Option<TaskState>) {
    match &event.payload {
        Some(agent_event::Payload::Task(task)) => (
            metadata_string(task.metadata.as_ref(), "task_type"),
            task.status
                .as_ref()
                .and_then(|s| TaskState::try_from(s.state).ok()),
        ),
        Some(agent_event::Payload::StatusUpdate(update)) => (
            metadata_string(update.metadata.as_ref(), "task_type"),
            update
                .status
                .as_ref()
                .and_then(|s| TaskState::try_from(s.state).ok()),
        ),
        Some(agent_event::Payload::ArtifactUpdate(update)) => (
            metadata_string(update.metadata.as_ref(), "task_type"),
            None,
        ),
        _ => (None, None),
    }
}

/// One live subscription: an agent's delivery queue plus its filter.
#[derive(Debug)]
pub struct Subscriber {
    id: u64,
    agent_id: String,
    filter: EventFilter,
    queue: mpsc::Sender<AgentEvent>,
}

impl Subscriber {
    /// Returns the registry-assigned queue id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Returns the subscribing agent's id.
    #[must_use]
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Returns the subscription filter.
    #[must_use]
    pub const fn filter(&self) -> &EventFilter {
        &self.filter
    }

    /// Returns the delivery queue sender.
    #[must_use]
    pub const fn queue(&self) -> &mpsc::Sender<AgentEvent> {
        &self.queue
    }
}

type Table = HashMap<String, Vec<Arc<Subscriber>>>;

/// Thread-safe subscription tables, one per stream kind.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    next_id: AtomicU64,
    messages: RwLock<Table>,
    tasks: RwLock<Table>,
    agent_events: RwLock<Table>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    const fn table(&self, kind: StreamKind) -> &RwLock<Table> {
        match kind {
            StreamKind::Messages => &self.messages,
            StreamKind::Tasks => &self.tasks,
            StreamKind::AgentEvents => &self.agent_events,
        }
    }

    /// Registers a delivery queue for `agent_id` on the given stream.
    ///
    /// The same agent may hold any number of concurrent subscriptions.
    pub fn add(
        &self,
        kind: StreamKind,
        agent_id: impl Into<String>,
        filter: EventFilter,
        queue: mpsc::Sender<AgentEvent>,
    ) -> Arc<Subscriber> {
        let subscriber = Arc::new(Subscriber {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            agent_id: agent_id.into(),
            filter,
            queue,
        });
        let mut table = write_lock(self.table(kind));
        table
            .entry(subscriber.agent_id.clone())
            .or_default()
            .push(Arc::clone(&subscriber));
        subscriber
    }

    /// Removes one subscription by identity. Returns `false` when it was
    /// already gone, so callers can make removal idempotent.
    pub fn remove(&self, kind: StreamKind, subscriber: &Subscriber) -> bool {
        let mut table = write_lock(self.table(kind));
        let Some(queues) = table.get_mut(subscriber.agent_id()) else {
            return false;
        };
        let before = queues.len();
        queues.retain(|existing| existing.id != subscriber.id);
        let removed = queues.len() < before;
        if queues.is_empty() {
            table.remove(subscriber.agent_id());
        }
        removed
    }

    /// Copies out the queues targeted by `to_agent_id` (empty = every
    /// subscriber of the stream). The lock is released before the caller
    /// delivers anything.
    #[must_use]
    pub fn snapshot(&self, kind: StreamKind, to_agent_id: &str) -> Vec<Arc<Subscriber>> {
        let table = read_lock(self.table(kind));
        if to_agent_id.is_empty() {
            table.values().flatten().map(Arc::clone).collect()
        } else {
            table
                .get(to_agent_id)
                .map(|queues| queues.iter().map(Arc::clone).collect())
                .unwrap_or_default()
        }
    }

    /// Returns the number of live subscriptions on a stream.
    #[must_use]
    pub fn len(&self, kind: StreamKind) -> usize {
        read_lock(self.table(kind)).values().map(Vec::len).sum()
    }

    /// Returns `true` when a stream has no subscribers.
    #[must_use]
    pub fn is_empty(&self, kind: StreamKind) -> bool {
        self.len(kind) == 0
    }
}

fn read_lock(table: &RwLock<Table>) -> RwLockReadGuard<'_, Table> {
    table.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock(table: &RwLock<Table>) -> RwLockWriteGuard<'_, Table> {
    table.write().unwrap_or_else(PoisonError::into_inner)
}
