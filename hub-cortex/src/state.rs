//! Per-conversation state: append-only history plus the index linking
//! in-flight tasks back to their originating session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hub_proto::pb::Message;
use tokio::sync::Mutex;

/// Where a delegated task came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContext {
    /// The conversation that requested the task.
    pub context_id: String,
    /// The task type recorded at request time.
    pub task_type: String,
    /// When the request was issued.
    pub requested_at: DateTime<Utc>,
}

/// Storage seam for conversation state, so the in-memory POC below can be
/// swapped for a persistent implementation.
#[async_trait]
pub trait SessionStateManager: Send + Sync {
    /// Appends a message to the session's history, creating the session on
    /// first use.
    async fn append_message(&self, context_id: &str, message: Message);

    /// Returns a copy of the session's history, oldest first.
    async fn history(&self, context_id: &str) -> Vec<Message>;

    /// Links a delegated task back to its originating session.
    async fn register_task(&self, task_id: &str, context_id: &str, task_type: &str);

    /// Resolves a task id to the session that requested it.
    async fn resolve_task(&self, task_id: &str) -> Option<TaskContext>;

    /// Removes a session and its history.
    async fn delete(&self, context_id: &str);
}

#[derive(Debug, Default)]
struct Session {
    history: Mutex<Vec<Message>>,
}

/// In-memory session store. A std mutex guards only the top-level maps;
/// each session carries its own async mutex, so concurrent sessions do not
/// contend.
#[derive(Debug, Default)]
pub struct InMemorySessionManager {
    sessions: StdMutex<HashMap<String, Arc<Session>>>,
    tasks: StdMutex<HashMap<String, TaskContext>>,
}

impl InMemorySessionManager {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn session(&self, context_id: &str) -> Arc<Session> {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(sessions.entry(context_id.to_owned()).or_default())
    }

    /// Returns the number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl SessionStateManager for InMemorySessionManager {
    async fn append_message(&self, context_id: &str, message: Message) {
        let session = self.session(context_id);
        session.history.lock().await.push(message);
    }

    async fn history(&self, context_id: &str) -> Vec<Message> {
        let session = self.session(context_id);
        let history = session.history.lock().await;
        history.clone()
    }

    async fn register_task(&self, task_id: &str, context_id: &str, task_type: &str) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.insert(
            task_id.to_owned(),
            TaskContext {
                context_id: context_id.to_owned(),
                task_type: task_type.to_owned(),
                requested_at: Utc::now(),
            },
        );
    }

    async fn resolve_task(&self, task_id: &str) -> Option<TaskContext> {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.get(task_id).cloned()
    }

    async fn delete(&self, context_id: &str) {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        sessions.remove(context_id);
        drop(sessions);

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|_, task| task.context_id != context_id);
    }
}
