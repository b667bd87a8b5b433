//! In-memory task store: the process-lifetime record of every task seen by
//! the broker.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use hub_proto::a2a::{self, text_message, TaskStateExt};
use hub_proto::pb::{Artifact, Role, Task, TaskState, TaskStatus};
use thiserror::Error;

/// Result alias for task store operations.
pub type TaskStoreResult<T> = Result<T, TaskStoreError>;

/// Errors surfaced by the task store.
#[derive(Debug, Error)]
pub enum TaskStoreError {
    /// The task id is unknown.
    #[error("task `{task_id}` not found")]
    NotFound {
        /// The requested task id.
        task_id: String,
    },

    /// The task already reached a terminal state.
    #[error("task `{task_id}` is in terminal state {state:?}")]
    Terminal {
        /// The task id.
        task_id: String,
        /// Its current terminal state.
        state: TaskState,
    },

    /// The requested state change is not permitted.
    #[error("task `{task_id}` cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        /// The task id.
        task_id: String,
        /// Current state.
        from: TaskState,
        /// Requested state.
        to: TaskState,
    },

    /// A required field was missing from the update.
    #[error("task update missing {field}")]
    MissingField {
        /// The absent field.
        field: &'static str,
    },
}

#[derive(Debug, Default)]
struct Inner {
    tasks: HashMap<String, Task>,
    order: Vec<String>,
}

/// Mutex-guarded map of task aggregates. All reads return copies; no lock
/// is ever held across an await point.
#[derive(Debug, Default)]
pub struct TaskStore {
    inner: Mutex<Inner>,
}

impl TaskStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or updates a task from a status update.
    ///
    /// An unknown task id creates the aggregate; a known one advances its
    /// status and appends the update message to history.
    ///
    /// # Errors
    ///
    /// Returns [`TaskStoreError::MissingField`] on an empty id or absent
    /// status, [`TaskStoreError::Terminal`] when the stored task already
    /// finished, and [`TaskStoreError::InvalidTransition`] for a move the
    /// state machine forbids.
    pub fn upsert(&self, update: Task) -> TaskStoreResult<Task> {
        if update.id.trim().is_empty() {
            return Err(TaskStoreError::MissingField { field: "id" });
        }
        let Some(mut status) = update.status else {
            return Err(TaskStoreError::MissingField { field: "status" });
        };
        let next = known_state(status.state)?;
        if status.timestamp.is_none() {
            status.timestamp = Some(a2a::now());
        }

        let mut inner = self.lock();
        if let Some(existing) = inner.tasks.get_mut(&update.id) {
            let current = stored_state(existing);
            if current.is_terminal() {
                return Err(TaskStoreError::Terminal {
                    task_id: update.id,
                    state: current,
                });
            }
            if !current.can_transition_to(next) {
                return Err(TaskStoreError::InvalidTransition {
                    task_id: update.id,
                    from: current,
                    to: next,
                });
            }
            if let Some(message) = &status.update {
                existing.history.push(message.clone());
            }
            existing.status = Some(status);
            if update.metadata.is_some() {
                existing.metadata = update.metadata;
            }
            if existing.context_id.is_empty() {
                existing.context_id = update.context_id;
            }
            return Ok(existing.clone());
        }

        let mut task = Task {
            id: update.id.clone(),
            context_id: update.context_id,
            status: None,
            history: Vec::new(),
            artifacts: Vec::new(),
            metadata: update.metadata,
        };
        if let Some(message) = &status.update {
            task.history.push(message.clone());
        }
        task.status = Some(status);
        inner.order.push(update.id.clone());
        inner.tasks.insert(update.id, task.clone());
        Ok(task)
    }

    /// Appends an artifact to an existing, non-terminal task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskStoreError::NotFound`] for an unknown id and
    /// [`TaskStoreError::Terminal`] when the task already finished.
    pub fn append_artifact(&self, task_id: &str, artifact: Artifact) -> TaskStoreResult<Task> {
        let mut inner = self.lock();
        let Some(task) = inner.tasks.get_mut(task_id) else {
            return Err(TaskStoreError::NotFound {
                task_id: task_id.to_owned(),
            });
        };
        let state = stored_state(task);
        if state.is_terminal() {
            return Err(TaskStoreError::Terminal {
                task_id: task_id.to_owned(),
                state,
            });
        }
        task.artifacts.push(artifact);
        Ok(task.clone())
    }

    /// Returns a copy of the task. A non-zero `history_limit` keeps only
    /// the most recent entries, in order.
    ///
    /// # Errors
    ///
    /// Returns [`TaskStoreError::NotFound`] for an unknown id.
    pub fn get(&self, task_id: &str, history_limit: usize) -> TaskStoreResult<Task> {
        let inner = self.lock();
        let Some(task) = inner.tasks.get(task_id) else {
            return Err(TaskStoreError::NotFound {
                task_id: task_id.to_owned(),
            });
        };
        let mut task = task.clone();
        if history_limit > 0 && task.history.len() > history_limit {
            task.history.drain(..task.history.len() - history_limit);
        }
        Ok(task)
    }

    /// Cancels an active task, synthesizing a status message from `reason`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskStoreError::NotFound`] for an unknown id and
    /// [`TaskStoreError::Terminal`] when the task already finished.
    pub fn cancel(&self, task_id: &str, reason: &str) -> TaskStoreResult<Task> {
        let mut inner = self.lock();
        let Some(task) = inner.tasks.get_mut(task_id) else {
            return Err(TaskStoreError::NotFound {
                task_id: task_id.to_owned(),
            });
        };
        let state = stored_state(task);
        if state.is_terminal() {
            return Err(TaskStoreError::Terminal {
                task_id: task_id.to_owned(),
                state,
            });
        }

        let mut message = text_message(Role::Agent, reason);
        message.context_id = task.context_id.clone();
        message.task_id = task.id.clone();
        task.history.push(message.clone());
        task.status = Some(TaskStatus {
            state: TaskState::Cancelled as i32,
            update: Some(message),
            timestamp: Some(a2a::now()),
        });
        Ok(task.clone())
    }

    /// Lists tasks in insertion order, filtered by context and states.
    /// `limit` of zero means unbounded.
    #[must_use]
    pub fn list(&self, context_id: Option<&str>, states: &[TaskState], limit: usize) -> Vec<Task> {
        let inner = self.lock();
        let mut out = Vec::new();
        for id in &inner.order {
            let Some(task) = inner.tasks.get(id) else {
                continue;
            };
            if let Some(context) = context_id {
                if task.context_id != context {
                    continue;
                }
            }
            if !states.is_empty() && !states.contains(&stored_state(task)) {
                continue;
            }
            out.push(task.clone());
            if limit > 0 && out.len() == limit {
                break;
            }
        }
        out
    }

    /// Returns the number of stored tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    /// Returns `true` when no task has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn stored_state(task: &Task) -> TaskState {
    task.status
        .as_ref()
        .and_then(|status| TaskState::try_from(status.state).ok())
        .unwrap_or(TaskState::Unspecified)
}

fn known_state(raw: i32) -> TaskStoreResult<TaskState> {
    match TaskState::try_from(raw) {
        Ok(TaskState::Unspecified) | Err(_) => {
            Err(TaskStoreError::MissingField { field: "status.state" })
        }
        Ok(state) => Ok(state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(id: &str, state: TaskState, text: &str) -> Task {
        Task {
            id: id.to_owned(),
            context_id: "ctx".to_owned(),
            status: Some(TaskStatus {
                state: state as i32,
                update: Some(text_message(Role::Agent, text)),
                timestamp: None,
            }),
            history: Vec::new(),
            artifacts: Vec::new(),
            metadata: None,
        }
    }

    #[test]
    fn lifecycle_accumulates_history() {
        let store = TaskStore::new();
        store.upsert(update("t1", TaskState::Submitted, "u1")).unwrap();
        store.upsert(update("t1", TaskState::Working, "u2")).unwrap();
        let task = store.upsert(update("t1", TaskState::Completed, "u3")).unwrap();

        assert_eq!(stored_state(&task), TaskState::Completed);
        let texts: Vec<String> = task.history.iter().map(a2a::message_text).collect();
        assert_eq!(texts, ["u1", "u2", "u3"]);
    }

    #[test]
    fn terminal_tasks_reject_updates_unchanged() {
        let store = TaskStore::new();
        store.upsert(update("t1", TaskState::Submitted, "u1")).unwrap();
        store.upsert(update("t1", TaskState::Completed, "u2")).unwrap();

        let err = store
            .upsert(update("t1", TaskState::Working, "late"))
            .unwrap_err();
        assert!(matches!(err, TaskStoreError::Terminal { .. }));

        let task = store.get("t1", 0).unwrap();
        assert_eq!(task.history.len(), 2);
        assert_eq!(stored_state(&task), TaskState::Completed);
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let store = TaskStore::new();
        store.upsert(update("t1", TaskState::Working, "u1")).unwrap();
        let err = store
            .upsert(update("t1", TaskState::Submitted, "back"))
            .unwrap_err();
        assert!(matches!(err, TaskStoreError::InvalidTransition { .. }));
    }

    #[test]
    fn artifacts_require_active_task() {
        let store = TaskStore::new();
        let err = store
            .append_artifact("ghost", Artifact::default())
            .unwrap_err();
        assert!(matches!(err, TaskStoreError::NotFound { .. }));

        store.upsert(update("t1", TaskState::Working, "u1")).unwrap();
        let task = store.append_artifact("t1", Artifact::default()).unwrap();
        assert_eq!(task.artifacts.len(), 1);

        store.upsert(update("t1", TaskState::Failed, "boom")).unwrap();
        let err = store
            .append_artifact("t1", Artifact::default())
            .unwrap_err();
        assert!(matches!(err, TaskStoreError::Terminal { .. }));
    }

    #[test]
    fn get_truncates_history_to_tail() {
        let store = TaskStore::new();
        store.upsert(update("t1", TaskState::Submitted, "u1")).unwrap();
        store.upsert(update("t1", TaskState::Working, "u2")).unwrap();
        store.upsert(update("t1", TaskState::Working, "u3")).unwrap();

        let task = store.get("t1", 2).unwrap();
        let texts: Vec<String> = task.history.iter().map(a2a::message_text).collect();
        assert_eq!(texts, ["u2", "u3"]);

        let full = store.get("t1", 0).unwrap();
        assert_eq!(full.history.len(), 3);
    }

    #[test]
    fn cancel_synthesizes_reason_and_is_not_idempotent() {
        let store = TaskStore::new();
        store.upsert(update("t1", TaskState::Working, "u1")).unwrap();

        let task = store.cancel("t1", "operator request").unwrap();
        assert_eq!(stored_state(&task), TaskState::Cancelled);
        let last = task.history.last().unwrap();
        assert_eq!(a2a::message_text(last), "operator request");

        let err = store.cancel("t1", "again").unwrap_err();
        assert!(matches!(err, TaskStoreError::Terminal { .. }));
    }

    #[test]
    fn list_filters_and_preserves_insertion_order() {
        let store = TaskStore::new();
        store.upsert(update("t1", TaskState::Submitted, "a")).unwrap();
        store.upsert(update("t2", TaskState::Working, "b")).unwrap();
        let mut other = update("t3", TaskState::Working, "c");
        other.context_id = "other".to_owned();
        store.upsert(other).unwrap();

        let all = store.list(None, &[], 0);
        let ids: Vec<&str> = all.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["t1", "t2", "t3"]);

        let ctx = store.list(Some("ctx"), &[TaskState::Working], 0);
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx[0].id, "t2");

        let capped = store.list(None, &[], 2);
        assert_eq!(capped.len(), 2);
    }
}
