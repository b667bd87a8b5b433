//! Live view of the agents registered with the broker, fed by
//! agent-registration events.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use hub_proto::pb::AgentCard;

/// Agent cards known to the orchestrator, keyed by agent name.
/// Re-registrations replace the prior card.
#[derive(Debug, Default)]
pub struct AgentCatalog {
    inner: RwLock<HashMap<String, AgentCard>>,
}

impl AgentCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a card under its name.
    pub fn upsert(&self, card: AgentCard) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.insert(card.name.clone(), card);
    }

    /// Returns a copy of the card registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<AgentCard> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.get(name).cloned()
    }

    /// Returns a copy of every known card, sorted by name for stable
    /// prompt rendering.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AgentCard> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut cards: Vec<AgentCard> = inner.values().cloned().collect();
        cards.sort_by(|a, b| a.name.cmp(&b.name));
        cards
    }

    /// Returns the number of known agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` when no agent is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
