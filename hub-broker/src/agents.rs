//! Registry of agent cards, keyed by agent name.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use hub_proto::pb::AgentCard;

/// A card plus the subscriptions requested at registration time.
#[derive(Debug, Clone)]
pub struct RegisteredAgent {
    card: AgentCard,
    subscriptions: Vec<String>,
}

impl RegisteredAgent {
    /// Returns the registered card.
    #[must_use]
    pub const fn card(&self) -> &AgentCard {
        &self.card
    }

    /// Returns the subscriptions requested at registration.
    #[must_use]
    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }
}

/// Mapping from agent name to its most recent registration.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    inner: RwLock<HashMap<String, RegisteredAgent>>,
}

impl AgentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a card under its name, replacing any prior registration.
    /// Returns `true` when an existing entry was replaced.
    pub fn register(&self, card: AgentCard, subscriptions: Vec<String>) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner
            .insert(
                card.name.clone(),
                RegisteredAgent {
                    card,
                    subscriptions,
                },
            )
            .is_some()
    }

    /// Returns a copy of the card registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<AgentCard> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.get(name).map(|agent| agent.card.clone())
    }

    /// Returns a copy of every registered card.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AgentCard> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.values().map(|agent| agent.card.clone()).collect()
    }

    /// Returns the number of registered agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` when no agent has registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
