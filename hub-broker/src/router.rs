//! Fan-out of one published event to every matching subscriber queue,
//! with bounded waits and drop-on-overflow.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use hub_proto::pb::AgentEvent;
use hub_telemetry::HubMetrics;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tracing::warn;

use crate::subscriptions::{StreamKind, Subscriber, SubscriptionRegistry};

/// Longest a delivery may wait on a full subscriber queue.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Routes events to subscriber queues with at most a bounded wait per
/// recipient.
#[derive(Debug, Clone)]
pub struct Router {
    subscriptions: Arc<SubscriptionRegistry>,
    metrics: Arc<HubMetrics>,
}

impl Router {
    /// Creates a router over the given subscription tables.
    #[must_use]
    pub fn new(subscriptions: Arc<SubscriptionRegistry>, metrics: Arc<HubMetrics>) -> Self {
        Self {
            subscriptions,
            metrics,
        }
    }

    /// Selects recipients for `event` and attempts one delivery per
    /// recipient, concurrently. Returns how many recipients matched.
    ///
    /// The waits run inside the caller's own future: when a publisher
    /// cancels its RPC, every still-pending delivery is cancelled with it
    /// and recorded as a drop. A recipient whose queue stays full past
    /// [`SEND_TIMEOUT`] loses this event; the drop is counted and logged,
    /// never surfaced to the publisher.
    pub async fn route(&self, kind: StreamKind, event: &AgentEvent) -> usize {
        let to_agent_id = event
            .routing
            .as_ref()
            .map_or("", |routing| routing.to_agent_id.as_str());
        let recipients = self.subscriptions.snapshot(kind, to_agent_id);
        self.metrics.record_routed();

        let deliveries: Vec<_> = recipients
            .into_iter()
            .filter(|subscriber| subscriber.filter().matches(event))
            .map(|subscriber| deliver(subscriber, event.clone(), Arc::clone(&self.metrics)))
            .collect();
        let attempted = deliveries.len();
        join_all(deliveries).await;
        attempted
    }
}

enum Outcome {
    Delivered,
    Dropped(&'static str),
}

async fn deliver(subscriber: Arc<Subscriber>, event: AgentEvent, metrics: Arc<HubMetrics>) {
    let mut guard = CancelGuard {
        metrics: Arc::clone(&metrics),
        agent_id: subscriber.agent_id().to_owned(),
        queue_id: subscriber.id(),
        event_id: event.event_id.clone(),
        armed: true,
    };
    let queue = subscriber.queue();
    metrics.observe_queue_depth((queue.max_capacity() - queue.capacity()) as u64);

    let outcome = match queue.try_send(event) {
        Ok(()) => Outcome::Delivered,
        Err(TrySendError::Closed(_)) => Outcome::Dropped("queue closed"),
        Err(TrySendError::Full(event)) => match queue.send_timeout(event, SEND_TIMEOUT).await {
            Ok(()) => Outcome::Delivered,
            Err(SendTimeoutError::Timeout(_)) => Outcome::Dropped("send timeout"),
            Err(SendTimeoutError::Closed(_)) => Outcome::Dropped("queue closed"),
        },
    };

    guard.armed = false;
    match outcome {
        Outcome::Delivered => metrics.record_delivery(),
        Outcome::Dropped(reason) => {
            metrics.record_drop();
            warn!(
                event_id = %guard.event_id,
                recipient = %guard.agent_id,
                queue = guard.queue_id,
                reason,
                "dropping event"
            );
        }
    }
}

/// Records a drop when a delivery is cancelled before reaching an outcome,
/// which happens when the publisher abandons its RPC mid-wait.
struct CancelGuard {
    metrics: Arc<HubMetrics>,
    agent_id: String,
    queue_id: u64,
    event_id: String,
    armed: bool,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if self.armed {
            self.metrics.record_drop();
            warn!(
                event_id = %self.event_id,
                recipient = %self.agent_id,
                queue = self.queue_id,
                reason = "publisher cancelled",
                "dropping event"
            );
        }
    }
}
