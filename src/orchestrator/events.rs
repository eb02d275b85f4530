//! Event bus (C11 ambient concern): a broadcast channel of lifecycle
//! events, grounded on `services/events/event_bus.py` and
//! `event_types.py`.

use tokio::sync::broadcast;

/// The eleven lifecycle events a task iteration can emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlchemyEvent {
    /// A new process/iteration has started.
    ProcessStarted {
        /// The task id.
        task_id: String,
    },
    /// Intent parsing completed.
    IntentParsed {
        /// The task id.
        task_id: String,
    },
    /// A search plan was built.
    PlanBuilt {
        /// The task id.
        task_id: String,
    },
    /// The search plan finished executing.
    SearchExecuted {
        /// The task id.
        task_id: String,
        /// Total hits found.
        total_hits: usize,
    },
    /// An HTML artifact was generated.
    ArtifactGenerated {
        /// The task id.
        task_id: String,
        /// The iteration number produced.
        iteration: u32,
    },
    /// A follow-up query was suggested.
    OptimizationSuggested {
        /// The task id.
        task_id: String,
        /// The suggested query text.
        query: String,
    },
    /// The process completed successfully.
    ProcessCompleted {
        /// The task id.
        task_id: String,
    },
    /// An error occurred during processing.
    ErrorOccurred {
        /// The task id.
        task_id: String,
        /// The error message.
        message: String,
    },
    /// Cancellation was requested for a running task.
    CancellationRequested {
        /// The task id.
        task_id: String,
    },
    /// The process was cancelled.
    ProcessCancelled {
        /// The task id.
        task_id: String,
    },
    /// A checkpoint was written.
    ProcessCheckpoint {
        /// The task id.
        task_id: String,
        /// The step name recorded at this checkpoint.
        step: String,
    },
}

/// A broadcast channel of [`AlchemyEvent`]s. Publishing is fire-and-forget:
/// if there are no subscribers, the event is simply dropped, matching the
/// original's non-blocking `publish`.
pub struct EventBus {
    sender: broadcast::Sender<AlchemyEvent>,
}

impl EventBus {
    /// Construct a bus with the given subscriber buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AlchemyEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers, dropping it silently if
    /// there are none.
    pub fn publish(&self, event: AlchemyEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(AlchemyEvent::ProcessStarted { task_id: "t1".to_string() });
        let event = rx.recv().await.unwrap();
        assert_eq!(event, AlchemyEvent::ProcessStarted { task_id: "t1".to_string() });
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(AlchemyEvent::ProcessCompleted { task_id: "t1".to_string() });
    }
}
