//! Asynchronous status events and the bounded event bus.
//!
//! Stages report state transitions, failures, format changes, and
//! end-of-stream to the controller through a single bounded mailbox. The
//! bus carries control and status only - never sample data - and its
//! overflow behavior is explicit so an event storm can never stall a
//! stage's data path.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::StageError;
use crate::format::StreamFormat;
use crate::stage::StageState;

/// What the event bus does when it is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Discard the oldest queued event to make room (logged via `tracing`).
    ///
    /// This is the default: publishing never blocks a stage's loop.
    #[default]
    DropOldest,

    /// Block the publisher until the consumer makes room.
    ///
    /// Lossless, but a stalled listener will eventually stall the stages.
    Block,
}

/// An asynchronous status message from a stage to the controller.
#[derive(Debug, Clone)]
pub struct PipelineEvent {
    /// Name of the stage that emitted the event.
    pub stage: String,
    /// What happened.
    pub kind: EventKind,
}

/// The kinds of event a stage can emit.
///
/// Events from the same stage are delivered in emission order; there is no
/// ordering guarantee across different stages.
#[derive(Debug, Clone)]
pub enum EventKind {
    /// The stage moved through its lifecycle state machine.
    StateChanged {
        /// State before the transition.
        from: StageState,
        /// State after the transition.
        to: StageState,
    },

    /// The stage's processing function failed.
    ///
    /// The stage has already begun stopping; downstream stages drain
    /// normally. The pipeline is not crashed - the controller decides
    /// whether to stop everything or let the run finish.
    Error(StageError),

    /// The stage reported the format of the data it produces.
    FormatReport(StreamFormat),

    /// The stage reached natural end-of-stream.
    ///
    /// Emitted by a source when its driver runs out of data, and by
    /// downstream stages once their input queue is closed and drained.
    StreamEnded,
}

/// Bounded many-writers/one-reader mailbox for [`PipelineEvent`]s.
///
/// This is the sole synchronization point exposed to the controller; it
/// must never be used for data transfer.
pub struct EventBus {
    inner: Mutex<VecDeque<PipelineEvent>>,
    readable: Notify,
    writable: Notify,
    capacity: usize,
    policy: OverflowPolicy,
}

async fn wait(notified: impl Future<Output = ()>, deadline: Option<Instant>) -> bool {
    match deadline {
        Some(d) => tokio::time::timeout_at(d, notified).await.is_ok(),
        None => {
            notified.await;
            true
        }
    }
}

impl EventBus {
    /// Creates a bus with the given capacity and overflow policy.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            readable: Notify::new(),
            writable: Notify::new(),
            capacity,
            policy,
        }
    }

    /// Returns the number of queued events.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns `true` if no events are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Publishes an event.
    ///
    /// Under [`OverflowPolicy::DropOldest`] this never blocks; under
    /// [`OverflowPolicy::Block`] it waits for the listener to make room.
    pub async fn publish(&self, event: PipelineEvent) {
        loop {
            let notified = self.writable.notified();
            {
                let mut queue = self.inner.lock();
                if queue.len() < self.capacity {
                    queue.push_back(event);
                    drop(queue);
                    self.readable.notify_waiters();
                    return;
                }
                if self.policy == OverflowPolicy::DropOldest {
                    let dropped = queue.pop_front();
                    queue.push_back(event);
                    drop(queue);
                    if let Some(dropped) = dropped {
                        tracing::warn!(
                            stage = %dropped.stage,
                            kind = ?dropped.kind,
                            "event bus full, dropped oldest event"
                        );
                    }
                    self.readable.notify_waiters();
                    return;
                }
            }
            notified.await;
        }
    }

    /// Waits for the next event, bounded by an optional timeout.
    ///
    /// Returns `None` if the timeout elapses with no event. `None` timeout
    /// waits forever.
    pub async fn listen(&self, timeout: Option<Duration>) -> Option<PipelineEvent> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let notified = self.readable.notified();
            {
                let mut queue = self.inner.lock();
                if let Some(event) = queue.pop_front() {
                    drop(queue);
                    self.writable.notify_waiters();
                    return Some(event);
                }
            }
            if !wait(notified, deadline).await {
                return None;
            }
        }
    }

    /// Drains all currently queued events without waiting.
    pub fn drain(&self) -> Vec<PipelineEvent> {
        let drained: Vec<_> = self.inner.lock().drain(..).collect();
        if !drained.is_empty() {
            self.writable.notify_waiters();
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn state_event(stage: &str, from: StageState, to: StageState) -> PipelineEvent {
        PipelineEvent {
            stage: stage.to_string(),
            kind: EventKind::StateChanged { from, to },
        }
    }

    #[tokio::test]
    async fn test_publish_listen_order() {
        let bus = EventBus::new(8, OverflowPolicy::DropOldest);
        bus.publish(state_event("a", StageState::Init, StageState::Running))
            .await;
        bus.publish(state_event("a", StageState::Running, StageState::Stopping))
            .await;

        let first = bus.listen(None).await.unwrap();
        let second = bus.listen(None).await.unwrap();
        assert!(matches!(
            first.kind,
            EventKind::StateChanged {
                to: StageState::Running,
                ..
            }
        ));
        assert!(matches!(
            second.kind,
            EventKind::StateChanged {
                to: StageState::Stopping,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_listen_timeout_returns_none() {
        let bus = EventBus::new(8, OverflowPolicy::DropOldest);
        let event = bus.listen(Some(Duration::from_millis(10))).await;
        assert!(event.is_none());
    }

    #[tokio::test]
    async fn test_drop_oldest_discards_front() {
        let bus = EventBus::new(2, OverflowPolicy::DropOldest);
        bus.publish(state_event("a", StageState::Init, StageState::Running))
            .await;
        bus.publish(state_event("b", StageState::Init, StageState::Running))
            .await;
        // Bus is full; this evicts the event from "a".
        bus.publish(state_event("c", StageState::Init, StageState::Running))
            .await;

        assert_eq!(bus.len(), 2);
        let first = bus.listen(None).await.unwrap();
        assert_eq!(first.stage, "b");
    }

    #[tokio::test]
    async fn test_block_policy_waits_for_listener() {
        let bus = Arc::new(EventBus::new(1, OverflowPolicy::Block));
        bus.publish(state_event("a", StageState::Init, StageState::Running))
            .await;

        let bus2 = Arc::clone(&bus);
        let publisher = tokio::spawn(async move {
            bus2.publish(state_event("b", StageState::Init, StageState::Running))
                .await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!publisher.is_finished());

        // Consuming one event makes room and unblocks the publisher.
        let first = bus.listen(None).await.unwrap();
        assert_eq!(first.stage, "a");
        tokio::time::timeout(Duration::from_millis(200), publisher)
            .await
            .expect("publisher did not unblock")
            .expect("publisher panicked");

        let second = bus.listen(None).await.unwrap();
        assert_eq!(second.stage, "b");
    }

    #[tokio::test]
    async fn test_drain_empties_bus() {
        let bus = EventBus::new(8, OverflowPolicy::DropOldest);
        bus.publish(state_event("a", StageState::Init, StageState::Running))
            .await;
        bus.publish(state_event("b", StageState::Init, StageState::Running))
            .await;

        let drained = bus.drain();
        assert_eq!(drained.len(), 2);
        assert!(bus.is_empty());
    }
}
