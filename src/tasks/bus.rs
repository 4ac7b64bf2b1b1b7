//! Per-task progress event bus.
//!
//! A small broadcast fan-out with semantics `tokio::sync::broadcast` does not
//! provide: every subscriber gets its own bounded queue, a full queue drops
//! the oldest non-terminal event instead of blocking the producer, late
//! subscribers are seeded with a replay burst, and the bus closes for good
//! after the terminal event.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use super::task::ProgressEvent;

/// Per-subscriber queue capacity.
pub const BUS_CAPACITY: usize = 32;

struct Subscriber {
    queue: Mutex<VecDeque<ProgressEvent>>,
    notify: Notify,
    /// Set when the terminal event has been enqueued; recv returns `None`
    /// once the queue drains past it.
    closed: AtomicBool,
}

struct BusState {
    subscribers: Vec<Arc<Subscriber>>,
    closed: bool,
}

/// Broadcast handle owned by the task entry. Cloning shares the same bus.
#[derive(Clone)]
pub struct ProgressBus {
    state: Arc<Mutex<BusState>>,
}

impl ProgressBus {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                subscribers: Vec::new(),
                closed: false,
            })),
        }
    }

    /// Publish an event to every subscriber. Never blocks: a full subscriber
    /// queue sheds its oldest event (the terminal event is always the last
    /// one published, so the shed event is never terminal). Publishing a
    /// terminal event closes the bus; anything after it is discarded.
    pub fn publish(&self, event: ProgressEvent) {
        let terminal = event.is_terminal();
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        for sub in &state.subscribers {
            {
                let mut queue = sub.queue.lock().unwrap();
                if queue.len() >= BUS_CAPACITY {
                    queue.pop_front();
                }
                queue.push_back(event.clone());
            }
            if terminal {
                sub.closed.store(true, Ordering::Release);
            }
            sub.notify.notify_one();
        }
        if terminal {
            state.closed = true;
            // Future subscribers get the replay burst only.
            state.subscribers.clear();
        }
    }

    /// Attach a subscriber seeded with `burst` (the caller synthesizes the
    /// replay from the task state, under the same lock that serializes
    /// publishes, so no event is missed or duplicated). If the bus already
    /// closed, the burst must end with the terminal event and the
    /// subscription drains it then ends.
    pub fn subscribe_with(&self, burst: Vec<ProgressEvent>) -> ProgressSubscription {
        let mut state = self.state.lock().unwrap();
        let sub = Arc::new(Subscriber {
            queue: Mutex::new(burst.into()),
            notify: Notify::new(),
            closed: AtomicBool::new(state.closed),
        });
        if !state.closed {
            state.subscribers.push(sub.clone());
        }
        ProgressSubscription {
            shared: sub,
            bus: self.clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    fn detach(&self, target: &Arc<Subscriber>) {
        let mut state = self.state.lock().unwrap();
        state.subscribers.retain(|s| !Arc::ptr_eq(s, target));
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A single consumer's view of the bus. Dropping it unsubscribes without
/// affecting the producer.
pub struct ProgressSubscription {
    shared: Arc<Subscriber>,
    bus: ProgressBus,
}

impl ProgressSubscription {
    /// Receive the next event, or `None` after the terminal event has been
    /// delivered (end-of-stream).
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut queue = self.shared.queue.lock().unwrap();
                if let Some(event) = queue.pop_front() {
                    return Some(event);
                }
                if self.shared.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            notified.await;
        }
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        self.bus.detach(&self.shared);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::task::{TaskError, TaskResult, TaskStatus};
    use crate::tasks::{ProcessingMethod, Stage, SummaryResult};

    fn status_event(progress: u8) -> ProgressEvent {
        ProgressEvent::Status {
            progress,
            current_step: None,
            status: TaskStatus::Running,
        }
    }

    fn terminal_event() -> ProgressEvent {
        ProgressEvent::Complete {
            result: TaskResult::Summary(SummaryResult {
                title: "t".into(),
                topic: "t".into(),
                content_markdown: "c".into(),
                confidence_scores: vec![],
                processing_method: ProcessingMethod::Single,
            }),
        }
    }

    #[tokio::test]
    async fn test_broadcast_to_multiple_subscribers() {
        let bus = ProgressBus::new();
        let mut a = bus.subscribe_with(vec![]);
        let mut b = bus.subscribe_with(vec![]);

        bus.publish(status_event(10));
        bus.publish(terminal_event());

        assert_eq!(a.recv().await, Some(status_event(10)));
        assert!(matches!(a.recv().await, Some(ProgressEvent::Complete { .. })));
        assert_eq!(a.recv().await, None);

        assert_eq!(b.recv().await, Some(status_event(10)));
        assert!(matches!(b.recv().await, Some(ProgressEvent::Complete { .. })));
        assert_eq!(b.recv().await, None);
    }

    #[tokio::test]
    async fn test_full_queue_drops_oldest_non_terminal() {
        let bus = ProgressBus::new();
        let mut sub = bus.subscribe_with(vec![]);

        for i in 0..(BUS_CAPACITY as u8 + 5) {
            bus.publish(status_event(i));
        }
        bus.publish(terminal_event());

        // Oldest events were shed; the first one delivered is event 6
        // (5 overflow drops + 1 drop for the terminal event).
        let first = sub.recv().await.unwrap();
        assert_eq!(first, status_event(6));

        let mut last = first;
        while let Some(event) = sub.recv().await {
            last = event;
        }
        assert!(last.is_terminal());
    }

    #[tokio::test]
    async fn test_publish_after_terminal_is_discarded() {
        let bus = ProgressBus::new();
        let mut sub = bus.subscribe_with(vec![]);

        bus.publish(terminal_event());
        bus.publish(status_event(99));

        assert!(sub.recv().await.unwrap().is_terminal());
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_burst_then_end() {
        let bus = ProgressBus::new();
        bus.publish(status_event(50));
        bus.publish(terminal_event());

        // A late subscriber is seeded by the caller with the synthesized
        // replay (here: one intermediate plus the terminal event).
        let burst = vec![
            ProgressEvent::Intermediate {
                stage: Stage::Summary,
                payload: serde_json::json!({}),
            },
            terminal_event(),
        ];
        let mut sub = bus.subscribe_with(burst);
        assert!(matches!(
            sub.recv().await,
            Some(ProgressEvent::Intermediate { .. })
        ));
        assert!(sub.recv().await.unwrap().is_terminal());
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_error_event_is_terminal() {
        let bus = ProgressBus::new();
        let mut sub = bus.subscribe_with(vec![]);
        bus.publish(ProgressEvent::Error {
            error: TaskError::cancelled(),
        });
        assert!(sub.recv().await.unwrap().is_terminal());
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_detaches() {
        let bus = ProgressBus::new();
        let sub = bus.subscribe_with(vec![]);
        drop(sub);
        bus.publish(status_event(1));
        assert!(!bus.is_closed());
    }
}
