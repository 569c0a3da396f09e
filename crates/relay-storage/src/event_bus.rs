// Event bus: durable fan-out of domain events
//
// Every published event is appended to the task_events log (exactly-once,
// keyed on event_id) and then broadcast to live subscribers (at-least-once;
// a lagging receiver resubscribes). Per-task ordering holds because one
// workflow instance is the only writer for its task.
//
// The replay+live subscription subscribes BEFORE reading the persisted
// snapshot - the naive listen-after-read approach misses events that land in
// between. Duplicates across the seam are dropped by event_id.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};
use uuid::Uuid;

use relay_core::error::Result;
use relay_core::events::{is_terminal_event_type, DomainEvent};
use relay_core::task::TaskEvent;
use relay_core::traits::{EventPublisher, EventStreamer, TaskEventStore, TaskEventStream};

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct EventBus {
    store: Arc<dyn TaskEventStore>,
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(store: Arc<dyn TaskEventStore>) -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self { store, tx }
    }

    /// Raw live subscription; callers filter by task themselves
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    /// Replay persisted events for a task, then continue live.
    ///
    /// Yields events in non-decreasing timestamp order with no duplicates by
    /// event_id and ends after the first terminal event.
    pub async fn replay_then_live(
        &self,
        task_id: Uuid,
    ) -> Result<impl Stream<Item = TaskEvent> + Send> {
        // Subscribe first so nothing lands between the snapshot and the tail
        let live = BroadcastStream::new(self.tx.subscribe());
        let historical = self.store.list_for_task(task_id).await?;

        struct StreamState {
            historical: std::vec::IntoIter<TaskEvent>,
            live: BroadcastStream<DomainEvent>,
            seen: HashSet<Uuid>,
            task_id: Uuid,
            done: bool,
        }

        let state = StreamState {
            historical: historical.into_iter(),
            live,
            seen: HashSet::new(),
            task_id,
            done: false,
        };

        Ok(stream::unfold(state, |mut st| async move {
            if st.done {
                return None;
            }

            // Phase 1: persisted snapshot
            if let Some(event) = st.historical.next() {
                st.seen.insert(event.id);
                if is_terminal_event_type(&event.event_type) {
                    st.done = true;
                }
                return Some((event, st));
            }

            // Phase 2: buffered + live events
            loop {
                match st.live.next().await {
                    Some(Ok(domain_event)) => {
                        if domain_event.task_id() != Some(st.task_id) {
                            continue;
                        }
                        if !st.seen.insert(domain_event.event_id) {
                            debug!(event_id = %domain_event.event_id, "duplicate event dropped");
                            continue;
                        }
                        let event = to_task_event(&domain_event, st.task_id);
                        if is_terminal_event_type(&event.event_type) {
                            st.done = true;
                        }
                        return Some((event, st));
                    }
                    Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                        warn!(task_id = %st.task_id, skipped, "event subscriber lagged");
                        continue;
                    }
                    None => return None,
                }
            }
        }))
    }
}

#[async_trait::async_trait]
impl EventPublisher for EventBus {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        // Durable log first; only events bound to a task are replayable
        if let Some(task_id) = event.task_id() {
            let appended = self.store.append(to_task_event(&event, task_id)).await?;
            if !appended {
                debug!(event_id = %event.event_id, "event already persisted");
            }
        }

        // Live fan-out; an error just means no subscribers right now
        let _ = self.tx.send(event);
        Ok(())
    }
}

#[async_trait::async_trait]
impl EventStreamer for EventBus {
    async fn stream_task_events(&self, task_id: Uuid) -> Result<TaskEventStream> {
        Ok(self.replay_then_live(task_id).await?.boxed())
    }
}

fn to_task_event(event: &DomainEvent, task_id: Uuid) -> TaskEvent {
    TaskEvent {
        id: event.event_id,
        task_id,
        event_type: event.event_type.clone(),
        timestamp: event.timestamp,
        data: event.data.clone(),
        metadata: serde_json::json!({}),
    }
}

// ============================================================================
// Tests
// ============================================================================
