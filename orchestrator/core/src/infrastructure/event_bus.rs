// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Domain Events
//
// In-memory event streaming over tokio broadcast channels. Feeds the
// `GET /api/events` SSE stream and test observers. Slow receivers lose the
// oldest events rather than applying back-pressure to dispatch.

use crate::domain::events::{AgvEvent, LockEvent, TaskEvent};
use crate::domain::task_job::TaskJobId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Unified domain event type for the event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Task(TaskEvent),
    Lock(LockEvent),
    Agv(AgvEvent),
}

impl DomainEvent {
    /// Task the event belongs to, if any
    pub fn task_id(&self) -> Option<TaskJobId> {
        match self {
            DomainEvent::Task(event) => Some(event.task_id()),
            DomainEvent::Lock(event) => Some(event.task_id()),
            DomainEvent::Agv(AgvEvent::AgvFaultReported { task_id, .. }) => *task_id,
            DomainEvent::Agv(_) => None,
        }
    }
}

/// Event bus for publishing and subscribing to domain events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_task_event(&self, event: TaskEvent) {
        self.publish(DomainEvent::Task(event));
    }

    pub fn publish_lock_event(&self, event: LockEvent) {
        self.publish(DomainEvent::Lock(event));
    }

    pub fn publish_agv_event(&self, event: AgvEvent) {
        self.publish(DomainEvent::Agv(event));
    }

    fn publish(&self, event: DomainEvent) {
        debug!("Publishing event: {:?}", event);

        // send() only fails when nobody is subscribed
        let receiver_count = self.sender.send(event).unwrap_or(0);

        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all domain events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to task and lock events of a single job
    pub fn subscribe_task(&self, task_id: TaskJobId) -> TaskEventReceiver {
        TaskEventReceiver {
            receiver: self.sender.subscribe(),
            task_id,
        }
    }

    /// Raw broadcast receiver, for stream adapters
    pub fn subscribe_raw(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all domain events
pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without waiting
    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver for one job's events (filtered)
pub struct TaskEventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    task_id: TaskJobId,
}

impl TaskEventReceiver {
    /// Receive the next event for the subscribed job, skipping all others
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.task_id() == Some(self.task_id) {
                return Ok(event);
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agv::{AgvId, AgvStatus};
    use crate::domain::task_job::TaskJobType;
    use chrono::Utc;

    fn created(task_id: TaskJobId) -> TaskEvent {
        TaskEvent::JobCreated {
            task_id,
            job_type: TaskJobType::CallForLoading,
            start_station: "S001".to_string(),
            end_station: "S010".to_string(),
            priority: 30,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let task_id = TaskJobId::new();
        event_bus.publish_task_event(created(task_id));

        let received = receiver.recv().await.unwrap();
        match received {
            DomainEvent::Task(TaskEvent::JobCreated { task_id: id, .. }) => assert_eq!(id, task_id),
            _ => panic!("Wrong event type received"),
        }
    }

    #[tokio::test]
    async fn test_task_event_filtering() {
        let event_bus = EventBus::new(10);
        let task_id = TaskJobId::new();
        let mut receiver = event_bus.subscribe_task(task_id);

        // Other job and fleet events are filtered out
        event_bus.publish_task_event(created(TaskJobId::new()));
        event_bus.publish_agv_event(AgvEvent::AgvStatusChanged {
            agv_id: AgvId::new(),
            agv_code: "AGV01".to_string(),
            from: AgvStatus::Offline,
            to: AgvStatus::Idle,
            changed_at: Utc::now(),
        });
        event_bus.publish_task_event(created(task_id));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.task_id(), Some(task_id));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish_task_event(created(TaskJobId::new()));

        let _ = receiver1.recv().await.unwrap();
        let _ = receiver2.recv().await.unwrap();
        assert!(matches!(receiver1.try_recv(), Err(EventBusError::Empty)));
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(DomainEvent::Task(created(TaskJobId::new()))).unwrap();
        assert_eq!(json["type"], "task");
    }
}
