//! Broadcast bus for daemon events.

use serde::Serialize;
use tokio::sync::broadcast;

/// Out-of-band notification emitted by a monitoring session.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorNotice {
    pub container_id: String,
    pub session_id: String,
    pub message: String,
}

/// Events published through the bus
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Container status changed (created/running/stopped/deleted)
    ContainerStatus {
        container_id: String,
        status: String,
    },

    /// Init pipeline progressed to a new stage
    InitProgress {
        container_id: String,
        init_status: String,
        message: Option<String>,
    },

    /// A PTY session was created or destroyed
    PtySession {
        container_id: String,
        session_id: String,
        created: bool,
    },

    /// A monitoring strategy produced a notify action (e.g. `queue_empty`)
    MonitorNotification(MonitorNotice),
}

/// Event bus for broadcasting events to multiple subscribers
///
/// Subscribers that fall behind will lose messages (lagged).
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    // Keep a receiver so the channel never closes
    _receiver: broadcast::Receiver<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender, _receiver }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers; returns the receiver count.
    pub fn publish(&self, event: Event) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn publish_status(&self, container_id: &str, status: &str) -> usize {
        self.publish(Event::ContainerStatus {
            container_id: container_id.to_string(),
            status: status.to_string(),
        })
    }

    pub fn publish_notice(&self, notice: MonitorNotice) -> usize {
        self.publish(Event::MonitorNotification(notice))
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            _receiver: self.sender.subscribe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pubsub() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish_status("c1", "running");

        let event = rx.recv().await.unwrap();
        match event {
            Event::ContainerStatus {
                container_id,
                status,
            } => {
                assert_eq!(container_id, "c1");
                assert_eq!(status, "running");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish_notice(MonitorNotice {
            container_id: "c1".into(),
            session_id: "s1".into(),
            message: "queue_empty".into(),
        });

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await.unwrap() {
                Event::MonitorNotification(n) => assert_eq!(n.message, "queue_empty"),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[test]
    fn test_subscriber_count() {
        let bus = EventBus::new();
        let base = bus.subscriber_count();
        let _rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), base + 1);
    }
}
