use super::lifecycle::LifecycleEvent;
use crate::config::EventsConfig;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::debug;

/// Fan-out of lifecycle events to every in-process subscriber.
///
/// Events are fire-and-forget: publishing never fails the operation that
/// produced the event, and a subscriber that falls more than the channel
/// capacity behind sees `RecvError::Lagged` instead of blocking publishers.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub event: LifecycleEvent,
    pub published_at: DateTime<Utc>,
}

impl PublishedEvent {
    pub fn name(&self) -> &'static str {
        self.event.name()
    }
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn from_config(config: &EventsConfig) -> Self {
        Self::new(config.channel_capacity)
    }

    /// Returns how many subscribers received the event; zero is not an error
    pub fn publish(&self, event: LifecycleEvent) -> usize {
        let name = event.name();
        let execution_id = event.execution_id().to_string();
        let delivered = self
            .sender
            .send(PublishedEvent {
                event,
                published_at: Utc::now(),
            })
            .unwrap_or(0);

        debug!(
            event = name,
            execution_id = %execution_id,
            subscribers = delivered,
            "Published lifecycle event"
        );
        delivered
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::from_config(&EventsConfig::default())
    }
}
