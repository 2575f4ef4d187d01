use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::domain::StreamType;
use crate::error::Result;

/// Signals that a cached collection no longer reflects the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationEvent {
    /// Any submission list that may contain this student's submissions.
    Submissions { owner_id: Uuid },
    Templates,
    Stream(StreamType),
}

#[async_trait]
pub trait Subscriber: Send + Sync {
    fn name(&self) -> &str;
    async fn handle_event(&self, event: &InvalidationEvent) -> Result<()>;
}

/// Fans invalidation events out to registered read-side subscribers and to
/// any broadcast listeners (e.g. a UI push channel).
pub struct InvalidationBus {
    subscribers: RwLock<Vec<Arc<dyn Subscriber>>>,
    sender: broadcast::Sender<InvalidationEvent>,
}

impl InvalidationBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            subscribers: RwLock::new(Vec::new()),
            sender,
        }
    }

    pub async fn register(&self, subscriber: Arc<dyn Subscriber>) {
        tracing::info!("Registered invalidation subscriber: {}", subscriber.name());
        self.subscribers.write().await.push(subscriber);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.sender.subscribe()
    }

    pub async fn publish(&self, event: InvalidationEvent) {
        tracing::debug!("Publishing invalidation: {:?}", event);

        let subscribers = self.subscribers.read().await;
        for subscriber in subscribers.iter() {
            if let Err(e) = subscriber.handle_event(&event).await {
                tracing::error!(
                    "Subscriber {} failed to handle {:?}: {:?}",
                    subscriber.name(),
                    event,
                    e
                );
                // Keep notifying the rest.
            }
        }

        // No listeners is fine.
        let _ = self.sender.send(event);
    }
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new()
    }
}
