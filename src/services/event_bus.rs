//! In-memory message bus.
//!
//! Broadcast-based pub/sub over named channels with per-channel sequence
//! numbering. Within one correlation id, events are delivered in the order
//! the producer published them; the bus may interleave across correlation
//! ids.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::domain::models::Event;
use crate::domain::ports::{BusError, BusSubscription, MessageBus};

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

struct Channel {
    sender: broadcast::Sender<Event>,
    sequence: AtomicU64,
}

/// In-memory bus. Channels are created lazily on first publish or subscribe.
pub struct InMemoryBus {
    channels: RwLock<HashMap<String, Arc<Channel>>>,
    capacity: usize,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    async fn channel(&self, name: &str) -> Arc<Channel> {
        {
            let channels = self.channels.read().await;
            if let Some(channel) = channels.get(name) {
                return Arc::clone(channel);
            }
        }
        let mut channels = self.channels.write().await;
        Arc::clone(channels.entry(name.to_string()).or_insert_with(|| {
            let (sender, _) = broadcast::channel(self.capacity);
            Arc::new(Channel {
                sender,
                sequence: AtomicU64::new(0),
            })
        }))
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, channel_name: &str, mut event: Event) -> Result<(), BusError> {
        let channel = self.channel(channel_name).await;
        event.sequence = channel.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        debug!(
            channel = channel_name,
            event_type = event.event_type.as_str(),
            correlation_id = %event.correlation_id,
            workflow_id = %event.workflow_id,
            task_id = event.task_id.as_deref().unwrap_or(""),
            sequence = event.sequence,
            "publishing event"
        );

        // A send error means no live subscribers; with at-least-once
        // semantics that is not a failure, but it is worth a warning on
        // request channels where a consumer is expected.
        if channel.sender.send(event).is_err() {
            warn!(channel = channel_name, "event published with no subscribers");
        }
        Ok(())
    }

    async fn subscribe(&self, channel_name: &str) -> Result<BusSubscription, BusError> {
        let channel = self.channel(channel_name).await;
        Ok(BusSubscription::new(channel.sender.subscribe()))
    }
}
