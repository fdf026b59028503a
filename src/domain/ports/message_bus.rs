//! Typed pub/sub message bus (port interface).
//!
//! Named channels with at-least-once delivery. The transport (in-memory vs a
//! broker) is a deployment parameter behind this seam; handlers must be
//! idempotent keyed by `(correlation_id, task_id, event_type)`.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::domain::models::Event;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Publish failed on {channel}: {reason}")]
    PublishFailed { channel: String, reason: String },

    #[error("Subscription closed")]
    Closed,

    /// The subscriber fell behind and missed `skipped` events. At-least-once
    /// delivery means the producer may re-send; consumers surface this so the
    /// orchestrator can re-dispatch.
    #[error("Subscriber lagged, skipped {skipped} events")]
    Lagged { skipped: u64 },
}

/// A live subscription to one channel.
pub struct BusSubscription {
    receiver: broadcast::Receiver<Event>,
}

impl BusSubscription {
    pub fn new(receiver: broadcast::Receiver<Event>) -> Self {
        Self { receiver }
    }

    /// Wait for the next event on the channel.
    pub async fn recv(&mut self) -> Result<Event, BusError> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Closed) => Err(BusError::Closed),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                Err(BusError::Lagged { skipped })
            }
        }
    }
}

/// Port interface for the event bus.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish an event to a named channel. The bus stamps the per-channel
    /// sequence number before delivery.
    async fn publish(&self, channel: &str, event: Event) -> Result<(), BusError>;

    /// Subscribe to a named channel. Events published after this call are
    /// delivered; there is no replay.
    async fn subscribe(&self, channel: &str) -> Result<BusSubscription, BusError>;
}
