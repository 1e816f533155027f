//! Message channel port: keyed publish, leased fetch, explicit commit.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::application::retry::Transient;

/// A message handed to one consumer until it is committed or its lease lapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: i64,
    pub key: String,
    pub payload: Bytes,
    /// How many times this message has been handed out, including this one.
    pub attempt: i32,
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("message channel is closed")]
    Closed,
    #[error("failed to encode message: {0}")]
    Encode(String),
}

impl ChannelError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}

impl Transient for ChannelError {
    fn is_transient(&self) -> bool {
        matches!(self, ChannelError::Transport(_))
    }
}

#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Append a message; messages sharing a key are delivered in publish order.
    async fn publish(&self, key: &str, payload: Bytes) -> Result<(), ChannelError>;

    /// Lease the next deliverable message. `Ok(None)` means the channel is empty.
    async fn fetch(&self) -> Result<Option<Delivery>, ChannelError>;

    /// Acknowledge a delivery so it is never handed out again.
    async fn commit(&self, delivery: &Delivery) -> Result<(), ChannelError>;
}
