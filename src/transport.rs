//! Outbound message transport
//!
//! The engine hands replies to a [`Transport`](crate::runtime::Transport).
//! `ChannelTransport` is the in-process adapter: it publishes every reply on
//! a broadcast channel that the HTTP layer streams to gateways over SSE.

use crate::runtime::Transport;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("No gateway is listening for connection {0}")]
    NoListener(String),
    #[error("Delivery to {connection_id} failed: {reason}")]
    Failed {
        connection_id: String,
        reason: String,
    },
}

/// A reply addressed to one connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    pub connection_id: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// Publishes outbound messages to in-process subscribers
#[derive(Clone)]
pub struct ChannelTransport {
    tx: broadcast::Sender<OutboundMessage>,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboundMessage> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn deliver(&self, connection_id: &str, text: &str) -> Result<(), TransportError> {
        let message = OutboundMessage {
            connection_id: connection_id.to_string(),
            text: text.to_string(),
            sent_at: Utc::now(),
        };
        self.tx
            .send(message)
            .map(|_| ())
            .map_err(|_| TransportError::NoListener(connection_id.to_string()))
    }
}
