//! The client-facing duplex channel boundary and its message envelopes.
//!
//! The channel itself (a websocket, usually) is not implemented here. The
//! bridge consumes anything that splits into a sender half and a receiver
//! half carrying line-delimited JSON frames: inbound `{"data": "…"}` frames,
//! outbound `{"data": "…"}` frames, and at most one terminal `{"error": "…"}`
//! frame before closure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An outbound message to the client, one JSON object per frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    /// Transport output, decoded as UTF-8 with invalid sequences replaced.
    Data {
        /// The decoded chunk.
        data: String,
    },
    /// Terminal failure notice; sent at most once, as the last frame.
    Error {
        /// Human-readable failure message.
        error: String,
    },
}

impl Envelope {
    /// Create a data envelope.
    pub fn data(data: impl Into<String>) -> Self {
        Self::Data { data: data.into() }
    }

    /// Create an error envelope.
    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }

    /// Whether this is an error envelope.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Serialize to the wire form.
    #[must_use]
    pub fn to_json(&self) -> String {
        match self {
            Self::Data { data } => serde_json::json!({ "data": data }).to_string(),
            Self::Error { error } => serde_json::json!({ "error": error }).to_string(),
        }
    }
}

/// An inbound frame from the client. A missing `data` field reads as empty
/// input; anything unparseable is a malformed frame and gets dropped by the
/// relay.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InboundMessage {
    /// Raw bytes (as text) to forward verbatim to the transport.
    #[serde(default)]
    pub data: String,
}

impl InboundMessage {
    /// Parse one wire frame.
    pub fn parse(frame: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}

/// Why the bridge closed the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The session ended cleanly (client disconnect or transport EOF).
    Done,
    /// The session ended on a failure; an error envelope preceded the close
    /// when one was available.
    Failed,
}

/// The peer disconnected; no further frames can be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("duplex channel peer disconnected")]
pub struct ChannelClosed;

/// The sending half of a duplex channel. The bridge keeps exactly one of
/// these per session and is its only user, so implementations need not be
/// safe for concurrent sends.
#[async_trait]
pub trait ChannelSender: Send {
    /// Deliver one outbound envelope.
    async fn send(&mut self, envelope: Envelope) -> std::result::Result<(), ChannelClosed>;

    /// Close the channel. Idempotent; safe to call from teardown even if the
    /// peer is already gone.
    async fn close(&mut self, reason: CloseReason);
}

/// The receiving half of a duplex channel.
#[async_trait]
pub trait ChannelReceiver: Send {
    /// Next inbound frame, or `None` once the peer has disconnected. The
    /// sequence is not restartable: after `None`, every call returns `None`.
    async fn receive(&mut self) -> Option<String>;
}

/// A bidirectional client-facing message stream, splittable into its two
/// halves so the relay can consume frames while the orchestrator sends.
pub trait DuplexChannel: Send + 'static {
    /// The sending half.
    type Sender: ChannelSender + 'static;
    /// The receiving half.
    type Receiver: ChannelReceiver + 'static;

    /// Split into sender and receiver halves.
    fn split(self) -> (Self::Sender, Self::Receiver);
}
