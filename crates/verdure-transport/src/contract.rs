//! The transport contract shared by the WebSocket and MQTT implementations.

use async_trait::async_trait;
use tokio::sync::mpsc;

use verdure_core::domain::AudioParams;
use verdure_protocol::Envelope;

use crate::error::TransportError;

/// What the server's hello established for this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    /// Session id assigned by the server.
    pub session_id: Option<String>,

    /// Authoritative audio parameters for the session (server reply resolved
    /// against the client's advertised values).
    pub audio_params: AudioParams,

    /// Whether the server advertised MCP support.
    pub supports_mcp: bool,
}

/// Frames the writer task accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Audio(Vec<u8>),
    Close,
}

/// Cloneable sender half of an established connection.
#[derive(Debug, Clone)]
pub struct OutboundHandle {
    pub(crate) tx: mpsc::Sender<OutboundFrame>,
}

impl OutboundHandle {
    /// Build a handle over a fresh channel, returning the receiving end.
    ///
    /// Real transports own the receiver in their writer task; alternative
    /// transports and tests inspect it directly.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Serialize and queue a control envelope.
    pub async fn send_envelope(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let text = envelope
            .to_json()
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.tx
            .send(OutboundFrame::Text(text))
            .await
            .map_err(|_| TransportError::Closed("writer gone".into()))
    }

    /// Queue one encoded audio frame as a binary message.
    pub async fn send_audio(&self, packet: Vec<u8>) -> Result<(), TransportError> {
        self.tx
            .send(OutboundFrame::Audio(packet))
            .await
            .map_err(|_| TransportError::Closed("writer gone".into()))
    }

    /// Ask the writer to close the connection cleanly.
    pub async fn close(&self) {
        let _ = self.tx.send(OutboundFrame::Close).await;
    }
}

/// Events delivered by the reader task.
#[derive(Debug)]
pub enum InboundEvent {
    /// A parsed control envelope, in arrival order.
    Envelope(Envelope),

    /// The connection is gone (close, error, or read-idle timeout).
    Disconnected { reason: String },
}

/// An established, post-handshake connection.
#[derive(Debug)]
pub struct TransportConnection {
    /// The server's side of the hello exchange.
    pub hello: ServerHello,

    /// Sender half.
    pub outbound: OutboundHandle,

    /// Control-message stream (single dispatcher, arrival order).
    pub inbound: mpsc::Receiver<InboundEvent>,

    /// Binary audio stream, decoupled from control messages.
    pub audio: mpsc::Receiver<Vec<u8>>,
}

/// A connectable transport.
///
/// One call performs one full connect attempt including the hello handshake.
/// Reconnect policy (backoff, retry loops) sits above this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<TransportConnection, TransportError>;
}
