//! Transport layer for the verdure voice client.
//!
//! Two wire transports implement the same contract: WebSocket (the default)
//! and MQTT (topic-based delivery, identical message semantics). Both carry
//! JSON envelopes on a text channel and encoded audio frames on a dedicated
//! binary path, so a large control payload never head-of-line-blocks audio.

pub mod backoff;
pub mod contract;
pub mod error;
pub mod mqtt;
pub mod ws;

pub use backoff::Backoff;
pub use contract::{
    InboundEvent, OutboundFrame, OutboundHandle, ServerHello, Transport, TransportConnection,
};
pub use error::TransportError;
pub use mqtt::{MqttConfig, MqttTransport};
pub use ws::{WsConfig, WsTransport};
