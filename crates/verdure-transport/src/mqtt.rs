//! MQTT transport.
//!
//! Identical message semantics to the WebSocket transport with topic-based
//! delivery: JSON envelopes on `<prefix>/out` (client → server) and
//! `<prefix>/in` (server → client), raw encoded audio on
//! `<prefix>/audio/out` / `<prefix>/audio/in`. Keepalive is the broker's
//! (MQTT pings), so there is no separate read-idle ceiling here.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use verdure_core::config::ClientConfig;
use verdure_core::domain::AudioParams;
use verdure_protocol::{Envelope, parse_envelope};

use crate::contract::{
    InboundEvent, OutboundFrame, OutboundHandle, ServerHello, Transport, TransportConnection,
};
use crate::error::TransportError;

const INBOUND_QUEUE: usize = 64;
const AUDIO_QUEUE: usize = 256;
const DEFAULT_MQTT_PORT: u16 = 1883;

/// MQTT transport configuration.
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker endpoint: `mqtt://host[:port]`, or bare `host[:port]`.
    pub broker_url: String,
    pub client_id: String,
    /// Topic prefix; the four channel topics hang off it.
    pub topic_prefix: String,
    pub advertised: AudioParams,
    pub audio_format: String,
    pub hello_timeout: Duration,
}

impl MqttConfig {
    /// Derive the transport configuration from the client configuration.
    #[must_use]
    pub fn from_client(config: &ClientConfig) -> Self {
        Self {
            broker_url: config.server_url.clone(),
            client_id: if config.client_id.is_empty() {
                format!("verdure-{}", std::process::id())
            } else {
                config.client_id.clone()
            },
            topic_prefix: config.mqtt_topic_prefix.clone(),
            advertised: config.audio,
            audio_format: config.audio_format.clone(),
            hello_timeout: config.hello_timeout,
        }
    }

    fn topic_out(&self) -> String {
        format!("{}/out", self.topic_prefix)
    }

    fn topic_in(&self) -> String {
        format!("{}/in", self.topic_prefix)
    }

    fn topic_audio_out(&self) -> String {
        format!("{}/audio/out", self.topic_prefix)
    }

    fn topic_audio_in(&self) -> String {
        format!("{}/audio/in", self.topic_prefix)
    }
}

/// MQTT client implementing the transport contract.
pub struct MqttTransport {
    config: MqttConfig,
}

impl MqttTransport {
    #[must_use]
    pub const fn new(config: MqttConfig) -> Self {
        Self { config }
    }

    /// Split `mqtt://host:port` (or bare `host[:port]`) into host and port.
    fn parse_broker(url: &str) -> Result<(String, u16), TransportError> {
        let stripped = url
            .strip_prefix("mqtt://")
            .or_else(|| url.strip_prefix("tcp://"))
            .unwrap_or(url)
            .trim_end_matches('/');

        if stripped.is_empty() {
            return Err(TransportError::InvalidUrl(
                url.to_string(),
                "empty host".into(),
            ));
        }

        match stripped.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse().map_err(|_| {
                    TransportError::InvalidUrl(url.to_string(), format!("bad port `{port}`"))
                })?;
                Ok((host.to_string(), port))
            }
            None => Ok((stripped.to_string(), DEFAULT_MQTT_PORT)),
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self) -> Result<TransportConnection, TransportError> {
        let (host, port) = Self::parse_broker(&self.config.broker_url)?;

        let mut options = MqttOptions::new(self.config.client_id.clone(), host, port);
        options.set_keep_alive(Duration::from_secs(15));

        let (client, mut event_loop) = AsyncClient::new(options, INBOUND_QUEUE);

        client
            .subscribe(self.config.topic_in(), QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        client
            .subscribe(self.config.topic_audio_in(), QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        let (in_tx, in_rx) = mpsc::channel::<InboundEvent>(INBOUND_QUEUE);
        let (audio_tx, audio_rx) = mpsc::channel::<Vec<u8>>(AUDIO_QUEUE);
        let (hello_tx, hello_rx) = oneshot::channel();

        // ── Event-loop task: routes publishes to the right channel ──
        let topic_in = self.config.topic_in();
        let topic_audio_in = self.config.topic_audio_in();
        tokio::spawn(async move {
            let mut hello_tx = Some(hello_tx);
            let reason = loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if publish.topic == topic_audio_in {
                            if audio_tx.send(publish.payload.to_vec()).await.is_err() {
                                break "audio receiver dropped".to_string();
                            }
                            continue;
                        }
                        if publish.topic != topic_in {
                            continue;
                        }
                        let text = String::from_utf8_lossy(&publish.payload);
                        match parse_envelope(&text) {
                            Ok(Envelope::Hello(hello)) if hello_tx.is_some() => {
                                let _ = hello_tx.take().expect("checked").send(hello);
                            }
                            Ok(envelope) => {
                                if in_tx.send(InboundEvent::Envelope(envelope)).await.is_err() {
                                    break "receiver dropped".to_string();
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Dropping unparseable MQTT message");
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => break format!("mqtt connection error: {e}"),
                }
            };

            tracing::info!(%reason, "MQTT event loop stopped");
            let _ = in_tx.send(InboundEvent::Disconnected { reason }).await;
        });

        // ── Hello exchange ─────────────────────────────────────────
        let hello = Envelope::client_hello(&self.config.advertised, &self.config.audio_format);
        let text = hello
            .to_json()
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        client
            .publish(self.config.topic_out(), QoS::AtLeastOnce, false, text)
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        let server_hello = timeout(self.config.hello_timeout, hello_rx)
            .await
            .map_err(|_| TransportError::HelloTimeout(self.config.hello_timeout))?
            .map_err(|_| TransportError::Handshake("event loop ended during handshake".into()))?;

        let resolved = server_hello
            .audio_params
            .as_ref()
            .map_or(self.config.advertised, |params| {
                params.resolve_against(&self.config.advertised)
            });

        // ── Writer task ────────────────────────────────────────────
        let (out_tx, mut out_rx) = mpsc::channel::<OutboundFrame>(INBOUND_QUEUE);
        let topic_out = self.config.topic_out();
        let topic_audio_out = self.config.topic_audio_out();
        let writer_client = client.clone();
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let result = match frame {
                    OutboundFrame::Text(text) => {
                        writer_client
                            .publish(topic_out.clone(), QoS::AtLeastOnce, false, text)
                            .await
                    }
                    OutboundFrame::Audio(packet) => {
                        writer_client
                            .publish(topic_audio_out.clone(), QoS::AtMostOnce, false, packet)
                            .await
                    }
                    OutboundFrame::Close => {
                        let _ = writer_client.disconnect().await;
                        break;
                    }
                };
                if let Err(e) = result {
                    tracing::warn!(error = %e, "MQTT publish failed, stopping writer");
                    break;
                }
            }
        });

        Ok(TransportConnection {
            hello: ServerHello {
                session_id: server_hello.session_id.clone(),
                audio_params: resolved,
                supports_mcp: server_hello.supports_mcp(),
            },
            outbound: OutboundHandle { tx: out_tx },
            inbound: in_rx,
            audio: audio_rx,
        })
    }
}
