//! WebSocket transport.
//!
//! One connect performs the full hello handshake; an established connection
//! runs one writer task and one reader task. Text frames carry JSON
//! envelopes, binary frames carry encoded audio for the current session.
//! Keepalive is passive: a read idle longer than the configured ceiling
//! recycles the connection.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;

use verdure_core::config::ClientConfig;
use verdure_core::domain::AudioParams;
use verdure_protocol::{Envelope, parse_envelope};

use crate::backoff::Backoff;
use crate::contract::{
    InboundEvent, OutboundFrame, OutboundHandle, ServerHello, Transport, TransportConnection,
};
use crate::error::TransportError;

/// Control-message queue depth.
const INBOUND_QUEUE: usize = 64;

/// Audio frame queue depth (binary path, decoupled from control messages).
const AUDIO_QUEUE: usize = 256;

/// WebSocket transport configuration.
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub url: String,
    pub device_id: String,
    pub client_id: String,
    /// Parameters advertised in the client hello.
    pub advertised: AudioParams,
    /// Codec identifier advertised in the client hello.
    pub audio_format: String,
    pub hello_timeout: Duration,
    pub read_idle_timeout: Duration,
}

impl WsConfig {
    /// Derive the transport configuration from the client configuration.
    #[must_use]
    pub fn from_client(config: &ClientConfig) -> Self {
        Self {
            url: config.server_url.clone(),
            device_id: config.device_id.clone(),
            client_id: config.client_id.clone(),
            advertised: config.audio,
            audio_format: config.audio_format.clone(),
            hello_timeout: config.hello_timeout,
            read_idle_timeout: config.read_idle_timeout,
        }
    }
}

/// WebSocket client with reconnect backoff.
pub struct WsTransport {
    config: WsConfig,
    backoff: Mutex<Backoff>,
}

impl WsTransport {
    #[must_use]
    pub fn new(config: WsConfig) -> Self {
        Self {
            config,
            backoff: Mutex::new(Backoff::reconnect()),
        }
    }

    /// Connect with exponential backoff until success or cancellation.
    pub async fn connect_with_retry(
        &self,
        cancel: &CancellationToken,
    ) -> Result<TransportConnection, TransportError> {
        loop {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }

            match self.connect().await {
                Ok(connection) => return Ok(connection),
                Err(e) => {
                    let delay = {
                        let mut backoff = self.backoff.lock().unwrap_or_else(|p| p.into_inner());
                        backoff.next_delay()
                    };
                    tracing::warn!(error = %e, ?delay, "Connect failed, backing off");
                    tokio::select! {
                        () = cancel.cancelled() => return Err(TransportError::Cancelled),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// One full connect attempt: dial, send hello, await the server hello.
    async fn connect_once(&self) -> Result<TransportConnection, TransportError> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidUrl(self.config.url.clone(), e.to_string()))?;

        let headers = request.headers_mut();
        if !self.config.device_id.is_empty() {
            if let Ok(value) = self.config.device_id.parse() {
                headers.insert("device-id", value);
            }
        }
        if !self.config.client_id.is_empty() {
            if let Ok(value) = self.config.client_id.parse() {
                headers.insert("client-id", value);
            }
        }

        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        let (mut write, mut read) = ws.split();

        tracing::info!(url = %self.config.url, "WebSocket connected, starting handshake");

        // Client hello goes first.
        let hello = Envelope::client_hello(&self.config.advertised, &self.config.audio_format);
        let text = hello
            .to_json()
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        write
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        // Await the server hello; anything else before it is dropped.
        let server_hello = timeout(self.config.hello_timeout, async {
            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => match parse_envelope(text.as_str()) {
                        Ok(Envelope::Hello(hello)) => return Ok(hello),
                        Ok(other) => {
                            tracing::debug!(?other, "Pre-hello message dropped");
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Unparseable pre-hello message dropped");
                        }
                    },
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(TransportError::Handshake(e.to_string())),
                    None => {
                        return Err(TransportError::Handshake(
                            "connection closed during handshake".into(),
                        ));
                    }
                }
            }
        })
        .await
        .map_err(|_| TransportError::HelloTimeout(self.config.hello_timeout))??;

        let resolved = server_hello
            .audio_params
            .as_ref()
            .map_or(self.config.advertised, |params| {
                params.resolve_against(&self.config.advertised)
            });

        let hello = ServerHello {
            session_id: server_hello.session_id.clone(),
            audio_params: resolved,
            supports_mcp: server_hello.supports_mcp(),
        };

        tracing::info!(
            session_id = hello.session_id.as_deref().unwrap_or("<none>"),
            sample_rate = resolved.sample_rate,
            mcp = hello.supports_mcp,
            "Handshake complete"
        );

        // Handshake succeeded: the next disconnect starts from a short delay.
        self.backoff
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .reset();

        // ── Writer task ────────────────────────────────────────────
        let (out_tx, mut out_rx) = mpsc::channel::<OutboundFrame>(INBOUND_QUEUE);
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let result = match frame {
                    OutboundFrame::Text(text) => write.send(Message::Text(text.into())).await,
                    OutboundFrame::Audio(packet) => {
                        write.send(Message::Binary(packet.into())).await
                    }
                    OutboundFrame::Close => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                };
                if let Err(e) = result {
                    tracing::warn!(error = %e, "WebSocket write failed, stopping writer");
                    break;
                }
            }
        });

        // ── Reader task ────────────────────────────────────────────
        let (in_tx, in_rx) = mpsc::channel::<InboundEvent>(INBOUND_QUEUE);
        let (audio_tx, audio_rx) = mpsc::channel::<Vec<u8>>(AUDIO_QUEUE);
        let read_idle = self.config.read_idle_timeout;

        tokio::spawn(async move {
            let reason = loop {
                match timeout(read_idle, read.next()).await {
                    Ok(Some(Ok(Message::Text(text)))) => match parse_envelope(text.as_str()) {
                        Ok(envelope) => {
                            if in_tx.send(InboundEvent::Envelope(envelope)).await.is_err() {
                                break "receiver dropped".to_string();
                            }
                        }
                        Err(e) => {
                            // Parse failures are values: log, drop, carry on.
                            tracing::warn!(error = %e, "Dropping unparseable message");
                        }
                    },
                    Ok(Some(Ok(Message::Binary(packet)))) => {
                        if audio_tx.send(packet.to_vec()).await.is_err() {
                            break "audio receiver dropped".to_string();
                        }
                    }
                    Ok(Some(Ok(Message::Close(_)))) => break "server closed".to_string(),
                    Ok(Some(Ok(_))) => {} // ping/pong handled by tungstenite
                    Ok(Some(Err(e))) => break format!("read error: {e}"),
                    Ok(None) => break "stream ended".to_string(),
                    Err(_) => break format!("read idle > {read_idle:?}"),
                }
            };

            tracing::info!(%reason, "WebSocket reader stopped");
            let _ = in_tx.send(InboundEvent::Disconnected { reason }).await;
        });

        Ok(TransportConnection {
            hello,
            outbound: OutboundHandle { tx: out_tx },
            inbound: in_rx,
            audio: audio_rx,
        })
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self) -> Result<TransportConnection, TransportError> {
        self.connect_once().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_derives_from_client_config() {
        let mut client = ClientConfig::default();
        client.server_url = "ws://example.test/v1/".into();
        client.device_id = "aa:bb:cc".into();

        let config = WsConfig::from_client(&client);
        assert_eq!(config.url, "ws://example.test/v1/");
        assert_eq!(config.device_id, "aa:bb:cc");
        assert_eq!(config.hello_timeout, Duration::from_secs(5));
        assert_eq!(config.advertised.sample_rate, 16_000);
    }

    #[tokio::test]
    async fn invalid_url_is_rejected() {
        let config = WsConfig {
            url: "not a url".into(),
            device_id: String::new(),
            client_id: String::new(),
            advertised: AudioParams::default(),
            audio_format: "opus".into(),
            hello_timeout: Duration::from_secs(5),
            read_idle_timeout: Duration::from_secs(30),
        };
        let transport = WsTransport::new(config);
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::InvalidUrl(..) | TransportError::ConnectFailed(_)
        ));
    }

    #[tokio::test]
    async fn retry_honours_cancellation() {
        let config = WsConfig {
            url: "ws://127.0.0.1:1/".into(), // nothing listens on port 1
            device_id: String::new(),
            client_id: String::new(),
            advertised: AudioParams::default(),
            audio_format: "opus".into(),
            hello_timeout: Duration::from_millis(100),
            read_idle_timeout: Duration::from_secs(30),
        };
        let transport = WsTransport::new(config);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            canceller.cancel();
        });

        let err = transport.connect_with_retry(&cancel).await.unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
    }
}
