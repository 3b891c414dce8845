//! WebSocket transport against a real in-process server.
//!
//! A local `tokio-tungstenite` acceptor plays the server role on a loopback
//! port: it answers the hello handshake and then exchanges frames with the
//! client. This exercises the genuine wire path — TCP, WebSocket framing,
//! JSON envelopes, binary audio — without any external service.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;

use verdure_core::domain::AudioParams;
use verdure_protocol::{Envelope, parse_envelope};
use verdure_transport::{InboundEvent, Transport, TransportError, WsConfig, WsTransport};

/// What the mock server observed and can be told to do.
struct ServerHarness {
    addr: SocketAddr,
    /// Messages the server received after the handshake.
    received: mpsc::UnboundedReceiver<Message>,
    /// Frames for the server to send to the client.
    to_client: mpsc::UnboundedSender<Message>,
    /// The client hello as the server saw it.
    client_hello: mpsc::UnboundedReceiver<Envelope>,
}

/// Spawn a one-connection server. `hello_reply` of `None` means the server
/// stays silent after the upgrade (hello-timeout scenario).
async fn spawn_server(hello_reply: Option<String>) -> ServerHarness {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (received_tx, received) = mpsc::unbounded_channel();
    let (to_client, mut to_client_rx) = mpsc::unbounded_channel::<Message>();
    let (hello_tx, client_hello) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _peer) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        let (mut write, mut read) = ws.split();

        // Handshake: the client speaks first.
        if let Some(Ok(Message::Text(text))) = read.next().await {
            if let Ok(envelope) = parse_envelope(text.as_str()) {
                let _ = hello_tx.send(envelope);
            }
        }
        match hello_reply {
            Some(reply) => {
                write.send(Message::Text(reply.into())).await.unwrap();
            }
            None => {
                // Say nothing; the client must give up on its own.
                tokio::time::sleep(Duration::from_secs(2)).await;
                return;
            }
        }

        // Post-handshake: relay both directions until either side ends.
        loop {
            tokio::select! {
                incoming = read.next() => match incoming {
                    Some(Ok(message)) => {
                        if received_tx.send(message).is_err() {
                            return;
                        }
                    }
                    _ => return,
                },
                outgoing = to_client_rx.recv() => match outgoing {
                    Some(message) => {
                        if write.send(message).await.is_err() {
                            return;
                        }
                    }
                    None => return,
                },
            }
        }
    });

    ServerHarness {
        addr,
        received,
        to_client,
        client_hello,
    }
}

fn config(addr: SocketAddr, hello_timeout: Duration) -> WsConfig {
    WsConfig {
        url: format!("ws://{addr}/"),
        device_id: "aa:bb:cc:dd".into(),
        client_id: "it-client".into(),
        advertised: AudioParams::default(),
        audio_format: "opus".into(),
        hello_timeout,
        read_idle_timeout: Duration::from_secs(30),
    }
}

const SERVER_HELLO: &str = r#"{"type":"hello","transport":"websocket","session_id":"s-9",
    "audio_params":{"sample_rate":24000,"frame_duration":60},"features":{"mcp":true}}"#;

#[tokio::test]
async fn handshake_negotiates_the_session() {
    let mut server = spawn_server(Some(SERVER_HELLO.to_string())).await;
    let transport = WsTransport::new(config(server.addr, Duration::from_secs(2)));

    let connection = transport.connect().await.expect("handshake should succeed");

    // Server reply is authoritative for the session.
    assert_eq!(connection.hello.session_id.as_deref(), Some("s-9"));
    assert_eq!(connection.hello.audio_params.sample_rate, 24_000);
    assert_eq!(connection.hello.audio_params.channels, 1);
    assert!(connection.hello.supports_mcp);

    // The client advertised MCP and its audio parameters.
    let Envelope::Hello(client_hello) = server.client_hello.recv().await.unwrap() else {
        panic!("server did not see a hello first");
    };
    assert!(client_hello.supports_mcp());
    let advertised = client_hello.audio_params.unwrap();
    assert_eq!(advertised.format.as_deref(), Some("opus"));
    assert_eq!(advertised.sample_rate, Some(16_000));
    assert_eq!(advertised.frame_duration, Some(60));
}

#[tokio::test]
async fn text_and_audio_travel_on_separate_paths() {
    let mut server = spawn_server(Some(SERVER_HELLO.to_string())).await;
    let transport = WsTransport::new(config(server.addr, Duration::from_secs(2)));
    let mut connection = transport.connect().await.unwrap();

    // Server → client: a control envelope and a binary frame.
    server
        .to_client
        .send(Message::Text(
            r#"{"type":"tts","state":"start"}"#.to_string().into(),
        ))
        .unwrap();
    server
        .to_client
        .send(Message::Binary(vec![0xAB, 0xCD, 0xEF].into()))
        .unwrap();

    let envelope = tokio::time::timeout(Duration::from_secs(2), connection.inbound.recv())
        .await
        .unwrap()
        .unwrap();
    let InboundEvent::Envelope(Envelope::Tts(tts)) = envelope else {
        panic!("expected tts envelope, got {envelope:?}");
    };
    assert_eq!(
        serde_json::to_value(tts.state).unwrap(),
        serde_json::json!("start")
    );

    let packet = tokio::time::timeout(Duration::from_secs(2), connection.audio.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(packet, vec![0xAB, 0xCD, 0xEF]);

    // Client → server: an envelope and an audio frame.
    connection
        .outbound
        .send_envelope(&Envelope::listen(
            Some("s-9".into()),
            verdure_protocol::ListenState::Start,
            None,
            None,
        ))
        .await
        .unwrap();
    connection.outbound.send_audio(vec![1, 2, 3, 4]).await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(2), server.received.recv())
        .await
        .unwrap()
        .unwrap();
    let Message::Text(text) = first else {
        panic!("expected text frame, got {first:?}");
    };
    assert!(matches!(
        parse_envelope(text.as_str()),
        Ok(Envelope::Listen(_))
    ));

    let second = tokio::time::timeout(Duration::from_secs(2), server.received.recv())
        .await
        .unwrap()
        .unwrap();
    let Message::Binary(payload) = second else {
        panic!("expected binary frame, got {second:?}");
    };
    assert_eq!(payload.to_vec(), vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn silent_server_trips_the_hello_timeout() {
    let server = spawn_server(None).await;
    let transport = WsTransport::new(config(server.addr, Duration::from_millis(200)));

    let err = transport.connect().await.unwrap_err();
    assert!(
        matches!(err, TransportError::HelloTimeout(_)),
        "expected HelloTimeout, got {err:?}"
    );
}

#[tokio::test]
async fn server_close_surfaces_as_disconnect() {
    let server = spawn_server(Some(SERVER_HELLO.to_string())).await;
    let transport = WsTransport::new(config(server.addr, Duration::from_secs(2)));
    let mut connection = transport.connect().await.unwrap();

    // Dropping the sender ends the relay loop, closing the socket.
    drop(server.to_client);
    drop(server.received);

    let event = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match connection.inbound.recv().await {
                Some(InboundEvent::Disconnected { reason }) => return reason,
                Some(_) => {}
                None => return "channel closed".to_string(),
            }
        }
    })
    .await
    .expect("disconnect never surfaced");

    assert!(!event.is_empty());
}
