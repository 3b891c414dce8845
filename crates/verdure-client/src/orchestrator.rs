//! The voice orchestrator: owns the conversation lifecycle and wires the
//! capture hub, codec, playback, keyword spotter, transport, MCP engine,
//! state machine, and coordinators together.
//!
//! All triggers — public API calls, transport events, playback completion,
//! keyword detections, interrupts — funnel into one runtime task and are
//! applied to the state machine in order, which makes transitions globally
//! linearizable. The keyword spotter is a pure producer: this runtime is the
//! only consumer of its detections, so a wake word can never start a
//! conversation twice through parallel paths.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use verdure_audio::codec::CodecApplication;
use verdure_audio::playback::{Playback, PlaybackConfig, PlaybackEvent};
use verdure_audio::sink::AudioSink;
use verdure_audio::capture::CaptureBackend;
use verdure_audio::spotter::{KeywordBackendFactory, KeywordDetection, KeywordSpotter, SpotterEvent};
use verdure_audio::vad::{EnergyVad, VadConfig};
use verdure_audio::{CaptureHub, OpusCodec, Subscription};
use verdure_core::config::ClientConfig;
use verdure_core::domain::{
    AbortReason, AudioParams, ChatMessage, ConversationContext, ConversationTrigger, DeviceState,
    ListeningMode,
};
use verdure_core::error::ErrorKind;
use verdure_core::events::{ClientEvent, StateChange, TtsState};
use verdure_core::ports::{ClientEventEmitter, MediaController};
use verdure_mcp::{DeviceStatusBoard, McpEngine, ToolRegistry};
use verdure_mcp::{Camera, Lamp, MusicPlayer, Speaker};
use verdure_protocol::{Envelope, ListenState, McpEnvelope, TtsMessage};
use verdure_transport::{
    Backoff, InboundEvent, OutboundHandle, Transport, TransportConnection, TransportError,
};

use crate::error::ClientError;
use crate::interrupt::{InterruptCoordinator, InterruptSource};
use crate::music::MusicVoiceCoordinator;
use crate::state::StateMachine;

/// Ceiling on waiting for the runtime to drain at shutdown.
const SHUTDOWN_CEILING: Duration = Duration::from_secs(10);

/// Injected collaborators.
///
/// Production wiring uses the real transport, a rodio sink, and the sherpa
/// keyword factory; tests inject mocks through the same seams.
pub struct OrchestratorDeps {
    pub transport: Arc<dyn Transport>,
    pub emitter: Arc<dyn ClientEventEmitter>,
    pub media: Arc<dyn MediaController>,
    pub capture: Arc<dyn CaptureBackend>,
    pub sink: Arc<dyn AudioSink>,
    pub keyword_factory: Option<Arc<dyn KeywordBackendFactory>>,
}

/// Commands from the public API into the runtime.
enum Command {
    Connect,
    StartVoiceChat,
    StopVoiceChat,
    SendText(String),
    Toggle,
    SetListeningMode(ListeningMode),
    RestartSpotter,
    /// Internal: a deferred trigger (re-arm, recovery).
    Dispatch(ConversationTrigger, Option<String>),
}

/// The public conversation surface.
pub struct VoiceOrchestrator {
    command_tx: mpsc::UnboundedSender<Command>,
    context: Arc<Mutex<ConversationContext>>,
    transcript: Arc<Mutex<Vec<ChatMessage>>>,
    hub: Arc<CaptureHub>,
    interrupts: InterruptCoordinator,
    registry: Arc<ToolRegistry>,
    cancel: CancellationToken,
    runtime: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl VoiceOrchestrator {
    /// Validate the configuration, build the pipeline, and start the runtime.
    pub fn new(config: ClientConfig, deps: OrchestratorDeps) -> Result<Self, ClientError> {
        config.validate()?;

        let context = Arc::new(Mutex::new(ConversationContext {
            mode: config.listening_mode,
            keep_listening: config.keep_listening,
            ..ConversationContext::default()
        }));
        let transcript = Arc::new(Mutex::new(Vec::new()));
        let hub = Arc::new(CaptureHub::with_backend(
            Arc::clone(&deps.capture),
            config.stream_stop_timeout,
        ));

        // Local tool registry with the built-in device adapters. The music
        // player doubles as the media-controller port when no external
        // player is injected.
        let registry = Arc::new(ToolRegistry::new());
        let board = DeviceStatusBoard::new();
        let playback_sink = Arc::clone(&deps.sink);
        Lamp::new().register(&registry, &board)?;
        Speaker::new(Some(Arc::new(move |volume| {
            playback_sink.set_volume(f32::from(volume) / 100.0);
        })))
        .register(&registry, &board)?;
        Camera::new(None).register(&registry, &board)?;
        MusicPlayer::new().register(&registry, &board)?;
        board.register_status_tool(&registry)?;

        let (engine, mcp_outbound) = McpEngine::new(
            Arc::clone(&registry),
            config.mcp_request_timeout,
            "verdure",
            env!("CARGO_PKG_VERSION"),
        );

        let (playback, playback_events) = Playback::new(
            Arc::clone(&deps.sink),
            PlaybackConfig {
                eos_idle: config.playback_eos_idle,
                frame_duration: Duration::from_millis(u64::from(config.audio.frame_duration_ms)),
            },
        );

        let (spotter, spotter_events, spotter_keepalive) =
            match (&deps.keyword_factory, &config.current_keyword_model) {
                (Some(factory), Some(model)) if config.enable_voice => {
                    let model_path = config
                        .keyword_models_path
                        .as_deref()
                        .map_or_else(|| model.clone(), |dir| format!("{dir}/{model}"));
                    let (spotter, events) = KeywordSpotter::new(
                        Arc::clone(factory),
                        model_path,
                        config.spotter_recreate_gap,
                    );
                    (Some(spotter), events, None)
                }
                _ => {
                    // No spotter: keep the sender alive so the runtime's
                    // select arm stays quiet instead of seeing a closed
                    // channel.
                    let (tx, events) = mpsc::unbounded_channel();
                    (None, events, Some(tx))
                }
            };

        let (interrupts, interrupt_rx) = InterruptCoordinator::new();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (encoded_tx, encoded_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let runtime = Runtime {
            config,
            emitter: Arc::clone(&deps.emitter),
            machine: StateMachine::new(),
            context: Arc::clone(&context),
            transcript: Arc::clone(&transcript),
            hub: Arc::clone(&hub),
            playback,
            playback_events,
            decoder: None,
            spotter,
            spotter_events,
            _spotter_keepalive: spotter_keepalive,
            engine: Arc::new(engine),
            mcp_outbound,
            music: MusicVoiceCoordinator::new(Arc::clone(&deps.media)),
            interrupts: interrupts.clone(),
            interrupt_rx,
            transport: Arc::clone(&deps.transport),
            outbound: None,
            inbound: None,
            audio_in: None,
            session_params: None,
            session_id: None,
            streaming: Arc::new(AtomicBool::new(false)),
            vad_armed: Arc::new(AtomicBool::new(false)),
            vad_sub: None,
            encoded_tx,
            encoded_rx,
            capture_sub: None,
            self_tx: command_tx.clone(),
            command_rx,
            cancel: cancel.clone(),
        };

        let handle = tokio::spawn(runtime.run());

        Ok(Self {
            command_tx,
            context,
            transcript,
            hub,
            interrupts,
            registry,
            cancel,
            runtime: Mutex::new(Some(handle)),
        })
    }

    // ── Public API ─────────────────────────────────────────────────

    /// Connect to the configured server (retries with backoff).
    pub fn connect(&self) -> Result<(), ClientError> {
        self.send(Command::Connect)
    }

    /// Open a listening turn.
    pub fn start_voice_chat(&self) -> Result<(), ClientError> {
        self.send(Command::StartVoiceChat)
    }

    /// End the current turn.
    pub fn stop_voice_chat(&self) -> Result<(), ClientError> {
        self.send(Command::StopVoiceChat)
    }

    /// Send a text message instead of speaking.
    pub fn send_text_message(&self, text: impl Into<String>) -> Result<(), ClientError> {
        self.send(Command::SendText(text.into()))
    }

    /// Start a turn when idle, stop it otherwise.
    pub fn toggle_chat_state(&self) -> Result<(), ClientError> {
        self.send(Command::Toggle)
    }

    /// Change the listening mode for subsequent turns.
    pub fn set_listening_mode(&self, mode: ListeningMode) -> Result<(), ClientError> {
        self.send(Command::SetListeningMode(mode))
    }

    /// Clear the keyword spotter's failure latch and start it again.
    pub fn restart_spotter(&self) -> Result<(), ClientError> {
        self.send(Command::RestartSpotter)
    }

    /// Raise an interrupt (user button, barge-in detection, …).
    pub fn interrupt(&self, source: InterruptSource) {
        self.interrupts.raise(source);
    }

    /// Snapshot of the conversation context.
    pub fn context(&self) -> ConversationContext {
        lock(&self.context).clone()
    }

    /// Snapshot of the transcript.
    pub fn transcript(&self) -> Vec<ChatMessage> {
        lock(&self.transcript).clone()
    }

    /// The shared capture hub (subscriptions for tooling, tests).
    pub fn capture_hub(&self) -> Arc<CaptureHub> {
        Arc::clone(&self.hub)
    }

    /// The local tool registry.
    pub fn tool_registry(&self) -> Arc<ToolRegistry> {
        Arc::clone(&self.registry)
    }

    /// Cancel everything and wait (bounded) for the runtime to drain.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = lock(&self.runtime).take();
        if let Some(handle) = handle {
            if tokio::time::timeout(SHUTDOWN_CEILING, handle).await.is_err() {
                tracing::warn!("Runtime did not drain within the shutdown ceiling");
            }
        }
    }

    fn send(&self, command: Command) -> Result<(), ClientError> {
        self.command_tx
            .send(command)
            .map_err(|_| ClientError::ShutDown)
    }
}

// ── Runtime ────────────────────────────────────────────────────────

enum RuntimeEvent {
    Command(Option<Command>),
    Inbound(Option<InboundEvent>),
    AudioIn(Option<Vec<u8>>),
    Playback(Option<PlaybackEvent>),
    Spotter(Option<SpotterEvent>),
    McpOutbound(Option<Value>),
    Encoded(Option<Vec<u8>>),
    Interrupt(Option<InterruptSource>),
    Cancelled,
}

struct Runtime {
    config: ClientConfig,
    emitter: Arc<dyn ClientEventEmitter>,
    machine: StateMachine,
    context: Arc<Mutex<ConversationContext>>,
    transcript: Arc<Mutex<Vec<ChatMessage>>>,
    hub: Arc<CaptureHub>,
    playback: Playback,
    playback_events: mpsc::UnboundedReceiver<PlaybackEvent>,
    decoder: Option<OpusCodec>,
    spotter: Option<KeywordSpotter>,
    spotter_events: mpsc::UnboundedReceiver<SpotterEvent>,
    /// Keeps the spotter event channel open when no spotter is configured.
    _spotter_keepalive: Option<mpsc::UnboundedSender<SpotterEvent>>,
    engine: Arc<McpEngine>,
    mcp_outbound: mpsc::UnboundedReceiver<Value>,
    music: MusicVoiceCoordinator,
    interrupts: InterruptCoordinator,
    interrupt_rx: mpsc::UnboundedReceiver<InterruptSource>,
    transport: Arc<dyn Transport>,
    outbound: Option<OutboundHandle>,
    inbound: Option<mpsc::Receiver<InboundEvent>>,
    audio_in: Option<mpsc::Receiver<Vec<u8>>>,
    session_params: Option<AudioParams>,
    session_id: Option<String>,
    /// Gate read by the capture-side encoder: frames flow out only while set.
    streaming: Arc<AtomicBool>,
    /// Gate for the barge-in detector: armed only while Speaking.
    vad_armed: Arc<AtomicBool>,
    vad_sub: Option<Subscription>,
    encoded_tx: mpsc::UnboundedSender<Vec<u8>>,
    encoded_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    capture_sub: Option<Subscription>,
    self_tx: mpsc::UnboundedSender<Command>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
}

async fn recv_or_pending<T>(rx: Option<&mut mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl Runtime {
    async fn run(mut self) {
        tracing::info!("Voice orchestrator runtime started");
        loop {
            let event = tokio::select! {
                () = self.cancel.cancelled() => RuntimeEvent::Cancelled,
                cmd = self.command_rx.recv() => RuntimeEvent::Command(cmd),
                env = recv_or_pending(self.inbound.as_mut()) => RuntimeEvent::Inbound(env),
                pkt = recv_or_pending(self.audio_in.as_mut()) => RuntimeEvent::AudioIn(pkt),
                ev = self.playback_events.recv() => RuntimeEvent::Playback(ev),
                ev = self.spotter_events.recv() => RuntimeEvent::Spotter(ev),
                payload = self.mcp_outbound.recv() => RuntimeEvent::McpOutbound(payload),
                pkt = self.encoded_rx.recv() => RuntimeEvent::Encoded(pkt),
                src = self.interrupt_rx.recv() => RuntimeEvent::Interrupt(src),
            };

            if !self.handle_event(event).await {
                break;
            }
        }
        self.teardown().await;
        tracing::info!("Voice orchestrator runtime stopped");
    }

    async fn handle_event(&mut self, event: RuntimeEvent) -> bool {
        match event {
            RuntimeEvent::Cancelled | RuntimeEvent::Command(None) => return false,
            RuntimeEvent::Command(Some(command)) => self.handle_command(command).await,
            RuntimeEvent::Inbound(None) => self.on_disconnected("stream ended".into()).await,
            RuntimeEvent::Inbound(Some(InboundEvent::Disconnected { reason })) => {
                self.on_disconnected(reason).await;
            }
            RuntimeEvent::Inbound(Some(InboundEvent::Envelope(envelope))) => {
                self.route_envelope(envelope).await;
            }
            RuntimeEvent::AudioIn(Some(packet)) => self.on_inbound_audio(&packet),
            RuntimeEvent::AudioIn(None) => {}
            RuntimeEvent::Playback(Some(PlaybackEvent::Completed)) => {
                self.dispatch(ConversationTrigger::AudioPlaybackCompleted, None)
                    .await;
            }
            RuntimeEvent::Playback(None) => {}
            RuntimeEvent::Spotter(Some(event)) => self.on_spotter_event(event).await,
            RuntimeEvent::Spotter(None) => {}
            RuntimeEvent::McpOutbound(Some(payload)) => self.send_mcp(payload).await,
            RuntimeEvent::McpOutbound(None) => {}
            RuntimeEvent::Encoded(Some(packet)) => self.on_encoded_frame(packet).await,
            RuntimeEvent::Encoded(None) => {}
            RuntimeEvent::Interrupt(Some(source)) => self.on_interrupt(source).await,
            RuntimeEvent::Interrupt(None) => {}
        }
        true
    }

    // ── Commands ───────────────────────────────────────────────────

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => {
                if self.outbound.is_none() {
                    self.dispatch(ConversationTrigger::ConnectToServer, None).await;
                    self.connect_cycle().await;
                }
            }
            Command::StartVoiceChat => {
                if self.outbound.is_none() {
                    self.emit_error(ErrorKind::Transport, "not connected to a server");
                    return;
                }
                self.emitter
                    .emit(ClientEvent::VoiceChatStateChanged { active: true });
                self.dispatch(ConversationTrigger::StartVoiceChat, None).await;
            }
            Command::StopVoiceChat => {
                if self.machine.state() == DeviceState::Listening {
                    self.send_envelope(&Envelope::listen(
                        self.session_id.clone(),
                        ListenState::Stop,
                        None,
                        None,
                    ))
                    .await;
                }
                self.emitter
                    .emit(ClientEvent::VoiceChatStateChanged { active: false });
                self.dispatch(ConversationTrigger::StopVoiceChat, None).await;
            }
            Command::SendText(text) => self.send_text(text).await,
            Command::Toggle => match self.machine.state() {
                DeviceState::Idle => {
                    self.self_command(Command::StartVoiceChat);
                }
                DeviceState::Listening | DeviceState::Speaking => {
                    self.self_command(Command::StopVoiceChat);
                }
                DeviceState::Connecting => {}
            },
            Command::SetListeningMode(mode) => {
                self.config.listening_mode = mode;
                self.update_context();
                self.emitter.emit(ClientEvent::ListeningModeChanged { mode });
            }
            Command::RestartSpotter => {
                if let Some(spotter) = self.spotter.as_mut() {
                    if let Err(e) = spotter.restart(&self.hub) {
                        self.emit_error(ErrorKind::KeywordSpotter, e.to_string());
                    }
                }
            }
            Command::Dispatch(trigger, reason) => self.dispatch(trigger, reason).await,
        }
    }

    async fn send_text(&mut self, text: String) {
        if self.outbound.is_none() {
            self.emit_error(ErrorKind::Transport, "not connected to a server");
            return;
        }
        let message = ChatMessage::user(text.clone());
        lock(&self.transcript).push(message.clone());
        self.emitter.emit(ClientEvent::message(message));

        // Text input rides the wake-word report channel.
        self.send_envelope(&Envelope::listen(
            self.session_id.clone(),
            ListenState::Detect,
            None,
            Some(text),
        ))
        .await;
    }

    // ── Connection lifecycle ───────────────────────────────────────

    /// Connect with backoff until success or cancellation, then settle the
    /// session into Idle.
    async fn connect_cycle(&mut self) {
        let mut backoff = Backoff::reconnect();
        let connection = loop {
            if self.cancel.is_cancelled() {
                return;
            }
            match self.transport.connect().await {
                Ok(connection) => break connection,
                Err(TransportError::Cancelled) => return,
                Err(e) => {
                    self.emit_error(ErrorKind::Transport, e.to_string());
                    let delay = backoff.next_delay();
                    tracing::warn!(error = %e, ?delay, "Connect attempt failed");
                    tokio::select! {
                        () = self.cancel.cancelled() => return,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        };
        self.install_connection(connection);

        // Settle Connecting → Idle; Idle entry re-arms the spotter.
        self.dispatch(ConversationTrigger::ForceIdle, Some("connected".into()))
            .await;
    }

    fn install_connection(&mut self, connection: TransportConnection) {
        let TransportConnection {
            hello,
            outbound,
            inbound,
            audio,
        } = connection;

        // Server-chosen parameters are authoritative. A parameter change
        // invalidates the codec pair and the capture pipeline.
        if self.session_params.is_some_and(|old| !old.is_compatible(&hello.audio_params)) {
            tracing::info!("Session audio parameters changed, rebuilding audio pipeline");
            self.capture_sub = None;
            self.vad_sub = None;
            self.decoder = None;
        }
        self.session_params = Some(hello.audio_params);
        self.session_id.clone_from(&hello.session_id);
        self.outbound = Some(outbound);
        self.inbound = Some(inbound);
        self.audio_in = Some(audio);

        match OpusCodec::new(hello.audio_params, CodecApplication::Voip) {
            Ok(codec) => self.decoder = Some(codec),
            Err(e) => self.emit_error(ErrorKind::AudioDevice, e.to_string()),
        }

        // Capture opens once per session; Listening ↔ Speaking cycles reuse it.
        if self.config.enable_voice {
            if let Err(e) = self.hub.start(hello.audio_params) {
                self.emit_error(ErrorKind::AudioDevice, e.to_string());
            }
            self.ensure_vad_pipeline(hello.audio_params);
            if let Some(spotter) = self.spotter.as_mut() {
                if !spotter.is_running() {
                    if let Err(e) = spotter.start(&self.hub) {
                        self.emit_error(ErrorKind::KeywordSpotter, e.to_string());
                    }
                }
            }
        }

        // MCP initialization is gated on the server's hello feature flag.
        if hello.supports_mcp {
            let engine = Arc::clone(&self.engine);
            let emitter = Arc::clone(&self.emitter);
            tokio::spawn(async move {
                match engine.initialize().await {
                    Ok(()) => emitter.emit(ClientEvent::McpEvent {
                        description: format!(
                            "session initialized, {} server tools mirrored",
                            engine.remote_tools().len()
                        ),
                    }),
                    Err(e) => {
                        tracing::warn!(error = %e, "MCP initialization failed");
                        emitter.emit(ClientEvent::error(ErrorKind::Mcp, e.to_string()));
                    }
                }
            });
        } else {
            tracing::info!("Server does not support MCP; tool surface disabled");
        }

        self.update_context();
    }

    async fn on_disconnected(&mut self, reason: String) {
        tracing::warn!(%reason, "Server disconnected");
        self.drop_connection();
        self.emit_error(ErrorKind::Transport, reason.clone());
        self.dispatch(ConversationTrigger::ServerDisconnected, Some(reason))
            .await;
        self.connect_cycle().await;
    }

    fn drop_connection(&mut self) {
        self.outbound = None;
        self.inbound = None;
        self.audio_in = None;
        self.session_id = None;
        self.engine.reset();
        self.streaming.store(false, Ordering::SeqCst);
        self.update_context();
    }

    async fn on_goodbye(&mut self) {
        tracing::info!("Server said goodbye, ending session");
        if let Some(outbound) = &self.outbound {
            outbound.close().await;
        }
        self.drop_connection();
        self.dispatch(ConversationTrigger::ForceIdle, Some("goodbye".into()))
            .await;
    }

    // ── Envelope routing ───────────────────────────────────────────

    async fn route_envelope(&mut self, envelope: Envelope) {
        match envelope {
            Envelope::Tts(tts) => self.on_tts(tts).await,
            Envelope::Stt { text, .. } => {
                let message = ChatMessage::user(text);
                lock(&self.transcript).push(message.clone());
                self.emitter.emit(ClientEvent::message(message));
            }
            Envelope::Llm(llm) => {
                if let Some(text) = llm.text.clone() {
                    let message = ChatMessage::assistant(text);
                    lock(&self.transcript).push(message.clone());
                    self.emitter.emit(ClientEvent::message(message));
                }
                self.emitter.emit(ClientEvent::LlmMessageReceived {
                    text: llm.text.unwrap_or_default(),
                    emotion: llm.emotion,
                });
            }
            Envelope::Music(music) => {
                let payload = serde_json::to_value(&music).unwrap_or(Value::Null);
                self.emitter
                    .emit(ClientEvent::MusicMessageReceived { payload });
            }
            Envelope::Mcp(McpEnvelope { payload, .. }) => {
                // MCP traffic mutates devices; it never moves the state machine.
                self.engine.handle_payload(&payload);
            }
            Envelope::Iot(_) => {
                // Superseded by MCP; mutually exclusive per session.
                tracing::debug!("Legacy iot envelope ignored");
            }
            Envelope::Goodbye { .. } => self.on_goodbye().await,
            Envelope::Hello(_) => {
                tracing::debug!("Unexpected hello after handshake, ignored");
            }
            Envelope::Listen(_) | Envelope::Abort(_) => {
                tracing::debug!("Client-direction envelope from server, ignored");
            }
        }
    }

    async fn on_tts(&mut self, tts: TtsMessage) {
        self.emitter
            .emit(ClientEvent::tts(tts.state, tts.text.clone()));

        match tts.state {
            TtsState::Start => {
                self.dispatch(ConversationTrigger::TtsStarted, None).await;
            }
            TtsState::Stop => {
                self.dispatch(ConversationTrigger::TtsCompleted, None).await;
            }
            // Sentence boundaries carry display text but do not move state.
            TtsState::SentenceStart | TtsState::SentenceEnd => {}
        }
    }

    fn on_inbound_audio(&mut self, packet: &[u8]) {
        let state = self.machine.state();
        let duplex = self.config.listening_mode == ListeningMode::AlwaysOn
            && state == DeviceState::Listening;
        if state != DeviceState::Speaking && !duplex {
            return;
        }

        if let Some(decoder) = self.decoder.as_mut() {
            let pcm = decoder.decode(packet);
            let params = self.session_params.unwrap_or_default();
            self.playback.enqueue(verdure_core::domain::AudioFrame::new(
                pcm,
                params.sample_rate,
                params.channels,
            ));
        }
    }

    async fn on_encoded_frame(&mut self, packet: Vec<u8>) {
        // Outbound audio flows only while Listening.
        if self.machine.state() != DeviceState::Listening {
            return;
        }
        if let Some(outbound) = &self.outbound {
            if let Err(e) = outbound.send_audio(packet).await {
                tracing::warn!(error = %e, "Failed to send audio frame");
            }
        }
    }

    // ── Spotter / interrupts ───────────────────────────────────────

    async fn on_spotter_event(&mut self, event: SpotterEvent) {
        match event {
            SpotterEvent::Detected(detection) => self.on_keyword(detection).await,
            SpotterEvent::Error(message) => {
                self.emit_error(ErrorKind::KeywordSpotter, message);
            }
            SpotterEvent::Disabled => {
                if let Some(spotter) = self.spotter.as_mut() {
                    spotter.stop();
                }
                self.emit_error(
                    ErrorKind::KeywordSpotter,
                    "keyword spotter disabled after repeated failures",
                );
            }
        }
    }

    async fn on_keyword(&mut self, detection: KeywordDetection) {
        tracing::info!(keyword = %detection.keyword, "Handling keyword detection");

        match self.machine.state() {
            DeviceState::Idle => {
                if self.outbound.is_none() {
                    // Wake word while offline: begin connecting instead.
                    self.self_command(Command::Connect);
                    return;
                }
                self.send_envelope(&Envelope::listen(
                    self.session_id.clone(),
                    ListenState::Detect,
                    None,
                    Some(detection.keyword.clone()),
                ))
                .await;
                self.dispatch(
                    ConversationTrigger::KeywordDetected,
                    Some(detection.keyword),
                )
                .await;
            }
            DeviceState::Speaking => {
                // Barge-in: silence the speaker first, then tell the server.
                self.playback.flush();
                self.set_pending_abort(AbortReason::WakeWordDetected);
                self.send_envelope(&Envelope::abort(
                    self.session_id.clone(),
                    AbortReason::WakeWordDetected,
                ))
                .await;
                self.dispatch(
                    ConversationTrigger::KeywordDetected,
                    Some(detection.keyword),
                )
                .await;
            }
            DeviceState::Listening => {
                self.dispatch(
                    ConversationTrigger::KeywordDetected,
                    Some(detection.keyword),
                )
                .await;
            }
            DeviceState::Connecting => {}
        }
    }

    async fn on_interrupt(&mut self, source: InterruptSource) {
        tracing::debug!(?source, "Interrupt");

        // A network interrupt is a disconnect: recycle the connection.
        if source == InterruptSource::Network {
            self.on_disconnected("network interrupt".into()).await;
            return;
        }

        let state = self.machine.state();

        if source.flushes_playback() && state == DeviceState::Speaking {
            self.playback.flush();
        }
        if state == DeviceState::Speaking || state == DeviceState::Listening {
            self.set_pending_abort(source.abort_reason());
            if state == DeviceState::Speaking {
                self.send_envelope(&Envelope::abort(
                    self.session_id.clone(),
                    source.abort_reason(),
                ))
                .await;
            }
        }

        self.dispatch(source.trigger(), Some(format!("{source:?}"))).await;
    }

    // ── State machine ──────────────────────────────────────────────

    async fn dispatch(&mut self, trigger: ConversationTrigger, reason: Option<String>) {
        // AlwaysOn keeps streaming through server speech: the Listening →
        // Speaking edge is suppressed and inbound audio plays in duplex.
        if trigger == ConversationTrigger::TtsStarted
            && self.config.listening_mode == ListeningMode::AlwaysOn
            && self.machine.state() == DeviceState::Listening
        {
            tracing::debug!("AlwaysOn: staying in Listening through TTS");
            return;
        }

        let Some(change) = self.machine.apply(trigger, reason) else {
            return;
        };

        match change.to {
            DeviceState::Listening => self.enter_listening().await,
            DeviceState::Speaking => self.enter_speaking(),
            DeviceState::Idle => self.enter_idle(&change),
            DeviceState::Connecting => self.enter_connecting(),
        }

        self.update_context();
        self.emitter.emit(ClientEvent::DeviceStateChanged { change });
    }

    async fn enter_listening(&mut self) {
        self.music.on_turn_started();
        if let Some(spotter) = &self.spotter {
            // Paused, not stopped: the subscriber slot survives the turn.
            spotter.pause();
        }
        self.vad_armed.store(false, Ordering::SeqCst);
        self.playback.flush();

        let params = self.session_params.unwrap_or(self.config.audio);
        if self.config.enable_voice {
            // No-op when the stream is already open with these parameters.
            if let Err(e) = self.hub.start(params) {
                self.emit_error(ErrorKind::AudioDevice, e.to_string());
                self.self_command(Command::Dispatch(
                    ConversationTrigger::ForceIdle,
                    Some("audio device error".into()),
                ));
                return;
            }
        }
        self.ensure_capture_pipeline(params);
        self.streaming.store(true, Ordering::SeqCst);

        self.send_envelope(&Envelope::listen(
            self.session_id.clone(),
            ListenState::Start,
            Some(self.config.listening_mode),
            None,
        ))
        .await;
    }

    fn enter_speaking(&mut self) {
        self.music.on_turn_started();
        if let Some(spotter) = &self.spotter {
            spotter.pause();
        }
        // Capture keeps running so barge-in detection still hears the user,
        // but encoded frames stop flowing out.
        self.streaming.store(false, Ordering::SeqCst);
        self.vad_armed.store(true, Ordering::SeqCst);
    }

    fn enter_idle(&mut self, change: &StateChange) {
        self.streaming.store(false, Ordering::SeqCst);
        self.vad_armed.store(false, Ordering::SeqCst);
        self.set_pending_abort(AbortReason::None);
        self.music.on_turn_ended();

        let turn_finished = matches!(
            change.trigger,
            ConversationTrigger::TtsCompleted | ConversationTrigger::AudioPlaybackCompleted
        );
        if turn_finished
            && self.config.keep_listening
            && self.config.listening_mode == ListeningMode::AutoStop
            && self.outbound.is_some()
        {
            // Deferred re-arm: the next loop iteration opens a fresh turn.
            self.self_command(Command::Dispatch(
                ConversationTrigger::StartVoiceChat,
                Some("keep-listening re-arm".into()),
            ));
        } else if let Some(spotter) = &self.spotter {
            spotter.resume();
        }
    }

    fn enter_connecting(&mut self) {
        self.playback.flush();
        self.streaming.store(false, Ordering::SeqCst);
        self.vad_armed.store(false, Ordering::SeqCst);
        if let Some(spotter) = &self.spotter {
            spotter.pause();
        }
    }

    /// Build the capture → barge-in detector path once per parameter set.
    ///
    /// The detector stays subscribed across turns; the armed flag decides
    /// whether frames count. While disarmed it just sheds state.
    fn ensure_vad_pipeline(&mut self, params: AudioParams) {
        if self.vad_sub.is_some() {
            return;
        }
        let armed = Arc::clone(&self.vad_armed);
        let interrupts = self.interrupts.clone();
        let mut vad = EnergyVad::new(VadConfig::default(), params.sample_rate);

        self.vad_sub = Some(self.hub.subscribe(move |frame| {
            if !armed.load(Ordering::Relaxed) {
                vad.reset();
                return;
            }
            if vad.process(&frame.pcm).is_some() {
                interrupts.raise(InterruptSource::Voice);
            }
        }));
    }

    /// Build the capture → encode → transport path once per parameter set.
    fn ensure_capture_pipeline(&mut self, params: AudioParams) {
        if self.capture_sub.is_some() {
            return;
        }
        let mut encoder = match OpusCodec::new(params, CodecApplication::Voip) {
            Ok(encoder) => encoder,
            Err(e) => {
                self.emit_error(ErrorKind::AudioDevice, e.to_string());
                return;
            }
        };
        let streaming = Arc::clone(&self.streaming);
        let encoded_tx = self.encoded_tx.clone();

        self.capture_sub = Some(self.hub.subscribe(move |frame| {
            if !streaming.load(Ordering::Relaxed) {
                return;
            }
            match encoder.encode(&frame.pcm) {
                Ok(packet) => {
                    let _ = encoded_tx.send(packet);
                }
                Err(e) => tracing::warn!(error = %e, "Frame encode failed"),
            }
        }));
    }

    // ── Helpers ────────────────────────────────────────────────────

    async fn send_mcp(&mut self, payload: Value) {
        let envelope = Envelope::mcp(self.session_id.clone(), payload);
        self.send_envelope(&envelope).await;
    }

    async fn send_envelope(&mut self, envelope: &Envelope) {
        if let Some(outbound) = &self.outbound {
            if let Err(e) = outbound.send_envelope(envelope).await {
                tracing::warn!(error = %e, "Failed to send envelope");
            }
        }
    }

    fn self_command(&self, command: Command) {
        let _ = self.self_tx.send(command);
    }

    fn set_pending_abort(&self, reason: AbortReason) {
        lock(&self.context).pending_abort = reason;
    }

    fn update_context(&self) {
        let mut context = lock(&self.context);
        context.state = self.machine.state();
        context.mode = self.config.listening_mode;
        context.keep_listening = self.config.keep_listening;
        context.session_id.clone_from(&self.session_id);
        context.mcp_initialized = self.engine.is_initialized();
    }

    fn emit_error(&self, kind: ErrorKind, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(%kind, %message, "Error surfaced");
        self.emitter.emit(ClientEvent::error(kind, message));
    }

    async fn teardown(&mut self) {
        if let Some(spotter) = self.spotter.as_mut() {
            spotter.stop();
        }
        self.capture_sub = None;
        self.vad_sub = None;
        self.playback.flush();
        if let Some(outbound) = &self.outbound {
            outbound.close().await;
        }
        if let Err(e) = self.hub.stop() {
            tracing::warn!(error = %e, "Capture stop during teardown failed");
        }
        self.engine.reset();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
