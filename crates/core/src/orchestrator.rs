use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use gemini_live::types::Part;
use gemini_live::types::audio::{INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE, PermissionState, Voice, pcm_rate};
use gemini_live::{EventRx, LiveEvent};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use crate::audio_io::{AudioIo, AudioSignal};
use crate::config::{AssistantConfig, ConfigError, ResponseModality, VoiceReconnect};
use crate::interaction_log::{InteractionLogEntry, InteractionLogger};
use crate::realtime_api::LiveApi;
use crate::session_state::{ConnectionStatus, Session, SessionSnapshot, UiMode, VoiceState};
use crate::tools::{ToolCallDispatcher, ToolRegistry};
use crate::transcript::{AudioContent, Message, Transcript};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const TOOL_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Something the orchestrator has to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Live(LiveEvent),
    Audio(AudioSignal),
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub model: String,
    pub mode: UiMode,
    pub voice_reconnect: VoiceReconnect,
    pub connect_timeout: Duration,
    pub user_id: Option<String>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            model: gemini_live::DEFAULT_MODEL.to_string(),
            mode: UiMode::default(),
            voice_reconnect: VoiceReconnect::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            user_id: None,
        }
    }
}

impl OrchestratorOptions {
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_mode(mut self, mode: UiMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_voice_reconnect(mut self, policy: VoiceReconnect) -> Self {
        self.voice_reconnect = policy;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }
}

/// Bytes captured during one recording.
#[derive(Debug, Default)]
struct Recording {
    bytes: usize,
    duration_ms: u64,
}

/// Owns the session state and sequences the live client, the audio device and the tools.
///
/// All state changes happen through `&mut self`, and a [`SessionSnapshot`] is published
/// after each one. The orchestrator is driven by its owner: await [`Self::next_signal`]
/// and pass the result to [`Self::handle_signal`].
pub struct SessionOrchestrator {
    live: Arc<dyn LiveApi>,
    events: EventRx,
    events_closed: bool,
    audio: Box<dyn AudioIo>,
    audio_rx: mpsc::Receiver<AudioSignal>,
    audio_closed: bool,

    options: OrchestratorOptions,
    config: AssistantConfig,
    dispatcher: ToolCallDispatcher,
    tool_tasks: JoinSet<()>,
    logger: InteractionLogger,

    session: Session,
    transcript: Transcript,
    recording: Option<Recording>,
    output_bytes: usize,
    audio_level: u8,
    is_sidebar_open: bool,
    is_transitioning: bool,
    last_error: Option<String>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl SessionOrchestrator {
    pub fn new(
        live: Arc<dyn LiveApi>,
        audio: Box<dyn AudioIo>,
        audio_rx: mpsc::Receiver<AudioSignal>,
        tools: ToolRegistry,
        logger: InteractionLogger,
        config: AssistantConfig,
        options: OrchestratorOptions,
    ) -> Self {
        let session = Session::new(options.mode);
        let dispatcher = ToolCallDispatcher::new(
            Arc::new(tools),
            live.clone(),
            logger.clone(),
            &session.session_id,
        );
        let events = live.subscribe();
        let (snapshot, _) = watch::channel(SessionSnapshot {
            session: session.clone(),
            is_recording: false,
            is_playing: false,
            audio_level: 0,
            microphone_permission: audio.permission(),
            is_streaming: false,
            current_response: String::new(),
            is_sidebar_open: false,
            is_transitioning: false,
            last_error: None,
            message_count: 0,
        });

        tracing::info!("session {} created in {:?} mode", session.session_id, session.ui_mode);

        let orchestrator = Self {
            live,
            events,
            events_closed: false,
            audio,
            audio_rx,
            audio_closed: false,
            options,
            config,
            dispatcher,
            tool_tasks: JoinSet::new(),
            logger,
            session,
            transcript: Transcript::new(),
            recording: None,
            output_bytes: 0,
            audio_level: 0,
            is_sidebar_open: false,
            is_transitioning: false,
            last_error: None,
            snapshot,
        };
        orchestrator.log(InteractionLogEntry::session_start(&orchestrator.session.session_id));
        orchestrator
    }

    // --- Queries ---

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn messages(&self) -> &[Message] {
        self.transcript.messages()
    }

    pub fn config(&self) -> &AssistantConfig {
        &self.config
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receives every published snapshot from now on.
    pub fn subscribe_snapshot(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    // --- Connection ---

    /// Connects in the current mode unless a connection is already up.
    pub async fn connect(&mut self) -> Result<()> {
        self.ensure_connected(self.session.ui_mode, self.options.connect_timeout)
            .await
    }

    /// The single path that opens a connection on behalf of an operation.
    ///
    /// Gives up after `timeout`, leaving the session disconnected with the status at `Error`.
    pub async fn ensure_connected(&mut self, mode: UiMode, timeout: Duration) -> Result<()> {
        if self.live.is_connected() {
            return Ok(());
        }
        // calls from a dropped connection must not answer on the new one
        self.abandon_tool_calls().await;

        self.set_connection_status(ConnectionStatus::Connecting);
        let config = self.config.live_config(mode, self.dispatcher.registry().tools());
        let attempt = tokio::time::timeout(timeout, self.live.connect(&self.options.model, &config)).await;

        match attempt {
            Ok(Ok(())) => {
                tracing::info!("session {} connected in {:?} mode", self.session.session_id, mode);
                self.last_error = None;
                self.set_connection_status(ConnectionStatus::Connected);
                Ok(())
            }
            Ok(Err(e)) => {
                self.drain_stale_events();
                self.fail_connection(&format!("{:#}", e));
                Err(e.context("could not connect to the live session"))
            }
            Err(_) => {
                self.live.disconnect().await;
                self.drain_stale_events();
                let message = format!("connection not ready within {:?}", timeout);
                self.fail_connection(&message);
                Err(anyhow::anyhow!(message))
            }
        }
    }

    /// Closes the connection. Recording stops and any half-received reply is dropped.
    pub async fn disconnect(&mut self) {
        self.stop_voice_recording();
        self.audio.stop_playback();
        self.abandon_tool_calls().await;
        if self.live.disconnect().await {
            tracing::info!("session {} disconnected", self.session.session_id);
        }
        self.drain_stale_events();
        self.transcript.discard();
        self.output_bytes = 0;
        self.session.voice_state = VoiceState::Idle;
        self.set_connection_status(ConnectionStatus::Disconnected);
    }

    /// Aborts tool calls still running, so their responses never reach a later connection.
    async fn abandon_tool_calls(&mut self) {
        while self.tool_tasks.try_join_next().is_some() {}
        if self.tool_tasks.is_empty() {
            return;
        }
        let abandoned = self.tool_tasks.len();
        self.tool_tasks.abort_all();
        while self.tool_tasks.join_next().await.is_some() {}
        tracing::warn!("abandoned {} tool calls with their connection", abandoned);
        self.log(
            InteractionLogEntry::error(
                &self.session.session_id,
                "tool calls abandoned with their connection",
                "ToolCallAbandoned",
            )
            .with_metadata(serde_json::json!({ "abandoned": abandoned })),
        );
    }

    fn fail_connection(&mut self, message: &str) {
        tracing::error!("connection failed: {}", message);
        self.log(InteractionLogEntry::error(
            &self.session.session_id,
            message,
            "ConnectionError",
        ));
        self.last_error = Some(message.to_string());
        self.set_connection_status(ConnectionStatus::Error);
    }

    /// Discards events from a connection this orchestrator already tore down.
    fn drain_stale_events(&mut self) {
        let mut drained = 0;
        loop {
            match self.events.try_recv() {
                Ok(_) => drained += 1,
                Err(TryRecvError::Lagged(n)) => drained += n as usize,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        if drained > 0 {
            tracing::debug!("drained {} stale session events", drained);
        }
    }

    fn set_connection_status(&mut self, status: ConnectionStatus) {
        self.session.connection_status = status;
        self.publish();
    }

    // --- Voice ---

    /// Returns the resulting permission; a refusal sticks until reset.
    pub fn request_microphone_permission(&mut self) -> PermissionState {
        let state = match self.audio.permission() {
            PermissionState::Unknown => self.audio.request_permission(),
            known => known,
        };
        if state == PermissionState::Denied {
            self.last_error = Some("microphone permission denied".to_string());
        }
        self.publish();
        state
    }

    pub fn reset_microphone_permission(&mut self) {
        self.audio.reset_permission();
        if self.last_error.as_deref() == Some("microphone permission denied") {
            self.last_error = None;
        }
        self.publish();
    }

    /// Connects first when needed. Capture is abandoned if the connection does not come up in time.
    ///
    /// Only available in voice mode.
    pub async fn start_voice_recording(&mut self) -> Result<()> {
        if self.audio.is_recording() {
            return Ok(());
        }
        if self.is_transitioning {
            anyhow::bail!("cannot record while switching modes");
        }
        if self.session.ui_mode != UiMode::Voice {
            anyhow::bail!("switch to voice mode to record");
        }
        if self.request_microphone_permission() == PermissionState::Denied {
            anyhow::bail!("microphone permission denied");
        }

        self.ensure_connected(UiMode::Voice, self.options.connect_timeout)
            .await
            .context("recording not started")?;

        if let Err(e) = self.audio.start_recording() {
            self.last_error = Some(format!("{:#}", e));
            self.publish();
            return Err(e.context("could not open the microphone"));
        }

        self.recording = Some(Recording::default());
        self.session.voice_state = VoiceState::Listening;
        tracing::info!("recording started");
        self.publish();
        Ok(())
    }

    pub fn stop_voice_recording(&mut self) {
        if self.audio.is_recording() {
            self.audio.stop_recording();
        }
        let Some(recording) = self.recording.take() else {
            return;
        };

        tracing::info!(
            "recording stopped after {} ms of audio ({} bytes)",
            recording.duration_ms,
            recording.bytes
        );
        if recording.bytes > 0 {
            self.log(InteractionLogEntry::audio_input(
                &self.session.session_id,
                recording.duration_ms,
                recording.bytes,
            ));
        }
        if self.session.voice_state == VoiceState::Listening {
            self.session.voice_state = VoiceState::Idle;
        }
        self.publish();
    }

    // --- Text ---

    /// Appends the user message right away, then connects if needed and sends it.
    ///
    /// Blank input is ignored.
    pub async fn send_text_message(&mut self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        self.transcript.push_user(text);
        self.log(InteractionLogEntry::user_message(&self.session.session_id, text));
        self.publish();

        self.ensure_connected(self.session.ui_mode, self.options.connect_timeout)
            .await
            .context("message not sent")?;

        if !self.live.send(vec![Part::text(text)], true).await {
            self.last_error = Some("message not sent, the session is down".to_string());
            self.publish();
            anyhow::bail!("message not sent, the session is down");
        }
        self.transcript.begin_streaming();
        self.publish();
        Ok(())
    }

    pub fn clear_conversation(&mut self) {
        self.transcript.clear();
        self.publish();
    }

    // --- Modes ---

    pub async fn switch_to_voice_mode(&mut self) -> Result<()> {
        self.switch_mode(UiMode::Voice).await
    }

    pub async fn switch_to_text_mode(&mut self) -> Result<()> {
        self.switch_mode(UiMode::Text).await
    }

    /// Stop recording, close the sidebar, disconnect, change mode, then maybe reconnect.
    ///
    /// Text mode reconnects at once. Voice mode follows the [`VoiceReconnect`] policy.
    async fn switch_mode(&mut self, mode: UiMode) -> Result<()> {
        if self.session.ui_mode == mode {
            return Ok(());
        }
        tracing::info!("switching to {:?} mode", mode);

        self.is_transitioning = true;
        self.publish();

        self.stop_voice_recording();
        self.is_sidebar_open = false;
        self.disconnect().await;
        self.session.ui_mode = mode;

        let reconnect = match mode {
            UiMode::Text => true,
            UiMode::Voice => self.options.voice_reconnect == VoiceReconnect::Eager,
        };
        let result = if reconnect {
            self.ensure_connected(mode, self.options.connect_timeout).await
        } else {
            Ok(())
        };

        self.is_transitioning = false;
        self.publish();
        result
    }

    pub fn toggle_sidebar(&mut self) {
        self.is_sidebar_open = !self.is_sidebar_open;
        self.publish();
    }

    pub fn close_sidebar(&mut self) {
        self.is_sidebar_open = false;
        self.publish();
    }

    // --- Staged configuration, applied on the next connect ---

    pub fn set_voice(&mut self, voice: Voice) {
        self.config.set_voice(voice);
    }

    pub fn set_instructions(&mut self, instructions: &str) -> Result<(), ConfigError> {
        self.config.set_instructions(instructions)
    }

    pub fn set_tools_enabled(&mut self, enabled: bool) {
        self.config.set_tools_enabled(enabled);
    }

    pub fn set_response_modality(&mut self, modality: ResponseModality) {
        self.config.set_response_modality(modality);
    }

    pub fn set_temperature(&mut self, temperature: f32) -> Result<(), ConfigError> {
        self.config.set_temperature(temperature)
    }

    // --- Event loop ---

    /// Waits for the next live event or audio signal. Cancel safe.
    pub async fn next_signal(&mut self) -> Signal {
        loop {
            tokio::select! {
                event = self.events.recv(), if !self.events_closed => match event {
                    Ok(event) => return Signal::Live(event),
                    Err(RecvError::Lagged(n)) => tracing::warn!("missed {} session events", n),
                    Err(RecvError::Closed) => self.events_closed = true,
                },
                signal = self.audio_rx.recv(), if !self.audio_closed => match signal {
                    Some(signal) => return Signal::Audio(signal),
                    None => self.audio_closed = true,
                },
                else => std::future::pending::<()>().await,
            }
        }
    }

    pub async fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Live(event) => self.handle_live_event(event).await,
            Signal::Audio(signal) => self.handle_audio_signal(signal).await,
        }
        while self.tool_tasks.try_join_next().is_some() {}
    }

    pub async fn handle_live_event(&mut self, event: LiveEvent) {
        match event {
            LiveEvent::Open => {
                self.set_connection_status(ConnectionStatus::Connected);
            }
            LiveEvent::SetupComplete => {
                tracing::debug!("setup complete");
            }
            LiveEvent::Content(content) => {
                if let Some(text) = content.text() {
                    self.transcript.append_delta(&text);
                    self.publish();
                }
            }
            LiveEvent::Audio(pcm16) => {
                if let Err(e) = self.audio.play(&pcm16) {
                    tracing::warn!("playback failed: {:#}", e);
                    self.last_error = Some(format!("{:#}", e));
                }
                self.output_bytes += pcm16.len();
                self.session.voice_state = VoiceState::Speaking;
                self.publish();
            }
            LiveEvent::TurnComplete => self.complete_turn(),
            LiveEvent::Interrupted => {
                if let Some(partial) = self.transcript.discard() {
                    tracing::debug!("discarded {} chars of an interrupted reply", partial.len());
                }
                self.audio.stop_playback();
                self.output_bytes = 0;
                self.session.voice_state = self.resting_voice_state();
                self.publish();
            }
            LiveEvent::ToolCall(call) => {
                let dispatcher = self.dispatcher.clone();
                self.tool_tasks.spawn(async move {
                    dispatcher.dispatch(call).await;
                });
            }
            LiveEvent::ToolCallCancellation(cancellation) => {
                self.dispatcher.cancel(&cancellation);
            }
            LiveEvent::Error(message) => {
                tracing::error!("session error: {}", message);
                self.log(InteractionLogEntry::error(
                    &self.session.session_id,
                    &message,
                    "SessionError",
                ));
                self.last_error = Some(message);
                if !self.live.is_connected() {
                    self.connection_lost();
                    self.session.connection_status = ConnectionStatus::Error;
                }
                self.publish();
            }
            LiveEvent::Close { reason } => {
                if self.live.is_connected() {
                    tracing::debug!("ignoring close of a superseded connection");
                    return;
                }
                tracing::info!("session closed: {}", reason.as_deref().unwrap_or("no reason given"));
                self.connection_lost();
                if self.session.connection_status != ConnectionStatus::Error {
                    self.session.connection_status = ConnectionStatus::Disconnected;
                }
                self.publish();
            }
        }
    }

    fn complete_turn(&mut self) {
        let audio = (self.output_bytes > 0).then(|| AudioContent {
            size_bytes: self.output_bytes,
            duration_ms: pcm_duration_ms(self.output_bytes, OUTPUT_SAMPLE_RATE),
        });
        self.output_bytes = 0;

        let message = self.transcript.finalize(audio, None).cloned();
        if let Some(message) = message {
            let sid = &self.session.session_id;
            if let Some(text) = message.text() {
                self.log(InteractionLogEntry::assistant_response(sid, text));
            }
            if let Some(audio) = message.content.audio {
                self.log(InteractionLogEntry::audio_output(
                    sid,
                    audio.duration_ms,
                    audio.size_bytes,
                ));
            }
        }

        if !self.audio.is_playing() {
            self.session.voice_state = self.resting_voice_state();
        }
        self.publish();
    }

    /// Recording is force-stopped and voice goes idle whenever the connection drops.
    fn connection_lost(&mut self) {
        self.stop_voice_recording();
        self.audio.stop_playback();
        self.transcript.discard();
        self.output_bytes = 0;
        self.session.voice_state = VoiceState::Idle;
    }

    pub async fn handle_audio_signal(&mut self, signal: AudioSignal) {
        match signal {
            AudioSignal::Chunk(chunk) => {
                let Some(recording) = self.recording.as_mut() else {
                    return;
                };
                let bytes = decoded_len(&chunk.data);
                let rate = pcm_rate(&chunk.mime_type).unwrap_or(INPUT_SAMPLE_RATE);
                recording.bytes += bytes;
                recording.duration_ms += pcm_duration_ms(bytes, rate);
                if !self.live.send_realtime_input(vec![chunk]).await {
                    tracing::debug!("audio chunk dropped, session is down");
                }
            }
            AudioSignal::Level(level) => {
                if level != self.audio_level {
                    self.audio_level = level;
                    self.publish();
                }
            }
            AudioSignal::PlaybackDrained => {
                if self.session.voice_state == VoiceState::Speaking {
                    self.session.voice_state = self.resting_voice_state();
                    self.publish();
                }
            }
            AudioSignal::Error(message) => {
                tracing::error!("audio error: {}", message);
                self.log(InteractionLogEntry::error(
                    &self.session.session_id,
                    &message,
                    "AudioError",
                ));
                self.last_error = Some(message);
                if self.recording.is_some() && !self.audio.is_recording() {
                    self.stop_voice_recording();
                }
                self.publish();
            }
        }
    }

    fn resting_voice_state(&self) -> VoiceState {
        if self.recording.is_some() {
            VoiceState::Listening
        } else {
            VoiceState::Idle
        }
    }

    /// Waits for in-flight tool calls to answer.
    pub async fn wait_for_tools(&mut self) {
        while let Some(joined) = self.tool_tasks.join_next().await {
            match joined {
                Err(e) if !e.is_cancelled() => tracing::error!("tool task failed: {}", e),
                _ => {}
            }
        }
    }

    /// Ends the session. The injected logger stays up; its owner shuts it down.
    pub async fn shutdown(&mut self) {
        tracing::info!("shutting down session {}", self.session.session_id);
        if tokio::time::timeout(TOOL_DRAIN_TIMEOUT, self.wait_for_tools())
            .await
            .is_err()
        {
            tracing::warn!("abandoning {} unfinished tool calls", self.tool_tasks.len());
            self.tool_tasks.abort_all();
        }
        self.disconnect().await;
        self.audio.dispose();
        self.log(InteractionLogEntry::session_end(&self.session.session_id));
        self.publish();
    }

    fn log(&self, entry: InteractionLogEntry) {
        self.logger
            .log(entry.with_user_id(self.options.user_id.clone()));
    }

    fn publish(&self) {
        let snapshot = SessionSnapshot {
            session: self.session.clone(),
            is_recording: self.audio.is_recording(),
            is_playing: self.audio.is_playing(),
            audio_level: self.audio_level,
            microphone_permission: self.audio.permission(),
            is_streaming: self.transcript.is_streaming(),
            current_response: self.transcript.current_response().to_string(),
            is_sidebar_open: self.is_sidebar_open,
            is_transitioning: self.is_transitioning,
            last_error: self.last_error.clone(),
            message_count: self.transcript.len(),
        };
        self.snapshot.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }
}

fn pcm_duration_ms(bytes: usize, sample_rate: u32) -> u64 {
    (bytes as u64 * 1000) / (2 * u64::from(sample_rate.max(1)))
}

/// Length of the bytes a base64 string decodes to.
fn decoded_len(data: &str) -> usize {
    let padding = data.bytes().rev().take_while(|b| *b == b'=').count();
    (data.len() / 4 * 3).saturating_sub(padding)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use gemini_live::types::tools::{FunctionCall, ToolCall, ToolCallCancellation};
    use gemini_live::types::session::Modality;
    use gemini_live::types::{Blob, Content};
    use serde_json::json;

    use super::*;
    use crate::audio_io::MockAudioIo;
    use crate::interaction_log::{InteractionType, LogSink, LoggerOptions, NullSink, SinkError};
    use crate::realtime_api::fake::{FakeLive, Sent};
    use crate::tools::{InMemoryReportStore, ToolHandler, builtin_registry};
    use gemini_live::types::tools::FunctionDeclaration;
    use crate::transcript::MessageRole;

    // --- Fakes ---

    #[derive(Debug, Default)]
    struct AudioState {
        permission: PermissionState,
        refuse: bool,
        recording: bool,
        playing: bool,
        played: Vec<u8>,
        disposed: bool,
    }

    #[derive(Clone, Default)]
    struct FakeAudio(Arc<Mutex<AudioState>>);

    impl FakeAudio {
        fn state(&self) -> std::sync::MutexGuard<'_, AudioState> {
            self.0.lock().unwrap()
        }
    }

    impl AudioIo for FakeAudio {
        fn request_permission(&mut self) -> PermissionState {
            let mut state = self.state();
            state.permission = if state.refuse {
                PermissionState::Denied
            } else {
                PermissionState::Granted
            };
            state.permission
        }

        fn reset_permission(&mut self) {
            self.state().permission = PermissionState::Unknown;
        }

        fn permission(&self) -> PermissionState {
            self.state().permission
        }

        fn start_recording(&mut self) -> Result<()> {
            self.state().recording = true;
            Ok(())
        }

        fn stop_recording(&mut self) {
            self.state().recording = false;
        }

        fn is_recording(&self) -> bool {
            self.state().recording
        }

        fn play(&mut self, pcm16: &[u8]) -> Result<()> {
            let mut state = self.state();
            state.playing = true;
            state.played.extend_from_slice(pcm16);
            Ok(())
        }

        fn stop_playback(&mut self) {
            self.state().playing = false;
        }

        fn is_playing(&self) -> bool {
            self.state().playing
        }

        fn dispose(&mut self) {
            let mut state = self.state();
            state.recording = false;
            state.playing = false;
            state.disposed = true;
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<InteractionLogEntry>>);

    #[async_trait]
    impl LogSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn insert(&self, batch: &[InteractionLogEntry]) -> Result<(), SinkError> {
            self.0.lock().unwrap().extend_from_slice(batch);
            Ok(())
        }
    }

    impl RecordingSink {
        fn types(&self) -> Vec<InteractionType> {
            self.0.lock().unwrap().iter().map(|e| e.interaction_type).collect()
        }
    }

    struct Harness {
        orch: SessionOrchestrator,
        live: Arc<FakeLive>,
        audio: FakeAudio,
        audio_tx: mpsc::Sender<AudioSignal>,
        sink: Arc<RecordingSink>,
        logger: InteractionLogger,
    }

    fn harness(options: OrchestratorOptions) -> Harness {
        let (ui, _ui_rx) = mpsc::channel(8);
        harness_with_tools(
            options,
            builtin_registry(Arc::new(InMemoryReportStore::default()), ui),
        )
    }

    fn harness_with_tools(options: OrchestratorOptions, tools: ToolRegistry) -> Harness {
        let live = Arc::new(FakeLive::new());
        let audio = FakeAudio::default();
        let (audio_tx, audio_rx) = mpsc::channel(16);
        let sink = Arc::new(RecordingSink::default());
        let logger = InteractionLogger::start(
            sink.clone(),
            Arc::new(NullSink),
            LoggerOptions {
                batch_size: 1000,
                flush_interval: Duration::from_secs(3600),
                ..Default::default()
            },
        );
        let orch = SessionOrchestrator::new(
            live.clone(),
            Box::new(audio.clone()),
            audio_rx,
            tools,
            logger.clone(),
            AssistantConfig::default(),
            options.with_connect_timeout(Duration::from_millis(500)),
        );
        Harness {
            orch,
            live,
            audio,
            audio_tx,
            sink,
            logger,
        }
    }

    /// Handles everything already queued.
    async fn pump(orch: &mut SessionOrchestrator) {
        while let Ok(signal) =
            tokio::time::timeout(Duration::from_millis(50), orch.next_signal()).await
        {
            orch.handle_signal(signal).await;
        }
    }

    /// Answers after a delay.
    struct SlowLookup;

    #[async_trait]
    impl ToolHandler for SlowLookup {
        fn declaration(&self) -> FunctionDeclaration {
            FunctionDeclaration::new("slowLookup", "Takes a while", json!({ "type": "object" }))
        }

        async fn call(&self, _args: serde_json::Value) -> Result<serde_json::Value> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(json!("done"))
        }
    }

    fn tool_responses(live: &FakeLive) -> Vec<gemini_live::types::tools::ToolResponse> {
        live.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::ToolResponse(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    fn text_content(text: &str) -> Content {
        Content {
            role: None,
            parts: vec![Part::text(text)],
        }
    }

    // --- Text ---

    #[tokio::test]
    async fn test_send_text_connects_then_sends() {
        // --- Arrange ---
        let mut h = harness(OrchestratorOptions::default().with_mode(UiMode::Text));

        // --- Act ---
        h.orch.send_text_message("Hello").await.unwrap();

        // --- Assert ---
        let messages = h.orch.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].text(), Some("Hello"));

        assert_eq!(h.live.connect_count(), 1);
        let config = h.live.last_connect().unwrap();
        assert_eq!(config.response_modalities(), &[Modality::Text]);
        assert_eq!(h.live.sent(), vec![Sent::Content(vec![Part::text("Hello")], true)]);

        let snapshot = h.orch.snapshot();
        assert!(snapshot.is_connected());
        assert!(snapshot.is_streaming);

        // --- Act ---
        h.live.emit(LiveEvent::Content(text_content("Hi ")));
        h.live.emit(LiveEvent::Content(text_content("there")));
        h.live.emit(LiveEvent::TurnComplete);
        pump(&mut h.orch).await;

        // --- Assert ---
        let messages = h.orch.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].text(), Some("Hi there"));
        assert!(!h.orch.snapshot().is_streaming);

        h.logger.flush().await;
        assert_eq!(
            h.sink.types(),
            vec![
                InteractionType::SessionStart,
                InteractionType::UserMessage,
                InteractionType::AssistantResponse,
            ]
        );
    }

    #[tokio::test]
    async fn test_send_text_when_connect_fails_keeps_message() {
        let mut h = harness(OrchestratorOptions::default().with_mode(UiMode::Text));
        h.live.fail_connect.store(true, std::sync::atomic::Ordering::SeqCst);

        let result = h.orch.send_text_message("Hello").await;

        assert!(result.is_err());
        assert_eq!(h.orch.messages().len(), 1);
        assert!(h.live.sent().is_empty());
        let snapshot = h.orch.snapshot();
        assert_eq!(snapshot.session.connection_status, ConnectionStatus::Error);
        assert!(snapshot.last_error.is_some());
    }

    #[tokio::test]
    async fn test_failed_connect_logs_one_error() {
        let mut h = harness(OrchestratorOptions::default().with_mode(UiMode::Text));
        h.live.fail_connect.store(true, std::sync::atomic::Ordering::SeqCst);

        assert!(h.orch.send_text_message("Hello").await.is_err());
        pump(&mut h.orch).await;

        h.logger.flush().await;
        let errors = h
            .sink
            .types()
            .into_iter()
            .filter(|t| *t == InteractionType::Error)
            .count();
        assert_eq!(errors, 1);
        assert_eq!(
            h.orch.snapshot().session.connection_status,
            ConnectionStatus::Error
        );
    }

    #[tokio::test]
    async fn test_streaming_lasts_until_turn_complete() {
        let mut h = harness(OrchestratorOptions::default().with_mode(UiMode::Text));
        h.orch.send_text_message("Hello").await.unwrap();

        h.live.emit(LiveEvent::Content(text_content("Hi")));
        pump(&mut h.orch).await;

        let snapshot = h.orch.snapshot();
        assert!(snapshot.is_streaming);
        assert_eq!(snapshot.current_response, "Hi");
        assert_eq!(h.orch.messages().len(), 1);

        h.live.emit(LiveEvent::TurnComplete);
        pump(&mut h.orch).await;

        let snapshot = h.orch.snapshot();
        assert!(!snapshot.is_streaming);
        assert!(snapshot.current_response.is_empty());
        assert_eq!(h.orch.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_blank_text_is_ignored() {
        let mut h = harness(OrchestratorOptions::default().with_mode(UiMode::Text));

        h.orch.send_text_message("   ").await.unwrap();

        assert!(h.orch.messages().is_empty());
        assert_eq!(h.live.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_interrupted_reply_is_never_persisted() {
        // --- Arrange ---
        let mut h = harness(OrchestratorOptions::default().with_mode(UiMode::Text));
        h.orch.send_text_message("Tell me a story").await.unwrap();

        // --- Act ---
        h.live.emit(LiveEvent::Content(text_content("Once upon")));
        h.live.emit(LiveEvent::Interrupted);
        h.live.emit(LiveEvent::TurnComplete);
        pump(&mut h.orch).await;

        // --- Assert ---
        let messages = h.orch.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages.iter().all(|m| m.text() != Some("Once upon")));
        let snapshot = h.orch.snapshot();
        assert!(!snapshot.is_streaming);
        assert!(snapshot.current_response.is_empty());
    }

    #[tokio::test]
    async fn test_clear_conversation() {
        let mut h = harness(OrchestratorOptions::default().with_mode(UiMode::Text));
        h.orch.send_text_message("one").await.unwrap();
        h.orch.send_text_message("two").await.unwrap();

        h.orch.clear_conversation();

        assert!(h.orch.messages().is_empty());
        assert_eq!(h.orch.snapshot().message_count, 0);
    }

    // --- Voice ---

    #[tokio::test]
    async fn test_start_recording_while_disconnected_connects_first() {
        // --- Arrange ---
        let mut h = harness(OrchestratorOptions::default());
        let mut snapshots = h.orch.subscribe_snapshot();
        assert_eq!(snapshots.borrow_and_update().session.connection_status, ConnectionStatus::Disconnected);

        // --- Act ---
        h.orch.start_voice_recording().await.unwrap();

        // --- Assert ---
        assert_eq!(h.live.connect_count(), 1);
        let config = h.live.last_connect().unwrap();
        assert_eq!(config.response_modalities(), &[Modality::Audio]);
        assert!(config.speech_config().is_some());

        let snapshot = snapshots.borrow_and_update().clone();
        assert!(snapshot.is_connected());
        assert!(snapshot.is_recording);
        assert_eq!(snapshot.session.voice_state, VoiceState::Listening);
        assert_eq!(snapshot.microphone_permission, PermissionState::Granted);
    }

    #[tokio::test]
    async fn test_recording_aborted_when_connect_fails() {
        let mut h = harness(OrchestratorOptions::default());
        h.live.fail_connect.store(true, std::sync::atomic::Ordering::SeqCst);

        assert!(h.orch.start_voice_recording().await.is_err());

        assert!(!h.audio.state().recording);
        let snapshot = h.orch.snapshot();
        assert!(!snapshot.is_recording);
        assert_eq!(snapshot.session.voice_state, VoiceState::Idle);
        assert_eq!(snapshot.session.connection_status, ConnectionStatus::Error);
    }

    #[tokio::test]
    async fn test_denied_microphone_never_connects() {
        // --- Arrange ---
        let live = Arc::new(FakeLive::new());
        let mut audio = MockAudioIo::new();
        audio.expect_permission().return_const(PermissionState::Unknown);
        audio.expect_request_permission().times(1).return_const(PermissionState::Denied);
        audio.expect_is_recording().return_const(false);
        audio.expect_is_playing().return_const(false);
        audio.expect_start_recording().times(0);
        let (_tx, rx) = mpsc::channel(1);
        let mut orch = SessionOrchestrator::new(
            live.clone(),
            Box::new(audio),
            rx,
            ToolRegistry::new(),
            InteractionLogger::disabled(),
            AssistantConfig::default(),
            OrchestratorOptions::default(),
        );

        // --- Act ---
        let err = orch.start_voice_recording().await.unwrap_err();

        // --- Assert ---
        assert_eq!(err.to_string(), "microphone permission denied");
        assert_eq!(live.connect_count(), 0);
        assert_eq!(
            orch.snapshot().last_error.as_deref(),
            Some("microphone permission denied")
        );
    }

    #[tokio::test]
    async fn test_recording_refused_in_text_mode() {
        let mut h = harness(OrchestratorOptions::default().with_mode(UiMode::Text));
        h.orch.connect().await.unwrap();

        let err = h.orch.start_voice_recording().await.unwrap_err();

        assert_eq!(err.to_string(), "switch to voice mode to record");
        assert!(!h.audio.state().recording);
        assert!(!h.orch.snapshot().is_recording);
        assert!(h.live.sent().is_empty());
    }

    #[tokio::test]
    async fn test_chunks_stream_while_recording_and_are_logged_once() {
        // --- Arrange ---
        let mut h = harness(OrchestratorOptions::default());
        h.orch.start_voice_recording().await.unwrap();
        // 32000 bytes of 16 kHz PCM16 is one second
        let chunk = Blob::new("audio/pcm;rate=16000", "A".repeat(32_000 / 3 * 4 + 4));

        // --- Act ---
        h.audio_tx.send(AudioSignal::Level(42)).await.unwrap();
        h.audio_tx.send(AudioSignal::Chunk(chunk.clone())).await.unwrap();
        pump(&mut h.orch).await;
        h.orch.stop_voice_recording();
        h.audio_tx.send(AudioSignal::Chunk(chunk.clone())).await.unwrap();
        pump(&mut h.orch).await;

        // --- Assert ---
        assert_eq!(h.live.sent(), vec![Sent::Realtime(vec![chunk])]);
        assert_eq!(h.orch.snapshot().audio_level, 42);
        assert_eq!(h.orch.snapshot().session.voice_state, VoiceState::Idle);

        h.logger.flush().await;
        let entries = h.sink.0.lock().unwrap().clone();
        let audio_inputs: Vec<_> = entries
            .iter()
            .filter(|e| e.interaction_type == InteractionType::AudioInput)
            .collect();
        assert_eq!(audio_inputs.len(), 1);
        assert_eq!(audio_inputs[0].content["audio_size_bytes"], 32_001);
        assert_eq!(audio_inputs[0].content["audio_duration_ms"], 1000);
    }

    #[tokio::test]
    async fn test_assistant_audio_speaks_until_drained() {
        // --- Arrange ---
        let mut h = harness(OrchestratorOptions::default());
        h.orch.connect().await.unwrap();

        // --- Act ---
        h.live.emit(LiveEvent::Audio(vec![0; 4800]));
        h.live.emit(LiveEvent::TurnComplete);
        pump(&mut h.orch).await;

        // --- Assert ---
        assert_eq!(h.audio.state().played.len(), 4800);
        assert_eq!(h.orch.snapshot().session.voice_state, VoiceState::Speaking);
        let reply = h.orch.messages().last().cloned().unwrap();
        assert_eq!(reply.role, MessageRole::Assistant);
        assert_eq!(
            reply.content.audio,
            Some(AudioContent {
                size_bytes: 4800,
                duration_ms: 100
            })
        );

        // --- Act ---
        h.audio.state().playing = false;
        h.audio_tx.send(AudioSignal::PlaybackDrained).await.unwrap();
        pump(&mut h.orch).await;

        // --- Assert ---
        assert_eq!(h.orch.snapshot().session.voice_state, VoiceState::Idle);
    }

    #[tokio::test]
    async fn test_interrupt_stops_playback() {
        let mut h = harness(OrchestratorOptions::default());
        h.orch.start_voice_recording().await.unwrap();

        h.live.emit(LiveEvent::Audio(vec![1; 480]));
        pump(&mut h.orch).await;
        assert_eq!(h.orch.snapshot().session.voice_state, VoiceState::Speaking);

        h.live.emit(LiveEvent::Interrupted);
        pump(&mut h.orch).await;

        assert!(!h.audio.state().playing);
        assert_eq!(h.orch.snapshot().session.voice_state, VoiceState::Listening);
    }

    // --- Modes ---

    #[tokio::test]
    async fn test_voice_to_text_switch_stops_recording_and_reconnects() {
        // --- Arrange ---
        let mut h = harness(OrchestratorOptions::default());
        h.orch.start_voice_recording().await.unwrap();
        h.orch.toggle_sidebar();
        assert!(h.orch.snapshot().is_sidebar_open);

        // --- Act ---
        h.orch.switch_to_text_mode().await.unwrap();

        // --- Assert ---
        let snapshot = h.orch.snapshot();
        assert!(!snapshot.is_recording);
        assert!(!h.audio.state().recording);
        assert!(!snapshot.is_sidebar_open);
        assert!(!snapshot.is_transitioning);
        assert_eq!(snapshot.session.ui_mode, UiMode::Text);
        assert_eq!(snapshot.session.voice_state, VoiceState::Idle);
        assert!(snapshot.is_connected());

        assert_eq!(h.live.connect_count(), 2);
        let config = h.live.last_connect().unwrap();
        assert_eq!(config.response_modalities(), &[Modality::Text]);
    }

    #[tokio::test]
    async fn test_text_to_voice_switch_defers_connect_when_lazy() {
        let mut h = harness(OrchestratorOptions::default().with_mode(UiMode::Text));
        h.orch.connect().await.unwrap();

        h.orch.switch_to_voice_mode().await.unwrap();

        let snapshot = h.orch.snapshot();
        assert_eq!(snapshot.session.ui_mode, UiMode::Voice);
        assert_eq!(snapshot.session.connection_status, ConnectionStatus::Disconnected);
        assert_eq!(h.live.connect_count(), 1);

        h.orch.start_voice_recording().await.unwrap();
        assert_eq!(h.live.connect_count(), 2);
        assert_eq!(
            h.live.last_connect().unwrap().response_modalities(),
            &[Modality::Audio]
        );
    }

    #[tokio::test]
    async fn test_text_to_voice_switch_reconnects_when_eager() {
        let mut h = harness(
            OrchestratorOptions::default()
                .with_mode(UiMode::Text)
                .with_voice_reconnect(VoiceReconnect::Eager),
        );
        h.orch.connect().await.unwrap();

        h.orch.switch_to_voice_mode().await.unwrap();

        assert!(h.orch.snapshot().is_connected());
        assert_eq!(h.live.connect_count(), 2);
        assert!(!h.orch.snapshot().is_recording);
    }

    #[tokio::test]
    async fn test_staged_config_applies_on_next_connect() {
        // --- Arrange ---
        let mut h = harness(OrchestratorOptions::default().with_mode(UiMode::Text));
        h.orch.connect().await.unwrap();

        // --- Act ---
        h.orch.set_voice(Voice::Puck);
        h.orch.set_instructions("Be brief.").unwrap();
        h.orch.set_tools_enabled(false);
        h.orch.connect().await.unwrap();

        // --- Assert ---
        assert_eq!(h.live.connect_count(), 1);

        h.orch.switch_to_voice_mode().await.unwrap();
        h.orch.start_voice_recording().await.unwrap();
        let config = h.live.last_connect().unwrap();
        assert_eq!(config.speech_config().map(|s| s.voice()), Some(&Voice::Puck));
        assert!(config.tools().is_empty());
        assert!(h.orch.set_instructions(&"x".repeat(4001)).is_err());
        assert!(h.orch.set_temperature(3.0).is_err());
    }

    // --- Connection loss ---

    #[tokio::test]
    async fn test_connection_drop_forces_idle() {
        let mut h = harness(OrchestratorOptions::default());
        h.orch.start_voice_recording().await.unwrap();

        h.live.drop_connection("socket reset");
        pump(&mut h.orch).await;

        let snapshot = h.orch.snapshot();
        assert!(!snapshot.is_recording);
        assert!(!snapshot.is_playing);
        assert_eq!(snapshot.session.voice_state, VoiceState::Idle);
        assert_eq!(snapshot.session.connection_status, ConnectionStatus::Error);
        assert_eq!(snapshot.last_error.as_deref(), Some("socket reset"));
    }

    #[tokio::test]
    async fn test_close_is_ignored_while_connected() {
        let mut h = harness(OrchestratorOptions::default());
        h.orch.start_voice_recording().await.unwrap();

        h.live.emit(LiveEvent::Close {
            reason: Some("reconnecting".to_string()),
        });
        pump(&mut h.orch).await;

        let snapshot = h.orch.snapshot();
        assert!(snapshot.is_recording);
        assert!(snapshot.is_connected());
    }

    // --- Tools ---

    #[tokio::test]
    async fn test_unknown_tool_gets_failure_response() {
        // --- Arrange ---
        let mut h = harness(OrchestratorOptions::default().with_mode(UiMode::Text));
        h.orch.connect().await.unwrap();

        // --- Act ---
        h.live.emit(LiveEvent::ToolCall(ToolCall {
            function_calls: vec![FunctionCall {
                id: "call-7".to_string(),
                name: "unknownTool".to_string(),
                args: json!({}),
            }],
        }));
        h.live.emit(LiveEvent::ToolCallCancellation(ToolCallCancellation {
            ids: vec!["call-3".to_string()],
        }));
        pump(&mut h.orch).await;
        h.orch.wait_for_tools().await;

        // --- Assert ---
        let responses = tool_responses(&h.live);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].function_responses.len(), 1);
        assert_eq!(responses[0].function_responses[0].id, "call-7");
        assert_eq!(responses[0].function_responses[0].response["success"], false);

        h.logger.flush().await;
        let types = h.sink.types();
        assert!(types.contains(&InteractionType::ToolCall));
        assert!(types.contains(&InteractionType::ToolResponse));
        assert!(types.contains(&InteractionType::Error));
    }

    #[tokio::test]
    async fn test_tool_response_never_reaches_a_later_connection() {
        // --- Arrange ---
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(SlowLookup));
        let mut h = harness_with_tools(OrchestratorOptions::default(), tools);
        h.orch.start_voice_recording().await.unwrap();
        h.live.emit(LiveEvent::ToolCall(ToolCall {
            function_calls: vec![FunctionCall {
                id: "old-call".to_string(),
                name: "slowLookup".to_string(),
                args: json!({}),
            }],
        }));
        pump(&mut h.orch).await;

        // --- Act ---
        h.orch.switch_to_text_mode().await.unwrap();
        h.orch.wait_for_tools().await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        // --- Assert ---
        assert_eq!(h.live.connect_count(), 2);
        assert!(h.live.is_connected());
        assert!(tool_responses(&h.live).is_empty());

        h.logger.flush().await;
        let entries = h.sink.0.lock().unwrap().clone();
        assert!(entries.iter().any(|e| {
            e.interaction_type == InteractionType::Error
                && e.content["error_type"] == "ToolCallAbandoned"
        }));
    }

    #[tokio::test]
    async fn test_tool_call_answers_on_its_own_connection() {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(SlowLookup));
        let mut h = harness_with_tools(
            OrchestratorOptions::default().with_mode(UiMode::Text),
            tools,
        );
        h.orch.connect().await.unwrap();

        h.live.emit(LiveEvent::ToolCall(ToolCall {
            function_calls: vec![FunctionCall {
                id: "call-1".to_string(),
                name: "slowLookup".to_string(),
                args: json!({}),
            }],
        }));
        pump(&mut h.orch).await;
        h.orch.wait_for_tools().await;

        let responses = tool_responses(&h.live);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].function_responses[0].id, "call-1");
        assert_eq!(responses[0].function_responses[0].response["success"], true);
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_and_disposes() {
        let mut h = harness(OrchestratorOptions::default());
        h.orch.start_voice_recording().await.unwrap();

        h.orch.shutdown().await;

        assert!(!h.live.is_connected());
        assert!(h.audio.state().disposed);
        h.logger.flush().await;
        assert_eq!(h.sink.types().last(), Some(&InteractionType::SessionEnd));
    }

    #[test]
    fn test_decoded_len() {
        assert_eq!(decoded_len(""), 0);
        assert_eq!(decoded_len("AAAA"), 3);
        assert_eq!(decoded_len("AAA="), 2);
        assert_eq!(decoded_len("AA=="), 1);
        assert_eq!(pcm_duration_ms(48_000, 24_000), 1000);
    }
}
