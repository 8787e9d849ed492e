use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::event::{translate, LiveEvent};
use crate::types::events::{ClientContent, RealtimeInput};
use crate::types::session::Setup;
use crate::types::tools::ToolResponse;
use crate::types::{Blob, ClientMessage, LiveConnectConfig, Part, ServerMessage};

pub(crate) mod consts;
mod config;
mod error;
mod stats;
mod utils;

pub use config::{Config, ConfigBuilder};
pub use error::Error;
pub use stats::Stats;

pub type ClientTx = mpsc::Sender<ClientMessage>;
pub type EventRx = broadcast::Receiver<LiveEvent>;
type EventTx = broadcast::Sender<LiveEvent>;
type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

struct Connection {
    generation: u64,
    c_tx: ClientTx,
    send_handle: tokio::task::JoinHandle<()>,
    recv_handle: tokio::task::JoinHandle<()>,
}

impl Connection {
    /// Lets the send task write its close frame, then stops the reader.
    async fn shutdown(self) {
        let Connection {
            generation,
            c_tx,
            send_handle,
            recv_handle,
        } = self;
        drop(c_tx);

        let abort = send_handle.abort_handle();
        if tokio::time::timeout(consts::CLOSE_TIMEOUT, send_handle).await.is_err() {
            tracing::warn!("connection #{} did not close in time, aborting", generation);
            abort.abort();
        }
        recv_handle.abort();
        let _ = recv_handle.await;
        tracing::debug!("connection #{} torn down", generation);
    }
}

#[derive(Default)]
struct State {
    /// Bumped by every connect and disconnect; a handshake only wins if it is still current.
    generation: u64,
    connection: Option<Connection>,
}

struct Inner {
    config: Config,
    state: Mutex<State>,
    status: watch::Sender<ConnectionStatus>,
    events: EventTx,
    stats: Mutex<Stats>,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: LiveEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("no subscribers for live event");
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }

    /// Called by the reader when the transport ends on its own.
    fn connection_lost(&self, generation: u64, error: Option<String>, reason: Option<String>) {
        let mut state = self.lock_state();
        let current = state
            .connection
            .as_ref()
            .is_some_and(|c| c.generation == generation);
        if !current {
            return;
        }
        if let Some(connection) = state.connection.take() {
            connection.send_handle.abort();
        }
        self.set_status(ConnectionStatus::Disconnected);
        if let Some(error) = error {
            self.emit(LiveEvent::Error(error));
        }
        self.emit(LiveEvent::Close { reason });
    }

    fn handle_text(&self, text: &str) {
        let message = match serde_json::from_str::<ServerMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!("failed to deserialize message: {}, text=> {:?}", e, text);
                return;
            }
        };

        if message == ServerMessage::default() {
            tracing::warn!("unmatched message: {}", text);
            return;
        }

        if let Some(usage) = &message.usage_metadata {
            self.stats
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .update_usage(usage);
            tracing::debug!(
                "prompt_tokens: {}, response_tokens: {}, total_tokens: {}",
                usage.prompt_token_count,
                usage.response_token_count,
                usage.total_token_count
            );
        }

        if let Some(go_away) = &message.go_away {
            tracing::warn!(
                "server is going away, time left: {}",
                go_away.time_left.as_deref().unwrap_or("unknown")
            );
        }

        for event in translate(message) {
            self.emit(event);
        }
    }
}

/// Handle to the single duplex connection with the Live endpoint.
///
/// Cloning is cheap and every clone drives the same connection. Events are delivered on a
/// broadcast channel that outlives individual connections, so a subscriber taken once sees
/// every `Open`/`Close` pair.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(Config::new())
    }
}

impl Client {
    pub fn new(config: Config) -> Self {
        let (events, _) = broadcast::channel(config.capacity());
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State::default()),
                status,
                events,
                stats: Mutex::new(Stats::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> EventRx {
        self.inner.events.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn stats(&self) -> Stats {
        self.inner
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Opens a connection negotiated with `config`.
    ///
    /// Fails fast with [`Error::AlreadyConnecting`] while another attempt is in flight. An open
    /// connection is closed (and `Close` emitted) before the new handshake starts.
    pub async fn connect(&self, model: &str, config: &LiveConnectConfig) -> Result<(), Error> {
        let (generation, previous) = {
            let mut state = self.inner.lock_state();
            if self.status() == ConnectionStatus::Connecting {
                return Err(Error::AlreadyConnecting);
            }
            self.inner.set_status(ConnectionStatus::Connecting);
            state.generation += 1;
            (state.generation, state.connection.take())
        };

        if let Some(previous) = previous {
            tracing::info!("closing connection #{} before reconnecting", previous.generation);
            previous.shutdown().await;
            self.inner.emit(LiveEvent::Close {
                reason: Some("reconnecting".to_string()),
            });
        }

        match self.open(generation, model, config).await {
            Ok(opened) => self.install(generation, opened).await,
            Err(e) => {
                let state = self.inner.lock_state();
                if state.generation == generation {
                    tracing::error!("failed to connect: {}", e);
                    self.inner.set_status(ConnectionStatus::Disconnected);
                    self.inner.emit(LiveEvent::Error(e.to_string()));
                }
                Err(e)
            }
        }
    }

    async fn open(
        &self,
        generation: u64,
        model: &str,
        config: &LiveConnectConfig,
    ) -> Result<Opened, Error> {
        let request = utils::build_request(&self.inner.config).map_err(Error::Request)?;
        let setup = serde_json::to_string(&ClientMessage::Setup(Setup::new(model, config)))?;

        let (ws_stream, _) = tokio_tungstenite::connect_async(request).await?;
        let (mut write, read) = ws_stream.split();

        // setup must be the first frame on the wire
        write.send(Message::Text(setup)).await?;

        let (c_tx, mut c_rx) = mpsc::channel::<ClientMessage>(self.inner.config.capacity());
        let send_handle = tokio::spawn(async move {
            while let Some(message) = c_rx.recv().await {
                match serde_json::to_string(&message) {
                    Ok(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            tracing::error!("failed to send message: {}", e);
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!("failed to serialize message: {}", e);
                    }
                }
            }
            if let Err(e) = write.close().await {
                tracing::debug!("close frame not delivered: {}", e);
            }
            tracing::debug!("send task for connection #{} finished", generation);
        });

        Ok(Opened {
            c_tx,
            send_handle,
            read,
        })
    }

    async fn install(&self, generation: u64, opened: Opened) -> Result<(), Error> {
        let Opened {
            c_tx,
            send_handle,
            read,
        } = opened;

        let stale = {
            let mut state = self.inner.lock_state();
            if state.generation == generation {
                // the reader starts after Open so no event can overtake it
                self.inner.set_status(ConnectionStatus::Connected);
                self.inner.emit(LiveEvent::Open);
                let recv_handle =
                    tokio::spawn(recv_loop(Arc::downgrade(&self.inner), generation, read));
                state.connection = Some(Connection {
                    generation,
                    c_tx,
                    send_handle,
                    recv_handle,
                });
                None
            } else {
                Some((c_tx, send_handle))
            }
        };

        match stale {
            None => {
                tracing::info!("connection #{} open", generation);
                Ok(())
            }
            Some((c_tx, send_handle)) => {
                tracing::info!("connection #{} superseded during handshake, closing", generation);
                drop(c_tx);
                let abort = send_handle.abort_handle();
                if tokio::time::timeout(consts::CLOSE_TIMEOUT, send_handle).await.is_err() {
                    abort.abort();
                }
                Err(Error::Cancelled)
            }
        }
    }

    /// Closes the current connection. Returns `false` when there was nothing to close.
    ///
    /// A handshake still in flight is cancelled and its connection discarded once it lands.
    pub async fn disconnect(&self) -> bool {
        let connection = {
            let mut state = self.inner.lock_state();
            state.generation += 1;
            let connection = state.connection.take();
            self.inner.set_status(ConnectionStatus::Disconnected);
            connection
        };

        let Some(connection) = connection else {
            return false;
        };
        tracing::info!("disconnecting connection #{}", connection.generation);
        connection.shutdown().await;
        self.inner.emit(LiveEvent::Close { reason: None });
        true
    }

    fn sender(&self) -> Option<ClientTx> {
        let state = self.inner.lock_state();
        if self.status() != ConnectionStatus::Connected {
            return None;
        }
        state.connection.as_ref().map(|c| c.c_tx.clone())
    }

    async fn send_client_message(&self, message: ClientMessage) -> bool {
        let Some(tx) = self.sender() else {
            tracing::warn!("not connected, dropping {}", kind(&message));
            return false;
        };
        match tx.send(message).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("connection closed, dropping {}", kind(&e.0));
                false
            }
        }
    }

    /// Sends a user turn. A no-op returning `false` while not connected.
    pub async fn send(&self, parts: Vec<Part>, turn_complete: bool) -> bool {
        let content = ClientContent::user(parts, turn_complete);
        self.send_client_message(ClientMessage::ClientContent(content))
            .await
    }

    /// Streams media without advancing the turn; one frame per chunk.
    pub async fn send_realtime_input(&self, chunks: Vec<Blob>) -> bool {
        for chunk in chunks {
            let input = RealtimeInput {
                media_chunks: vec![chunk],
            };
            if !self
                .send_client_message(ClientMessage::RealtimeInput(input))
                .await
            {
                return false;
            }
        }
        true
    }

    pub async fn send_tool_response(&self, response: ToolResponse) -> bool {
        self.send_client_message(ClientMessage::ToolResponse(response))
            .await
    }
}

struct Opened {
    c_tx: ClientTx,
    send_handle: tokio::task::JoinHandle<()>,
    read: WsReader,
}

fn kind(message: &ClientMessage) -> &'static str {
    match message {
        ClientMessage::Setup(_) => "setup",
        ClientMessage::ClientContent(_) => "client content",
        ClientMessage::RealtimeInput(_) => "realtime input",
        ClientMessage::ToolResponse(_) => "tool response",
    }
}

async fn recv_loop(inner: Weak<Inner>, generation: u64, mut read: WsReader) {
    let mut error = None;
    let mut reason = None;

    while let Some(message) = read.next().await {
        let message = match message {
            Err(e) => {
                tracing::error!("failed to read message: {}", e);
                error = Some(e.to_string());
                break;
            }
            Ok(message) => message,
        };
        let text = match message {
            Message::Text(text) => text,
            Message::Binary(bin) => match String::from_utf8(bin) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("binary message is not utf-8: {}", e);
                    continue;
                }
            },
            Message::Close(frame) => {
                tracing::info!("connection closed: {:?}", frame);
                reason = frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
                break;
            }
            _ => continue,
        };

        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.handle_text(&text);
    }

    if let Some(inner) = inner.upgrade() {
        inner.connection_lost(generation, error, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    /// Accepts connections forever; forwards every received text frame and replays `script`
    /// after the setup frame of each connection.
    async fn spawn_server(script: Vec<&'static str>) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let tx = tx.clone();
                let script = script.clone();
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                    let mut replayed = false;
                    while let Some(Ok(message)) = ws.next().await {
                        if let Message::Text(text) = message {
                            let _ = tx.send(text);
                            if !replayed {
                                replayed = true;
                                for frame in &script {
                                    ws.send(Message::Text(frame.to_string())).await.unwrap();
                                }
                            }
                        }
                    }
                });
            }
        });

        (format!("ws://{}", addr), rx)
    }

    fn client_for(url: &str) -> Client {
        Client::new(Config::builder().with_base_url(url).with_api_key("test").build())
    }

    async fn next_event(rx: &mut EventRx) -> LiveEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .unwrap()
    }

    fn text_config() -> LiveConnectConfig {
        LiveConnectConfig::builder().with_instructions("test").build()
    }

    #[tokio::test]
    async fn test_connect_sends_setup_first_and_disconnect_is_idempotent() {
        // --- Arrange ---
        let (url, mut frames) = spawn_server(vec![r#"{"setupComplete":{}}"#]).await;
        let client = client_for(&url);
        let mut events = client.subscribe();

        // --- Act ---
        client.connect("models/test", &text_config()).await.unwrap();

        // --- Assert ---
        assert_eq!(client.status(), ConnectionStatus::Connected);
        assert_eq!(next_event(&mut events).await, LiveEvent::Open);
        assert_eq!(next_event(&mut events).await, LiveEvent::SetupComplete);

        let setup: serde_json::Value = serde_json::from_str(&frames.recv().await.unwrap()).unwrap();
        assert_eq!(setup["setup"]["model"], "models/test");

        assert!(client.send(vec![Part::text("Hello")], true).await);
        let content: serde_json::Value =
            serde_json::from_str(&frames.recv().await.unwrap()).unwrap();
        assert_eq!(content["clientContent"]["turns"][0]["parts"][0]["text"], "Hello");

        assert!(client.disconnect().await);
        assert_eq!(next_event(&mut events).await, LiveEvent::Close { reason: None });
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
        assert!(!client.disconnect().await);
    }

    #[tokio::test]
    async fn test_send_while_disconnected_is_a_noop() {
        let client = client_for("ws://127.0.0.1:1");

        assert!(!client.send(vec![Part::text("lost")], true).await);
        assert!(!client.send_realtime_input(vec![Blob::new("audio/pcm;rate=16000", "AA==")]).await);
        assert!(!client.send_tool_response(ToolResponse::default()).await);
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_reconnect_closes_previous_connection_first() {
        // --- Arrange ---
        let (url, _frames) = spawn_server(vec![]).await;
        let client = client_for(&url);
        let mut events = client.subscribe();

        // --- Act ---
        client.connect("m", &text_config()).await.unwrap();
        client.connect("m", &text_config()).await.unwrap();
        client.disconnect().await;

        // --- Assert ---
        let mut opens = 0i32;
        let mut sequence = Vec::new();
        for _ in 0..4 {
            let event = next_event(&mut events).await;
            match event {
                LiveEvent::Open => opens += 1,
                LiveEvent::Close { .. } => opens -= 1,
                _ => continue,
            }
            assert!((0..=1).contains(&opens), "two connections open at once");
            sequence.push(event);
        }
        assert!(matches!(
            &sequence[..],
            [LiveEvent::Open, LiveEvent::Close { .. }, LiveEvent::Open, LiveEvent::Close { .. }]
        ));
    }

    #[tokio::test]
    async fn test_inbound_events_and_usage() {
        let (url, _frames) = spawn_server(vec![
            r#"{"serverContent":{"modelTurn":{"parts":[{"text":"Hi"}]}}}"#,
            r#"{"serverContent":{"turnComplete":true}}"#,
            r#"{"usageMetadata":{"promptTokenCount":4,"responseTokenCount":6,"totalTokenCount":10}}"#,
            r#"{"toolCallCancellation":{"ids":["c1"]}}"#,
        ])
        .await;
        let client = client_for(&url);
        let mut events = client.subscribe();

        client.connect("m", &text_config()).await.unwrap();

        assert_eq!(next_event(&mut events).await, LiveEvent::Open);
        assert!(matches!(next_event(&mut events).await, LiveEvent::Content(c) if c.text().as_deref() == Some("Hi")));
        assert_eq!(next_event(&mut events).await, LiveEvent::TurnComplete);
        assert!(matches!(
            next_event(&mut events).await,
            LiveEvent::ToolCallCancellation(c) if c.ids == vec!["c1".to_string()]
        ));
        assert_eq!(client.stats().total_tokens(), 10);
        assert_eq!(client.stats().prompt_tokens(), 4);
    }

    #[tokio::test]
    async fn test_failed_handshake_reports_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let client = client_for(&format!("ws://{}", addr));
        let mut events = client.subscribe();

        let result = client.connect("m", &text_config()).await;

        assert!(matches!(result, Err(Error::Transport(_))));
        assert!(matches!(next_event(&mut events).await, LiveEvent::Error(_)));
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_concurrent_connect_fails_fast_and_disconnect_cancels_handshake() {
        // --- Arrange ---
        // a server that holds the handshake until told to answer
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (go_tx, go_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ = go_rx.await;
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let client = client_for(&format!("ws://{}", addr));
        let mut status = client.watch_status();
        let pending = {
            let client = client.clone();
            tokio::spawn(async move { client.connect("m", &text_config()).await })
        };
        status
            .wait_for(|s| *s == ConnectionStatus::Connecting)
            .await
            .unwrap();

        // --- Act ---
        let second = client.connect("m", &text_config()).await;
        let closed = client.disconnect().await;
        go_tx.send(()).unwrap();
        let first = pending.await.unwrap();

        // --- Assert ---
        assert!(matches!(second, Err(Error::AlreadyConnecting)));
        assert!(!closed);
        assert!(matches!(first, Err(Error::Cancelled)));
        assert_eq!(client.status(), ConnectionStatus::Disconnected);
    }
}
