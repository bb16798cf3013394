//! The live session: one websocket to the backend, a send task that keeps
//! caller order as wire order, a receive task that classifies every inbound
//! frame, and a broadcast channel fanning events out to subscribers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use gemini_live_types::{
    ClientContent, ClientMessage, Content, LiveConfig, MediaChunk, ModelTurn, Part, RealtimeInput,
    ServerMessage, StreamingLog, ToolCall, ToolCallCancellation, ToolResponse,
};

use crate::audio::AudioStreamer;
use crate::error::LiveError;
use crate::transcribe::{TranscribeConfig, Transcriber, TranscriptFragment, TranscriptSource};

pub mod config;
mod consts;
mod utils;

pub type EventTx = tokio::sync::broadcast::Sender<LiveEvent>;
pub type EventRx = tokio::sync::broadcast::Receiver<LiveEvent>;
type OutboundTx = tokio::sync::mpsc::Sender<ClientMessage>;
type AudioTx = tokio::sync::mpsc::Sender<Vec<u8>>;

/// Everything the client fans out: lifecycle flips, classified content and
/// tool traffic, playback volume, merged transcripts and the log sink. Audio
/// payloads never appear here; they go straight to the output device.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    Connected(bool),
    SetupComplete,
    Interrupted,
    TurnComplete,
    /// A model turn with its audio parts already stripped out
    Content(ModelTurn),
    ToolCall(ToolCall),
    ToolCallCancellation(ToolCallCancellation),
    Volume(f32),
    Transcript(TranscriptFragment),
    Log(StreamingLog),
    Close { reason: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

struct Session {
    id: u64,
    outbound: OutboundTx,
    recv_task: tokio::task::JoinHandle<()>,
    volume_task: Option<tokio::task::JoinHandle<()>>,
}

pub struct Client {
    capacity: usize,
    config: config::Config,
    state: ConnectionState,
    session: Option<Session>,
    /// Id of the live session; 0 means none. Receive tasks compare their own
    /// id against this before acting, so callbacks from a superseded
    /// connection are discarded instead of acted upon.
    current: Arc<AtomicU64>,
    session_seq: u64,
    e_tx: EventTx,
    audio: Option<AudioStreamer>,
    user_transcriber: Transcriber,
    model_transcriber: Transcriber,
}

impl Client {
    pub fn new(config: config::Config) -> Self {
        Self::with_capacity(consts::DEFAULT_CAPACITY, config)
    }

    pub fn with_capacity(capacity: usize, config: config::Config) -> Self {
        let (e_tx, _) = tokio::sync::broadcast::channel(capacity);
        let user_transcriber = Transcriber::new(
            TranscribeConfig::new().with_sample_rate(16000),
            TranscriptSource::User,
            e_tx.clone(),
        );
        let model_transcriber = Transcriber::new(
            TranscribeConfig::new().with_sample_rate(24000),
            TranscriptSource::Model,
            e_tx.clone(),
        );
        Self {
            capacity,
            config,
            state: ConnectionState::Disconnected,
            session: None,
            current: Arc::new(AtomicU64::new(0)),
            session_seq: 0,
            e_tx,
            audio: None,
            user_transcriber,
            model_transcriber,
        }
    }

    /// Subscribe to the event fan-out. Every subscription is independent and
    /// ends when the receiver is dropped.
    pub fn events(&self) -> EventRx {
        self.e_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        if self.state == ConnectionState::Open {
            // the transport may have died underneath us
            let alive = self
                .session
                .as_ref()
                .is_some_and(|session| self.current.load(Ordering::SeqCst) == session.id);
            return if alive {
                ConnectionState::Open
            } else {
                ConnectionState::Disconnected
            };
        }
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn user_transcriber(&self) -> &Transcriber {
        &self.user_transcriber
    }

    pub fn model_transcriber(&self) -> &Transcriber {
        &self.model_transcriber
    }

    pub fn log(&self, kind: &str, message: impl Into<String>) {
        let _ = self
            .e_tx
            .send(LiveEvent::Log(StreamingLog::new(kind, message)));
    }

    /// Open a fresh session and send its setup frame. Any prior session is
    /// torn down first, so two overlapping calls can never leak a duplicate
    /// connection. Resolves once the transport acknowledges the open.
    pub async fn connect(&mut self, live_config: LiveConfig) -> Result<(), LiveError> {
        self.disconnect();
        self.state = ConnectionState::Connecting;

        let request = utils::build_request(&self.config)
            .map_err(|e| LiveError::Connection(format!("failed to build request: {e}")))?;
        let connected = tokio::time::timeout(
            self.config.connect_timeout(),
            tokio_tungstenite::connect_async(request),
        )
        .await;
        let (ws_stream, _) = match connected {
            Ok(Ok(ok)) => ok,
            Ok(Err(e)) => {
                self.state = ConnectionState::Disconnected;
                let message = format!("could not connect to server: {e}");
                self.log("server.error", message.clone());
                return Err(LiveError::Connection(message));
            }
            Err(_) => {
                self.state = ConnectionState::Disconnected;
                return Err(LiveError::Timeout(format!(
                    "no open acknowledgment within {:?}",
                    self.config.connect_timeout()
                )));
            }
        };

        self.session_seq += 1;
        let id = self.session_seq;
        self.current.store(id, Ordering::SeqCst);

        let (mut write, mut read) = ws_stream.split();
        let (c_tx, mut c_rx) = tokio::sync::mpsc::channel::<ClientMessage>(self.capacity);

        // Caller order is wire order; closing the channel closes the socket.
        tokio::spawn(async move {
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
                tracing::debug!("websocket close: {}", e);
            }
        });

        // Audio output is a degraded feature when no device exists, never a
        // fatal dependency of the session.
        if self.audio.is_none() {
            match AudioStreamer::start() {
                Ok(streamer) => self.audio = Some(streamer),
                Err(e) => {
                    tracing::warn!("audio output unavailable: {}", e);
                    self.log("client.audio", format!("audio output unavailable: {e}"));
                }
            }
        }

        match self.model_transcriber.start().await {
            Ok(()) => {}
            Err(LiveError::Unavailable(reason)) => {
                tracing::debug!("model transcription disabled: {}", reason);
            }
            Err(e) => {
                tracing::warn!("model transcription failed to start: {}", e);
                self.log("transcribe.model", format!("failed to start: {e}"));
            }
        }

        // Decoded model audio goes to the playback queue and, in parallel, to
        // the model-side transcriber.
        let (audio_tx, mut audio_rx) = tokio::sync::mpsc::channel::<Vec<u8>>(self.capacity);
        let pump_streamer = self.audio.clone();
        let pump_transcriber = self.model_transcriber.clone();
        tokio::spawn(async move {
            while let Some(buffer) = audio_rx.recv().await {
                if let Some(ref streamer) = pump_streamer {
                    streamer.add_pcm16(&buffer);
                }
                pump_transcriber.send_audio_data(&buffer).await;
            }
        });

        let volume_task = self.audio.as_ref().map(|streamer| {
            let mut volume = streamer.volume();
            let e_tx = self.e_tx.clone();
            let current = self.current.clone();
            tokio::spawn(async move {
                while volume.changed().await.is_ok() {
                    if current.load(Ordering::SeqCst) != id {
                        break;
                    }
                    let level = *volume.borrow();
                    let _ = e_tx.send(LiveEvent::Volume(level));
                }
            })
        });

        let e_tx = self.e_tx.clone();
        let current = self.current.clone();
        let recv_streamer = self.audio.clone();
        let recv_transcriber = self.model_transcriber.clone();
        let recv_task = tokio::spawn(async move {
            let mut close_reason: Option<String> = None;
            while let Some(message) = read.next().await {
                if current.load(Ordering::SeqCst) != id {
                    // superseded while a frame was in flight
                    return;
                }
                let message = match message {
                    Err(e) => {
                        tracing::error!("failed to read message: {}", e);
                        break;
                    }
                    Ok(message) => message,
                };
                match message {
                    Message::Text(text) => {
                        handle_incoming(&text, &e_tx, &audio_tx, recv_streamer.as_ref()).await;
                    }
                    Message::Binary(bin) => match String::from_utf8(bin) {
                        Ok(text) => {
                            handle_incoming(&text, &e_tx, &audio_tx, recv_streamer.as_ref()).await;
                        }
                        Err(_) => tracing::warn!("received non-UTF-8 binary message"),
                    },
                    Message::Close(frame) => {
                        close_reason = frame.map(|frame| frame.reason.to_string());
                        break;
                    }
                    _ => {}
                }
            }
            // Transport closed or errored: run the same cleanup as an
            // explicit disconnect, exactly once, unless already superseded.
            if current
                .compare_exchange(id, 0, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                tracing::info!("connection closed: {:?}", close_reason);
                if let Some(streamer) = recv_streamer {
                    streamer.stop();
                }
                recv_transcriber.stop();
                let _ = e_tx.send(LiveEvent::Log(StreamingLog::new(
                    "server.close",
                    format!(
                        "disconnected{}",
                        close_reason
                            .as_deref()
                            .map(|reason| format!(" with reason: {reason}"))
                            .unwrap_or_default()
                    ),
                )));
                let _ = e_tx.send(LiveEvent::Close {
                    reason: close_reason,
                });
                let _ = e_tx.send(LiveEvent::Connected(false));
            }
        });

        // The setup frame is always the first message on the wire.
        if c_tx
            .send(ClientMessage::Setup(live_config))
            .await
            .is_err()
        {
            self.disconnect();
            return Err(LiveError::Connection(
                "connection closed before setup".to_string(),
            ));
        }

        self.session = Some(Session {
            id,
            outbound: c_tx,
            recv_task,
            volume_task,
        });
        self.state = ConnectionState::Open;
        self.log("client.connect", "connected");
        let _ = self.e_tx.send(LiveEvent::Connected(true));
        Ok(())
    }

    /// Close the transport if open and stop every dependent service. A no-op
    /// when no session exists; always leaves the client fully disconnected.
    pub fn disconnect(&mut self) {
        let had_session = self.session.is_some();
        self.state = ConnectionState::Closing;
        self.current.store(0, Ordering::SeqCst);
        if let Some(session) = self.session.take() {
            // dropping the outbound sender makes the send task close the socket
            drop(session.outbound);
            session.recv_task.abort();
            if let Some(volume_task) = session.volume_task {
                volume_task.abort();
            }
        }
        if let Some(ref streamer) = self.audio {
            streamer.stop();
        }
        self.user_transcriber.stop();
        self.model_transcriber.stop();
        self.state = ConnectionState::Disconnected;
        if had_session {
            self.log("client.close", "disconnected");
            let _ = self.e_tx.send(LiveEvent::Connected(false));
        }
    }

    /// Send ordinary content parts as one `clientContent` frame.
    pub async fn send(&self, parts: Vec<Part>, turn_complete: bool) -> Result<(), LiveError> {
        if parts.is_empty() {
            return Err(LiveError::Protocol(
                "content parts must be non-empty".to_string(),
            ));
        }
        self.log("client.send", format!("{} part(s)", parts.len()));
        let message = ClientMessage::ClientContent(ClientContent::new(
            vec![Content::user(parts)],
            turn_complete,
        ));
        self.send_client_message(message).await
    }

    /// Forward realtime media chunks, one frame per chunk, in input order.
    /// The mime classification only shapes the log line. Audio chunks also
    /// feed the user-side transcriber.
    pub async fn send_realtime_input(&self, chunks: Vec<MediaChunk>) -> Result<(), LiveError> {
        let mut has_audio = false;
        let mut has_video = false;
        for chunk in chunks {
            if chunk.is_audio() {
                has_audio = true;
                if let Ok(bytes) = gemini_live_utils::audio::decode_base64(chunk.data()) {
                    self.user_transcriber.send_audio_data(&bytes).await;
                }
            }
            if chunk.is_image() {
                has_video = true;
            }
            self.send_client_message(ClientMessage::RealtimeInput(RealtimeInput::new(chunk)))
                .await?;
        }
        let kind = match (has_audio, has_video) {
            (true, true) => "audio + video",
            (true, false) => "audio",
            (false, true) => "video",
            (false, false) => "unknown",
        };
        self.log("client.realtimeInput", kind);
        Ok(())
    }

    /// Answer an outstanding tool call. The backend is authoritative about
    /// the referenced ids; nothing is validated locally.
    pub async fn send_tool_response(&self, response: ToolResponse) -> Result<(), LiveError> {
        self.log(
            "client.toolResponse",
            format!("{} response(s)", response.function_responses().len()),
        );
        self.send_client_message(ClientMessage::ToolResponse(response))
            .await
    }

    async fn send_client_message(&self, message: ClientMessage) -> Result<(), LiveError> {
        match self.session {
            Some(ref session) => session
                .outbound
                .send(message)
                .await
                .map_err(|_| LiveError::Connection("connection closed".to_string())),
            None => Err(LiveError::Connection("not connected".to_string())),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Classify one inbound frame and act on it. Priority order, first match
/// wins: toolCall, toolCallCancellation, setupComplete, serverContent; a
/// frame carrying both `turnComplete` and a model turn yields both effects.
/// Unrecognized shapes are logged and ignored, never fatal.
async fn handle_incoming(
    text: &str,
    events: &EventTx,
    audio: &AudioTx,
    streamer: Option<&AudioStreamer>,
) {
    let message = match serde_json::from_str::<ServerMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("received unmatched message: {}", e);
            let _ = events.send(LiveEvent::Log(StreamingLog::new(
                "server.unmatched",
                text.to_string(),
            )));
            return;
        }
    };

    match message {
        ServerMessage::ToolCall(tool_call) => {
            tracing::debug!(
                "tool call: {} function(s)",
                tool_call.function_calls().len()
            );
            let _ = events.send(LiveEvent::Log(StreamingLog::new(
                "server.toolCall",
                format!("{} function call(s)", tool_call.function_calls().len()),
            )));
            let _ = events.send(LiveEvent::ToolCall(tool_call));
        }
        ServerMessage::ToolCallCancellation(cancellation) => {
            let _ = events.send(LiveEvent::Log(StreamingLog::new(
                "server.toolCallCancellation",
                format!("{:?}", cancellation.ids()),
            )));
            let _ = events.send(LiveEvent::ToolCallCancellation(cancellation));
        }
        ServerMessage::SetupComplete(_) => {
            let _ = events.send(LiveEvent::Log(StreamingLog::new(
                "server.send",
                "setupComplete",
            )));
            let _ = events.send(LiveEvent::SetupComplete);
        }
        ServerMessage::ServerContent(content) => {
            if content.is_interrupted() {
                let _ = events.send(LiveEvent::Log(StreamingLog::new(
                    "server.content",
                    "interrupted",
                )));
                if let Some(streamer) = streamer {
                    streamer.stop();
                }
                let _ = events.send(LiveEvent::Interrupted);
                return;
            }
            if content.is_turn_complete() {
                let _ = events.send(LiveEvent::Log(StreamingLog::new(
                    "server.send",
                    "turnComplete",
                )));
                let _ = events.send(LiveEvent::TurnComplete);
                // the same frame may still carry a trailing model turn
            }
            if let Some(turn) = content.into_model_turn() {
                let (audio_parts, other_parts): (Vec<Part>, Vec<Part>) = turn
                    .into_parts()
                    .into_iter()
                    .partition(|part| part.is_audio());

                for part in &audio_parts {
                    let Some(chunk) = part.inline_data() else {
                        continue;
                    };
                    match gemini_live_utils::audio::decode_base64(chunk.data()) {
                        Ok(bytes) => {
                            let _ = events.send(LiveEvent::Log(StreamingLog::new(
                                "server.audio",
                                format!("buffer ({})", bytes.len()),
                            )));
                            if audio.send(bytes).await.is_err() {
                                tracing::warn!("audio sink closed, dropping buffer");
                            }
                        }
                        Err(e) => tracing::error!("failed to decode audio payload: {}", e),
                    }
                }

                if other_parts.is_empty() {
                    return;
                }
                let _ = events.send(LiveEvent::Log(StreamingLog::new(
                    "server.content",
                    format!("{} part(s)", other_parts.len()),
                )));
                let _ = events.send(LiveEvent::Content(ModelTurn::new(other_parts)));
            }
        }
    }
}

/// Connect with the default transport config (`GEMINI_API_KEY` from the
/// environment).
pub async fn connect(live_config: LiveConfig) -> Result<Client, LiveError> {
    connect_with_config(config::Config::new(), live_config).await
}

pub async fn connect_with_config(
    config: config::Config,
    live_config: LiveConfig,
) -> Result<Client, LiveError> {
    let mut client = Client::new(config);
    client.connect(live_config).await?;
    Ok(client)
}
