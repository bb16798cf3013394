//! Streaming speech recognition with windowed transcript merging.
//!
//! One [`Transcriber`] per audio source ("user" microphone at 16 kHz, "model"
//! playback at 24 kHz), each holding its own recognition websocket. Raw
//! partial transcripts arrive in bursts; they are buffered over a fixed window
//! and emitted as one merged fragment per window so downstream consumers see
//! readable utterances instead of word salad.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::client::{EventTx, LiveEvent};
use crate::error::LiveError;

const RECOGNITION_API_KEY: &str = "DEEPGRAM_API_KEY";
const RECOGNITION_BASE_URL: &str = "wss://api.deepgram.com";
const DEFAULT_MODEL: &str = "nova-3";
const DEFAULT_LANGUAGE: &str = "en-US";
const DEFAULT_ENDPOINTING_MS: u32 = 800;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(10);
const MERGE_WINDOW: Duration = Duration::from_secs(2);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Which side of the conversation an instance is listening to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptSource {
    User,
    Model,
}

impl std::fmt::Display for TranscriptSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranscriptSource::User => write!(f, "user"),
            TranscriptSource::Model => write!(f, "model"),
        }
    }
}

/// One merged utterance, or the end-of-stream marker when `text` is `None`.
#[derive(Debug, Clone)]
pub struct TranscriptFragment {
    source: TranscriptSource,
    text: Option<String>,
}

impl TranscriptFragment {
    fn merged(source: TranscriptSource, text: String) -> Self {
        Self {
            source,
            text: Some(text),
        }
    }

    fn end(source: TranscriptSource) -> Self {
        Self { source, text: None }
    }

    pub fn source(&self) -> TranscriptSource {
        self.source
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn is_end(&self) -> bool {
        self.text.is_none()
    }
}

pub struct TranscribeConfig {
    api_key: Option<SecretString>,
    base_url: String,
    model: String,
    language: String,
    sample_rate: u32,
    endpointing_ms: u32,
    smart_format: bool,
}

impl TranscribeConfig {
    pub fn new() -> Self {
        Self {
            api_key: std::env::var(RECOGNITION_API_KEY)
                .ok()
                .filter(|key| !key.is_empty())
                .map(SecretString::from),
            base_url: RECOGNITION_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
            sample_rate: 16000,
            endpointing_ms: DEFAULT_ENDPOINTING_MS,
            smart_format: true,
        }
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(SecretString::from(api_key.to_string()));
        self
    }

    pub fn without_api_key(mut self) -> Self {
        self.api_key = None;
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    fn build_ws_url(&self) -> String {
        let host = self.base_url.trim_end_matches('/');
        let mut url = format!(
            "{}/v1/listen?model={}&language={}&encoding=linear16&sample_rate={}&endpointing={}",
            host, self.model, self.language, self.sample_rate, self.endpointing_ms,
        );
        if self.smart_format {
            url.push_str("&smart_format=true");
        }
        url
    }
}

impl Default for TranscribeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Raw fragments collected within the current window. Empty fragments never
/// enter; the merged result is space-joined and trimmed.
struct TranscriptBuffer {
    parts: Vec<String>,
}

impl TranscriptBuffer {
    fn new() -> Self {
        Self { parts: Vec::new() }
    }

    fn push(&mut self, text: &str) {
        if !text.is_empty() {
            self.parts.push(text.to_string());
        }
    }

    fn flush(&mut self) -> Option<String> {
        if self.parts.is_empty() {
            return None;
        }
        let merged = self.parts.join(" ");
        self.parts.clear();
        let merged = merged.trim();
        if merged.is_empty() {
            None
        } else {
            Some(merged.to_string())
        }
    }
}

// Recognition backend response shapes; only the fields we read.

#[derive(Deserialize)]
struct DgTypeOnly {
    #[serde(rename = "type")]
    msg_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DgResult {
    channel: Option<DgChannel>,
}

#[derive(Debug, Deserialize)]
struct DgChannel {
    alternatives: Vec<DgAlternative>,
}

#[derive(Debug, Deserialize)]
struct DgAlternative {
    transcript: String,
}

#[derive(Debug, Deserialize)]
struct DgError {
    description: Option<String>,
    message: Option<String>,
}

#[derive(Default)]
struct TranscriberState {
    sink: Option<Arc<tokio::sync::Mutex<WsSink>>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Recognition connection for one audio source. Cheap to clone; all clones
/// share the connection and the merge window.
#[derive(Clone)]
pub struct Transcriber {
    config: Arc<TranscribeConfig>,
    source: TranscriptSource,
    events: EventTx,
    state: Arc<Mutex<TranscriberState>>,
    buffer: Arc<Mutex<TranscriptBuffer>>,
}

impl Transcriber {
    pub fn new(config: TranscribeConfig, source: TranscriptSource, events: EventTx) -> Self {
        Self {
            config: Arc::new(config),
            source,
            events,
            state: Arc::new(Mutex::new(TranscriberState::default())),
            buffer: Arc::new(Mutex::new(TranscriptBuffer::new())),
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.sink.is_some())
            .unwrap_or(false)
    }

    /// Open the recognition stream and spawn its reader, merge-window and
    /// keep-alive tasks. [`LiveError::Unavailable`] when no credential is
    /// configured -- the deliberate no-op mode.
    pub async fn start(&self) -> Result<(), LiveError> {
        self.stop();

        let api_key = match self.config.api_key {
            Some(ref key) => key,
            None => {
                return Err(LiveError::Unavailable(
                    "no recognition credential configured".to_string(),
                ))
            }
        };

        let url = self.config.build_ws_url();
        tracing::debug!("transcriber({}): connecting to {}", self.source, url);
        let mut request = url
            .into_client_request()
            .map_err(|e| LiveError::Connection(format!("invalid recognition url: {e}")))?;
        let token = HeaderValue::from_str(&format!("Token {}", api_key.expose_secret()))
            .map_err(|e| LiveError::Connection(format!("invalid recognition credential: {e}")))?;
        request.headers_mut().insert("Authorization", token);

        let connected = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request)).await;
        let (ws_stream, _) = match connected {
            Ok(Ok(ok)) => ok,
            Ok(Err(e)) => {
                return Err(LiveError::Connection(format!(
                    "recognition connection failed: {e}"
                )))
            }
            Err(_) => {
                return Err(LiveError::Timeout(format!(
                    "recognition connection not acknowledged within {:?}",
                    CONNECT_TIMEOUT
                )))
            }
        };
        tracing::info!("transcriber({}): connected", self.source);

        let (sink, stream) = ws_stream.split();
        let sink = Arc::new(tokio::sync::Mutex::new(sink));

        let reader = tokio::spawn(Self::reader_loop(
            stream,
            self.buffer.clone(),
            self.source,
            self.clone(),
        ));

        let window_buffer = self.buffer.clone();
        let window_events = self.events.clone();
        let window_source = self.source;
        let window = tokio::spawn(async move {
            let mut tick = tokio::time::interval(MERGE_WINDOW);
            tick.tick().await; // the first tick fires immediately
            loop {
                tick.tick().await;
                let merged = window_buffer.lock().ok().and_then(|mut buffer| buffer.flush());
                if let Some(text) = merged {
                    let _ = window_events.send(LiveEvent::Transcript(TranscriptFragment::merged(
                        window_source,
                        text,
                    )));
                }
            }
        });

        let keep_alive_sink = sink.clone();
        let keep_alive_source = self.source;
        let keep_alive = tokio::spawn(async move {
            let mut tick = tokio::time::interval(KEEP_ALIVE_INTERVAL);
            tick.tick().await;
            loop {
                tick.tick().await;
                let mut sink = keep_alive_sink.lock().await;
                if let Err(e) = sink
                    .send(Message::Text(r#"{"type": "KeepAlive"}"#.to_string()))
                    .await
                {
                    tracing::debug!("transcriber({}): keep-alive failed: {}", keep_alive_source, e);
                    break;
                }
            }
        });

        if let Ok(mut state) = self.state.lock() {
            state.sink = Some(sink);
            state.tasks = vec![reader, window, keep_alive];
        }
        Ok(())
    }

    async fn reader_loop(
        mut stream: WsStream,
        buffer: Arc<Mutex<TranscriptBuffer>>,
        source: TranscriptSource,
        transcriber: Transcriber,
    ) {
        while let Some(message) = stream.next().await {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    tracing::error!("transcriber({}): read error: {}", source, e);
                    break;
                }
            };
            match message {
                Message::Text(text) => Self::handle_message(&text, &buffer, source),
                Message::Close(frame) => {
                    tracing::debug!("transcriber({}): closed by server: {:?}", source, frame);
                    break;
                }
                _ => {}
            }
        }
        // tears down the timers and emits the terminal fragment
        transcriber.stop();
    }

    fn handle_message(text: &str, buffer: &Arc<Mutex<TranscriptBuffer>>, source: TranscriptSource) {
        let envelope: DgTypeOnly = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("transcriber({}): unparseable message: {}", source, e);
                return;
            }
        };
        match envelope.msg_type.as_deref().unwrap_or("") {
            "Results" => match serde_json::from_str::<DgResult>(text) {
                Ok(result) => {
                    let transcript = result
                        .channel
                        .as_ref()
                        .and_then(|channel| channel.alternatives.first())
                        .map(|alternative| alternative.transcript.as_str())
                        .unwrap_or("");
                    if transcript.is_empty() {
                        tracing::trace!("transcriber({}): empty transcript, skipping", source);
                        return;
                    }
                    if let Ok(mut buffer) = buffer.lock() {
                        buffer.push(transcript);
                    }
                }
                Err(e) => {
                    tracing::warn!("transcriber({}): bad Results message: {}", source, e);
                }
            },
            "Metadata" => {
                tracing::debug!("transcriber({}): metadata received", source);
            }
            "Error" => {
                let description = serde_json::from_str::<DgError>(text)
                    .ok()
                    .and_then(|error| error.description.or(error.message))
                    .unwrap_or_else(|| "unknown recognition error".to_string());
                tracing::error!("transcriber({}): server error: {}", source, description);
            }
            other => {
                tracing::trace!("transcriber({}): unhandled message type: {}", source, other);
            }
        }
    }

    /// Forward raw audio to the recognition stream; silently a no-op when the
    /// stream is not open.
    pub async fn send_audio_data(&self, data: &[u8]) {
        let sink = match self.state.lock() {
            Ok(state) => state.sink.clone(),
            Err(_) => None,
        };
        let Some(sink) = sink else { return };
        let mut sink = sink.lock().await;
        if let Err(e) = sink.send(Message::Binary(data.to_vec())).await {
            tracing::error!("transcriber({}): failed to send audio: {}", self.source, e);
            drop(sink);
            if let Ok(mut state) = self.state.lock() {
                state.sink = None;
            }
        }
    }

    /// Close the recognition stream, cancel its timers, flush anything still
    /// buffered in the window and emit the terminal fragment. Safe to call
    /// repeatedly and when never started.
    pub fn stop(&self) {
        let (sink, tasks) = match self.state.lock() {
            Ok(mut state) => (state.sink.take(), std::mem::take(&mut state.tasks)),
            Err(_) => return,
        };
        let Some(sink) = sink else {
            for task in tasks {
                task.abort();
            }
            return;
        };

        for task in &tasks {
            task.abort();
        }

        // polite close, without blocking the caller
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let mut sink = sink.lock().await;
                let _ = sink
                    .send(Message::Text(r#"{"type": "CloseStream"}"#.to_string()))
                    .await;
                let _ = sink.close().await;
            });
        }

        if let Ok(mut buffer) = self.buffer.lock() {
            if let Some(text) = buffer.flush() {
                let _ = self
                    .events
                    .send(LiveEvent::Transcript(TranscriptFragment::merged(
                        self.source,
                        text,
                    )));
            }
        }
        let _ = self
            .events
            .send(LiveEvent::Transcript(TranscriptFragment::end(self.source)));
        tracing::debug!("transcriber({}): stopped", self.source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events() -> EventTx {
        tokio::sync::broadcast::channel(64).0
    }

    #[test]
    fn window_merges_fragments_with_single_spaces() {
        let mut buffer = TranscriptBuffer::new();
        buffer.push("hel");
        buffer.push("lo wor");
        buffer.push("ld");
        assert_eq!(buffer.flush().as_deref(), Some("hel lo wor ld"));
        // flushed: the next window starts empty
        assert_eq!(buffer.flush(), None);
    }

    #[test]
    fn empty_fragments_never_reach_the_window() {
        let mut buffer = TranscriptBuffer::new();
        buffer.push("");
        buffer.push("hello");
        buffer.push("");
        assert_eq!(buffer.flush().as_deref(), Some("hello"));
    }

    #[test]
    fn merged_text_is_trimmed() {
        let mut buffer = TranscriptBuffer::new();
        buffer.push(" hello ");
        buffer.push("there");
        assert_eq!(buffer.flush().as_deref(), Some("hello  there"));

        let mut buffer = TranscriptBuffer::new();
        buffer.push("   ");
        assert_eq!(buffer.flush(), None);
    }

    #[test]
    fn results_messages_feed_the_window() {
        let buffer = Arc::new(Mutex::new(TranscriptBuffer::new()));
        let json = r#"{"type":"Results","channel":{"alternatives":[{"transcript":"hello world","confidence":0.98}]},"is_final":true}"#;
        Transcriber::handle_message(json, &buffer, TranscriptSource::User);
        assert_eq!(
            buffer.lock().unwrap().flush().as_deref(),
            Some("hello world")
        );
    }

    #[test]
    fn empty_results_are_discarded_before_buffering() {
        let buffer = Arc::new(Mutex::new(TranscriptBuffer::new()));
        let json = r#"{"type":"Results","channel":{"alternatives":[{"transcript":""}]}}"#;
        Transcriber::handle_message(json, &buffer, TranscriptSource::User);
        let json = r#"{"type":"Metadata","request_id":"abc"}"#;
        Transcriber::handle_message(json, &buffer, TranscriptSource::User);
        assert_eq!(buffer.lock().unwrap().flush(), None);
    }

    #[test]
    fn ws_url_carries_the_stream_parameters() {
        let config = TranscribeConfig::new()
            .with_api_key("key")
            .with_base_url("wss://recognition.example.com/")
            .with_sample_rate(24000);
        let url = config.build_ws_url();
        assert!(url.starts_with("wss://recognition.example.com/v1/listen?"));
        assert!(url.contains("model=nova-3"));
        assert!(url.contains("language=en-US"));
        assert!(url.contains("encoding=linear16"));
        assert!(url.contains("sample_rate=24000"));
        assert!(url.contains("endpointing=800"));
        assert!(url.contains("smart_format=true"));
    }

    #[tokio::test]
    async fn missing_credential_degrades_to_a_no_op() {
        let transcriber = Transcriber::new(
            TranscribeConfig::new().without_api_key(),
            TranscriptSource::Model,
            events(),
        );
        match transcriber.start().await {
            Err(LiveError::Unavailable(_)) => {}
            other => panic!("expected Unavailable, got {:?}", other),
        }
        assert!(!transcriber.is_streaming());
        // silent no-op, not an error
        transcriber.send_audio_data(&[0u8; 320]).await;
        transcriber.stop();
    }

    #[tokio::test]
    async fn stop_before_start_is_a_no_op() {
        let events = events();
        let mut rx = events.subscribe();
        let transcriber = Transcriber::new(
            TranscribeConfig::new().without_api_key(),
            TranscriptSource::User,
            events,
        );
        transcriber.stop();
        transcriber.stop();
        assert!(rx.try_recv().is_err());
    }
}
