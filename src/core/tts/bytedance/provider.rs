//! Request-level driver over [`BytedanceDuplexClient`].
//!
//! [`BytedanceDuplexTts`] turns a sequence of [`TextInput`] messages into
//! [`TtsOutput`] events: audio with timestamps, time-to-first-byte, optional
//! word timings and a terminal `AudioEnd` per request. It owns request
//! bookkeeping only; the protocol is handled by the client.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::client::{BytedanceDuplexClient, TtsResponseStream};
use super::config::BytedanceDuplexConfig;
use super::dump::DumpRegistry;
use super::messages::{ResponsePayload, SentenceWords, TtsResponse};
use super::protocol::EventType;
use crate::core::tts::base::{
    ModuleError, ReconnectionEvent, TTSResult, TtsObserver,
};

// =============================================================================
// Inputs and outputs
// =============================================================================

/// One chunk of text for a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextInput {
    pub request_id: String,
    pub text: String,
    /// Last chunk of the request
    #[serde(default)]
    pub text_input_end: bool,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl TextInput {
    pub fn new(request_id: impl Into<String>, text: impl Into<String>, end: bool) -> Self {
        Self {
            request_id: request_id.into(),
            text: text.into(),
            text_input_end: end,
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioEndReason {
    Completed,
    Interrupted,
    Error,
}

impl AudioEndReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Error => "error",
        }
    }
}

/// A word with absolute timing in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtsWord {
    pub word: String,
    pub start_ms: i64,
    pub duration_ms: i64,
}

/// Word timings of a sentence, or the end marker of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextResult {
    pub request_id: String,
    pub text: String,
    pub start_ms: i64,
    pub duration_ms: i64,
    pub words: Vec<TtsWord>,
    pub text_result_end: bool,
    pub metadata: Option<Value>,
}

/// Events produced for the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum TtsOutput {
    AudioStart {
        request_id: String,
    },
    Ttfb {
        request_id: String,
        ttfb_ms: u64,
        model: String,
        speaker: String,
    },
    Audio {
        request_id: String,
        data: Bytes,
        timestamp_ms: i64,
    },
    TextResult(TextResult),
    AudioEnd {
        request_id: String,
        reason: AudioEndReason,
        interval_ms: u64,
        total_audio_duration_ms: u64,
    },
    Usage {
        request_id: String,
        input_characters: u64,
        output_characters: u64,
    },
    Error {
        request_id: String,
        error: ModuleError,
    },
}

// =============================================================================
// Timing
// =============================================================================

/// Duration in ms of 16-bit mono PCM.
pub fn audio_duration_ms(bytes: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    let bytes_per_second = sample_rate as f64 * 2.0;
    (bytes as f64 / bytes_per_second * 1000.0) as u64
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Audio timestamp bookkeeping of one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioTimeline {
    base_ms: i64,
    sentence_start_ms: i64,
    accumulated_ms: i64,
}

impl AudioTimeline {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Timestamp of a chunk of `duration_ms` arriving at `now_ms`.
    pub fn on_audio(&mut self, now_ms: i64, duration_ms: u64) -> i64 {
        if self.base_ms == 0 {
            self.base_ms = now_ms;
            self.sentence_start_ms = now_ms;
        }
        let timestamp = self.sentence_start_ms + self.accumulated_ms;
        self.accumulated_ms += duration_ms as i64;
        timestamp
    }

    pub fn on_sentence_start(&mut self) {
        self.sentence_start_ms = self.base_ms;
        self.accumulated_ms = 0;
    }

    pub fn on_sentence_end(&mut self) {
        self.base_ms = self.sentence_start_ms + self.accumulated_ms;
    }

    pub fn sentence_start_ms(&self) -> i64 {
        self.sentence_start_ms
    }
}

/// Rebase vendor word timings (seconds) onto `sentence_start_ms`.
pub fn rebase_words(words: &SentenceWords, sentence_start_ms: i64) -> Vec<TtsWord> {
    let Some(first) = words.words.first() else {
        return Vec::new();
    };
    let first_start_ms = (first.start_time * 1000.0) as i64;
    words
        .words
        .iter()
        .map(|w| {
            let start_ms = (w.start_time * 1000.0) as i64;
            TtsWord {
                word: w.word.clone(),
                start_ms: sentence_start_ms + (start_ms - first_start_ms),
                duration_ms: ((w.end_time - w.start_time) * 1000.0) as i64,
            }
        })
        .collect()
}

// =============================================================================
// Request state
// =============================================================================

struct RequestState {
    current_request_id: Option<String>,
    last_completed_request_id: Option<String>,
    last_completed_has_reset: bool,
    request_start: Option<Instant>,
    ttfb_ms: Option<u64>,
    metadata: Option<Value>,
    timeline: AudioTimeline,
    total_audio_bytes: usize,
    is_first_message: bool,
    input_end_received: bool,
    input_characters: u64,
    output_characters: u64,
    finished: Option<oneshot::Sender<()>>,
}

impl Default for RequestState {
    fn default() -> Self {
        Self {
            current_request_id: None,
            last_completed_request_id: None,
            last_completed_has_reset: true,
            request_start: None,
            ttfb_ms: None,
            metadata: None,
            timeline: AudioTimeline::default(),
            total_audio_bytes: 0,
            is_first_message: false,
            input_end_received: false,
            input_characters: 0,
            output_characters: 0,
            finished: None,
        }
    }
}

impl RequestState {
    fn request_id(&self) -> String {
        self.current_request_id.clone().unwrap_or_default()
    }

    fn elapsed_ms(&self) -> u64 {
        self.request_start
            .map(|start| start.elapsed().as_millis() as u64)
            .unwrap_or_default()
    }

    /// Clear per-request counters after the request ended.
    fn clear_request(&mut self) {
        self.current_request_id = None;
        self.request_start = None;
        self.ttfb_ms = None;
        self.total_audio_bytes = 0;
    }

    fn release_waiter(&mut self) {
        if let Some(tx) = self.finished.take() {
            let _ = tx.send(());
        }
    }

    fn usage(&self, request_id: String) -> TtsOutput {
        TtsOutput::Usage {
            request_id,
            input_characters: self.input_characters,
            output_characters: self.output_characters,
        }
    }
}

// =============================================================================
// Observer bridge
// =============================================================================

/// Forwards client callbacks to the wrapped observer and the output stream.
struct RequestObserver {
    inner: Arc<dyn TtsObserver>,
    outputs: mpsc::Sender<TtsOutput>,
    state: Arc<Mutex<RequestState>>,
    sample_rate: u32,
}

#[async_trait]
impl TtsObserver for RequestObserver {
    async fn on_error(&self, error: ModuleError) {
        let request_id = self.state.lock().request_id();
        self.inner.on_error(error.clone()).await;
        let _ = self
            .outputs
            .send(TtsOutput::Error { request_id, error })
            .await;
    }

    async fn on_usage(&self, characters: u64) {
        self.state.lock().input_characters += characters;
        info!("Updated usage characters: {}", characters);
        self.inner.on_usage(characters).await;
    }

    async fn on_fatal_failure(&self, error: ModuleError) {
        self.inner.on_fatal_failure(error).await;

        let end = {
            let mut state = self.state.lock();
            if state.input_end_received && state.current_request_id.is_some() {
                let end = TtsOutput::AudioEnd {
                    request_id: state.request_id(),
                    reason: AudioEndReason::Error,
                    interval_ms: state.elapsed_ms(),
                    total_audio_duration_ms: audio_duration_ms(
                        state.total_audio_bytes,
                        self.sample_rate,
                    ),
                };
                state.clear_request();
                state.release_waiter();
                Some(end)
            } else {
                None
            }
        };
        if let Some(end) = end {
            error!("Fatal failure after text input end; finishing request");
            let _ = self.outputs.send(end).await;
        }
    }

    async fn on_reconnect(&self, event: ReconnectionEvent) {
        self.inner.on_reconnect(event).await;
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Drives requests over a duplex client and emits [`TtsOutput`] events.
pub struct BytedanceDuplexTts {
    config: Arc<BytedanceDuplexConfig>,
    client: BytedanceDuplexClient,
    state: Arc<Mutex<RequestState>>,
    dumps: Option<Arc<tokio::sync::Mutex<DumpRegistry>>>,
    outputs: mpsc::Sender<TtsOutput>,
    pump: JoinHandle<()>,
}

impl BytedanceDuplexTts {
    /// Start the client and the response pump. Must be called within a Tokio runtime.
    pub fn start(
        config: BytedanceDuplexConfig,
        observer: Arc<dyn TtsObserver>,
    ) -> TTSResult<(Self, mpsc::Receiver<TtsOutput>)> {
        config.validate()?;
        let config = Arc::new(config);
        let (outputs, outputs_rx) = mpsc::channel(config.response_capacity);
        let state = Arc::new(Mutex::new(RequestState::default()));

        let bridge: Arc<dyn TtsObserver> = Arc::new(RequestObserver {
            inner: observer,
            outputs: outputs.clone(),
            state: state.clone(),
            sample_rate: config.sample_rate,
        });
        let (client, responses) = BytedanceDuplexClient::start((*config).clone(), bridge)?;
        let dumps = config
            .dump
            .then(|| Arc::new(tokio::sync::Mutex::new(DumpRegistry::new(&config.dump_path))));

        let pump = ResponsePump {
            config: config.clone(),
            state: state.clone(),
            dumps: dumps.clone(),
            outputs: outputs.clone(),
        };
        let pump = tokio::spawn(pump.run(responses));

        info!(
            "Bytedance duplex TTS ready (speaker {}, {} Hz)",
            config.speaker, config.sample_rate
        );

        Ok((
            Self {
                config,
                client,
                state,
                dumps,
                outputs,
                pump,
            },
            outputs_rx,
        ))
    }

    pub fn client(&self) -> &BytedanceDuplexClient {
        &self.client
    }

    /// Request currently being synthesized.
    pub fn current_request_id(&self) -> Option<String> {
        self.state.lock().current_request_id.clone()
    }

    /// Handle one text chunk. Returns once a final chunk's session finished.
    pub async fn request_tts(&self, input: TextInput) -> TTSResult<()> {
        info!(
            "Requesting TTS for request {} ({} chars, end: {})",
            input.request_id,
            input.text.chars().count(),
            input.text_input_end
        );

        let (new_request, needs_reset, is_first) = {
            let mut state = self.state.lock();
            if state.last_completed_request_id.as_deref() == Some(input.request_id.as_str()) {
                error!(
                    "Request {} has already been completed; ignoring",
                    input.request_id
                );
                return Ok(());
            }

            let new_request = state.current_request_id.as_deref() != Some(input.request_id.as_str());
            let mut needs_reset = false;
            if new_request {
                needs_reset = !state.last_completed_has_reset;
                state.last_completed_has_reset = false;
                state.current_request_id = Some(input.request_id.clone());
                state.request_start = Some(Instant::now());
                state.ttfb_ms = None;
                state.metadata = input.metadata.clone();
                state.timeline.reset();
                state.total_audio_bytes = 0;
                state.is_first_message = true;
                state.input_end_received = false;
                state.input_characters = 0;
                state.output_characters = 0;
            }
            (new_request, needs_reset, state.is_first_message)
        };

        if new_request {
            info!("New TTS request {}", input.request_id);
            if needs_reset {
                self.client.reset();
            }
            if let Some(dumps) = &self.dumps {
                dumps.lock().await.begin(&input.request_id).await;
            }
        }

        let blank = input.text.trim().is_empty();
        if blank && input.text_input_end && is_first {
            self.finish_empty_request(&input.request_id).await;
            return Ok(());
        }

        if !blank {
            self.state.lock().output_characters += input.text.chars().count() as u64;
            if let Err(e) = self.client.send_text(input.text.clone()) {
                warn!("Failed to queue text for request {}: {}", input.request_id, e);
                if input.text_input_end {
                    self.fail_request(&e.to_string()).await;
                }
                return Err(e);
            }
            self.state.lock().is_first_message = false;
        }

        if input.text_input_end {
            let finished = {
                let mut state = self.state.lock();
                state.input_end_received = true;
                state.last_completed_request_id = Some(input.request_id.clone());
                let (tx, rx) = oneshot::channel();
                state.finished = Some(tx);
                rx
            };
            info!("Text input ended for request {}", input.request_id);

            if let Err(e) = self.client.finish_session() {
                self.state.lock().finished.take();
                self.fail_request(&e.to_string()).await;
                return Err(e);
            }
            let _ = finished.await;

            let needs_reset = {
                let mut state = self.state.lock();
                !std::mem::replace(&mut state.last_completed_has_reset, true)
            };
            if needs_reset {
                if let Err(e) = self.client.finish_connection() {
                    debug!("finish_connection after request skipped: {}", e);
                }
                self.client.reset();
            }
        }

        Ok(())
    }

    /// Interrupt the current request.
    pub async fn cancel_tts(&self) {
        let (started, outputs) = {
            let mut state = self.state.lock();
            state.last_completed_request_id = state.current_request_id.clone();
            state.last_completed_has_reset = true;
            state.release_waiter();

            let started = state.request_start.is_some();
            let request_id = state.request_id();
            let outputs = [
                TtsOutput::AudioEnd {
                    request_id: request_id.clone(),
                    reason: AudioEndReason::Interrupted,
                    interval_ms: state.elapsed_ms(),
                    total_audio_duration_ms: audio_duration_ms(
                        state.total_audio_bytes,
                        self.config.sample_rate,
                    ),
                },
                state.usage(request_id),
            ];
            state.request_start = None;
            state.ttfb_ms = None;
            state.total_audio_bytes = 0;
            (started, outputs)
        };

        self.client.cancel();
        info!("TTS request cancelled");

        if started {
            for output in outputs {
                let _ = self.outputs.send(output).await;
            }
        }
    }

    /// Close the client, stop the pump and flush dumps.
    pub async fn close(&self) {
        self.client.close().await;
        self.pump.abort();
        if let Some(dumps) = &self.dumps {
            dumps.lock().await.flush_all().await;
        }
    }

    async fn finish_empty_request(&self, request_id: &str) {
        info!(
            "Empty first message with text input end; finishing request {} immediately",
            request_id
        );
        let outputs = {
            let mut state = self.state.lock();
            state.last_completed_request_id = Some(request_id.to_string());
            let outputs = [
                TtsOutput::AudioEnd {
                    request_id: request_id.to_string(),
                    reason: AudioEndReason::Completed,
                    interval_ms: state.elapsed_ms(),
                    total_audio_duration_ms: 0,
                },
                state.usage(request_id.to_string()),
            ];
            state.clear_request();
            state.last_completed_has_reset = true;
            outputs
        };
        for output in outputs {
            let _ = self.outputs.send(output).await;
        }

        if let Err(e) = self.client.finish_connection() {
            error!("finish_connection on empty request failed: {}", e);
        }
        self.client.reset();
    }

    async fn fail_request(&self, message: &str) {
        let end = {
            let mut state = self.state.lock();
            let end = TtsOutput::AudioEnd {
                request_id: state.request_id(),
                reason: AudioEndReason::Error,
                interval_ms: state.elapsed_ms(),
                total_audio_duration_ms: audio_duration_ms(
                    state.total_audio_bytes,
                    self.config.sample_rate,
                ),
            };
            state.clear_request();
            end
        };
        error!("Request failed: {}", message);
        let _ = self.outputs.send(end).await;
    }
}

impl Drop for BytedanceDuplexTts {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

// =============================================================================
// Response pump
// =============================================================================

/// Turns client responses into caller outputs.
struct ResponsePump {
    config: Arc<BytedanceDuplexConfig>,
    state: Arc<Mutex<RequestState>>,
    dumps: Option<Arc<tokio::sync::Mutex<DumpRegistry>>>,
    outputs: mpsc::Sender<TtsOutput>,
}

impl ResponsePump {
    async fn run(self, mut responses: TtsResponseStream) {
        while let Some(response) = responses.recv().await {
            self.handle(response).await;
        }
        debug!("Response stream ended");
    }

    async fn emit(&self, output: TtsOutput) {
        if self.outputs.send(output).await.is_err() {
            debug!("Output receiver dropped");
        }
    }

    async fn handle(&self, response: TtsResponse) {
        match (response.event, response.payload) {
            (EventType::AudioChunk, ResponsePayload::Audio(data)) => self.on_audio(data).await,
            (EventType::SentenceStart, _) => {
                debug!("Sentence start");
                self.state.lock().timeline.on_sentence_start();
            }
            (EventType::SentenceEnd, payload) => {
                let result = {
                    let mut state = self.state.lock();
                    state.timeline.on_sentence_end();
                    match payload {
                        ResponsePayload::Json(meta) if self.config.enable_words => {
                            self.words_result(&state, &meta)
                        }
                        _ => None,
                    }
                };
                if let Some(result) = result {
                    self.emit(TtsOutput::TextResult(result)).await;
                }
            }
            (EventType::SessionFinished, _) => self.on_session_finished().await,
            (EventType::SessionFailed, _) => self.on_session_failed().await,
            (event, _) => debug!("Ignoring response {}", event),
        }
    }

    async fn on_audio(&self, data: Bytes) {
        let duration_ms = audio_duration_ms(data.len(), self.config.sample_rate);
        let (request_id, first_chunk, timestamp_ms) = {
            let mut state = self.state.lock();
            state.total_audio_bytes += data.len();
            let first_chunk = if state.request_start.is_some() && state.ttfb_ms.is_none() {
                let ttfb = state.elapsed_ms();
                state.ttfb_ms = Some(ttfb);
                Some(ttfb)
            } else {
                None
            };
            let timestamp = state.timeline.on_audio(now_ms(), duration_ms);
            (state.request_id(), first_chunk, timestamp)
        };
        debug!(
            "Received {} bytes of audio ({}ms) for request {}",
            data.len(),
            duration_ms,
            request_id
        );

        if let Some(dumps) = &self.dumps
            && !request_id.is_empty()
        {
            dumps.lock().await.write(&request_id, &data).await;
        }

        if let Some(ttfb_ms) = first_chunk {
            info!("TTFB for request {}: {}ms", request_id, ttfb_ms);
            self.emit(TtsOutput::AudioStart {
                request_id: request_id.clone(),
            })
            .await;
            self.emit(TtsOutput::Ttfb {
                request_id: request_id.clone(),
                ttfb_ms,
                model: self.config.model.clone(),
                speaker: self.config.speaker.clone(),
            })
            .await;
        }

        self.emit(TtsOutput::Audio {
            request_id,
            data,
            timestamp_ms,
        })
        .await;
    }

    fn words_result(&self, state: &RequestState, meta: &Value) -> Option<TextResult> {
        let sentence = SentenceWords::from_value(meta)?;
        let words = rebase_words(&sentence, state.timeline.sentence_start_ms());
        let (first, last) = (words.first()?, words.last()?);
        let start_ms = first.start_ms;
        let duration_ms = last.start_ms + last.duration_ms - first.start_ms;
        Some(TextResult {
            request_id: state.request_id(),
            text: sentence.text,
            start_ms,
            duration_ms,
            words,
            text_result_end: false,
            metadata: state.metadata.clone(),
        })
    }

    async fn on_session_finished(&self) {
        let outputs = {
            let mut state = self.state.lock();
            let request_id = state.request_id();
            info!("Session finished for request {}", request_id);

            let mut outputs = Vec::with_capacity(3);
            if self.config.enable_words {
                outputs.push(TtsOutput::TextResult(TextResult {
                    request_id: request_id.clone(),
                    text: String::new(),
                    start_ms: state.timeline.sentence_start_ms(),
                    duration_ms: 0,
                    words: Vec::new(),
                    text_result_end: true,
                    metadata: state.metadata.clone(),
                }));
            }
            if state.request_start.is_some() {
                outputs.push(TtsOutput::AudioEnd {
                    request_id: request_id.clone(),
                    reason: AudioEndReason::Completed,
                    interval_ms: state.elapsed_ms(),
                    total_audio_duration_ms: audio_duration_ms(
                        state.total_audio_bytes,
                        self.config.sample_rate,
                    ),
                });
            }
            outputs.push(state.usage(request_id));
            state.clear_request();
            state.release_waiter();
            outputs
        };

        for output in outputs {
            self.emit(output).await;
        }
    }

    async fn on_session_failed(&self) {
        let end = {
            let mut state = self.state.lock();
            if !state.input_end_received || state.request_start.is_none() {
                return;
            }
            let end = TtsOutput::AudioEnd {
                request_id: state.request_id(),
                reason: AudioEndReason::Error,
                interval_ms: state.elapsed_ms(),
                total_audio_duration_ms: audio_duration_ms(
                    state.total_audio_bytes,
                    self.config.sample_rate,
                ),
            };
            state.clear_request();
            state.release_waiter();
            end
        };
        self.emit(end).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tts::bytedance::messages::WordTiming;

    #[test]
    fn test_audio_duration() {
        // 24kHz, 16-bit mono: 48000 bytes per second
        assert_eq!(audio_duration_ms(48_000, 24_000), 1000);
        assert_eq!(audio_duration_ms(4_800, 24_000), 100);
        assert_eq!(audio_duration_ms(1, 24_000), 0);
        assert_eq!(audio_duration_ms(100, 0), 0);
    }

    #[test]
    fn test_timeline_accumulates_within_sentence() {
        let mut timeline = AudioTimeline::default();
        assert_eq!(timeline.on_audio(1_000, 100), 1_000);
        assert_eq!(timeline.on_audio(5_000, 100), 1_100);
        assert_eq!(timeline.on_audio(9_000, 50), 1_200);
    }

    #[test]
    fn test_timeline_sentence_boundaries() {
        let mut timeline = AudioTimeline::default();
        timeline.on_sentence_start();
        assert_eq!(timeline.on_audio(1_000, 200), 1_000);
        assert_eq!(timeline.on_audio(1_010, 300), 1_200);
        timeline.on_sentence_end();

        // Second sentence continues where the first ended.
        timeline.on_sentence_start();
        assert_eq!(timeline.sentence_start_ms(), 1_500);
        assert_eq!(timeline.on_audio(2_000, 100), 1_500);

        timeline.reset();
        assert_eq!(timeline.on_audio(7_000, 10), 7_000);
    }

    #[test]
    fn test_rebase_words() {
        let sentence = SentenceWords {
            text: "hello world".to_string(),
            words: vec![
                WordTiming {
                    word: "hello".to_string(),
                    start_time: 0.5,
                    end_time: 0.8,
                },
                WordTiming {
                    word: "world".to_string(),
                    start_time: 0.9,
                    end_time: 1.25,
                },
            ],
        };
        let words = rebase_words(&sentence, 10_000);
        assert_eq!(
            words,
            vec![
                TtsWord {
                    word: "hello".to_string(),
                    start_ms: 10_000,
                    duration_ms: 300,
                },
                TtsWord {
                    word: "world".to_string(),
                    start_ms: 10_400,
                    duration_ms: 350,
                },
            ]
        );
        assert!(rebase_words(&SentenceWords::default(), 0).is_empty());
    }

    #[test]
    fn test_text_input_deserialize_defaults() {
        let input: TextInput =
            serde_json::from_str(r#"{"request_id":"r1","text":"hi"}"#).unwrap();
        assert!(!input.text_input_end);
        assert!(input.metadata.is_none());
        assert_eq!(AudioEndReason::Interrupted.as_str(), "interrupted");
    }
}
