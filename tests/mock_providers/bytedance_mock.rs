//! WebSocket Mock Server for the Bytedance duplex TTS protocol
//!
//! Speaks the binary event protocol using the crate's own frame codec. Each
//! text is answered with SentenceStart, its audio chunks and SentenceEnd.
//! Each accepted connection gets a 1-based index; audio bytes carry that
//! index so tests can tell which connection produced a chunk.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use waav_duplex_tts::core::tts::bytedance::protocol::{EventType, Frame, decode};

/// How the mock answers.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Refuse the websocket upgrade with HTTP 401
    pub reject_handshake: bool,
    /// Answer StartConnection with ConnectionStarted
    pub answer_start_connection: bool,
    /// Audio chunks streamed per text
    pub chunks_per_text: usize,
    pub chunk_bytes: usize,
    pub chunk_delay: Duration,
    /// The first N connections get a truncated frame after ConnectionStarted
    pub malformed_connections: usize,
    /// Every odd-numbered connection gets a truncated frame after ConnectionStarted
    pub malformed_odd_connections: bool,
    /// Drop the socket instead of answering StartSession
    pub close_on_start_session: bool,
    /// Frames sent back for an empty-text TaskRequest
    pub keepalive_replies: usize,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            reject_handshake: false,
            answer_start_connection: true,
            chunks_per_text: 2,
            chunk_bytes: 960,
            chunk_delay: Duration::ZERO,
            malformed_connections: 0,
            malformed_odd_connections: false,
            close_on_start_session: false,
            keepalive_replies: 1,
        }
    }
}

/// Shared mock state
#[derive(Default)]
pub struct MockState {
    behavior: Mutex<MockBehavior>,
    attempts: AtomicUsize,
    connections: AtomicUsize,
    texts: Mutex<Vec<String>>,
    events: Mutex<Vec<(usize, EventType)>>,
    headers: Mutex<Vec<(String, String)>>,
}

pub struct BytedanceMock {
    addr: SocketAddr,
    state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl BytedanceMock {
    pub async fn start(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockState {
            behavior: Mutex::new(behavior),
            ..Default::default()
        });

        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_state.attempts.fetch_add(1, Ordering::SeqCst);
                let state = accept_state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state).await {
                        eprintln!("Mock connection ended with error: {}", e);
                    }
                });
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// TCP connections accepted, including rejected upgrades.
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// Websocket connections established.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Non-empty texts received, in arrival order.
    pub fn texts(&self) -> Vec<String> {
        self.state.texts.lock().clone()
    }

    /// Client events received as (connection index, event).
    pub fn events(&self) -> Vec<(usize, EventType)> {
        self.state.events.lock().clone()
    }

    pub fn count_events(&self, event: EventType) -> usize {
        self.events().iter().filter(|(_, e)| *e == event).count()
    }

    /// Request headers of the latest upgrade.
    pub fn header(&self, name: &str) -> Option<String> {
        self.state
            .headers
            .lock()
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    pub fn update(&self, f: impl FnOnce(&mut MockBehavior)) {
        f(&mut self.state.behavior.lock());
    }
}

impl Drop for BytedanceMock {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Frame whose payload length promises more bytes than present.
pub fn truncated_frame() -> Bytes {
    let full = Frame::server(EventType::AudioChunk, Some("truncated"), vec![0u8; 64]).encode();
    full.slice(..full.len() - 32)
}

fn words_meta(text: &str) -> Value {
    let words: Vec<Value> = text
        .split_whitespace()
        .enumerate()
        .map(|(i, word)| {
            let start = i as f64 * 0.25 + 0.125;
            json!({"word": word, "startTime": start, "endTime": start + 0.25})
        })
        .collect();
    json!({"text": text, "words": words})
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<MockState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let reject = state.behavior.lock().reject_handshake;
    let header_state = state.clone();
    let callback = move |request: &Request, response: Response| {
        if reject {
            let rejection: ErrorResponse = http::Response::builder()
                .status(http::StatusCode::UNAUTHORIZED)
                .body(Some("unauthorized".to_string()))
                .unwrap();
            return Err(rejection);
        }
        *header_state.headers.lock() = request
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        Ok(response)
    };
    let ws_stream = accept_hdr_async(stream, callback).await?;
    let index = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
    let (mut write, mut read) = ws_stream.split();

    let mut session_id = String::new();
    let mut text_words: u64 = 0;

    while let Some(msg) = read.next().await {
        let data = match msg {
            Ok(Message::Binary(data)) => data,
            Ok(Message::Ping(data)) => {
                write.send(Message::Pong(data)).await?;
                continue;
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        let frame = match decode(&data) {
            Ok(frame) => frame,
            Err(e) => {
                eprintln!("Mock could not decode client frame: {}", e);
                break;
            }
        };
        let event = frame.event_type();
        state.events.lock().push((index, event));
        let behavior = state.behavior.lock().clone();

        match event {
            EventType::StartConnection => {
                if !behavior.answer_start_connection {
                    continue;
                }
                let started = Frame::connection_started(&format!("conn-{}", index));
                write.send(Message::Binary(started.encode())).await?;
                if index <= behavior.malformed_connections
                    || (behavior.malformed_odd_connections && index % 2 == 1)
                {
                    write.send(Message::Binary(truncated_frame())).await?;
                }
            }
            EventType::StartSession => {
                if behavior.close_on_start_session {
                    break;
                }
                session_id = frame.session_id.clone().unwrap_or_default();
                text_words = 0;
                let started = Frame::server(EventType::SessionStarted, Some(&session_id), "{}");
                write.send(Message::Binary(started.encode())).await?;
            }
            EventType::TaskRequest => {
                let text = frame
                    .payload_json()
                    .and_then(|v| v["req_params"]["text"].as_str().map(String::from))
                    .unwrap_or_default();
                if text.is_empty() {
                    for _ in 0..behavior.keepalive_replies {
                        let reply =
                            Frame::server(EventType::SentenceStart, Some(&session_id), "{}");
                        write.send(Message::Binary(reply.encode())).await?;
                    }
                    continue;
                }

                state.texts.lock().push(text.clone());
                text_words += text.chars().count() as u64;
                let start = Frame::server(
                    EventType::SentenceStart,
                    Some(&session_id),
                    json!({"text": text}).to_string(),
                );
                write.send(Message::Binary(start.encode())).await?;
                for _ in 0..behavior.chunks_per_text {
                    if !behavior.chunk_delay.is_zero() {
                        tokio::time::sleep(behavior.chunk_delay).await;
                    }
                    let audio = Frame::server(
                        EventType::AudioChunk,
                        Some(&session_id),
                        vec![index as u8; behavior.chunk_bytes],
                    );
                    write.send(Message::Binary(audio.encode())).await?;
                }
                let end = Frame::server(
                    EventType::SentenceEnd,
                    Some(&session_id),
                    words_meta(&text).to_string(),
                );
                write.send(Message::Binary(end.encode())).await?;
            }
            EventType::FinishSession => {
                let finished = Frame::server(
                    EventType::SessionFinished,
                    Some(&session_id),
                    json!({"usage": {"text_words": text_words}}).to_string(),
                );
                write.send(Message::Binary(finished.encode())).await?;
            }
            EventType::FinishConnection => {
                let finished = Frame::server(EventType::ConnectionFinished, None, "{}");
                write.send(Message::Binary(finished.encode())).await?;
                break;
            }
            _ => {}
        }
    }

    Ok(())
}
