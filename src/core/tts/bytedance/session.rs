//! Transport session: one physical websocket connection.
//!
//! A session owns a send loop and a receive loop over the split socket.
//! Both loops watch the same cancellation token; whichever exits first records
//! the exit reason and cancels the token so the other one stops within one I/O
//! operation. The session never reconnects by itself; the supervisor watches
//! [`TransportSession::closed`] and decides.
//!
//! # Handshake
//!
//! ```text
//! Idle ─start_connection─▶ ConnectionPending ─ConnectionStarted─▶ Connected
//! Connected ─start_session─▶ SessionPending ─SessionStarted─▶ SessionActive
//! SessionActive ─finish_session─▶ SessionFinishing ─SessionFinished─▶ Connected
//!                                               (or SessionFinished after finish_connection)
//! ```

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::client::ResponseSink;
use super::config::BytedanceDuplexConfig;
use super::messages::{
    EMPTY_PAYLOAD, RequestPayload, ResponsePayload, TtsResponse, UsagePayload,
};
use super::protocol::{self, EventType, Frame, MessageType};
use super::{CODE_CONNECTION_FAILED, CODE_SESSION_FAILED, VENDOR};
use crate::core::tts::base::{ModuleError, TTSError, TTSResult, TtsObserver};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capacity of the outbound frame channel feeding the send loop.
const OUTBOUND_CAPACITY: usize = 256;

/// How long a graceful close waits for the socket to wind down.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// State
// =============================================================================

/// Protocol state of a transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    ConnectionPending,
    Connected,
    SessionPending,
    SessionActive,
    SessionFinishing,
    SessionFinished,
    Closed,
}

/// Why the loops of a session stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionExit {
    /// Cancelled locally
    Cancelled,
    /// Closed locally after flushing outbound frames
    Closed,
    /// The peer closed the socket
    ClosedByPeer,
    /// Read or write failure
    Io(String),
    /// A frame could not be decoded
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HandshakeOutcome {
    Pending,
    Succeeded,
    Failed(String),
}

enum Outbound {
    Frame(bytes::Bytes),
    Pong(bytes::Bytes),
    Close,
}

/// Swallows the vendor's replies to a keepalive.
///
/// The no-op is an empty-text TaskRequest, answered with a SentenceStart that
/// carries no text. While the gate is open, every such reply is consumed and
/// counted; anything else passes through untouched. The gate closes itself
/// once its window elapses.
#[derive(Debug)]
pub(crate) struct KeepaliveGate {
    open_until: Mutex<Option<Instant>>,
    acks: watch::Sender<u64>,
}

impl Default for KeepaliveGate {
    fn default() -> Self {
        Self {
            open_until: Mutex::new(None),
            acks: watch::channel(0).0,
        }
    }
}

impl KeepaliveGate {
    /// Open the gate for `window`; returns the ack count to wait past.
    pub(crate) fn arm(&self, window: Duration) -> u64 {
        *self.open_until.lock() = Some(Instant::now() + window);
        *self.acks.borrow()
    }

    pub(crate) fn disarm(&self) {
        self.open_until.lock().take();
    }

    #[cfg(test)]
    fn is_armed(&self) -> bool {
        matches!(*self.open_until.lock(), Some(until) if Instant::now() < until)
    }

    fn try_consume(&self, response: &TtsResponse) -> bool {
        if !is_keepalive_reply(response) {
            return false;
        }
        let mut open_until = self.open_until.lock();
        match *open_until {
            Some(until) if Instant::now() < until => {
                self.acks.send_modify(|n| *n += 1);
                true
            }
            Some(_) => {
                *open_until = None;
                false
            }
            None => false,
        }
    }

    /// Wait until a reply arrived after `since` or `timeout` elapses.
    pub(crate) async fn wait_acked(&self, since: u64, timeout: Duration) -> bool {
        let mut acks = self.acks.subscribe();
        matches!(
            tokio::time::timeout(timeout, acks.wait_for(|n| *n > since)).await,
            Ok(Ok(_))
        )
    }
}

/// A SentenceStart without text answers a keepalive, never a caller's text.
fn is_keepalive_reply(response: &TtsResponse) -> bool {
    if response.event != EventType::SentenceStart {
        return false;
    }
    match &response.payload {
        ResponsePayload::Json(meta) => meta
            .get("text")
            .and_then(|t| t.as_str())
            .is_none_or(|t| t.trim().is_empty()),
        ResponsePayload::Empty => true,
        _ => false,
    }
}

struct SessionShared {
    state: Mutex<SessionState>,
    connection_id: Mutex<Option<String>>,
    pending_session_id: Mutex<Option<String>>,
    session_id: Mutex<Option<String>>,
    connection_signal: watch::Sender<HandshakeOutcome>,
    session_signal: watch::Sender<HandshakeOutcome>,
    connection_finishing: AtomicBool,
    closing: AtomicBool,
    exit: Mutex<Option<SessionExit>>,
    shutdown: CancellationToken,
    keepalive: KeepaliveGate,
    last_received: Mutex<Instant>,
}

impl SessionShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Idle),
            connection_id: Mutex::new(None),
            pending_session_id: Mutex::new(None),
            session_id: Mutex::new(None),
            connection_signal: watch::channel(HandshakeOutcome::Pending).0,
            session_signal: watch::channel(HandshakeOutcome::Pending).0,
            connection_finishing: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            exit: Mutex::new(None),
            shutdown: CancellationToken::new(),
            keepalive: KeepaliveGate::default(),
            last_received: Mutex::new(Instant::now()),
        }
    }

    fn state(&self) -> SessionState {
        *self.state.lock()
    }

    fn set_state(&self, state: SessionState) {
        let mut current = self.state.lock();
        if *current != SessionState::Closed {
            trace!("Session state {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    /// Record why the loops stopped; the first reason wins.
    fn finish(&self, reason: SessionExit) {
        {
            let mut exit = self.exit.lock();
            if exit.is_none() {
                debug!("Transport session exiting: {:?}", reason);
                *exit = Some(reason);
            }
        }
        self.shutdown.cancel();
    }
}

// =============================================================================
// Transport Session
// =============================================================================

/// One websocket connection and its protocol handshake state.
pub struct TransportSession {
    config: Arc<BytedanceDuplexConfig>,
    outbound: mpsc::Sender<Outbound>,
    shared: Arc<SessionShared>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl TransportSession {
    /// Open the websocket and spawn the send and receive loops.
    ///
    /// Responses are delivered to `sink`; errors the session detects on its
    /// own (vendor error frames, unsolicited failures) go to `observer`.
    pub async fn connect(
        config: Arc<BytedanceDuplexConfig>,
        observer: Arc<dyn TtsObserver>,
        sink: ResponseSink,
    ) -> TTSResult<Self> {
        let request = config.build_request()?;

        let (ws_stream, _response) =
            match tokio::time::timeout(config.handshake_timeout, connect_async(request)).await {
                Ok(Ok(connected)) => connected,
                Ok(Err(e)) => return Err(classify_connect_error(e)),
                Err(_) => {
                    return Err(TTSError::ConnectionFailed(format!(
                        "websocket connect timed out after {:?}",
                        config.handshake_timeout
                    )));
                }
            };

        info!("Connected to Bytedance TTS at {}", config.api_url);

        let (ws_sink, ws_stream) = ws_stream.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let shared = Arc::new(SessionShared::new());

        let send_handle = tokio::spawn(send_loop(ws_sink, outbound_rx, shared.clone()));
        let router = FrameRouter {
            shared: shared.clone(),
            observer,
            sink,
            outbound: outbound_tx.clone(),
        };
        let receive_handle = tokio::spawn(receive_loop(ws_stream, router));

        Ok(Self {
            config,
            outbound: outbound_tx,
            shared,
            tasks: tokio::sync::Mutex::new(vec![send_handle, receive_handle]),
        })
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Id of the active session, if any.
    pub fn session_id(&self) -> Option<String> {
        self.shared.session_id.lock().clone()
    }

    pub fn connection_id(&self) -> Option<String> {
        self.shared.connection_id.lock().clone()
    }

    pub fn is_closing(&self) -> bool {
        self.shared.closing.load(Ordering::SeqCst)
    }

    /// Whether both loops are still running.
    pub fn is_alive(&self) -> bool {
        !self.shared.shutdown.is_cancelled()
    }

    pub(crate) fn keepalive_gate(&self) -> &KeepaliveGate {
        &self.shared.keepalive
    }

    /// Time since the last message arrived from the server.
    pub fn receive_idle(&self) -> Duration {
        self.shared.last_received.lock().elapsed()
    }

    /// Send StartConnection and wait for ConnectionStarted.
    ///
    /// Returns `Timeout` or `HandshakeFailed` without reporting them; the
    /// caller decides how to surface the failure.
    pub async fn start_connection(&self) -> TTSResult<()> {
        self.ensure_open()?;
        self.shared.set_state(SessionState::ConnectionPending);
        self.shared
            .connection_signal
            .send_replace(HandshakeOutcome::Pending);
        let mut outcome = self.shared.connection_signal.subscribe();

        self.send_frame(Frame::client(
            EventType::StartConnection,
            None,
            EMPTY_PAYLOAD,
        ))
        .await?;

        match self.wait_handshake(&mut outcome, "Start connection").await {
            Ok(()) => {
                info!(
                    "Bytedance connection started: {}",
                    self.connection_id().unwrap_or_default()
                );
                Ok(())
            }
            Err(e) => {
                if self.shared.state() == SessionState::ConnectionPending {
                    self.shared.set_state(SessionState::Idle);
                }
                Err(e)
            }
        }
    }

    /// Send StartSession under a fresh session id and wait for SessionStarted.
    pub async fn start_session(&self) -> TTSResult<String> {
        self.ensure_open()?;

        let session_id = Uuid::new_v4().simple().to_string();
        *self.shared.pending_session_id.lock() = Some(session_id.clone());
        self.shared.set_state(SessionState::SessionPending);
        self.shared
            .session_signal
            .send_replace(HandshakeOutcome::Pending);
        let mut outcome = self.shared.session_signal.subscribe();

        let payload =
            RequestPayload::new(&self.config, EventType::StartSession, "").to_bytes()?;
        self.send_frame(Frame::client(
            EventType::StartSession,
            Some(&session_id),
            payload,
        ))
        .await?;

        let result = self.wait_handshake(&mut outcome, "Start session").await;
        self.shared.pending_session_id.lock().take();
        match result {
            Ok(()) => {
                info!("Bytedance session started: {}", session_id);
                Ok(session_id)
            }
            Err(e) => {
                if self.shared.state() == SessionState::SessionPending {
                    self.shared.set_state(SessionState::Connected);
                }
                Err(e)
            }
        }
    }

    /// Send one TaskRequest on the active session.
    pub async fn send_text(&self, text: &str) -> TTSResult<()> {
        let session_id = self.active_session()?;
        let payload = RequestPayload::new(&self.config, EventType::TaskRequest, text).to_bytes()?;
        debug!("Sending text ({} chars) on session {}", text.chars().count(), session_id);
        self.send_frame(Frame::client(
            EventType::TaskRequest,
            Some(&session_id),
            payload,
        ))
        .await
    }

    /// Send an empty TaskRequest and open the keepalive gate for `window`.
    ///
    /// Returns the ack count to pass to [`KeepaliveGate::wait_acked`].
    pub async fn send_keepalive(&self, window: Duration) -> TTSResult<u64> {
        let session_id = self.active_session()?;
        let payload = RequestPayload::new(&self.config, EventType::TaskRequest, "").to_bytes()?;
        let since = self.shared.keepalive.arm(window);
        let result = self
            .send_frame(Frame::client(
                EventType::TaskRequest,
                Some(&session_id),
                payload,
            ))
            .await;
        if result.is_err() {
            self.shared.keepalive.disarm();
        }
        result.map(|()| since)
    }

    /// Send FinishSession; no further text is accepted for this session.
    pub async fn finish_session(&self) -> TTSResult<()> {
        let session_id = self.active_session()?;
        self.shared.set_state(SessionState::SessionFinishing);
        info!("Finishing Bytedance session {}", session_id);
        self.send_frame(Frame::client(
            EventType::FinishSession,
            Some(&session_id),
            EMPTY_PAYLOAD,
        ))
        .await
    }

    /// Send FinishConnection. The next SessionFinished is terminal.
    pub async fn finish_connection(&self) -> TTSResult<()> {
        self.ensure_open()?;
        self.shared
            .connection_finishing
            .store(true, Ordering::SeqCst);
        info!("Finishing Bytedance connection");
        self.send_frame(Frame::client(
            EventType::FinishConnection,
            None,
            EMPTY_PAYLOAD,
        ))
        .await
    }

    /// Stop both loops immediately. Pending outbound frames are dropped.
    pub fn cancel(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        self.shared.finish(SessionExit::Cancelled);
    }

    /// Flush queued frames, close the socket and stop both loops.
    pub async fn close(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        if self.is_alive() {
            let flushed = async {
                if self.outbound.send(Outbound::Close).await.is_ok() {
                    self.shared.shutdown.cancelled().await;
                }
            };
            if tokio::time::timeout(CLOSE_TIMEOUT, flushed).await.is_err() {
                warn!("Transport session did not close in {:?}", CLOSE_TIMEOUT);
            }
        }
        self.shared.finish(SessionExit::Closed);
        self.join().await;
        self.shared.set_state(SessionState::Closed);
    }

    /// Wait until both loops have stopped and return why.
    pub async fn closed(&self) -> SessionExit {
        self.shared.shutdown.cancelled().await;
        self.join().await;
        self.shared
            .exit
            .lock()
            .clone()
            .unwrap_or(SessionExit::Cancelled)
    }

    async fn join(&self) {
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await
                && e.is_panic()
            {
                error!("Transport session task panicked: {}", e);
            }
        }
    }

    fn ensure_open(&self) -> TTSResult<()> {
        if self.is_closing() || !self.is_alive() {
            return Err(TTSError::NotConnected);
        }
        Ok(())
    }

    fn active_session(&self) -> TTSResult<String> {
        self.ensure_open()?;
        if self.shared.state() != SessionState::SessionActive {
            return Err(TTSError::SessionNotActive);
        }
        self.shared
            .session_id
            .lock()
            .clone()
            .ok_or(TTSError::SessionNotActive)
    }

    async fn send_frame(&self, frame: Frame) -> TTSResult<()> {
        trace!("Queueing {} frame", frame.event_type());
        self.outbound
            .send(Outbound::Frame(frame.encode()))
            .await
            .map_err(|_| TTSError::NotConnected)
    }

    async fn wait_handshake(
        &self,
        outcome: &mut watch::Receiver<HandshakeOutcome>,
        operation: &str,
    ) -> TTSResult<()> {
        let timeout = self.config.handshake_timeout;
        let result = tokio::select! {
            _ = self.shared.shutdown.cancelled() => return Err(TTSError::NotConnected),
            result = tokio::time::timeout(
                timeout,
                outcome.wait_for(|o| *o != HandshakeOutcome::Pending),
            ) => result.map(|r| r.map(|o| o.clone())),
        };

        let outcome = match result {
            Err(_) => {
                warn!("{} timed out after {:?}", operation, timeout);
                return Err(TTSError::Timeout(format!("{} timeout", operation)));
            }
            Ok(Err(_)) => return Err(TTSError::NotConnected),
            Ok(Ok(outcome)) => outcome,
        };

        match outcome {
            HandshakeOutcome::Succeeded => Ok(()),
            HandshakeOutcome::Failed(message) => {
                warn!("{} failed: {}", operation, message);
                Err(TTSError::HandshakeFailed(message))
            }
            HandshakeOutcome::Pending => Err(TTSError::InternalError(format!(
                "{} resolved without an outcome",
                operation
            ))),
        }
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

/// Map a websocket connect error to a handshake or transient failure.
pub(crate) fn classify_connect_error(err: tungstenite::Error) -> TTSError {
    use tungstenite::Error as WsError;
    match err {
        WsError::Http(response) => {
            TTSError::HandshakeRejected(format!("HTTP {}", response.status()))
        }
        WsError::HttpFormat(e) => TTSError::HandshakeRejected(e.to_string()),
        WsError::Url(e) => TTSError::HandshakeRejected(e.to_string()),
        WsError::Tls(e) => TTSError::HandshakeRejected(e.to_string()),
        WsError::Protocol(e) => TTSError::HandshakeRejected(e.to_string()),
        other => TTSError::ConnectionFailed(other.to_string()),
    }
}

// =============================================================================
// Loops
// =============================================================================

async fn send_loop(
    mut ws_sink: SplitSink<WsStream, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
    shared: Arc<SessionShared>,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => {
                shared.finish(SessionExit::Cancelled);
                break;
            }
            next = outbound.recv() => next,
        };

        let message = match next {
            Some(Outbound::Frame(data)) => Message::Binary(data),
            Some(Outbound::Pong(data)) => Message::Pong(data),
            Some(Outbound::Close) | None => {
                let _ = ws_sink.send(Message::Close(None)).await;
                let _ = ws_sink.close().await;
                shared.finish(SessionExit::Closed);
                break;
            }
        };

        if let Err(e) = ws_sink.send(message).await {
            error!("Failed to send websocket message: {}", e);
            shared.finish(SessionExit::Io(e.to_string()));
            break;
        }
    }
}

async fn receive_loop(mut ws_stream: SplitStream<WsStream>, router: FrameRouter) {
    let shared = router.shared.clone();
    loop {
        let next = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => {
                shared.finish(SessionExit::Cancelled);
                break;
            }
            next = ws_stream.next() => next,
        };

        if let Some(Ok(_)) = &next {
            *shared.last_received.lock() = Instant::now();
        }

        match next {
            None => {
                info!("Bytedance websocket stream ended");
                shared.finish(SessionExit::ClosedByPeer);
                break;
            }
            Some(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed)) => {
                shared.finish(SessionExit::ClosedByPeer);
                break;
            }
            Some(Err(e)) => {
                error!("Websocket receive error: {}", e);
                shared.finish(SessionExit::Io(e.to_string()));
                break;
            }
            Some(Ok(Message::Binary(data))) => match protocol::decode(&data) {
                Ok(frame) => router.route(frame).await,
                Err(e) => {
                    error!("Failed to decode Bytedance frame ({} bytes): {}", data.len(), e);
                    shared.finish(SessionExit::Decode(e.to_string()));
                    break;
                }
            },
            Some(Ok(Message::Text(text))) => {
                warn!("Unexpected text message from Bytedance: {}", text.as_str());
            }
            Some(Ok(Message::Ping(data))) => {
                if let Err(e) = router.outbound.try_send(Outbound::Pong(data)) {
                    debug!("Dropping pong: {}", e);
                }
            }
            Some(Ok(Message::Close(frame))) => {
                info!("Bytedance websocket closed by server: {:?}", frame);
                shared.finish(SessionExit::ClosedByPeer);
                break;
            }
            Some(Ok(_)) => {}
        }
    }
}

/// Applies decoded frames to session state and forwards caller-bound events.
struct FrameRouter {
    shared: Arc<SessionShared>,
    observer: Arc<dyn TtsObserver>,
    sink: ResponseSink,
    outbound: mpsc::Sender<Outbound>,
}

impl FrameRouter {
    async fn route(&self, frame: Frame) {
        if frame.header.message_type == MessageType::ErrorInformation {
            let code = frame.error_code.unwrap_or_default();
            let message = frame.error_message();
            warn!("Bytedance error information {}: {}", code, message);
            self.observer
                .on_error(ModuleError::non_fatal(message).with_vendor(VENDOR, code.to_string()))
                .await;
            return;
        }

        let event = frame.event_type();
        debug!(
            "Received {} (session {:?}, {} bytes)",
            event,
            frame.session_id,
            frame.payload.as_ref().map_or(0, |p| p.len())
        );

        match event {
            EventType::ConnectionStarted => {
                *self.shared.connection_id.lock() = frame.connection_id.clone();
                if self.shared.state() == SessionState::ConnectionPending {
                    self.shared.set_state(SessionState::Connected);
                }
                self.shared
                    .connection_signal
                    .send_replace(HandshakeOutcome::Succeeded);
            }
            EventType::ConnectionFailed => {
                let message = frame.error_message();
                if self.shared.state() == SessionState::ConnectionPending {
                    self.shared
                        .connection_signal
                        .send_replace(HandshakeOutcome::Failed(message));
                } else {
                    warn!("Unsolicited ConnectionFailed: {}", message);
                    self.observer
                        .on_error(
                            ModuleError::non_fatal(message)
                                .with_vendor(VENDOR, CODE_CONNECTION_FAILED),
                        )
                        .await;
                }
            }
            EventType::ConnectionFinished => {
                info!("Bytedance connection finished");
                self.shared.set_state(SessionState::Idle);
            }
            EventType::SessionStarted => self.on_session_started(&frame),
            EventType::SessionFailed => self.on_session_failed(frame).await,
            EventType::SessionFinished => self.on_session_finished(frame).await,
            EventType::SentenceStart => {
                let payload = json_or_empty(&frame);
                self.deliver(TtsResponse::new(event, frame.session_id, payload))
                    .await;
            }
            EventType::SentenceEnd => {
                let payload = json_or_empty(&frame);
                self.deliver(TtsResponse::new(event, frame.session_id, payload))
                    .await;
            }
            EventType::AudioChunk => match frame.payload {
                Some(audio) if !audio.is_empty() => {
                    self.deliver(TtsResponse::new(
                        event,
                        frame.session_id,
                        ResponsePayload::Audio(audio),
                    ))
                    .await;
                }
                _ => trace!("Skipping empty audio chunk"),
            },
            EventType::StartConnection
            | EventType::FinishConnection
            | EventType::StartSession
            | EventType::FinishSession
            | EventType::TaskRequest => {
                warn!("Ignoring client-side event {} from server", event);
            }
            EventType::None | EventType::Unknown(_) => {
                debug!("Ignoring unhandled event {}", event);
            }
        }
    }

    fn on_session_started(&self, frame: &Frame) {
        // SessionStarted also proves the connection handshake succeeded.
        if *self.shared.connection_signal.borrow() == HandshakeOutcome::Pending {
            self.shared
                .connection_signal
                .send_replace(HandshakeOutcome::Succeeded);
        }

        let pending = self.shared.pending_session_id.lock().clone();
        let Some(pending) = pending else {
            warn!("SessionStarted without a pending session: {:?}", frame.session_id);
            return;
        };
        if let Some(id) = frame.session_id.as_deref()
            && !id.is_empty()
            && id != pending
        {
            warn!(
                "Ignoring SessionStarted for stale session {} (pending {})",
                id, pending
            );
            return;
        }

        *self.shared.session_id.lock() = Some(pending);
        self.shared.set_state(SessionState::SessionActive);
        self.shared
            .session_signal
            .send_replace(HandshakeOutcome::Succeeded);
    }

    async fn on_session_failed(&self, frame: Frame) {
        let message = frame.error_message();
        if self.shared.state() == SessionState::SessionPending {
            self.shared
                .session_signal
                .send_replace(HandshakeOutcome::Failed(message));
            return;
        }

        warn!("Bytedance session failed: {}", message);
        self.shared.session_id.lock().take();
        self.shared.set_state(SessionState::Connected);
        self.observer
            .on_error(ModuleError::non_fatal(message).with_vendor(VENDOR, CODE_SESSION_FAILED))
            .await;
        let payload = json_or_empty(&frame);
        self.deliver(TtsResponse::new(
            EventType::SessionFailed,
            frame.session_id,
            payload,
        ))
        .await;
    }

    async fn on_session_finished(&self, frame: Frame) {
        match self.shared.state() {
            SessionState::SessionActive | SessionState::SessionFinishing => {
                self.shared.session_id.lock().take();
                if self.shared.connection_finishing.load(Ordering::SeqCst) {
                    self.shared.set_state(SessionState::SessionFinished);
                } else {
                    self.shared.set_state(SessionState::Connected);
                }
            }
            other => debug!("SessionFinished while {:?}", other),
        }

        let payload = json_or_empty(&frame);
        if let ResponsePayload::Json(meta) = &payload
            && let Some(words) = UsagePayload::text_words(meta)
        {
            self.observer.on_usage(words).await;
        }
        info!("Bytedance session finished: {:?}", frame.session_id);
        self.deliver(TtsResponse::new(
            EventType::SessionFinished,
            frame.session_id,
            payload,
        ))
        .await;
    }

    async fn deliver(&self, response: TtsResponse) {
        if self.shared.keepalive.try_consume(&response) {
            debug!("Keepalive consumed {} response", response.event);
            return;
        }
        tokio::select! {
            biased;
            _ = self.shared.shutdown.cancelled() => {}
            delivered = self.sink.send(response) => {
                if !delivered {
                    debug!("Response stream dropped; discarding response");
                }
            }
        }
    }
}

fn json_or_empty(frame: &Frame) -> ResponsePayload {
    frame
        .payload_json()
        .map(ResponsePayload::Json)
        .unwrap_or(ResponsePayload::Empty)
}
