//! Caller-facing duplex client with non-blocking cancellation.
//!
//! A [`BytedanceDuplexClient`] always has one current [`ClientInstance`]
//! (request queue + supervisor + transport session). `cancel()` starts a new
//! instance, swaps it in and tears the old one down in the background, so the
//! caller never waits on a socket close.
//!
//! Every response is tagged with the generation of the instance that produced
//! it. The generation is switched before the old instance is cancelled, and
//! [`TtsResponseStream`] drops anything tagged with a stale generation, so no
//! event from a superseded instance reaches the caller.

use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::config::BytedanceDuplexConfig;
use super::dispatcher::{DispatchCommand, Dispatcher, RequestQueue};
use super::messages::TtsResponse;
use super::supervisor::ConnectionSupervisor;
use crate::core::tts::base::{ConnectionState, TTSError, TTSResult, TtsObserver};

type TaggedResponse = (u64, TtsResponse);

// =============================================================================
// Response channel
// =============================================================================

/// Producer handle given to a transport session.
#[derive(Debug, Clone)]
pub struct ResponseSink {
    tx: mpsc::Sender<TaggedResponse>,
    generation: u64,
}

impl ResponseSink {
    pub(crate) fn new(tx: mpsc::Sender<TaggedResponse>, generation: u64) -> Self {
        Self { tx, generation }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Deliver a response; returns false when the stream is gone.
    pub async fn send(&self, response: TtsResponse) -> bool {
        self.tx.send((self.generation, response)).await.is_ok()
    }
}

/// Ordered stream of responses from the current instance.
#[derive(Debug)]
pub struct TtsResponseStream {
    rx: mpsc::Receiver<TaggedResponse>,
    current: Arc<AtomicU64>,
}

impl TtsResponseStream {
    /// Next response of the current instance. `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<TtsResponse> {
        loop {
            let (generation, response) = self.rx.recv().await?;
            if generation == self.current.load(Ordering::SeqCst) {
                return Some(response);
            }
            trace!(
                "Dropping {} from superseded instance {}",
                response.event, generation
            );
        }
    }
}

pub(crate) fn response_channel(
    capacity: usize,
    current: Arc<AtomicU64>,
) -> (mpsc::Sender<TaggedResponse>, TtsResponseStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (tx, TtsResponseStream { rx, current })
}

// =============================================================================
// Client Instance
// =============================================================================

/// One generation of the client: request queue, supervisor and its session.
pub struct ClientInstance {
    generation: u64,
    queue: RequestQueue,
    state: Arc<RwLock<ConnectionState>>,
    abort: CancellationToken,
    close: CancellationToken,
    closing: AtomicBool,
    finished: Arc<AtomicBool>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ClientInstance {
    /// Spawn the supervisor for a new instance. Must be called within a Tokio runtime.
    pub fn start(
        generation: u64,
        config: Arc<BytedanceDuplexConfig>,
        observer: Arc<dyn TtsObserver>,
        responses: mpsc::Sender<TaggedResponse>,
    ) -> Self {
        let (queue, rx) = RequestQueue::bounded(config.queue_capacity);
        let dispatcher = Dispatcher::new(rx, observer.clone(), &config);
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));
        let abort = CancellationToken::new();
        let close = CancellationToken::new();
        let finished = Arc::new(AtomicBool::new(false));

        let supervisor = ConnectionSupervisor::new(
            config,
            observer,
            ResponseSink::new(responses, generation),
            state.clone(),
            abort.clone(),
            close.clone(),
        );
        let task = tokio::spawn({
            let finished = finished.clone();
            async move {
                supervisor.run(dispatcher).await;
                finished.store(true, Ordering::SeqCst);
                debug!("Client instance {} finished", generation);
            }
        });

        Self {
            generation,
            queue,
            state,
            abort,
            close,
            closing: AtomicBool::new(false),
            finished,
            task: tokio::sync::Mutex::new(Some(task)),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the supervisor task has exited.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    pub fn send_text(&self, text: impl Into<String>) -> TTSResult<()> {
        self.enqueue(DispatchCommand::Text(text.into()))
    }

    pub fn finish_session(&self) -> TTSResult<()> {
        self.enqueue(DispatchCommand::FinishSession)
    }

    pub fn finish_connection(&self) -> TTSResult<()> {
        self.enqueue(DispatchCommand::FinishConnection)
    }

    fn enqueue(&self, command: DispatchCommand) -> TTSResult<()> {
        if self.closing.load(Ordering::SeqCst) || self.is_finished() {
            return Err(TTSError::NotConnected);
        }
        self.queue.push(command)
    }

    /// Stop the supervisor and its session immediately.
    pub fn cancel(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.abort.cancel();
    }

    /// Close the session gracefully and wait for the supervisor to exit.
    pub async fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.close.cancel();
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
            && e.is_panic()
        {
            tracing::error!("Client instance {} task panicked: {}", self.generation, e);
        }
    }
}

impl Drop for ClientInstance {
    fn drop(&mut self) {
        self.abort.cancel();
    }
}

// =============================================================================
// Duplex Client
// =============================================================================

/// Bidirectional streaming TTS client.
///
/// # Example
///
/// ```rust,ignore
/// let (client, mut responses) = BytedanceDuplexClient::start(config, observer)?;
/// client.send_text("Hello there.")?;
/// client.finish_session()?;
/// while let Some(response) = responses.recv().await {
///     if response.event == EventType::SessionFinished {
///         break;
///     }
/// }
/// client.close().await;
/// ```
pub struct BytedanceDuplexClient {
    config: Arc<BytedanceDuplexConfig>,
    observer: Arc<dyn TtsObserver>,
    responses: mpsc::Sender<TaggedResponse>,
    current_generation: Arc<AtomicU64>,
    next_generation: AtomicU64,
    current: ArcSwap<ClientInstance>,
    swap_lock: parking_lot::Mutex<()>,
    superseded: Arc<DashMap<u64, Arc<ClientInstance>>>,
    cleanup: CancellationToken,
    closed: AtomicBool,
}

impl BytedanceDuplexClient {
    /// Start the first instance and the superseded-instance sweep.
    ///
    /// Must be called within a Tokio runtime.
    pub fn start(
        config: BytedanceDuplexConfig,
        observer: Arc<dyn TtsObserver>,
    ) -> TTSResult<(Self, TtsResponseStream)> {
        config.validate()?;
        let config = Arc::new(config);

        let current_generation = Arc::new(AtomicU64::new(1));
        let (responses, stream) =
            response_channel(config.response_capacity, current_generation.clone());
        let instance = ClientInstance::start(1, config.clone(), observer.clone(), responses.clone());

        let superseded: Arc<DashMap<u64, Arc<ClientInstance>>> = Arc::new(DashMap::new());
        let cleanup = CancellationToken::new();
        tokio::spawn(cleanup_sweep(
            superseded.clone(),
            cleanup.clone(),
            config.cleanup_interval,
        ));

        info!("Bytedance duplex client started for speaker {}", config.speaker);

        let client = Self {
            config,
            observer,
            responses,
            current_generation,
            next_generation: AtomicU64::new(2),
            current: ArcSwap::from_pointee(instance),
            swap_lock: parking_lot::Mutex::new(()),
            superseded,
            cleanup,
            closed: AtomicBool::new(false),
        };
        Ok((client, stream))
    }

    pub fn config(&self) -> &BytedanceDuplexConfig {
        &self.config
    }

    /// Generation of the current instance.
    pub fn generation(&self) -> u64 {
        self.current_generation.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectionState {
        self.current.load().state()
    }

    /// Superseded instances whose teardown has not been swept yet.
    pub fn superseded_count(&self) -> usize {
        self.superseded.len()
    }

    /// Queue text for the current instance.
    pub fn send_text(&self, text: impl Into<String>) -> TTSResult<()> {
        self.ensure_open()?;
        self.current.load().send_text(text)
    }

    pub fn finish_session(&self) -> TTSResult<()> {
        self.ensure_open()?;
        self.current.load().finish_session()
    }

    pub fn finish_connection(&self) -> TTSResult<()> {
        self.ensure_open()?;
        self.current.load().finish_connection()
    }

    /// Swap in a fresh instance and tear the old one down in the background.
    ///
    /// Returns without waiting for the network. The new instance accepts text
    /// immediately.
    pub fn cancel(&self) {
        self.swap_instance("cancel");
    }

    /// Start over on a fresh connection; same mechanics as [`cancel`](Self::cancel).
    pub fn reset(&self) {
        self.swap_instance("reset");
    }

    fn swap_instance(&self, reason: &str) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }

        let old = {
            let _guard = self.swap_lock.lock();
            let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
            let instance = Arc::new(ClientInstance::start(
                generation,
                self.config.clone(),
                self.observer.clone(),
                self.responses.clone(),
            ));
            self.current_generation.store(generation, Ordering::SeqCst);
            self.current.swap(instance)
        };

        info!(
            "Client instance {} superseded by {} ({})",
            old.generation(),
            self.generation(),
            reason
        );

        old.cancel();
        self.superseded.insert(old.generation(), old.clone());
        tokio::spawn(async move {
            old.close().await;
            debug!("Superseded instance {} closed", old.generation());
        });
    }

    /// Close the current and every superseded instance.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cleanup.cancel();

        let current = self.current.load_full();
        current.close().await;

        let superseded: Vec<Arc<ClientInstance>> =
            self.superseded.iter().map(|e| e.value().clone()).collect();
        for instance in superseded {
            instance.close().await;
        }
        self.superseded.clear();
        info!("Bytedance duplex client closed");
    }

    fn ensure_open(&self) -> TTSResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TTSError::NotConnected);
        }
        Ok(())
    }
}

impl Drop for BytedanceDuplexClient {
    fn drop(&mut self) {
        self.cleanup.cancel();
        self.current.load().cancel();
        for entry in self.superseded.iter() {
            entry.value().cancel();
        }
    }
}

/// Periodically forget superseded instances whose teardown completed.
async fn cleanup_sweep(
    superseded: Arc<DashMap<u64, Arc<ClientInstance>>>,
    cancel: CancellationToken,
    interval: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let before = superseded.len();
                superseded.retain(|_, instance| !instance.is_finished());
                let removed = before - superseded.len();
                if removed > 0 {
                    debug!("Swept {} superseded instances ({} remaining)", removed, superseded.len());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tts::bytedance::messages::ResponsePayload;
    use crate::core::tts::bytedance::protocol::EventType;

    fn response(event: EventType) -> TtsResponse {
        TtsResponse::new(event, None, ResponsePayload::Empty)
    }

    #[tokio::test]
    async fn test_stream_drops_stale_generations() {
        let current = Arc::new(AtomicU64::new(1));
        let (tx, mut stream) = response_channel(16, current.clone());
        let old = ResponseSink::new(tx.clone(), 1);
        let new = ResponseSink::new(tx, 2);

        assert!(old.send(response(EventType::AudioChunk)).await);
        current.store(2, Ordering::SeqCst);
        assert!(old.send(response(EventType::SentenceEnd)).await);
        assert!(new.send(response(EventType::SessionFinished)).await);

        // Both old-generation responses are stale once the generation moved.
        let next = stream.recv().await.unwrap();
        assert_eq!(next.event, EventType::SessionFinished);
    }

    #[tokio::test]
    async fn test_stream_ends_when_producers_dropped() {
        let current = Arc::new(AtomicU64::new(1));
        let (tx, mut stream) = response_channel(4, current);
        drop(tx);
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_sink_reports_dropped_stream() {
        let current = Arc::new(AtomicU64::new(1));
        let (tx, stream) = response_channel(4, current);
        drop(stream);
        let sink = ResponseSink::new(tx, 1);
        assert!(!sink.send(response(EventType::AudioChunk)).await);
        assert_eq!(sink.generation(), 1);
    }
}
