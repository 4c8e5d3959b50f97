//! Request queue and dispatcher.
//!
//! Caller commands are pushed onto a bounded queue and consumed by a single
//! dispatcher that writes them to the current transport session in FIFO
//! order. The dispatcher starts a session lazily on the first text of a
//! request and, when configured, sends a keepalive once neither the queue
//! nor the socket has seen traffic for the keepalive interval.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::BytedanceDuplexConfig;
use super::session::{SessionState, TransportSession};
use super::{CODE_KEEPALIVE_TIMEOUT, CODE_SESSION_FAILED, VENDOR, handshake_error};
use crate::core::tts::base::{ModuleError, TTSError, TTSResult, TtsObserver};

/// A caller command waiting for the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchCommand {
    Text(String),
    FinishSession,
    FinishConnection,
}

impl DispatchCommand {
    /// Short description for logs and error reports; text content is left out.
    pub fn describe(&self) -> String {
        match self {
            DispatchCommand::Text(text) => format!("text ({} chars)", text.chars().count()),
            DispatchCommand::FinishSession => "finish_session".to_string(),
            DispatchCommand::FinishConnection => "finish_connection".to_string(),
        }
    }
}

/// Producer side of the bounded request queue.
#[derive(Debug, Clone)]
pub struct RequestQueue {
    tx: mpsc::Sender<DispatchCommand>,
    capacity: usize,
}

impl RequestQueue {
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<DispatchCommand>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                capacity: capacity.max(1),
            },
            rx,
        )
    }

    /// Enqueue without waiting; fails fast when the queue is at capacity.
    pub fn push(&self, command: DispatchCommand) -> TTSResult<()> {
        self.tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TTSError::QueueFull {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => TTSError::NotConnected,
        })
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Why [`Dispatcher::run`] returned without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchExit {
    /// Every producer is gone
    QueueClosed,
}

/// Single consumer of the request queue.
pub struct Dispatcher {
    rx: mpsc::Receiver<DispatchCommand>,
    observer: Arc<dyn TtsObserver>,
    keepalive_interval: Option<Duration>,
    keepalive_ack_timeout: Duration,
    session_started: bool,
    last_command: Instant,
    in_flight: Option<DispatchCommand>,
}

impl Dispatcher {
    pub fn new(
        rx: mpsc::Receiver<DispatchCommand>,
        observer: Arc<dyn TtsObserver>,
        config: &BytedanceDuplexConfig,
    ) -> Self {
        Self {
            rx,
            observer,
            keepalive_interval: config.keepalive_interval,
            keepalive_ack_timeout: config.keepalive_ack_timeout,
            session_started: false,
            last_command: Instant::now(),
            in_flight: None,
        }
    }

    /// Forget session state; called on every new connection.
    pub fn reset(&mut self) {
        self.session_started = false;
        self.in_flight = None;
    }

    /// The command that was being executed when [`Dispatcher::run`] stopped
    /// or was dropped, if it did not complete.
    pub fn take_in_flight(&mut self) -> Option<DispatchCommand> {
        self.in_flight.take()
    }

    pub fn session_started(&self) -> bool {
        self.session_started
    }

    /// Consume commands until the queue closes.
    ///
    /// Returns an error only when the transport is gone; every other failure
    /// is reported to the observer and the loop continues.
    pub async fn run(&mut self, session: &TransportSession) -> TTSResult<DispatchExit> {
        loop {
            let Some(command) = self.next_command(session).await? else {
                return Ok(DispatchExit::QueueClosed);
            };
            self.in_flight = Some(command.clone());
            self.execute(session, command).await?;
            self.in_flight = None;
        }
    }

    async fn next_command(
        &mut self,
        session: &TransportSession,
    ) -> TTSResult<Option<DispatchCommand>> {
        loop {
            let interval = match self.keepalive_interval {
                Some(interval)
                    if self.session_started && session.state() == SessionState::SessionActive =>
                {
                    interval
                }
                _ => {
                    let command = self.rx.recv().await;
                    self.last_command = Instant::now();
                    return Ok(command);
                }
            };

            // Audio still streaming for earlier text counts as activity.
            let idle = self.last_command.elapsed().min(session.receive_idle());
            if idle >= interval {
                self.keepalive(session, idle).await?;
                self.last_command = Instant::now();
                continue;
            }

            if let Ok(command) = tokio::time::timeout(interval - idle, self.rx.recv()).await {
                self.last_command = Instant::now();
                return Ok(command);
            }
        }
    }

    async fn execute(
        &mut self,
        session: &TransportSession,
        command: DispatchCommand,
    ) -> TTSResult<()> {
        match command {
            DispatchCommand::Text(text) => {
                if self.session_started && session.state() != SessionState::SessionActive {
                    debug!("Session ended by server; starting a new one");
                    self.session_started = false;
                }
                if !self.session_started && !self.start_session(session).await? {
                    warn!(
                        "Dropping text ({} chars): session could not be started",
                        text.chars().count()
                    );
                    return Ok(());
                }
                tolerate(session.send_text(&text).await, "Send text")
            }
            DispatchCommand::FinishSession => {
                if !self.session_started {
                    debug!("No session started; skipping finish_session");
                    return Ok(());
                }
                self.session_started = false;
                tolerate(session.finish_session().await, "Finish session")
            }
            DispatchCommand::FinishConnection => {
                self.session_started = false;
                tolerate(session.finish_connection().await, "Finish connection")
            }
        }
    }

    /// Returns whether the session is now active.
    async fn start_session(&mut self, session: &TransportSession) -> TTSResult<bool> {
        match session.start_session().await {
            Ok(session_id) => {
                debug!("Dispatcher bound to session {}", session_id);
                self.session_started = true;
                Ok(true)
            }
            Err(e) if e.is_transport() => Err(e),
            Err(e) => {
                self.observer
                    .on_error(handshake_error(&e, "Start session", CODE_SESSION_FAILED))
                    .await;
                Ok(false)
            }
        }
    }

    async fn keepalive(&mut self, session: &TransportSession, idle: Duration) -> TTSResult<()> {
        debug!("Idle for {:?}; sending keepalive", idle);
        let since = match session.send_keepalive(self.keepalive_ack_timeout).await {
            Ok(since) => since,
            Err(e) if e.is_transport() => return Err(e),
            Err(e) => {
                debug!("Keepalive skipped: {}", e);
                return Ok(());
            }
        };

        if session
            .keepalive_gate()
            .wait_acked(since, self.keepalive_ack_timeout)
            .await
        {
            debug!("Keepalive acknowledged");
        } else {
            warn!(
                "Keepalive not acknowledged within {:?}",
                self.keepalive_ack_timeout
            );
            self.observer
                .on_error(
                    ModuleError::non_fatal("Keepalive response timeout")
                        .with_vendor(VENDOR, CODE_KEEPALIVE_TIMEOUT),
                )
                .await;
        }
        Ok(())
    }
}

/// Propagate transport failures; log the rest.
fn tolerate(result: TTSResult<()>, operation: &str) -> TTSResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_transport() => Err(e),
        Err(e) => {
            info!("{} skipped: {}", operation, e);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_fails_fast_when_full() {
        let (queue, _rx) = RequestQueue::bounded(2);
        queue.push(DispatchCommand::Text("a".into())).unwrap();
        queue.push(DispatchCommand::Text("b".into())).unwrap();
        assert_eq!(queue.len(), 2);

        let err = queue.push(DispatchCommand::FinishSession).unwrap_err();
        assert_eq!(err, TTSError::QueueFull { capacity: 2 });
    }

    #[test]
    fn test_queue_closed_after_consumer_dropped() {
        let (queue, rx) = RequestQueue::bounded(4);
        drop(rx);
        assert_eq!(
            queue.push(DispatchCommand::FinishConnection),
            Err(TTSError::NotConnected)
        );
    }

    #[tokio::test]
    async fn test_queue_preserves_order() {
        let (queue, mut rx) = RequestQueue::bounded(8);
        for text in ["one", "two", "three"] {
            queue.push(DispatchCommand::Text(text.into())).unwrap();
        }
        queue.push(DispatchCommand::FinishSession).unwrap();

        assert_eq!(rx.recv().await, Some(DispatchCommand::Text("one".into())));
        assert_eq!(rx.recv().await, Some(DispatchCommand::Text("two".into())));
        assert_eq!(rx.recv().await, Some(DispatchCommand::Text("three".into())));
        assert_eq!(rx.recv().await, Some(DispatchCommand::FinishSession));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_describe_leaves_out_text() {
        let command = DispatchCommand::Text("secret words".into());
        assert_eq!(command.describe(), "text (12 chars)");
        assert_eq!(DispatchCommand::FinishSession.describe(), "finish_session");
    }

    #[test]
    fn test_tolerate_only_propagates_transport_errors() {
        assert!(tolerate(Err(TTSError::SessionNotActive), "op").is_ok());
        assert!(tolerate(Err(TTSError::NotConnected), "op").is_err());
    }
}
