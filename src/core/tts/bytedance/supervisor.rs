//! Connection supervisor: keeps one logical client alive across transport failures.

use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::client::ResponseSink;
use super::config::BytedanceDuplexConfig;
use super::dispatcher::{DispatchExit, Dispatcher};
use super::session::{SessionExit, TransportSession};
use super::{CODE_CONNECTION_FAILED, VENDOR, handshake_error};
use crate::core::tts::base::{
    ConnectionState, ModuleError, ReconnectionEvent, TTSError, TTSResult, TtsObserver,
};

/// How a supervised connection ended.
enum Outcome {
    Abort,
    Close,
    Exit(SessionExit),
    Dispatch(TTSResult<DispatchExit>),
}

/// Reconnect loop around [`TransportSession`].
///
/// Connect failures are classified as handshake-class (rejected upgrade,
/// URL, TLS) with a small retry budget, or transient (refused, reset,
/// closed) which are retried until an optional hard cap. Exhausting either
/// budget, or undecodable frames on consecutive connections, ends the loop
/// with exactly one fatal failure report.
pub struct ConnectionSupervisor {
    config: Arc<BytedanceDuplexConfig>,
    observer: Arc<dyn TtsObserver>,
    sink: ResponseSink,
    state: Arc<RwLock<ConnectionState>>,
    abort: CancellationToken,
    close: CancellationToken,
    fatal_reported: AtomicBool,
}

impl ConnectionSupervisor {
    pub fn new(
        config: Arc<BytedanceDuplexConfig>,
        observer: Arc<dyn TtsObserver>,
        sink: ResponseSink,
        state: Arc<RwLock<ConnectionState>>,
        abort: CancellationToken,
        close: CancellationToken,
    ) -> Self {
        Self {
            config,
            observer,
            sink,
            state,
            abort,
            close,
            fatal_reported: AtomicBool::new(false),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    fn stopping(&self) -> bool {
        self.abort.is_cancelled() || self.close.is_cancelled()
    }

    /// Run until cancelled, closed or failed.
    pub async fn run(self, mut dispatcher: Dispatcher) {
        let reconnection = self.config.reconnection.clone();
        let mut handshake_failures: u32 = 0;
        let mut transient_failures: u32 = 0;
        let mut protocol_violations: u32 = 0;
        let mut delay: Option<u64> = None;
        let mut first_attempt = true;

        loop {
            if let Some(delay_ms) = delay.take() {
                tokio::select! {
                    _ = self.abort.cancelled() => break,
                    _ = self.close.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                }
            }
            if self.stopping() {
                break;
            }

            self.set_state(if first_attempt {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting
            });
            first_attempt = false;

            let connected = tokio::select! {
                _ = self.abort.cancelled() => break,
                _ = self.close.cancelled() => break,
                result = TransportSession::connect(
                    self.config.clone(),
                    self.observer.clone(),
                    self.sink.clone(),
                ) => result,
            };

            let session = match connected {
                Ok(session) => session,
                Err(TTSError::InvalidConfiguration(reason)) => {
                    self.fail_fatally(TTSError::InvalidConfiguration(reason))
                        .await;
                    return;
                }
                Err(e) => {
                    let (attempt, allowed) = match e {
                        TTSError::HandshakeRejected(_) => {
                            handshake_failures += 1;
                            (
                                handshake_failures,
                                reconnection.should_retry(handshake_failures),
                            )
                        }
                        _ => {
                            transient_failures += 1;
                            (
                                transient_failures,
                                reconnection.should_retry_transient(transient_failures),
                            )
                        }
                    };
                    warn!("Bytedance connect attempt failed ({}): {}", attempt, e);

                    if !allowed {
                        self.fail_fatally(TTSError::ConnectionExhausted {
                            attempts: attempt,
                            reason: e.to_string(),
                        })
                        .await;
                        return;
                    }

                    let delay_ms = reconnection.calculate_delay(attempt);
                    self.observer
                        .on_reconnect(ReconnectionEvent {
                            attempt,
                            delay_ms,
                            error: Some(e.to_string()),
                        })
                        .await;
                    info!("Reconnecting to Bytedance in {}ms (attempt {})", delay_ms, attempt);
                    delay = Some(delay_ms);
                    continue;
                }
            };

            self.set_state(ConnectionState::Connected);
            // Session state is per connection; a stale SessionStarted can never
            // match the fresh dispatcher.
            dispatcher.reset();

            let started = tokio::select! {
                _ = self.abort.cancelled() => None,
                _ = self.close.cancelled() => None,
                result = session.start_connection() => Some(result),
            };
            match started {
                None => {}
                Some(Ok(())) => {
                    handshake_failures = 0;
                    transient_failures = 0;
                }
                Some(Err(e)) if e.is_transport() => debug!("Start connection aborted: {}", e),
                Some(Err(e)) => {
                    self.observer
                        .on_error(handshake_error(&e, "Start connection", CODE_CONNECTION_FAILED))
                        .await;
                }
            }

            let outcome = tokio::select! {
                _ = self.abort.cancelled() => Outcome::Abort,
                _ = self.close.cancelled() => Outcome::Close,
                exit = session.closed() => Outcome::Exit(exit),
                result = dispatcher.run(&session) => Outcome::Dispatch(result),
            };

            let exit = match outcome {
                Outcome::Abort => {
                    session.cancel();
                    break;
                }
                Outcome::Close => {
                    session.close().await;
                    break;
                }
                Outcome::Dispatch(Ok(DispatchExit::QueueClosed)) => {
                    info!("Request queue closed; closing Bytedance connection");
                    session.close().await;
                    break;
                }
                Outcome::Dispatch(Err(e)) => {
                    debug!("Dispatcher stopped on transport error: {}", e);
                    session.closed().await
                }
                Outcome::Exit(exit) => exit,
            };

            if self.stopping() {
                break;
            }

            if let Some(command) = dispatcher.take_in_flight() {
                warn!("Connection lost while executing {}", command.describe());
                self.observer
                    .on_error(
                        ModuleError::non_fatal(format!(
                            "{} dropped: connection lost before it completed",
                            command.describe()
                        ))
                        .with_vendor(VENDOR, CODE_CONNECTION_FAILED),
                    )
                    .await;
            }

            // Only back-to-back undecodable connections count towards the budget.
            if !matches!(exit, SessionExit::Decode(_)) {
                protocol_violations = 0;
            }

            match exit {
                SessionExit::Decode(reason) => {
                    protocol_violations += 1;
                    warn!(
                        "Protocol violation {} on Bytedance connection: {}",
                        protocol_violations, reason
                    );
                    if !reconnection.should_retry(protocol_violations) {
                        self.fail_fatally(TTSError::ConnectionExhausted {
                            attempts: protocol_violations,
                            reason: format!("unrecoverable protocol violation: {}", reason),
                        })
                        .await;
                        return;
                    }
                    delay = self
                        .schedule_after_drop(&mut transient_failures, Some(reason))
                        .await;
                }
                exit @ (SessionExit::ClosedByPeer | SessionExit::Io(_)) => {
                    let reason = match exit {
                        SessionExit::Io(reason) => reason,
                        _ => "connection closed by server".to_string(),
                    };
                    info!("Bytedance connection lost: {}", reason);
                    if !reconnection.enabled {
                        self.fail_fatally(TTSError::ConnectionFailed(reason)).await;
                        return;
                    }
                    delay = self
                        .schedule_after_drop(&mut transient_failures, Some(reason))
                        .await;
                }
                SessionExit::Cancelled | SessionExit::Closed => {
                    debug!("Transport session stopped locally");
                    delay = self
                        .schedule_after_drop(&mut transient_failures, None)
                        .await;
                }
            }

            if self.fatal_reported.load(Ordering::SeqCst) {
                return;
            }
        }

        if !self.fatal_reported.load(Ordering::SeqCst) {
            self.set_state(ConnectionState::Disconnected);
        }
        debug!("Connection supervisor stopped");
    }

    /// Count a dropped connection and pick the delay before the next attempt.
    ///
    /// The first drop after a healthy connection reconnects immediately.
    async fn schedule_after_drop(
        &self,
        transient_failures: &mut u32,
        reason: Option<String>,
    ) -> Option<u64> {
        *transient_failures += 1;
        let attempt = *transient_failures;
        let reconnection = &self.config.reconnection;

        if !reconnection.should_retry_transient(attempt) {
            self.fail_fatally(TTSError::ConnectionExhausted {
                attempts: attempt,
                reason: reason.unwrap_or_else(|| "connection lost".to_string()),
            })
            .await;
            return None;
        }

        let delay_ms = if attempt == 1 {
            0
        } else {
            reconnection.calculate_delay(attempt - 1)
        };
        self.set_state(ConnectionState::Reconnecting);
        self.observer
            .on_reconnect(ReconnectionEvent {
                attempt,
                delay_ms,
                error: reason,
            })
            .await;
        (delay_ms > 0).then_some(delay_ms)
    }

    /// Report an unrecoverable failure exactly once.
    async fn fail_fatally(&self, err: TTSError) {
        self.set_state(ConnectionState::Failed);
        if self.fatal_reported.swap(true, Ordering::SeqCst) {
            return;
        }
        error!("Bytedance TTS connection failed permanently: {}", err);
        let module_error = ModuleError::fatal(err.to_string());
        self.observer.on_error(module_error.clone()).await;
        self.observer.on_fatal_failure(module_error).await;
    }
}
