//! Base types shared by the duplex TTS engine.
//!
//! This module defines the error taxonomy, the observer interface through which
//! errors, usage and terminal failures are reported, and the reconnection policy
//! used by the connection supervisor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while driving a duplex TTS connection.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TTSError {
    /// Transient connection failure (refused, reset, closed by peer)
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The websocket upgrade was rejected or could not be negotiated
    #[error("Handshake rejected: {0}")]
    HandshakeRejected(String),

    /// Reconnection budget exhausted
    #[error("Connection exhausted after {attempts} attempts: {reason}")]
    ConnectionExhausted { attempts: u32, reason: String },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The vendor answered a handshake request with a failure event
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// A frame could not be decoded
    #[error("Frame decode error: {0}")]
    Decode(String),

    /// Error reported by the vendor, forwarded unmodified
    #[error("Provider error {code}: {message}")]
    ProviderError { code: String, message: String },

    /// The request queue is at capacity
    #[error("Request queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// Text was submitted while no session is active
    #[error("No active session")]
    SessionNotActive,

    /// Not connected, or the instance was closed
    #[error("Not connected")]
    NotConnected,

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl TTSError {
    /// Whether this error means the underlying transport is gone.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            TTSError::ConnectionFailed(_) | TTSError::WebSocketError(_) | TTSError::NotConnected
        )
    }
}

impl From<serde_json::Error> for TTSError {
    fn from(err: serde_json::Error) -> Self {
        TTSError::SerializationError(err.to_string())
    }
}

/// Result type for TTS operations.
pub type TTSResult<T> = Result<T, TTSError>;

// =============================================================================
// Module Errors (observer-facing)
// =============================================================================

/// Severity code attached to errors reported through [`TtsObserver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleErrorCode {
    /// The stream is dead; the owning instance must be discarded
    FatalError,
    /// The stream may continue
    NonFatalError,
}

impl ModuleErrorCode {
    /// Numeric code used by the host runtime.
    #[inline]
    pub const fn as_i64(&self) -> i64 {
        match self {
            Self::FatalError => -1000,
            Self::NonFatalError => 1000,
        }
    }
}

/// Vendor-side details of an error.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VendorErrorInfo {
    pub vendor: String,
    pub code: String,
    pub message: String,
}

/// Error delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleError {
    pub code: ModuleErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_info: Option<VendorErrorInfo>,
}

impl ModuleError {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            code: ModuleErrorCode::FatalError,
            message: message.into(),
            vendor_info: None,
        }
    }

    pub fn non_fatal(message: impl Into<String>) -> Self {
        Self {
            code: ModuleErrorCode::NonFatalError,
            message: message.into(),
            vendor_info: None,
        }
    }

    /// Attach vendor details; the vendor message mirrors `self.message`.
    pub fn with_vendor(mut self, vendor: &str, code: impl Into<String>) -> Self {
        self.vendor_info = Some(VendorErrorInfo {
            vendor: vendor.to_string(),
            code: code.into(),
            message: self.message.clone(),
        });
        self
    }

    #[inline]
    pub fn is_fatal(&self) -> bool {
        self.code == ModuleErrorCode::FatalError
    }

    /// Vendor code, if any.
    pub fn vendor_code(&self) -> Option<&str> {
        self.vendor_info.as_ref().map(|v| v.code.as_str())
    }
}

impl fmt::Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.vendor_info {
            Some(info) => write!(
                f,
                "[{}] {} ({}: {})",
                self.code.as_i64(),
                self.message,
                info.vendor,
                info.code
            ),
            None => write!(f, "[{}] {}", self.code.as_i64(), self.message),
        }
    }
}

// =============================================================================
// Reconnection
// =============================================================================

/// Configuration for automatic reconnection behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectionConfig {
    /// Enable automatic reconnection on connection loss.
    /// Default: true
    pub enabled: bool,

    /// Retry budget for handshake-class failures (rejected upgrade, bad URL, TLS).
    /// Set to 0 for unlimited attempts.
    /// Default: 5
    pub max_attempts: u32,

    /// Hard cap for transient failures (refused, reset, closed).
    /// 0 retries them indefinitely.
    /// Default: 0
    pub max_transient_attempts: u32,

    /// Initial delay between reconnection attempts (milliseconds).
    /// Default: 500ms
    pub initial_delay_ms: u64,

    /// Maximum delay between reconnection attempts (milliseconds).
    /// Default: 10000ms
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff.
    /// Default: 2.0
    pub backoff_multiplier: f32,

    /// Whether to add jitter to the delay to prevent thundering herd.
    /// Default: true
    pub jitter: bool,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            max_transient_attempts: 0,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ReconnectionConfig {
    /// Create a config with reconnection disabled.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number using exponential backoff.
    /// Returns the delay in milliseconds.
    ///
    /// Jitter only adds time and never reaches the next attempt's base delay,
    /// so consecutive delays are non-decreasing up to `max_delay_ms`.
    pub fn calculate_delay(&self, attempt: u32) -> u64 {
        let delay = self.base_delay(attempt);

        if self.jitter {
            // Up to 25% extra, bounded by the next un-jittered delay
            let ceiling = (delay * 1.25).min(self.base_delay(attempt.saturating_add(1)));
            let spread = (ceiling - delay).max(0.0);
            (delay + spread * rand_unit()) as u64
        } else {
            delay as u64
        }
    }

    /// Exponential backoff without jitter: initial_delay * multiplier^(attempt-1), capped.
    fn base_delay(&self, attempt: u32) -> f64 {
        let base_delay = self.initial_delay_ms as f64;
        let multiplier = self.backoff_multiplier as f64;
        let delay = base_delay * multiplier.powi(attempt.saturating_sub(1) as i32);
        delay.min(self.max_delay_ms as f64)
    }

    /// Check if another attempt is allowed after `attempt` handshake-class failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.enabled && (self.max_attempts == 0 || attempt < self.max_attempts)
    }

    /// Check if another attempt is allowed after `attempt` transient failures.
    pub fn should_retry_transient(&self, attempt: u32) -> bool {
        self.enabled && (self.max_transient_attempts == 0 || attempt < self.max_transient_attempts)
    }
}

/// Pseudo-random value in `0.0..1.0` from a clock-seeded LCG.
fn rand_unit() -> f64 {
    use std::time::SystemTime;
    let seed = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    let random = ((seed.wrapping_mul(1103515245).wrapping_add(12345)) % (1 << 31)) as f64;
    random / (1u64 << 31) as f64
}

/// Reported to observers before each reconnection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectionEvent {
    /// Consecutive failure count that led to this attempt
    pub attempt: u32,
    /// Delay before the attempt (milliseconds)
    pub delay_ms: u64,
    /// Error that caused the reconnection, if any
    pub error: Option<String>,
}

// =============================================================================
// Connection State
// =============================================================================

/// Connection state of a supervised client instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected to the provider
    #[default]
    Disconnected,
    /// Currently connecting
    Connecting,
    /// Connected and ready
    Connected,
    /// Reconnecting after connection loss
    Reconnecting,
    /// Retries exhausted; the instance is dead
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Reconnecting => write!(f, "Reconnecting"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

// =============================================================================
// Observer
// =============================================================================

/// Listener for errors, usage and terminal failures.
///
/// The transport session, supervisor and dispatcher hold an
/// `Arc<dyn TtsObserver>`; implementations must be cheap and must not block.
#[async_trait]
pub trait TtsObserver: Send + Sync {
    /// Called for every error surfaced by the engine.
    async fn on_error(&self, error: ModuleError);

    /// Called with the billed character count when a session finishes.
    async fn on_usage(&self, _characters: u64) {}

    /// Called exactly once per instance when it can no longer recover.
    async fn on_fatal_failure(&self, error: ModuleError);

    /// Called before each reconnection attempt.
    async fn on_reconnect(&self, _event: ReconnectionEvent) {}
}

/// Observer that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingObserver;

#[async_trait]
impl TtsObserver for LoggingObserver {
    async fn on_error(&self, error: ModuleError) {
        tracing::warn!("TTS error: {}", error);
    }

    async fn on_usage(&self, characters: u64) {
        tracing::info!("TTS usage: {} characters", characters);
    }

    async fn on_fatal_failure(&self, error: ModuleError) {
        tracing::error!("TTS fatal failure: {}", error);
    }

    async fn on_reconnect(&self, event: ReconnectionEvent) {
        tracing::info!(
            "TTS reconnecting (attempt {}) in {}ms",
            event.attempt,
            event.delay_ms
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_reconnection_config() {
        let config = ReconnectionConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.max_transient_attempts, 0);
        assert!(config.should_retry(4));
        assert!(!config.should_retry(5));
        assert!(config.should_retry_transient(10_000));
    }

    #[test]
    fn test_reconnection_disabled() {
        let config = ReconnectionConfig::disabled();
        assert!(!config.should_retry(0));
        assert!(!config.should_retry_transient(0));
    }

    #[test]
    fn test_backoff_non_decreasing_and_capped() {
        let config = ReconnectionConfig {
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            backoff_multiplier: 2.0,
            jitter: false,
            ..Default::default()
        };

        let delays: Vec<u64> = (1..=10).map(|a| config.calculate_delay(a)).collect();
        assert_eq!(&delays[..5], &[100, 200, 400, 800, 1000]);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= 1000));
    }

    #[test]
    fn test_jitter_never_exceeds_cap() {
        let config = ReconnectionConfig {
            initial_delay_ms: 1000,
            max_delay_ms: 1000,
            jitter: true,
            ..Default::default()
        };
        for attempt in 1..20 {
            assert!(config.calculate_delay(attempt) <= 1000);
        }
    }

    #[test]
    fn test_default_jittered_backoff_never_decreases() {
        let config = ReconnectionConfig::default();
        assert!(config.jitter);
        for _ in 0..2000 {
            let delays: Vec<u64> = (1..=8).map(|a| config.calculate_delay(a)).collect();
            assert!(
                delays.windows(2).all(|w| w[0] <= w[1]),
                "delays decreased: {:?}",
                delays
            );
            assert!(delays[0] >= 500);
            assert_eq!(delays[7], 10_000);
        }
    }

    #[test]
    fn test_reconnection_config_deserialize_partial() {
        let config: ReconnectionConfig =
            serde_json::from_str(r#"{"max_attempts": 2, "jitter": false}"#).unwrap();
        assert_eq!(config.max_attempts, 2);
        assert!(!config.jitter);
        assert_eq!(config.initial_delay_ms, 500);
    }

    #[test]
    fn test_module_error_vendor_info() {
        let err = ModuleError::non_fatal("Start session timeout").with_vendor("bytedance", "TIMEOUT");
        assert!(!err.is_fatal());
        assert_eq!(err.vendor_code(), Some("TIMEOUT"));
        assert_eq!(err.code.as_i64(), 1000);
        assert!(err.to_string().contains("TIMEOUT"));

        let fatal = ModuleError::fatal("retries exhausted");
        assert!(fatal.is_fatal());
        assert_eq!(fatal.code.as_i64(), -1000);
    }

    #[test]
    fn test_transport_classification() {
        assert!(TTSError::ConnectionFailed("reset".into()).is_transport());
        assert!(TTSError::NotConnected.is_transport());
        assert!(!TTSError::Timeout("x".into()).is_transport());
        assert!(!TTSError::QueueFull { capacity: 1 }.is_transport());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "Reconnecting");
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }
}
