//! Bytedance duplex streaming TTS.
//!
//! A persistent WebSocket carries a binary event protocol: the client opens a
//! connection, starts a session per request, streams text into it and
//! receives PCM audio plus sentence and session lifecycle events.
//!
//! # Layers
//!
//! - [`protocol`] - binary frame codec
//! - [`session`] - one WebSocket connection and its send/receive loops
//! - [`dispatcher`] - bounded FIFO queue feeding the session
//! - [`supervisor`] - reconnect loop with retry budgets
//! - [`client`] - generation-tagged client with cancel/reset
//! - [`provider`] - request-level driver emitting audio, timing and usage
//!
//! # Example
//!
//! ```rust,ignore
//! use waav_duplex_tts::core::tts::bytedance::{BytedanceDuplexConfig, BytedanceDuplexTts, TextInput};
//! use waav_duplex_tts::core::tts::LoggingObserver;
//! use std::sync::Arc;
//!
//! let config = BytedanceDuplexConfig::builder()
//!     .app_id("app")
//!     .token("token")
//!     .speaker("zh_female_shuangkuaisisi_moon_bigtts")
//!     .build()?;
//! let (tts, mut outputs) = BytedanceDuplexTts::start(config, Arc::new(LoggingObserver))?;
//! tts.request_tts(TextInput::new("req-1", "Hello there.", true)).await?;
//! while let Some(output) = outputs.recv().await {
//!     println!("{:?}", output);
//! }
//! ```

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod dump;
pub mod messages;
pub mod protocol;
pub mod provider;
pub mod session;
pub mod supervisor;

pub use client::{BytedanceDuplexClient, ClientInstance, TtsResponseStream};
pub use config::{
    BytedanceDuplexConfig, BytedanceDuplexConfigBuilder, DEFAULT_API_URL, DEFAULT_RESOURCE_ID,
    DEFAULT_SAMPLE_RATE,
};
pub use messages::{ResponsePayload, TtsResponse};
pub use protocol::{
    Compression, DecodeError, EventType, Frame, Header, MessageFlags, MessageType, Serialization,
};
pub use provider::{
    AudioEndReason, AudioTimeline, BytedanceDuplexTts, TextInput, TextResult, TtsOutput, TtsWord,
};
pub use session::{SessionExit, SessionState, TransportSession};

use crate::core::tts::base::{ModuleError, TTSError};

/// Vendor name attached to vendor error details.
pub const VENDOR: &str = "bytedance";

pub const CODE_CONNECTION_FAILED: &str = "CONNECTION_FAILED";
pub const CODE_SESSION_FAILED: &str = "SESSION_FAILED";
pub const CODE_TIMEOUT: &str = "TIMEOUT";
pub const CODE_KEEPALIVE_TIMEOUT: &str = "KEEPALIVE_TIMEOUT";

/// Non-fatal error for a failed start_connection/start_session handshake.
pub(crate) fn handshake_error(err: &TTSError, operation: &str, failed_code: &str) -> ModuleError {
    match err {
        TTSError::Timeout(_) => {
            ModuleError::non_fatal(format!("{} timeout", operation)).with_vendor(VENDOR, CODE_TIMEOUT)
        }
        TTSError::HandshakeFailed(reason) => {
            ModuleError::non_fatal(reason.clone()).with_vendor(VENDOR, failed_code)
        }
        other => ModuleError::non_fatal(other.to_string()).with_vendor(VENDOR, failed_code),
    }
}
