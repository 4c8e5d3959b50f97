pub mod tts;

// Re-export commonly used types for convenience
pub use tts::{
    BytedanceDuplexClient, BytedanceDuplexConfig, BytedanceDuplexTts, ConnectionState,
    LoggingObserver, ModuleError, TTSError, TTSResult, TtsObserver, TtsOutput,
};
