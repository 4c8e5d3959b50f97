mod base;
pub mod bytedance;

pub use base::{
    ConnectionState, LoggingObserver, ModuleError, ModuleErrorCode, ReconnectionConfig,
    ReconnectionEvent, TTSError, TTSResult, TtsObserver, VendorErrorInfo,
};
pub use bytedance::{
    AudioEndReason, BytedanceDuplexClient, BytedanceDuplexConfig, BytedanceDuplexConfigBuilder,
    BytedanceDuplexTts, TextInput, TextResult, TtsOutput, TtsResponse, TtsResponseStream, TtsWord,
};
