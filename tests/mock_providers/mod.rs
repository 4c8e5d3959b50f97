//! Mock vendor servers and shared test helpers
//!
//! - `bytedance_mock`: scriptable Bytedance duplex TTS server
//! - `RecordingObserver`: observer that records every callback

// Allow dead code in test infrastructure - not every test binary uses every helper
#![allow(dead_code)]

pub mod bytedance_mock;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;

use waav_duplex_tts::core::tts::{
    BytedanceDuplexConfig, ModuleError, ReconnectionConfig, ReconnectionEvent, TtsObserver,
};

pub use bytedance_mock::{BytedanceMock, MockBehavior};

/// Observer that records every callback.
#[derive(Default)]
pub struct RecordingObserver {
    pub errors: Mutex<Vec<ModuleError>>,
    pub fatal: Mutex<Vec<ModuleError>>,
    pub usage: Mutex<Vec<u64>>,
    pub reconnects: Mutex<Vec<ReconnectionEvent>>,
}

impl RecordingObserver {
    pub fn errors_with_code(&self, code: &str) -> usize {
        self.errors
            .lock()
            .iter()
            .filter(|e| e.vendor_code() == Some(code))
            .count()
    }

    pub fn fatal_count(&self) -> usize {
        self.fatal.lock().len()
    }
}

#[async_trait]
impl TtsObserver for RecordingObserver {
    async fn on_error(&self, error: ModuleError) {
        self.errors.lock().push(error);
    }

    async fn on_usage(&self, characters: u64) {
        self.usage.lock().push(characters);
    }

    async fn on_fatal_failure(&self, error: ModuleError) {
        self.fatal.lock().push(error);
    }

    async fn on_reconnect(&self, event: ReconnectionEvent) {
        self.reconnects.lock().push(event);
    }
}

/// Config pointing at `mock`, with short timeouts.
pub fn mock_config(mock: &BytedanceMock) -> BytedanceDuplexConfig {
    BytedanceDuplexConfig::builder()
        .api_key("test-key")
        .api_url(mock.url())
        .speaker("test_speaker")
        .handshake_timeout(Duration::from_millis(500))
        .reconnection(ReconnectionConfig {
            initial_delay_ms: 20,
            max_delay_ms: 100,
            jitter: false,
            ..Default::default()
        })
        .build()
        .expect("valid mock config")
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Await `future`, failing the test after `timeout`.
pub async fn within<T>(timeout: Duration, future: impl Future<Output = T>) -> T {
    tokio::time::timeout(timeout, future)
        .await
        .expect("operation timed out")
}
