//! Configuration for the Bytedance duplex TTS engine.
//!
//! The configuration is built once through [`BytedanceDuplexConfigBuilder`],
//! which derives vendor fields out of the pass-through `params` object and
//! validates the result. A built [`BytedanceDuplexConfig`] is never mutated.
//!
//! # Example
//!
//! ```rust,ignore
//! use waav_duplex_tts::core::tts::bytedance::BytedanceDuplexConfig;
//!
//! let config = BytedanceDuplexConfig::builder()
//!     .app_id("my-app")
//!     .token("my-token")
//!     .speaker("zh_female_shuangkuaisisi_moon_bigtts")
//!     .sample_rate(16000)
//!     .build()?;
//! ```

use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue, Request};
use url::Url;
use uuid::Uuid;
use zeroize::Zeroize;

use crate::core::tts::base::{ReconnectionConfig, TTSError, TTSResult};

// =============================================================================
// Constants
// =============================================================================

/// Default bidirectional TTS endpoint.
pub const DEFAULT_API_URL: &str = "wss://openspeech.bytedance.com/api/v3/tts/bidirection";

/// Default resource id for the duplex service.
pub const DEFAULT_RESOURCE_ID: &str = "volc.service_type.10029";

/// Default output sample rate (Hz).
pub const DEFAULT_SAMPLE_RATE: u32 = 24000;

/// Default directory for PCM dumps.
pub const DEFAULT_DUMP_PATH: &str = "/tmp";

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_KEEPALIVE_ACK_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_RESPONSE_CAPACITY: usize = 1024;

/// Keys moved out of `params` into typed fields.
const MOVED_PARAM_KEYS: &[&str] = &["app_id", "api_key", "api_url", "token", "resource_id"];

// =============================================================================
// Config
// =============================================================================

/// Immutable engine configuration.
#[derive(Clone)]
pub struct BytedanceDuplexConfig {
    pub app_id: String,
    pub api_key: String,
    pub token: String,
    pub resource_id: String,
    pub api_url: String,

    pub speaker: String,
    pub model: String,
    pub sample_rate: u32,

    /// Pass-through vendor parameters after derivation and black-listing.
    /// Always contains an `audio_params` object.
    pub params: Map<String, Value>,
    pub black_list_keys: Vec<String>,

    /// Forward `SentenceEnd` word timings and request timestamps from the vendor.
    pub enable_words: bool,
    pub dump: bool,
    pub dump_path: String,

    pub reconnection: ReconnectionConfig,
    pub handshake_timeout: Duration,
    pub queue_capacity: usize,
    /// Idle period after which a keepalive no-op is sent. `None` disables it.
    pub keepalive_interval: Option<Duration>,
    pub keepalive_ack_timeout: Duration,
    pub cleanup_interval: Duration,
    pub response_capacity: usize,
}

impl BytedanceDuplexConfig {
    pub fn builder() -> BytedanceDuplexConfigBuilder {
        BytedanceDuplexConfigBuilder::default()
    }

    /// Check required fields. Called by [`BytedanceDuplexConfigBuilder::build`].
    pub fn validate(&self) -> TTSResult<()> {
        if self.speaker.trim().is_empty() {
            return Err(TTSError::InvalidConfiguration(
                "required field is missing or empty: params.speaker".to_string(),
            ));
        }

        let app_id_present = !self.app_id.trim().is_empty();
        let api_key_present = !self.api_key.trim().is_empty();
        if !app_id_present && !api_key_present {
            return Err(TTSError::InvalidConfiguration(
                "at least one of 'app_id' or 'api_key' must be provided and not empty".to_string(),
            ));
        }
        if app_id_present && self.token.trim().is_empty() {
            return Err(TTSError::InvalidConfiguration(
                "app_id is provided but token is not provided".to_string(),
            ));
        }

        let url = Url::parse(&self.api_url).map_err(|e| {
            TTSError::InvalidConfiguration(format!("invalid api_url '{}': {}", self.api_url, e))
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TTSError::InvalidConfiguration(format!(
                "api_url must use ws or wss, got '{}'",
                url.scheme()
            )));
        }

        if self.queue_capacity == 0 {
            return Err(TTSError::InvalidConfiguration(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.response_capacity == 0 {
            return Err(TTSError::InvalidConfiguration(
                "response_capacity must be greater than 0".to_string(),
            ));
        }
        if self.sample_rate == 0 {
            return Err(TTSError::InvalidConfiguration(
                "sample_rate must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// The `audio_params` object sent with every request.
    pub fn audio_params(&self) -> Value {
        self.params
            .get("audio_params")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }

    /// Optional vendor `additions` passed through with every request.
    pub fn additions(&self) -> Option<Value> {
        self.params.get("additions").cloned()
    }

    /// Authentication and tracing headers for the websocket upgrade.
    pub fn auth_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::with_capacity(6);
        if !self.app_id.is_empty() {
            headers.push(("X-Api-App-Key", self.app_id.clone()));
            headers.push(("X-Api-Access-Key", self.token.clone()));
        } else {
            headers.push(("x-api-key", self.api_key.clone()));
        }
        headers.push(("X-Api-Resource-Id", self.resource_id.clone()));
        headers.push(("X-Api-Connect-Id", Uuid::new_v4().to_string()));
        headers.push(("X-Tt-Logid", gen_log_id()));
        headers.push(("X-Control-Require-Usage-Tokens-Return", "*".to_string()));
        headers
    }

    /// Websocket upgrade request for `api_url` carrying the auth headers.
    pub fn build_request(&self) -> TTSResult<Request<()>> {
        let mut request = self
            .api_url
            .as_str()
            .into_client_request()
            .map_err(|e| TTSError::InvalidConfiguration(format!("invalid api_url: {}", e)))?;

        let headers = request.headers_mut();
        for (name, value) in self.auth_headers() {
            let value = HeaderValue::from_str(&value).map_err(|e| {
                TTSError::InvalidConfiguration(format!("invalid value for header {}: {}", name, e))
            })?;
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                TTSError::InvalidConfiguration(format!("invalid header name {}: {}", name, e))
            })?;
            headers.insert(name, value);
        }

        Ok(request)
    }

    /// Bytes per second of the 16-bit mono PCM output.
    #[inline]
    pub fn bytes_per_second(&self) -> u64 {
        self.sample_rate as u64 * 2
    }
}

/// Tracing id in the vendor's format: `02` + epoch millis + 32 zeros + 8 hex digits.
pub fn gen_log_id() -> String {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let random = (Uuid::new_v4().as_u128() as u32 % (1 << 24)) + (1 << 20);
    format!("02{}{}{:08x}", ts, "0".repeat(32), random)
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() { "" } else { "<redacted>" }
}

impl fmt::Debug for BytedanceDuplexConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BytedanceDuplexConfig")
            .field("app_id", &redact(&self.app_id))
            .field("api_key", &redact(&self.api_key))
            .field("token", &redact(&self.token))
            .field("resource_id", &self.resource_id)
            .field("api_url", &self.api_url)
            .field("speaker", &self.speaker)
            .field("model", &self.model)
            .field("sample_rate", &self.sample_rate)
            .field("params", &self.params)
            .field("black_list_keys", &self.black_list_keys)
            .field("enable_words", &self.enable_words)
            .field("dump", &self.dump)
            .field("dump_path", &self.dump_path)
            .field("reconnection", &self.reconnection)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("queue_capacity", &self.queue_capacity)
            .field("keepalive_interval", &self.keepalive_interval)
            .field("keepalive_ack_timeout", &self.keepalive_ack_timeout)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("response_capacity", &self.response_capacity)
            .finish()
    }
}

/// Zeroize secrets when the config is dropped.
impl Drop for BytedanceDuplexConfig {
    fn drop(&mut self) {
        self.app_id.zeroize();
        self.api_key.zeroize();
        self.token.zeroize();
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`BytedanceDuplexConfig`].
///
/// Deserializable so that YAML files and environment overlays can produce
/// one directly. Unset fields fall back to defaults in [`build`](Self::build).
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct BytedanceDuplexConfigBuilder {
    pub app_id: Option<String>,
    pub api_key: Option<String>,
    pub token: Option<String>,
    pub resource_id: Option<String>,
    pub api_url: Option<String>,
    pub speaker: Option<String>,
    pub model: Option<String>,
    pub sample_rate: Option<u32>,
    pub params: Option<Map<String, Value>>,
    pub black_list_keys: Option<Vec<String>>,
    pub enable_words: Option<bool>,
    pub dump: Option<bool>,
    pub dump_path: Option<String>,
    pub reconnection: Option<ReconnectionConfig>,
    pub handshake_timeout_ms: Option<u64>,
    pub queue_capacity: Option<usize>,
    pub keepalive_interval_ms: Option<u64>,
    pub keepalive_ack_timeout_ms: Option<u64>,
    pub cleanup_interval_ms: Option<u64>,
    pub response_capacity: Option<usize>,
}

impl BytedanceDuplexConfigBuilder {
    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = Some(api_url.into());
        self
    }

    pub fn speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker = Some(speaker.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    pub fn params(mut self, params: Map<String, Value>) -> Self {
        self.params = Some(params);
        self
    }

    pub fn black_list_keys(mut self, keys: Vec<String>) -> Self {
        self.black_list_keys = Some(keys);
        self
    }

    pub fn enable_words(mut self, enable: bool) -> Self {
        self.enable_words = Some(enable);
        self
    }

    pub fn dump(mut self, dump: bool) -> Self {
        self.dump = Some(dump);
        self
    }

    pub fn dump_path(mut self, path: impl Into<String>) -> Self {
        self.dump_path = Some(path.into());
        self
    }

    pub fn reconnection(mut self, reconnection: ReconnectionConfig) -> Self {
        self.reconnection = Some(reconnection);
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    pub fn keepalive_ack_timeout(mut self, timeout: Duration) -> Self {
        self.keepalive_ack_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    pub fn response_capacity(mut self, capacity: usize) -> Self {
        self.response_capacity = Some(capacity);
        self
    }

    /// Overlay `other` on top of `self`; fields set in `other` win.
    pub fn merge(self, other: Self) -> Self {
        Self {
            app_id: other.app_id.or(self.app_id),
            api_key: other.api_key.or(self.api_key),
            token: other.token.or(self.token),
            resource_id: other.resource_id.or(self.resource_id),
            api_url: other.api_url.or(self.api_url),
            speaker: other.speaker.or(self.speaker),
            model: other.model.or(self.model),
            sample_rate: other.sample_rate.or(self.sample_rate),
            params: other.params.or(self.params),
            black_list_keys: other.black_list_keys.or(self.black_list_keys),
            enable_words: other.enable_words.or(self.enable_words),
            dump: other.dump.or(self.dump),
            dump_path: other.dump_path.or(self.dump_path),
            reconnection: other.reconnection.or(self.reconnection),
            handshake_timeout_ms: other.handshake_timeout_ms.or(self.handshake_timeout_ms),
            queue_capacity: other.queue_capacity.or(self.queue_capacity),
            keepalive_interval_ms: other.keepalive_interval_ms.or(self.keepalive_interval_ms),
            keepalive_ack_timeout_ms: other
                .keepalive_ack_timeout_ms
                .or(self.keepalive_ack_timeout_ms),
            cleanup_interval_ms: other.cleanup_interval_ms.or(self.cleanup_interval_ms),
            response_capacity: other.response_capacity.or(self.response_capacity),
        }
    }

    /// Derive vendor fields from `params`, apply defaults and validate.
    pub fn build(self) -> TTSResult<BytedanceDuplexConfig> {
        let mut params = self.params.unwrap_or_default();

        let mut app_id = self.app_id.unwrap_or_default();
        let mut api_key = self.api_key.unwrap_or_default();
        let mut api_url = self.api_url.unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let mut token = self.token.unwrap_or_default();
        let mut resource_id = self
            .resource_id
            .unwrap_or_else(|| DEFAULT_RESOURCE_ID.to_string());

        for key in MOVED_PARAM_KEYS {
            if let Some(value) = params.remove(*key) {
                let value = value_to_string(value);
                match *key {
                    "app_id" => app_id = value,
                    "api_key" => api_key = value,
                    "api_url" => api_url = value,
                    "token" => token = value,
                    _ => resource_id = value,
                }
            }
        }

        let mut speaker = self.speaker.unwrap_or_default();
        if let Some(value) = params.get("speaker") {
            speaker = value_to_string(value.clone());
        }
        let mut model = self.model.unwrap_or_default();
        if let Some(value) = params.get("model") {
            model = value_to_string(value.clone());
        }

        let mut sample_rate = self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
        let enable_words = self.enable_words.unwrap_or(false);

        let audio_params = params
            .entry("audio_params")
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(audio_params) = audio_params else {
            return Err(TTSError::InvalidConfiguration(
                "params.audio_params must be an object".to_string(),
            ));
        };
        match audio_params.get("sample_rate") {
            Some(value) => sample_rate = parse_sample_rate(value)?,
            None => {
                audio_params.insert("sample_rate".to_string(), Value::from(sample_rate));
            }
        }
        audio_params.insert("format".to_string(), Value::from("pcm"));
        if enable_words {
            audio_params.insert("enable_timestamp".to_string(), Value::Bool(true));
        }

        let black_list_keys = self.black_list_keys.unwrap_or_default();
        for key in &black_list_keys {
            params.remove(key);
        }

        let config = BytedanceDuplexConfig {
            app_id,
            api_key,
            token,
            resource_id,
            api_url,
            speaker,
            model,
            sample_rate,
            params,
            black_list_keys,
            enable_words,
            dump: self.dump.unwrap_or(false),
            dump_path: self
                .dump_path
                .unwrap_or_else(|| DEFAULT_DUMP_PATH.to_string()),
            reconnection: self.reconnection.unwrap_or_default(),
            handshake_timeout: self
                .handshake_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT),
            queue_capacity: self.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
            keepalive_interval: self
                .keepalive_interval_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            keepalive_ack_timeout: self
                .keepalive_ack_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_KEEPALIVE_ACK_TIMEOUT),
            cleanup_interval: self
                .cleanup_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_CLEANUP_INTERVAL),
            response_capacity: self.response_capacity.unwrap_or(DEFAULT_RESPONSE_CAPACITY),
        };

        config.validate()?;
        Ok(config)
    }
}

impl fmt::Debug for BytedanceDuplexConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BytedanceDuplexConfigBuilder")
            .field("app_id", &self.app_id.as_deref().map(redact))
            .field("api_key", &self.api_key.as_deref().map(redact))
            .field("token", &self.token.as_deref().map(redact))
            .field("api_url", &self.api_url)
            .field("speaker", &self.speaker)
            .finish_non_exhaustive()
    }
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn parse_sample_rate(value: &Value) -> TTSResult<u32> {
    let parsed = match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        TTSError::InvalidConfiguration(format!(
            "params.audio_params.sample_rate is not a valid sample rate: {}",
            value
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn base() -> BytedanceDuplexConfigBuilder {
        BytedanceDuplexConfig::builder()
            .app_id("app")
            .token("tok")
            .speaker("speaker_1")
    }

    #[test]
    fn test_defaults() {
        let config = base().build().unwrap();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.resource_id, DEFAULT_RESOURCE_ID);
        assert_eq!(config.sample_rate, 24000);
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.queue_capacity, 256);
        assert!(config.keepalive_interval.is_none());
        assert_eq!(config.dump_path, "/tmp");
        assert_eq!(
            config.audio_params(),
            json!({"sample_rate": 24000, "format": "pcm"})
        );
        assert!(config.additions().is_none());
    }

    #[test]
    fn test_params_derivation() {
        let config = BytedanceDuplexConfig::builder()
            .params(params(json!({
                "app_id": "from-params",
                "token": "secret",
                "api_url": "ws://localhost:9000/tts",
                "resource_id": "res",
                "speaker": "spk",
                "model": "seed-tts-1.1",
                "audio_params": {"sample_rate": "16000"},
                "additions": "{\"disable_markdown_filter\":true}",
                "debug_only": 1
            })))
            .black_list_keys(vec!["debug_only".to_string()])
            .enable_words(true)
            .build()
            .unwrap();

        assert_eq!(config.app_id, "from-params");
        assert_eq!(config.token, "secret");
        assert_eq!(config.api_url, "ws://localhost:9000/tts");
        assert_eq!(config.resource_id, "res");
        assert_eq!(config.speaker, "spk");
        assert_eq!(config.model, "seed-tts-1.1");
        assert_eq!(config.sample_rate, 16000);
        assert!(!config.params.contains_key("app_id"));
        assert!(!config.params.contains_key("token"));
        assert!(!config.params.contains_key("debug_only"));
        assert!(config.params.contains_key("speaker"));
        assert_eq!(config.audio_params()["format"], "pcm");
        assert_eq!(config.audio_params()["enable_timestamp"], true);
        assert!(config.additions().is_some());
    }

    #[test]
    fn test_sample_rate_injected_into_audio_params() {
        let config = base().sample_rate(8000).build().unwrap();
        assert_eq!(config.audio_params()["sample_rate"], 8000);
        assert_eq!(config.bytes_per_second(), 16000);
    }

    #[test]
    fn test_validate_missing_speaker() {
        let err = BytedanceDuplexConfig::builder()
            .app_id("a")
            .token("t")
            .speaker("   ")
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            TTSError::InvalidConfiguration(
                "required field is missing or empty: params.speaker".to_string()
            )
        );
    }

    #[test]
    fn test_validate_credentials() {
        let err = BytedanceDuplexConfig::builder()
            .speaker("s")
            .build()
            .unwrap_err();
        assert!(matches!(err, TTSError::InvalidConfiguration(msg) if msg.contains("app_id")));

        let err = BytedanceDuplexConfig::builder()
            .speaker("s")
            .app_id("a")
            .build()
            .unwrap_err();
        assert!(matches!(err, TTSError::InvalidConfiguration(msg) if msg.contains("token")));

        assert!(
            BytedanceDuplexConfig::builder()
                .speaker("s")
                .api_key("k")
                .build()
                .is_ok()
        );
    }

    #[test]
    fn test_validate_url_scheme_and_capacity() {
        assert!(base().api_url("https://example.com").build().is_err());
        assert!(base().api_url("not a url").build().is_err());
        assert!(base().queue_capacity(0).build().is_err());
    }

    #[test]
    fn test_auth_headers_app_id() {
        let config = base().build().unwrap();
        let headers = config.auth_headers();
        let get = |name: &str| {
            headers
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(get("X-Api-App-Key").as_deref(), Some("app"));
        assert_eq!(get("X-Api-Access-Key").as_deref(), Some("tok"));
        assert_eq!(get("X-Control-Require-Usage-Tokens-Return").as_deref(), Some("*"));
        assert!(get("x-api-key").is_none());
        assert_eq!(get("X-Api-Connect-Id").map(|v| v.len()), Some(36));
    }

    #[test]
    fn test_auth_headers_api_key() {
        let config = BytedanceDuplexConfig::builder()
            .api_key("key")
            .speaker("s")
            .build()
            .unwrap();
        let request = config.build_request().unwrap();
        assert_eq!(request.headers()["x-api-key"], "key");
        assert!(request.headers().get("x-api-app-key").is_none());
        assert!(request.headers().contains_key("x-tt-logid"));
        assert_eq!(request.uri().host(), Some("openspeech.bytedance.com"));
    }

    #[test]
    fn test_log_id_format() {
        let id = gen_log_id();
        assert!(id.starts_with("02"));
        assert!(id.contains(&"0".repeat(32)));
        assert!(id[id.len() - 8..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = base().build().unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("tok\""));
        assert!(debug.contains("<redacted>"));
        assert!(debug.contains("speaker_1"));
    }

    #[test]
    fn test_builder_merge_prefers_overlay() {
        let env = BytedanceDuplexConfigBuilder {
            speaker: Some("env".to_string()),
            sample_rate: Some(16000),
            ..Default::default()
        };
        let file = BytedanceDuplexConfigBuilder {
            speaker: Some("file".to_string()),
            ..Default::default()
        };
        let merged = env.merge(file);
        assert_eq!(merged.speaker.as_deref(), Some("file"));
        assert_eq!(merged.sample_rate, Some(16000));
    }

    #[test]
    fn test_builder_deserialize_yaml() {
        let yaml = r#"
app_id: "a"
token: "t"
speaker: "s"
keepalive_interval_ms: 3000
reconnection:
  max_attempts: 2
params:
  audio_params:
    speech_rate: 10
"#;
        let builder: BytedanceDuplexConfigBuilder = serde_yaml::from_str(yaml).unwrap();
        let config = builder.build().unwrap();
        assert_eq!(config.keepalive_interval, Some(Duration::from_secs(3)));
        assert_eq!(config.reconnection.max_attempts, 2);
        assert_eq!(config.audio_params()["speech_rate"], 10);
        assert_eq!(config.audio_params()["sample_rate"], 24000);
    }
}
