//! JSON payloads and caller-facing response types.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::config::BytedanceDuplexConfig;
use super::protocol::EventType;

/// Namespace of the bidirectional TTS API.
pub const NAMESPACE: &str = "BidirectionalTTS";

/// User id sent with every request.
pub const DEFAULT_UID: &str = "1234";

/// Payload of events that carry no parameters.
pub const EMPTY_PAYLOAD: &[u8] = b"{}";

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestUser {
    pub uid: String,
}

/// `req_params` of a StartSession or TaskRequest payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestParams {
    pub text: String,
    pub speaker: String,
    pub model: String,
    pub audio_params: Value,
    /// Serialized as `null` when absent.
    pub additions: Option<Value>,
}

/// JSON payload of StartSession and TaskRequest frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestPayload {
    pub user: RequestUser,
    pub event: u32,
    pub namespace: String,
    pub req_params: RequestParams,
}

impl RequestPayload {
    pub fn new(config: &BytedanceDuplexConfig, event: EventType, text: &str) -> Self {
        Self {
            user: RequestUser {
                uid: DEFAULT_UID.to_string(),
            },
            event: event.code(),
            namespace: NAMESPACE.to_string(),
            req_params: RequestParams {
                text: text.to_string(),
                speaker: config.speaker.clone(),
                model: config.model.clone(),
                audio_params: config.audio_params(),
                additions: config.additions(),
            },
        }
    }

    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

// =============================================================================
// Server metadata
// =============================================================================

/// Meta of a SessionFinished event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UsagePayload {
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub text_words: Option<u64>,
}

impl UsagePayload {
    /// Billed characters, if the vendor reported them.
    pub fn text_words(value: &Value) -> Option<u64> {
        serde_json::from_value::<UsagePayload>(value.clone())
            .ok()
            .and_then(|p| p.usage)
            .and_then(|u| u.text_words)
    }
}

/// Word timing inside a SentenceEnd meta. Times are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    #[serde(rename = "startTime")]
    pub start_time: f64,
    #[serde(rename = "endTime")]
    pub end_time: f64,
}

/// Meta of a SentenceEnd event when timestamps are enabled.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SentenceWords {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub words: Vec<WordTiming>,
}

impl SentenceWords {
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

// =============================================================================
// Responses
// =============================================================================

/// Payload delivered with a caller-facing response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    /// Connection lifecycle or empty meta
    Empty,
    /// Raw PCM audio
    Audio(Bytes),
    /// Sentence or session meta
    Json(Value),
}

/// One server event delivered on the caller's response stream.
#[derive(Debug, Clone, PartialEq)]
pub struct TtsResponse {
    pub event: EventType,
    pub session_id: Option<String>,
    pub payload: ResponsePayload,
}

impl TtsResponse {
    pub fn new(event: EventType, session_id: Option<String>, payload: ResponsePayload) -> Self {
        Self {
            event,
            session_id,
            payload,
        }
    }

    pub fn audio(&self) -> Option<&Bytes> {
        match &self.payload {
            ResponsePayload::Audio(data) => Some(data),
            _ => None,
        }
    }

    pub fn json(&self) -> Option<&Value> {
        match &self.payload {
            ResponsePayload::Json(value) => Some(value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(params: Value) -> BytedanceDuplexConfig {
        let Value::Object(params) = params else {
            panic!("expected object")
        };
        BytedanceDuplexConfig::builder()
            .api_key("k")
            .speaker("spk")
            .model("m1")
            .params(params)
            .build()
            .unwrap()
    }

    #[test]
    fn test_request_payload_shape() {
        let config = config(json!({}));
        let payload = RequestPayload::new(&config, EventType::TaskRequest, "hello");
        let value: Value = serde_json::from_slice(&payload.to_bytes().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "user": {"uid": "1234"},
                "event": 200,
                "namespace": "BidirectionalTTS",
                "req_params": {
                    "text": "hello",
                    "speaker": "spk",
                    "model": "m1",
                    "audio_params": {"sample_rate": 24000, "format": "pcm"},
                    "additions": null
                }
            })
        );
    }

    #[test]
    fn test_request_payload_additions_passthrough() {
        let config = config(json!({"additions": {"silence_duration": 100}}));
        let payload = RequestPayload::new(&config, EventType::StartSession, "");
        assert_eq!(payload.event, 100);
        assert_eq!(
            payload.req_params.additions,
            Some(json!({"silence_duration": 100}))
        );
    }

    #[test]
    fn test_usage_text_words() {
        assert_eq!(
            UsagePayload::text_words(&json!({"usage": {"text_words": 12}})),
            Some(12)
        );
        assert_eq!(UsagePayload::text_words(&json!({"status": "ok"})), None);
        assert_eq!(UsagePayload::text_words(&json!("garbage")), None);
    }

    #[test]
    fn test_sentence_words_parse() {
        let meta = json!({
            "text": "hi there",
            "words": [
                {"word": "hi", "startTime": 0.1, "endTime": 0.3, "confidence": 0.9},
                {"word": "there", "startTime": 0.3, "endTime": 0.7}
            ]
        });
        let words = SentenceWords::from_value(&meta).unwrap();
        assert_eq!(words.words.len(), 2);
        assert_eq!(words.words[1].word, "there");
        assert!((words.words[1].end_time - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_response_accessors() {
        let audio = TtsResponse::new(
            EventType::AudioChunk,
            None,
            ResponsePayload::Audio(Bytes::from_static(b"pcm")),
        );
        assert_eq!(audio.audio().map(|b| b.len()), Some(3));
        assert!(audio.json().is_none());
    }
}
