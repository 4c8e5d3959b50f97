//! Integration tests for the request-level driver against the mock server
//!
//! Run with: cargo test --test bytedance_provider_tests

mod mock_providers;

use std::sync::Arc;
use std::time::Duration;

use mock_providers::{BytedanceMock, MockBehavior, RecordingObserver, within};
use tempfile::TempDir;
use tokio::sync::mpsc;
use waav_duplex_tts::core::tts::bytedance::EventType;
use waav_duplex_tts::core::tts::{
    AudioEndReason, BytedanceDuplexConfig, BytedanceDuplexTts, TextInput, TtsOutput,
};

fn config(mock: &BytedanceMock, enable_words: bool) -> BytedanceDuplexConfig {
    BytedanceDuplexConfig::builder()
        .api_key("test-key")
        .api_url(mock.url())
        .speaker("test_speaker")
        .model("seed-tts-1.1")
        .enable_words(enable_words)
        .handshake_timeout(Duration::from_millis(500))
        .build()
        .unwrap()
}

/// Receive outputs until an AudioEnd for `request_id` and the Usage after it.
async fn collect_request(outputs: &mut mpsc::Receiver<TtsOutput>, request_id: &str) -> Vec<TtsOutput> {
    within(Duration::from_secs(5), async {
        let mut collected = Vec::new();
        let mut ended = false;
        while let Some(output) = outputs.recv().await {
            let is_usage = matches!(&output, TtsOutput::Usage { .. });
            if let TtsOutput::AudioEnd { request_id: id, .. } = &output
                && id == request_id
            {
                ended = true;
            }
            collected.push(output);
            if ended && is_usage {
                break;
            }
        }
        collected
    })
    .await
}

#[tokio::test]
async fn test_request_flow_emits_timed_outputs() {
    let mock = BytedanceMock::start(MockBehavior::default()).await;
    let observer = Arc::new(RecordingObserver::default());
    let (tts, mut outputs) = BytedanceDuplexTts::start(config(&mock, true), observer).unwrap();

    within(
        Duration::from_secs(5),
        tts.request_tts(TextInput::new("r1", "Hello world", true)),
    )
    .await
    .unwrap();
    let collected = collect_request(&mut outputs, "r1").await;

    assert!(matches!(&collected[0], TtsOutput::AudioStart { request_id } if request_id == "r1"));
    match &collected[1] {
        TtsOutput::Ttfb { model, speaker, .. } => {
            assert_eq!(model, "seed-tts-1.1");
            assert_eq!(speaker, "test_speaker");
        }
        other => panic!("expected Ttfb, got {:?}", other),
    }

    // 960 bytes at 24kHz 16-bit mono is 20ms per chunk.
    let timestamps: Vec<i64> = collected
        .iter()
        .filter_map(|o| match o {
            TtsOutput::Audio { timestamp_ms, .. } => Some(*timestamp_ms),
            _ => None,
        })
        .collect();
    assert_eq!(timestamps.len(), 2);
    assert_eq!(timestamps[1] - timestamps[0], 20);

    let results: Vec<_> = collected
        .iter()
        .filter_map(|o| match o {
            TtsOutput::TextResult(r) => Some(r.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].text, "Hello world");
    assert_eq!(results[0].words.len(), 2);
    assert_eq!(results[0].start_ms, timestamps[0]);
    assert_eq!(results[0].words[1].start_ms - results[0].words[0].start_ms, 250);
    assert_eq!(results[0].words[0].duration_ms, 250);
    assert_eq!(results[0].duration_ms, 500);
    assert!(!results[0].text_result_end);
    assert!(results[1].text_result_end);

    let end = collected
        .iter()
        .find_map(|o| match o {
            TtsOutput::AudioEnd {
                reason,
                total_audio_duration_ms,
                ..
            } => Some((*reason, *total_audio_duration_ms)),
            _ => None,
        })
        .unwrap();
    assert_eq!(end, (AudioEndReason::Completed, 40));

    assert!(matches!(
        collected.last(),
        Some(TtsOutput::Usage {
            input_characters: 11,
            output_characters: 11,
            ..
        })
    ));
    assert_eq!(tts.current_request_id(), None);
    tts.close().await;
}

#[tokio::test]
async fn test_timeline_continues_across_sentences_without_words() {
    let mock = BytedanceMock::start(MockBehavior::default()).await;
    let observer = Arc::new(RecordingObserver::default());
    let (tts, mut outputs) = BytedanceDuplexTts::start(config(&mock, false), observer).unwrap();

    tts.request_tts(TextInput::new("r1", "First sentence.", false))
        .await
        .unwrap();
    within(
        Duration::from_secs(5),
        tts.request_tts(TextInput::new("r1", "Second sentence.", true)),
    )
    .await
    .unwrap();
    let collected = collect_request(&mut outputs, "r1").await;

    let timestamps: Vec<i64> = collected
        .iter()
        .filter_map(|o| match o {
            TtsOutput::Audio { timestamp_ms, .. } => Some(*timestamp_ms),
            _ => None,
        })
        .collect();
    assert_eq!(timestamps.len(), 4);
    // The second sentence starts where the first one ended.
    assert!(timestamps.windows(2).all(|w| w[1] - w[0] == 20));
    assert!(
        collected
            .iter()
            .filter_map(|o| match o {
                TtsOutput::TextResult(r) => Some(r),
                _ => None,
            })
            .all(|r| r.words.is_empty())
    );
    assert!(collected.iter().any(|o| matches!(
        o,
        TtsOutput::AudioEnd {
            reason: AudioEndReason::Completed,
            total_audio_duration_ms: 80,
            ..
        }
    )));
    tts.close().await;
}

#[tokio::test]
async fn test_each_request_gets_a_fresh_connection() {
    let mock = BytedanceMock::start(MockBehavior::default()).await;
    let observer = Arc::new(RecordingObserver::default());
    let (tts, mut outputs) = BytedanceDuplexTts::start(config(&mock, false), observer).unwrap();

    for request_id in ["r1", "r2"] {
        tts.request_tts(TextInput::new(request_id, "first part ", false))
            .await
            .unwrap();
        within(
            Duration::from_secs(5),
            tts.request_tts(TextInput::new(request_id, "second part", true)),
        )
        .await
        .unwrap();
        collect_request(&mut outputs, request_id).await;
    }

    assert_eq!(
        mock.texts(),
        vec!["first part ", "second part", "first part ", "second part"]
    );
    assert!(mock.connections() >= 2);
    assert_eq!(mock.count_events(EventType::StartSession), 2);
    tts.close().await;
}

#[tokio::test]
async fn test_completed_request_id_is_ignored() {
    let mock = BytedanceMock::start(MockBehavior::default()).await;
    let observer = Arc::new(RecordingObserver::default());
    let (tts, mut outputs) = BytedanceDuplexTts::start(config(&mock, false), observer).unwrap();

    within(
        Duration::from_secs(5),
        tts.request_tts(TextInput::new("r1", "once", true)),
    )
    .await
    .unwrap();
    collect_request(&mut outputs, "r1").await;

    tts.request_tts(TextInput::new("r1", "twice", true))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(mock.texts(), vec!["once"]);
    assert!(outputs.try_recv().is_err());
    tts.close().await;
}

#[tokio::test]
async fn test_empty_first_message_finishes_immediately() {
    let mock = BytedanceMock::start(MockBehavior::default()).await;
    let observer = Arc::new(RecordingObserver::default());
    let (tts, mut outputs) = BytedanceDuplexTts::start(config(&mock, false), observer).unwrap();

    within(
        Duration::from_secs(1),
        tts.request_tts(TextInput::new("empty", "  ", true)),
    )
    .await
    .unwrap();
    let collected = collect_request(&mut outputs, "empty").await;

    assert!(matches!(
        &collected[0],
        TtsOutput::AudioEnd {
            reason: AudioEndReason::Completed,
            total_audio_duration_ms: 0,
            ..
        }
    ));
    assert!(matches!(
        &collected[1],
        TtsOutput::Usage {
            output_characters: 0,
            ..
        }
    ));
    assert!(mock.texts().is_empty());
    assert_eq!(mock.count_events(EventType::StartSession), 0);
    tts.close().await;
}

#[tokio::test]
async fn test_cancel_interrupts_request() {
    let mock = BytedanceMock::start(MockBehavior {
        chunks_per_text: 50,
        chunk_delay: Duration::from_millis(10),
        ..Default::default()
    })
    .await;
    let observer = Arc::new(RecordingObserver::default());
    let (tts, mut outputs) = BytedanceDuplexTts::start(config(&mock, false), observer).unwrap();

    tts.request_tts(TextInput::new("r1", "interrupt me", false))
        .await
        .unwrap();
    within(Duration::from_secs(5), async {
        while let Some(output) = outputs.recv().await {
            if matches!(output, TtsOutput::Audio { .. }) {
                break;
            }
        }
    })
    .await;

    tts.cancel_tts().await;
    let collected = collect_request(&mut outputs, "r1").await;
    let end = collected.iter().find_map(|o| match o {
        TtsOutput::AudioEnd {
            reason,
            total_audio_duration_ms,
            ..
        } => Some((*reason, *total_audio_duration_ms)),
        _ => None,
    });
    let (reason, duration) = end.unwrap();
    assert_eq!(reason, AudioEndReason::Interrupted);
    assert!(duration >= 20);

    // The cancelled request id cannot be reused.
    tts.request_tts(TextInput::new("r1", "again", true))
        .await
        .unwrap();
    assert_eq!(mock.texts(), vec!["interrupt me"]);
    tts.close().await;
}

#[tokio::test]
async fn test_dump_writes_request_audio() {
    let dump_dir = TempDir::new().unwrap();
    let mock = BytedanceMock::start(MockBehavior::default()).await;
    let observer = Arc::new(RecordingObserver::default());
    let config = BytedanceDuplexConfig::builder()
        .api_key("test-key")
        .api_url(mock.url())
        .speaker("test_speaker")
        .dump(true)
        .dump_path(dump_dir.path().to_string_lossy().to_string())
        .build()
        .unwrap();
    let (tts, mut outputs) = BytedanceDuplexTts::start(config, observer).unwrap();

    within(
        Duration::from_secs(5),
        tts.request_tts(TextInput::new("dumped", "hello", true)),
    )
    .await
    .unwrap();
    collect_request(&mut outputs, "dumped").await;
    tts.close().await;

    let dumped = std::fs::read(dump_dir.path().join("bytedance_dump_dumped.pcm")).unwrap();
    assert_eq!(dumped.len(), 1920);
    assert!(dumped.iter().all(|b| *b == 1));
}
