use serde_json::{Map, Value};
use std::env;

use crate::core::tts::BytedanceDuplexConfigBuilder;

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(key: &str, value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("Invalid boolean for {key}: {other}")),
    }
}

/// Read `BYTEDANCE_*` environment variables into a builder.
///
/// Unset or empty variables leave the corresponding field unset.
pub fn tts_from_env() -> Result<BytedanceDuplexConfigBuilder, Box<dyn std::error::Error>> {
    let mut builder = BytedanceDuplexConfigBuilder::default();

    builder.app_id = var("BYTEDANCE_APP_ID");
    builder.api_key = var("BYTEDANCE_API_KEY");
    builder.token = var("BYTEDANCE_TOKEN");
    builder.resource_id = var("BYTEDANCE_RESOURCE_ID");
    builder.api_url = var("BYTEDANCE_TTS_URL");
    builder.speaker = var("BYTEDANCE_SPEAKER");
    builder.model = var("BYTEDANCE_MODEL");
    builder.dump_path = var("BYTEDANCE_DUMP_PATH");

    if let Some(rate) = var("BYTEDANCE_SAMPLE_RATE") {
        builder.sample_rate = Some(
            rate.trim()
                .parse()
                .map_err(|e| format!("Invalid BYTEDANCE_SAMPLE_RATE: {e}"))?,
        );
    }
    if let Some(value) = var("BYTEDANCE_ENABLE_WORDS") {
        builder.enable_words = Some(parse_bool("BYTEDANCE_ENABLE_WORDS", &value)?);
    }
    if let Some(value) = var("BYTEDANCE_DUMP") {
        builder.dump = Some(parse_bool("BYTEDANCE_DUMP", &value)?);
    }
    if let Some(raw) = var("BYTEDANCE_PARAMS") {
        let params: Map<String, Value> = serde_json::from_str(&raw)
            .map_err(|e| format!("BYTEDANCE_PARAMS must be a JSON object: {e}"))?;
        builder.params = Some(params);
    }
    if let Some(raw) = var("BYTEDANCE_BLACK_LIST_KEYS") {
        builder.black_list_keys = Some(
            raw.split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect(),
        );
    }

    Ok(builder)
}
