use serde::Deserialize;
use std::path::PathBuf;

use crate::core::tts::BytedanceDuplexConfigBuilder;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration; anything left out
/// falls back to environment variables and then to defaults.
///
/// # Example YAML structure
/// ```yaml
/// tts:
///   app_id: "your-app-id"
///   token: "your-token"
///   speaker: "zh_female_shuangkuaisisi_moon_bigtts"
///   sample_rate: 24000
///   enable_words: true
///   dump: false
///   dump_path: "/tmp"
///   params:
///     audio_params:
///       speech_rate: 10
///   black_list_keys: ["text"]
///   handshake_timeout_ms: 10000
///   keepalive_interval_ms: 30000
///   reconnection:
///     max_attempts: 5
///     initial_delay_ms: 500
/// ```
#[derive(Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub tts: Option<BytedanceDuplexConfigBuilder>,
}

impl YamlConfig {
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
