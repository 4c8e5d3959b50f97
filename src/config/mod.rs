//! Configuration loading for the duplex TTS engine
//!
//! Configuration can come from a YAML file, environment variables and a `.env` file.
//! Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//!
//! # Example
//! ```rust,no_run
//! use waav_duplex_tts::config::EngineConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = EngineConfig::from_env()?;
//!
//! // Load from YAML file with environment variable fallbacks
//! let config = EngineConfig::from_file(&PathBuf::from("config.yaml"))?;
//! println!("Speaker: {}", config.tts.speaker);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

use crate::core::tts::BytedanceDuplexConfig;

mod env;
mod yaml;

pub use env::tts_from_env;
pub use yaml::YamlConfig;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bytedance duplex TTS settings, validated
    pub tts: BytedanceDuplexConfig,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// `.env` is expected to have been loaded by the caller (see `main.rs`).
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let tts = tts_from_env()?.build()?;
        Ok(Self { tts })
    }

    /// Load configuration from a YAML file, falling back to environment variables
    /// for anything the file does not set.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        // YAML > Environment Variables (.env + actual ENV) > Defaults
        let yaml_config = YamlConfig::from_file(path)?;
        let env_builder = tts_from_env()?;

        let builder = match yaml_config.tts {
            Some(file_builder) => env_builder.merge(file_builder),
            None => env_builder,
        };
        let tts = builder.build()?;
        Ok(Self { tts })
    }
}
