use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::{info, warn};

use waav_duplex_tts::{
    EngineConfig,
    core::tts::{AudioEndReason, BytedanceDuplexTts, LoggingObserver, TextInput, TtsOutput},
};

/// WaaV duplex TTS - Bytedance bidirectional streaming synthesis
#[derive(Parser, Debug)]
#[command(name = "waav-duplex-tts")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Synthesize one request and write it as a WAV file
    Synth {
        /// Text to synthesize
        #[arg(short = 't', long = "text")]
        text: String,

        /// Output WAV path
        #[arg(short = 'o', long = "output", default_value = "out.wav")]
        output: PathBuf,

        /// Request id (random when omitted)
        #[arg(long = "request-id")]
        request_id: Option<String>,
    },

    /// Print the resolved configuration with secrets redacted
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    // Load configuration from file or environment
    let config = if let Some(config_path) = cli.config {
        println!("Loading configuration from {}", config_path.display());
        EngineConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        EngineConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    match cli.command {
        Commands::CheckConfig => {
            println!("{:#?}", config.tts);
            Ok(())
        }
        Commands::Synth {
            text,
            output,
            request_id,
        } => {
            let request_id = request_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            synthesize(config, request_id, text, output).await
        }
    }
}

async fn synthesize(
    config: EngineConfig,
    request_id: String,
    text: String,
    output: PathBuf,
) -> anyhow::Result<()> {
    let sample_rate = config.tts.sample_rate;
    let (tts, mut outputs) = BytedanceDuplexTts::start(config.tts, Arc::new(LoggingObserver))?;

    let request = async {
        let result = tts
            .request_tts(TextInput::new(request_id.clone(), text, true))
            .await;
        if let Err(e) = &result {
            warn!("Request failed: {}", e);
        }
        result
    };

    let collect = async {
        let mut pcm: Vec<u8> = Vec::new();
        loop {
            let next = tokio::select! {
                next = outputs.recv() => next,
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted; cancelling request {}", request_id);
                    tts.cancel_tts().await;
                    continue;
                }
            };
            let Some(event) = next else {
                return Err(anyhow!("output stream closed before the request ended"));
            };
            match event {
                TtsOutput::Audio { data, .. } => pcm.extend_from_slice(&data),
                TtsOutput::Ttfb { ttfb_ms, .. } => info!("TTFB: {}ms", ttfb_ms),
                TtsOutput::Error { error, .. } if error.is_fatal() => {
                    return Err(anyhow!("synthesis failed: {}", error));
                }
                TtsOutput::AudioEnd {
                    request_id: ended,
                    reason,
                    total_audio_duration_ms,
                    ..
                } if ended == request_id => {
                    info!(
                        "Request {} ended ({}), {}ms of audio",
                        ended,
                        reason.as_str(),
                        total_audio_duration_ms
                    );
                    if reason == AudioEndReason::Error {
                        return Err(anyhow!("synthesis ended with an error"));
                    }
                    return Ok(pcm);
                }
                _ => {}
            }
        }
    };

    let (requested, collected) = tokio::join!(request, collect);
    tts.close().await;
    requested?;
    let pcm = collected?;

    write_wav(&output, &pcm, sample_rate)?;
    println!("Wrote {} bytes of audio to {}", pcm.len(), output.display());
    Ok(())
}

/// Write 16-bit little-endian mono PCM as a WAV file.
fn write_wav(path: &PathBuf, pcm: &[u8], sample_rate: u32) -> anyhow::Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for sample in pcm.chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([sample[0], sample[1]]))?;
    }
    writer.finalize()?;
    Ok(())
}
