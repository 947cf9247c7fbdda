//! TOML configuration file loading
//!
//! Supports `~/.config/voicebox/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;
use crate::services::{SttProvider, TtsProvider};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VoiceboxConfigFile {
    /// Audio device selection
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Wake detection
    #[serde(default)]
    pub vad: VadFileConfig,

    /// Command capture
    #[serde(default)]
    pub recorder: RecorderFileConfig,

    /// Speech-to-text
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Text-to-speech
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Fallback command processor
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Session lifecycle
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Control API
    #[serde(default)]
    pub server: ServerFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Audio device configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Hardware index of the microphone, overriding name matching
    pub input_device_index: Option<usize>,

    /// Microphone name fragments, most preferred first
    pub input_name_patterns: Option<Vec<String>>,

    /// Capture rates to try, in order
    pub capture_rates: Option<Vec<u32>>,

    /// Hardware index of the speaker
    pub output_device_index: Option<usize>,

    /// Speaker name fragments, most preferred first
    pub output_name_patterns: Option<Vec<String>>,

    /// Playback rates to try, in order
    pub playback_rates: Option<Vec<u32>>,

    /// Frames per capture read
    pub chunk_size: Option<usize>,
}

/// Voice activity detector configuration
#[derive(Debug, Default, Deserialize)]
pub struct VadFileConfig {
    /// "fallback", "vad" or "always_on"
    pub mode: Option<String>,
    pub sensitivity: Option<f32>,
    pub min_duration_secs: Option<f64>,
    pub calibration_secs: Option<f64>,
    pub max_gap_chunks: Option<usize>,
}

/// Recorder configuration
#[derive(Debug, Default, Deserialize)]
pub struct RecorderFileConfig {
    pub silence_threshold: Option<f32>,
    pub silence_duration_secs: Option<f64>,
    pub max_duration_secs: Option<f64>,
}

/// Speech-to-text configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    pub provider: Option<SttProvider>,
    pub model: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Text-to-speech configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    pub provider: Option<TtsProvider>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub speed: Option<f32>,
    pub timeout_secs: Option<u64>,
}

/// LLM configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Answer unrecognized commands with the LLM
    pub enabled: Option<bool>,
    pub model: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Session configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Bound on waiting for a worker to exit
    pub stop_timeout_secs: Option<f64>,
    /// Language for users added without one
    pub default_language: Option<String>,
}

/// Server configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Control API port
    pub port: Option<u16>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Parse a config file body
///
/// # Errors
///
/// Returns error if the TOML is malformed or a field has the wrong type
pub fn parse_config_file(content: &str) -> Result<VoiceboxConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load the TOML config file from the standard path
///
/// Returns `VoiceboxConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VoiceboxConfigFile {
    config_file_path().map_or_else(VoiceboxConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_config_file_from(path: &Path) -> VoiceboxConfigFile {
    if !path.exists() {
        return VoiceboxConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match parse_config_file(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                VoiceboxConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            VoiceboxConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/voicebox/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voicebox").join("config.toml"))
}
