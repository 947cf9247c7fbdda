//! Configuration management
//!
//! Every setting resolves as environment variable, then TOML file, then
//! built-in default.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::audio::{DEFAULT_CHUNK_SIZE, DeviceHint};
use crate::i18n::Language;
use crate::recorder::RecorderConfig;
use crate::services::{SttProvider, TtsProvider};
use crate::session::{DEFAULT_STOP_TIMEOUT, SessionConfig};
use crate::vad::{DetectorConfig, DetectorMode};
use crate::{Error, Result};

use file::VoiceboxConfigFile;

/// Microphone name fragments tried before any other input device
pub const DEFAULT_INPUT_PATTERNS: &[&str] = &["usb pnp", "respeaker", "seeed", "usb"];

/// Default control API port
pub const DEFAULT_PORT: u16 = 18890;

/// Voicebox configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to data directory (database)
    pub data_dir: PathBuf,

    /// Audio device selection
    pub audio: AudioConfig,

    /// Wake detection
    pub detector: DetectorConfig,

    /// Command capture
    pub recorder: RecorderConfig,

    /// Speech-to-text
    pub stt: SttConfig,

    /// Text-to-speech
    pub tts: TtsConfig,

    /// Fallback command processor
    pub llm: LlmConfig,

    /// Bound on waiting for a session worker to exit
    pub stop_timeout: Duration,

    /// Language for users added without one
    pub default_language: Language,

    /// HTTP control API
    pub api_server: ApiServerConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Audio device selection
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Microphone preference
    pub input: DeviceHint,

    /// Capture rates to try, in order
    pub capture_rates: Vec<u32>,

    /// Speaker preference
    pub output: DeviceHint,

    /// Playback rates to try, in order
    pub playback_rates: Vec<u32>,

    /// Frames per capture read
    pub chunk_size: usize,
}

/// Speech-to-text settings
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub provider: SttProvider,
    pub model: String,
    pub timeout: Duration,
}

/// Text-to-speech settings
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub provider: TtsProvider,
    pub model: String,
    pub voice: String,

    /// Speed multiplier (0.25 to 4.0)
    pub speed: f32,
    pub timeout: Duration,
}

/// LLM settings
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Answer unrecognized commands with the LLM
    pub enabled: bool,
    pub model: String,
    pub timeout: Duration,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port to listen on
    pub port: u16,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper, TTS and chat)
    pub openai: Option<String>,

    /// `Deepgram` API key (optional STT)
    pub deepgram: Option<String>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<String>,
}

impl Config {
    /// Load configuration from the environment and the standard config file
    ///
    /// # Errors
    ///
    /// Returns error if a setting is out of range
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        let config = Self::from_sources(fc, |key| std::env::var(key).ok())?;

        // Ensure data dir exists
        std::fs::create_dir_all(&config.data_dir).ok();

        Ok(config)
    }

    /// Resolve settings from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a setting is out of range or cannot be parsed
    pub fn from_sources(fc: VoiceboxConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // Load API keys (env > toml > None)
        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            deepgram: env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram),
            elevenlabs: env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs),
        };

        let input_index = match env("VOICEBOX_MIC_INDEX") {
            Some(raw) => Some(raw.trim().parse::<usize>().map_err(|_| {
                Error::Config(format!("VOICEBOX_MIC_INDEX must be a device index, got {raw:?}"))
            })?),
            None => fc.audio.input_device_index,
        };
        let input_patterns = fc.audio.input_name_patterns.unwrap_or_else(|| {
            DEFAULT_INPUT_PATTERNS.iter().map(ToString::to_string).collect()
        });
        let audio = AudioConfig {
            input: DeviceHint::with_patterns(&input_patterns).with_index(input_index),
            capture_rates: rates(
                "capture_rates",
                fc.audio.capture_rates,
                &DetectorConfig::default().capture_rates,
            )?,
            output: DeviceHint::with_patterns(&fc.audio.output_name_patterns.unwrap_or_default())
                .with_index(fc.audio.output_device_index),
            playback_rates: rates(
                "playback_rates",
                fc.audio.playback_rates,
                &SessionConfig::default().playback_rates,
            )?,
            chunk_size: match fc.audio.chunk_size {
                Some(0) => return Err(Error::Config("chunk_size must be positive".to_string())),
                Some(size) => size,
                None => DEFAULT_CHUNK_SIZE,
            },
        };

        let detector_defaults = DetectorConfig::default();
        let mode = match env("VOICEBOX_VAD_MODE").or(fc.vad.mode) {
            Some(mode) => mode.parse::<DetectorMode>()?,
            None => detector_defaults.mode,
        };
        let sensitivity = fc.vad.sensitivity.unwrap_or(detector_defaults.sensitivity);
        if !(0.0..=1.0).contains(&sensitivity) {
            return Err(Error::Config(format!(
                "vad sensitivity must be within 0..=1, got {sensitivity}"
            )));
        }
        let detector = DetectorConfig {
            mode,
            sensitivity,
            min_duration: secs("vad.min_duration_secs", fc.vad.min_duration_secs)?
                .unwrap_or(detector_defaults.min_duration),
            calibration: secs("vad.calibration_secs", fc.vad.calibration_secs)?
                .unwrap_or(detector_defaults.calibration),
            max_gap_chunks: fc.vad.max_gap_chunks.unwrap_or(detector_defaults.max_gap_chunks),
            hint: audio.input.clone(),
            capture_rates: audio.capture_rates.clone(),
        };

        let recorder_defaults = RecorderConfig::default();
        let recorder = RecorderConfig {
            threshold: fc.recorder.silence_threshold.unwrap_or(recorder_defaults.threshold),
            silence_duration: secs("recorder.silence_duration_secs", fc.recorder.silence_duration_secs)?
                .unwrap_or(recorder_defaults.silence_duration),
            max_duration: secs("recorder.max_duration_secs", fc.recorder.max_duration_secs)?
                .unwrap_or(recorder_defaults.max_duration),
            hint: audio.input.clone(),
            capture_rates: audio.capture_rates.clone(),
        };

        let stt = SttConfig {
            provider: fc.stt.provider.unwrap_or_default(),
            model: env("VOICEBOX_STT_MODEL")
                .or(fc.stt.model)
                .unwrap_or_else(|| "whisper-1".to_string()),
            timeout: Duration::from_secs(fc.stt.timeout_secs.unwrap_or(30)),
        };

        let speed = fc.tts.speed.unwrap_or(1.0);
        if !(0.25..=4.0).contains(&speed) {
            return Err(Error::Config(format!("tts speed must be within 0.25..=4.0, got {speed}")));
        }
        let tts = TtsConfig {
            provider: fc.tts.provider.unwrap_or_default(),
            model: env("VOICEBOX_TTS_MODEL")
                .or(fc.tts.model)
                .unwrap_or_else(|| "tts-1".to_string()),
            voice: env("VOICEBOX_TTS_VOICE")
                .or(fc.tts.voice)
                .unwrap_or_else(|| "alloy".to_string()),
            speed,
            timeout: Duration::from_secs(fc.tts.timeout_secs.unwrap_or(30)),
        };

        let llm = LlmConfig {
            enabled: fc.llm.enabled.unwrap_or(true),
            model: env("VOICEBOX_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            timeout: Duration::from_secs(fc.llm.timeout_secs.unwrap_or(30)),
        };

        let default_language = match fc.session.default_language {
            Some(code) if Language::is_supported(&code) => Language::from_code(&code),
            Some(code) => {
                return Err(Error::Config(format!("unsupported default_language: {code}")));
            }
            None => Language::default(),
        };

        let api_server = ApiServerConfig {
            port: env("VOICEBOX_PORT")
                .and_then(|p| p.parse().ok())
                .or(fc.server.port)
                .unwrap_or(DEFAULT_PORT),
        };

        // Determine data directory (~/.local/share/voicebox on Linux)
        let data_dir = env("VOICEBOX_DATA_DIR").map_or_else(
            || {
                directories::BaseDirs::new()
                    .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("voicebox"))
            },
            PathBuf::from,
        );

        Ok(Self {
            data_dir,
            audio,
            detector,
            recorder,
            stt,
            tts,
            llm,
            stop_timeout: secs("session.stop_timeout_secs", fc.session.stop_timeout_secs)?
                .unwrap_or(DEFAULT_STOP_TIMEOUT),
            default_language,
            api_server,
            api_keys,
        })
    }

    /// Path of the SQLite database
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("voicebox.db")
    }

    /// Pipeline settings handed to every session
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            detector: self.detector.clone(),
            recorder: self.recorder.clone(),
            playback_hint: self.audio.output.clone(),
            playback_rates: self.audio.playback_rates.clone(),
            voice: self.tts.voice.clone(),
            stt_timeout: self.stt.timeout,
            tts_timeout: self.tts.timeout,
        }
    }

    /// Key for the configured STT provider
    #[must_use]
    pub fn stt_api_key(&self) -> Option<&str> {
        match self.stt.provider {
            SttProvider::Whisper => self.api_keys.openai.as_deref(),
            SttProvider::Deepgram => self.api_keys.deepgram.as_deref(),
        }
    }

    /// Key for the configured TTS provider
    #[must_use]
    pub fn tts_api_key(&self) -> Option<&str> {
        match self.tts.provider {
            TtsProvider::OpenAi => self.api_keys.openai.as_deref(),
            TtsProvider::ElevenLabs => self.api_keys.elevenlabs.as_deref(),
        }
    }
}

fn secs(field: &str, value: Option<f64>) -> Result<Option<Duration>> {
    value
        .map(|v| {
            Duration::try_from_secs_f64(v)
                .map_err(|_| Error::Config(format!("{field} must be a non-negative number of seconds")))
        })
        .transpose()
}

fn rates(field: &str, value: Option<Vec<u32>>, default: &[u32]) -> Result<Vec<u32>> {
    match value {
        Some(rates) if rates.is_empty() || rates.contains(&0) => Err(Error::Config(format!(
            "{field} must list at least one non-zero rate"
        ))),
        Some(rates) => Ok(rates),
        None => Ok(default.to_vec()),
    }
}
