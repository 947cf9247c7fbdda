//! Error types for the voice pipeline

use thiserror::Error;

/// Result type alias for voicebox operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// No capture or playback device could be opened
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Transient read error on an open capture stream
    #[error("capture failure: {0}")]
    CaptureFailure(String),

    /// Playback stream error
    #[error("playback error: {0}")]
    Playback(String),

    /// Audio encoding, decoding or resampling error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Command processor (LLM) error
    #[error("LLM error: {0}")]
    Llm(String),

    /// External call exceeded its deadline
    #[error("{0} timed out")]
    Timeout(String),

    /// Settings lookup found no such user
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// Session worker did not stop within the join bound
    #[error("session registry timeout: {0}")]
    RegistryTimeout(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Whether this error came from an external service call (STT, TTS, LLM)
    ///
    /// These are answered with a spoken apology and never end the session.
    #[must_use]
    pub const fn is_external_service(&self) -> bool {
        matches!(
            self,
            Self::Stt(_) | Self::Tts(_) | Self::Llm(_) | Self::Timeout(_) | Self::Http(_)
        )
    }

    /// Whether this error is a hardware problem that warrants a reopen or degrade
    #[must_use]
    pub const fn is_device(&self) -> bool {
        matches!(self, Self::DeviceUnavailable(_) | Self::CaptureFailure(_) | Self::Playback(_))
    }
}
