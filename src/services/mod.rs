//! Boundaries to collaborators outside the audio pipeline
//!
//! Speech recognition, synthesis, the LLM and persistence are consumed as
//! blocking black-box calls through these traits. HTTP clients for the hosted
//! providers live in the submodules; the SQLite stores live in [`crate::db`].

pub mod deadline;
mod llm;
mod stt;
mod tts;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use deadline::call_with_deadline;
pub use llm::{OpenAiCommandProcessor, base_prompt, format_prompt};
pub use stt::{HttpSpeechToText, SttProvider};
pub use tts::{HttpTextToSpeech, TtsProvider};

use crate::Result;

/// Turns recorded speech into text
pub trait SpeechToText: Send + Sync {
    /// Transcribe a mono WAV file spoken in `language`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Stt`] or a transport error on failure
    fn transcribe(&self, wav: &[u8], language: &str) -> Result<String>;
}

/// Turns reply text into audio (WAV or MP3 bytes)
pub trait TextToSpeech: Send + Sync {
    /// Synthesize `text` in `language` with `voice`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Tts`] or a transport error on failure
    fn synthesize(&self, text: &str, language: &str, voice: &str) -> Result<Vec<u8>>;
}

/// Free-form answer for commands no pattern recognized
pub trait CommandProcessor: Send + Sync {
    /// Answer `text` for `user_id` in `language`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Llm`] or a transport error on failure
    fn process(&self, text: &str, language: &str, user_id: &str) -> Result<String>;

    /// Answer with `personality` already known to the caller
    ///
    /// `None` means the caller has nothing, so the processor may look it up.
    /// The default ignores personality entirely.
    ///
    /// # Errors
    ///
    /// Same as [`process`](Self::process)
    fn process_as(&self, text: &str, language: &str, user_id: &str, personality: Option<&str>) -> Result<String> {
        let _ = personality;
        self.process(text, language, user_id)
    }
}

/// Per-user preferences a session starts with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    /// Language code (`uk`, `en`, `de`)
    pub language: String,
    /// Extra personality instructions for the LLM
    pub personality_text: Option<String>,
}

/// Looks up user settings
pub trait SettingsStore: Send + Sync {
    /// Settings for `user_id`
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UserNotFound`] for unknown users
    fn get(&self, user_id: &str) -> Result<UserSettings>;
}

/// One classified command and, once dispatched, its reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Row id (0 before insertion)
    pub id: i64,
    /// Who spoke
    pub user_id: String,
    /// Transcribed command
    pub command: String,
    /// Reply text, filled in after dispatch
    pub response: Option<String>,
    /// Language the command was classified in
    pub language: String,
    /// When the command was heard
    pub timestamp: DateTime<Utc>,
}

/// Persists command history
pub trait HistoryStore: Send + Sync {
    /// Insert a record, returning its id
    ///
    /// # Errors
    ///
    /// Returns error if the write fails
    fn append(&self, user_id: &str, command: &str, language: &str, timestamp: DateTime<Utc>) -> Result<i64>;

    /// Record the reply for a previously appended command
    ///
    /// # Errors
    ///
    /// Returns error if the write fails
    fn set_response(&self, id: i64, response: &str) -> Result<()>;
}

/// Stand-in for a provider with no API key; every call fails so the
/// pipeline answers with its apology
#[derive(Debug, Default, Clone, Copy)]
pub struct Unconfigured;

impl SpeechToText for Unconfigured {
    fn transcribe(&self, _wav: &[u8], _language: &str) -> Result<String> {
        Err(crate::Error::Stt("no speech-to-text provider configured".to_string()))
    }
}

impl TextToSpeech for Unconfigured {
    fn synthesize(&self, _text: &str, _language: &str, _voice: &str) -> Result<Vec<u8>> {
        Err(crate::Error::Tts("no text-to-speech provider configured".to_string()))
    }
}
