//! Text-to-speech over hosted APIs

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::TextToSpeech;
use crate::{Error, Result};

/// TTS provider backend
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsProvider {
    /// `OpenAI` speech endpoint
    #[default]
    OpenAi,
    /// `ElevenLabs`
    ElevenLabs,
}

/// Blocking HTTP text-to-speech client; returns MP3 bytes
#[derive(Debug)]
pub struct HttpTextToSpeech {
    client: reqwest::blocking::Client,
    api_key: String,
    model: String,
    speed: f32,
    provider: TtsProvider,
}

impl HttpTextToSpeech {
    /// Create a client for `provider`
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing or the HTTP client cannot be built
    pub fn new(
        provider: TtsProvider,
        api_key: String,
        model: String,
        speed: f32,
        timeout: Duration,
    ) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(match provider {
                TtsProvider::OpenAi => "OpenAI API key required for TTS".to_string(),
                TtsProvider::ElevenLabs => "ElevenLabs API key required for TTS".to_string(),
            }));
        }

        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_key,
            model,
            speed,
            provider,
        })
    }

    fn synthesize_openai(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice,
            speed: self.speed,
            response_format: "mp3",
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        Ok(response.bytes()?.to_vec())
    }

    fn synthesize_elevenlabs(&self, text: &str, voice_id: &str) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!("https://api.elevenlabs.io/v1/text-to-speech/{voice_id}");
        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        Ok(response.bytes()?.to_vec())
    }
}

impl TextToSpeech for HttpTextToSpeech {
    fn synthesize(&self, text: &str, language: &str, voice: &str) -> Result<Vec<u8>> {
        tracing::debug!(chars = text.chars().count(), language, voice, "synthesizing speech");
        let audio = match self.provider {
            TtsProvider::OpenAi => self.synthesize_openai(text, voice)?,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(text, voice)?,
        };
        tracing::debug!(audio_bytes = audio.len(), "synthesis complete");
        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_is_rejected() {
        let result = HttpTextToSpeech::new(
            TtsProvider::OpenAi,
            String::new(),
            "tts-1".to_string(),
            1.0,
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn provider_names_deserialize() {
        let provider: TtsProvider = serde_json::from_str("\"elevenlabs\"").unwrap();
        assert_eq!(provider, TtsProvider::ElevenLabs);
        let provider: TtsProvider = serde_json::from_str("\"openai\"").unwrap();
        assert_eq!(provider, TtsProvider::OpenAi);
    }
}
