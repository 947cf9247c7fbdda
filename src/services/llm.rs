//! LLM fallback for commands no pattern recognized

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{CommandProcessor, SettingsStore};
use crate::i18n::Language;
use crate::{Error, Result};

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// System prompt for a voice reply in `language`
#[must_use]
pub fn base_prompt(language: Language) -> String {
    format!(
        "You are a friendly voice assistant on a small home device. Your answer will be read \
         aloud, so keep it to two or three short sentences without lists or markdown. Always \
         answer in {}.",
        language.native_name()
    )
}

/// Append a user's personality instructions to a base prompt
#[must_use]
pub fn format_prompt(base: &str, personality: Option<&str>) -> String {
    match personality.map(str::trim) {
        Some(extra) if !extra.is_empty() => {
            format!("{base}\n\nAdditional personality instructions:\n{extra}")
        }
        _ => base.to_string(),
    }
}

/// `OpenAI` chat completions as a [`CommandProcessor`]
pub struct OpenAiCommandProcessor {
    client: reqwest::blocking::Client,
    api_key: String,
    model: String,
    settings: Option<Arc<dyn SettingsStore>>,
}

impl std::fmt::Debug for OpenAiCommandProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCommandProcessor")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl OpenAiCommandProcessor {
    /// Create a processor
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing or the HTTP client cannot be built
    pub fn new(api_key: String, model: String, timeout: Duration) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for LLM".to_string()));
        }

        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            model,
            settings: None,
        })
    }

    /// Look up each user's personality text in `settings`
    #[must_use]
    pub fn with_settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    fn stored_personality(&self, user_id: &str) -> Option<String> {
        self.settings
            .as_ref()
            .and_then(|s| s.get(user_id).ok())
            .and_then(|s| s.personality_text)
    }
}

impl CommandProcessor for OpenAiCommandProcessor {
    fn process(&self, text: &str, language: &str, user_id: &str) -> Result<String> {
        self.process_as(text, language, user_id, None)
    }

    fn process_as(&self, text: &str, language: &str, user_id: &str, personality: Option<&str>) -> Result<String> {
        let stored = match personality {
            Some(_) => None,
            None => self.stored_personality(user_id),
        };
        let system = format_prompt(
            &base_prompt(Language::from_code(language)),
            personality.or(stored.as_deref()),
        );
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
            max_tokens: 300,
        };

        tracing::debug!(model = %self.model, user_id, "requesting LLM answer");
        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            tracing::error!(status = %status, body = %body, "OpenAI chat error");
            return Err(Error::Llm(format!("OpenAI chat error {status}: {body}")));
        }

        let result: ChatResponse = response.json()?;
        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::Llm("empty completion".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn personality_is_appended() {
        let prompt = format_prompt("base", Some("  Speak like a pirate. "));
        assert_eq!(prompt, "base\n\nAdditional personality instructions:\nSpeak like a pirate.");
    }

    #[test]
    fn blank_personality_is_ignored() {
        assert_eq!(format_prompt("base", None), "base");
        assert_eq!(format_prompt("base", Some("   ")), "base");
    }

    #[test]
    fn base_prompt_names_language() {
        assert!(base_prompt(Language::De).contains("Deutsch"));
        assert!(base_prompt(Language::Uk).contains("Українська"));
    }

    #[test]
    fn missing_key_is_rejected() {
        let result = OpenAiCommandProcessor::new(String::new(), "gpt-4o-mini".into(), Duration::from_secs(1));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
