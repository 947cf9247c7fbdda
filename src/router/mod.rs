//! Intent classification and dispatch for transcribed commands

mod integrations;
mod patterns;
mod responses;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use serde::Serialize;

pub use integrations::{CalendarService, MusicService, Unavailable, WeatherService, WebSearch};
pub use patterns::{IntentKind, PatternTable};
pub use responses::{date_reply, time_reply};

use crate::Result;
use crate::i18n::{self, Language};
use crate::services::{CommandProcessor, HistoryStore, call_with_deadline};

const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(30);

/// A classified command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandIntent {
    /// Category
    pub kind: IntentKind,
    /// First capture when a pattern has two groups
    pub action: Option<String>,
    /// Last capture; the whole utterance for web searches
    pub value: Option<String>,
    /// The utterance as heard
    pub text: String,
}

impl CommandIntent {
    fn new(kind: IntentKind, text: &str) -> Self {
        Self {
            kind,
            action: None,
            value: None,
            text: text.to_string(),
        }
    }
}

fn clean_capture(raw: &str) -> Option<String> {
    let cleaned = raw.trim_matches(|c: char| c.is_whitespace() || matches!(c, '.' | ',' | '!' | '?'));
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

/// Classifies text into intents and produces replies
pub struct CommandRouter {
    tables: HashMap<Language, PatternTable>,
    history: Option<Arc<dyn HistoryStore>>,
    processor: Option<Arc<dyn CommandProcessor>>,
    music: Arc<dyn MusicService>,
    weather: Arc<dyn WeatherService>,
    calendar: Arc<dyn CalendarService>,
    search: Arc<dyn WebSearch>,
    llm_timeout: Duration,
}

impl std::fmt::Debug for CommandRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRouter")
            .field("languages", &self.tables.keys().collect::<Vec<_>>())
            .field("history", &self.history.is_some())
            .field("processor", &self.processor.is_some())
            .finish_non_exhaustive()
    }
}

impl CommandRouter {
    /// Create a router with placeholder integrations and no persistence
    ///
    /// # Errors
    ///
    /// Returns error if a built-in pattern fails to compile
    pub fn new() -> Result<Self> {
        let tables = Language::ALL
            .iter()
            .map(|&language| Ok((language, PatternTable::compile(language)?)))
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Self {
            tables,
            history: None,
            processor: None,
            music: Arc::new(Unavailable),
            weather: Arc::new(Unavailable),
            calendar: Arc::new(Unavailable),
            search: Arc::new(Unavailable),
            llm_timeout: DEFAULT_LLM_TIMEOUT,
        })
    }

    /// Persist every routed command
    #[must_use]
    pub fn with_history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    /// Answer unknown commands with an LLM, bounded by `timeout`
    #[must_use]
    pub fn with_processor(mut self, processor: Arc<dyn CommandProcessor>, timeout: Duration) -> Self {
        self.processor = Some(processor);
        self.llm_timeout = timeout;
        self
    }

    /// Use a real music integration
    #[must_use]
    pub fn with_music(mut self, music: Arc<dyn MusicService>) -> Self {
        self.music = music;
        self
    }

    /// Use a real weather integration
    #[must_use]
    pub fn with_weather(mut self, weather: Arc<dyn WeatherService>) -> Self {
        self.weather = weather;
        self
    }

    /// Use a real calendar integration
    #[must_use]
    pub fn with_calendar(mut self, calendar: Arc<dyn CalendarService>) -> Self {
        self.calendar = calendar;
        self
    }

    /// Use a real search integration
    #[must_use]
    pub fn with_search(mut self, search: Arc<dyn WebSearch>) -> Self {
        self.search = search;
        self
    }

    /// Classify `text` spoken in `language`
    ///
    /// Pattern categories are tried first, then the generic "tell me about"
    /// phrasings, then the result is [`IntentKind::Unknown`].
    #[must_use]
    pub fn classify(&self, text: &str, language: &str) -> CommandIntent {
        let language = Language::from_code(language);
        let Some(table) = self.tables.get(&language) else {
            return CommandIntent::new(IntentKind::Unknown, text);
        };

        if let Some((kind, groups)) = table.find(text) {
            let mut intent = CommandIntent::new(kind, text);
            match groups.as_slice() {
                [] => {}
                [value] => intent.value = clean_capture(value),
                [action, value, ..] => {
                    intent.action = clean_capture(action);
                    intent.value = clean_capture(value);
                }
            }
            return intent;
        }

        if table.is_web_search(text) {
            let mut intent = CommandIntent::new(IntentKind::WebSearch, text);
            intent.value = Some(text.trim().to_string());
            return intent;
        }

        CommandIntent::new(IntentKind::Unknown, text)
    }

    /// Produce the reply for an intent; never fails
    ///
    /// Integration and LLM failures are answered with the language's apology.
    #[must_use]
    pub fn dispatch(&self, intent: &CommandIntent, language: &str, user_id: &str) -> String {
        self.reply(intent, language, user_id, None)
    }

    fn reply(&self, intent: &CommandIntent, language: &str, user_id: &str, personality: Option<&str>) -> String {
        let lang = Language::from_code(language);
        let action = intent.action.as_deref();
        let value = intent.value.as_deref();

        let result = match intent.kind {
            IntentKind::Time => Ok(time_reply(lang, Local::now().time())),
            IntentKind::Date => Ok(date_reply(lang, Local::now().date_naive())),
            IntentKind::Joke => Ok(i18n::joke(lang).to_string()),
            IntentKind::Weather => self.weather.current(value, lang, user_id),
            IntentKind::Music => self.music.play(action, value, lang, user_id),
            IntentKind::Calendar => self.calendar.handle(action, value, lang, user_id),
            IntentKind::WebSearch => self.search.search(value.unwrap_or(&intent.text), lang),
            IntentKind::Unknown => return self.unknown_reply(intent, lang, user_id, personality),
        };

        result.unwrap_or_else(|e| {
            tracing::warn!(intent = intent.kind.as_str(), error = %e, "integration failed");
            i18n::apology(lang).to_string()
        })
    }

    fn unknown_reply(
        &self,
        intent: &CommandIntent,
        language: Language,
        user_id: &str,
        personality: Option<&str>,
    ) -> String {
        let Some(processor) = self.processor.as_ref().map(Arc::clone) else {
            return i18n::not_understood(language).to_string();
        };
        if intent.text.trim().is_empty() {
            return i18n::not_understood(language).to_string();
        }

        let text = intent.text.clone();
        let user = user_id.to_string();
        let personality = personality.map(str::to_string);
        match call_with_deadline(self.llm_timeout, "llm", move || {
            processor.process_as(&text, language.code(), &user, personality.as_deref())
        }) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "LLM fallback failed");
                i18n::apology(language).to_string()
            }
        }
    }

    /// Classify, persist, dispatch and record the reply
    ///
    /// History is written before dispatch and updated afterwards whatever the
    /// outcome; persistence failures are logged and never block the reply.
    #[must_use]
    pub fn route(&self, text: &str, language: &str, user_id: &str) -> (CommandIntent, String) {
        self.route_as(text, language, user_id, None)
    }

    /// [`route`](Self::route) with personality text the caller already holds
    ///
    /// Sessions pass the text loaded at start so the LLM fallback does not
    /// look the user up on every command.
    #[must_use]
    pub fn route_as(
        &self,
        text: &str,
        language: &str,
        user_id: &str,
        personality: Option<&str>,
    ) -> (CommandIntent, String) {
        let intent = self.classify(text, language);
        tracing::info!(
            user_id,
            intent = intent.kind.as_str(),
            action = ?intent.action,
            value = ?intent.value,
            "command classified"
        );

        let record_id = self.history.as_ref().and_then(|history| {
            history
                .append(user_id, text, language, Utc::now())
                .map_err(|e| tracing::warn!(error = %e, "failed to record command"))
                .ok()
        });

        let reply = self.reply(&intent, language, user_id, personality);

        if let (Some(history), Some(id)) = (self.history.as_ref(), record_id)
            && let Err(e) = history.set_response(id, &reply)
        {
            tracing::warn!(error = %e, id, "failed to record response");
        }

        (intent, reply)
    }
}
