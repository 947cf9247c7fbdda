//! Third-party integrations the router delegates to
//!
//! Real music, weather, calendar and search integrations are plugged in
//! through these traits. [`Unavailable`] answers every request with a polite
//! "not available yet" in the user's language.

use crate::Result;
use crate::i18n::Language;

/// Music playback
pub trait MusicService: Send + Sync {
    /// Start, resume or control playback; `query` names what to play
    ///
    /// # Errors
    ///
    /// Returns error if the service call fails
    fn play(&self, action: Option<&str>, query: Option<&str>, language: Language, user_id: &str) -> Result<String>;
}

/// Weather reports
pub trait WeatherService: Send + Sync {
    /// Current conditions for the user's location
    ///
    /// # Errors
    ///
    /// Returns error if the service call fails
    fn current(&self, condition: Option<&str>, language: Language, user_id: &str) -> Result<String>;
}

/// Calendar access
pub trait CalendarService: Send + Sync {
    /// List upcoming events, or add one when `value` is given
    ///
    /// # Errors
    ///
    /// Returns error if the service call fails
    fn handle(&self, action: Option<&str>, value: Option<&str>, language: Language, user_id: &str) -> Result<String>;
}

/// General knowledge lookup
pub trait WebSearch: Send + Sync {
    /// Answer a "tell me about X" question
    ///
    /// # Errors
    ///
    /// Returns error if the service call fails
    fn search(&self, query: &str, language: Language) -> Result<String>;
}

/// Placeholder for every integration
#[derive(Debug, Default, Clone, Copy)]
pub struct Unavailable;

impl MusicService for Unavailable {
    fn play(&self, _action: Option<&str>, query: Option<&str>, language: Language, _user_id: &str) -> Result<String> {
        Ok(match (language, query) {
            (Language::Uk, Some(q)) => format!("Не можу увімкнути «{q}»: музичний сервіс не підключено."),
            (Language::Uk, None) => "Музичний сервіс не підключено.".to_string(),
            (Language::En, Some(q)) => format!("I can't play \"{q}\": no music service is connected."),
            (Language::En, None) => "No music service is connected.".to_string(),
            (Language::De, Some(q)) => format!("Ich kann „{q}“ nicht abspielen: kein Musikdienst verbunden."),
            (Language::De, None) => "Kein Musikdienst verbunden.".to_string(),
        })
    }
}

impl WeatherService for Unavailable {
    fn current(&self, _condition: Option<&str>, language: Language, _user_id: &str) -> Result<String> {
        Ok(match language {
            Language::Uk => "На жаль, я поки не можу перевірити погоду. Ця функція в розробці.",
            Language::En => "Sorry, I can't check the weather yet. This feature is under development.",
            Language::De => {
                "Leider kann ich das Wetter noch nicht überprüfen. Diese Funktion ist in Entwicklung."
            }
        }
        .to_string())
    }
}

impl CalendarService for Unavailable {
    fn handle(&self, _action: Option<&str>, _value: Option<&str>, language: Language, _user_id: &str) -> Result<String> {
        Ok(match language {
            Language::Uk => "На жаль, інтеграція з календарем ще в розробці.",
            Language::En => "Sorry, calendar integration is still in development.",
            Language::De => "Leider ist die Kalender-Integration noch in Entwicklung.",
        }
        .to_string())
    }
}

impl WebSearch for Unavailable {
    fn search(&self, query: &str, language: Language) -> Result<String> {
        Ok(match language {
            Language::Uk => format!("Пошук про «{query}» стане доступним пізніше."),
            Language::En => format!("Searching for \"{query}\" isn't available yet."),
            Language::De => format!("Die Suche nach „{query}“ ist noch nicht verfügbar."),
        })
    }
}
