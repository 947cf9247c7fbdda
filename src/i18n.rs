//! Languages and the fixed phrases the assistant speaks

use std::fmt;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// A supported interface language
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Ukrainian
    #[default]
    Uk,
    /// English
    En,
    /// German
    De,
}

impl Language {
    /// All supported languages
    pub const ALL: [Self; 3] = [Self::Uk, Self::En, Self::De];

    /// Parse a language code; anything unsupported falls back to English
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_lowercase().as_str() {
            "uk" | "ua" | "uk-ua" => Self::Uk,
            "de" | "de-de" => Self::De,
            _ => Self::En,
        }
    }

    /// ISO 639-1 code
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Uk => "uk",
            Self::En => "en",
            Self::De => "de",
        }
    }

    /// The language's own name for itself
    #[must_use]
    pub const fn native_name(self) -> &'static str {
        match self {
            Self::Uk => "Українська",
            Self::En => "English",
            Self::De => "Deutsch",
        }
    }

    /// Whether `code` names a supported language exactly
    #[must_use]
    pub fn is_supported(code: &str) -> bool {
        Self::ALL.iter().any(|l| l.code() == code)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Spoken when an external service (STT, TTS, LLM) fails
#[must_use]
pub const fn apology(language: Language) -> &'static str {
    match language {
        Language::Uk => "Вибачте, сталася помилка. Спробуйте ще раз.",
        Language::En => "Sorry, something went wrong. Please try again.",
        Language::De => "Entschuldigung, es ist ein Fehler aufgetreten. Bitte versuchen Sie es erneut.",
    }
}

/// Spoken when a recording transcribed to nothing
#[must_use]
pub const fn did_not_hear(language: Language) -> &'static str {
    match language {
        Language::Uk => "Вибачте, я вас не почув.",
        Language::En => "Sorry, I didn't catch that.",
        Language::De => "Entschuldigung, ich habe Sie nicht verstanden.",
    }
}

const NOT_UNDERSTOOD_UK: &[&str] = &[
    "Вибачте, я не зрозумів вашу команду.",
    "Не впевнений, що ви маєте на увазі.",
    "Можете, будь ласка, сформулювати по-іншому?",
    "Я не розпізнав цю команду.",
];

const NOT_UNDERSTOOD_EN: &[&str] = &[
    "Sorry, I didn't understand your command.",
    "I'm not sure what you mean.",
    "Could you please rephrase that?",
    "I didn't recognize this command.",
];

const NOT_UNDERSTOOD_DE: &[&str] = &[
    "Entschuldigung, ich habe Ihren Befehl nicht verstanden.",
    "Ich bin nicht sicher, was Sie meinen.",
    "Könnten Sie es bitte anders formulieren?",
    "Ich habe diesen Befehl nicht erkannt.",
];

/// All "didn't understand" replies for a language
#[must_use]
pub const fn not_understood_replies(language: Language) -> &'static [&'static str] {
    match language {
        Language::Uk => NOT_UNDERSTOOD_UK,
        Language::En => NOT_UNDERSTOOD_EN,
        Language::De => NOT_UNDERSTOOD_DE,
    }
}

/// A random "didn't understand" reply
#[must_use]
pub fn not_understood(language: Language) -> &'static str {
    pick(not_understood_replies(language))
}

const JOKES_UK: &[&str] = &[
    "Я не лінуюсь. Я просто в режимі енергозбереження. Постійно.",
    "Мій рівень мотивації сьогодні: хотів би я хотіти щось робити.",
    "Між «зараз зроблю» і «вже зробив» у мене є стадія «може, чаю?», яка триває чотири години.",
];

const JOKES_EN: &[&str] = &[
    "I told my computer I needed a break. It said: no problem, I'll go to sleep.",
    "Why do programmers prefer dark mode? Because light attracts bugs.",
    "I'm reading a book about anti-gravity. It's impossible to put down.",
];

const JOKES_DE: &[&str] = &[
    "Treffen sich zwei Magnete. Sagt der eine: Was soll ich bloß anziehen?",
    "Warum können Geister so schlecht lügen? Weil man durch sie hindurchsieht.",
    "Was macht ein Pirat am Computer? Er drückt die Enter-Taste.",
];

/// All jokes for a language
#[must_use]
pub const fn jokes(language: Language) -> &'static [&'static str] {
    match language {
        Language::Uk => JOKES_UK,
        Language::En => JOKES_EN,
        Language::De => JOKES_DE,
    }
}

/// A random joke
#[must_use]
pub fn joke(language: Language) -> &'static str {
    pick(jokes(language))
}

fn pick(options: &'static [&'static str]) -> &'static str {
    options.choose(&mut rand::thread_rng()).copied().unwrap_or_default()
}

/// Weekday name, Monday = 0
#[must_use]
pub fn weekday_name(language: Language, monday_index: u32) -> &'static str {
    const UK: [&str; 7] = ["понеділок", "вівторок", "середа", "четвер", "п'ятниця", "субота", "неділя"];
    const EN: [&str; 7] = ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday"];
    const DE: [&str; 7] = ["Montag", "Dienstag", "Mittwoch", "Donnerstag", "Freitag", "Samstag", "Sonntag"];

    let names = match language {
        Language::Uk => &UK,
        Language::En => &EN,
        Language::De => &DE,
    };
    names[usize::try_from(monday_index).unwrap_or(0) % 7]
}

/// Month name for dates, January = 1 (Ukrainian uses the genitive form)
#[must_use]
pub fn month_name(language: Language, month: u32) -> &'static str {
    const UK: [&str; 12] = [
        "січня", "лютого", "березня", "квітня", "травня", "червня", "липня", "серпня", "вересня",
        "жовтня", "листопада", "грудня",
    ];
    const EN: [&str; 12] = [
        "January", "February", "March", "April", "May", "June", "July", "August", "September",
        "October", "November", "December",
    ];
    const DE: [&str; 12] = [
        "Januar", "Februar", "März", "April", "Mai", "Juni", "Juli", "August", "September",
        "Oktober", "November", "Dezember",
    ];

    let names = match language {
        Language::Uk => &UK,
        Language::En => &EN,
        Language::De => &DE,
    };
    names[usize::try_from(month.saturating_sub(1)).unwrap_or(0) % 12]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_codes_fall_back_to_english() {
        assert_eq!(Language::from_code("uk"), Language::Uk);
        assert_eq!(Language::from_code("DE"), Language::De);
        assert_eq!(Language::from_code("fr"), Language::En);
        assert!(Language::is_supported("de"));
        assert!(!Language::is_supported("fr"));
    }

    #[test]
    fn random_replies_come_from_the_list() {
        for language in Language::ALL {
            let reply = not_understood(language);
            assert!(not_understood_replies(language).contains(&reply));
            assert!(!joke(language).is_empty());
        }
    }

    #[test]
    fn calendar_names() {
        assert_eq!(weekday_name(Language::De, 2), "Mittwoch");
        assert_eq!(month_name(Language::Uk, 3), "березня");
        assert_eq!(month_name(Language::En, 12), "December");
    }
}
