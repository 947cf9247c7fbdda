//! Per-language intent patterns
//!
//! Categories are scanned in the order listed; within a category the first
//! matching pattern wins. Capture groups feed the intent parameters.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::i18n::Language;
use crate::{Error, Result};

/// Intent categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    /// Current time
    Time,
    /// Today's date
    Date,
    /// Weather report
    Weather,
    /// Music playback control
    Music,
    /// Calendar lookup or entry
    Calendar,
    /// A joke
    Joke,
    /// "Tell me about X"
    WebSearch,
    /// Nothing matched
    Unknown,
}

impl IntentKind {
    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Date => "date",
            Self::Weather => "weather",
            Self::Music => "music",
            Self::Calendar => "calendar",
            Self::Joke => "joke",
            Self::WebSearch => "web_search",
            Self::Unknown => "unknown",
        }
    }
}

type PatternSet = &'static [(IntentKind, &'static [&'static str])];

const UK: PatternSet = &[
    (
        IntentKind::Time,
        &["котра година", "скільки зараз часу", "скільки годин", "який час", "котра зараз година"],
    ),
    (
        IntentKind::Date,
        &["яка сьогодні дата", "яке сьогодні число", "який сьогодні день", "яке число", "яка зараз дата"],
    ),
    (
        IntentKind::Weather,
        &["яка погода", "який прогноз погоди", "що з погодою", "яка температура", "як погода"],
    ),
    (
        IntentKind::Music,
        &[
            "включи музику",
            r"(включи|грай) пісню (.+)",
            "поставити музику",
            r"грай (.+)",
            "зупини музику",
            "пауза",
            "спотіфай",
            "spotify",
            "хочу послухати",
            r"включи (.+)",
            r"постав (.+)",
            r"пусти (.+)",
            "запусти музику",
        ],
    ),
    (
        IntentKind::Calendar,
        &["що в календарі", "які зустрічі", "що заплановано", r"додай (подію|зустріч) (.+)"],
    ),
    (IntentKind::Joke, &["розкажи жарт", "розкажи анекдот", "пожартуй", "розсміши"]),
];

const EN: PatternSet = &[
    (
        IntentKind::Time,
        &["what time is it", "current time", "tell me the time", "time now", "what's the time"],
    ),
    (
        IntentKind::Date,
        &["what date is it", "current date", "what day is it", "today's date", "what's the date"],
    ),
    (
        IntentKind::Weather,
        &[
            "what's the weather",
            "weather forecast",
            "what's the temperature",
            "how's the weather",
            r"is it (rainy|raining|sunny|cloudy)",
        ],
    ),
    (
        IntentKind::Music,
        &[
            "play music",
            r"play (song|track|artist) (.+)",
            "turn on music",
            r"play (.+)",
            "stop music",
            "pause",
        ],
    ),
    (
        IntentKind::Calendar,
        &[
            r"what's in (?:my|the) calendar",
            "any meetings",
            "what's scheduled",
            r"add (event|meeting) (.+)",
        ],
    ),
    (IntentKind::Joke, &["tell me a joke", "say something funny", "make me laugh"]),
];

const DE: PatternSet = &[
    (
        IntentKind::Time,
        &["wie spät ist es", "wie viel uhr ist es", "uhrzeit", "aktuelle zeit"],
    ),
    (
        IntentKind::Date,
        &["welches datum ist heute", "welcher tag ist heute", "heutiges datum", "aktuelles datum", "was ist das datum"],
    ),
    (
        IntentKind::Weather,
        &[
            "wie ist das wetter",
            "wettervorhersage",
            "wie ist die temperatur",
            "wie wird das wetter",
            r"ist es (regnerisch|sonnig|bewölkt)",
        ],
    ),
    (
        IntentKind::Music,
        &[
            "musik abspielen",
            r"spiele (lied|track|künstler) (.+)",
            "musik an",
            r"spiele (.+)",
            "musik stoppen",
            "pause",
        ],
    ),
    (
        IntentKind::Calendar,
        &[
            "was steht im kalender",
            "irgendwelche termine",
            "was ist geplant",
            r"(termin|meeting) hinzufügen (.+)",
        ],
    ),
    (IntentKind::Joke, &["erzähl einen witz", "erzähl mir einen witz", "bring mich zum lachen"]),
];

const WEB_SEARCH_UK: &[&str] = &["що таке", "розкажи про", "хто такий", "хто така"];
const WEB_SEARCH_EN: &[&str] = &["what is", "tell me about", "who is"];
const WEB_SEARCH_DE: &[&str] = &["was ist", "erzähl mir über", "erzähl mir von", "wer ist"];

/// Compiled patterns for one language
#[derive(Debug, Clone)]
pub struct PatternTable {
    categories: Vec<(IntentKind, Vec<Regex>)>,
    web_search: Vec<String>,
}

impl PatternTable {
    /// Compile the table for `language`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a pattern fails to compile
    pub fn compile(language: Language) -> Result<Self> {
        let (set, web_search) = match language {
            Language::Uk => (UK, WEB_SEARCH_UK),
            Language::En => (EN, WEB_SEARCH_EN),
            Language::De => (DE, WEB_SEARCH_DE),
        };

        let categories = set
            .iter()
            .map(|(kind, patterns)| {
                let compiled = patterns
                    .iter()
                    .map(|p| {
                        RegexBuilder::new(p)
                            .case_insensitive(true)
                            .build()
                            .map_err(|e| Error::Config(format!("bad {} pattern {p:?}: {e}", kind.as_str())))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok((*kind, compiled))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            categories,
            web_search: web_search.iter().map(|p| (*p).to_string()).collect(),
        })
    }

    /// First matching category and its raw capture groups
    #[must_use]
    pub fn find<'t>(&self, text: &'t str) -> Option<(IntentKind, Vec<&'t str>)> {
        for (kind, patterns) in &self.categories {
            for pattern in patterns {
                if let Some(caps) = pattern.captures(text) {
                    let groups = caps.iter().skip(1).flatten().map(|m| m.as_str()).collect();
                    return Some((*kind, groups));
                }
            }
        }
        None
    }

    /// Whether the text is a generic "tell me about X" question
    #[must_use]
    pub fn is_web_search(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.web_search.iter().any(|p| lowered.contains(p.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_language_compiles() {
        for language in Language::ALL {
            assert!(PatternTable::compile(language).is_ok());
        }
    }

    #[test]
    fn category_order_is_respected() {
        let table = PatternTable::compile(Language::En).unwrap();
        // "play music" is listed before the catch-all "play (.+)"
        let (kind, groups) = table.find("play music please").unwrap();
        assert_eq!(kind, IntentKind::Music);
        assert!(groups.is_empty());
    }

    #[test]
    fn groups_keep_original_case() {
        let table = PatternTable::compile(Language::En).unwrap();
        let (_, groups) = table.find("Play song Bohemian Rhapsody").unwrap();
        assert_eq!(groups, vec!["song", "Bohemian Rhapsody"]);
    }

    #[test]
    fn cyrillic_is_case_insensitive() {
        let table = PatternTable::compile(Language::Uk).unwrap();
        assert_eq!(table.find("Котра Година?").map(|(k, _)| k), Some(IntentKind::Time));
    }
}
