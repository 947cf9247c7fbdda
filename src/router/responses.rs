//! Locally computed replies

use chrono::{Datelike, NaiveDate, NaiveTime, Timelike};

use crate::i18n::{Language, month_name, weekday_name};

/// "It's 14:05 now." in the user's language
#[must_use]
pub fn time_reply(language: Language, time: NaiveTime) -> String {
    let (hour, minute) = (time.hour(), time.minute());
    match language {
        Language::Uk => format!("Зараз {hour:02}:{minute:02}."),
        Language::En => format!("It's {hour:02}:{minute:02} now."),
        Language::De => format!("Es ist jetzt {hour:02}:{minute:02} Uhr."),
    }
}

/// Today's weekday and date in the user's language
#[must_use]
pub fn date_reply(language: Language, date: NaiveDate) -> String {
    let weekday = weekday_name(language, date.weekday().num_days_from_monday());
    let month = month_name(language, date.month());
    let (day, year) = (date.day(), date.year());

    match language {
        Language::Uk => format!("Сьогодні {weekday}, {day} {month} {year} року."),
        Language::En => format!("Today is {weekday}, {month} {day}, {year}."),
        Language::De => format!("Heute ist {weekday}, der {day}. {month} {year}."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_is_zero_padded() {
        let time = NaiveTime::from_hms_opt(7, 5, 0).unwrap();
        assert_eq!(time_reply(Language::Uk, time), "Зараз 07:05.");
        assert_eq!(time_reply(Language::En, time), "It's 07:05 now.");
        assert_eq!(time_reply(Language::De, time), "Es ist jetzt 07:05 Uhr.");
    }

    #[test]
    fn dates_per_language() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 8).unwrap();
        assert_eq!(date_reply(Language::Uk, date), "Сьогодні п'ятниця, 8 березня 2024 року.");
        assert_eq!(date_reply(Language::En, date), "Today is Friday, March 8, 2024.");
        assert_eq!(date_reply(Language::De, date), "Heute ist Freitag, der 8. März 2024.");
    }
}
