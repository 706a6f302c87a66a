//! Value normalization: location prefixes, relative dates, match keys.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;

const LOCATION_PREFIXES: [&str; 3] = ["in", "from", "at"];

const MONTHS: [(&str, u32); 12] = [
    ("jan", 1),
    ("feb", 2),
    ("mar", 3),
    ("apr", 4),
    ("may", 5),
    ("jun", 6),
    ("jul", 7),
    ("aug", 8),
    ("sep", 9),
    ("oct", 10),
    ("nov", 11),
    ("dec", 12),
];

const MONTH_PATTERN: &str = r"(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)";

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").expect("valid regex"));

static NUMERIC_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})[/-](\d{1,2})[/-](\d{4})\b").expect("valid regex"));

static DAY_MONTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b(\d{{1,2}})(st|nd|rd|th)?\s+(?:of\s+)?{}\b(?:,?\s+(\d{{4}}))?",
        MONTH_PATTERN
    ))
    .expect("valid regex")
});

static MONTH_DAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b{}\s+(\d{{1,2}})(st|nd|rd|th)?\b(?:,?\s+(\d{{4}}))?",
        MONTH_PATTERN
    ))
    .expect("valid regex")
});

static DAY_AFTER_TOMORROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bday\s+after\s+tomorrow\b").expect("valid regex"));

static TOMORROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\btomorrow\b").expect("valid regex"));

static TODAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:today|tonight)\b").expect("valid regex"));

static WEEKDAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(next\s+)?(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b")
        .expect("valid regex")
});

/// Drop one leading "in", "from" or "at" word (case-insensitive) and trim.
///
/// Only a whole first word is removed: "Indore" is left alone, and
/// "in from Pune" loses just the "in".
pub fn strip_location_prefix(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some((first, rest))
            if LOCATION_PREFIXES
                .iter()
                .any(|p| first.eq_ignore_ascii_case(p)) =>
        {
            rest.trim().to_string()
        }
        _ => trimmed.to_string(),
    }
}

/// Trim whitespace and trailing punctuation from a captured value.
pub fn clean_value(text: &str) -> String {
    text.trim()
        .trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | '!' | '?' | ':'))
        .trim()
        .to_string()
}

/// Lowercase, replace anything non-alphanumeric with a space, collapse whitespace.
pub fn normalize_for_match(text: &str) -> String {
    let lowered: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolve a date expression found anywhere in `text` against `reference` (the
/// session's local "today").
///
/// Recognized, first match wins: ISO `YYYY-MM-DD`, numeric `DD/MM/YYYY` or
/// `DD-MM-YYYY`, "25th December [2025]", "December 25 [2025]", "day after
/// tomorrow", "tomorrow", "today"/"tonight", "next friday", "friday". A yearless
/// month date resolves to its next occurrence on or after `reference`.
pub fn resolve_relative_date(text: &str, reference: NaiveDate) -> Option<NaiveDate> {
    if let Some(caps) = ISO_DATE.captures(text) {
        if let Some(date) = ymd(&caps[1], &caps[2], &caps[3]) {
            return Some(date);
        }
    }
    if let Some(caps) = NUMERIC_DATE.captures(text) {
        if let Some(date) = ymd(&caps[3], &caps[2], &caps[1]) {
            return Some(date);
        }
    }
    for caps in DAY_MONTH.captures_iter(text) {
        if !plausible_month(&caps[3], caps.get(2).is_some(), caps.get(4).is_some()) {
            continue;
        }
        let day = caps[1].parse().ok()?;
        let month = month_number(&caps[3])?;
        let year = caps.get(4).and_then(|y| y.as_str().parse().ok());
        if let Some(date) = month_date(day, month, year, reference) {
            return Some(date);
        }
    }
    for caps in MONTH_DAY.captures_iter(text) {
        if !plausible_month(&caps[1], caps.get(3).is_some(), caps.get(4).is_some()) {
            continue;
        }
        let month = month_number(&caps[1])?;
        let day = caps[2].parse().ok()?;
        let year = caps.get(4).and_then(|y| y.as_str().parse().ok());
        if let Some(date) = month_date(day, month, year, reference) {
            return Some(date);
        }
    }
    if DAY_AFTER_TOMORROW.is_match(text) {
        return Some(reference + Duration::days(2));
    }
    if TOMORROW.is_match(text) {
        return Some(reference + Duration::days(1));
    }
    if TODAY.is_match(text) {
        return Some(reference);
    }
    if let Some(caps) = WEEKDAY.captures(text) {
        let target = weekday(&caps[2])?;
        return Some(upcoming_weekday(reference, target, caps.get(1).is_some()));
    }
    None
}

/// Next occurrence of `target` strictly after `reference` (1..=7 days).
///
/// With `next`, an occurrence that still falls in the reference's own week is
/// pushed out another seven days: on a Monday, "next friday" is eleven days away.
fn upcoming_weekday(reference: NaiveDate, target: Weekday, next: bool) -> NaiveDate {
    let from = reference.weekday().num_days_from_monday() as i64;
    let to = target.num_days_from_monday() as i64;
    let mut ahead = (to - from).rem_euclid(7);
    if ahead == 0 {
        ahead = 7;
    }
    let plain = reference + Duration::days(ahead);
    if next && plain.iso_week() == reference.iso_week() {
        plain + Duration::days(7)
    } else {
        plain
    }
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

fn month_date(day: u32, month: u32, year: Option<i32>, reference: NaiveDate) -> Option<NaiveDate> {
    match year {
        Some(y) => NaiveDate::from_ymd_opt(y, month, day),
        None => {
            let this_year = NaiveDate::from_ymd_opt(reference.year(), month, day);
            match this_year {
                Some(d) if d >= reference => Some(d),
                _ => NaiveDate::from_ymd_opt(reference.year() + 1, month, day),
            }
        }
    }
}

/// Bare "may" is also a verb: it names the month only next to an ordinal day or a year.
fn plausible_month(name: &str, ordinal: bool, year: bool) -> bool {
    ordinal || year || !name.eq_ignore_ascii_case("may")
}

fn month_number(name: &str) -> Option<u32> {
    let lower = name.to_ascii_lowercase();
    MONTHS
        .iter()
        .find(|(prefix, _)| lower.starts_with(prefix))
        .map(|(_, n)| *n)
}

fn weekday(name: &str) -> Option<Weekday> {
    name.to_ascii_lowercase().parse().ok()
}
