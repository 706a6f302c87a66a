//! Booking field extraction.
//!
//! `BookingExtractor::extract` turns one utterance into a list of `FieldUpdate`s.
//! User speech is tentative: it may fill or change a field until that field has
//! been asserted back in a confirmation. Confirmation utterances are authoritative
//! and overwrite whatever the user path produced.

use crate::booking::{
    BodyType, BookingField, BookingRecord, ConfirmationStatus, FieldUpdate, FieldValue, Speaker,
};
use crate::catalog::{VehicleCatalog, VehicleMatcher};
use crate::normalize::{clean_value, resolve_relative_date, strip_location_prefix};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Where a captured value ends: punctuation, a connective, or another field's keyword.
const TERM: &str = r"(?:[,.;?!\n]|\s+(?:and|to|drop|then|with|on|by|for|truck|vehicle|body|material|carrying|tomorrow|today|locations?)\b|$)";

/// Separator between a label and its value: "pickup Chennai", "pickup: Chennai".
const SEP: &str = r"(?:\s*:\s*|\s+)";

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid regex")
}

static PICKUP: Lazy<Regex> = Lazy::new(|| {
    compile(&format!(
        r"(?i)\bpick(?:ing)?[\s-]?up(?:\s+(?:location|point|city|address))?(?:\s+(?:is|will be|would be))?{SEP}(.+?){TERM}"
    ))
});

static DROP: Lazy<Regex> = Lazy::new(|| {
    compile(&format!(
        r"(?i)\bdrop(?:[\s-]?off)?(?:\s+(?:location|point|city|address))?(?:\s+(?:is|will be|would be))?{SEP}(?:to\s+)?(.+?){TERM}"
    ))
});

static FROM_TO: Lazy<Regex> =
    Lazy::new(|| compile(&format!(r"(?i)\bfrom\s+(.+?)\s+to\s+(.+?){TERM}")));

static VEHICLE_ANCHOR: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"(?i)\b(?:truck\s+type|vehicle\s+type|vehicle|truck|need\s+an?|want\s+an?|book\s+an?|require\s+an?)(?:\s+(?:is|will be|would be))?(?:\s*:\s*|\s+)",
    )
});

static OPEN_BODY: Lazy<Regex> = Lazy::new(|| compile(r"(?i)\bopen\b"));

static CONTAINER_BODY: Lazy<Regex> =
    Lazy::new(|| compile(r"(?i)\b(?:container(?:s|ized)?|closed)\b"));

static MATERIAL: Lazy<Regex> = Lazy::new(|| {
    compile(&format!(
        r"(?i)\b(?:material(?:\s+type)?(?:\s+(?:is|will be|would be))?|goods(?:\s+type)?(?:\s+(?:is|are))?|carrying|transporting|shifting|load\s+of){SEP}(.+?){TERM}"
    ))
});

static CONTACT_NAME: Lazy<Regex> = Lazy::new(|| {
    compile(&format!(
        r"(?i)\bmy\s+name\s+is\s+([a-z][a-z .'-]*?){TERM}"
    ))
});

static CONTACT_NUMBER: Lazy<Regex> =
    Lazy::new(|| compile(r"(?:^|\D)(?:\+?91[\s-]?)?(\d(?:[\s-]?\d){9})(?:\D|$)"));

/// Cues either speaker can use to restate the booking.
static STRONG_CONFIRMATION: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"(?i)\b(?:let\s+me\s+confirm|to\s+confirm|confirming|just\s+to\s+recap|to\s+summari[sz]e|so\s+that(?:'|’)s|so\s+that\s+is)\b",
    )
});

/// Assistant-only cues: a restating question.
static CHECK_QUESTION: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?i)\b(?:is\s+(?:this|that|everything)\s+(?:correct|right)|correct\?|right\?)")
});

static NOT_INTERESTED: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"(?i)\b(?:not\s+interested|cancel(?:led)?|don(?:'|’)?t\s+(?:need|want)|do\s+not\s+(?:need|want)|no\s+longer\s+need)\b",
    )
});

static AFFIRMATIVE: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"(?i)\b(?:yes|yeah|yep|haan|correct|that(?:'|’)s\s+right|that\s+is\s+right|confirm(?:ed)?|go\s+ahead|sounds\s+good|perfect)\b",
    )
});

static NEGATION: Lazy<Regex> =
    Lazy::new(|| compile(r"(?i)\b(?:no|not|wrong|incorrect|change|actually)\b"));

/// Leading words that mark a captured location as a pronoun, a connective or a label.
const NON_LOCATIONS: [&str; 17] = [
    "it", "them", "this", "that", "is", "and", "or", "which", "what", "where", "when", "location",
    "locations", "point", "address", "city", "place",
];

const LEADING_ARTICLES: [&str; 4] = ["a", "an", "the", "some"];

/// Parses utterances into booking field updates.
#[derive(Debug, Clone)]
pub struct BookingExtractor {
    matcher: VehicleMatcher,
}

impl Default for BookingExtractor {
    fn default() -> Self {
        Self {
            matcher: VehicleMatcher::default(),
        }
    }
}

impl BookingExtractor {
    pub fn new(vehicle_threshold: f64) -> Self {
        Self {
            matcher: VehicleMatcher::new(VehicleCatalog::shared(), vehicle_threshold),
        }
    }

    /// True when `text` restates the booking back for verification.
    ///
    /// Mentioning field names is not enough: a restatement carries a recap cue,
    /// or for the assistant a closing check such as "is that correct?".
    pub fn is_confirmation(&self, text: &str, speaker: Speaker) -> bool {
        if STRONG_CONFIRMATION.is_match(text) {
            return true;
        }
        speaker == Speaker::Assistant && CHECK_QUESTION.is_match(text)
    }

    /// Field updates implied by `utterance` against `existing`.
    ///
    /// Pure: the same arguments always produce the same updates, in field
    /// declaration order. `today` is the local date at the moment of extraction.
    pub fn extract(
        &self,
        utterance: &str,
        speaker: Speaker,
        existing: &BookingRecord,
        today: NaiveDate,
    ) -> Vec<FieldUpdate> {
        let confirmation = self.is_confirmation(utterance, speaker);
        if speaker == Speaker::Assistant && !confirmation {
            return Vec::new();
        }

        let mut updates = Vec::new();
        for (field, value) in self.detect(utterance, today) {
            let current = existing.get(field);
            if confirmation {
                if current.as_ref() != Some(&value) || !existing.is_confirmed(field) {
                    updates.push(FieldUpdate {
                        field,
                        value,
                        confirmed: true,
                    });
                }
            } else if existing.is_confirmed(field) {
                debug!("keeping confirmed {} over user value '{}'", field, value);
            } else if current.as_ref() != Some(&value) {
                updates.push(FieldUpdate {
                    field,
                    value,
                    confirmed: false,
                });
            }
        }
        updates
    }

    /// Every value the utterance states, without looking at the record.
    fn detect(&self, utterance: &str, today: NaiveDate) -> Vec<(BookingField, FieldValue)> {
        let mut found = Vec::new();

        let mut pickup = capture_location(&PICKUP, utterance);
        let mut drop = capture_location(&DROP, utterance);
        if pickup.is_none() || drop.is_none() {
            if let Some((from, to)) = from_to_pair(utterance, today) {
                pickup = pickup.or(Some(from));
                drop = drop.or(Some(to));
            }
        }
        if let Some(p) = pickup {
            found.push((BookingField::PickupLocation, FieldValue::Text(p)));
        }
        if let Some(d) = drop {
            found.push((BookingField::DropLocation, FieldValue::Text(d)));
        }

        if let Some(vehicle) = self.detect_vehicle(utterance) {
            found.push((BookingField::VehicleType, FieldValue::Text(vehicle)));
        }
        if let Some(body) = detect_body(utterance) {
            found.push((BookingField::BodyType, FieldValue::Body(body)));
        }
        if let Some(material) = detect_material(utterance) {
            found.push((BookingField::Material, FieldValue::Text(material)));
        }
        if let Some(date) = resolve_relative_date(utterance, today) {
            found.push((BookingField::TripDate, FieldValue::Date(date)));
        }
        if let Some(name) = capture(&CONTACT_NAME, utterance).map(|n| clean_value(&n)) {
            if !name.is_empty() {
                found.push((BookingField::ContactName, FieldValue::Text(name)));
            }
        }
        if let Some(number) = detect_phone(utterance) {
            found.push((BookingField::ContactNumber, FieldValue::Text(number)));
        }
        found
    }

    /// Exact catalog mention, then the words after a vehicle anchor, then the whole utterance.
    fn detect_vehicle(&self, utterance: &str) -> Option<String> {
        if let Some(m) = self.matcher.find_in_text(utterance) {
            return Some(m.canonical_name);
        }
        for anchor in VEHICLE_ANCHOR.find_iter(utterance) {
            if let Some(m) = self.matcher.match_leading(&utterance[anchor.end()..]) {
                return Some(m.canonical_name);
            }
        }
        self.matcher
            .match_candidate(utterance)
            .map(|m| m.canonical_name)
    }
}

/// Confirmation status implied by a user utterance.
///
/// Declining applies at any point; agreement counts only while the user is
/// answering a confirmation.
pub fn detect_confirmation_status(
    utterance: &str,
    awaiting_confirmation: bool,
) -> Option<ConfirmationStatus> {
    if NOT_INTERESTED.is_match(utterance) {
        return Some(ConfirmationStatus::NotInterested);
    }
    if awaiting_confirmation && AFFIRMATIVE.is_match(utterance) && !NEGATION.is_match(utterance) {
        return Some(ConfirmationStatus::Confirmed);
    }
    None
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn capture_location(re: &Regex, text: &str) -> Option<String> {
    capture(re, text).and_then(|raw| location_value(&raw))
}

fn location_value(raw: &str) -> Option<String> {
    let value = clean_value(&strip_location_prefix(raw));
    let first = value.split_whitespace().next()?.to_ascii_lowercase();
    if NON_LOCATIONS.contains(&first.as_str()) {
        return None;
    }
    Some(value)
}

/// "from X to Y", unless either side is really a date ("from monday to friday").
fn from_to_pair(text: &str, today: NaiveDate) -> Option<(String, String)> {
    let caps = FROM_TO.captures(text)?;
    let from = location_value(caps.get(1)?.as_str())?;
    let to = location_value(caps.get(2)?.as_str())?;
    if resolve_relative_date(&from, today).is_some() || resolve_relative_date(&to, today).is_some() {
        return None;
    }
    Some((from, to))
}

fn detect_body(text: &str) -> Option<BodyType> {
    match (OPEN_BODY.is_match(text), CONTAINER_BODY.is_match(text)) {
        (true, false) => Some(BodyType::Open),
        (false, true) => Some(BodyType::Container),
        _ => None,
    }
}

fn detect_material(text: &str) -> Option<String> {
    let raw = clean_value(&capture(&MATERIAL, text)?);
    let value = match raw.split_once(char::is_whitespace) {
        Some((first, rest))
            if LEADING_ARTICLES
                .iter()
                .any(|a| first.eq_ignore_ascii_case(a)) =>
        {
            rest.trim().to_string()
        }
        _ => raw,
    };
    // "goods from Chennai to Pune" names a route, not a material.
    let first = value.split_whitespace().next()?.to_ascii_lowercase();
    if ["from", "to", "in", "at"].contains(&first.as_str()) {
        return None;
    }
    Some(value)
}

fn detect_phone(text: &str) -> Option<String> {
    let caps = CONTACT_NUMBER.captures(text)?;
    let digits: String = caps
        .get(1)?
        .as_str()
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();
    (digits.len() == 10).then_some(digits)
}
