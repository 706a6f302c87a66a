//! Conversation state machine.
//!
//! A `Session` owns everything one call accumulates: the booking record, the full
//! history, the segmenter and the current state. It does no I/O. The async
//! orchestrator drives it one step at a time, so every extraction sees a record
//! that reflects all earlier turns.

use crate::booking::{
    BookingField, BookingRecord, ConfirmationStatus, ConversationTurn, FieldUpdate, Speaker,
};
use crate::config::AgentConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::extract::{detect_confirmation_status, BookingExtractor};
use crate::prompt::{FALLBACK_REPLY, GREETING};
use crate::segmenter::{FragmentOutcome, SegmenterConfig, TranscriptFragment, TranscriptSegmenter};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tokio::time::Instant;
use tracing::{debug, info};

static CLOSING_PHRASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:thank\s+you|thanks|good\s*bye|bye|contact\s+you\s+soon|have\s+a\s+(?:nice|great|good)\s+day)\b",
    )
    .expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Init,
    Greeting,
    Listening,
    SegmentReady,
    Responding,
    Confirming,
    Ended,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Init => "init",
            SessionState::Greeting => "greeting",
            SessionState::Listening => "listening",
            SessionState::SegmentReady => "segment_ready",
            SessionState::Responding => "responding",
            SessionState::Confirming => "confirming",
            SessionState::Ended => "ended",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session reached `Ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The assistant reply carried the termination marker.
    CompletionMarker,
    /// The assistant's final sentence was a closing phrase.
    ClosingPhrase,
    /// Explicit end-of-call from the user side.
    UserSignal,
    /// The transcription stream failed and did not recover.
    TransportLost,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::CompletionMarker => "completion_marker",
            EndReason::ClosingPhrase => "closing_phrase",
            EndReason::UserSignal => "user_signal",
            EndReason::TransportLost => "transport_lost",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Booking context handed to the reply generator with each request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplyHint {
    pub booking: BookingRecord,
    pub missing_fields: Vec<BookingField>,
    /// Every required field is set but nothing has been restated yet.
    pub request_confirmation: bool,
}

#[derive(Debug, Clone)]
pub struct ReplyRequest {
    /// Most recent turns only; the full history stays on the session.
    pub context: Vec<ConversationTurn>,
    pub hint: ReplyHint,
}

/// A completed user utterance after extraction.
#[derive(Debug, Clone)]
pub struct UserTurn {
    pub text: String,
    pub updates: Vec<FieldUpdate>,
    pub status_change: Option<ConfirmationStatus>,
}

/// Result of applying one assistant reply.
#[derive(Debug, Clone)]
pub struct ReplyOutcome {
    /// Reply text with the termination marker removed; empty when nothing is left to say.
    pub spoken: String,
    pub updates: Vec<FieldUpdate>,
    pub is_confirmation: bool,
    /// Set when the reply ends the call once spoken.
    pub end: Option<EndReason>,
}

pub struct Session {
    id: String,
    state: SessionState,
    booking: BookingRecord,
    history: Vec<ConversationTurn>,
    segmenter: TranscriptSegmenter,
    extractor: BookingExtractor,
    termination_marker: String,
    loose_closing_phrases: bool,
    context_turns: usize,
    offset: FixedOffset,
    queued: VecDeque<String>,
    confirmation_emitted: bool,
    awaiting_confirmation: bool,
    pending_end: Option<EndReason>,
    end_reason: Option<EndReason>,
}

impl Session {
    pub fn new(id: impl Into<String>, config: &AgentConfig) -> Self {
        let mut booking = BookingRecord::new();
        booking.contact_name = config.default_contact_name.clone();
        booking.contact_number = config.default_contact_number.clone();

        Self {
            id: id.into(),
            state: SessionState::Init,
            booking,
            history: Vec::new(),
            segmenter: TranscriptSegmenter::new(SegmenterConfig {
                endpointing: config.endpointing(),
                min_fragment_chars: config.min_fragment_chars,
            }),
            extractor: BookingExtractor::new(config.vehicle_match_threshold),
            termination_marker: config.termination_marker.clone(),
            loose_closing_phrases: config.loose_closing_phrases,
            context_turns: config.context_exchanges.saturating_mul(2),
            offset: config.local_offset(),
            queued: VecDeque::new(),
            confirmation_emitted: false,
            awaiting_confirmation: false,
            pending_end: None,
            end_reason: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn booking(&self) -> &BookingRecord {
        &self.booking
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.end_reason
    }

    pub fn is_ended(&self) -> bool {
        self.state == SessionState::Ended
    }

    /// End reason requested by the last reply, waiting for playback.
    pub fn pending_end(&self) -> Option<EndReason> {
        self.pending_end
    }

    /// Append the greeting and start listening. Returns the greeting on the first call only.
    pub fn begin(&mut self, now: DateTime<Utc>) -> Option<String> {
        if self.state != SessionState::Init {
            return None;
        }
        self.transition(SessionState::Greeting);
        self.append(Speaker::Assistant, GREETING, now);
        self.transition(SessionState::Listening);
        Some(GREETING.to_string())
    }

    /// Feed one transport fragment. Refused once the call is ending.
    pub fn accept_fragment(
        &mut self,
        fragment: &TranscriptFragment,
        at: Instant,
    ) -> VoiceResult<FragmentOutcome> {
        if self.is_ended() || self.pending_end.is_some() {
            debug!("Refusing fragment after shutdown began: {:?}", fragment.text);
            return Err(VoiceError::SessionEnded);
        }
        Ok(self.segmenter.push(fragment, at))
    }

    /// Move a completed segment into the queue. Returns true when one was queued.
    pub fn poll_segment(&mut self, at: Instant) -> bool {
        if self.is_ended() {
            return false;
        }
        match self.segmenter.poll(at) {
            Some(segment) => {
                self.queued.push_back(segment);
                true
            }
            None => false,
        }
    }

    pub fn segment_deadline(&self) -> Option<Instant> {
        if self.is_ended() {
            return None;
        }
        self.segmenter.deadline()
    }

    pub fn has_queued_segment(&self) -> bool {
        !self.queued.is_empty()
    }

    /// Take the next queued utterance, record it and extract from it.
    ///
    /// Only runs while listening or confirming; a segment that completed during
    /// a reply stays queued until the reply has been applied.
    pub fn take_user_turn(&mut self, now: DateTime<Utc>) -> Option<UserTurn> {
        if !matches!(self.state, SessionState::Listening | SessionState::Confirming)
            || self.pending_end.is_some()
        {
            return None;
        }
        let text = self.queued.pop_front()?;
        self.transition(SessionState::SegmentReady);
        let at = self.append(Speaker::User, &text, now);

        let status_change = detect_confirmation_status(&text, self.awaiting_confirmation)
            .filter(|s| *s != self.booking.confirmation_status);
        if let Some(status) = status_change {
            info!("Confirmation status: {}", status.as_str());
            self.booking.confirmation_status = status;
        }
        self.awaiting_confirmation = false;

        let updates = self.extract_and_apply(&text, Speaker::User, at);
        if !updates.is_empty() {
            self.confirmation_emitted = false;
        }
        Some(UserTurn {
            text,
            updates,
            status_change,
        })
    }

    /// Context and hint for the reply to the utterance just taken.
    pub fn reply_request(&mut self) -> Option<ReplyRequest> {
        if self.state != SessionState::SegmentReady {
            return None;
        }
        self.transition(SessionState::Responding);
        let start = self.history.len().saturating_sub(self.context_turns);
        Some(ReplyRequest {
            context: self.history[start..].to_vec(),
            hint: self.hint(),
        })
    }

    pub fn hint(&self) -> ReplyHint {
        let missing_fields = self.booking.missing_fields();
        ReplyHint {
            request_confirmation: missing_fields.is_empty() && !self.confirmation_emitted,
            missing_fields,
            booking: self.booking.clone(),
        }
    }

    /// Record the assistant's reply, reconcile fields against it and check for termination.
    pub fn apply_reply(&mut self, reply: &str, now: DateTime<Utc>) -> VoiceResult<ReplyOutcome> {
        if self.is_ended() {
            return Err(VoiceError::SessionEnded);
        }
        let marker = !self.termination_marker.is_empty() && reply.contains(&self.termination_marker);
        let spoken = if marker {
            collapse_spaces(&reply.replace(&self.termination_marker, ""))
        } else {
            reply.trim().to_string()
        };

        let mut updates = Vec::new();
        let mut is_confirmation = false;
        if !spoken.is_empty() {
            let at = self.append(Speaker::Assistant, &spoken, now);
            is_confirmation = self.extractor.is_confirmation(&spoken, Speaker::Assistant);
            updates = self.extract_and_apply(&spoken, Speaker::Assistant, at);
        }

        let complete = self.booking.is_complete();
        if is_confirmation && complete {
            self.confirmation_emitted = true;
        }
        self.awaiting_confirmation = is_confirmation && complete;

        let end = if marker {
            Some(EndReason::CompletionMarker)
        } else if self.loose_closing_phrases && self.may_close() && is_closing(&spoken) {
            Some(EndReason::ClosingPhrase)
        } else {
            None
        };
        self.settle(end);

        Ok(ReplyOutcome {
            spoken,
            updates,
            is_confirmation,
            end,
        })
    }

    /// Record the apology used when reply generation failed.
    pub fn apply_fallback(&mut self, now: DateTime<Utc>) -> VoiceResult<ReplyOutcome> {
        if self.is_ended() {
            return Err(VoiceError::SessionEnded);
        }
        self.append(Speaker::Assistant, FALLBACK_REPLY, now);
        self.settle(None);
        Ok(ReplyOutcome {
            spoken: FALLBACK_REPLY.to_string(),
            updates: Vec::new(),
            is_confirmation: false,
            end: None,
        })
    }

    /// Enter `Ended`. Returns false if the session had already ended.
    pub fn end(&mut self, reason: EndReason) -> bool {
        if self.is_ended() {
            return false;
        }
        let reason = self.pending_end.unwrap_or(reason);
        self.end_reason = Some(reason);
        self.segmenter.clear();
        let dropped = self.queued.len();
        self.queued.clear();
        if dropped > 0 {
            debug!("Dropped {} unprocessed segment(s) at shutdown", dropped);
        }
        info!("📴 Session {} ending: {}", self.id, reason);
        self.transition(SessionState::Ended);
        true
    }

    /// A closing phrase alone only ends a call that has nothing left to collect.
    fn may_close(&self) -> bool {
        self.booking.is_complete()
            || self.booking.confirmation_status == ConfirmationStatus::NotInterested
    }

    fn settle(&mut self, end: Option<EndReason>) {
        if let Some(reason) = end {
            // Stays in Responding until the reply has been spoken.
            self.pending_end = Some(reason);
            return;
        }
        let next = if self.booking.is_complete() && !self.confirmation_emitted {
            SessionState::Confirming
        } else {
            SessionState::Listening
        };
        self.transition(next);
    }

    fn extract_and_apply(
        &mut self,
        text: &str,
        speaker: Speaker,
        at: DateTime<Utc>,
    ) -> Vec<FieldUpdate> {
        let today = self.local_date(at);
        let updates = self.extractor.extract(text, speaker, &self.booking, today);
        for update in &updates {
            if self.booking.apply(update) {
                info!(
                    "📝 {} = {}{}",
                    update.field,
                    update.value,
                    if update.confirmed { " (confirmed)" } else { "" }
                );
            }
        }
        updates
    }

    fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }

    /// Append a turn, never earlier than the previous one. Returns the stored timestamp.
    fn append(&mut self, speaker: Speaker, text: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        let timestamp = match self.history.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        self.history.push(ConversationTurn {
            speaker,
            text: text.to_string(),
            timestamp,
        });
        timestamp
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!("Session {}: {} -> {}", self.id, self.state, next);
            self.state = next;
        }
    }
}

/// Closing phrase in the final sentence of a reply that does not end on a question.
fn is_closing(reply: &str) -> bool {
    let trimmed = reply.trim_end();
    if trimmed.is_empty() || trimmed.ends_with('?') {
        return false;
    }
    trimmed
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .last()
        .map_or(false, |sentence| CLOSING_PHRASE.is_match(sentence))
}

fn collapse_spaces(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn base() -> DateTime<Utc> {
        // 11:30 IST on 2025-12-24
        Utc.with_ymd_and_hms(2025, 12, 24, 6, 0, 0).unwrap()
    }

    fn session() -> Session {
        let mut s = Session::new("test", &AgentConfig::default());
        s.begin(base());
        s
    }

    /// Push one final fragment, let the endpointing window pass, take the turn.
    fn say(s: &mut Session, text: &str) -> UserTurn {
        let t0 = Instant::now();
        s.accept_fragment(&TranscriptFragment::final_text(text, base()), t0)
            .unwrap();
        assert!(s.poll_segment(t0 + Duration::from_millis(900)));
        s.take_user_turn(base()).unwrap()
    }

    fn respond(s: &mut Session, reply: &str) -> ReplyOutcome {
        s.reply_request().unwrap();
        s.apply_reply(reply, base()).unwrap()
    }

    #[test]
    fn greeting_precedes_user_speech() {
        let mut s = Session::new("test", &AgentConfig::default());
        assert_eq!(s.state(), SessionState::Init);
        assert_eq!(s.begin(base()).as_deref(), Some(GREETING));
        assert_eq!(s.state(), SessionState::Listening);
        assert_eq!(s.history().len(), 1);
        assert_eq!(s.history()[0].speaker, Speaker::Assistant);
        assert!(s.begin(base()).is_none());
        assert_eq!(s.history().len(), 1);
    }

    #[test]
    fn pickup_turn_returns_to_listening() {
        let mut s = session();
        let turn = say(&mut s, "pickup from Mumbai Andheri West");
        assert_eq!(s.state(), SessionState::SegmentReady);
        assert_eq!(turn.updates.len(), 1);
        assert_eq!(
            s.booking().pickup_location.as_deref(),
            Some("Mumbai Andheri West")
        );

        let request = s.reply_request().unwrap();
        assert_eq!(s.state(), SessionState::Responding);
        assert_eq!(request.context.len(), 2);
        assert!(!request.hint.request_confirmation);
        assert_eq!(request.hint.missing_fields.len(), 5);

        let outcome = s
            .apply_reply("Got it. Where should we drop the goods?", base())
            .unwrap();
        assert!(outcome.end.is_none());
        assert_eq!(s.state(), SessionState::Listening);
    }

    #[test]
    fn segment_completed_while_responding_waits() {
        let mut s = session();
        say(&mut s, "pickup from Chennai");
        s.reply_request().unwrap();

        let t0 = Instant::now();
        s.accept_fragment(&TranscriptFragment::final_text("drop to Pune", base()), t0)
            .unwrap();
        assert!(s.poll_segment(t0 + Duration::from_secs(1)));
        assert!(s.take_user_turn(base()).is_none());
        assert!(s.booking().drop_location.is_none());

        s.apply_reply("Where should we drop it?", base()).unwrap();
        let turn = s.take_user_turn(base()).unwrap();
        assert_eq!(turn.text, "drop to Pune");
        assert_eq!(s.booking().drop_location.as_deref(), Some("Pune"));
    }

    #[test]
    fn complete_booking_moves_to_confirming_then_marker_ends() {
        let mut s = session();
        say(&mut s, "pickup from Chennai to Bangalore");
        respond(&mut s, "Sure. Which vehicle do you need?");
        say(&mut s, "I need a Tata Ace with open body carrying cement tomorrow");
        let request = s.reply_request().unwrap();
        assert!(request.hint.request_confirmation);
        let outcome = s.apply_reply("Great, noted.", base()).unwrap();
        assert!(outcome.end.is_none());
        assert_eq!(s.state(), SessionState::Confirming);

        say(&mut s, "okay");
        assert!(s.reply_request().unwrap().hint.request_confirmation);
        let outcome = s
            .apply_reply(
                "Let me confirm: pickup from Chennai, drop at Bangalore, Tata Ace with open body, carrying cement on 2025-12-25. Is that correct?",
                base(),
            )
            .unwrap();
        assert!(outcome.is_confirmation);
        assert_eq!(s.state(), SessionState::Listening);

        let turn = say(&mut s, "yes that's right");
        assert_eq!(turn.status_change, Some(ConfirmationStatus::Confirmed));

        let outcome = respond(
            &mut s,
            "Thank you! Our team will contact you soon. [CALL_COMPLETE]",
        );
        assert_eq!(outcome.end, Some(EndReason::CompletionMarker));
        assert_eq!(outcome.spoken, "Thank you! Our team will contact you soon.");
        assert!(!outcome.spoken.contains("[CALL_COMPLETE]"));
        assert_eq!(s.pending_end(), Some(EndReason::CompletionMarker));

        // Straggling speech is refused while the last reply plays.
        let err = s
            .accept_fragment(
                &TranscriptFragment::final_text("hello again", base()),
                Instant::now(),
            )
            .unwrap_err();
        assert!(matches!(err, VoiceError::SessionEnded));

        assert!(s.end(EndReason::UserSignal));
        assert_eq!(s.end_reason(), Some(EndReason::CompletionMarker));
        assert!(!s.end(EndReason::UserSignal));
        assert_eq!(s.state(), SessionState::Ended);
    }

    #[test]
    fn closing_phrase_anchoring() {
        assert!(is_closing("Thank you for choosing DropTruck. Have a nice day!"));
        assert!(is_closing("Goodbye."));
        assert!(!is_closing("Thank you! Could you share the drop location?"));
        assert!(!is_closing("Thank you for that. What material are you carrying?"));
        assert!(!is_closing("Thank you. Which vehicle do you need, a 407 or a Tata Ace"));
    }

    #[test]
    fn closing_phrase_needs_a_finished_booking() {
        let mut s = session();
        say(&mut s, "pickup from Chennai");
        let outcome = respond(&mut s, "Got the pickup, thanks.");
        assert!(outcome.end.is_none());
        assert!(s.pending_end().is_none());
        assert_eq!(s.state(), SessionState::Listening);

        say(&mut s, "actually I'm not interested anymore");
        let outcome = respond(&mut s, "Okay, thank you for your time. Goodbye!");
        assert_eq!(outcome.end, Some(EndReason::ClosingPhrase));
    }

    #[test]
    fn loose_closing_can_be_disabled() {
        let config = AgentConfig {
            loose_closing_phrases: false,
            ..AgentConfig::default()
        };
        let mut s = Session::new("strict", &config);
        s.begin(base());
        say(&mut s, "not interested");
        let outcome = respond(&mut s, "Okay, thank you for your time. Goodbye!");
        assert!(outcome.end.is_none());
        assert_eq!(
            s.booking().confirmation_status,
            ConfirmationStatus::NotInterested
        );
    }

    #[test]
    fn ended_session_refuses_fragments() {
        let mut s = session();
        assert!(s.end(EndReason::UserSignal));
        let result = s.accept_fragment(
            &TranscriptFragment::final_text("pickup from Delhi", base()),
            Instant::now(),
        );
        assert!(matches!(result, Err(VoiceError::SessionEnded)));
        assert!(s.segment_deadline().is_none());
        assert!(matches!(
            s.apply_reply("anything", base()),
            Err(VoiceError::SessionEnded)
        ));
    }

    #[test]
    fn context_keeps_recent_exchanges_only() {
        let config = AgentConfig {
            context_exchanges: 2,
            ..AgentConfig::default()
        };
        let mut s = Session::new("window", &config);
        s.begin(base());
        for i in 0..5 {
            say(&mut s, &format!("message number {}", i));
            let request = s.reply_request().unwrap();
            assert!(request.context.len() <= 4);
            assert_eq!(
                request.context.last().map(|t| t.text.as_str()),
                Some(format!("message number {}", i).as_str())
            );
            s.apply_reply("Noted.", base()).unwrap();
        }
        assert_eq!(s.history().len(), 11);
    }

    #[test]
    fn timestamps_never_go_backwards() {
        let mut s = session();
        let t0 = Instant::now();
        s.accept_fragment(&TranscriptFragment::final_text("pickup from Delhi", base()), t0)
            .unwrap();
        s.poll_segment(t0 + Duration::from_secs(1));
        s.take_user_turn(base() - chrono::Duration::seconds(30)).unwrap();
        let history = s.history();
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn fallback_reply_keeps_state_consistent() {
        let mut s = session();
        say(&mut s, "pickup from Delhi");
        s.reply_request().unwrap();
        let outcome = s.apply_fallback(base()).unwrap();
        assert_eq!(outcome.spoken, FALLBACK_REPLY);
        assert_eq!(s.state(), SessionState::Listening);
        assert_eq!(s.booking().pickup_location.as_deref(), Some("Delhi"));
    }

    #[test]
    fn default_contact_is_prefilled() {
        let config = AgentConfig {
            default_contact_name: Some("Ravi".into()),
            default_contact_number: Some("9876543210".into()),
            ..AgentConfig::default()
        };
        let s = Session::new("contact", &config);
        assert_eq!(s.booking().contact_name.as_deref(), Some("Ravi"));
        assert_eq!(s.booking().contact_number.as_deref(), Some("9876543210"));
    }
}
