//! End-to-end session tests over the in-process transport.
//!
//! Time is paused, so endpointing and generation timeouts elapse instantly.

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use droptruck_voice::prompt::{FALLBACK_REPLY, GREETING};
use droptruck_voice::{
    AgentConfig, BodyType, BookingField, BookingRecord, BookingSubmitter, ChannelTranscription,
    Collaborators, ConfirmationStatus, ConversationOrchestrator, ConversationTurn, EndReason,
    LogSynthesizer, MemorySink, ReplyGenerator, ReplyHint, SessionClock, SessionEvent,
    SessionReport, SessionState, SubmissionOutcome, TranscriptSender, VoiceError, VoiceResult,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

enum Step {
    Say(&'static str),
    Fail,
    Hang,
}

/// Replies from a fixed script and reports every hint it was given.
struct ScriptedGenerator {
    steps: Mutex<VecDeque<Step>>,
    hints: mpsc::UnboundedSender<ReplyHint>,
}

#[async_trait]
impl ReplyGenerator for ScriptedGenerator {
    async fn generate(&self, _context: &[ConversationTurn], hint: &ReplyHint) -> VoiceResult<String> {
        let _ = self.hints.send(hint.clone());
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Say(text)) => Ok(text.to_string()),
            Some(Step::Fail) => Err(VoiceError::Generation("model unavailable".into())),
            Some(Step::Hang) => std::future::pending().await,
            None => Ok("Could you repeat that?".to_string()),
        }
    }
}

#[derive(Default)]
struct RecordingSubmitter {
    submitted: Mutex<Vec<BookingRecord>>,
}

impl RecordingSubmitter {
    fn submitted(&self) -> Vec<BookingRecord> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl BookingSubmitter for RecordingSubmitter {
    async fn submit(&self, booking: &BookingRecord) -> VoiceResult<SubmissionOutcome> {
        self.submitted.lock().unwrap().push(booking.clone());
        Ok(SubmissionOutcome::Accepted { status: 201 })
    }
}

struct Harness {
    sender: TranscriptSender,
    hints: mpsc::UnboundedReceiver<ReplyHint>,
    end_tx: watch::Sender<bool>,
    states: watch::Receiver<SessionState>,
    sink: Arc<MemorySink>,
    speech: Arc<LogSynthesizer>,
    submitter: Arc<RecordingSubmitter>,
    run: JoinHandle<VoiceResult<SessionReport>>,
}

impl Harness {
    fn start(script: Vec<Step>) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let clock = SessionClock::starting_at(Utc.with_ymd_and_hms(2025, 12, 24, 6, 0, 0).unwrap());
        let (transport, sender, events) = ChannelTranscription::new(16, clock);
        let (hint_tx, hints) = mpsc::unbounded_channel();
        let sink = Arc::new(MemorySink::new());
        let speech = Arc::new(LogSynthesizer::new());
        let submitter = Arc::new(RecordingSubmitter::default());

        let collaborators = Collaborators {
            transport: Arc::new(transport),
            generator: Arc::new(ScriptedGenerator {
                steps: Mutex::new(script.into()),
                hints: hint_tx,
            }),
            synthesizer: speech.clone(),
            sink: sink.clone(),
            submitter: submitter.clone(),
        };
        let orchestrator =
            ConversationOrchestrator::new("flow", AgentConfig::default(), collaborators)
                .with_clock(clock);
        let states = orchestrator.subscribe_state();
        let (end_tx, end_rx) = watch::channel(false);
        let run = tokio::spawn(orchestrator.run(events, end_rx));

        Self {
            sender,
            hints,
            end_tx,
            states,
            sink,
            speech,
            submitter,
            run,
        }
    }

    /// Speak one utterance and wait until the agent asks for a reply to it.
    async fn say(&mut self, text: &str) -> ReplyHint {
        self.sender.send_final(text).await.unwrap();
        self.hints.recv().await.expect("generator was called")
    }

    async fn finish(self) -> (SessionReport, Vec<SessionEvent>, Vec<String>, Vec<BookingRecord>) {
        let report = self.run.await.unwrap().unwrap();
        (
            report,
            self.sink.events(),
            self.speech.spoken(),
            self.submitter.submitted(),
        )
    }
}

const RESTATEMENT: &str = "Let me confirm: pickup from Chennai, drop at Bangalore, Tata Ace with open body, carrying cement on 2025-12-25. Is that correct?";

#[tokio::test(start_paused = true)]
async fn full_booking_call_ends_on_marker_and_submits_once() {
    let mut h = Harness::start(vec![
        Step::Say("Got it. Where should the goods be delivered?"),
        Step::Say("Sure. Which vehicle do you need?"),
        Step::Say("Great, let me check the details."),
        Step::Say(RESTATEMENT),
        Step::Say("Your booking is placed. Our team will call you shortly. [CALL_COMPLETE]"),
    ]);

    let hint = h.say("pickup from Chennai").await;
    assert!(!hint.missing_fields.contains(&BookingField::PickupLocation));
    assert!(hint.missing_fields.contains(&BookingField::DropLocation));

    let hint = h.say("drop location is Bangalore").await;
    assert_eq!(hint.booking.drop_location.as_deref(), Some("Bangalore"));

    let hint = h
        .say("I need a Tata Ace with open body carrying cement tomorrow")
        .await;
    assert!(hint.missing_fields.is_empty());
    assert!(hint.request_confirmation);

    // Complete but not yet restated: the next reply is asked to confirm.
    let hint = h.say("please go ahead").await;
    assert!(hint.request_confirmation);

    let hint = h.say("yes that's right").await;
    assert!(!hint.request_confirmation);
    assert_eq!(hint.booking.confirmation_status, ConfirmationStatus::Confirmed);
    assert!(hint.booking.is_confirmed(BookingField::PickupLocation));

    let mut states = h.states.clone();
    let (report, events, spoken, submitted) = h.finish().await;

    assert_eq!(report.end_reason, EndReason::CompletionMarker);
    assert_eq!(*states.borrow_and_update(), SessionState::Ended);

    let booking = &report.booking;
    assert_eq!(booking.pickup_location.as_deref(), Some("Chennai"));
    assert_eq!(booking.drop_location.as_deref(), Some("Bangalore"));
    assert_eq!(booking.vehicle_type.as_deref(), Some("Tata Ace"));
    assert_eq!(booking.body_type, Some(BodyType::Open));
    assert_eq!(booking.material.as_deref(), Some("cement"));
    assert_eq!(booking.trip_date, NaiveDate::from_ymd_opt(2025, 12, 25));
    assert_eq!(booking.confirmation_status, ConfirmationStatus::Confirmed);

    assert_eq!(submitted.len(), 1);
    assert!(submitted[0].is_complete());
    assert!(matches!(report.submission, Some(SubmissionOutcome::Accepted { status: 201 })));

    // Greeting plus five exchanges; the marker is never stored or spoken.
    assert_eq!(report.history.len(), 11);
    assert_eq!(report.history[0].text, GREETING);
    assert!(report.history.iter().all(|t| !t.text.contains("[CALL_COMPLETE]")));
    assert!(report
        .history
        .windows(2)
        .all(|pair| pair[0].timestamp <= pair[1].timestamp));
    assert_eq!(spoken.first().map(String::as_str), Some(GREETING));
    assert_eq!(
        spoken.last().map(String::as_str),
        Some("Your booking is placed. Our team will call you shortly.")
    );

    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::StateChanged { to: SessionState::Confirming, .. }
    )));
    let ended: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::SessionEnded { .. }))
        .collect();
    assert_eq!(ended.len(), 1);
    assert!(matches!(
        ended[0],
        SessionEvent::SessionEnded { submitted: true, reason: EndReason::CompletionMarker, turns: 11, .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn thanks_mid_booking_does_not_hang_up() {
    let mut h = Harness::start(vec![
        Step::Say("Got the pickup, thanks."),
        Step::Say("Noted, thank you."),
    ]);

    h.say("pickup from Chennai").await;
    let hint = h.say("drop location is Pune").await;
    assert_eq!(hint.booking.drop_location.as_deref(), Some("Pune"));
    h.end_tx.send_replace(true);

    let (report, _, _, submitted) = h.finish().await;
    assert_eq!(report.end_reason, EndReason::UserSignal);
    assert_eq!(submitted.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn user_hang_up_submits_partial_booking() {
    let mut h = Harness::start(vec![Step::Say("Where should the goods go?")]);

    h.say("pickup from Delhi").await;
    h.end_tx.send_replace(true);

    let (report, _, _, submitted) = h.finish().await;
    assert_eq!(report.end_reason, EndReason::UserSignal);
    assert_eq!(report.booking.pickup_location.as_deref(), Some("Delhi"));
    assert!(!report.booking.is_complete());
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].pickup_location.as_deref(), Some("Delhi"));
}

#[tokio::test(start_paused = true)]
async fn unrecoverable_transport_error_ends_session() {
    let mut h = Harness::start(vec![Step::Say("And the drop location?")]);

    h.say("pickup from Mumbai").await;
    h.sender.send_error("socket closed", false).await.unwrap();
    let sender = h.sender.clone();

    let (report, events, _, submitted) = h.finish().await;
    assert_eq!(report.end_reason, EndReason::TransportLost);
    assert_eq!(report.booking.pickup_location.as_deref(), Some("Mumbai"));
    assert_eq!(submitted.len(), 1);
    assert!(sender.is_stopped());
    assert!(sender.send_final("hello?").await.is_err());
    assert!(events.iter().any(
        |e| matches!(e, SessionEvent::Warning { message, .. } if message.contains("socket closed"))
    ));
}

#[tokio::test(start_paused = true)]
async fn recoverable_transport_error_is_only_a_warning() {
    let mut h = Harness::start(vec![Step::Say("Where to?"), Step::Say("Thank you, goodbye!")]);

    h.sender.send_error("jitter", true).await.unwrap();
    h.say("pickup from Pune").await;
    h.say("sorry, I'm not interested anymore").await;

    let (report, events, _, submitted) = h.finish().await;
    assert_eq!(report.end_reason, EndReason::ClosingPhrase);
    assert_eq!(submitted.len(), 1);
    assert!(events.iter().any(
        |e| matches!(e, SessionEvent::Warning { message, .. } if message.contains("jitter"))
    ));
}

#[tokio::test(start_paused = true)]
async fn failed_and_stalled_generation_fall_back_to_apology() {
    let mut h = Harness::start(vec![Step::Fail, Step::Hang, Step::Say("Thank you. Goodbye! [CALL_COMPLETE]")]);

    h.say("pickup from Jaipur").await;
    h.say("drop at Udaipur").await;
    h.say("that's everything").await;

    let (report, events, spoken, submitted) = h.finish().await;
    assert_eq!(report.end_reason, EndReason::CompletionMarker);
    assert_eq!(report.booking.drop_location.as_deref(), Some("Udaipur"));
    assert_eq!(submitted.len(), 1);

    let apologies = report
        .history
        .iter()
        .filter(|t| t.text == FALLBACK_REPLY)
        .count();
    assert_eq!(apologies, 2);
    assert_eq!(spoken.iter().filter(|s| s.as_str() == FALLBACK_REPLY).count(), 2);

    let generation_warnings = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::Warning { message, .. } if message.starts_with("reply generation failed")))
        .count();
    assert_eq!(generation_warnings, 2);
}
