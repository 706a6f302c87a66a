//! Conversation Orchestrator - drives one booking call end to end
//!
//! A single task owns the [`Session`] and reacts to four sources: transcript
//! events, the user's end-of-call signal, the segment endpointing deadline and the
//! completion of an in-flight reply. Reply generation runs in its own task so
//! fragments keep flowing into the segmenter while the model thinks; playback runs
//! on a separate worker so speech never blocks transcription.

use crate::backend::{BookingSubmitter, SubmissionOutcome};
use crate::booking::{BookingRecord, ConversationTurn, FieldUpdate};
use crate::clock::SessionClock;
use crate::config::AgentConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::reply::ReplyGenerator;
use crate::session::{EndReason, ReplyOutcome, Session, SessionState};
use crate::sink::{SessionEvent, SessionSink};
use crate::speech::SpeechSynthesizer;
use crate::transport::{TranscriptionStream, TransportEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, error, info, warn};

/// External services the orchestrator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn TranscriptionStream>,
    pub generator: Arc<dyn ReplyGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub sink: Arc<dyn SessionSink>,
    pub submitter: Arc<dyn BookingSubmitter>,
}

/// Everything known about a finished session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: String,
    pub booking: BookingRecord,
    pub history: Vec<ConversationTurn>,
    pub end_reason: EndReason,
    /// `None` when the submission call itself failed.
    pub submission: Option<SubmissionOutcome>,
}

type ReplyTask = JoinHandle<VoiceResult<String>>;

struct PlaybackJob {
    text: String,
}

/// Playback worker: speaks queued lines in order.
struct Playback {
    tx: mpsc::UnboundedSender<PlaybackJob>,
    handle: JoinHandle<()>,
}

impl Playback {
    fn spawn(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: Arc<dyn SessionSink>,
        clock: SessionClock,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<PlaybackJob>();
        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                if let Err(e) = synthesizer.synthesize_and_play(&job.text).await {
                    // Conversation continues without audio for this turn.
                    warn!("🔇 Speech synthesis failed: {}", e);
                    let event = SessionEvent::Warning {
                        message: format!("speech synthesis failed: {}", e),
                        at: clock.now(),
                    };
                    if let Err(e) = sink.record(&event) {
                        warn!("Session sink error: {}", e);
                    }
                }
            }
            debug!("Playback worker finished");
        });
        Self { tx, handle }
    }

    fn say(&self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        if self.tx.send(PlaybackJob { text: text.to_string() }).is_err() {
            warn!("Playback worker gone; dropping line");
        }
    }

    /// Let queued lines finish, bounded by `limit`.
    async fn drain(self, limit: Duration) {
        drop(self.tx);
        if timeout(limit, self.handle).await.is_err() {
            warn!("Playback did not finish within {:?}", limit);
        }
    }
}

enum Event {
    Fragment(crate::segmenter::TranscriptFragment),
    TransportError { message: String, recoverable: bool },
    TransportClosed,
    EndSignal,
    EndSignalClosed,
    Endpoint,
    Reply(VoiceResult<String>),
}

/// The main conversation coordination layer
pub struct ConversationOrchestrator {
    config: AgentConfig,
    collaborators: Collaborators,
    session: Session,
    clock: SessionClock,
    state_tx: watch::Sender<SessionState>,
    last_state: SessionState,
    logged_turns: usize,
}

impl ConversationOrchestrator {
    pub fn new(session_id: impl Into<String>, config: AgentConfig, collaborators: Collaborators) -> Self {
        let session = Session::new(session_id, &config);
        let (state_tx, _) = watch::channel(session.state());
        Self {
            last_state: session.state(),
            config,
            collaborators,
            session,
            clock: SessionClock::start(),
            state_tx,
            logged_turns: 0,
        }
    }

    /// Use a specific clock (tests pin wall time this way).
    pub fn with_clock(mut self, clock: SessionClock) -> Self {
        self.clock = clock;
        self
    }

    /// Observe state transitions as they happen.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn session_id(&self) -> &str {
        self.session.id()
    }

    /// Run the session until it ends, then finalize and submit the booking.
    ///
    /// `end_signal` flipping to `true` is the user's explicit end of call.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<TransportEvent>,
        mut end_signal: watch::Receiver<bool>,
    ) -> VoiceResult<SessionReport> {
        info!("🚚 Starting session {}", self.session.id());
        self.record(SessionEvent::SessionStarted {
            session_id: self.session.id().to_string(),
            at: self.clock.now(),
        });

        let playback = Playback::spawn(
            Arc::clone(&self.collaborators.synthesizer),
            Arc::clone(&self.collaborators.sink),
            self.clock,
        );

        if let Some(greeting) = self.session.begin(self.clock.now()) {
            playback.say(&greeting);
        }
        self.flush_history();
        self.sync_state();

        let mut inflight: Option<ReplyTask> = None;
        let mut events_open = true;
        let mut end_open = true;

        let reason = loop {
            let deadline = self.session.segment_deadline();

            let event = tokio::select! {
                biased;
                ended = end_signal.wait_for(|ended| *ended), if end_open => match ended {
                    Ok(_) => Event::EndSignal,
                    Err(_) => Event::EndSignalClosed,
                },
                reply = join_reply(&mut inflight), if inflight.is_some() => Event::Reply(reply),
                received = events.recv(), if events_open => match received {
                    Some(TransportEvent::Fragment(f)) => Event::Fragment(f),
                    Some(TransportEvent::Error { message, recoverable }) => {
                        Event::TransportError { message, recoverable }
                    }
                    None => Event::TransportClosed,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    Event::Endpoint
                }
            };

            match event {
                Event::EndSignal => {
                    info!("User ended the call");
                    break EndReason::UserSignal;
                }
                Event::EndSignalClosed => {
                    debug!("End signal sender dropped");
                    end_open = false;
                }
                Event::Fragment(fragment) => {
                    match self.session.accept_fragment(&fragment, Instant::now()) {
                        Ok(outcome) => debug!("Fragment {:?}: {:?}", fragment.text, outcome),
                        Err(VoiceError::SessionEnded) => {
                            debug!("Dropped fragment after shutdown began")
                        }
                        Err(e) => warn!("Fragment rejected: {}", e),
                    }
                }
                Event::Endpoint => {
                    self.session.poll_segment(Instant::now());
                    if inflight.is_none() {
                        inflight = self.start_next_turn();
                    }
                }
                Event::Reply(result) => {
                    inflight = None;
                    if let Some(reason) = self.finish_reply(result, &playback) {
                        break reason;
                    }
                    inflight = self.start_next_turn();
                }
                Event::TransportError {
                    message,
                    recoverable: true,
                } => {
                    warn!("Transport error (recovering): {}", message);
                    self.record(SessionEvent::Warning {
                        message: format!("transport error: {}", message),
                        at: self.clock.now(),
                    });
                }
                Event::TransportError {
                    message,
                    recoverable: false,
                } => {
                    error!("Transport lost: {}", message);
                    self.record(SessionEvent::Warning {
                        message: format!("transport lost: {}", message),
                        at: self.clock.now(),
                    });
                    break EndReason::TransportLost;
                }
                Event::TransportClosed => {
                    events_open = false;
                    info!("Transcript stream closed");
                    // Final text already received is still a complete utterance.
                    if let Some(deadline) = self.session.segment_deadline() {
                        self.session.poll_segment(deadline);
                    }
                    if inflight.is_none() {
                        inflight = self.start_next_turn();
                    }
                    if inflight.is_none() {
                        break EndReason::TransportLost;
                    }
                }
            }

            if !events_open && inflight.is_none() && !self.session.has_queued_segment() {
                break EndReason::TransportLost;
            }
        };

        if inflight.is_some() {
            debug!("Abandoning in-flight reply at shutdown");
        }
        self.finish(reason, events, playback).await
    }

    /// Take the next queued utterance and start generating the reply to it.
    fn start_next_turn(&mut self) -> Option<ReplyTask> {
        let turn = self.session.take_user_turn(self.clock.now())?;
        info!("👤 User: {}", turn.text);
        self.flush_history();
        self.record_updates(&turn.updates);
        if let Some(status) = turn.status_change {
            self.record(SessionEvent::ConfirmationStatusChanged {
                status,
                at: self.clock.now(),
            });
        }
        self.sync_state();

        let request = self.session.reply_request()?;
        self.sync_state();

        let generator = Arc::clone(&self.collaborators.generator);
        let limit = self.config.generation_timeout();
        Some(tokio::spawn(async move {
            match timeout(limit, generator.generate(&request.context, &request.hint)).await {
                Ok(result) => result,
                Err(_) => Err(VoiceError::GenerationTimeout(limit)),
            }
        }))
    }

    /// Apply a finished reply. Returns the end reason when the reply closes the call.
    fn finish_reply(&mut self, result: VoiceResult<String>, playback: &Playback) -> Option<EndReason> {
        let now = self.clock.now();
        let applied = match result {
            Ok(reply) => self.session.apply_reply(&reply, now),
            Err(e) => {
                warn!("Reply generation failed: {}", e);
                self.record(SessionEvent::Warning {
                    message: format!("reply generation failed: {}", e),
                    at: now,
                });
                self.session.apply_fallback(now)
            }
        };
        let outcome: ReplyOutcome = match applied {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!("Reply discarded: {}", e);
                return None;
            }
        };

        if !outcome.spoken.is_empty() {
            info!("🤖 Assistant: {}", outcome.spoken);
            playback.say(&outcome.spoken);
        }
        self.flush_history();
        self.record_updates(&outcome.updates);
        self.sync_state();
        outcome.end
    }

    /// Shutdown: stop the transport, refuse stragglers, let the last reply play,
    /// then end the session and submit the booking exactly once.
    async fn finish(
        mut self,
        reason: EndReason,
        mut events: mpsc::Receiver<TransportEvent>,
        playback: Playback,
    ) -> VoiceResult<SessionReport> {
        let limit = self.config.shutdown_timeout();
        if self.session.pending_end().is_none() {
            self.session.end(reason);
            self.sync_state();
        }

        match timeout(limit, self.collaborators.transport.stop()).await {
            Ok(Ok(())) => debug!("Transport acknowledged stop"),
            Ok(Err(e)) => warn!("Transport stop failed: {}", e),
            Err(_) => warn!("Transport did not stop within {:?}", limit),
        }

        events.close();
        let mut stragglers = 0usize;
        while let Ok(event) = events.try_recv() {
            if let TransportEvent::Fragment(fragment) = event {
                if self
                    .session
                    .accept_fragment(&fragment, Instant::now())
                    .is_err()
                {
                    stragglers += 1;
                }
            }
        }
        if stragglers > 0 {
            debug!("Refused {} fragment(s) after shutdown began", stragglers);
        }

        playback.drain(limit).await;

        self.session.end(reason);
        self.sync_state();
        let end_reason = self.session.end_reason().unwrap_or(reason);
        let booking = self.session.booking().clone();
        info!("\n{}", booking);

        let submission = match self.collaborators.submitter.submit(&booking).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!("Booking submission failed: {}", e);
                None
            }
        };

        self.record(SessionEvent::SessionEnded {
            reason: end_reason,
            booking: booking.clone(),
            turns: self.session.history().len(),
            submitted: submission.as_ref().map_or(false, |s| s.is_success()),
            at: self.clock.now(),
        });
        info!("✅ Session {} finished ({})", self.session.id(), end_reason);

        Ok(SessionReport {
            session_id: self.session.id().to_string(),
            booking,
            history: self.session.history().to_vec(),
            end_reason,
            submission,
        })
    }

    fn record(&self, event: SessionEvent) {
        if let Err(e) = self.collaborators.sink.record(&event) {
            warn!("Session sink error: {}", e);
        }
    }

    fn record_updates(&self, updates: &[FieldUpdate]) {
        let at = self.clock.now();
        for update in updates {
            self.record(SessionEvent::FieldUpdated {
                field: update.field,
                value: update.value.clone(),
                confirmed: update.confirmed,
                at,
            });
        }
    }

    /// Log history entries not yet written to the sink.
    fn flush_history(&mut self) {
        let pending: Vec<ConversationTurn> = self.session.history()[self.logged_turns..].to_vec();
        self.logged_turns += pending.len();
        for turn in pending {
            self.record(SessionEvent::Turn(turn));
        }
    }

    fn sync_state(&mut self) {
        let state = self.session.state();
        if state == self.last_state {
            return;
        }
        info!("State: {} -> {}", self.last_state, state);
        self.record(SessionEvent::StateChanged {
            from: self.last_state,
            to: state,
            at: self.clock.now(),
        });
        self.last_state = state;
        self.state_tx.send_replace(state);
    }
}

/// Await the in-flight reply task; a panicked task counts as a generation failure.
async fn join_reply(inflight: &mut Option<ReplyTask>) -> VoiceResult<String> {
    let Some(task) = inflight.as_mut() else {
        return std::future::pending().await;
    };
    match task.await {
        Ok(result) => result,
        Err(e) => Err(VoiceError::Generation(format!("reply task failed: {}", e))),
    }
}
