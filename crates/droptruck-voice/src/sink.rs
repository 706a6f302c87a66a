//! Session logging sinks.
//!
//! The core only writes to a sink; it never reads back. `FileSessionSink` keeps a
//! JSON-lines event log per session plus a JSON summary written when the session ends.

use crate::booking::{
    BookingField, BookingRecord, ConfirmationStatus, ConversationTurn, FieldValue,
};
use crate::error::{VoiceError, VoiceResult};
use crate::session::{EndReason, SessionState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// One entry in the session log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionStarted {
        session_id: String,
        at: DateTime<Utc>,
    },
    Turn(ConversationTurn),
    FieldUpdated {
        field: BookingField,
        value: FieldValue,
        confirmed: bool,
        at: DateTime<Utc>,
    },
    ConfirmationStatusChanged {
        status: ConfirmationStatus,
        at: DateTime<Utc>,
    },
    StateChanged {
        from: SessionState,
        to: SessionState,
        at: DateTime<Utc>,
    },
    Warning {
        message: String,
        at: DateTime<Utc>,
    },
    SessionEnded {
        reason: EndReason,
        booking: BookingRecord,
        turns: usize,
        submitted: bool,
        at: DateTime<Utc>,
    },
}

/// Append-only event sink.
pub trait SessionSink: Send + Sync {
    fn record(&self, event: &SessionEvent) -> VoiceResult<()>;
}

/// Summary written alongside the event log at session end.
#[derive(Debug, Serialize)]
struct SessionSummary<'a> {
    session_id: &'a str,
    started_at: Option<DateTime<Utc>>,
    ended_at: DateTime<Utc>,
    duration_secs: Option<f64>,
    end_reason: EndReason,
    turn_count: usize,
    field_updates: usize,
    submitted: bool,
    booking: &'a BookingRecord,
}

struct FileSinkState {
    writer: BufWriter<File>,
    started_at: Option<DateTime<Utc>>,
    field_updates: usize,
}

/// Writes `session_<id>.jsonl` and `session_<id>.json` under a logs directory.
pub struct FileSessionSink {
    session_id: String,
    log_path: PathBuf,
    summary_path: PathBuf,
    state: Mutex<FileSinkState>,
}

impl FileSessionSink {
    pub fn create(logs_dir: impl AsRef<Path>, session_id: &str) -> VoiceResult<Self> {
        let dir = logs_dir.as_ref();
        fs::create_dir_all(dir)?;
        let log_path = dir.join(format!("session_{}.jsonl", session_id));
        let summary_path = dir.join(format!("session_{}.json", session_id));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        info!("Session log: {}", log_path.display());
        Ok(Self {
            session_id: session_id.to_string(),
            log_path,
            summary_path,
            state: Mutex::new(FileSinkState {
                writer: BufWriter::new(file),
                started_at: None,
                field_updates: 0,
            }),
        })
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn summary_path(&self) -> &Path {
        &self.summary_path
    }

    fn write_summary(
        &self,
        state: &FileSinkState,
        reason: EndReason,
        booking: &BookingRecord,
        turns: usize,
        submitted: bool,
        at: DateTime<Utc>,
    ) -> VoiceResult<()> {
        let summary = SessionSummary {
            session_id: &self.session_id,
            started_at: state.started_at,
            ended_at: at,
            duration_secs: state
                .started_at
                .map(|start| (at - start).num_milliseconds() as f64 / 1000.0),
            end_reason: reason,
            turn_count: turns,
            field_updates: state.field_updates,
            submitted,
            booking,
        };
        let json = serde_json::to_string_pretty(&summary)?;
        fs::write(&self.summary_path, json)?;
        debug!("Session summary: {}", self.summary_path.display());
        Ok(())
    }
}

impl SessionSink for FileSessionSink {
    fn record(&self, event: &SessionEvent) -> VoiceResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| VoiceError::Sink(format!("log lock poisoned: {}", e)))?;

        let line = serde_json::to_string(event)?;
        writeln!(state.writer, "{}", line)?;

        match event {
            SessionEvent::SessionStarted { at, .. } => state.started_at = Some(*at),
            SessionEvent::FieldUpdated { .. } => state.field_updates += 1,
            SessionEvent::SessionEnded {
                reason,
                booking,
                turns,
                submitted,
                at,
            } => {
                state.writer.flush()?;
                self.write_summary(&state, *reason, booking, *turns, *submitted, *at)?;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<SessionEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl SessionSink for MemorySink {
    fn record(&self, event: &SessionEvent) -> VoiceResult<()> {
        self.events
            .lock()
            .map_err(|e| VoiceError::Sink(format!("memory sink poisoned: {}", e)))?
            .push(event.clone());
        Ok(())
    }
}
