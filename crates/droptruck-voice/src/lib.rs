//! # DropTruck Voice - Turn Orchestration & Field Extraction
//!
//! This crate runs the decision logic of the DropTruck booking agent: deciding
//! when the caller has finished speaking, driving the conversation state machine,
//! and turning free-form speech into a structured truck booking.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                  Conversation Orchestrator                    │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐     │
//! │  │  Transport   │→ │  Segmenter   │→ │     Session      │     │
//! │  │ (fragments)  │  │ (900ms gap)  │  │ (state machine)  │     │
//! │  └──────────────┘  └──────────────┘  └──────────────────┘     │
//! │                                        ↓            ↑         │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐     │
//! │  │   Speech     │← │    Reply     │← │    Extractor     │     │
//! │  │  (playback)  │  │  (LLM/echo)  │  │ catalog + dates  │     │
//! │  └──────────────┘  └──────────────┘  └──────────────────┘     │
//! │            Sink (JSONL log)      Backend (booking POST)       │
//! └───────────────────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod booking;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod extract;
pub mod normalize;
pub mod orchestrator;
pub mod prompt;
pub mod reply;
pub mod segmenter;
pub mod session;
pub mod sink;
pub mod speech;
pub mod transport;

pub use backend::{payload, BookingSubmitter, HttpBookingSubmitter, SubmissionOutcome};
pub use booking::{
    BodyType, BookingField, BookingRecord, ConfirmationStatus, ConversationTurn, FieldUpdate,
    FieldValue, Speaker,
};
pub use catalog::{
    similarity, VehicleCatalog, VehicleCatalogEntry, VehicleMatch, VehicleMatcher,
    DEFAULT_MATCH_THRESHOLD,
};
pub use clock::SessionClock;
pub use config::AgentConfig;
pub use error::{VoiceError, VoiceResult};
pub use extract::{detect_confirmation_status, BookingExtractor};
pub use normalize::{resolve_relative_date, strip_location_prefix};
pub use orchestrator::{Collaborators, ConversationOrchestrator, SessionReport};
pub use reply::{EchoReplyGenerator, OpenAiReplyGenerator, ReplyGenerator};
pub use segmenter::{FragmentOutcome, SegmenterConfig, TranscriptFragment, TranscriptSegmenter};
pub use session::{EndReason, ReplyHint, ReplyOutcome, ReplyRequest, Session, SessionState, UserTurn};
pub use sink::{FileSessionSink, MemorySink, SessionEvent, SessionSink};
pub use speech::{LogSynthesizer, SpeechSynthesizer};
pub use transport::{ChannelTranscription, TranscriptSender, TranscriptionStream, TransportEvent};
