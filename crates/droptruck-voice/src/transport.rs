//! **Transport** - transcript delivery from the speech-to-text side.
//!
//! Fragments arrive on a bounded `mpsc` channel consumed by the orchestrator's
//! single loop. Stopping the transport closes the producer side; the orchestrator
//! treats a closed channel as end of input.

use crate::clock::SessionClock;
use crate::error::{VoiceError, VoiceResult};
use crate::segmenter::TranscriptFragment;
use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Events delivered by a transcription stream.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Fragment(TranscriptFragment),
    /// Stream failure. A recoverable error is logged and the session continues.
    Error { message: String, recoverable: bool },
}

/// Control side of a transcription stream.
#[async_trait]
pub trait TranscriptionStream: Send + Sync {
    /// Completes once no further fragments will be delivered.
    async fn stop(&self) -> VoiceResult<()>;
}

/// In-process transcription stream backed by a bounded channel.
///
/// Whatever produces text (a line reader, a test script, a real STT client) holds a
/// [`TranscriptSender`]; the orchestrator holds the receiver.
pub struct ChannelTranscription {
    stop_tx: watch::Sender<bool>,
}

impl ChannelTranscription {
    pub fn new(
        capacity: usize,
        clock: SessionClock,
    ) -> (Self, TranscriptSender, mpsc::Receiver<TransportEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (stop_tx, stop_rx) = watch::channel(false);
        let sender = TranscriptSender {
            tx,
            stopped: stop_rx,
            clock,
        };
        (Self { stop_tx }, sender, rx)
    }
}

#[async_trait]
impl TranscriptionStream for ChannelTranscription {
    async fn stop(&self) -> VoiceResult<()> {
        // send_replace never fails, even with every sender already dropped.
        self.stop_tx.send_replace(true);
        info!("Transcription stream stopped");
        Ok(())
    }
}

/// Producer handle for [`ChannelTranscription`].
#[derive(Clone)]
pub struct TranscriptSender {
    tx: mpsc::Sender<TransportEvent>,
    stopped: watch::Receiver<bool>,
    clock: SessionClock,
}

impl TranscriptSender {
    pub async fn send_final(&self, text: impl Into<String>) -> VoiceResult<()> {
        let fragment = TranscriptFragment::final_text(text, self.clock.now());
        self.send(TransportEvent::Fragment(fragment)).await
    }

    pub async fn send_interim(&self, text: impl Into<String>) -> VoiceResult<()> {
        let fragment = TranscriptFragment::interim(text, self.clock.now());
        self.send(TransportEvent::Fragment(fragment)).await
    }

    pub async fn send_error(&self, message: impl Into<String>, recoverable: bool) -> VoiceResult<()> {
        self.send(TransportEvent::Error {
            message: message.into(),
            recoverable,
        })
        .await
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    /// Resolves once the stream has been asked to stop.
    pub async fn stopped(&mut self) {
        while !*self.stopped.borrow_and_update() {
            if self.stopped.changed().await.is_err() {
                return;
            }
        }
    }

    async fn send(&self, event: TransportEvent) -> VoiceResult<()> {
        if self.is_stopped() {
            debug!("Transport stopped; dropping {:?}", event);
            return Err(VoiceError::Transport("stream stopped".to_string()));
        }
        self.tx
            .send(event)
            .await
            .map_err(|e| VoiceError::Transport(format!("receiver closed: {}", e)))
    }
}
