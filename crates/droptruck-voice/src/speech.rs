//! Speech synthesis and playback.

use crate::error::VoiceResult;
use async_trait::async_trait;
use std::sync::Mutex;
use tracing::info;

/// Renders text to audio and plays it; resolves once playback has finished.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize_and_play(&self, text: &str) -> VoiceResult<()>;
}

/// "Plays" by logging the line. No audio device required.
#[derive(Debug, Default)]
pub struct LogSynthesizer {
    spoken: Mutex<Vec<String>>,
}

impl LogSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything spoken so far, in order.
    pub fn spoken(&self) -> Vec<String> {
        self.spoken
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SpeechSynthesizer for LogSynthesizer {
    async fn synthesize_and_play(&self, text: &str) -> VoiceResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        info!("🔊 {}", text);
        if let Ok(mut lines) = self.spoken.lock() {
            lines.push(text.to_string());
        }
        Ok(())
    }
}
