//! Transcript segmentation: deciding when the user has finished an utterance.
//!
//! The segmenter replaces audio-level gap detection with text-level endpointing.
//! Final fragments accumulate until no fragment has arrived for the endpointing
//! delay; the accumulated text is then emitted once and the accumulator cleared.

use crate::normalize::normalize_for_match;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// One unit of speech-to-text output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptFragment {
    pub text: String,
    /// `false` for interim hypotheses that later fragments supersede.
    pub is_final: bool,
    pub received_at: DateTime<Utc>,
}

impl TranscriptFragment {
    pub fn final_text(text: impl Into<String>, received_at: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            received_at,
        }
    }

    pub fn interim(text: impl Into<String>, received_at: DateTime<Utc>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            received_at,
        }
    }
}

/// Configuration for segment detection
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Silence after the last fragment before a segment is complete (default: 900ms)
    pub endpointing: Duration,

    /// Fragments with fewer alphanumeric characters are noise (default: 3)
    pub min_fragment_chars: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            endpointing: Duration::from_millis(900),
            min_fragment_chars: 3,
        }
    }
}

/// What happened to a pushed fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// Started or extended the current segment.
    Accepted,
    /// Too short to be speech; dropped without touching the timer.
    Noise,
    /// Repeats text already held or already emitted.
    Duplicate,
}

pub struct TranscriptSegmenter {
    config: SegmenterConfig,
    finals: Vec<String>,
    interim: Option<String>,
    last_activity: Option<Instant>,
    last_emitted: Option<(String, Instant)>,
}

impl TranscriptSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            finals: Vec::new(),
            interim: None,
            last_activity: None,
            last_emitted: None,
        }
    }

    /// Feed one fragment that arrived at `now`.
    pub fn push(&mut self, fragment: &TranscriptFragment, now: Instant) -> FragmentOutcome {
        let text = fragment.text.trim();
        let key = normalize_for_match(text);
        let significant = key.chars().filter(|c| c.is_alphanumeric()).count();
        if significant < self.config.min_fragment_chars {
            debug!("🔇 Dropping noise fragment {:?}", text);
            return FragmentOutcome::Noise;
        }

        if self.finals.is_empty() && fragment.is_final {
            if let Some((emitted, at)) = &self.last_emitted {
                if normalize_for_match(emitted) == key
                    && now.duration_since(*at) < self.config.endpointing
                {
                    debug!("Ignoring repeat of emitted segment {:?}", text);
                    return FragmentOutcome::Duplicate;
                }
            }
        }

        self.last_activity = Some(now);

        if !fragment.is_final {
            self.interim = Some(text.to_string());
            return FragmentOutcome::Accepted;
        }
        self.interim = None;

        if let Some(previous) = self.finals.last_mut() {
            let previous_key = normalize_for_match(previous);
            if previous_key == key || previous_key.starts_with(&key) {
                debug!("Duplicate final fragment {:?}", text);
                return FragmentOutcome::Duplicate;
            }
            if key.starts_with(&previous_key) {
                // Growing hypothesis of the same phrase.
                *previous = text.to_string();
                return FragmentOutcome::Accepted;
            }
        }
        self.finals.push(text.to_string());
        FragmentOutcome::Accepted
    }

    /// When the current segment completes if nothing else arrives.
    pub fn deadline(&self) -> Option<Instant> {
        if self.finals.is_empty() {
            return None;
        }
        self.last_activity.map(|t| t + self.config.endpointing)
    }

    /// Emit the completed segment once its deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<String> {
        let deadline = self.deadline()?;
        if now < deadline {
            return None;
        }
        let segment = self.finals.join(" ");
        self.finals.clear();
        self.interim = None;
        self.last_activity = None;
        self.last_emitted = Some((segment.clone(), now));
        info!("✅ Segment complete: {:?}", segment);
        Some(segment)
    }

    /// Final fragments accumulated since the last emission.
    pub fn pending_fragments(&self) -> &[String] {
        &self.finals
    }

    pub fn interim(&self) -> Option<&str> {
        self.interim.as_deref()
    }

    /// Discard everything held; used at shutdown.
    pub fn clear(&mut self) {
        self.finals.clear();
        self.interim = None;
        self.last_activity = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(text: &str, is_final: bool) -> TranscriptFragment {
        TranscriptFragment {
            text: text.to_string(),
            is_final,
            received_at: Utc::now(),
        }
    }

    fn segmenter() -> TranscriptSegmenter {
        TranscriptSegmenter::new(SegmenterConfig::default())
    }

    const STEP: Duration = Duration::from_millis(100);

    #[test]
    fn growing_finals_collapse_to_one_segment() {
        let mut seg = segmenter();
        let t0 = Instant::now();
        assert_eq!(seg.push(&fragment("h", true), t0), FragmentOutcome::Noise);
        assert_eq!(seg.push(&fragment("he", true), t0 + STEP), FragmentOutcome::Noise);
        assert_eq!(
            seg.push(&fragment("hello", true), t0 + STEP * 2),
            FragmentOutcome::Accepted
        );

        assert!(seg.poll(t0 + STEP * 2 + Duration::from_millis(899)).is_none());
        assert_eq!(
            seg.poll(t0 + STEP * 2 + Duration::from_millis(900)),
            Some("hello".to_string())
        );
        assert!(seg.pending_fragments().is_empty());
        assert!(seg.poll(t0 + Duration::from_secs(10)).is_none());
    }

    #[test]
    fn short_fragment_alone_never_emits() {
        let mut seg = segmenter();
        let t0 = Instant::now();
        seg.push(&fragment("uh", true), t0);
        assert!(seg.deadline().is_none());
        assert!(seg.poll(t0 + Duration::from_secs(5)).is_none());
    }

    #[test]
    fn noise_does_not_extend_the_window() {
        let mut seg = segmenter();
        let t0 = Instant::now();
        seg.push(&fragment("pickup from Chennai", true), t0);
        seg.push(&fragment("mm", true), t0 + Duration::from_millis(800));
        assert_eq!(seg.deadline(), Some(t0 + Duration::from_millis(900)));
    }

    #[test]
    fn extended_final_replaces_its_prefix() {
        let mut seg = segmenter();
        let t0 = Instant::now();
        seg.push(&fragment("pickup from", true), t0);
        seg.push(&fragment("pickup from Mumbai", true), t0 + STEP);
        seg.push(&fragment("pickup from Mumbai", true), t0 + STEP * 2);
        assert_eq!(seg.pending_fragments(), ["pickup from Mumbai".to_string()]);
    }

    #[test]
    fn distinct_finals_join_with_spaces() {
        let mut seg = segmenter();
        let t0 = Instant::now();
        seg.push(&fragment("pickup from Mumbai", true), t0);
        seg.push(&fragment("drop to Pune", true), t0 + STEP);
        assert_eq!(
            seg.poll(t0 + STEP + Duration::from_secs(1)),
            Some("pickup from Mumbai drop to Pune".to_string())
        );
    }

    #[test]
    fn interim_fragments_keep_only_the_latest() {
        let mut seg = segmenter();
        let t0 = Instant::now();
        seg.push(&fragment("pick", false), t0);
        seg.push(&fragment("pickup fro", false), t0 + STEP);
        assert_eq!(seg.interim(), Some("pickup fro"));
        assert!(seg.deadline().is_none());

        seg.push(&fragment("pickup from Delhi", true), t0 + STEP * 2);
        assert!(seg.interim().is_none());
        // A later interim means the user is still talking.
        seg.push(&fragment("and", false), t0 + STEP * 5);
        assert_eq!(seg.deadline(), Some(t0 + STEP * 5 + Duration::from_millis(900)));
        assert_eq!(
            seg.poll(t0 + Duration::from_secs(2)),
            Some("pickup from Delhi".to_string())
        );
    }

    #[test]
    fn repeated_final_after_emission_is_ignored() {
        let mut seg = segmenter();
        let t0 = Instant::now();
        seg.push(&fragment("drop to Pune", true), t0);
        let emitted_at = t0 + Duration::from_millis(900);
        assert!(seg.poll(emitted_at).is_some());

        assert_eq!(
            seg.push(&fragment("drop to Pune", true), emitted_at + STEP),
            FragmentOutcome::Duplicate
        );
        assert!(seg.deadline().is_none());

        // Much later the same words are a new utterance.
        assert_eq!(
            seg.push(&fragment("drop to Pune", true), emitted_at + Duration::from_secs(5)),
            FragmentOutcome::Accepted
        );
    }
}
