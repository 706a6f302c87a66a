//! Session clock.
//!
//! Wall-clock readings can jump; history timestamps must not. The session clock
//! anchors one UTC reading to a monotonic `tokio::time::Instant` and derives every
//! later timestamp from elapsed monotonic time. Under a paused tokio runtime it
//! advances with virtual time.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    base_instant: Instant,
    base_utc: DateTime<Utc>,
}

impl SessionClock {
    /// Anchor at the current wall-clock time.
    pub fn start() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Anchor at a fixed wall-clock time.
    pub fn starting_at(base_utc: DateTime<Utc>) -> Self {
        Self {
            base_instant: Instant::now(),
            base_utc,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = self.base_instant.elapsed();
        match chrono::Duration::from_std(elapsed) {
            Ok(d) => self.base_utc + d,
            Err(_) => self.base_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn follows_virtual_time() {
        let base = Utc.with_ymd_and_hms(2025, 12, 24, 6, 0, 0).unwrap();
        let clock = SessionClock::starting_at(base);
        assert_eq!(clock.now(), base);

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(clock.now(), base + chrono::Duration::milliseconds(1500));
    }

    #[tokio::test]
    async fn never_goes_backwards() {
        let clock = SessionClock::start();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
