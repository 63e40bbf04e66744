//! Real-time pacing for outbound audio
//!
//! The carrier buffers whatever it is sent, so writing a whole utterance at
//! once would leave nothing for barge-in to cancel. Frames are released at
//! playback speed with a small lead.

use std::time::Duration;
use tokio::time::Instant;

pub struct Pacer {
    frame: Duration,
    lead: Duration,
    started: Option<Instant>,
    sent: u32,
}

impl Pacer {
    pub fn new(frame: Duration, lead: Duration) -> Self {
        Self {
            frame,
            lead,
            started: None,
            sent: 0,
        }
    }

    /// Wait until the next frame is due
    pub async fn wait(&mut self) {
        let now = Instant::now();
        let start = *self.started.get_or_insert(now);
        let due = start + self.frame * self.sent;
        if due > now + self.lead {
            tokio::time::sleep_until(due - self.lead).await;
        }
        self.sent += 1;
    }

    /// Start a new utterance
    pub fn reset(&mut self) {
        self.started = None;
        self.sent = 0;
    }

    /// Audio released so far in the current utterance
    pub fn released(&self) -> Duration {
        self.frame * self.sent
    }
}
