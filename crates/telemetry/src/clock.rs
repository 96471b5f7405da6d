//! Stream clock for a single model exchange.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Latency breakdown of one streamed model reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceTimings {
    /// Request issued → first content fragment.
    pub time_to_first_token: Option<Duration>,
    /// Request issued → first action marker seen.
    pub time_to_thinking_end: Option<Duration>,
    /// Request issued → stream exhausted.
    pub total_time: Duration,
}

/// Records the instants that matter while a reply streams in.
///
/// Each mark is recorded once; later calls are ignored.
#[derive(Debug, Clone)]
pub struct StreamClock {
    started: Instant,
    first_token: Option<Duration>,
    thinking_end: Option<Duration>,
}

impl StreamClock {
    /// Start timing now.
    pub fn start() -> Self {
        Self::start_at(Instant::now())
    }

    pub fn start_at(started: Instant) -> Self {
        Self {
            started,
            first_token: None,
            thinking_end: None,
        }
    }

    pub fn mark_first_token(&mut self) {
        self.mark_first_token_at(Instant::now());
    }

    pub fn mark_first_token_at(&mut self, now: Instant) {
        if self.first_token.is_none() {
            self.first_token = Some(now.saturating_duration_since(self.started));
        }
    }

    pub fn mark_thinking_end(&mut self) {
        self.mark_thinking_end_at(Instant::now());
    }

    pub fn mark_thinking_end_at(&mut self, now: Instant) {
        if self.thinking_end.is_none() {
            self.thinking_end = Some(now.saturating_duration_since(self.started));
        }
    }

    /// Stop the clock.
    pub fn finish(&self) -> InferenceTimings {
        self.finish_at(Instant::now())
    }

    pub fn finish_at(&self, now: Instant) -> InferenceTimings {
        let timings = InferenceTimings {
            time_to_first_token: self.first_token,
            time_to_thinking_end: self.thinking_end,
            total_time: now.saturating_duration_since(self.started),
        };
        tracing::trace!(?timings, "Stream clock stopped");
        timings
    }
}
