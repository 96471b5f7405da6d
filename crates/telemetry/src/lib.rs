//! Latency measurement for droidpilot model exchanges.
//!
//! A [`StreamClock`] is started when a streaming request is issued and
//! marked as fragments arrive. It yields an [`InferenceTimings`] record with
//! time-to-first-token, time-to-thinking-end and total latency.

pub mod clock;

pub use clock::{InferenceTimings, StreamClock};
