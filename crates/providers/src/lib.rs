//! Vision-language model provider implementations for droidpilot.
//!
//! All providers implement the `droidpilot_core::Provider` trait.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
