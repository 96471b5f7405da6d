//! The droidpilot agent loop.
//!
//! Each step follows an **Observe → Ask → Act** cycle:
//!
//! 1. **Observe** the device: screenshot plus foreground app
//! 2. **Ask** the model, streaming its reply through the protocol parser
//! 3. **Decode** the action text into a structured command
//! 4. **Act** by handing the command to the executor
//!
//! The loop continues until the model issues `finish`, the executor reports
//! completion, a step fails, or the step ceiling is reached.

pub mod error;
pub mod gateway;
pub mod i18n;
pub mod loop_runner;
pub mod prompts;
pub mod protocol;
pub mod retry;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use error::AgentError;
pub use gateway::ModelGateway;
pub use i18n::{Lang, Messages};
pub use loop_runner::{AgentLoop, MAX_STEPS_REACHED, StepResult, TASK_COMPLETED};
pub use protocol::{ModelResponse, PreviewUpdate, StreamParser, parse_response};
pub use retry::{ActionSignature, RetryState, RetryTracker, signature_of};
