use thiserror::Error;

/// Caller misuse of the agent loop.
///
/// Failures that happen *during* a step (model, decode, device) never
/// surface here; they end the task through a terminal `StepResult`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("A task instruction is required for the first step")]
    MissingTask,

    #[error("Invalid agent settings: {0}")]
    InvalidSettings(String),
}
