//! Agent events and the bus that carries them.
//!
//! The agent loop never writes to the console. It publishes events here and
//! front ends (the CLI narrator, tests, a future UI) subscribe.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::action::StructuredAction;

/// Events emitted while an agent works through a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A step began.
    StepStarted { step: u32 },

    /// Cleaned thinking text streamed from the model.
    ThinkingDelta { content: String },

    /// The model moved from thinking to emitting its action.
    ThinkingFinished,

    /// Latency figures for the model exchange that just completed.
    InferenceTimed {
        time_to_first_token: Option<Duration>,
        time_to_thinking_end: Option<Duration>,
        total_time: Duration,
    },

    /// The action that is about to be dispatched.
    ActionDecided { step: u32, action: StructuredAction },

    /// A step completed.
    StepFinished {
        step: u32,
        success: bool,
        finished: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// The task ended, either by finishing or by exhausting the step budget.
    TaskFinished { message: String, steps: u32 },
}

impl AgentEvent {
    /// Short event name, matching the serde tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StepStarted { .. } => "step_started",
            Self::ThinkingDelta { .. } => "thinking_delta",
            Self::ThinkingFinished => "thinking_finished",
            Self::InferenceTimed { .. } => "inference_timed",
            Self::ActionDecided { .. } => "action_decided",
            Self::StepFinished { .. } => "step_finished",
            Self::TaskFinished { .. } => "task_finished",
        }
    }
}

/// A broadcast-based event bus for agent events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<AgentEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: AgentEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<AgentEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
