//! Device-side collaborators.
//!
//! The agent never touches a phone directly. It asks a [`DeviceBridge`] for
//! the current screen and foreground app, and hands decoded actions to an
//! [`ActionExecutor`]. Implementations (ADB, HDC, simulators, dry runs) live
//! outside the core.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::action::StructuredAction;
use crate::error::DeviceError;

/// A captured screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Screenshot {
    /// Base64-encoded PNG
    pub base64_data: String,
    pub width: u32,
    pub height: u32,
}

/// What the executor reports back after dispatching an action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,

    /// The executor decided the task is over (e.g. user declined a takeover).
    #[serde(default)]
    pub should_finish: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ExecutionOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            should_finish: false,
            message: None,
        }
    }

    pub fn finished(message: impl Into<String>) -> Self {
        Self {
            success: true,
            should_finish: true,
            message: Some(message.into()),
        }
    }
}

/// Reads device state.
#[async_trait]
pub trait DeviceBridge: Send + Sync {
    async fn screenshot(&self, device_id: Option<&str>) -> Result<Screenshot, DeviceError>;

    /// Identifier of the app currently in the foreground.
    async fn current_app(&self, device_id: Option<&str>) -> Result<String, DeviceError>;
}

/// Carries out a decoded action on the device.
///
/// Confirmation and takeover hooks, when a caller needs them, belong to the
/// executor implementation.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(
        &self,
        action: &StructuredAction,
        screen_width: u32,
        screen_height: u32,
    ) -> Result<ExecutionOutcome, DeviceError>;
}
