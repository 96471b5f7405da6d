//! Shared test doubles for the agent crate.

use async_trait::async_trait;
use droidpilot_core::action::StructuredAction;
use droidpilot_core::device::{ActionExecutor, DeviceBridge, ExecutionOutcome, Screenshot};
use droidpilot_core::error::{DeviceError, ProviderError};
use droidpilot_core::provider::{ChunkReceiver, Provider, ProviderRequest, StreamChunk};
use std::sync::Mutex;

#[derive(Clone)]
enum Script {
    Chunks(Vec<String>),
    Interrupted(Vec<String>),
    Fail(ProviderError),
}

/// A mock provider that streams scripted replies in sequence.
///
/// Each call to `stream` plays the next script. Once the scripts run out the
/// last one is replayed, so a single script models a model that always
/// answers the same way.
pub struct ScriptedProvider {
    scripts: Vec<Script>,
    call_count: Mutex<usize>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn from_scripts(scripts: Vec<Script>) -> Self {
        assert!(!scripts.is_empty(), "ScriptedProvider needs at least one script");
        Self {
            scripts,
            call_count: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// One reply per inner list, each split into the given fragments.
    pub fn new(replies: Vec<Vec<&str>>) -> Self {
        Self::from_scripts(
            replies
                .into_iter()
                .map(|r| Script::Chunks(r.into_iter().map(String::from).collect()))
                .collect(),
        )
    }

    /// Every call returns the same single-fragment reply.
    pub fn always(reply: &str) -> Self {
        Self::new(vec![vec![reply]])
    }

    /// Every call fails before streaming.
    pub fn failing(error: ProviderError) -> Self {
        Self::from_scripts(vec![Script::Fail(error)])
    }

    /// Streams `fragments`, then breaks the connection.
    pub fn interrupted(fragments: Vec<&str>) -> Self {
        Self::from_scripts(vec![Script::Interrupted(
            fragments.into_iter().map(String::from).collect(),
        )])
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    pub fn last_request(&self) -> Option<ProviderRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted_mock"
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let script = {
            let mut count = self.call_count.lock().unwrap();
            let index = (*count).min(self.scripts.len() - 1);
            *count += 1;
            self.scripts[index].clone()
        };

        let (fragments, interrupted) = match script {
            Script::Fail(error) => return Err(error),
            Script::Chunks(fragments) => (fragments, false),
            Script::Interrupted(fragments) => (fragments, true),
        };

        let (tx, rx) = tokio::sync::mpsc::channel(fragments.len() + 1);
        for fragment in fragments {
            tx.send(Ok(StreamChunk::text(fragment))).await.unwrap();
        }
        let last = if interrupted {
            Err(ProviderError::StreamInterrupted("connection reset".into()))
        } else {
            Ok(StreamChunk::done())
        };
        tx.send(last).await.unwrap();
        Ok(rx)
    }
}

/// A device that always shows the same screen.
pub struct StaticDevice {
    pub screenshot: Screenshot,
    pub app: String,
    pub fail_screenshot: bool,
}

impl StaticDevice {
    pub fn new(app: &str) -> Self {
        Self {
            screenshot: Screenshot {
                base64_data: "iVBORw0KGgo=".into(),
                width: 1080,
                height: 2400,
            },
            app: app.into(),
            fail_screenshot: false,
        }
    }

    pub fn broken() -> Self {
        Self {
            fail_screenshot: true,
            ..Self::new("System Home")
        }
    }
}

#[async_trait]
impl DeviceBridge for StaticDevice {
    async fn screenshot(&self, _device_id: Option<&str>) -> Result<Screenshot, DeviceError> {
        if self.fail_screenshot {
            return Err(DeviceError::Screenshot("device offline".into()));
        }
        Ok(self.screenshot.clone())
    }

    async fn current_app(&self, _device_id: Option<&str>) -> Result<String, DeviceError> {
        Ok(self.app.clone())
    }
}

/// An executor that records every dispatch.
///
/// `finish` commands report completion; `do` commands succeed unless the
/// executor was built with [`RecordingExecutor::failing_do`].
pub struct RecordingExecutor {
    calls: Mutex<Vec<(StructuredAction, u32, u32)>>,
    do_failure: Option<String>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            do_failure: None,
        }
    }

    pub fn failing_do(reason: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            do_failure: Some(reason.into()),
        }
    }

    pub fn calls(&self) -> Vec<(StructuredAction, u32, u32)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn execute(
        &self,
        action: &StructuredAction,
        screen_width: u32,
        screen_height: u32,
    ) -> Result<ExecutionOutcome, DeviceError> {
        self.calls
            .lock()
            .unwrap()
            .push((action.clone(), screen_width, screen_height));

        match action {
            StructuredAction::Finish { message } => Ok(ExecutionOutcome::finished(message.clone())),
            StructuredAction::Do(inner) => match &self.do_failure {
                Some(reason) => Err(DeviceError::ExecutionFailed {
                    action: inner.name().to_string(),
                    reason: reason.clone(),
                }),
                None => Ok(ExecutionOutcome::ok()),
            },
        }
    }
}
