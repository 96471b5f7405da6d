//! The step orchestrator.

use std::sync::Arc;

use droidpilot_config::AgentSettings;
use droidpilot_core::action::{ActionDecoder, CommandDecoder, StructuredAction};
use droidpilot_core::device::{ActionExecutor, DeviceBridge, ExecutionOutcome, Screenshot};
use droidpilot_core::error::DeviceError;
use droidpilot_core::event::{AgentEvent, EventBus};
use droidpilot_core::message::{Conversation, ImageAttachment, Message};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::gateway::ModelGateway;
use crate::i18n::Lang;
use crate::prompts;
use crate::retry::{RetryState, RetryTracker, signature_of};

/// Returned by [`AgentLoop::run`] when the step ceiling is hit.
pub const MAX_STEPS_REACHED: &str = "Max steps reached";

/// Returned by [`AgentLoop::run`] when a task finishes without a message.
pub const TASK_COMPLETED: &str = "Task completed";

const DEFAULT_MAX_STEPS: u32 = 100;
const DEFAULT_RETRY_THRESHOLD: u32 = 3;

/// Outcome of a single step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    pub finished: bool,
    pub action: Option<StructuredAction>,
    pub thinking: String,
    pub message: Option<String>,
}

/// Drives one task: observe the device, ask the model, dispatch its command.
///
/// Each instance owns its conversation and retry state. Run independent
/// instances for concurrent tasks.
pub struct AgentLoop {
    gateway: ModelGateway,
    device: Arc<dyn DeviceBridge>,
    executor: Arc<dyn ActionExecutor>,
    decoder: Arc<dyn ActionDecoder>,
    event_bus: Arc<EventBus>,

    device_id: Option<String>,
    max_steps: u32,
    lang: Lang,
    /// Overrides the per-language default prompt.
    system_prompt: Option<String>,

    context: Conversation,
    step_count: u32,
    retry: RetryTracker,
}

impl AgentLoop {
    /// Create a new agent loop with default settings.
    pub fn new(
        gateway: ModelGateway,
        device: Arc<dyn DeviceBridge>,
        executor: Arc<dyn ActionExecutor>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            gateway,
            device,
            executor,
            decoder: Arc::new(CommandDecoder),
            event_bus,
            device_id: None,
            max_steps: DEFAULT_MAX_STEPS,
            lang: Lang::default(),
            system_prompt: None,
            context: Conversation::new(),
            step_count: 0,
            retry: RetryTracker::new(DEFAULT_RETRY_THRESHOLD, Lang::default()),
        }
    }

    /// Apply the `[agent]` config section.
    pub fn with_settings(self, settings: &AgentSettings) -> Result<Self, AgentError> {
        let lang: Lang = settings.lang.parse().map_err(AgentError::InvalidSettings)?;
        if settings.max_steps == 0 {
            return Err(AgentError::InvalidSettings("max_steps must be at least 1".into()));
        }

        let mut agent = self
            .with_max_steps(settings.max_steps)
            .with_lang(lang)
            .with_retry_threshold(settings.retry_reminder_threshold);
        agent.device_id = settings.device_id.clone();
        agent.system_prompt = settings.system_prompt.clone();
        Ok(agent)
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn ActionDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_max_steps(mut self, max: u32) -> Self {
        self.max_steps = max;
        self
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_lang(mut self, lang: Lang) -> Self {
        self.lang = lang;
        self.retry = RetryTracker::new(self.retry_threshold(), lang);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Repeat count at which the retry note escalates; 0 disables escalation.
    pub fn with_retry_threshold(mut self, threshold: u32) -> Self {
        self.retry = RetryTracker::new(threshold, self.lang);
        self
    }

    fn retry_threshold(&self) -> u32 {
        self.retry.threshold()
    }

    /// The conversation so far.
    pub fn context(&self) -> &Conversation {
        &self.context
    }

    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    pub fn retry_state(&self) -> &RetryState {
        self.retry.state()
    }

    /// The note that will be prepended to the next user turn, if any.
    pub fn retry_note(&self) -> Option<String> {
        self.retry.note()
    }

    /// Forget the current task.
    pub fn reset(&mut self) {
        self.context = Conversation::new();
        self.step_count = 0;
        self.retry.reset();
    }

    /// Run `task` to completion or until the step ceiling is reached.
    ///
    /// Returns the finishing message, or [`MAX_STEPS_REACHED`].
    pub async fn run(&mut self, task: &str) -> String {
        self.reset();
        info!(task = %task, max_steps = self.max_steps, "Task started");

        let mut result = self.execute_step(Some(task)).await;
        while !result.finished && self.step_count < self.max_steps {
            result = self.execute_step(None).await;
        }

        let message = if result.finished {
            result.message.unwrap_or_else(|| TASK_COMPLETED.to_string())
        } else {
            MAX_STEPS_REACHED.to_string()
        };

        info!(steps = self.step_count, message = %message, "Task ended");
        self.event_bus.publish(AgentEvent::TaskFinished {
            message: message.clone(),
            steps: self.step_count,
        });
        message
    }

    /// Execute a single step.
    ///
    /// `task` is required on the first step of a fresh context and ignored
    /// afterwards.
    pub async fn step(&mut self, task: Option<&str>) -> Result<StepResult, AgentError> {
        let task = task.filter(|t| !t.is_empty());
        if self.context.is_empty() && task.is_none() {
            return Err(AgentError::MissingTask);
        }
        Ok(self.execute_step(task).await)
    }

    async fn observe(&self) -> Result<(Screenshot, String), DeviceError> {
        let device_id = self.device_id.as_deref();
        let screenshot = self.device.screenshot(device_id).await?;
        let current_app = self.device.current_app(device_id).await?;
        Ok((screenshot, current_app))
    }

    fn user_text(&self, task: Option<&str>, current_app: &str) -> String {
        let screen_info = serde_json::json!({ "current_app": current_app }).to_string();
        let base = match task {
            Some(task) => format!("{task}\n\n{screen_info}"),
            None => format!("** Screen Info **\n\n{screen_info}"),
        };
        self.retry.compose(&base)
    }

    async fn dispatch(
        &self,
        action: StructuredAction,
        screenshot: &Screenshot,
    ) -> (StructuredAction, ExecutionOutcome) {
        let (width, height) = (screenshot.width, screenshot.height);

        let error = match self.executor.execute(&action, width, height).await {
            Ok(outcome) => return (action, outcome),
            Err(e) => e,
        };

        warn!(action = %action.kind_name(), error = %error, "Dispatch failed; finishing task");
        let fallback = StructuredAction::finish(error.to_string());
        match self.executor.execute(&fallback, width, height).await {
            Ok(outcome) => (fallback, outcome),
            Err(e) => {
                warn!(error = %e, "Fallback finish dispatch failed");
                let outcome = ExecutionOutcome {
                    success: false,
                    should_finish: true,
                    message: Some(e.to_string()),
                };
                (fallback, outcome)
            }
        }
    }

    /// Finish the task because a step could not proceed.
    fn abort(&self, step: u32, message: String) -> StepResult {
        self.event_bus.publish(AgentEvent::StepFinished {
            step,
            success: false,
            finished: true,
            message: Some(message.clone()),
        });
        StepResult {
            success: false,
            finished: true,
            action: None,
            thinking: String::new(),
            message: Some(message),
        }
    }

    async fn execute_step(&mut self, task: Option<&str>) -> StepResult {
        let is_first = self.context.is_empty();
        self.step_count += 1;
        let step = self.step_count;
        self.event_bus.publish(AgentEvent::StepStarted { step });
        debug!(step, is_first, "Step started");

        let (screenshot, current_app) = match self.observe().await {
            Ok(state) => state,
            Err(e) => {
                warn!(step, error = %e, "Could not read device state");
                return self.abort(step, format!("Device error: {e}"));
            }
        };

        if is_first {
            let prompt = self
                .system_prompt
                .clone()
                .unwrap_or_else(|| prompts::system_prompt(self.lang));
            self.context.push(Message::system(prompt));
        }
        let text = self.user_text(task.filter(|_| is_first), &current_app);
        self.context.push(Message::user_with_image(
            text,
            ImageAttachment::png(screenshot.base64_data.clone()),
        ));

        let response = match self.gateway.request(&self.context).await {
            Ok(response) => response,
            Err(e) => {
                warn!(step, error = %e, "Model request failed");
                return self.abort(step, format!("Model error: {e}"));
            }
        };

        let action = match self.decoder.decode(&response.action) {
            Ok(action) => action,
            Err(e) => {
                warn!(step, error = %e, action = %response.action, "Could not decode action; finishing task");
                StructuredAction::finish(response.action.clone())
            }
        };

        self.context.strip_latest_image();
        self.context.push(Message::assistant(format!(
            "<think>{}</think><answer>{}</answer>",
            response.thinking, response.action
        )));

        self.event_bus.publish(AgentEvent::ActionDecided {
            step,
            action: action.clone(),
        });

        let (executed, outcome) = self.dispatch(action, &screenshot).await;

        self.retry.update(&signature_of(&executed));

        let finished = executed.is_finish() || outcome.should_finish;
        let message = outcome
            .message
            .or_else(|| executed.message().map(String::from));

        debug!(step, action = %executed.kind_name(), success = outcome.success, finished, "Step finished");
        self.event_bus.publish(AgentEvent::StepFinished {
            step,
            success: outcome.success,
            finished,
            message: message.clone(),
        });

        StepResult {
            success: outcome.success,
            finished,
            action: Some(executed),
            thinking: response.thinking,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{RecordingExecutor, ScriptedProvider, StaticDevice};
    use droidpilot_core::action::{Action, Point};
    use droidpilot_core::error::ProviderError;
    use droidpilot_core::message::Role;

    const BACK: &str = "<think_text>Wrong page</think_text><tool_call>do(action=\"Back\")</tool_call>";
    const DONE: &str = "<think_text>All set</think_text><tool_call>finish(message=\"Alarm set\")</tool_call>";

    struct Harness {
        agent: AgentLoop,
        provider: Arc<ScriptedProvider>,
        executor: Arc<RecordingExecutor>,
        bus: Arc<EventBus>,
    }

    fn harness_with(provider: ScriptedProvider, device: StaticDevice, executor: RecordingExecutor) -> Harness {
        let provider = Arc::new(provider);
        let executor = Arc::new(executor);
        let bus = Arc::new(EventBus::default());
        let gateway = ModelGateway::new(provider.clone(), "test-model", bus.clone());
        let agent = AgentLoop::new(gateway, Arc::new(device), executor.clone(), bus.clone())
            .with_lang(Lang::En)
            .with_system_prompt("SYSTEM");
        Harness {
            agent,
            provider,
            executor,
            bus,
        }
    }

    fn harness(provider: ScriptedProvider) -> Harness {
        harness_with(provider, StaticDevice::new("com.android.settings"), RecordingExecutor::new())
    }

    #[tokio::test]
    async fn first_step_builds_context() {
        let mut h = harness(ScriptedProvider::always(BACK));
        let result = h.agent.step(Some("Open Wi-Fi settings")).await.unwrap();

        assert!(result.success);
        assert!(!result.finished);
        assert_eq!(result.thinking, "Wrong page");
        assert_eq!(result.action, Some(StructuredAction::Do(Action::Back)));
        assert_eq!(h.agent.step_count(), 1);

        let messages = &h.agent.context().messages;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "SYSTEM");
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(
            messages[1].content,
            "Open Wi-Fi settings\n\n{\"current_app\":\"com.android.settings\"}"
        );
        assert!(!messages[1].has_image(), "image must be stripped after the exchange");
        assert_eq!(
            messages[2].content,
            "<think>Wrong page</think><answer>do(action=\"Back\")</answer>"
        );

        let request = h.provider.last_request().unwrap();
        assert!(request.messages[1].has_image(), "image must be sent once");
        assert_eq!(h.executor.calls()[0].1, 1080);
        assert_eq!(h.executor.calls()[0].2, 2400);
    }

    #[tokio::test]
    async fn later_steps_use_screen_info_header_and_retry_note() {
        let mut h = harness(ScriptedProvider::always(BACK));
        h.agent.step(Some("task")).await.unwrap();
        h.agent.step(None).await.unwrap();

        let request = h.provider.last_request().unwrap();
        let user = request.messages.last().unwrap();
        assert_eq!(
            user.content,
            "attempted Back navigation 1 times; state unchanged\n\n** Screen Info **\n\n{\"current_app\":\"com.android.settings\"}"
        );
        assert_eq!(request.messages.iter().filter(|m| m.has_image()).count(), 1);
        assert_eq!(h.agent.retry_state().count, 2);
    }

    #[tokio::test]
    async fn step_without_task_on_fresh_context_errors() {
        let mut h = harness(ScriptedProvider::always(BACK));
        assert_eq!(h.agent.step(None).await.unwrap_err(), AgentError::MissingTask);
        assert_eq!(h.agent.step(Some("")).await.unwrap_err(), AgentError::MissingTask);
        assert_eq!(h.agent.step_count(), 0);
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn finish_command_ends_run() {
        let mut h = harness(ScriptedProvider::new(vec![vec![BACK], vec![DONE]]));
        let message = h.agent.run("Set an alarm").await;
        assert_eq!(message, "Alarm set");
        assert_eq!(h.agent.step_count(), 2);
    }

    #[tokio::test]
    async fn executor_completion_ends_task() {
        struct StopAfterAny;

        #[async_trait::async_trait]
        impl ActionExecutor for StopAfterAny {
            async fn execute(
                &self,
                _action: &StructuredAction,
                _w: u32,
                _h: u32,
            ) -> Result<ExecutionOutcome, DeviceError> {
                Ok(ExecutionOutcome::finished("User declined takeover"))
            }
        }

        let bus = Arc::new(EventBus::default());
        let provider = Arc::new(ScriptedProvider::always(BACK));
        let gateway = ModelGateway::new(provider, "m", bus.clone());
        let mut agent = AgentLoop::new(
            gateway,
            Arc::new(StaticDevice::new("app")),
            Arc::new(StopAfterAny),
            bus,
        );
        let result = agent.step(Some("task")).await.unwrap();
        assert!(result.finished);
        assert_eq!(result.message.as_deref(), Some("User declined takeover"));
        assert_eq!(agent.run("task").await, "User declined takeover");
    }

    #[tokio::test]
    async fn model_error_is_terminal() {
        let mut h = harness(ScriptedProvider::failing(ProviderError::Timeout("120s".into())));
        let result = h.agent.step(Some("task")).await.unwrap();
        assert!(!result.success);
        assert!(result.finished);
        assert!(result.action.is_none());
        assert!(result.message.unwrap().starts_with("Model error:"));
        assert!(h.executor.calls().is_empty());

        assert!(h.agent.run("task").await.starts_with("Model error:"));
        assert_eq!(h.agent.step_count(), 1);
    }

    #[tokio::test]
    async fn device_error_is_terminal() {
        let mut h = harness_with(
            ScriptedProvider::always(BACK),
            StaticDevice::broken(),
            RecordingExecutor::new(),
        );
        let result = h.agent.step(Some("task")).await.unwrap();
        assert!(result.finished);
        assert!(!result.success);
        assert!(result.message.unwrap().contains("device offline"));
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn executor_error_fails_open() {
        let mut h = harness_with(
            ScriptedProvider::always(BACK),
            StaticDevice::new("app"),
            RecordingExecutor::failing_do("adb offline"),
        );
        let result = h.agent.step(Some("task")).await.unwrap();

        assert!(result.finished);
        let message = result.message.unwrap();
        assert!(message.contains("adb offline"));
        assert!(matches!(
            result.action,
            Some(StructuredAction::Finish { message: ref m }) if m.contains("adb offline")
        ));

        let calls = h.executor.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].0.is_finish());
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let mut h = harness(ScriptedProvider::always(BACK));
        h.agent.step(Some("task")).await.unwrap();
        h.agent.reset();
        assert!(h.agent.context().is_empty());
        assert_eq!(h.agent.step_count(), 0);
        assert_eq!(h.agent.retry_state(), &RetryState::default());
        assert_eq!(h.agent.step(None).await.unwrap_err(), AgentError::MissingTask);
    }

    #[tokio::test]
    async fn events_follow_step_lifecycle() {
        let mut h = harness(ScriptedProvider::always(DONE));
        let mut rx = h.bus.subscribe();
        h.agent.run("task").await;

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.event_type());
        }
        assert_eq!(kinds.first(), Some(&"step_started"));
        assert_eq!(kinds.last(), Some(&"task_finished"));
        let decided = kinds.iter().position(|k| *k == "action_decided").unwrap();
        let timed = kinds.iter().position(|k| *k == "inference_timed").unwrap();
        let finished = kinds.iter().position(|k| *k == "step_finished").unwrap();
        assert!(timed < decided && decided < finished);
        assert!(kinds.contains(&"thinking_delta"));
        assert!(kinds.contains(&"thinking_finished"));
    }

    #[tokio::test]
    async fn settings_are_applied() {
        let settings = AgentSettings {
            max_steps: 7,
            device_id: Some("emulator-5554".into()),
            lang: "en".into(),
            system_prompt: None,
            verbose: false,
            retry_reminder_threshold: 2,
        };
        let h = harness(ScriptedProvider::always(BACK));
        let agent = h.agent.with_settings(&settings).unwrap();
        assert_eq!(agent.max_steps(), 7);
        assert_eq!(agent.device_id.as_deref(), Some("emulator-5554"));
        assert_eq!(agent.retry_threshold(), 2);

        let bad = AgentSettings {
            lang: "fr".into(),
            ..settings
        };
        let h = harness(ScriptedProvider::always(BACK));
        assert!(matches!(
            h.agent.with_settings(&bad),
            Err(AgentError::InvalidSettings(_))
        ));
    }

    #[tokio::test]
    async fn default_system_prompt_follows_lang() {
        let bus = Arc::new(EventBus::default());
        let provider = Arc::new(ScriptedProvider::always(DONE));
        let gateway = ModelGateway::new(provider, "m", bus.clone());
        let mut agent = AgentLoop::new(
            gateway,
            Arc::new(StaticDevice::new("app")),
            Arc::new(RecordingExecutor::new()),
            bus,
        )
        .with_lang(Lang::En);
        agent.step(Some("task")).await.unwrap();
        assert!(agent.context().messages[0].content.starts_with("Today's date is:"));
    }

    #[tokio::test]
    async fn tap_signature_reaches_tracker() {
        let tap = "do(action=\"Tap\", element=[100,200])";
        let mut h = harness(ScriptedProvider::always(tap));
        h.agent.step(Some("task")).await.unwrap();
        assert_eq!(h.agent.retry_state().last_target.as_deref(), Some("(100, 200)"));
        assert_eq!(
            h.executor.calls()[0].0,
            StructuredAction::Do(Action::Tap {
                element: Some(Point { x: 100, y: 200 }),
                message: None,
            })
        );
    }
}
