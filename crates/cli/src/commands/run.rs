//! `droidpilot run` — drive a task against a static screenshot.
//!
//! The model is real; the device is not. Every step shows the model the same
//! PNG, and decoded actions are logged instead of performed.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use droidpilot_agent::{AgentLoop, Lang, MAX_STEPS_REACHED, Messages, ModelGateway};
use droidpilot_config::AppConfig;
use droidpilot_core::action::StructuredAction;
use droidpilot_core::device::{ActionExecutor, DeviceBridge, ExecutionOutcome, Screenshot};
use droidpilot_core::error::DeviceError;
use droidpilot_core::event::{AgentEvent, EventBus};
use droidpilot_providers::OpenAiCompatProvider;
use tokio::sync::broadcast;
use tracing::info;

pub struct RunArgs {
    pub task: String,
    pub screenshot: PathBuf,
    pub app: String,
    pub max_steps: Option<u32>,
    pub lang: Option<String>,
}

pub async fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(max_steps) = args.max_steps {
        config.agent.max_steps = max_steps;
    }
    if let Some(lang) = args.lang {
        config.agent.lang = lang;
    }
    config.validate()?;
    let lang: Lang = config.agent.lang.parse()?;

    let device = StaticScreen::load(&args.screenshot, &args.app)?;
    info!(
        width = device.screenshot.width,
        height = device.screenshot.height,
        app = %device.app,
        "Loaded static screen"
    );

    let event_bus = Arc::new(EventBus::default());
    let provider = Arc::new(OpenAiCompatProvider::from_config(&config.model));
    let gateway = ModelGateway::from_config(provider, &config.model, event_bus.clone());
    let mut agent = AgentLoop::new(
        gateway,
        Arc::new(device),
        Arc::new(DryRunExecutor),
        event_bus.clone(),
    )
    .with_settings(&config.agent)?;

    println!();
    println!("  Model:     {}", config.model.model_name);
    println!("  Endpoint:  {}", config.model.base_url);
    println!("  Max steps: {}", config.agent.max_steps);
    println!("  Task:      {}", args.task);

    let narrator = config
        .agent
        .verbose
        .then(|| tokio::spawn(narrate(event_bus.subscribe(), lang)));

    let message = agent.run(&args.task).await;

    if let Some(handle) = narrator {
        let _ = handle.await;
    }

    println!();
    println!("{}", outcome_text(lang.messages(), &message));
    Ok(())
}

/// The final message in the configured language.
fn outcome_text<'a>(msgs: &'a Messages, message: &'a str) -> &'a str {
    if message == MAX_STEPS_REACHED {
        msgs.max_steps_reached
    } else {
        message
    }
}

/// A device that always shows the same screenshot.
struct StaticScreen {
    screenshot: Screenshot,
    app: String,
}

impl StaticScreen {
    fn load(path: &std::path::Path, app: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let bytes = std::fs::read(path)
            .map_err(|e| format!("Failed to read screenshot {}: {e}", path.display()))?;
        let (width, height) =
            png_dimensions(&bytes).ok_or_else(|| format!("{} is not a PNG file", path.display()))?;

        Ok(Self {
            screenshot: Screenshot {
                base64_data: base64::engine::general_purpose::STANDARD.encode(&bytes),
                width,
                height,
            },
            app: app.to_string(),
        })
    }
}

#[async_trait]
impl DeviceBridge for StaticScreen {
    async fn screenshot(&self, _device_id: Option<&str>) -> Result<Screenshot, DeviceError> {
        Ok(self.screenshot.clone())
    }

    async fn current_app(&self, _device_id: Option<&str>) -> Result<String, DeviceError> {
        Ok(self.app.clone())
    }
}

/// Width and height from a PNG's IHDR chunk.
fn png_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    const SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
    if bytes.len() < 24 || !bytes.starts_with(SIGNATURE) || &bytes[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes(bytes[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(bytes[20..24].try_into().ok()?);
    Some((width, height))
}

/// Logs actions instead of performing them.
struct DryRunExecutor;

#[async_trait]
impl ActionExecutor for DryRunExecutor {
    async fn execute(
        &self,
        action: &StructuredAction,
        screen_width: u32,
        screen_height: u32,
    ) -> Result<ExecutionOutcome, DeviceError> {
        info!(
            action = %action.kind_name(),
            screen = %format!("{screen_width}x{screen_height}"),
            "Dry run: action not performed"
        );
        Ok(match action {
            StructuredAction::Finish { message } => ExecutionOutcome::finished(message.clone()),
            StructuredAction::Do(_) => ExecutionOutcome::ok(),
        })
    }
}

/// Print agent events to the console until the task ends.
async fn narrate(mut rx: broadcast::Receiver<Arc<AgentEvent>>, lang: Lang) {
    let msgs = lang.messages();
    let mut stdout = std::io::stdout();

    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event.as_ref() {
            AgentEvent::StepStarted { step } => {
                println!("\n{}", "=".repeat(50));
                println!("{} {step}", msgs.step);
                println!("💭 {}:", msgs.thinking);
                println!("{}", "-".repeat(50));
            }
            AgentEvent::ThinkingDelta { content } => {
                print!("{content}");
                let _ = stdout.flush();
            }
            AgentEvent::ThinkingFinished => println!(),
            AgentEvent::InferenceTimed {
                time_to_first_token,
                time_to_thinking_end,
                total_time,
            } => {
                println!();
                print!(
                    "{}",
                    format_timings(msgs, *time_to_first_token, *time_to_thinking_end, *total_time)
                );
            }
            AgentEvent::ActionDecided { action, .. } => {
                println!("{}", "-".repeat(50));
                println!("🎯 {}:", msgs.action);
                println!(
                    "{}",
                    serde_json::to_string_pretty(action).unwrap_or_else(|_| format!("{action:?}"))
                );
                println!("{}", "=".repeat(50));
            }
            AgentEvent::StepFinished {
                finished: true,
                message,
                ..
            } => {
                println!("\n🎉 {}", "=".repeat(48));
                println!(
                    "✅ {}: {}",
                    msgs.task_completed,
                    message.as_deref().unwrap_or(msgs.done)
                );
                println!("{}", "=".repeat(50));
            }
            AgentEvent::StepFinished { .. } => {}
            AgentEvent::TaskFinished { .. } => break,
        }
    }
}

fn format_timings(
    msgs: &Messages,
    first_token: Option<Duration>,
    thinking_end: Option<Duration>,
    total: Duration,
) -> String {
    let mut out = format!("{}\n⏱️  {}:\n", "=".repeat(50), msgs.performance_metrics);
    if let Some(t) = first_token {
        out.push_str(&format!("{}: {:.3}s\n", msgs.time_to_first_token, t.as_secs_f64()));
    }
    if let Some(t) = thinking_end {
        out.push_str(&format!("{}: {:.3}s\n", msgs.time_to_thinking_end, t.as_secs_f64()));
    }
    out.push_str(&format!(
        "{}: {:.3}s\n",
        msgs.total_inference_time,
        total.as_secs_f64()
    ));
    out
}
