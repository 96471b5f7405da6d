//! Model gateway: one streamed request per agent step.

use std::sync::Arc;

use droidpilot_config::ModelConfig;
use droidpilot_core::error::ProviderError;
use droidpilot_core::event::{AgentEvent, EventBus};
use droidpilot_core::message::Conversation;
use droidpilot_core::provider::{Provider, ProviderRequest};
use tracing::{debug, warn};

use crate::protocol::{ModelResponse, StreamParser};

/// Sends the conversation to the model and parses the streamed reply.
///
/// No retries happen here; a transport failure is returned to the caller
/// and no [`ModelResponse`] is produced.
pub struct ModelGateway {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    top_p: Option<f32>,
    frequency_penalty: Option<f32>,
    max_tokens: Option<u32>,
    extra_body: serde_json::Map<String, serde_json::Value>,
    event_bus: Arc<EventBus>,
}

impl ModelGateway {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, event_bus: Arc<EventBus>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.0,
            top_p: None,
            frequency_penalty: None,
            max_tokens: None,
            extra_body: serde_json::Map::new(),
            event_bus,
        }
    }

    /// Build a gateway carrying the sampling settings from `[model]`.
    pub fn from_config(
        provider: Arc<dyn Provider>,
        config: &ModelConfig,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            temperature: config.temperature,
            top_p: Some(config.top_p),
            frequency_penalty: Some(config.frequency_penalty),
            max_tokens: Some(config.max_tokens),
            extra_body: config.extra_body.clone(),
            ..Self::new(provider, &config.model_name, event_bus)
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, conversation: &Conversation) -> ProviderRequest {
        ProviderRequest {
            model: self.model.clone(),
            messages: conversation.messages.clone(),
            temperature: self.temperature,
            top_p: self.top_p,
            frequency_penalty: self.frequency_penalty,
            max_tokens: self.max_tokens,
            extra_body: self.extra_body.clone(),
        }
    }

    /// Run one exchange over the full conversation.
    pub async fn request(&self, conversation: &Conversation) -> Result<ModelResponse, ProviderError> {
        let request = self.build_request(conversation);
        // Fresh parser per exchange; its clock starts before the request goes out.
        let mut parser = StreamParser::new();

        debug!(
            provider = %self.provider.name(),
            model = %self.model,
            messages = request.messages.len(),
            "Requesting model reply"
        );

        let mut rx = self.provider.stream(request).await?;

        while let Some(item) = rx.recv().await {
            let chunk = item.inspect_err(|e| warn!(error = %e, "Model stream failed"))?;

            if let Some(content) = chunk.content.as_deref() {
                let update = parser.push(content);
                if let Some(delta) = update.delta {
                    self.event_bus.publish(AgentEvent::ThinkingDelta { content: delta });
                }
                if update.thinking_ended {
                    self.event_bus.publish(AgentEvent::ThinkingFinished);
                }
            }

            if chunk.done {
                break;
            }
        }

        if let Some(rest) = parser.flush() {
            self.event_bus.publish(AgentEvent::ThinkingDelta { content: rest });
        }

        let response = parser.finish();
        let timings = response.timings;
        self.event_bus.publish(AgentEvent::InferenceTimed {
            time_to_first_token: timings.time_to_first_token,
            time_to_thinking_end: timings.time_to_thinking_end,
            total_time: timings.total_time,
        });

        debug!(
            raw_len = response.raw.len(),
            total_ms = timings.total_time.as_millis() as u64,
            "Model reply parsed"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ScriptedProvider;
    use droidpilot_core::message::Message;

    fn conversation() -> Conversation {
        let mut conv = Conversation::new();
        conv.push(Message::system("rules"));
        conv.push(Message::user("open settings"));
        conv
    }

    #[tokio::test]
    async fn request_parses_streamed_reply() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec![
            "<think_text>Open ",
            "the app</think_text><tool_call>do(act",
            "ion=\"Launch\", app=\"Settings\")</tool_call>",
        ]]));
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let gateway = ModelGateway::new(provider.clone(), "test-model", bus);

        let response = gateway.request(&conversation()).await.unwrap();
        assert_eq!(response.thinking, "Open the app");
        assert_eq!(response.action, "do(action=\"Launch\", app=\"Settings\")");
        assert!(response.timings.time_to_first_token.is_some());
        assert!(response.timings.time_to_thinking_end.is_some());

        let mut preview = String::new();
        let mut saw_finished = false;
        let mut saw_timing = false;
        while let Ok(event) = rx.try_recv() {
            match event.as_ref() {
                AgentEvent::ThinkingDelta { content } => preview.push_str(content),
                AgentEvent::ThinkingFinished => saw_finished = true,
                AgentEvent::InferenceTimed { .. } => saw_timing = true,
                _ => {}
            }
        }
        assert_eq!(preview, "Open the app");
        assert!(saw_finished);
        assert!(saw_timing);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn request_sends_sampling_settings() {
        let provider = Arc::new(ScriptedProvider::new(vec![vec!["finish(message=\"x\")"]]));
        let config = ModelConfig::default();
        let gateway = ModelGateway::from_config(provider.clone(), &config, Arc::new(EventBus::default()));

        gateway.request(&conversation()).await.unwrap();

        let request = provider.last_request().unwrap();
        assert_eq!(request.model, config.model_name);
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.max_tokens, Some(config.max_tokens));
        assert_eq!(request.top_p, Some(config.top_p));
    }

    #[tokio::test]
    async fn transport_failure_propagates() {
        let provider = Arc::new(ScriptedProvider::failing(ProviderError::Network(
            "connection refused".into(),
        )));
        let gateway = ModelGateway::new(provider, "m", Arc::new(EventBus::default()));
        let err = gateway.request(&conversation()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)));
    }

    #[tokio::test]
    async fn mid_stream_failure_propagates() {
        let provider = Arc::new(ScriptedProvider::interrupted(vec!["<think_text>half"]));
        let gateway = ModelGateway::new(provider, "m", Arc::new(EventBus::default()));
        let err = gateway.request(&conversation()).await.unwrap_err();
        assert!(matches!(err, ProviderError::StreamInterrupted(_)));
    }
}
