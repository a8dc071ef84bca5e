// Anthropic Provider Implementation
use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;

use crate::{
    errors::AppError,
    providers::{
        send_streaming, sse_events, BackendClient, BackendEvent, BackendStream, ChatBackend,
        Parsed, Provider,
    },
    usage::UsageMetrics,
};
use super::model::*;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic provider implementation (Messages API, streaming)
pub struct AnthropicProvider {
    config: BackendClient,
    client: Client,
}

impl AnthropicProvider {
    pub fn new(config: BackendClient, client: Client) -> Self {
        Self { config, client }
    }

    fn build_request(&self, prompt: &str) -> AnthropicRequest {
        AnthropicRequest {
            model: self.config.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: self.config.temperature,
            stream: true,
        }
    }
}

/// Stateful parser: input tokens arrive in `message_start`, output tokens
/// in each `message_delta`.
#[derive(Debug, Default)]
pub struct AnthropicStreamParser {
    input_tokens: u64,
}

impl AnthropicStreamParser {
    pub fn parse(&mut self, data: &str) -> Result<Parsed, AppError> {
        let event: AnthropicStreamEvent = serde_json::from_str(data).map_err(|e| {
            AppError::provider_error(502, format!("Invalid Anthropic stream event: {}", e))
        })?;

        let events = match event {
            AnthropicStreamEvent::MessageStart { message } => {
                self.input_tokens = message.usage.unwrap_or_default().input_tokens;
                Vec::new()
            }
            AnthropicStreamEvent::ContentBlockDelta { delta } => match delta.text {
                Some(text) if delta.type_field == "text_delta" && !text.is_empty() => {
                    vec![BackendEvent::Fragment(text)]
                }
                _ => Vec::new(),
            },
            AnthropicStreamEvent::MessageDelta { usage: Some(usage) } => {
                vec![BackendEvent::Usage(UsageMetrics::new(self.input_tokens, usage.output_tokens))]
            }
            AnthropicStreamEvent::MessageDelta { usage: None } | AnthropicStreamEvent::Other => {
                Vec::new()
            }
            AnthropicStreamEvent::MessageStop => return Ok(Parsed::Done),
            AnthropicStreamEvent::Error { error } => {
                return Err(AppError::provider_error(
                    502,
                    format!("Anthropic {}: {}", error.error_type, error.message),
                ));
            }
        };

        Ok(Parsed::Events(events))
    }
}

#[async_trait]
impl ChatBackend for AnthropicProvider {
    async fn stream(&self, prompt: &str) -> Result<BackendStream, AppError> {
        let url = format!("{}/messages", self.config.api_base);

        let request = self
            .client
            .post(&url)
            .header("x-api-key", self.config.credential.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&self.build_request(prompt));

        let response = send_streaming(request, self.config.provider, self.config.timeout).await?;
        tracing::debug!(
            provider = %self.config.provider,
            model = %self.config.model,
            "Stream opened"
        );

        let mut parser = AnthropicStreamParser::default();
        Ok(sse_events(response, self.config.provider, move |data: &str| parser.parse(data)))
    }

    fn provider(&self) -> Provider {
        self.config.provider
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}
