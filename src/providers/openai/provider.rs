use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde_json::Value;

use crate::{
    errors::AppError,
    providers::{
        send_streaming, sse_events, BackendClient, BackendEvent, BackendStream, ChatBackend,
        Parsed, Provider,
    },
};
use super::model::*;

/// Client for OpenAI and the OpenAI-compatible backends (Groq, Mistral, DeepSeek)
pub struct OpenAIProvider {
    config: BackendClient,
    client: Client,
}

impl OpenAIProvider {
    pub fn new(config: BackendClient, client: Client) -> Self {
        Self { config, client }
    }

    /// Whether the backend accepts `stream_options.include_usage`.
    fn requests_usage(&self) -> bool {
        matches!(self.config.provider, Provider::OpenAI | Provider::DeepSeek)
    }

    fn build_request(&self, prompt: &str) -> OpenAIRequest {
        OpenAIRequest {
            model: self.config.model.clone(),
            messages: vec![OpenAIMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: self.config.temperature,
            stream: true,
            stream_options: self
                .requests_usage()
                .then_some(StreamOptions { include_usage: true }),
        }
    }
}

/// Parse one `data:` payload of an OpenAI-compatible stream.
pub fn parse_chunk(data: &str) -> Result<Parsed, AppError> {
    if data.trim() == "[DONE]" {
        return Ok(Parsed::Done);
    }

    let json: Value = serde_json::from_str(data)
        .map_err(|e| AppError::provider_error(502, format!("Invalid stream chunk: {}", e)))?;

    if let Some(error) = json.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| error.as_str())
            .unwrap_or("An error occurred during streaming");
        return Err(AppError::provider_error(502, message));
    }

    let chunk: OpenAIStreamChunk = serde_json::from_value(json)
        .map_err(|e| AppError::provider_error(502, format!("Unexpected stream chunk: {}", e)))?;

    let mut events: Vec<BackendEvent> = chunk
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.content)
        .filter(|text| !text.is_empty())
        .map(BackendEvent::Fragment)
        .collect();

    if let Some(usage) = chunk.usage.or_else(|| chunk.x_groq.and_then(|x| x.usage)) {
        events.push(BackendEvent::Usage(usage.into()));
    }

    Ok(Parsed::Events(events))
}

#[async_trait]
impl ChatBackend for OpenAIProvider {
    async fn stream(&self, prompt: &str) -> Result<BackendStream, AppError> {
        let url = format!("{}/chat/completions", self.config.api_base);

        let request = self
            .client
            .post(&url)
            .bearer_auth(self.config.credential.expose_secret())
            .header("Content-Type", "application/json")
            .json(&self.build_request(prompt));

        let response = send_streaming(request, self.config.provider, self.config.timeout).await?;
        tracing::debug!(
            provider = %self.config.provider,
            model = %self.config.model,
            "Stream opened"
        );

        Ok(sse_events(response, self.config.provider, parse_chunk))
    }

    fn provider(&self) -> Provider {
        self.config.provider
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}
