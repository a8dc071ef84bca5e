use async_trait::async_trait;
use reqwest::{Client, Url};
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

/// Google Gemini provider implementation
pub struct GeminiProvider {
    config: BackendClient,
    client: Client,
}

impl GeminiProvider {
    /// 创建新的Gemini提供商实例
    ///
    /// ## 参数说明
    /// - `config`: 已解析的后端配置，包含模型、温度、API地址和密钥
    /// - `client`: 共享的HTTP客户端，用于发送API请求
    pub fn new(config: BackendClient, client: Client) -> Self {
        Self { config, client }
    }

    fn build_request(&self, prompt: &str) -> GeminiRequest {
        GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
            },
        }
    }

    /// `{api_base}/models/{model}:streamGenerateContent?alt=sse`, with the
    /// model escaped as a single path segment.
    pub fn stream_url(&self) -> Result<Url, AppError> {
        let mut url = Url::parse(&self.config.api_base)
            .map_err(|e| AppError::ConfigError(format!("Invalid Gemini API base: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| {
                AppError::ConfigError("Gemini API base must be a hierarchical URL".to_string())
            })?
            .pop_if_empty()
            .push("models")
            .push(&format!("{}:streamGenerateContent", self.config.model));
        url.query_pairs_mut().append_pair("alt", "sse");
        Ok(url)
    }
}

/// Parse one `data:` payload of a Gemini SSE stream.
///
/// Gemini has no terminal marker; the stream ends with the HTTP body.
pub fn parse_chunk(data: &str) -> Result<Parsed, AppError> {
    let json: Value = serde_json::from_str(data)
        .map_err(|e| AppError::provider_error(502, format!("Invalid Gemini stream chunk: {}", e)))?;

    if let Some(error) = json.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("An error occurred during streaming");
        return Err(AppError::provider_error(502, format!("Gemini API error: {}", message)));
    }

    let chunk: GeminiStreamResponse = serde_json::from_value(json).map_err(|e| {
        AppError::provider_error(502, format!("Unexpected Gemini stream chunk: {}", e))
    })?;

    let text: String = chunk
        .candidates
        .first()
        .map(|candidate| {
            candidate
                .content
                .parts
                .iter()
                .map(|part| part.text.as_str())
                .collect()
        })
        .unwrap_or_default();

    let mut events = Vec::new();
    if !text.is_empty() {
        events.push(BackendEvent::Fragment(text));
    }
    if let Some(usage) = chunk.usage_metadata {
        events.push(BackendEvent::Usage(usage.into()));
    }

    Ok(Parsed::Events(events))
}

#[async_trait]
impl ChatBackend for GeminiProvider {
    async fn stream(&self, prompt: &str) -> Result<BackendStream, AppError> {
        // API key goes in a header so it never appears in logged URLs
        let url = self.stream_url()?;

        let request = self
            .client
            .post(url)
            .header("x-goog-api-key", self.config.credential.expose_secret())
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
