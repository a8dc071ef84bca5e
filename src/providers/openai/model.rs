use serde::{Deserialize, Serialize};

use crate::usage::UsageMetrics;

// OpenAI-compatible data structures for streaming chat completions

#[derive(Serialize, Debug)]
pub struct OpenAIRequest {
    pub model: String,
    pub messages: Vec<OpenAIMessage>,
    pub temperature: f32,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct OpenAIMessage {
    pub role: String,
    pub content: String,
}

#[derive(Serialize, Debug)]
pub struct StreamOptions {
    pub include_usage: bool,
}

#[derive(Deserialize, Debug)]
pub struct OpenAIStreamChunk {
    #[serde(default)]
    pub choices: Vec<OpenAIStreamChoice>,
    pub usage: Option<OpenAIUsage>,
    /// Groq reports usage here instead of `usage`.
    pub x_groq: Option<GroqExtension>,
}

#[derive(Deserialize, Debug)]
pub struct OpenAIStreamChoice {
    #[serde(default)]
    pub delta: OpenAIStreamDelta,
    pub finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct OpenAIStreamDelta {
    pub content: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct GroqExtension {
    pub usage: Option<OpenAIUsage>,
}

#[derive(Deserialize, Debug, Clone, Copy)]
pub struct OpenAIUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl From<OpenAIUsage> for UsageMetrics {
    fn from(usage: OpenAIUsage) -> Self {
        UsageMetrics::with_total(usage.prompt_tokens, usage.completion_tokens, usage.total_tokens)
    }
}
