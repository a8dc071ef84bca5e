use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use reqwest::Client;
use secrecy::SecretString;
use serde::Serialize;

use crate::{config::Config, errors::AppError};
use super::{
    anthropic::AnthropicProvider, gemini::GeminiProvider, openai::OpenAIProvider, ChatBackend,
};

/// The closed set of supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Google,
    Groq,
    Mistral,
    Claude,
    DeepSeek,
}

/// Wire format spoken by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireProtocol {
    OpenAICompatible,
    Anthropic,
    Gemini,
}

impl WireProtocol {
    /// Whether the stream carries an explicit end-of-generation marker
    /// (`[DONE]`, `message_stop`); Gemini streams simply close.
    pub fn has_end_marker(&self) -> bool {
        matches!(self, WireProtocol::OpenAICompatible | WireProtocol::Anthropic)
    }
}

impl Provider {
    pub const ALL: [Provider; 6] = [
        Provider::OpenAI,
        Provider::Google,
        Provider::Groq,
        Provider::Mistral,
        Provider::Claude,
        Provider::DeepSeek,
    ];

    /// Canonical identifier, also used as the pricing-table prefix.
    pub fn id(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Google => "google",
            Provider::Groq => "groq",
            Provider::Mistral => "mistral",
            Provider::Claude => "claude",
            Provider::DeepSeek => "deepseek",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAI => "gpt-4o-mini",
            Provider::Google => "gemini-1.5-pro",
            Provider::Groq => "llama-3.3-70b-versatile",
            Provider::Mistral => "mistral-large-latest",
            Provider::Claude => "claude-3-7-sonnet-20250219",
            Provider::DeepSeek => "deepseek-chat",
        }
    }

    pub fn default_temperature(&self) -> f32 {
        match self {
            Provider::Groq | Provider::Mistral => 0.0,
            Provider::OpenAI | Provider::Google | Provider::Claude | Provider::DeepSeek => 0.8,
        }
    }

    pub fn default_api_base(&self) -> &'static str {
        match self {
            Provider::OpenAI => "https://api.openai.com/v1",
            Provider::Google => "https://generativelanguage.googleapis.com/v1beta",
            Provider::Groq => "https://api.groq.com/openai/v1",
            Provider::Mistral => "https://api.mistral.ai/v1",
            Provider::Claude => "https://api.anthropic.com/v1",
            Provider::DeepSeek => "https://api.deepseek.com/v1",
        }
    }

    pub fn wire(&self) -> WireProtocol {
        match self {
            Provider::Google => WireProtocol::Gemini,
            Provider::Claude => WireProtocol::Anthropic,
            Provider::OpenAI | Provider::Groq | Provider::Mistral | Provider::DeepSeek => {
                WireProtocol::OpenAICompatible
            }
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Provider {
    type Err = AppError;

    /// Accepts the canonical ids plus the aliases `grok` and `anthropic`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAI),
            "google" | "gemini" => Ok(Provider::Google),
            "groq" | "grok" => Ok(Provider::Groq),
            "mistral" => Ok(Provider::Mistral),
            "claude" | "anthropic" => Ok(Provider::Claude),
            "deepseek" => Ok(Provider::DeepSeek),
            _ => Err(AppError::unsupported_provider(s)),
        }
    }
}

/// What a request asks for: which backend, which model, with which key.
#[derive(Debug)]
pub struct ProviderSelection {
    pub provider: String,
    pub model: Option<String>,
    pub credential: SecretString,
    pub temperature: Option<f32>,
}

/// Fully resolved backend configuration. Holds no connection.
///
/// `Debug` prints the credential as redacted.
#[derive(Debug)]
pub struct BackendClient {
    pub provider: Provider,
    pub model: String,
    pub temperature: f32,
    pub api_base: String,
    pub timeout: Duration,
    pub credential: SecretString,
}

/// 将请求的提供商选择解析为具体的后端配置
///
/// ## 功能说明
/// 根据提供商ID选择默认模型、默认温度和API地址；请求中的模型覆盖优先，
/// 其次是配置文件中的覆盖项，最后是内置默认值。
/// 未单独配置超时的提供商使用 `server.request_timeout_seconds` 等待响应头。
///
/// ## 返回值
/// - `Ok(BackendClient)`: 解析后的后端配置（此时不进行任何网络请求）
/// - `Err(AppError::UnsupportedProvider)`: 未知的提供商ID
pub fn dispatch(selection: ProviderSelection, config: &Config) -> Result<BackendClient, AppError> {
    let provider: Provider = selection.provider.parse()?;
    let overrides = config.provider_detail(provider);

    let model = selection
        .model
        .filter(|m| !m.trim().is_empty())
        .or_else(|| overrides.and_then(|o| o.default_model.clone()))
        .unwrap_or_else(|| provider.default_model().to_string());

    let temperature = selection
        .temperature
        .or_else(|| overrides.and_then(|o| o.temperature))
        .unwrap_or_else(|| provider.default_temperature());

    let api_base = overrides
        .and_then(|o| o.api_base.clone())
        .unwrap_or_else(|| provider.default_api_base().to_string())
        .trim_end_matches('/')
        .to_string();

    let timeout = Duration::from_secs(
        overrides
            .and_then(|o| o.timeout_seconds)
            .unwrap_or(config.server.request_timeout_seconds),
    );

    tracing::info!(
        provider = %provider,
        model = %model,
        temperature,
        "Dispatched backend"
    );

    Ok(BackendClient {
        provider,
        model,
        temperature,
        api_base,
        timeout,
        credential: selection.credential,
    })
}

impl BackendClient {
    /// Bind this configuration to a shared HTTP client.
    pub fn into_backend(self, http: Client) -> Arc<dyn ChatBackend> {
        match self.provider.wire() {
            WireProtocol::OpenAICompatible => Arc::new(OpenAIProvider::new(self, http)),
            WireProtocol::Anthropic => Arc::new(AnthropicProvider::new(self, http)),
            WireProtocol::Gemini => Arc::new(GeminiProvider::new(self, http)),
        }
    }
}
