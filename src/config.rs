use serde::{Deserialize, Serialize};
use figment::{Figment, providers::{Format, Toml, Env}};
use std::{collections::HashMap, path::Path};
use anyhow::{Context, Result};

use crate::providers::Provider;

/// Environment variable prefix; nested keys use `__` (e.g. `INSIGHT_CHAT_SERVER__PORT`).
pub const ENV_PREFIX: &str = "INSIGHT_CHAT_";

/// 主配置结构体
///
/// 包含服务的所有配置信息，从配置文件和环境变量加载。
/// 所有部分都有默认值，因此没有配置文件时服务也能启动。
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Config {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,
    /// 后端覆盖配置（提供商ID -> 覆盖项）
    #[serde(default)]
    pub providers: HashMap<String, ProviderDetail>,
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 安全配置
    #[serde(default)]
    pub security: SecurityConfig,
    /// 价格表配置
    #[serde(default)]
    pub pricing: PricingConfig,
    /// 流式转发配置
    #[serde(default)]
    pub streaming: StreamingConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_max_request_size")]
    pub max_request_size_bytes: usize,
}

/// Per-provider overrides. Anything left unset falls back to the
/// provider's built-in defaults.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct ProviderDetail {
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SecurityConfig {
    #[serde(default = "default_cors_enabled")]
    pub cors_enabled: bool,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct PricingConfig {
    /// JSON file whose entries are merged over the built-in table.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StreamingConfig {
    #[serde(default = "default_fragment_buffer")]
    pub fragment_buffer: usize,
}

// Default value functions
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 3000 }
fn default_request_timeout() -> u64 { 120 }
fn default_max_request_size() -> usize { 1024 * 1024 } // 1MB
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "json".to_string() }
fn default_cors_enabled() -> bool { true }
fn default_fragment_buffer() -> usize { 64 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
            max_request_size_bytes: default_max_request_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            cors_enabled: default_cors_enabled(),
            allowed_origins: Vec::new(),
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            fragment_buffer: default_fragment_buffer(),
        }
    }
}

/// 加载配置文件和环境变量
///
/// ## 功能说明
/// 从 `config.toml`（或指定路径）和以 `INSIGHT_CHAT_` 为前缀的环境变量加载配置，
/// 环境变量会覆盖配置文件中的相同设置
///
/// ## 内部实现逻辑
/// 1. 使用Figment库创建配置加载器
/// 2. 加载配置文件（文件不存在时只使用默认值）
/// 3. 加载环境变量，`__` 分隔嵌套键
/// 4. 反序列化并调用 `validate()` 验证
///
/// ## 执行例子
/// ```rust,no_run
/// let config = insight_chat::load_config(None)?;
/// println!("Server will run on {}:{}", config.server.host, config.server.port);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let file = path.unwrap_or_else(|| Path::new("config.toml"));

    let config: Config = Figment::new()
        .merge(Toml::file(file))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .with_context(|| {
            format!(
                "Failed to load configuration from {} or environment variables",
                file.display()
            )
        })?;

    config.validate()
        .context("Configuration validation failed")?;

    Ok(config)
}

impl Config {
    /// 验证整个配置的有效性
    pub fn validate(&self) -> Result<()> {
        self.server.validate()
            .context("Server configuration validation failed")?;

        for (name, provider) in &self.providers {
            provider.validate(name)
                .with_context(|| format!("Provider '{}' configuration validation failed", name))?;
        }

        self.logging.validate()
            .context("Logging configuration validation failed")?;

        self.security.validate()
            .context("Security configuration validation failed")?;

        self.streaming.validate()
            .context("Streaming configuration validation failed")?;

        Ok(())
    }

    /// Overrides for a provider, looked up by its canonical id.
    pub fn provider_detail(&self, provider: Provider) -> Option<&ProviderDetail> {
        self.providers.iter().find_map(|(name, detail)| {
            match name.parse::<Provider>() {
                Ok(p) if p == provider => Some(detail),
                _ => None,
            }
        })
    }
}

impl ServerConfig {
    /// 验证服务器配置参数
    ///
    /// ## 参数验证规则
    /// - `host`: 不能为空字符串
    /// - `port`: 必须大于0
    /// - `request_timeout_seconds`: 1-600秒之间
    /// - `max_request_size_bytes`: 1字节-100MB之间
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(anyhow::anyhow!("Server host cannot be empty"));
        }

        if self.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("Request timeout must be greater than 0"));
        }

        // 流式生成可能持续较长时间
        if self.request_timeout_seconds > 600 {
            return Err(anyhow::anyhow!("Request timeout cannot exceed 600 seconds"));
        }

        if self.max_request_size_bytes == 0 {
            return Err(anyhow::anyhow!("Max request size must be greater than 0"));
        }

        if self.max_request_size_bytes > 100 * 1024 * 1024 {
            return Err(anyhow::anyhow!("Max request size cannot exceed 100MB"));
        }

        Ok(())
    }
}

impl ProviderDetail {
    /// 验证单个提供商的覆盖配置
    ///
    /// ## 参数验证规则
    /// - 配置键必须是已知的提供商ID
    /// - `api_base`: 如果提供，必须以http://或https://开头
    /// - `default_model`: 如果提供，不能为空
    /// - `temperature`: 0.0-2.0之间
    /// - `timeout_seconds`: 1-600秒之间
    pub fn validate(&self, name: &str) -> Result<()> {
        name.parse::<Provider>()
            .map_err(|_| anyhow::anyhow!("Unknown provider '{}'", name))?;

        if let Some(api_base) = &self.api_base {
            if !api_base.starts_with("http://") && !api_base.starts_with("https://") {
                return Err(anyhow::anyhow!(
                    "Provider API base URL must start with http:// or https://"
                ));
            }
        }

        if let Some(model) = &self.default_model {
            if model.trim().is_empty() {
                return Err(anyhow::anyhow!("Provider default model cannot be empty"));
            }
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(anyhow::anyhow!("Provider temperature must be between 0.0 and 2.0"));
            }
        }

        if let Some(timeout) = self.timeout_seconds {
            if timeout == 0 || timeout > 600 {
                return Err(anyhow::anyhow!("Provider timeout must be between 1 and 600 seconds"));
            }
        }

        Ok(())
    }
}

impl LoggingConfig {
    /// 验证日志配置参数
    ///
    /// - `level`: 必须是 "trace", "debug", "info", "warn", "error" 之一
    /// - `format`: 必须是 "json", "pretty", "compact" 之一
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level '{}': must be one of {:?}",
                self.level, valid_levels
            ));
        }

        let valid_formats = ["json", "pretty", "compact"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format '{}': must be one of {:?}",
                self.format, valid_formats
            ));
        }

        Ok(())
    }
}

impl SecurityConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cors_enabled && !self.allowed_origins.is_empty() {
            for origin in &self.allowed_origins {
                if origin.is_empty() {
                    return Err(anyhow::anyhow!("Allowed origin cannot be empty"));
                }

                if origin != "*"
                    && !origin.starts_with("http://")
                    && !origin.starts_with("https://")
                {
                    return Err(anyhow::anyhow!(
                        "Allowed origin '{}' must be '*' or start with http:// or https://",
                        origin
                    ));
                }
            }
        }

        Ok(())
    }
}

impl StreamingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.fragment_buffer == 0 {
            return Err(anyhow::anyhow!("Fragment buffer must be greater than 0"));
        }

        if self.fragment_buffer > 4096 {
            return Err(anyhow::anyhow!("Fragment buffer cannot exceed 4096"));
        }

        Ok(())
    }
}
