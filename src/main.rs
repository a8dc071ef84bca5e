use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use insight_chat::{config::LoggingConfig, load_config, start_server, AppError, PricingTable};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Streaming chat service with structured responses and PDF export
#[derive(Debug, Parser)]
#[command(name = "insight-chat", version, about)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override `server.host`
    #[arg(long)]
    host: Option<String>,

    /// Override `server.port`
    #[arg(long)]
    port: Option<u16>,
}

/// 主函数 - 服务入口点
///
/// 负责加载配置、初始化日志系统、构建价格表并启动HTTP服务器
#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();

    // 加载配置文件和环境变量配置
    let mut config = load_config(Some(&cli.config))?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    init_tracing(&config.logging)?;

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        provider_overrides = config.providers.len(),
        "Configuration loaded successfully"
    );

    // 价格表在启动时构建一次，之后只读共享
    let pricing = PricingTable::load(config.pricing.path.as_deref().map(std::path::Path::new))
        .context("Failed to load pricing table")?;
    tracing::info!(entries = pricing.len(), "Pricing table ready");

    start_server(config, pricing).await?;

    Ok(())
}

/// 初始化结构化日志系统
///
/// `RUST_LOG` 优先；否则使用配置中的级别。输出格式由 `logging.format` 决定
/// （`json` | `pretty` | `compact`）。
fn init_tracing(logging: &LoggingConfig) -> Result<(), AppError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("insight_chat={},tower_http=debug", logging.level))
    });

    let fmt_layer = match logging.format.as_str() {
        "pretty" => fmt::layer().pretty().boxed(),
        "compact" => fmt::layer().compact().with_target(false).boxed(),
        _ => fmt::layer()
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_current_span(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()
        .map_err(|e| AppError::ConfigError(format!("Failed to initialize tracing: {}", e)))?;

    tracing::info!("Structured logging system initialized");
    Ok(())
}
