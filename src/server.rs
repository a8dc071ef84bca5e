use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    http::{header, HeaderValue, Method, Uri},
    middleware,
    response::{
        sse::{KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    chat::{self, ChatRequest},
    config::Config,
    errors::{AppError, AppResult},
    export,
    metrics::{MetricsCollector, MetricsSummary},
    middleware::logging_middleware,
    pricing::PricingTable,
    protocol::{self, StructuredResponse},
    providers::Provider,
    store::{InMemoryMessageStore, MessageStore},
    usage::UsageTotals,
};

/// 应用程序状态 - 在所有请求处理器之间共享
///
/// 包含请求处理器所需的所有共享资源：配置、HTTP客户端、
/// 只读价格表、消息存储和指标收集器
#[derive(Clone)]
pub struct AppState {
    /// 应用程序配置（只读共享）
    pub config: Arc<Config>,
    /// HTTP客户端，所有后端共享连接池
    pub http_client: Client,
    /// 价格表，启动时构建一次，之后只读
    pub pricing: Arc<PricingTable>,
    /// 聊天历史存储
    pub store: Arc<dyn MessageStore>,
    /// 生成指标
    pub metrics: MetricsCollector,
}

impl AppState {
    /// Create application state with the in-memory message store.
    pub fn new(config: Config, pricing: PricingTable) -> AppResult<Self> {
        Self::with_store(config, pricing, Arc::new(InMemoryMessageStore::new()))
    }

    pub fn with_store(
        config: Config,
        pricing: PricingTable,
        store: Arc<dyn MessageStore>,
    ) -> AppResult<Self> {
        // No overall timeout: streamed bodies may legitimately run for minutes.
        // Each backend bounds the wait for response headers instead.
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config: Arc::new(config),
            http_client,
            pricing: Arc::new(pricing),
            store,
            metrics: MetricsCollector::new(),
        })
    }
}

/// Create the main application router with all routes and middleware
pub fn create_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    let body_limit = DefaultBodyLimit::max(state.config.server.max_request_size_bytes);

    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/resolve", post(resolve_handler))
        .route("/api/export", post(export_handler))
        .route("/api/chats/{chat_id}/messages", get(list_messages_handler))
        .route("/api/chats/{chat_id}/usage", get(usage_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(fallback_handler)
        .with_state(state)
        .layer(body_limit)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(logging_middleware))
                .option_layer(cors),
        )
}

fn cors_layer(config: &Config) -> Option<CorsLayer> {
    if !config.security.cors_enabled {
        return None;
    }

    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let origins: Vec<HeaderValue> = config
        .security
        .allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    Some(if origins.is_empty() || config.security.allowed_origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(origins)
    })
}

/// Start the HTTP server
pub async fn start_server(config: Config, pricing: PricingTable) -> AppResult<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app_state = AppState::new(config, pricing)?;
    let app = create_app(app_state);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;

    tracing::info!("Insight chat server starting on {}", addr);
    tracing::info!("Available endpoints:");
    tracing::info!("  POST /api/chat - Streamed chat turn (SSE)");
    tracing::info!("  POST /api/resolve - Classify a completed reply");
    tracing::info!("  POST /api/export - Export an analytic card as PDF");
    tracing::info!("  GET  /api/chats/{{chat_id}}/messages - Chat history");
    tracing::info!("  GET  /api/chats/{{chat_id}}/usage - Token usage totals");
    tracing::info!("  GET  /health - Service health");
    tracing::info!("  GET  /metrics - Generation metrics");

    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::InternalServerError(format!("Server error: {}", e)))?;

    Ok(())
}

// Request Handlers

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::bad_request(rejection.body_text()))
}

/// Handle a chat turn: stream fragments as SSE, usage as a trailing event
async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let request = json_body(payload)?;
    tracing::info!(
        messages = request.messages.len(),
        chat_id = request.chat_id.as_deref().unwrap_or("-"),
        "Processing chat request"
    );

    let session = chat::start_chat(&state, request).await?;
    let provider = session.provider.id();
    let model = HeaderValue::from_str(&session.model)
        .unwrap_or_else(|_| HeaderValue::from_static("unknown"));

    let sse = Sse::new(chat::sse_events(session)).keep_alive(KeepAlive::default());
    Ok((
        [
            ("x-ai-provider", HeaderValue::from_static(provider)),
            ("x-ai-model", model),
        ],
        sse,
    ))
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    text: String,
}

/// Classify a completed reply into one of the response shapes
async fn resolve_handler(
    payload: Result<Json<ResolveRequest>, JsonRejection>,
) -> AppResult<Json<StructuredResponse>> {
    let request = json_body(payload)?;
    let response = protocol::resolve(&request.text);
    tracing::debug!(kind = response.kind(), "Resolved response");
    Ok(Json(response))
}

/// Export an analytic card as a PDF download
async fn export_handler(payload: Result<Json<Value>, JsonRejection>) -> AppResult<Response> {
    let value = json_body(payload)?;
    let card = protocol::parse_file_api_card(&value).ok_or_else(|| {
        AppError::ValidationError("Body is not an exportable analytic card".to_string())
    })?;

    let file = export::export_pdf(&card);
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file.file_name))
        .map_err(|e| AppError::internal(format!("Invalid file name header: {}", e)))?;

    Response::builder()
        .header(header::CONTENT_TYPE, file.content_type)
        .header(header::CONTENT_DISPOSITION, disposition)
        .header(header::CONTENT_LENGTH, file.bytes.len())
        .body(Body::from(file.bytes))
        .map_err(|e| AppError::internal(format!("Failed to build export response: {}", e)))
}

/// List the stored messages of a chat
async fn list_messages_handler(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> AppResult<Json<Value>> {
    let messages = state.store.list_messages(&chat_id).await?;
    Ok(Json(json!({
        "chatId": chat_id,
        "messages": messages,
    })))
}

/// Token totals over a chat's assistant messages
async fn usage_handler(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> AppResult<Json<Value>> {
    let messages = state.store.list_messages(&chat_id).await?;
    let totals = UsageTotals::from_messages(&messages);
    Ok(Json(json!({
        "chatId": chat_id,
        "usage": totals,
    })))
}

/// Unknown routes get the same JSON error body as every other failure
async fn fallback_handler(method: Method, uri: Uri) -> AppError {
    AppError::not_found(format!("No route for {} {}", method, uri.path()))
}

/// Handle system health check
async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let providers: Vec<&str> = Provider::ALL.iter().map(Provider::id).collect();
    Json(json!({
        "status": "healthy",
        "service": "insight-chat",
        "version": env!("CARGO_PKG_VERSION"),
        "providers": providers,
        "pricing_entries": state.pricing.len(),
        "active_generations": state.metrics.active_generations(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Generation metrics per provider
async fn metrics_handler(State(state): State<AppState>) -> Json<MetricsSummary> {
    Json(state.metrics.get_metrics_summary().await)
}
