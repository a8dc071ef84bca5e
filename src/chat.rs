//! Chat turns: from an HTTP request to a streamed reply with trailing usage.

use std::{borrow::Cow, sync::Arc, time::Instant};

use axum::response::sse::Event;
use futures::{
    future::{BoxFuture, FutureExt, Shared},
    stream::{self, Stream, StreamExt},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::Instrument;

use crate::{
    errors::{AppError, AppResult},
    metrics::MetricsCollector,
    pricing::PricingTable,
    protocol::{
        self,
        prompt::{split_current, DEFAULT_LANGUAGE},
        ChatTurn,
    },
    providers::{dispatch, Provider, ProviderSelection},
    server::AppState,
    store::{MessageStore, StoredMessage},
    streaming::{self, Completion, FragmentStream, Outcome},
    usage::UsageMetrics,
};

/// Body of `POST /api/chat`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatTurn>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub ai_model: Option<AiModel>,
    /// When present, the turn is appended to this chat's history.
    #[serde(default)]
    pub chat_id: Option<String>,
}

/// Backend selection as sent by the client. `Debug` redacts the key.
#[derive(Debug, Deserialize)]
pub struct AiModel {
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub key: Option<SecretString>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// End-of-generation payload with the cost already estimated.
#[derive(Debug, Clone)]
pub struct Settled {
    pub completion: Completion,
    /// Present exactly when usage was reported.
    pub cost: Option<f64>,
}

pub type SettledSignal = Shared<BoxFuture<'static, Settled>>;

/// A started chat turn.
pub struct ChatSession {
    pub provider: Provider,
    pub model: String,
    pub fragments: FragmentStream,
    pub settled: SettledSignal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UsageFrame {
    #[serde(flatten)]
    usage: UsageMetrics,
    cost: f64,
}

impl ChatRequest {
    /// Turn the request's backend choice into a selection for the dispatcher.
    pub fn selection(&mut self) -> AppResult<ProviderSelection> {
        let ai_model = self.ai_model.take().ok_or(AppError::ModelNotProvided)?;
        let credential = ai_model
            .key
            .ok_or_else(|| AppError::ValidationError("AI model key not provided".to_string()))?;

        Ok(ProviderSelection {
            provider: ai_model.provider,
            model: ai_model.model,
            credential,
            temperature: ai_model.temperature,
        })
    }
}

/// 开始一轮对话
///
/// ## 功能说明
/// 解析后端选择并分派，组装提示词，打开后端流后立即返回会话。
/// 片段由调用方实时转发；结束信号由独立的元数据任务等待（估算费用、
/// 记录指标、写入历史），不会阻塞响应的开始。
///
/// ## 错误处理
/// - 缺少 `aiModel`：`ModelNotProvided`（400）
/// - 未知提供商：`UnsupportedProvider`（400）
/// - 后端在首字节前失败：对应的 `ProviderError`
pub async fn start_chat(state: &AppState, mut request: ChatRequest) -> AppResult<ChatSession> {
    let selection = request.selection()?;
    let backend = dispatch(selection, &state.config)?;

    if request.messages.is_empty() {
        return Err(AppError::ValidationError("messages cannot be empty".to_string()));
    }

    let (history, current_input) = split_current(&request.messages);
    let language = request.language.as_deref().unwrap_or(DEFAULT_LANGUAGE);
    let prompt = protocol::assemble(history, current_input, language);
    let user_input = current_input.to_string();

    let provider = backend.provider;
    let model = backend.model.clone();
    let backend = backend.into_backend(state.http_client.clone());

    let started = state.metrics.record_generation_start(provider.id()).await;
    let buffer = state.config.streaming.fragment_buffer;
    let generation = match streaming::execute(backend, &prompt, buffer).await {
        Ok(generation) => generation,
        Err(e) => {
            let outcome = Outcome::Failed(e.public_message());
            state
                .metrics
                .record_generation_end(started, provider.id(), &outcome, None, 0.0)
                .await;
            return Err(e);
        }
    };

    let settled = settle(generation.completion, state.pricing.clone(), provider, model.clone());

    let chat_id = request.chat_id.filter(|id| !id.trim().is_empty());
    if let Some(chat_id) = &chat_id {
        if let Err(e) = state.store.append_message(chat_id, StoredMessage::user(user_input)).await {
            tracing::warn!(chat_id = %chat_id, error = %e, "Failed to persist user message");
        }
    }

    let span = tracing::info_span!(
        "attach_metadata",
        provider = %provider,
        model = %model,
        chat_id = chat_id.as_deref().unwrap_or("-"),
    );
    tokio::spawn(
        attach_metadata(
            settled.clone(),
            AttachContext {
                provider,
                model: model.clone(),
                chat_id,
                started,
                metrics: state.metrics.clone(),
                store: state.store.clone(),
            },
        )
        .instrument(span),
    );

    Ok(ChatSession {
        provider,
        model,
        fragments: generation.fragments,
        settled,
    })
}

/// Estimate cost once, for every consumer of the completion.
fn settle(
    completion: streaming::UsageReady,
    pricing: Arc<PricingTable>,
    provider: Provider,
    model: String,
) -> SettledSignal {
    completion
        .map(move |completion| {
            let cost = completion
                .usage
                .map(|usage| pricing.estimate(provider.id(), &model, &usage));
            Settled { completion, cost }
        })
        .boxed()
        .shared()
}

struct AttachContext {
    provider: Provider,
    model: String,
    chat_id: Option<String>,
    started: Instant,
    metrics: MetricsCollector,
    store: Arc<dyn MessageStore>,
}

/// Waits for the end of generation, whatever its outcome.
async fn attach_metadata(settled: SettledSignal, ctx: AttachContext) {
    let Settled { completion, cost } = settled.await;

    ctx.metrics
        .record_generation_end(
            ctx.started,
            ctx.provider.id(),
            &completion.outcome,
            completion.usage.as_ref(),
            cost.unwrap_or(0.0),
        )
        .await;

    if completion.outcome != Outcome::Completed {
        tracing::info!(
            outcome = ?completion.outcome,
            fragments = completion.fragments,
            "Generation did not complete"
        );
        return;
    }

    let kind = protocol::resolve(&completion.text).kind();
    tracing::info!(kind, usage = ?completion.usage, cost = ?cost, "Turn settled");

    if let Some(chat_id) = ctx.chat_id {
        let message = StoredMessage::assistant(completion.text)
            .with_usage(completion.usage, cost)
            .with_model(ctx.provider.id(), ctx.model);
        if let Err(e) = ctx.store.append_message(&chat_id, message).await {
            tracing::warn!(error = %e, "Failed to persist assistant message");
        }
    }
}

/// SSE events for a session: one unnamed event per fragment, then an
/// `error` event if the backend failed, a `usage` event when usage was
/// reported, and finally `done`.
pub fn sse_events(
    session: ChatSession,
) -> impl Stream<Item = Result<Event, axum::Error>> + Send + 'static {
    let fragments = session.fragments.map(|item| match item {
        Ok(fragment) => Ok(Event::default().data(normalize_newlines(&fragment))),
        Err(error) => Event::default()
            .event("error")
            .json_data(json!({ "error": error.message })),
    });

    let trailer = stream::once(session.settled)
        .flat_map(|settled| stream::iter(trailer_events(&settled)));

    fragments.chain(trailer)
}

fn trailer_events(settled: &Settled) -> Vec<Result<Event, axum::Error>> {
    let mut events = Vec::with_capacity(2);
    if let (Some(usage), Some(cost)) = (settled.completion.usage, settled.cost) {
        events.push(Event::default().event("usage").json_data(UsageFrame { usage, cost }));
    }
    events.push(Ok(Event::default().event("done").data("[DONE]")));
    events
}

/// SSE data lines cannot carry carriage returns.
fn normalize_newlines(fragment: &str) -> Cow<'_, str> {
    if fragment.contains('\r') {
        Cow::Owned(fragment.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_requires_ai_model() {
        let mut request: ChatRequest =
            serde_json::from_str(r#"{"messages":[{"role":"user","content":"hi"}]}"#).unwrap();
        assert!(matches!(request.selection(), Err(AppError::ModelNotProvided)));
    }

    #[test]
    fn test_selection_requires_key() {
        let mut request: ChatRequest =
            serde_json::from_str(r#"{"messages":[],"aiModel":{"provider":"openai"}}"#).unwrap();
        assert!(matches!(request.selection(), Err(AppError::ValidationError(_))));
    }

    #[test]
    fn test_ai_model_debug_redacts_key() {
        let request: ChatRequest = serde_json::from_str(
            r#"{"messages":[],"aiModel":{"provider":"openai","key":"sk-very-secret"}}"#,
        )
        .unwrap();
        assert!(!format!("{:?}", request).contains("sk-very-secret"));
    }

    #[test]
    fn test_normalize_newlines() {
        assert_eq!(normalize_newlines("a\r\nb\rc"), "a\nb\nc");
        assert!(matches!(normalize_newlines("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_trailer_without_usage_is_only_done() {
        let settled = Settled {
            completion: Completion {
                usage: None,
                outcome: Outcome::Failed("boom".into()),
                text: String::new(),
                fragments: 0,
            },
            cost: None,
        };
        assert_eq!(trailer_events(&settled).len(), 1);
    }
}
