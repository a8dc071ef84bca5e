//! Fragment relay and end-of-generation signalling.
//!
//! A generation is split into two channels: a bounded channel of text
//! fragments that the caller drains as they arrive, and a single-shot
//! [`UsageReady`] signal that always resolves once the relay ends, whether
//! the backend finished, failed or the caller went away.

use std::sync::Arc;

use futures::{
    future::{BoxFuture, FutureExt, Shared},
    StreamExt,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use crate::{
    errors::AppError,
    providers::{BackendEvent, BackendStream, ChatBackend, Provider},
    usage::UsageMetrics,
};

/// Backend failure after the stream was opened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct GenerationError {
    pub message: String,
}

impl From<AppError> for GenerationError {
    fn from(err: AppError) -> Self {
        Self {
            message: err.public_message(),
        }
    }
}

/// Forward-only fragment sequence. A trailing `Err` is the error marker.
pub type FragmentStream = ReceiverStream<Result<String, GenerationError>>;

/// How the relay ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed(String),
    /// The fragment receiver was dropped before the backend finished.
    Cancelled,
}

/// Payload of the end-of-generation signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Present only when the backend finished and reported usage.
    pub usage: Option<UsageMetrics>,
    pub outcome: Outcome,
    /// Everything relayed, concatenated in order.
    pub text: String,
    pub fragments: usize,
}

impl Completion {
    fn abandoned() -> Self {
        Self {
            usage: None,
            outcome: Outcome::Cancelled,
            text: String::new(),
            fragments: 0,
        }
    }
}

/// Clonable signal that resolves exactly once per generation.
pub type UsageReady = Shared<BoxFuture<'static, Completion>>;

/// A running generation.
pub struct Generation {
    pub provider: Provider,
    pub model: String,
    pub fragments: FragmentStream,
    pub completion: UsageReady,
}

/// 执行一次流式生成
///
/// ## 功能说明
/// 打开后端流后立即返回：片段通过有界通道逐个转发（不做额外缓冲），
/// 结束信号 `UsageReady` 在成功、失败或调用方断开时都会触发。
///
/// ## 内部实现逻辑
/// 1. 调用后端 `stream()`（此处失败直接返回错误，调用方可映射为HTTP错误）
/// 2. 启动转发任务，按后端顺序发送片段
/// 3. 记录最后一次用量事件；仅在正常完成时作为最终用量
/// 4. 先关闭片段通道，再触发结束信号，保证信号不早于最后一个片段
pub async fn execute(
    backend: Arc<dyn ChatBackend>,
    prompt: &str,
    buffer: usize,
) -> Result<Generation, AppError> {
    let provider = backend.provider();
    let model = backend.model().to_string();

    let source = backend.stream(prompt).await?;

    let (fragment_tx, fragment_rx) = mpsc::channel(buffer.max(1));
    let (done_tx, done_rx) = oneshot::channel();

    let span = tracing::info_span!("relay", provider = %provider, model = %model);
    tokio::spawn(relay(source, fragment_tx, done_tx).instrument(span));

    // A relay task that dies without reporting still resolves the signal.
    let completion = async move { done_rx.await.unwrap_or_else(|_| Completion::abandoned()) }
        .boxed()
        .shared();

    Ok(Generation {
        provider,
        model,
        fragments: ReceiverStream::new(fragment_rx),
        completion,
    })
}

async fn relay(
    mut source: BackendStream,
    fragments: mpsc::Sender<Result<String, GenerationError>>,
    done: oneshot::Sender<Completion>,
) {
    let mut usage = None;
    let mut text = String::new();
    let mut count = 0usize;

    let outcome = loop {
        tokio::select! {
            biased;
            _ = fragments.closed() => break Outcome::Cancelled,
            next = source.next() => match next {
                Some(Ok(BackendEvent::Fragment(fragment))) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    text.push_str(&fragment);
                    if fragments.send(Ok(fragment)).await.is_err() {
                        break Outcome::Cancelled;
                    }
                    count += 1;
                }
                Some(Ok(BackendEvent::Usage(reported))) => usage = Some(reported),
                Some(Err(e)) => {
                    let error = GenerationError::from(e);
                    tracing::error!(error = %error, fragments = count, "Backend failed mid-stream");
                    let _ = fragments.send(Err(error.clone())).await;
                    break Outcome::Failed(error.message);
                }
                None => break Outcome::Completed,
            },
        }
    };

    match &outcome {
        Outcome::Completed => {
            tracing::info!(fragments = count, usage = ?usage, "Generation completed")
        }
        Outcome::Cancelled => {
            tracing::info!(fragments = count, "Caller disconnected, relay stopped")
        }
        Outcome::Failed(_) => {}
    }

    // Close the fragment sequence before releasing the signal.
    drop(fragments);
    drop(source);

    let usage = if outcome == Outcome::Completed { usage } else { None };
    let _ = done.send(Completion {
        usage,
        outcome,
        text,
        fragments: count,
    });
}
