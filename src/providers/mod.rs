pub mod anthropic;
pub mod dispatch;
pub mod gemini;
pub mod openai;

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::{self, BoxStream, StreamExt};

use crate::{errors::AppError, usage::UsageMetrics};

pub use dispatch::{dispatch, BackendClient, Provider, ProviderSelection, WireProtocol};

/// One item produced by a backend while generating.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// Incremental piece of generated text.
    Fragment(String),
    /// Usage so far; the last one seen before the stream ends is final.
    Usage(UsageMetrics),
}

/// Streaming response type alias for backend implementations
pub type BackendStream = BoxStream<'static, Result<BackendEvent, AppError>>;

/// Core backend trait that all language-model clients implement
///
/// Implementations do no network I/O until [`ChatBackend::stream`] is called.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Start a generation for `prompt` and return its event stream.
    ///
    /// Fails when the backend cannot be reached or rejects the request;
    /// failures after the first byte arrive as `Err` items in the stream.
    async fn stream(&self, prompt: &str) -> Result<BackendStream, AppError>;

    fn provider(&self) -> Provider;

    fn model(&self) -> &str;
}

/// Send a prepared request and fail fast on a non-success status.
///
/// Only the wait for response headers is bounded by `timeout`; the body
/// streams for as long as the backend keeps producing.
pub(crate) async fn send_streaming(
    request: reqwest::RequestBuilder,
    provider: Provider,
    timeout: Duration,
) -> Result<reqwest::Response, AppError> {
    let response = tokio::time::timeout(timeout, request.send())
        .await
        .map_err(|_| {
            AppError::provider_error(
                504,
                format!("{} did not respond within {}s", provider, timeout.as_secs()),
            )
        })?
        .map_err(|e| {
            AppError::provider_error(
                502,
                format!("Failed to send request to {}: {}", provider, e),
            )
        })?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let error_body = response.text().await.unwrap_or_default();
        return Err(AppError::provider_error(
            status,
            format!("{} API error: {}", provider, error_body),
        ));
    }

    Ok(response)
}

/// What a wire parser made of one SSE `data` payload.
#[derive(Debug)]
pub enum Parsed {
    Events(Vec<BackendEvent>),
    /// The backend signalled the end of the generation.
    Done,
}

struct SseState<P> {
    source: BoxStream<'static, Result<eventsource_stream::Event, String>>,
    parse: P,
    pending: VecDeque<BackendEvent>,
    finished: bool,
    /// Set once the wire's end-of-generation marker has been parsed.
    completed: bool,
    provider: Provider,
}

/// Adapt an SSE response body into a [`BackendStream`] using a per-wire parser.
///
/// After the first `Err` item the stream ends. On wires with an explicit end
/// marker, a body that closes before the marker yields a final `Err`.
pub(crate) fn sse_events<P>(
    response: reqwest::Response,
    provider: Provider,
    parse: P,
) -> BackendStream
where
    P: FnMut(&str) -> Result<Parsed, AppError> + Send + 'static,
{
    let source = response
        .bytes_stream()
        .eventsource()
        .map(|event| event.map_err(|e| e.to_string()))
        .boxed();

    let state = SseState {
        source,
        parse,
        pending: VecDeque::new(),
        finished: false,
        completed: false,
        provider,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }

            match state.source.next().await {
                None if state.completed || !state.provider.wire().has_end_marker() => return None,
                None => {
                    state.finished = true;
                    let error = AppError::provider_error(
                        502,
                        format!(
                            "{} stream ended before the end-of-generation marker",
                            state.provider
                        ),
                    );
                    return Some((Err(error), state));
                }
                Some(Err(e)) => {
                    state.finished = true;
                    let error = AppError::provider_error(
                        502,
                        format!("{} stream error: {}", state.provider, e),
                    );
                    return Some((Err(error), state));
                }
                Some(Ok(event)) => {
                    if event.data.trim().is_empty() {
                        continue;
                    }
                    match (state.parse)(&event.data) {
                        Ok(Parsed::Events(events)) => state.pending.extend(events),
                        Ok(Parsed::Done) => {
                            state.finished = true;
                            state.completed = true;
                        }
                        Err(e) => {
                            state.finished = true;
                            return Some((Err(e), state));
                        }
                    }
                }
            }
        }
    })
    .boxed()
}
