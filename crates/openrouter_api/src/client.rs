use std::future::Future;
use std::sync::{atomic::AtomicBool, atomic::Ordering, Arc, OnceLock};
use std::time::Duration;

use futures_util::StreamExt;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response};
use tracing::debug;

use crate::config::OpenRouterConfig;
use crate::error::{classify_status, OpenRouterError};
use crate::events::ChatStreamEvent;
use crate::headers::build_headers;
use crate::payload::ChatRequest;
use crate::sse::SseStreamParser;
use crate::url::normalize_chat_completions_url;

/// Optional cancellation signal shared across request and stream loops.
pub type CancellationSignal = Arc<AtomicBool>;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Cheap prefix gate before the full marker regex is consulted.
const READ_MARKER_PREFIX: &str = "###READ_FILE:";

/// A legacy read marker is complete once its path is terminated by
/// whitespace; until then the marker may still be mid-delta.
const READ_MARKER_COMPLETE: &str = r"###READ_FILE:\S+\s";

fn complete_read_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| Regex::new(READ_MARKER_COMPLETE).expect("read marker pattern compiles"))
}

#[derive(Debug)]
pub struct OpenRouterClient {
    http: Client,
    config: OpenRouterConfig,
}

impl OpenRouterClient {
    pub fn new(config: OpenRouterConfig) -> Result<Self, OpenRouterError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(OpenRouterError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &OpenRouterConfig {
        &self.config
    }

    pub fn normalized_endpoint(&self) -> String {
        normalize_chat_completions_url(&self.config.base_url)
    }

    pub fn build_headers(&self, user_agent: Option<&str>) -> Result<HeaderMap, OpenRouterError> {
        let headers = build_headers(&self.config, user_agent)?;
        let mut out = HeaderMap::new();
        for (key, value) in headers {
            out.insert(
                HeaderName::from_bytes(key.as_bytes()).map_err(|_| {
                    OpenRouterError::InvalidBaseUrl(format!("invalid header key: {key}"))
                })?,
                HeaderValue::from_str(&value).map_err(|_| {
                    OpenRouterError::InvalidBaseUrl(format!("invalid header value for {key}"))
                })?,
            );
        }
        Ok(out)
    }

    pub fn build_request(
        &self,
        request: &ChatRequest,
    ) -> Result<reqwest::RequestBuilder, OpenRouterError> {
        let headers = self.build_headers(self.config.user_agent.as_deref())?;
        let payload = request_with_transport_defaults(request);
        Ok(self
            .http
            .post(self.normalized_endpoint())
            .headers(headers)
            .json(&payload))
    }

    /// Issues one request attempt. Non-success statuses are classified into
    /// the error taxonomy; nothing is retried here.
    pub async fn send(
        &self,
        request: &ChatRequest,
        cancellation: Option<&CancellationSignal>,
    ) -> Result<Response, OpenRouterError> {
        if is_cancelled(cancellation) {
            return Err(OpenRouterError::Cancelled);
        }

        let response = self.build_request(request)?.send();
        let response = await_or_cancel(response, cancellation)
            .await?
            .map_err(OpenRouterError::from)?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = await_or_cancel(response.text(), cancellation)
            .await?
            .unwrap_or_else(|_| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            });

        Err(classify_status(status, &body))
    }

    /// Streams one chat completion, forwarding each content fragment to
    /// `on_delta` and returning the accumulated full text.
    ///
    /// The cancellation flag is polled between stream frames, so a cancel is
    /// observed within one frame's latency. Once the accumulated text
    /// contains a complete legacy read marker, the stream is abandoned right
    /// after the fragment that completed it: the caller will act on the
    /// marker, so further tokens would be wasted.
    pub async fn stream_chat<F>(
        &self,
        request: &ChatRequest,
        cancellation: Option<&CancellationSignal>,
        mut on_delta: F,
    ) -> Result<String, OpenRouterError>
    where
        F: FnMut(&str),
    {
        let response = self.send(request, cancellation).await?;
        let mut bytes = response.bytes_stream();
        let mut parser = SseStreamParser::default();
        let mut buffer = String::new();
        let complete_marker = complete_read_marker();
        let mut marker_primed = false;

        'stream: loop {
            let Some(chunk) = await_or_cancel(bytes.next(), cancellation).await? else {
                break;
            };
            if is_cancelled(cancellation) {
                return Err(OpenRouterError::Cancelled);
            }
            let chunk = chunk.map_err(OpenRouterError::from)?;

            for event in parser.feed(&chunk) {
                match event {
                    ChatStreamEvent::Done => break 'stream,
                    ChatStreamEvent::ContentDelta { delta } => {
                        buffer.push_str(&delta);
                        on_delta(&delta);

                        if !marker_primed {
                            marker_primed = buffer.contains(READ_MARKER_PREFIX);
                        }
                        if marker_primed && complete_marker.is_match(&buffer) {
                            debug!("complete read marker in stream; exiting early");
                            break 'stream;
                        }
                    }
                }
            }
        }

        if is_cancelled(cancellation) {
            return Err(OpenRouterError::Cancelled);
        }

        Ok(buffer)
    }
}

fn request_with_transport_defaults(request: &ChatRequest) -> ChatRequest {
    let mut payload = request.clone();
    payload.stream = true;
    payload
}

fn is_cancelled(cancel: Option<&CancellationSignal>) -> bool {
    cancel.is_some_and(|token| token.load(Ordering::Acquire))
}

async fn await_or_cancel<F>(
    future: F,
    cancellation: Option<&CancellationSignal>,
) -> Result<F::Output, OpenRouterError>
where
    F: Future,
{
    if cancellation.is_none() {
        return Ok(future.await);
    }

    let mut future = Box::pin(future);

    loop {
        if is_cancelled(cancellation) {
            return Err(OpenRouterError::Cancelled);
        }

        if let Ok(output) = tokio::time::timeout(CANCEL_POLL_INTERVAL, &mut future).await {
            if is_cancelled(cancellation) {
                return Err(OpenRouterError::Cancelled);
            }
            return Ok(output);
        }
    }
}
