//! Transport-only OpenRouter chat-completions client primitives.
//!
//! This crate owns request building, SSE stream parsing, and HTTP error
//! classification for the chat-completions endpoint only. It contains no
//! conversation state, no command scanning, and no runtime UI coupling.
//!
//! Retry policy is deliberately absent: every request is a single attempt
//! and callers decide whether a failed turn is worth repeating.
//!
//! The one content-aware behavior in an otherwise content-agnostic loop is
//! the legacy read-marker early exit in [`OpenRouterClient::stream_chat`],
//! which stops consuming stream frames once the accumulated response
//! contains a complete `###READ_FILE:` marker.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod headers;
pub mod payload;
pub mod sse;
pub mod url;

pub use client::{CancellationSignal, OpenRouterClient};
pub use config::OpenRouterConfig;
pub use error::OpenRouterError;
pub use events::ChatStreamEvent;
pub use payload::{ChatMessage, ChatRequest, Role};
pub use sse::SseStreamParser;
pub use url::normalize_chat_completions_url;
