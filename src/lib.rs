//! Command-protocol engine for model-driven editing in a desktop code editor.
//!
//! The engine owns the full request/response cycle against a chat-completions
//! model service:
//!
//! - [`context`] assembles each request: one system instruction, one freshly
//!   computed filesystem snapshot, and the trailing window of conversation
//!   history;
//! - `openrouter_api` (member crate) streams the response and accumulates
//!   deltas under cooperative cancellation;
//! - `command_scanner` (member crate) recognizes command spans in the
//!   completed response and rewrites the visible text;
//! - [`dispatch`] performs each recognized effect exactly once — file reads,
//!   shell execution, code insertion, file replacement;
//! - [`engine`] ties the pieces into a bounded multi-turn tool-use loop with
//!   a single active generation per conversation.
//!
//! Rendering, highlighting, and window chrome are not here: the engine talks
//! to the host application only through the `editor_host` contracts, resolved
//! once at construction.
//!
//! ## Host bootstrap
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use assistant_engine::{AssistantSettings, ChatEngine, OpenRouterTransport};
//! use editor_host::{AutoApprove, BufferEditor, NullTranscript};
//! use openrouter_api::OpenRouterConfig;
//!
//! let settings = AssistantSettings::load_from_dir(std::path::Path::new("."));
//! let transport = OpenRouterTransport::new(OpenRouterConfig::new("sk-or-..."))
//!     .expect("transport config is valid");
//! let engine = Arc::new(ChatEngine::new(
//!     settings,
//!     None,
//!     Arc::new(transport),
//!     Arc::new(BufferEditor::new()),
//!     Arc::new(AutoApprove),
//!     Arc::new(NullTranscript),
//! ));
//! engine.send_user_message("add a docstring to demo.py").expect("engine is idle");
//! ```

pub mod context;
pub mod conversation;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod settings;

pub use conversation::{CodeBlock, ConversationState};
pub use dispatch::{DispatchEffect, Dispatcher};
pub use engine::{ChatEngine, ChatTransport, OpenRouterTransport, MAX_FOLLOW_UP_DEPTH};
pub use error::EngineError;
pub use settings::{ApiSettings, AssistantSettings};
