//! Collaborator contracts between the protocol engine and its host editor.
//!
//! This crate intentionally defines only the narrow surfaces the engine is
//! allowed to reach: a text-buffer abstraction, an optional human review
//! gate, and a transcript sink for rendered output. It excludes widgets,
//! highlighting, and window concerns, which belong to the host application.
//!
//! Hosts resolve capabilities once at engine construction time. A host that
//! lacks a capability passes the corresponding null object ([`AutoApprove`],
//! [`NullTranscript`]) instead of being probed per call.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Text-buffer operations exposed by the host editor.
///
/// Line numbers are 1-based. Callers are expected to clamp line arguments to
/// buffer bounds before dispatch; implementations must still saturate
/// out-of-range values rather than panic.
pub trait EditorOps: Send + Sync + 'static {
    /// Inserts text at the current cursor position.
    fn insert_at_cursor(&self, text: &str);

    /// Inserts text as new lines before the given 1-based line.
    fn insert_at_line(&self, line: usize, text: &str);

    /// Replaces the inclusive 1-based line range with the given text.
    fn replace_lines(&self, start: usize, end: usize, text: &str);

    /// Returns the full content of the buffer currently open in the editor.
    fn current_file_content(&self) -> String;

    /// Returns the path of the file currently open, when one is associated.
    fn current_file_path(&self) -> Option<PathBuf>;

    /// Replaces the entire buffer content, keeping the open-file association.
    fn replace_file_content(&self, text: &str);
}

/// Outcome of one review-gate interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewVerdict {
    /// The change was accepted; the payload is the content to apply, which
    /// the reviewer may have edited before accepting.
    Accept(String),
    /// The change was rejected; the target must be left untouched.
    Reject,
}

/// Optional human-in-the-loop diff review before a buffer or file mutation.
pub trait ReviewGate: Send + Sync + 'static {
    /// Presents `old_content` → `new_content` for the named target and
    /// returns the reviewer's verdict.
    fn review(&self, target: &str, old_content: &str, new_content: &str) -> ReviewVerdict;
}

/// Null-object review gate: every change is applied unconditionally.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

impl ReviewGate for AutoApprove {
    fn review(&self, _target: &str, _old_content: &str, new_content: &str) -> ReviewVerdict {
        ReviewVerdict::Accept(new_content.to_string())
    }
}

/// Visual category for one transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTag {
    Info,
    Error,
    System,
    Code,
}

impl MessageTag {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Error => "error",
            Self::System => "system",
            Self::Code => "code",
        }
    }
}

/// Rendering adapter for the conversation transcript.
///
/// The engine calls these hooks in a fixed order per assistant turn:
/// [`TranscriptSink::begin_assistant_turn`], zero or more
/// [`TranscriptSink::stream_delta`] calls, then exactly one
/// [`TranscriptSink::finalize_assistant_turn`] carrying the post-scan display
/// text (or an empty string when display is suppressed). Annotations may be
/// interleaved at any point.
pub trait TranscriptSink: Send + Sync + 'static {
    fn begin_assistant_turn(&self);

    fn stream_delta(&self, text: &str);

    fn finalize_assistant_turn(&self, display_text: &str);

    fn annotation(&self, tag: MessageTag, text: &str);
}

/// Null-object transcript sink for headless hosts and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTranscript;

impl TranscriptSink for NullTranscript {
    fn begin_assistant_turn(&self) {}

    fn stream_delta(&self, _text: &str) {}

    fn finalize_assistant_turn(&self, _display_text: &str) {}

    fn annotation(&self, _tag: MessageTag, _text: &str) {}
}

#[derive(Debug, Default)]
struct BufferState {
    lines: Vec<String>,
    cursor_line: usize,
    path: Option<PathBuf>,
}

/// In-memory line-buffer implementation of [`EditorOps`].
///
/// Used by tests and by headless hosts that have no on-screen editor. The
/// cursor is tracked at line granularity; [`EditorOps::insert_at_cursor`]
/// inserts before the cursor line and advances it past the inserted text.
#[derive(Debug, Default)]
pub struct BufferEditor {
    state: Mutex<BufferState>,
}

impl BufferEditor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a buffer holding `content`, associated with `path`.
    #[must_use]
    pub fn with_content(path: impl AsRef<Path>, content: &str) -> Self {
        Self {
            state: Mutex::new(BufferState {
                lines: split_lines(content),
                cursor_line: 0,
                path: Some(path.as_ref().to_path_buf()),
            }),
        }
    }

    /// Moves the cursor to the 1-based line, saturating to buffer bounds.
    pub fn set_cursor_line(&self, line: usize) {
        let mut state = lock_unpoisoned(&self.state);
        state.cursor_line = line.saturating_sub(1).min(state.lines.len());
    }

    /// Returns the buffer content line count.
    #[must_use]
    pub fn line_count(&self) -> usize {
        lock_unpoisoned(&self.state).lines.len()
    }
}

impl EditorOps for BufferEditor {
    fn insert_at_cursor(&self, text: &str) {
        let mut state = lock_unpoisoned(&self.state);
        let at = state.cursor_line.min(state.lines.len());
        let inserted = split_lines(text);
        let advance = inserted.len();
        state.lines.splice(at..at, inserted);
        state.cursor_line = at + advance;
    }

    fn insert_at_line(&self, line: usize, text: &str) {
        let mut state = lock_unpoisoned(&self.state);
        let at = line.saturating_sub(1).min(state.lines.len());
        let inserted = split_lines(text);
        state.lines.splice(at..at, inserted);
    }

    fn replace_lines(&self, start: usize, end: usize, text: &str) {
        let mut state = lock_unpoisoned(&self.state);
        if state.lines.is_empty() {
            state.lines = split_lines(text);
            return;
        }

        let last = state.lines.len();
        let mut start = start.clamp(1, last);
        let mut end = end.clamp(1, last);
        if start > end {
            std::mem::swap(&mut start, &mut end);
        }

        state.lines.splice(start - 1..end, split_lines(text));
    }

    fn current_file_content(&self) -> String {
        lock_unpoisoned(&self.state).lines.join("\n")
    }

    fn current_file_path(&self) -> Option<PathBuf> {
        lock_unpoisoned(&self.state).path.clone()
    }

    fn replace_file_content(&self, text: &str) {
        let mut state = lock_unpoisoned(&self.state);
        state.lines = split_lines(text);
        state.cursor_line = state.cursor_line.min(state.lines.len());
    }
}

fn split_lines(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    text.split('\n').map(str::to_string).collect()
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
