/// Where an extracted code payload should land in the editor buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertScope {
    /// Insert at the current cursor position.
    Standard,
    /// Insert before the given 1-based line.
    Line(u32),
    /// Replace the inclusive 1-based line range.
    Range { start: u32, end: u32 },
}

/// One actionable instruction extracted from a command span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandRecord {
    ReadFile {
        path: String,
    },
    Execute {
        command: String,
    },
    InsertCode {
        scope: InsertScope,
        code: String,
        language: Option<String>,
    },
    /// `replace_file` on the wire; the `modify_file` alias maps here too.
    ReplaceFile {
        path: String,
        content: String,
    },
    Stop {
        message: String,
    },
}

impl CommandRecord {
    /// Returns true when this command suppresses rendering and restarts the
    /// model loop: the model is expected to wait for the result before
    /// proposing edits, so nothing else in the response is processed.
    #[must_use]
    pub fn short_circuits(&self) -> bool {
        matches!(self, Self::ReadFile { .. } | Self::Execute { .. })
    }
}

/// One command plus the registry id allocated for its display placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedCommand {
    pub record: CommandRecord,
    /// Allocated for insertable code payloads so a later transcript click can
    /// resolve back to them; `None` for commands with no replayable payload.
    pub block_id: Option<u64>,
}

/// Result of one scan pass over a complete model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    /// The response with recognized spans rewritten to placeholders. When
    /// `suppress_display` is set this is the raw text, preserved so the
    /// caller can append it verbatim to model-facing history.
    pub display_text: String,
    pub commands: Vec<ScannedCommand>,
    /// Set when a read/execute command was recognized: the host should show
    /// an annotation instead of rendering the response body.
    pub suppress_display: bool,
    /// First block id not consumed by this pass.
    pub next_block_id: u64,
}
