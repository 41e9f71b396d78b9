use std::collections::BTreeMap;

use command_scanner::InsertScope;
use openrouter_api::ChatMessage;

/// Number of trailing history turns resent with each request. Older turns
/// stay in memory for display but are not resent, bounding token cost.
pub const HISTORY_WINDOW: usize = 10;

/// One replayable code payload shown in the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub scope: InsertScope,
    pub code: String,
    pub language: Option<String>,
}

/// Ordered conversation history plus the code-block registry.
///
/// Append-only during a session; [`ConversationState::clear`] resets turns,
/// registry, id counter, and the first-message flag together, so a reader
/// holding the surrounding lock never observes a partial reset.
#[derive(Debug)]
pub struct ConversationState {
    turns: Vec<ChatMessage>,
    first_message: bool,
    code_blocks: BTreeMap<u64, CodeBlock>,
    next_code_block_id: u64,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            turns: Vec::new(),
            first_message: true,
            code_blocks: BTreeMap::new(),
            next_code_block_id: 1,
        }
    }

    pub fn push_turn(&mut self, turn: ChatMessage) {
        self.turns.push(turn);
    }

    /// Returns the full model-facing history in append order.
    #[must_use]
    pub fn turns(&self) -> &[ChatMessage] {
        &self.turns
    }

    /// Returns the trailing `n` turns in original order.
    #[must_use]
    pub fn trimmed_history(&self, n: usize) -> &[ChatMessage] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    #[must_use]
    pub fn is_first_message(&self) -> bool {
        self.first_message
    }

    pub fn mark_first_message_sent(&mut self) {
        self.first_message = false;
    }

    /// Next id the scanner should allocate placeholders from.
    #[must_use]
    pub fn next_code_block_id(&self) -> u64 {
        self.next_code_block_id
    }

    /// Registers a scanned code block under a scanner-allocated id.
    pub fn register_code_block(&mut self, id: u64, block: CodeBlock) {
        self.code_blocks.insert(id, block);
        self.next_code_block_id = self.next_code_block_id.max(id + 1);
    }

    #[must_use]
    pub fn code_block(&self, id: u64) -> Option<&CodeBlock> {
        self.code_blocks.get(&id)
    }

    #[must_use]
    pub fn code_block_count(&self) -> usize {
        self.code_blocks.len()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.code_blocks.clear();
        self.next_code_block_id = 1;
        self.first_message = true;
    }
}
