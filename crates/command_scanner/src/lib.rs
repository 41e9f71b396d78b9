//! Pattern battery for commands embedded in model output.
//!
//! A model response is free-form prose that may carry actionable command
//! spans in three dialects, scanned in fixed priority order:
//!
//! 1. raw inline JSON objects with a `type` field (`read_file`, `execute`) —
//!    models sometimes omit the code fence, so this probe is the most
//!    permissive and runs first;
//! 2. fenced JSON blocks for `read_file`, `execute`, `code_insert`,
//!    `replace_file`/`modify_file`, and `stop`;
//! 3. legacy positional markers (`###CODE_INSERT[:N[-M]] … ###END_INSERT`,
//!    `###READ_FILE:path`), accepted for backward compatibility and only
//!    evaluated when tier 2 changed nothing.
//!
//! A span consumed by an earlier tier is never re-matched by a later one,
//! and each recognized span yields exactly one [`CommandRecord`]. Display
//! rewriting is a single left-to-right pass over byte-offset spans; the
//! original text is never mutated in place.
//!
//! Malformed JSON inside a matched fence is logged and the span is left
//! untouched in the display text — a parse failure here is recoverable
//! prose, not an error.

mod patterns;
mod record;
mod scan;

pub use record::{CommandRecord, InsertScope, ScanOutcome, ScannedCommand};
pub use scan::scan;
