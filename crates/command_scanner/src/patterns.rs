use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;

fn pattern(source: &str) -> Regex {
    Regex::new(source).expect("command pattern compiles")
}

// Fenced JSON commands. The fence tag is optional (` ```json ` or a bare
// fence); capture group 1 is the candidate JSON object. `code_insert` allows
// arbitrary fields before `type` because models reorder keys freely.
pub(crate) static FENCED_READ_FILE: Lazy<Regex> = Lazy::new(|| {
    pattern(r#"(?s)```(?:json)?\s*(\{\s*"type"\s*:\s*"read_file".*?\})\s*```"#)
});

pub(crate) static FENCED_EXECUTE: Lazy<Regex> = Lazy::new(|| {
    pattern(r#"(?s)```(?:json)?\s*(\{\s*"type"\s*:\s*"execute".*?\})\s*```"#)
});

pub(crate) static FENCED_CODE_INSERT: Lazy<Regex> = Lazy::new(|| {
    pattern(r#"(?s)```(?:json)?\s*(\{.*?"type"\s*:\s*"code_insert".*?\})\s*```"#)
});

pub(crate) static FENCED_REPLACE_FILE: Lazy<Regex> = Lazy::new(|| {
    pattern(r#"(?s)```(?:json)?\s*(\{\s*"type"\s*:\s*"replace_file".*?\})\s*```"#)
});

pub(crate) static FENCED_MODIFY_FILE: Lazy<Regex> = Lazy::new(|| {
    pattern(r#"(?s)```(?:json)?\s*(\{\s*"type"\s*:\s*"modify_file".*?\})\s*```"#)
});

pub(crate) static FENCED_STOP: Lazy<Regex> = Lazy::new(|| {
    pattern(r#"(?s)```(?:json)?\s*(\{\s*"type"\s*:\s*"stop".*?\})\s*```"#)
});

// Legacy positional markers. Range must be tried before line: the line
// pattern also matches a range marker at the same offset (capturing the
// start line and swallowing `-M` into the code body).
pub(crate) static LEGACY_INSERT_RANGE: Lazy<Regex> =
    Lazy::new(|| pattern(r"(?s)###CODE_INSERT:(\d+)-(\d+)\s*(.*?)###END_INSERT"));

pub(crate) static LEGACY_INSERT_LINE: Lazy<Regex> =
    Lazy::new(|| pattern(r"(?s)###CODE_INSERT:(\d+)\s*(.*?)###END_INSERT"));

pub(crate) static LEGACY_INSERT_STANDARD: Lazy<Regex> =
    Lazy::new(|| pattern(r"(?s)###CODE_INSERT\s+(.*?)###END_INSERT"));

pub(crate) static LEGACY_READ_FILE: Lazy<Regex> =
    Lazy::new(|| pattern(r"###READ_FILE:(\S+)"));

/// Byte spans of brace-balanced `{…}` groups at nesting depth zero.
///
/// String literals and escapes inside a candidate are honored so braces in
/// JSON string values do not unbalance the scan. An unterminated group is
/// discarded, not reported.
pub(crate) fn balanced_object_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if depth == 0 {
            if ch == '{' {
                depth = 1;
                start = idx;
                in_string = false;
                escaped = false;
            }
            continue;
        }

        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    spans.push(start..idx + ch.len_utf8());
                }
            }
            _ => {}
        }
    }

    spans
}
