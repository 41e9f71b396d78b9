use std::ops::Range;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::patterns;
use crate::record::{CommandRecord, InsertScope, ScanOutcome, ScannedCommand};

/// Substituted when a `stop` block carries no message of its own.
const DEFAULT_STOP_MESSAGE: &str = "Code processing complete";

/// Scans one complete model response for command spans.
///
/// `first_block_id` seeds the placeholder ids allocated for insertable code
/// payloads; the outcome reports the first id left unconsumed so the caller
/// can keep its registry monotonic across responses.
pub fn scan(raw: &str, first_block_id: u64) -> ScanOutcome {
    if let Some(record) = direct_json_command(raw) {
        debug!(?record, "direct JSON command recognized");
        return suppressed(raw, record, first_block_id);
    }

    if let Some(record) = fenced_short_circuit(raw) {
        debug!(?record, "fenced JSON command recognized");
        return suppressed(raw, record, first_block_id);
    }

    let mut spans = fenced_rewrite_spans(raw);

    // Legacy markers are consulted only when the JSON tier changed nothing;
    // otherwise a response mixing both dialects would double-process.
    if spans.is_empty() {
        if let Some(record) = legacy_read_command(raw) {
            debug!(?record, "legacy read marker recognized");
            return suppressed(raw, record, first_block_id);
        }
        spans = legacy_rewrite_spans(raw);
    }

    rewrite(raw, spans, first_block_id)
}

struct RewriteSpan {
    range: Range<usize>,
    priority: u8,
    record: CommandRecord,
}

fn suppressed(raw: &str, record: CommandRecord, first_block_id: u64) -> ScanOutcome {
    ScanOutcome {
        display_text: raw.to_string(),
        commands: vec![ScannedCommand {
            record,
            block_id: None,
        }],
        suppress_display: true,
        next_block_id: first_block_id,
    }
}

fn direct_json_command(raw: &str) -> Option<CommandRecord> {
    for span in patterns::balanced_object_spans(raw) {
        let Ok(value) = serde_json::from_str::<Value>(&raw[span]) else {
            continue;
        };

        if let Some(record) = parse_read_file(&value).or_else(|| parse_execute(&value)) {
            return Some(record);
        }
    }

    None
}

fn fenced_short_circuit(raw: &str) -> Option<CommandRecord> {
    type Parser = fn(&Value) -> Option<CommandRecord>;
    let probes: [(&Regex, Parser); 2] = [
        (&patterns::FENCED_READ_FILE, parse_read_file),
        (&patterns::FENCED_EXECUTE, parse_execute),
    ];

    for (regex, parse) in probes {
        for captures in regex.captures_iter(raw) {
            let Some(json_str) = captures.get(1) else {
                continue;
            };

            match serde_json::from_str::<Value>(json_str.as_str()) {
                Ok(value) => {
                    if let Some(record) = parse(&value) {
                        return Some(record);
                    }
                }
                Err(error) => {
                    debug!(%error, "malformed JSON in matched fence; span left untouched");
                }
            }
        }
    }

    None
}

fn fenced_rewrite_spans(raw: &str) -> Vec<RewriteSpan> {
    let mut spans = Vec::new();
    collect_fenced(raw, &patterns::FENCED_CODE_INSERT, 0, parse_code_insert, &mut spans);
    collect_fenced(raw, &patterns::FENCED_REPLACE_FILE, 1, parse_replace_file, &mut spans);
    collect_fenced(raw, &patterns::FENCED_MODIFY_FILE, 2, parse_replace_file, &mut spans);
    collect_fenced(raw, &patterns::FENCED_STOP, 3, parse_stop, &mut spans);
    spans
}

fn collect_fenced(
    raw: &str,
    regex: &Regex,
    priority: u8,
    parse: fn(&Value) -> Option<CommandRecord>,
    out: &mut Vec<RewriteSpan>,
) {
    for captures in regex.captures_iter(raw) {
        let (Some(full), Some(json_str)) = (captures.get(0), captures.get(1)) else {
            continue;
        };

        match serde_json::from_str::<Value>(json_str.as_str()) {
            Ok(value) => {
                if let Some(record) = parse(&value) {
                    out.push(RewriteSpan {
                        range: full.range(),
                        priority,
                        record,
                    });
                }
            }
            Err(error) => {
                debug!(%error, "malformed JSON in matched fence; span left untouched");
            }
        }
    }
}

fn legacy_read_command(raw: &str) -> Option<CommandRecord> {
    let captures = patterns::LEGACY_READ_FILE.captures(raw)?;
    let path = captures.get(1)?.as_str().trim();
    if path.is_empty() {
        return None;
    }

    Some(CommandRecord::ReadFile {
        path: path.to_string(),
    })
}

fn legacy_rewrite_spans(raw: &str) -> Vec<RewriteSpan> {
    let mut spans = Vec::new();

    for captures in patterns::LEGACY_INSERT_RANGE.captures_iter(raw) {
        let (Some(full), Some(start), Some(end), Some(code)) = (
            captures.get(0),
            captures.get(1),
            captures.get(2),
            captures.get(3),
        ) else {
            continue;
        };
        let (Ok(start), Ok(end)) = (start.as_str().parse::<u32>(), end.as_str().parse::<u32>())
        else {
            debug!("legacy range marker with out-of-range line numbers; skipped");
            continue;
        };

        spans.push(RewriteSpan {
            range: full.range(),
            priority: 0,
            record: CommandRecord::InsertCode {
                scope: InsertScope::Range { start, end },
                code: code.as_str().trim().to_string(),
                language: None,
            },
        });
    }

    for captures in patterns::LEGACY_INSERT_LINE.captures_iter(raw) {
        let (Some(full), Some(line), Some(code)) =
            (captures.get(0), captures.get(1), captures.get(2))
        else {
            continue;
        };
        let Ok(line) = line.as_str().parse::<u32>() else {
            debug!("legacy line marker with out-of-range line number; skipped");
            continue;
        };

        spans.push(RewriteSpan {
            range: full.range(),
            priority: 1,
            record: CommandRecord::InsertCode {
                scope: InsertScope::Line(line),
                code: code.as_str().trim().to_string(),
                language: None,
            },
        });
    }

    for captures in patterns::LEGACY_INSERT_STANDARD.captures_iter(raw) {
        let (Some(full), Some(code)) = (captures.get(0), captures.get(1)) else {
            continue;
        };

        spans.push(RewriteSpan {
            range: full.range(),
            priority: 2,
            record: CommandRecord::InsertCode {
                scope: InsertScope::Standard,
                code: code.as_str().trim().to_string(),
                language: None,
            },
        });
    }

    spans
}

/// Builds the display text in one left-to-right pass: unmatched spans are
/// copied verbatim, each recognized span is substituted exactly once.
/// Overlapping matches are resolved by start offset, then pattern priority;
/// a span starting inside an already-consumed one is dropped.
fn rewrite(raw: &str, mut spans: Vec<RewriteSpan>, first_block_id: u64) -> ScanOutcome {
    spans.sort_by_key(|span| (span.range.start, span.priority));

    let mut display = String::with_capacity(raw.len());
    let mut commands = Vec::new();
    let mut cursor = 0usize;
    let mut next_block_id = first_block_id;

    for span in spans {
        if span.range.start < cursor {
            debug!(
                start = span.range.start,
                "span overlaps an earlier match; skipped"
            );
            continue;
        }

        display.push_str(&raw[cursor..span.range.start]);
        cursor = span.range.end;

        let block_id = match &span.record {
            CommandRecord::InsertCode { .. } => {
                let id = next_block_id;
                next_block_id += 1;
                Some(id)
            }
            _ => None,
        };

        display.push_str(&placeholder(&span.record, block_id));
        commands.push(ScannedCommand {
            record: span.record,
            block_id,
        });
    }

    display.push_str(&raw[cursor..]);

    ScanOutcome {
        display_text: display,
        commands,
        suppress_display: false,
        next_block_id,
    }
}

fn placeholder(record: &CommandRecord, block_id: Option<u64>) -> String {
    match record {
        CommandRecord::InsertCode { scope, code, .. } => {
            let label = match scope {
                InsertScope::Standard => "Insert code into the editor".to_string(),
                InsertScope::Line(line) => format!("Insert code at line {line}"),
                InsertScope::Range { start, end } => {
                    format!("Replace lines {start}-{end} with code")
                }
            };
            let id = block_id.unwrap_or_default();
            format!("\n```\n{code}\n```\n[{label}] (ID: {id})\n")
        }
        CommandRecord::ReplaceFile { path, content } => {
            format!("\n```\n{content}\n```\n[Replace contents of {path}]\n")
        }
        CommandRecord::Stop { message } => format!("\n*{message}*\n"),
        // Read/execute spans short-circuit before the rewrite pass runs.
        CommandRecord::ReadFile { .. } | CommandRecord::Execute { .. } => String::new(),
    }
}

fn parse_read_file(value: &Value) -> Option<CommandRecord> {
    if value.get("type")?.as_str()? != "read_file" {
        return None;
    }

    let path = value.get("path")?.as_str()?.trim();
    if path.is_empty() {
        return None;
    }

    Some(CommandRecord::ReadFile {
        path: path.to_string(),
    })
}

fn parse_execute(value: &Value) -> Option<CommandRecord> {
    if value.get("type")?.as_str()? != "execute" {
        return None;
    }

    let command = value.get("command")?.as_str()?.trim();
    if command.is_empty() {
        return None;
    }

    Some(CommandRecord::Execute {
        command: command.to_string(),
    })
}

fn parse_code_insert(value: &Value) -> Option<CommandRecord> {
    if value.get("type")?.as_str()? != "code_insert" {
        return None;
    }

    let code = value.get("code")?.as_str()?.trim().to_string();
    let language = value
        .get("language")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|language| !language.is_empty())
        .map(str::to_string);

    let insert_type = value
        .get("insert_type")
        .and_then(Value::as_str)
        .unwrap_or("standard");

    // A line/range request missing its line fields degrades to a cursor
    // insert rather than being dropped, matching the permissive source
    // dialect.
    let scope = match insert_type {
        "line" => value
            .get("line")
            .and_then(Value::as_u64)
            .and_then(|line| u32::try_from(line).ok())
            .map(InsertScope::Line),
        "range" => {
            let start = value
                .get("start_line")
                .and_then(Value::as_u64)
                .and_then(|line| u32::try_from(line).ok());
            let end = value
                .get("end_line")
                .and_then(Value::as_u64)
                .and_then(|line| u32::try_from(line).ok());
            match (start, end) {
                (Some(start), Some(end)) => Some(InsertScope::Range { start, end }),
                _ => None,
            }
        }
        _ => None,
    }
    .unwrap_or(InsertScope::Standard);

    Some(CommandRecord::InsertCode {
        scope,
        code,
        language,
    })
}

fn parse_replace_file(value: &Value) -> Option<CommandRecord> {
    let kind = value.get("type")?.as_str()?;
    if kind != "replace_file" && kind != "modify_file" {
        return None;
    }

    let path = value.get("path")?.as_str()?.trim();
    if path.is_empty() {
        return None;
    }

    Some(CommandRecord::ReplaceFile {
        path: path.to_string(),
        content: value.get("content")?.as_str()?.to_string(),
    })
}

fn parse_stop(value: &Value) -> Option<CommandRecord> {
    if value.get("type")?.as_str()? != "stop" {
        return None;
    }

    let message = value
        .get("message")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .unwrap_or(DEFAULT_STOP_MESSAGE);

    Some(CommandRecord::Stop {
        message: message.to_string(),
    })
}
