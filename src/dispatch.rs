use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use command_scanner::{CommandRecord, InsertScope};
use editor_host::{EditorOps, ReviewGate, ReviewVerdict};
use openrouter_api::ChatMessage;
use similar::{ChangeTag, TextDiff};
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

use crate::error::EngineError;

/// Hard cap on file reads fed back to the model.
pub const MAX_READ_BYTES: u64 = 1024 * 1024;

/// Hard timeout for model-requested shell commands.
pub const COMMAND_TIMEOUT_SEC: u64 = 30;

/// Destructive command fragments that are never executed.
const UNSAFE_COMMAND_PARTS: [&str; 4] = ["rm -rf", "format", "del /", "deltree"];

/// Outcome of dispatching one command record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEffect {
    /// A synthesized user turn that re-enters the model loop (read/execute).
    FollowUp(ChatMessage),
    /// An edit was applied; the payload is a status line for the transcript.
    Applied(String),
    /// The review gate declined the edit; the payload goes back into history
    /// so the model knows the change was not made.
    Declined(String),
    /// Informational only (stop commands).
    Noted(String),
}

/// Performs command side effects against the filesystem, shell, and editor.
///
/// Capabilities are fixed at construction: hosts without a review dialog
/// pass [`editor_host::AutoApprove`] and every gated edit applies
/// unconditionally.
pub struct Dispatcher {
    project_root: Option<PathBuf>,
    editor: Arc<dyn EditorOps>,
    review: Arc<dyn ReviewGate>,
}

impl Dispatcher {
    pub fn new(
        project_root: Option<PathBuf>,
        editor: Arc<dyn EditorOps>,
        review: Arc<dyn ReviewGate>,
    ) -> Self {
        Self {
            project_root,
            editor,
            review,
        }
    }

    /// Resolves a command path deterministically: absolute paths pass
    /// through; relative paths land under the project root, falling back to
    /// the process working directory.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            debug!(path, "command path is already absolute");
            return candidate.to_path_buf();
        }

        let base = self
            .project_root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let resolved = base.join(candidate);
        debug!(requested = path, resolved = %resolved.display(), "resolved relative command path");
        resolved
    }

    pub fn dispatch(&self, record: &CommandRecord) -> Result<DispatchEffect, EngineError> {
        match record {
            CommandRecord::ReadFile { path } => self.read_file(path),
            CommandRecord::Execute { command } => self.execute(command),
            CommandRecord::InsertCode { scope, code, .. } => self.insert_code(scope, code),
            CommandRecord::ReplaceFile { path, content } => self.replace_file(path, content),
            CommandRecord::Stop { message } => Ok(DispatchEffect::Noted(message.clone())),
        }
    }

    fn read_file(&self, path: &str) -> Result<DispatchEffect, EngineError> {
        let resolved = self.resolve_path(path);

        let metadata = match fs::metadata(&resolved) {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Err(EngineError::FileNotFound { path: resolved });
            }
            Err(error) => return Err(EngineError::io("reading file metadata", resolved, error)),
        };

        // Size is checked before reading so an oversized file never yields
        // partial content.
        if metadata.len() > MAX_READ_BYTES {
            return Err(EngineError::FileTooLarge {
                path: resolved,
                size: metadata.len(),
                limit: MAX_READ_BYTES,
            });
        }

        let bytes = fs::read(&resolved)
            .map_err(|error| EngineError::io("reading file", resolved.clone(), error))?;
        let content = decode_text(bytes, &resolved)?;
        info!(path = %resolved.display(), chars = content.len(), "file read for model follow-up");

        let message = format!(
            "Contents of file '{}':\n\n```\n{content}\n```\n\nNow that you can see the file contents, continue with the task. \
Do not describe the file; apply the required actions immediately using the JSON command format, and finish with a stop command.",
            resolved.display()
        );

        Ok(DispatchEffect::FollowUp(ChatMessage::user(message)))
    }

    fn execute(&self, command: &str) -> Result<DispatchEffect, EngineError> {
        let lowered = command.to_lowercase();
        if let Some(blocked) = UNSAFE_COMMAND_PARTS
            .iter()
            .find(|entry| lowered.contains(**entry))
        {
            warn!(command, blocked, "shell command blocked by denylist");
            return Err(EngineError::CommandRejected {
                command: command.to_string(),
            });
        }

        let mut builder = shell_command(command);
        builder.stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(root) = &self.project_root {
            builder.current_dir(root);
        }

        let mut child = builder.spawn().map_err(|source| EngineError::CommandFailed {
            command: command.to_string(),
            source,
        })?;

        let status = match child.wait_timeout(Duration::from_secs(COMMAND_TIMEOUT_SEC)) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(EngineError::CommandTimeout {
                    command: command.to_string(),
                    timeout_sec: COMMAND_TIMEOUT_SEC,
                });
            }
            Err(source) => {
                let _ = child.kill();
                return Err(EngineError::CommandFailed {
                    command: command.to_string(),
                    source,
                });
            }
        };

        let stdout = read_pipe(child.stdout.take());
        let stderr = read_pipe(child.stderr.take());
        let exit_code = status
            .code()
            .map(|code| code.to_string())
            .unwrap_or_else(|| "terminated by signal".to_string());

        let mut output = format!("Command result (exit code {exit_code}):\n\n");
        if !stdout.trim().is_empty() {
            output.push_str(&format!("STDOUT:\n```\n{stdout}\n```\n\n"));
        }
        if !stderr.trim().is_empty() {
            output.push_str(&format!("STDERR:\n```\n{stderr}\n```\n\n"));
        }
        if stdout.trim().is_empty() && stderr.trim().is_empty() {
            output.push_str("The command produced no output.\n");
        }

        info!(command, exit = %exit_code, "shell command captured for model follow-up");

        let message = format!(
            "Result of command '{command}':\n\n{output}\nContinue the task using these results. \
Remember to use the JSON command format for code edits and stopping."
        );

        Ok(DispatchEffect::FollowUp(ChatMessage::user(message)))
    }

    fn insert_code(&self, scope: &InsertScope, code: &str) -> Result<DispatchEffect, EngineError> {
        let current = self.editor.current_file_content();
        let line_count = count_lines(&current);
        let target = self.review_target();

        match scope {
            InsertScope::Standard => {
                // Cursor position is editor-private state, so a standard
                // insert cannot be projected for review; it applies directly.
                self.editor.insert_at_cursor(code);
                Ok(DispatchEffect::Applied(
                    "Code inserted at the cursor position".to_string(),
                ))
            }
            InsertScope::Line(line) => {
                let line = clamp_insert_line(*line, line_count);
                let projected = project_line_insert(&current, line, code);

                match self.review.review(&target, &current, &projected) {
                    ReviewVerdict::Accept(applied) => {
                        let summary = change_summary(&current, &applied);
                        if applied == projected {
                            self.editor.insert_at_line(line, code);
                        } else {
                            self.editor.replace_file_content(&applied);
                        }
                        Ok(DispatchEffect::Applied(format!(
                            "Code inserted at line {line} ({summary})"
                        )))
                    }
                    ReviewVerdict::Reject => Ok(DispatchEffect::Declined(format!(
                        "The proposed insert at line {line} was declined; the file was left unchanged."
                    ))),
                }
            }
            InsertScope::Range { start, end } => {
                let (start, end) = clamp_range(*start, *end, line_count);
                let projected = project_range_replace(&current, start, end, code);

                match self.review.review(&target, &current, &projected) {
                    ReviewVerdict::Accept(applied) => {
                        let summary = change_summary(&current, &applied);
                        if applied == projected {
                            self.editor.replace_lines(start, end, code);
                        } else {
                            self.editor.replace_file_content(&applied);
                        }
                        Ok(DispatchEffect::Applied(format!(
                            "Replaced lines {start}-{end} ({summary})"
                        )))
                    }
                    ReviewVerdict::Reject => Ok(DispatchEffect::Declined(format!(
                        "The proposed replacement of lines {start}-{end} was declined; the file was left unchanged."
                    ))),
                }
            }
        }
    }

    fn replace_file(&self, path: &str, content: &str) -> Result<DispatchEffect, EngineError> {
        let resolved = self.resolve_path(path);
        let open_in_editor = self
            .editor
            .current_file_path()
            .map(|open| self.resolve_path(&open.to_string_lossy()) == resolved)
            .unwrap_or(false);

        let pre_exists = open_in_editor || resolved.exists();
        let old_content = if open_in_editor {
            self.editor.current_file_content()
        } else if pre_exists {
            fs::read(&resolved)
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .map_err(|error| EngineError::io("reading file", resolved.clone(), error))?
        } else {
            String::new()
        };

        // Fresh files and no-op rewrites skip the review gate; only a real
        // change to existing content warrants a human look.
        let applied = if pre_exists && old_content != content {
            match self
                .review
                .review(&resolved.display().to_string(), &old_content, content)
            {
                ReviewVerdict::Accept(applied) => applied,
                ReviewVerdict::Reject => {
                    return Ok(DispatchEffect::Declined(format!(
                        "The replacement of {} was declined; the file was left unchanged.",
                        resolved.display()
                    )));
                }
            }
        } else {
            content.to_string()
        };

        let summary = change_summary(&old_content, &applied);

        if open_in_editor {
            self.editor.replace_file_content(&applied);
            info!(path = %resolved.display(), "replaced content of the open editor buffer");
            return Ok(DispatchEffect::Applied(format!(
                "Updated the open file {} ({summary})",
                resolved.display()
            )));
        }

        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent).map_err(|error| {
                EngineError::io("creating parent directories", parent.to_path_buf(), error)
            })?;
        }
        fs::write(&resolved, applied)
            .map_err(|error| EngineError::io("writing file", resolved.clone(), error))?;
        info!(path = %resolved.display(), "file written");

        Ok(DispatchEffect::Applied(format!(
            "Wrote {} ({summary})",
            resolved.display()
        )))
    }

    fn review_target(&self) -> String {
        self.editor
            .current_file_path()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "editor buffer".to_string())
    }
}

fn shell_command(command: &str) -> Command {
    #[cfg(windows)]
    {
        let mut builder = Command::new("cmd");
        builder.arg("/C").arg(command);
        builder
    }
    #[cfg(not(windows))]
    {
        let mut builder = Command::new("bash");
        builder.arg("-lc").arg(command);
        builder
    }
}

fn read_pipe(pipe: Option<impl Read>) -> String {
    let Some(mut pipe) = pipe else {
        return String::new();
    };

    let mut bytes = Vec::new();
    let _ = pipe.read_to_end(&mut bytes);
    String::from_utf8_lossy(&bytes).into_owned()
}

fn decode_text(bytes: Vec<u8>, path: &Path) -> Result<String, EngineError> {
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(error) => {
            let bytes = error.into_bytes();
            // NUL bytes mean binary data, not a legacy single-byte encoding.
            if bytes.contains(&0) {
                return Err(EngineError::FileNotText {
                    path: path.to_path_buf(),
                });
            }
            Ok(bytes.iter().map(|&byte| char::from(byte)).collect())
        }
    }
}

fn count_lines(content: &str) -> usize {
    if content.is_empty() {
        0
    } else {
        content.split('\n').count()
    }
}

fn split_lines(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    text.split('\n').map(str::to_string).collect()
}

/// Line inserts land between 1 and one past the last line (append).
fn clamp_insert_line(line: u32, line_count: usize) -> usize {
    (line as usize).clamp(1, line_count + 1)
}

/// Range bounds clamp to existing lines and swap when inverted.
fn clamp_range(start: u32, end: u32, line_count: usize) -> (usize, usize) {
    let last = line_count.max(1);
    let mut start = (start as usize).clamp(1, last);
    let mut end = (end as usize).clamp(1, last);
    if start > end {
        std::mem::swap(&mut start, &mut end);
    }

    (start, end)
}

fn project_line_insert(current: &str, line: usize, code: &str) -> String {
    let mut lines = split_lines(current);
    let at = line.saturating_sub(1).min(lines.len());
    lines.splice(at..at, split_lines(code));
    lines.join("\n")
}

fn project_range_replace(current: &str, start: usize, end: usize, code: &str) -> String {
    let mut lines = split_lines(current);
    if lines.is_empty() {
        return code.to_string();
    }

    let end = end.min(lines.len());
    lines.splice(start - 1..end, split_lines(code));
    lines.join("\n")
}

fn change_summary(old: &str, new: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    let mut added = 0usize;
    let mut removed = 0usize;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => added += 1,
            ChangeTag::Delete => removed += 1,
            ChangeTag::Equal => {}
        }
    }

    format!("+{added}/-{removed} lines")
}
