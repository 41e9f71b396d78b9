use std::fs;
use std::path::Path;

use openrouter_api::ChatMessage;
use tracing::{debug, warn};

use crate::conversation::HISTORY_WINDOW;
use crate::settings::{AssistantSettings, DEFAULT_ASSISTANT_PROMPT};

/// Entries listed per first-level subdirectory before the truncation counter.
const SUBDIR_PREVIEW_LIMIT: usize = 10;

/// Assembles the message list for one model request.
///
/// Exactly one system-instruction turn is prepended (substituting the
/// built-in default when the configured prompt is blank) and exactly one
/// filesystem-snapshot turn is appended. The snapshot is recomputed on every
/// call — the filesystem may have changed between turns, so caching it would
/// feed the model stale structure. History contributes its trailing
/// [`HISTORY_WINDOW`] turns, oldest first; the injected system turns are not
/// counted against that window.
pub fn build(
    history: &[ChatMessage],
    settings: &AssistantSettings,
    project_root: &Path,
) -> Vec<ChatMessage> {
    let prompt = if settings.initial_prompt.trim().is_empty() {
        warn!("configured initial prompt is blank; substituting the built-in default");
        DEFAULT_ASSISTANT_PROMPT
    } else {
        settings.initial_prompt.as_str()
    };

    let mut messages = Vec::with_capacity(history.len().min(HISTORY_WINDOW) + 2);
    messages.push(ChatMessage::system(prompt));

    let structure = project_structure_snapshot(project_root);
    debug!(
        root = %project_root.display(),
        bytes = structure.len(),
        "computed project structure snapshot"
    );
    messages.push(ChatMessage::system(format!(
        "Current project file-system structure:\n{structure}"
    )));

    let start = history.len().saturating_sub(HISTORY_WINDOW);
    messages.extend(history[start..].iter().cloned());
    messages
}

/// Depth-limited project listing: root-level directories first, then files,
/// both sorted, dotfiles skipped. Each first-level subdirectory shows up to
/// [`SUBDIR_PREVIEW_LIMIT`] entries plus a counter for the rest. Unreadable
/// directories fold their error into the listing instead of failing the
/// request.
pub fn project_structure_snapshot(root: &Path) -> String {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(error) => {
            return format!("Failed to read project root {}: {error}", root.display());
        }
    };

    let mut dirs = Vec::new();
    let mut files = Vec::new();

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }

        if entry.path().is_dir() {
            dirs.push(name);
        } else {
            files.push(name);
        }
    }

    dirs.sort();
    files.sort();

    if dirs.is_empty() && files.is_empty() {
        return "The project is empty or has no visible files".to_string();
    }

    let mut structure = String::new();

    for dir in &dirs {
        structure.push_str(&format!("📁 {dir}/\n"));
        append_subdir_preview(&mut structure, root, dir);
    }

    for file in &files {
        structure.push_str(&format!("📄 {file}\n"));
    }

    structure
}

fn append_subdir_preview(structure: &mut String, root: &Path, dir: &str) {
    let entries = match fs::read_dir(root.join(dir)) {
        Ok(entries) => entries,
        Err(error) => {
            structure.push_str(&format!("  ⚠️ failed to read directory: {error}\n"));
            return;
        }
    };

    let mut names: Vec<(String, bool)> = entries
        .flatten()
        .map(|entry| {
            (
                entry.file_name().to_string_lossy().into_owned(),
                entry.path().is_dir(),
            )
        })
        .filter(|(name, _)| !name.starts_with('.'))
        .collect();
    names.sort();

    let total = names.len();
    for (name, is_dir) in names.into_iter().take(SUBDIR_PREVIEW_LIMIT) {
        if is_dir {
            structure.push_str(&format!("  📁 {dir}/{name}/\n"));
        } else {
            structure.push_str(&format!("  📄 {dir}/{name}\n"));
        }
    }

    if total > SUBDIR_PREVIEW_LIMIT {
        structure.push_str(&format!(
            "  ... and {} more entries\n",
            total - SUBDIR_PREVIEW_LIMIT
        ));
    }
}
