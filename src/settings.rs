use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

pub const DEFAULT_MODEL: &str = "deepseek/deepseek-r1";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Built-in system instruction used whenever the configured prompt is blank.
pub const DEFAULT_ASSISTANT_PROMPT: &str = r##"You are the coding assistant embedded in a desktop code editor. Follow these STRICT rules:

1. Use JSON commands for ALL file and code operations. Do not show code directly in prose.

2. Do NOT ask for confirmation before running commands - just run them:
   - Spotted a problem in the code? Send the fix command immediately.
   - Need to see a file? Send read_file without explanations.
   - Want to change code? Send code_insert or replace_file.

3. WORK ORDER:
   - Send the read command (read_file)
   - Wait for the system reply carrying the file contents
   - Send the edit command (code_insert/replace_file)
   - Wait for the confirmation of the edit
   - Only AFTER that, explain what you did

4. JSON commands MUST be wrapped in a fenced block tagged json:
```json
{
  "type": "command"
  ...other fields...
}
```

5. AVAILABLE COMMANDS:
   a) Read a file:
   ```json
   {
     "type": "read_file",
     "path": "path/to/file.py"
   }
   ```

   b) Insert or replace code:
   ```json
   {
     "type": "code_insert",
     "insert_type": "line",
     "line": 42,
     "code": "def example():
    print('hello')"
   }
   ```
   insert_type "range" with start_line/end_line replaces a line range;
   omitting insert_type inserts at the cursor.

   c) Replace a whole file:
   ```json
   {
     "type": "replace_file",
     "path": "file.py",
     "content": "#!/usr/bin/env python
def main():
    print('new contents')"
   }
   ```
   modify_file is accepted as an alias of replace_file.

   d) Run a shell command:
   ```json
   {
     "type": "execute",
     "command": "python demo.py"
   }
   ```

   e) Signal that you are done:
   ```json
   {
     "type": "stop",
     "message": "Edits applied"
   }
   ```

6. IMPORTANT! Inside JSON code fields:
   - Use REAL line breaks, not \n escapes
   - Keep the original indentation of the edited code
   - Send the edit command IMMEDIATELY after reading a file
   - Never ask permission to change code, just change it

7. MODE OF OPERATION:
   - Read the file, edit the file, then explain the change
   - Never show code outside JSON commands
   - Do not offer alternatives; implement the solution directly"##;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub model: String,
    pub temperature: f64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

/// Assistant configuration, persisted as JSON and loaded once per session.
///
/// Missing or empty fields fall back to defaults; a missing or unreadable
/// file yields the full default configuration rather than an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantSettings {
    pub initial_prompt: String,
    pub api_settings: ApiSettings,
    pub code_insertion_enabled: bool,
    pub auto_continue_enabled: bool,
    /// Upper bound on automatic continuations triggered by `stop` commands
    /// within one user turn.
    pub max_auto_continues: u32,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            initial_prompt: DEFAULT_ASSISTANT_PROMPT.to_string(),
            api_settings: ApiSettings::default(),
            code_insertion_enabled: true,
            auto_continue_enabled: true,
            max_auto_continues: 1,
        }
    }
}

const SETTINGS_FILE: &str = "settings.json";
const AI_SETTINGS_FILE: &str = "ai_settings.json";

impl AssistantSettings {
    /// Loads settings from `dir`, honoring the `ai_settings_file` indirection
    /// in a top-level `settings.json` when present.
    pub fn load_from_dir(dir: &Path) -> Self {
        let mut settings_path = dir.join(AI_SETTINGS_FILE);

        if let Ok(text) = fs::read_to_string(dir.join(SETTINGS_FILE)) {
            if let Ok(value) = serde_json::from_str::<Value>(&text) {
                if let Some(indirect) = value.get("ai_settings_file").and_then(Value::as_str) {
                    settings_path = dir.join(indirect);
                }
            }
        }

        Self::load(&settings_path)
    }

    /// Loads settings from one JSON file.
    pub fn load(path: &Path) -> Self {
        let Ok(text) = fs::read_to_string(path) else {
            debug!(path = %path.display(), "no assistant settings file; using defaults");
            return Self::default();
        };

        match serde_json::from_str::<Self>(&text) {
            Ok(mut loaded) => {
                if loaded.initial_prompt.trim().is_empty() {
                    warn!("initial prompt missing from assistant settings; using the built-in default");
                    loaded.initial_prompt = DEFAULT_ASSISTANT_PROMPT.to_string();
                }
                loaded
            }
            Err(error) => {
                warn!(%error, path = %path.display(), "failed to parse assistant settings; using defaults");
                Self::default()
            }
        }
    }
}
