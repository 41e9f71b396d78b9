use serde_json::Value;

use crate::events::ChatStreamEvent;

/// Incremental parser for chat-completions SSE streams.
///
/// Frames are separated by blank lines; `data:` payload lines are stripped
/// and parsed as JSON. Comment lines (the `: OPENROUTER PROCESSING`
/// keep-alives) carry no `data:` prefix and are ignored.
#[derive(Debug, Default)]
pub struct SseStreamParser {
    buffer: String,
}

impl SseStreamParser {
    /// Feed arbitrary bytes into the parser and drain complete events.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ChatStreamEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        let mut events = Vec::new();

        while let Some(split) = self.buffer.find("\n\n") {
            let frame = self.buffer[..split].to_string();
            self.buffer.drain(0..split + 2);

            let Some(payload) = extract_data_payload(&frame) else {
                continue;
            };

            if payload == "[DONE]" {
                events.push(ChatStreamEvent::Done);
                continue;
            }

            if let Ok(value) = serde_json::from_str::<Value>(&payload) {
                if let Some(event) = map_event(&value) {
                    events.push(event);
                }
            }
        }

        events
    }

    /// Parse a complete SSE payload string in one shot.
    pub fn parse_frames(input: &str) -> Vec<ChatStreamEvent> {
        let mut parser = Self::default();
        parser.feed(input.as_bytes())
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.trim().is_empty()
    }
}

fn extract_data_payload(frame: &str) -> Option<String> {
    let data_lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .collect();

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

fn map_event(value: &Value) -> Option<ChatStreamEvent> {
    let delta = value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()?;

    if delta.is_empty() {
        return None;
    }

    Some(ChatStreamEvent::ContentDelta {
        delta: delta.to_owned(),
    })
}
