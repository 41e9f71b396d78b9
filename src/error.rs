use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("file {path} is too large to read ({size} bytes > {limit} bytes)")]
    FileTooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("file {path} is not a text file (binary content or unsupported encoding)")]
    FileNotText { path: PathBuf },

    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("command '{command}' was blocked for safety reasons")]
    CommandRejected { command: String },

    #[error("command '{command}' was aborted after the {timeout_sec}s timeout")]
    CommandTimeout { command: String, timeout_sec: u64 },

    #[error("failed to run command '{command}': {source}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Api(#[from] openrouter_api::OpenRouterError),

    #[error("a generation is already active for this conversation")]
    GenerationActive,

    #[error("reached the follow-up limit of {limit} chained tool turns; stopping this loop")]
    FollowUpLimit { limit: u32 },
}

impl EngineError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}
