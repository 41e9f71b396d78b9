use std::fmt;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Error as JsonError;

#[derive(Debug)]
pub enum OpenRouterError {
    MissingApiKey,
    InvalidBaseUrl(String),
    /// 401: the bearer token was rejected.
    InvalidApiKey(String),
    /// 402: the account has no balance for the requested model.
    InsufficientBalance(String),
    /// 403: the key exists but may not use this API or model.
    Forbidden(String),
    /// 404: unknown model or resource.
    UnknownResource(String),
    /// 429: request rate exceeded.
    RateLimited(String),
    /// >= 500: upstream provider failure.
    Upstream { status: StatusCode, message: String },
    /// Any other non-success status, carrying the raw status and body.
    Status { status: StatusCode, message: String },
    /// DNS, connection, or timeout failure before a status was received.
    Network(reqwest::Error),
    Serde(JsonError),
    Cancelled,
    Unknown(String),
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorPayload {
    #[serde(rename = "error")]
    pub value: Option<ErrorPayloadFields>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorPayloadFields {
    pub message: Option<String>,
}

impl fmt::Display for OpenRouterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingApiKey => write!(
                f,
                "API key is not configured; add an OpenRouter key in the assistant settings"
            ),
            Self::InvalidBaseUrl(value) => write!(f, "invalid base URL: {value}"),
            Self::InvalidApiKey(message) => {
                write!(f, "authorization failed (invalid API key): {message}")
            }
            Self::InsufficientBalance(message) => {
                write!(f, "insufficient OpenRouter balance: {message}")
            }
            Self::Forbidden(message) => {
                write!(f, "access denied for this API or model: {message}")
            }
            Self::UnknownResource(message) => write!(
                f,
                "requested resource not found (check the configured model id): {message}"
            ),
            Self::RateLimited(message) => {
                write!(f, "request rate limit exceeded: {message}")
            }
            Self::Upstream { status, message } => {
                write!(f, "OpenRouter upstream failure (HTTP {status}): {message}")
            }
            Self::Status { status, message } => {
                write!(f, "OpenRouter API error (HTTP {status}): {message}")
            }
            Self::Network(error) => write!(f, "network error: {error}"),
            Self::Serde(error) => write!(f, "serialization error: {error}"),
            Self::Cancelled => write!(f, "request was cancelled"),
            Self::Unknown(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for OpenRouterError {}

impl From<reqwest::Error> for OpenRouterError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network(error)
    }
}

impl From<JsonError> for OpenRouterError {
    fn from(error: JsonError) -> Self {
        Self::Serde(error)
    }
}

/// Maps a non-success status and response body onto the error taxonomy.
///
/// Each distinguishable status gets its own kind so callers can annotate the
/// transcript with targeted guidance instead of a bare status code.
pub fn classify_status(status: StatusCode, body: &str) -> OpenRouterError {
    let message = parse_error_message(status, body);

    match status.as_u16() {
        401 => OpenRouterError::InvalidApiKey(message),
        402 => OpenRouterError::InsufficientBalance(message),
        403 => OpenRouterError::Forbidden(message),
        404 => OpenRouterError::UnknownResource(message),
        429 => OpenRouterError::RateLimited(message),
        500.. => OpenRouterError::Upstream { status, message },
        _ => OpenRouterError::Status { status, message },
    }
}

/// Extracts a human-readable message from an error response body.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ErrorPayload>(body) {
        if let Some(message) = payload
            .value
            .and_then(|fields| fields.message)
            .filter(|message| !message.trim().is_empty())
        {
            return message;
        }
    }

    if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.to_string()
    }
}
