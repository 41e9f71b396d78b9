use crate::config::OpenRouterConfig;
use crate::error::OpenRouterError;

/// Builds outgoing header pairs for an OpenRouter request.
///
/// `Content-Type` is owned by the JSON body builder and deliberately absent
/// here.
pub fn build_headers(
    config: &OpenRouterConfig,
    user_agent: Option<&str>,
) -> Result<Vec<(String, String)>, OpenRouterError> {
    let api_key = config.api_key.trim();
    if api_key.is_empty() {
        return Err(OpenRouterError::MissingApiKey);
    }

    let mut headers = vec![("Authorization".to_string(), format!("Bearer {api_key}"))];

    if let Some(referer) = config
        .referer
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        headers.push(("HTTP-Referer".to_string(), referer.to_string()));
    }

    if let Some(user_agent) = user_agent.map(str::trim).filter(|value| !value.is_empty()) {
        headers.push(("User-Agent".to_string(), user_agent.to_string()));
    }

    Ok(headers)
}
