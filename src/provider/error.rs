//! Provider error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Missing API key for {provider}. Set one of: {}", env_vars.join(", "))]
    MissingApiKey {
        provider: String,
        env_vars: Vec<String>,
    },

    #[error("Provider {0} needs a base_url in the config")]
    MissingBaseUrl(String),

    #[error("API error: {0}")]
    Api(String),

    /// Non-success HTTP response; `message` is the formatted body.
    #[error("API error: {message}")]
    Status { status: u16, message: String },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rate limited, retry after {retry_after:?}s")]
    RateLimited { retry_after: Option<u64> },

    #[error("Model returned an empty response")]
    EmptyResponse,

    #[error("Cancelled")]
    Cancelled,
}

impl Error {
    /// Server-requested retry delay, if any.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Error::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Make an API error body readable by pulling the message out of its JSON.
///
/// `HTTP 401: {"error":{"message":"bad key","code":"invalid_api_key"}}`
/// becomes `HTTP 401: bad key (code: invalid_api_key)`. Anything that isn't
/// recognisable JSON is returned unchanged.
#[must_use]
pub fn format_api_error(error: &str) -> String {
    let Some(json_start) = error.find('{') else {
        return error.to_string();
    };

    let Ok(json) = serde_json::from_str::<serde_json::Value>(&error[json_start..]) else {
        return error.to_string();
    };

    let Some(msg) = extract_error_message(&json) else {
        return error.to_string();
    };

    let prefix = error[..json_start].trim();
    if prefix.is_empty() {
        msg
    } else {
        format!("{prefix} {msg}")
    }
}

fn extract_error_message(json: &serde_json::Value) -> Option<String> {
    if let Some(error_obj) = json.get("error") {
        if let Some(msg) = error_obj.get("message").and_then(|v| v.as_str()) {
            return Some(match error_obj.get("code").and_then(|v| v.as_str()) {
                Some(code) => format!("{msg} (code: {code})"),
                None => msg.to_string(),
            });
        }
        if let Some(msg) = error_obj.as_str() {
            return Some(msg.to_string());
        }
    }

    json.get("message")
        .and_then(|v| v.as_str())
        .map(String::from)
}
