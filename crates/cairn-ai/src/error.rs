//! Error types for cairn-ai

use thiserror::Error;

/// Result type alias using cairn-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from a model backend, from the HTTP request to the decoded stream
#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error payload returned by the backend
    #[error("API error: {message} (type: {error_type})")]
    Api { error_type: String, message: String },

    /// HTTP 429
    #[error("Rate limited: retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    /// HTTP 401 or 403
    #[error("Invalid or missing API key")]
    InvalidApiKey,

    #[error("SSE error: {0}")]
    Sse(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The prompt does not fit the model
    #[error("Context overflow: {0}")]
    ContextOverflow(String),
}

impl Error {
    pub fn api(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            error_type: error_type.into(),
            message: message.into(),
        }
    }

    /// Build an error from a non-success HTTP status and its body.
    pub fn from_status(status: u16, body: &str) -> Self {
        if status == 429 {
            return Self::RateLimited { retry_after: None };
        }
        if status == 401 || status == 403 {
            return Self::InvalidApiKey;
        }

        #[derive(serde::Deserialize)]
        struct Envelope {
            error: Inner,
        }
        #[derive(serde::Deserialize)]
        struct Inner {
            #[serde(rename = "type", default)]
            error_type: Option<String>,
            message: String,
        }

        match serde_json::from_str::<Envelope>(body) {
            Ok(env) => Self::api(
                env.error.error_type.unwrap_or_else(|| status.to_string()),
                env.error.message,
            ),
            Err(_) => Self::api(status.to_string(), body.trim()),
        }
    }

    /// Whether opening the request again may succeed: transport failures,
    /// rate limits, overload and 5xx responses.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(_) | Error::RateLimited { .. } | Error::Sse(_) => true,
            Error::Api {
                error_type,
                message,
            } => {
                error_type.starts_with('5')
                    || mentions_any(error_type, TRANSIENT_MARKERS)
                    || mentions_any(message, TRANSIENT_MARKERS)
            }
            _ => false,
        }
    }

    /// Whether the backend rejected the request for being too large
    pub fn is_context_overflow(&self) -> bool {
        match self {
            Error::ContextOverflow(_) => true,
            Error::Api { message, .. } => mentions_any(message, OVERFLOW_MARKERS),
            _ => false,
        }
    }
}

/// Fragments backends use for transient failures
const TRANSIENT_MARKERS: &[&str] = &[
    "rate_limit",
    "rate limit",
    "overloaded",
    "too many requests",
];

/// Fragments backends use when the prompt exceeds the context window
const OVERFLOW_MARKERS: &[&str] = &[
    "too many tokens",
    "context length",
    "context window",
    "context_length_exceeded",
    "token limit",
    "prompt is too long",
    "request too large",
    "reduce the length",
    "input too long",
];

fn mentions_any(text: &str, markers: &[&str]) -> bool {
    let text = text.to_lowercase();
    markers.iter().any(|m| text.contains(m))
}
