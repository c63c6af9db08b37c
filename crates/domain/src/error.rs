/// Shared error type used across all MiroFlow crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    /// The provider signalled that the prompt exceeds the model's window.
    /// This is the only error class the agent loop recovers from by
    /// rolling back history; it must never be retried.
    #[error("context limit exceeded: {0}")]
    ContextLimit(String),

    /// The task was cancelled from the outside. Propagates immediately
    /// through retries and pending tool calls.
    #[error("cancelled")]
    Cancelled,

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a transient retry may help. Context-limit and cancellation
    /// must surface immediately; everything else gets the backoff loop.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::ContextLimit(_) | Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Provider error strings that mean "the prompt does not fit".
///
/// Collected from the providers the runtime has been run against; matched
/// as substrings of the raw error body.
const CONTEXT_LIMIT_MARKERS: &[&str] = &[
    "Input is too long for requested model",
    "input length and `max_tokens` exceed context limit",
    "maximum context length",
    "prompt is too long",
];

/// Classify a raw provider error message: context-limit errors become
/// [`Error::ContextLimit`], everything else the caller's fallback.
pub fn classify_provider_error(provider: &str, message: String) -> Error {
    if CONTEXT_LIMIT_MARKERS.iter().any(|m| message.contains(m)) {
        Error::ContextLimit(message)
    } else {
        Error::Provider {
            provider: provider.to_string(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_limit_marker_is_classified() {
        let err = classify_provider_error(
            "openrouter",
            "HTTP 400 - Input is too long for requested model".into(),
        );
        assert!(matches!(err, Error::ContextLimit(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn max_context_length_marker_is_classified() {
        let err = classify_provider_error(
            "openai",
            "This model's maximum context length is 128000 tokens".into(),
        );
        assert!(matches!(err, Error::ContextLimit(_)));
    }

    #[test]
    fn plain_error_stays_provider_error() {
        let err = classify_provider_error("openai", "HTTP 500 - internal error".into());
        assert!(matches!(err, Error::Provider { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn cancelled_is_not_retryable() {
        assert!(!Error::Cancelled.is_retryable());
    }
}
