use smile_contracts::TransformResponse;
use thiserror::Error;

/// Every way a transform can go wrong, resolved into an envelope at the
/// relay boundary.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Missing or malformed request body.
    #[error("{0}")]
    InvalidInput(String),

    /// Provider credential absent.
    #[error("{0}")]
    Configuration(String),

    #[error("{message}")]
    RateLimited {
        message: String,
        retry_delay: String,
        details: String,
    },

    /// Non-success provider status, or a successful reply without an image.
    #[error("{0}")]
    Provider(String),

    /// Network or decode failure talking to the provider.
    #[error("{0}")]
    Transport(String),
}

impl RelayError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::Configuration(_) => "configuration",
            Self::RateLimited { .. } => "rate_limited",
            Self::Provider(_) => "provider",
            Self::Transport(_) => "transport",
        }
    }

    pub fn transport(err: &anyhow::Error) -> Self {
        Self::Transport(error_chain_text(err, usize::MAX))
    }
}

impl From<RelayError> for TransformResponse {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::RateLimited {
                message,
                retry_delay,
                details,
            } => TransformResponse::rate_limited(message, retry_delay, details),
            other => TransformResponse::failure(other.to_string()),
        }
    }
}

/// Flattens an error chain into one line, skipping repeated causes.
pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
