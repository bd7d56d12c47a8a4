use serde::{Deserialize, Serialize};

use crate::payload::{ImagePayload, PayloadError, FALLBACK_MIME_TYPE};

/// Retry hint used when a rate-limit response carries none.
pub const DEFAULT_RETRY_DELAY: &str = "60s";

pub const GENERIC_FAILURE_MESSAGE: &str = "Transformation failed";

/// Body of the client → relay call: `{ "imageData": "data:image/...;base64,..." }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformRequest {
    pub image_data: String,
}

impl TransformRequest {
    pub fn new(image: &ImagePayload) -> Self {
        Self {
            image_data: image.to_data_url(),
        }
    }

    pub fn payload(&self, fallback_mime: &str) -> Result<ImagePayload, PayloadError> {
        ImagePayload::from_data_url(&self.image_data, fallback_mime)
    }
}

/// Outcome of one transform attempt.
///
/// Serializes to the relay's JSON envelope; the `success` flag is derived
/// from the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "WireResponse", from = "WireResponse")]
pub enum TransformResponse {
    Success {
        image: ImagePayload,
    },
    RateLimited {
        error: String,
        retry_delay: String,
        details: String,
    },
    Failure {
        error: String,
    },
}

impl TransformResponse {
    pub fn success(image: ImagePayload) -> Self {
        Self::Success { image }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    pub fn rate_limited(
        error: impl Into<String>,
        retry_delay: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self::RateLimited {
            error: error.into(),
            retry_delay: retry_delay.into(),
            details: details.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Success { .. } => 200,
            Self::RateLimited { .. } => 429,
            Self::Failure { .. } => 500,
        }
    }

    /// Interprets a relay HTTP reply.
    ///
    /// Never fails: unreadable bodies become `Failure`, and a 429 without a
    /// usable body still becomes `RateLimited` with the default hint.
    pub fn from_http(status: u16, body: &str) -> Self {
        let wire = serde_json::from_str::<WireResponse>(body).ok();
        if status == 429 {
            let wire = wire.unwrap_or_default();
            return Self::RateLimited {
                error: wire
                    .error
                    .filter(|value| !value.trim().is_empty())
                    .unwrap_or_else(|| "Rate limited".to_string()),
                retry_delay: wire
                    .retry_delay
                    .filter(|value| !value.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_RETRY_DELAY.to_string()),
                details: wire.details.unwrap_or_default(),
            };
        }
        match wire {
            Some(wire) => Self::from(wire),
            None if (200..300).contains(&status) => Self::failure(GENERIC_FAILURE_MESSAGE),
            None => Self::failure(format!("Relay request failed with HTTP {status}")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    #[serde(default)]
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retry_delay: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl From<TransformResponse> for WireResponse {
    fn from(response: TransformResponse) -> Self {
        match response {
            TransformResponse::Success { image } => Self {
                success: true,
                image_data: Some(image.to_data_url()),
                ..Self::default()
            },
            TransformResponse::RateLimited {
                error,
                retry_delay,
                details,
            } => Self {
                error: Some(error),
                retry_delay: Some(retry_delay),
                details: Some(details),
                ..Self::default()
            },
            TransformResponse::Failure { error } => Self {
                error: Some(error),
                ..Self::default()
            },
        }
    }
}

impl From<WireResponse> for TransformResponse {
    fn from(wire: WireResponse) -> Self {
        if wire.success {
            return match wire
                .image_data
                .as_deref()
                .map(|raw| ImagePayload::from_data_url(raw, FALLBACK_MIME_TYPE))
            {
                Some(Ok(image)) => Self::Success { image },
                Some(Err(err)) => Self::failure(format!("Relay returned an unreadable image: {err}")),
                None => Self::failure(GENERIC_FAILURE_MESSAGE),
            };
        }
        if let Some(retry_delay) = wire.retry_delay {
            return Self::RateLimited {
                error: wire.error.unwrap_or_else(|| "Rate limited".to_string()),
                retry_delay,
                details: wire.details.unwrap_or_default(),
            };
        }
        Self::failure(
            wire.error
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string()),
        )
    }
}
