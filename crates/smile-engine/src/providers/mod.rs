use anyhow::Result;
use serde_json::Value;
use smile_contracts::ImagePayload;

use crate::config::{ApiKey, ProviderProfile};
use crate::transport::{InboundResponse, OutboundRequest};

mod gemini;
mod openai;

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

/// One image-editing backend: how to ask it for an edit and how to read its
/// answer. Network I/O stays in the `Transport`.
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Human-facing name used in error envelopes ("Gemini API error: ...").
    fn display_name(&self) -> &str;

    /// Env var named in the missing-credential error.
    fn credential_env(&self) -> &str;

    fn profile(&self) -> &ProviderProfile;

    fn build_request(&self, api_key: &ApiKey, image: &ImagePayload) -> Result<OutboundRequest>;

    /// Retry hint carried by a 429 reply, if the provider sent one.
    fn retry_delay(&self, response: &InboundResponse) -> Option<String>;

    /// First image in a successful reply. `Ok(None)` when the reply is
    /// well-formed but carries no image.
    fn extract_image(&self, payload: &Value) -> Result<Option<ImagePayload>>;
}
