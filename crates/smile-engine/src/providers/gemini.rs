use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use smile_contracts::ImagePayload;

use super::ImageProvider;
use crate::config::{ApiKey, ProviderKind, ProviderProfile};
use crate::transport::{Credential, InboundResponse, OutboundBody, OutboundRequest};

const RETRY_INFO_TYPE: &str = "type.googleapis.com/google.rpc.RetryInfo";

#[derive(Debug, Clone)]
pub struct GeminiProvider {
    profile: ProviderProfile,
}

impl GeminiProvider {
    pub fn new(profile: ProviderProfile) -> Self {
        Self { profile }
    }

    fn endpoint(&self) -> String {
        let trimmed = self.profile.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!(
            "{}/{}:generateContent",
            self.profile.api_base.trim_end_matches('/'),
            model_path
        )
    }
}

impl Default for GeminiProvider {
    fn default() -> Self {
        Self::new(ProviderProfile::defaults(ProviderKind::Gemini))
    }
}

impl ImageProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn display_name(&self) -> &str {
        "Gemini"
    }

    fn credential_env(&self) -> &str {
        "GEMINI_API_KEY"
    }

    fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    fn build_request(&self, api_key: &ApiKey, image: &ImagePayload) -> Result<OutboundRequest> {
        let mut payload = json!({
            "contents": [{
                "parts": [
                    { "text": self.profile.prompt },
                    {
                        "inline_data": {
                            "mime_type": image.mime_type(),
                            "data": image.base64_data(),
                        }
                    }
                ]
            }]
        });
        if !self.profile.generation_config.is_empty() {
            payload["generationConfig"] = Value::Object(self.profile.generation_config.clone());
        }
        Ok(OutboundRequest {
            url: self.endpoint(),
            credential: Credential::Header {
                name: "x-goog-api-key",
                key: api_key.clone(),
            },
            body: OutboundBody::Json(payload),
        })
    }

    fn retry_delay(&self, response: &InboundResponse) -> Option<String> {
        let payload: Value = serde_json::from_str(&response.body).ok()?;
        payload
            .get("error")?
            .get("details")?
            .as_array()?
            .iter()
            .filter(|detail| detail.get("@type").and_then(Value::as_str) == Some(RETRY_INFO_TYPE))
            .find_map(|detail| detail.get("retryDelay").and_then(Value::as_str))
            .map(str::trim)
            .filter(|delay| !delay.is_empty())
            .map(str::to_string)
    }

    fn extract_image(&self, payload: &Value) -> Result<Option<ImagePayload>> {
        let parts = payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array);
        let Some(parts) = parts else {
            return Ok(None);
        };

        for part in parts {
            let Some(inline) = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
            else {
                continue;
            };
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let bytes = BASE64
                .decode(data.as_bytes())
                .context("Gemini image base64 decode failed")?;
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .filter(|mime| !mime.trim().is_empty())
                .unwrap_or("image/png");
            return Ok(Some(ImagePayload::new(mime_type, bytes)));
        }
        Ok(None)
    }
}
