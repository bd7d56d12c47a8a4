use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;
use smile_contracts::payload::extension_for_mime;
use smile_contracts::ImagePayload;

use super::ImageProvider;
use crate::config::{ApiKey, ProviderKind, ProviderProfile};
use crate::transport::{Credential, FormPart, InboundResponse, OutboundBody, OutboundRequest};

#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    profile: ProviderProfile,
}

impl OpenAiProvider {
    pub fn new(profile: ProviderProfile) -> Self {
        Self { profile }
    }

    fn endpoint(&self) -> String {
        format!("{}/images/edits", self.profile.api_base.trim_end_matches('/'))
    }

    fn is_gpt_image_model(&self) -> bool {
        self.profile
            .model
            .trim()
            .to_ascii_lowercase()
            .starts_with("gpt-image")
    }
}

impl Default for OpenAiProvider {
    fn default() -> Self {
        Self::new(ProviderProfile::defaults(ProviderKind::OpenAi))
    }
}

fn text(name: &str, value: impl Into<String>) -> FormPart {
    FormPart::Text {
        name: name.to_string(),
        value: value.into(),
    }
}

impl ImageProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn display_name(&self) -> &str {
        "OpenAI"
    }

    fn credential_env(&self) -> &str {
        "OPENAI_API_KEY"
    }

    fn profile(&self) -> &ProviderProfile {
        &self.profile
    }

    fn build_request(&self, api_key: &ApiKey, image: &ImagePayload) -> Result<OutboundRequest> {
        let mut parts = vec![
            text("model", self.profile.model.trim()),
            text("prompt", self.profile.prompt.clone()),
            text("n", "1"),
        ];
        if self.is_gpt_image_model() {
            parts.push(text("size", "auto"));
            parts.push(text("input_fidelity", "high"));
        } else {
            parts.push(text("size", "1024x1024"));
            parts.push(text("response_format", "b64_json"));
        }
        for (key, value) in &self.profile.generation_config {
            let value = match value {
                Value::String(raw) => raw.clone(),
                other => other.to_string(),
            };
            parts.retain(|part| !matches!(part, FormPart::Text { name, .. } if name == key));
            parts.push(text(key, value));
        }
        parts.push(FormPart::File {
            name: "image[]".to_string(),
            file_name: format!("input.{}", extension_for_mime(image.mime_type())),
            mime_type: image.mime_type().to_string(),
            bytes: image.bytes().to_vec(),
        });

        Ok(OutboundRequest {
            url: self.endpoint(),
            credential: Credential::Bearer(api_key.clone()),
            body: OutboundBody::Multipart(parts),
        })
    }

    fn retry_delay(&self, response: &InboundResponse) -> Option<String> {
        if let Some(raw) = response
            .header("retry-after")
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            match raw.parse::<f64>() {
                Ok(secs) if secs.is_finite() && secs >= 0.0 => {
                    return Some(format!("{}s", secs.ceil() as u64));
                }
                Ok(_) => {}
                Err(_) => return Some(raw.to_string()),
            }
        }
        response
            .header("x-ratelimit-reset-requests")
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    fn extract_image(&self, payload: &Value) -> Result<Option<ImagePayload>> {
        let Some(data) = payload
            .get("data")
            .and_then(Value::as_array)
            .and_then(|items| {
                items.iter().find_map(|item| {
                    item.get("b64_json")
                        .and_then(Value::as_str)
                        .filter(|data| !data.is_empty())
                })
            })
        else {
            return Ok(None);
        };
        let bytes = BASE64
            .decode(data.as_bytes())
            .context("OpenAI image base64 decode failed")?;
        let mime_type = match payload
            .get("output_format")
            .and_then(Value::as_str)
            .map(|format| format.trim().to_ascii_lowercase())
            .as_deref()
        {
            Some("jpeg" | "jpg") => "image/jpeg",
            Some("webp") => "image/webp",
            _ => "image/png",
        };
        Ok(Some(ImagePayload::new(mime_type, bytes)))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn field<'a>(parts: &'a [FormPart], wanted: &str) -> Option<&'a str> {
        parts.iter().find_map(|part| match part {
            FormPart::Text { name, value } if name == wanted => Some(value.as_str()),
            _ => None,
        })
    }

    #[test]
    fn gpt_image_edit_is_multipart_with_high_fidelity() -> anyhow::Result<()> {
        let provider = OpenAiProvider::default();
        let key = ApiKey::new("sk-test").context("key")?;
        let image = ImagePayload::new("image/jpeg", vec![0xFF, 0xD8, 0xFF]);
        let request = provider.build_request(&key, &image)?;

        assert_eq!(request.url, "https://api.openai.com/v1/images/edits");
        assert!(matches!(request.credential, Credential::Bearer(_)));
        let OutboundBody::Multipart(parts) = &request.body else {
            anyhow::bail!("expected multipart body");
        };
        assert_eq!(field(parts, "model"), Some("gpt-image-1"));
        assert_eq!(field(parts, "n"), Some("1"));
        assert_eq!(field(parts, "size"), Some("auto"));
        assert_eq!(field(parts, "input_fidelity"), Some("high"));
        assert_eq!(field(parts, "response_format"), None);
        let file = parts.iter().find_map(|part| match part {
            FormPart::File {
                name,
                file_name,
                mime_type,
                ..
            } => Some((name.as_str(), file_name.as_str(), mime_type.as_str())),
            _ => None,
        });
        assert_eq!(file, Some(("image[]", "input.jpg", "image/jpeg")));
        Ok(())
    }

    #[test]
    fn dall_e_asks_for_base64_output() -> anyhow::Result<()> {
        let mut profile = ProviderProfile::defaults(ProviderKind::OpenAi);
        profile.model = "dall-e-2".to_string();
        let provider = OpenAiProvider::new(profile);
        let key = ApiKey::new("sk-test").context("key")?;
        let request = provider.build_request(&key, &ImagePayload::new("image/png", vec![1]))?;
        let OutboundBody::Multipart(parts) = &request.body else {
            anyhow::bail!("expected multipart body");
        };
        assert_eq!(field(parts, "response_format"), Some("b64_json"));
        assert_eq!(field(parts, "size"), Some("1024x1024"));
        assert_eq!(field(parts, "input_fidelity"), None);
        Ok(())
    }

    #[test]
    fn retry_delay_prefers_retry_after() {
        let provider = OpenAiProvider::default();
        let response = InboundResponse::new(429, "{}")
            .with_header("Retry-After", "20")
            .with_header("x-ratelimit-reset-requests", "1m3s");
        assert_eq!(provider.retry_delay(&response), Some("20s".to_string()));

        let response =
            InboundResponse::new(429, "{}").with_header("x-ratelimit-reset-requests", "1m3s");
        assert_eq!(provider.retry_delay(&response), Some("1m3s".to_string()));

        assert_eq!(provider.retry_delay(&InboundResponse::new(429, "")), None);
    }

    #[test]
    fn unusable_retry_after_falls_through() {
        let provider = OpenAiProvider::default();
        let response = InboundResponse::new(429, "{}")
            .with_header("retry-after", "-5")
            .with_header("x-ratelimit-reset-requests", "2s");
        assert_eq!(provider.retry_delay(&response), Some("2s".to_string()));

        let response = InboundResponse::new(429, "{}").with_header("retry-after", "NaN");
        assert_eq!(provider.retry_delay(&response), None);

        let response = InboundResponse::new(429, "{}").with_header("retry-after", "1.2");
        assert_eq!(provider.retry_delay(&response), Some("2s".to_string()));
    }

    #[test]
    fn extract_image_reads_first_b64_item() -> anyhow::Result<()> {
        let provider = OpenAiProvider::default();
        let payload = json!({
            "created": 1,
            "output_format": "webp",
            "data": [{ "b64_json": "QUJDRA==" }, { "b64_json": "WFla" }]
        });
        let image = provider.extract_image(&payload)?.context("image")?;
        assert_eq!(image.mime_type(), "image/webp");
        assert_eq!(image.bytes(), b"ABCD");

        let url_only = json!({ "data": [{ "url": "https://example.test/a.png" }] });
        assert!(provider.extract_image(&url_only)?.is_none());
        assert!(provider.extract_image(&json!({ "data": [] }))?.is_none());
        Ok(())
    }

    #[test]
    fn extract_image_skips_items_without_bytes() -> anyhow::Result<()> {
        let provider = OpenAiProvider::default();
        let payload = json!({
            "data": [
                { "url": "https://example.test/a.png" },
                { "b64_json": "" },
                { "b64_json": "QUJDRA==" }
            ]
        });
        let image = provider.extract_image(&payload)?.context("image")?;
        assert_eq!(image.bytes(), b"ABCD");
        assert_eq!(image.mime_type(), "image/png");
        Ok(())
    }
}
