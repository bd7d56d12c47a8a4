use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use crate::config::ApiKey;

/// How the provider credential travels.
#[derive(Debug, Clone)]
pub enum Credential {
    Header { name: &'static str, key: ApiKey },
    Bearer(ApiKey),
}

#[derive(Debug, Clone)]
pub enum FormPart {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime_type: String,
        bytes: Vec<u8>,
    },
}

#[derive(Debug, Clone)]
pub enum OutboundBody {
    Json(Value),
    Multipart(Vec<FormPart>),
}

/// A fully-built provider call, independent of the HTTP client.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: String,
    pub credential: Credential,
    pub body: OutboundBody,
}

impl OutboundRequest {
    /// Log-safe rendition: image bytes and base64 bodies replaced by sizes,
    /// credentials omitted.
    pub fn loggable(&self) -> Value {
        let body = match &self.body {
            OutboundBody::Json(value) => redact_payload(value),
            OutboundBody::Multipart(parts) => Value::Array(
                parts
                    .iter()
                    .map(|part| match part {
                        FormPart::Text { name, value } => json!({ "field": name, "value": value }),
                        FormPart::File {
                            name,
                            file_name,
                            mime_type,
                            bytes,
                        } => json!({
                            "field": name,
                            "file_name": file_name,
                            "mime_type": mime_type,
                            "bytes": bytes.len(),
                        }),
                    })
                    .collect(),
            ),
        };
        json!({ "url": self.url, "body": body })
    }
}

/// Provider reply as seen by the relay. Header names are lowercased.
#[derive(Debug, Clone, Default)]
pub struct InboundResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl InboundResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound HTTP seam. Errors mean the exchange never produced a status.
pub trait Transport: Send + Sync {
    fn send(&self, request: &OutboundRequest) -> Result<InboundResponse>;
}

/// Blocking reqwest transport. Must be driven from a blocking context.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    timeout: Option<Duration>,
}

impl HttpTransport {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &OutboundRequest) -> Result<InboundResponse> {
        let http = HttpClient::builder()
            .timeout(self.timeout)
            .build()
            .context("failed to build HTTP client")?;

        let mut builder = http.post(&request.url);
        builder = match &request.credential {
            Credential::Header { name, key } => builder.header(*name, key.expose()),
            Credential::Bearer(key) => builder.bearer_auth(key.expose()),
        };
        builder = match &request.body {
            OutboundBody::Json(payload) => builder.json(payload),
            OutboundBody::Multipart(parts) => builder.multipart(build_form(parts)?),
        };

        let response = builder
            .send()
            .with_context(|| format!("provider request failed ({})", request.url))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect();
        let body = response
            .text()
            .context("failed reading provider response body")?;
        Ok(InboundResponse {
            status,
            headers,
            body,
        })
    }
}

fn build_form(parts: &[FormPart]) -> Result<MultipartForm> {
    let mut form = MultipartForm::new();
    for part in parts {
        form = match part {
            FormPart::Text { name, value } => form.text(name.clone(), value.clone()),
            FormPart::File {
                name,
                file_name,
                mime_type,
                bytes,
            } => {
                let file = MultipartPart::bytes(bytes.clone())
                    .file_name(file_name.clone())
                    .mime_str(mime_type)
                    .with_context(|| format!("invalid mime '{mime_type}' for {file_name}"))?;
                form.part(name.clone(), file)
            }
        };
    }
    Ok(form)
}

/// Copies a JSON payload, replacing `data` and `b64_json` strings with a
/// length marker.
pub fn redact_payload(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, inner) in map {
                let redacted = match (key.as_str(), inner) {
                    ("data" | "b64_json", Value::String(text)) => {
                        Value::String(format!("<{} base64 chars>", text.len()))
                    }
                    _ => redact_payload(inner),
                };
                out.insert(key.clone(), redacted);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_payload).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_payload_hides_inline_images() {
        let payload = json!({
            "contents": [{
                "parts": [
                    { "text": "keep me" },
                    { "inline_data": { "mime_type": "image/png", "data": "QUJDRA==" } }
                ]
            }]
        });
        let redacted = redact_payload(&payload);
        let parts = &redacted["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], json!("keep me"));
        assert_eq!(parts[1]["inline_data"]["data"], json!("<8 base64 chars>"));
        assert_eq!(parts[1]["inline_data"]["mime_type"], json!("image/png"));
    }

    #[test]
    fn loggable_omits_credentials_and_bytes() -> anyhow::Result<()> {
        let key = ApiKey::new("sk-secret").context("key")?;
        let request = OutboundRequest {
            url: "https://api.example.test/v1/images/edits".to_string(),
            credential: Credential::Bearer(key),
            body: OutboundBody::Multipart(vec![
                FormPart::Text {
                    name: "model".to_string(),
                    value: "gpt-image-1".to_string(),
                },
                FormPart::File {
                    name: "image[]".to_string(),
                    file_name: "input.png".to_string(),
                    mime_type: "image/png".to_string(),
                    bytes: vec![0; 42],
                },
            ]),
        };
        let rendered = request.loggable().to_string();
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("\"bytes\":42"));
        Ok(())
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let response = InboundResponse::new(429, "{}").with_header("Retry-After", "12");
        assert_eq!(response.header("retry-after"), Some("12"));
        assert_eq!(response.header("RETRY-AFTER"), Some("12"));
        assert!(!response.is_success());
    }
}
