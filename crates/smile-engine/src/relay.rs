use serde_json::Value;
use smile_contracts::{ImagePayload, RelayClient, TransformRequest, TransformResponse};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ApiKey, RelayConfig};
use crate::error::{truncate_text, RelayError};
use crate::providers::ImageProvider;
use crate::transport::{HttpTransport, Transport};

const LOG_TEXT_LIMIT: usize = 512;
pub const MISSING_IMAGE_MESSAGE: &str = "Missing imageData in request body";

/// Stateless translator between the `{ imageData }` contract and one
/// provider's native API.
pub struct Relay<P, T = HttpTransport> {
    provider: P,
    transport: T,
    api_key: Option<ApiKey>,
}

impl<P: ImageProvider> Relay<P, HttpTransport> {
    pub fn with_http(provider: P, config: &RelayConfig) -> Self {
        Self::new(
            provider,
            HttpTransport::new(config.provider_timeout),
            config.api_key.clone(),
        )
    }
}

impl<P, T> Relay<P, T>
where
    P: ImageProvider,
    T: Transport,
{
    pub fn new(provider: P, transport: T, api_key: Option<ApiKey>) -> Self {
        Self {
            provider,
            transport,
            api_key,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Entry point for a raw HTTP body. Never fails.
    pub fn handle_body(&self, body: &[u8]) -> TransformResponse {
        let parsed: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(err) => {
                return self.finish(
                    &new_request_id(),
                    Err(RelayError::InvalidInput(format!(
                        "Invalid JSON request body: {err}"
                    ))),
                );
            }
        };
        let image_data = parsed.get("imageData").and_then(Value::as_str);
        let request_id = new_request_id();
        let outcome = self.run(&request_id, image_data);
        self.finish(&request_id, outcome)
    }

    pub fn transform(&self, request: &TransformRequest) -> TransformResponse {
        let request_id = new_request_id();
        let outcome = self.run(&request_id, Some(&request.image_data));
        self.finish(&request_id, outcome)
    }

    fn run(&self, request_id: &str, image_data: Option<&str>) -> Result<ImagePayload, RelayError> {
        let provider = self.provider.display_name();
        let image_data = image_data
            .filter(|raw| !raw.trim().is_empty())
            .ok_or_else(|| RelayError::InvalidInput(MISSING_IMAGE_MESSAGE.to_string()))?;

        let api_key = self.api_key.as_ref().ok_or_else(|| {
            RelayError::Configuration(format!(
                "{} not configured",
                self.provider.credential_env()
            ))
        })?;

        let profile = self.provider.profile();
        let image = ImagePayload::from_data_url(image_data, &profile.fallback_mime)
            .map_err(|err| RelayError::InvalidInput(format!("Invalid imageData: {err}")))?;
        let image = reconcile_mime(image);

        info!(
            request_id,
            provider = self.provider.name(),
            model = %profile.model,
            mime = image.mime_type(),
            bytes = image.len(),
            key = %api_key.fingerprint(),
            "starting teeth transformation"
        );

        let outbound = self
            .provider
            .build_request(api_key, &image)
            .map_err(|err| RelayError::transport(&err))?;
        debug!(request_id, request = %outbound.loggable(), "provider request");

        let response = self
            .transport
            .send(&outbound)
            .map_err(|err| RelayError::transport(&err))?;
        debug!(request_id, status = response.status, "provider replied");

        if response.status == 429 {
            let retry_delay = self
                .provider
                .retry_delay(&response)
                .unwrap_or_else(|| smile_contracts::DEFAULT_RETRY_DELAY.to_string());
            return Err(RelayError::RateLimited {
                message: format!("Rate limited by {provider} API"),
                retry_delay,
                details: response.body,
            });
        }
        if !response.is_success() {
            return Err(RelayError::Provider(format!(
                "{provider} API error: {} - {}",
                response.status, response.body
            )));
        }

        let payload: Value = serde_json::from_str(&response.body).map_err(|err| {
            RelayError::Transport(format!("{provider} returned invalid JSON payload: {err}"))
        })?;
        if let Some(model_version) = payload.get("modelVersion").and_then(Value::as_str) {
            info!(request_id, model_version, "provider response received");
        }

        match self
            .provider
            .extract_image(&payload)
            .map_err(|err| RelayError::transport(&err))?
        {
            Some(image) => Ok(image),
            None => {
                warn!(
                    request_id,
                    response = %truncate_text(&payload.to_string(), LOG_TEXT_LIMIT),
                    "no image data in provider response"
                );
                Err(RelayError::Provider(format!(
                    "No transformed image returned from {provider}"
                )))
            }
        }
    }

    fn finish(
        &self,
        request_id: &str,
        outcome: Result<ImagePayload, RelayError>,
    ) -> TransformResponse {
        match outcome {
            Ok(image) => {
                info!(
                    request_id,
                    provider = self.provider.name(),
                    mime = image.mime_type(),
                    bytes = image.len(),
                    "transformed image returned"
                );
                TransformResponse::success(image)
            }
            Err(err) => {
                let message = truncate_text(&err.to_string(), LOG_TEXT_LIMIT);
                match &err {
                    RelayError::RateLimited { retry_delay, .. } => warn!(
                        request_id,
                        provider = self.provider.name(),
                        code = err.code(),
                        retry_delay = %retry_delay,
                        "{message}"
                    ),
                    _ => warn!(
                        request_id,
                        provider = self.provider.name(),
                        code = err.code(),
                        "{message}"
                    ),
                }
                err.into()
            }
        }
    }
}

impl<P, T> RelayClient for Relay<P, T>
where
    P: ImageProvider,
    T: Transport,
{
    fn transform(&self, request: &TransformRequest) -> TransformResponse {
        Relay::transform(self, request)
    }
}

/// Replaces a declared MIME that contradicts the bytes' magic number.
/// Formats the sniffer does not know keep their declared type.
fn reconcile_mime(image: ImagePayload) -> ImagePayload {
    let Ok(format) = image::guess_format(image.bytes()) else {
        return image;
    };
    let sniffed = format.to_mime_type();
    if sniffed.eq_ignore_ascii_case(image.mime_type()) {
        return image;
    }
    debug!(
        declared = image.mime_type(),
        sniffed, "declared MIME does not match image bytes"
    );
    image.with_mime_type(sniffed)
}

fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}
