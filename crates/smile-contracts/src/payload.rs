use std::fmt;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use thiserror::Error;

/// MIME type assumed when a payload carries no usable `data:` annotation.
pub const FALLBACK_MIME_TYPE: &str = "image/jpeg";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("image payload is empty")]
    Empty,
    #[error("image payload is not valid base64: {0}")]
    InvalidBase64(String),
}

/// Image bytes plus the MIME type they were declared with.
///
/// On the wire this travels as a data URL (`data:image/png;base64,...`).
#[derive(Clone, PartialEq, Eq)]
pub struct ImagePayload {
    mime_type: String,
    bytes: Vec<u8>,
}

impl ImagePayload {
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    /// Base64 body without the `data:` annotation.
    pub fn base64_data(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64_data())
    }

    /// Decodes a data URL, or a bare base64 body.
    ///
    /// A missing or unrecognised annotation falls back to `fallback_mime`; the
    /// annotation is stripped either way before the body is decoded.
    pub fn from_data_url(raw: &str, fallback_mime: &str) -> Result<Self, PayloadError> {
        let (mime, body) = split_data_url(raw);
        let body = body.trim();
        if body.is_empty() {
            return Err(PayloadError::Empty);
        }
        let bytes = BASE64
            .decode(body.as_bytes())
            .map_err(|err| PayloadError::InvalidBase64(err.to_string()))?;
        if bytes.is_empty() {
            return Err(PayloadError::Empty);
        }
        Ok(Self {
            mime_type: mime.unwrap_or(fallback_mime).to_string(),
            bytes,
        })
    }
}

impl fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImagePayload")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Splits `data:<mime>;base64,<body>` into its image MIME (when recognised)
/// and the body.
pub fn split_data_url(raw: &str) -> (Option<&str>, &str) {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("data:") else {
        return (None, trimmed);
    };
    let Some((meta, body)) = rest.split_once(',') else {
        return (None, trimmed);
    };
    let mime = meta
        .strip_suffix(";base64")
        .map(str::trim)
        .filter(|mime| is_image_mime(mime));
    (mime, body)
}

/// `image/<subtype>` where the subtype is `[A-Za-z0-9.+-]+`.
pub fn is_image_mime(mime: &str) -> bool {
    let Some(subtype) = mime.strip_prefix("image/") else {
        return false;
    };
    !subtype.is_empty()
        && subtype
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '.' | '+' | '-'))
}

pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext.trim().to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    path.extension()
        .and_then(|value| value.to_str())
        .and_then(mime_for_extension)
}

pub fn extension_for_mime(mime: &str) -> &'static str {
    let lowered = mime.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    if lowered.contains("gif") {
        return "gif";
    }
    "png"
}
