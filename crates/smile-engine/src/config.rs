use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

pub const DEFAULT_BIND: &str = "0.0.0.0:8787";
pub const DEFAULT_MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

pub const TEETH_PROMPT: &str = "Transform this person's teeth to be perfectly beautiful, naturally white, and symmetrical. Make the teeth look healthy and professionally whitened while keeping the smile natural and the rest of the face unchanged.";

/// Which provider this deployment talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Gemini,
    OpenAi,
}

impl ProviderKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
        }
    }

    /// Env vars consulted for the credential, in priority order.
    pub fn credential_envs(self) -> &'static [&'static str] {
        match self {
            Self::Gemini => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
            Self::OpenAi => &["OPENAI_API_KEY"],
        }
    }

    pub fn from_env() -> Result<Self> {
        match non_empty_env("SMILE_PROVIDER") {
            Some(raw) => raw.parse(),
            None => Ok(Self::Gemini),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "openai" | "open-ai" => Ok(Self::OpenAi),
            other => bail!("unknown provider '{other}' (expected gemini or openai)"),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Server-held provider credential. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Short SHA-256 prefix, safe for logs.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(&digest[..6])
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey(sha256:{})", self.fingerprint())
    }
}

/// Per-deployment request shape: endpoint, model, instruction, fallback MIME
/// and sampling parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderProfile {
    pub api_base: String,
    pub model: String,
    pub prompt: String,
    pub fallback_mime: String,
    pub generation_config: Map<String, Value>,
}

impl ProviderProfile {
    pub fn defaults(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Gemini => Self {
                api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
                model: "gemini-2.5-flash-image".to_string(),
                prompt: TEETH_PROMPT.to_string(),
                fallback_mime: "image/jpeg".to_string(),
                generation_config: map_object(json!({
                    "temperature": 0.4,
                    "topP": 0.95,
                    "topK": 32,
                    "responseModalities": ["TEXT", "IMAGE"],
                })),
            },
            ProviderKind::OpenAi => Self {
                api_base: "https://api.openai.com/v1".to_string(),
                model: "gpt-image-1".to_string(),
                prompt: TEETH_PROMPT.to_string(),
                fallback_mime: "image/jpeg".to_string(),
                generation_config: Map::new(),
            },
        }
    }
}

/// Everything the relay needs, resolved once at start-up.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub provider: ProviderKind,
    pub profile: ProviderProfile,
    pub api_key: Option<ApiKey>,
    pub provider_timeout: Option<Duration>,
}

impl RelayConfig {
    pub fn from_env(provider: ProviderKind) -> Result<Self> {
        Self::from_lookup(provider, non_empty_env)
    }

    pub fn from_lookup<F>(provider: ProviderKind, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut profile = ProviderProfile::defaults(provider);
        let (base_key, model_key) = match provider {
            ProviderKind::Gemini => ("GEMINI_API_BASE", "GEMINI_IMAGE_MODEL"),
            ProviderKind::OpenAi => ("OPENAI_API_BASE", "OPENAI_IMAGE_MODEL"),
        };
        if let Some(base) = lookup(base_key) {
            let base = base.trim().trim_end_matches('/').to_string();
            if !base.is_empty() {
                profile.api_base = base;
            }
        }
        if let Some(model) = lookup(model_key) {
            profile.model = model.trim().to_string();
        }

        let api_key = provider
            .credential_envs()
            .iter()
            .find_map(|key| lookup(key).and_then(ApiKey::new));

        let provider_timeout = match lookup("SMILE_PROVIDER_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: f64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid SMILE_PROVIDER_TIMEOUT_SECS '{raw}'"))?;
                if !secs.is_finite() || secs <= 0.0 {
                    bail!("SMILE_PROVIDER_TIMEOUT_SECS must be positive, got '{raw}'");
                }
                let timeout = Duration::try_from_secs_f64(secs).with_context(|| {
                    format!("SMILE_PROVIDER_TIMEOUT_SECS out of range, got '{raw}'")
                })?;
                Some(timeout)
            }
            None => None,
        };

        Ok(Self {
            provider,
            profile,
            api_key,
            provider_timeout,
        })
    }
}

/// Listener settings for `smile-rs serve`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: String,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(non_empty_env)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(bind) = lookup("SMILE_BIND") {
            config.bind = bind;
        }
        if let Some(raw) = lookup("SMILE_MAX_BODY_BYTES") {
            config.max_body_bytes = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid SMILE_MAX_BODY_BYTES '{raw}'"))?;
        }
        Ok(config)
    }
}

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn provider_kind_parses_aliases() -> anyhow::Result<()> {
        assert_eq!("Gemini".parse::<ProviderKind>()?, ProviderKind::Gemini);
        assert_eq!(" openai ".parse::<ProviderKind>()?, ProviderKind::OpenAi);
        assert!("stability".parse::<ProviderKind>().is_err());
        Ok(())
    }

    #[test]
    fn gemini_falls_back_to_google_api_key() -> anyhow::Result<()> {
        let config = RelayConfig::from_lookup(
            ProviderKind::Gemini,
            lookup_from(&[("GOOGLE_API_KEY", "g-key")]),
        )?;
        assert_eq!(config.api_key.as_ref().map(ApiKey::expose), Some("g-key"));

        let config = RelayConfig::from_lookup(
            ProviderKind::Gemini,
            lookup_from(&[("GEMINI_API_KEY", "primary"), ("GOOGLE_API_KEY", "g-key")]),
        )?;
        assert_eq!(config.api_key.as_ref().map(ApiKey::expose), Some("primary"));
        Ok(())
    }

    #[test]
    fn missing_key_and_overrides() -> anyhow::Result<()> {
        let config = RelayConfig::from_lookup(
            ProviderKind::OpenAi,
            lookup_from(&[
                ("OPENAI_API_BASE", "http://localhost:9000/v1/"),
                ("OPENAI_IMAGE_MODEL", "dall-e-2"),
                ("SMILE_PROVIDER_TIMEOUT_SECS", "45"),
            ]),
        )?;
        assert!(config.api_key.is_none());
        assert_eq!(config.profile.api_base, "http://localhost:9000/v1");
        assert_eq!(config.profile.model, "dall-e-2");
        assert_eq!(config.provider_timeout, Some(Duration::from_secs(45)));

        let err = RelayConfig::from_lookup(
            ProviderKind::OpenAi,
            lookup_from(&[("SMILE_PROVIDER_TIMEOUT_SECS", "-1")]),
        );
        assert!(err.is_err());

        let huge = RelayConfig::from_lookup(
            ProviderKind::OpenAi,
            lookup_from(&[("SMILE_PROVIDER_TIMEOUT_SECS", "1e30")]),
        );
        assert!(huge.is_err());
        Ok(())
    }

    #[test]
    fn profiles_differ_per_deployment() {
        let gemini = ProviderProfile::defaults(ProviderKind::Gemini);
        let openai = ProviderProfile::defaults(ProviderKind::OpenAi);
        assert_eq!(gemini.fallback_mime, "image/jpeg");
        assert_eq!(gemini.generation_config.get("temperature"), Some(&json!(0.4)));
        assert!(openai.generation_config.is_empty());
        assert!(gemini.prompt.contains("rest of the face unchanged"));
    }

    #[test]
    fn api_key_debug_is_redacted() {
        let key = ApiKey::new("sk-very-secret").map(|key| format!("{key:?}"));
        let rendered = key.unwrap_or_default();
        assert!(rendered.starts_with("ApiKey(sha256:"));
        assert!(!rendered.contains("very-secret"));
        assert!(ApiKey::new("   ").is_none());
    }

    #[test]
    fn server_config_reads_bind_and_limit() -> anyhow::Result<()> {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("SMILE_BIND", "127.0.0.1:9999"),
            ("SMILE_MAX_BODY_BYTES", "1024"),
        ]))?;
        assert_eq!(config.bind, "127.0.0.1:9999");
        assert_eq!(config.max_body_bytes, 1024);
        assert_eq!(ServerConfig::from_lookup(lookup_from(&[]))?, ServerConfig::default());
        Ok(())
    }
}
