//! Provider endpoint configuration.
//!
//! The platform talks to up to three OpenAI-compatible services (ASR, chat,
//! TTS) plus an optional Tencent speech pair. A single global key and base
//! URL cover the common case; each subsystem can override either field.

use serde::Deserialize;
use std::fmt;

/// A resolved OpenAI-compatible endpoint: bearer key plus `…/v1` base URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OpenAiEndpoint {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: String,
}

/// Partial per-subsystem override; unset fields fall back to the globals.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointOverride {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

/// Tencent cloud speech credentials. When `app_id` is set the Tencent ASR
/// and TTS adapters are selected instead of the OpenAI-compatible ones.
#[derive(Clone, Default, Deserialize)]
pub struct TencentConfig {
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub secret_id: String,
    #[serde(default)]
    pub secret_key: String,
}

impl TencentConfig {
    pub fn is_configured(&self) -> bool {
        !self.app_id.is_empty()
    }
}

impl fmt::Debug for TencentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TencentConfig")
            .field("app_id", &self.app_id)
            .field("secret_id", &self.secret_id)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

/// Provider configuration as it appears under `[providers]` in the config
/// file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderConfig {
    /// Global API key, used by every subsystem without an override.
    #[serde(default)]
    pub api_key: String,
    /// Global base URL (proxy or upstream). Defaults to the public OpenAI
    /// endpoint when empty.
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub asr: EndpointOverride,
    #[serde(default)]
    pub chat: EndpointOverride,
    #[serde(default)]
    pub tts: EndpointOverride,
    #[serde(default)]
    pub tencent: TencentConfig,
}

/// Default upstream when no base URL is configured at all.
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Normalizes a configured base URL: a bare host gets an `https://` scheme,
/// and a missing `/v1` suffix is appended so adapters can join paths like
/// `/chat/completions` directly.
fn normalize_base_url(raw: &str) -> String {
    if raw.is_empty() {
        return DEFAULT_BASE_URL.to_string();
    }
    let mut url = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let trimmed = url.trim_end_matches('/').to_string();
    url = trimmed;
    if !url.ends_with("/v1") {
        url = format!("{url}/v1");
    }
    url
}

impl ProviderConfig {
    fn resolve(&self, over: &EndpointOverride) -> OpenAiEndpoint {
        OpenAiEndpoint {
            api_key: over.api_key.clone().unwrap_or_else(|| self.api_key.clone()),
            base_url: normalize_base_url(
                over.base_url.as_deref().unwrap_or(self.base_url.as_str()),
            ),
        }
    }

    pub fn asr_endpoint(&self) -> OpenAiEndpoint {
        self.resolve(&self.asr)
    }

    pub fn chat_endpoint(&self) -> OpenAiEndpoint {
        self.resolve(&self.chat)
    }

    pub fn tts_endpoint(&self) -> OpenAiEndpoint {
        self.resolve(&self.tts)
    }
}
