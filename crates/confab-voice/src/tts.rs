//! Text-to-speech backends.

use crate::config::OpenAiEndpoint;
use crate::error::VoiceError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

/// HTTP timeout for one synthesis request.
const TTS_TIMEOUT: Duration = Duration::from_secs(60);

/// Callback through which a backend obtains its output path.
///
/// The backend chooses the container extension (`aac`, `wav`, ...) and the
/// caller decides where the file lives; this inversion lets one worker track
/// files from providers that emit different containers.
pub type ChooseOutputPath<'a> = &'a (dyn Fn(&str) -> PathBuf + Send + Sync);

/// Backend for rendering one sentence to a playable audio file.
#[async_trait]
pub trait TtsBackend: Send + Sync {
    async fn synthesize(
        &self,
        choose_output_path: ChooseOutputPath<'_>,
        text: &str,
    ) -> Result<(), VoiceError>;
}

/// Production TTS backend: OpenAI-compatible `/audio/speech`, AAC output.
#[derive(Debug, Clone)]
pub struct OpenAiTts {
    endpoint: OpenAiEndpoint,
    model: String,
    voice: String,
    client: reqwest::Client,
}

impl OpenAiTts {
    pub fn new(
        endpoint: OpenAiEndpoint,
        model: impl Into<String>,
        voice: impl Into<String>,
    ) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .timeout(TTS_TIMEOUT)
            .build()
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        Ok(Self {
            endpoint,
            model: model.into(),
            voice: voice.into(),
            client,
        })
    }
}

#[async_trait]
impl TtsBackend for OpenAiTts {
    async fn synthesize(
        &self,
        choose_output_path: ChooseOutputPath<'_>,
        text: &str,
    ) -> Result<(), VoiceError> {
        let output = choose_output_path("aac");

        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
            "response_format": "aac",
        });

        let url = format!("{}/audio/speech", self.endpoint.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.endpoint.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Tts(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Tts(format!("TTS API error {status}: {body}")));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        tokio::fs::write(&output, &audio).await?;

        Ok(())
    }
}
