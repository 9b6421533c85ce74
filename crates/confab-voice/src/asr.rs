//! Speech-to-text backends.

use crate::config::OpenAiEndpoint;
use crate::error::VoiceError;
use crate::media;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// HTTP timeout for one transcription request.
const ASR_TIMEOUT: Duration = Duration::from_secs(30);

/// The result of one transcription: the recognized text plus the measured
/// duration of the spoken audio, used by the per-turn latency log.
#[derive(Debug, Clone)]
pub struct AsrOutcome {
    pub text: String,
    pub duration: Duration,
}

/// Hook fired immediately before the network call, after any transcoding,
/// so the caller can record extraction-done timing.
pub type BeforeRequestHook = Box<dyn FnOnce() + Send>;

/// Backend for converting an uploaded audio file into text.
///
/// `prompt` biases recognition toward the recent dialog; `language` is the
/// robot's configured hint.
#[async_trait]
pub trait AsrBackend: Send + Sync {
    async fn transcribe(
        &self,
        input: &Path,
        language: &str,
        prompt: &str,
        on_before_request: Option<BeforeRequestHook>,
    ) -> Result<AsrOutcome, VoiceError>;
}

/// Production ASR backend: OpenAI-compatible `/audio/transcriptions`.
///
/// The upload is remuxed to m4a first (audio stream copied, no re-encode)
/// because the transcription endpoint rejects some browser containers. The
/// request asks for `verbose_json` so the response carries the audio
/// duration.
#[derive(Debug, Clone)]
pub struct OpenAiAsr {
    endpoint: OpenAiEndpoint,
    model: String,
    keep_files: bool,
    client: reqwest::Client,
}

impl OpenAiAsr {
    pub fn new(
        endpoint: OpenAiEndpoint,
        model: impl Into<String>,
        keep_files: bool,
    ) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .timeout(ASR_TIMEOUT)
            .build()
            .map_err(|e| VoiceError::Asr(e.to_string()))?;
        Ok(Self {
            endpoint,
            model: model.into(),
            keep_files,
            client,
        })
    }
}

#[async_trait]
impl AsrBackend for OpenAiAsr {
    async fn transcribe(
        &self,
        input: &Path,
        language: &str,
        prompt: &str,
        on_before_request: Option<BeforeRequestHook>,
    ) -> Result<AsrOutcome, VoiceError> {
        let remuxed = media::remux_to_m4a(input).await?;

        if let Some(hook) = on_before_request {
            hook();
        }

        let result = self.request(&remuxed, language, prompt).await;

        if !self.keep_files {
            let _ = tokio::fs::remove_file(&remuxed).await;
        }

        result
    }
}

impl OpenAiAsr {
    async fn request(
        &self,
        audio: &Path,
        language: &str,
        prompt: &str,
    ) -> Result<AsrOutcome, VoiceError> {
        let bytes = tokio::fs::read(audio).await?;
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name("audio.mp4")
            .mime_str("audio/mp4")
            .map_err(|e| VoiceError::Asr(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", language.to_string())
            .text("prompt", prompt.to_string())
            .text("response_format", "verbose_json".to_string());

        let url = format!("{}/audio/transcriptions", self.endpoint.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.endpoint.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoiceError::Asr(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Asr(format!("ASR API error {status}: {body}")));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| VoiceError::Asr(e.to_string()))?;
        let text = json
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        let duration = json
            .get("duration")
            .and_then(|d| d.as_f64())
            .unwrap_or(0.0);

        Ok(AsrOutcome {
            text,
            duration: Duration::from_secs_f64(duration.max(0.0)),
        })
    }
}
