//! Tencent cloud speech adapters.
//!
//! Selected when `providers.tencent.app_id` is configured. Both services
//! sign their request with HMAC-SHA1 over the sorted parameter string, the
//! scheme Tencent's speech endpoints mandate.

use crate::config::TencentConfig;
use crate::error::VoiceError;
use crate::media;
use crate::{AsrBackend, AsrOutcome, BeforeRequestHook, ChooseOutputPath, TtsBackend};
use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const ASR_HOST: &str = "asr.cloud.tencent.com";
const TTS_HOST: &str = "tts.cloud.tencent.com";

/// HTTP timeout for one Tencent speech request.
const TENCENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Voice type used for synthesis (Tencent's standard female voice).
const TTS_VOICE_TYPE: u32 = 1009;

/// Builds the canonical string to sign: `POST<host><path>?k1=v1&k2=v2…`
/// with parameters in lexicographic key order.
fn sign_string(host_and_path: &str, params: &BTreeMap<String, String>) -> String {
    let mut out = format!("POST{host_and_path}?");
    for (i, (key, value)) in params.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        out.push_str(key);
        out.push('=');
        out.push_str(value);
    }
    out
}

/// Signs the canonical string with HMAC-SHA1 and encodes it as base64.
fn sign(secret_key: &str, host_and_path: &str, params: &BTreeMap<String, String>) -> String {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret_key.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(sign_string(host_and_path, params).as_bytes());
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Tencent flash-recognition ASR.
///
/// The upload is transcoded to 16 kHz mono PCM WAV first; the spoken
/// duration comes from `ffprobe` because the flash response does not report
/// it.
#[derive(Debug, Clone)]
pub struct TencentAsr {
    config: TencentConfig,
    keep_files: bool,
    client: reqwest::Client,
}

impl TencentAsr {
    pub fn new(config: TencentConfig, keep_files: bool) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .timeout(TENCENT_TIMEOUT)
            .build()
            .map_err(|e| VoiceError::Asr(e.to_string()))?;
        Ok(Self {
            config,
            keep_files,
            client,
        })
    }

    fn engine_type(language: &str) -> &'static str {
        if language == "en" {
            "16k_en"
        } else {
            "16k_zh"
        }
    }
}

#[derive(Debug, Deserialize)]
struct FlashChannelResult {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct FlashResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    flash_result: Vec<FlashChannelResult>,
}

#[async_trait]
impl AsrBackend for TencentAsr {
    async fn transcribe(
        &self,
        input: &Path,
        language: &str,
        _prompt: &str,
        on_before_request: Option<BeforeRequestHook>,
    ) -> Result<AsrOutcome, VoiceError> {
        let wav = media::transcode_to_wav16k(input).await?;
        let duration = media::probe_duration(&wav).await?;

        if let Some(hook) = on_before_request {
            hook();
        }

        let result = self.request(&wav, language).await;

        if !self.keep_files {
            let _ = tokio::fs::remove_file(&wav).await;
        }

        let text = result?;
        Ok(AsrOutcome { text, duration })
    }
}

impl TencentAsr {
    async fn request(&self, wav: &Path, language: &str) -> Result<String, VoiceError> {
        let mut params = BTreeMap::new();
        params.insert("appid".to_string(), self.config.app_id.clone());
        params.insert("secretid".to_string(), self.config.secret_id.clone());
        params.insert("timestamp".to_string(), unix_timestamp().to_string());
        params.insert(
            "engine_type".to_string(),
            Self::engine_type(language).to_string(),
        );
        params.insert("voice_format".to_string(), "wav".to_string());
        params.insert("speaker_diarization".to_string(), "0".to_string());
        params.insert("filter_dirty".to_string(), "0".to_string());
        params.insert("filter_modal".to_string(), "0".to_string());
        params.insert("filter_punc".to_string(), "0".to_string());
        params.insert("convert_num_mode".to_string(), "1".to_string());
        params.insert("first_channel_only".to_string(), "1".to_string());
        params.insert("word_info".to_string(), "0".to_string());

        let path = format!("/asr/flash/v1/{}", self.config.app_id);
        let signature = sign(
            &self.config.secret_key,
            &format!("{ASR_HOST}{path}"),
            &params,
        );

        let query: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let url = format!("https://{ASR_HOST}{path}?{}", query.join("&"));

        let audio = tokio::fs::read(wav).await?;
        let response = self
            .client
            .post(&url)
            .header("Authorization", signature)
            .header("Content-Type", "application/octet-stream")
            .body(audio)
            .send()
            .await
            .map_err(|e| VoiceError::Asr(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Asr(format!("ASR API error {status}: {body}")));
        }

        let flash: FlashResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::Asr(e.to_string()))?;
        if flash.code != 0 {
            return Err(VoiceError::Asr(format!(
                "recognize error {}: {}",
                flash.code, flash.message
            )));
        }

        let text = flash
            .flash_result
            .iter()
            .map(|channel| channel.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        Ok(text.trim().to_string())
    }
}

/// Tencent streaming TTS.
///
/// The stream endpoint returns raw 16 kHz s16le PCM, which is re-encoded as
/// a WAV file so the client can play it directly.
#[derive(Debug, Clone)]
pub struct TencentTts {
    config: TencentConfig,
    client: reqwest::Client,
}

impl TencentTts {
    pub fn new(config: TencentConfig) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .timeout(TENCENT_TIMEOUT)
            .build()
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl TtsBackend for TencentTts {
    async fn synthesize(
        &self,
        choose_output_path: ChooseOutputPath<'_>,
        text: &str,
    ) -> Result<(), VoiceError> {
        let output = choose_output_path("wav");

        let app_id: i64 = self
            .config
            .app_id
            .parse()
            .map_err(|e| VoiceError::Config(format!("parse app_id {}: {e}", self.config.app_id)))?;

        let now = unix_timestamp();
        let body = serde_json::json!({
            "Action": "TextToStreamAudio",
            "AppId": app_id,
            "Codec": "pcm",
            "Expired": now + 3600,
            "ModelType": 0,
            "PrimaryLanguage": 1,
            "ProjectId": 0,
            "SampleRate": 16000,
            "SecretId": self.config.secret_id.clone(),
            "SessionId": "12345678",
            "Speed": 0,
            "Text": text,
            "Timestamp": now,
            "VoiceType": TTS_VOICE_TYPE,
            "Volume": 5,
        });

        // The signature covers the raw parameter values, without JSON
        // quoting, in lexicographic key order.
        let params: BTreeMap<String, String> = body
            .as_object()
            .expect("tts request body is an object")
            .iter()
            .map(|(key, value)| {
                let raw = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), raw)
            })
            .collect();
        let signature = sign(&self.config.secret_key, &format!("{TTS_HOST}/stream"), &params);

        let response = self
            .client
            .post(format!("https://{TTS_HOST}/stream"))
            .header("Authorization", signature)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Tts(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(VoiceError::Tts(format!("TTS API error {status}: {text}")));
        }

        let pcm = response
            .bytes()
            .await
            .map_err(|e| VoiceError::Tts(e.to_string()))?
            .to_vec();

        // An error reply is a small JSON body rather than PCM.
        if pcm.starts_with(b"{") && String::from_utf8_lossy(&pcm).contains("Error") {
            return Err(VoiceError::Tts(format!(
                "tts error: {}",
                String::from_utf8_lossy(&pcm)
            )));
        }

        tokio::task::spawn_blocking(move || write_pcm_as_wav(&pcm, &output))
            .await
            .map_err(|e| VoiceError::Tts(format!("wav encode task failed: {e}")))??;

        Ok(())
    }
}

/// Encodes raw 16 kHz mono s16le PCM as a WAV file.
fn write_pcm_as_wav(pcm: &[u8], path: &Path) -> Result<(), VoiceError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer =
        hound::WavWriter::create(path, spec).map_err(|e| VoiceError::Tts(e.to_string()))?;
    for sample in pcm.chunks_exact(2) {
        let value = i16::from_le_bytes([sample[0], sample[1]]);
        writer
            .write_sample(value)
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
    }
    writer
        .finalize()
        .map_err(|e| VoiceError::Tts(e.to_string()))?;
    Ok(())
}
