//! Audio transcoding and probing via the ffmpeg suite.
//!
//! Uploads arrive in whatever container the browser recorded (opus, aac,
//! webm). The ASR adapters need either an m4a remux (OpenAI) or a 16 kHz
//! mono PCM WAV (Tencent), and the latency logs need the spoken duration,
//! which `ffprobe` reports.

use crate::error::VoiceError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Timeout for any ffmpeg/ffprobe child process.
const MEDIA_TIMEOUT: Duration = Duration::from_secs(60);

async fn run_media_tool(program: &str, args: &[&str]) -> Result<Vec<u8>, VoiceError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let child = command
        .spawn()
        .map_err(|e| VoiceError::Media(format!("failed to spawn {program}: {e}")))?;

    let output = tokio::time::timeout(MEDIA_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| {
            VoiceError::Media(format!(
                "{program} timed out after {} seconds",
                MEDIA_TIMEOUT.as_secs()
            ))
        })?
        .map_err(|e| VoiceError::Media(format!("failed to wait for {program}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(VoiceError::Media(format!("{program} failed: {stderr}")));
    }

    Ok(output.stdout)
}

/// Remuxes the input into an m4a container (`<input>.mp4`), copying the
/// audio stream without re-encoding. Returns the output path.
pub async fn remux_to_m4a(input: &Path) -> Result<PathBuf, VoiceError> {
    let output = PathBuf::from(format!("{}.mp4", input.display()));
    run_media_tool(
        "ffmpeg",
        &[
            "-y",
            "-i",
            &input.display().to_string(),
            "-vn",
            "-c:a",
            "copy",
            &output.display().to_string(),
        ],
    )
    .await?;
    tracing::debug!(input = %input.display(), output = %output.display(), "remuxed audio");
    Ok(output)
}

/// Transcodes the input to 16 kHz mono s16le WAV (`<input>.wav`). Returns
/// the output path.
pub async fn transcode_to_wav16k(input: &Path) -> Result<PathBuf, VoiceError> {
    let output = PathBuf::from(format!("{}.wav", input.display()));
    run_media_tool(
        "ffmpeg",
        &[
            "-y",
            "-i",
            &input.display().to_string(),
            "-vn",
            "-c:a",
            "pcm_s16le",
            "-ac",
            "1",
            "-ar",
            "16000",
            &output.display().to_string(),
        ],
    )
    .await?;
    tracing::debug!(input = %input.display(), output = %output.display(), "transcoded audio");
    Ok(output)
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    duration: String,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: ProbeFormat,
}

fn parse_probe_duration(stdout: &[u8]) -> Result<Duration, VoiceError> {
    let probe: ProbeOutput = serde_json::from_slice(stdout)
        .map_err(|e| VoiceError::Media(format!("failed to parse ffprobe output: {e}")))?;
    let seconds: f64 = probe
        .format
        .duration
        .parse()
        .map_err(|e| VoiceError::Media(format!("failed to parse duration: {e}")))?;
    Ok(Duration::from_secs_f64(seconds))
}

/// Reports the audio duration of a file via `ffprobe`.
pub async fn probe_duration(path: &Path) -> Result<Duration, VoiceError> {
    let stdout = run_media_tool(
        "ffprobe",
        &[
            "-v",
            "quiet",
            "-find_stream_info",
            "-print_format",
            "json",
            "-show_format",
            "-i",
            &path.display().to_string(),
        ],
    )
    .await?;
    parse_probe_duration(&stdout)
}
