//! The AI-talk HTTP surface: seven endpoints that drive a stage through one
//! turn and let the client pull answer segments.
//!
//! Every sid-bearing handler keep-alives its stage before doing anything
//! else. Failures are surfaced as HTTP 500 with a one-line plain-text
//! reason — the surface deliberately does not distinguish 4xx — and are
//! counted in the server's `errors` counter, except bad-case input, which
//! is counted in `badcases`.

use crate::background;
use crate::stage::{Stage, TurnTimings};
use crate::turn;
use crate::worker::{AnswerSegment, TtsWorker};
use crate::AppState;
use axum::{
    body::Body,
    extract::{Extension, Multipart, Path, Query},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use confab_voice::{BeforeRequestHook, VoiceError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

/// Hard ceiling for one uploaded question (20 MiB).
const UPLOAD_CEILING: usize = 20 * 1024 * 1024;

/// API error type. Everything maps to `500` with a plain-text reason; the
/// client treats any failure as "retry the whole turn".
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Client(String),
    #[error("{0}")]
    BadCase(String),
    #[error(transparent)]
    Provider(#[from] VoiceError),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

/// Counts and logs a handler failure once, then passes it through.
fn fail(state: &AppState, op: &'static str, err: ApiError) -> ApiError {
    if matches!(err, ApiError::BadCase(_)) {
        state.talk.inc_badcases();
    } else {
        state.talk.inc_errors();
    }
    tracing::warn!(op, error = %err, "request failed");
    err
}

fn require_stage(state: &AppState, sid: &str) -> Result<Arc<Stage>, ApiError> {
    if sid.is_empty() {
        return Err(ApiError::Client("empty sid".to_string()));
    }
    state
        .talk
        .get_stage(sid)
        .ok_or_else(|| ApiError::Client(format!("invalid sid {sid}")))
}

// ── start ──

#[derive(Debug, Serialize)]
pub struct StartRobot {
    pub uuid: String,
    pub label: String,
    pub voice: String,
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub sid: String,
    pub robots: Vec<StartRobot>,
}

/// Handler for `/api/ai-talk/start/`.
///
/// Creates a stage, starts its expiry watchdog, and returns the robot
/// roster so the client can pick one.
pub async fn start_handler(Extension(state): Extension<Arc<AppState>>) -> Json<StartResponse> {
    let worker = TtsWorker::new(
        state.tts.clone(),
        state.settings.work_dir.clone(),
        state.settings.keep_files,
        state.settings.segment_ttl,
    );
    let stage = Stage::new(state.settings.stage_timeout, worker);

    state.talk.add_stage(stage.clone());
    tracing::info!(
        sid = %stage.sid,
        stages = state.talk.count_stages(),
        "created stage"
    );

    let span = stage.span.clone();
    tokio::spawn(background::stage_watchdog(state.talk.clone(), stage.clone()).instrument(span));

    let robots = state
        .robots
        .iter()
        .map(|robot| StartRobot {
            uuid: robot.uuid.clone(),
            label: robot.label.clone(),
            voice: robot.voice.clone(),
        })
        .collect();

    Json(StartResponse {
        sid: stage.sid.clone(),
        robots,
    })
}

// ── conversation ──

#[derive(Debug, Deserialize)]
pub struct ConversationParams {
    #[serde(default)]
    pub sid: String,
}

/// Handler for `/api/ai-talk/conversation/`.
///
/// Marks the beginning of a spoken turn: resets the turn's timing
/// fingerprints and bumps the conversation counter.
pub async fn conversation_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<ConversationParams>,
) -> Result<Json<Value>, ApiError> {
    let stage =
        require_stage(&state, &params.sid).map_err(|err| fail(&state, "conversation", err))?;
    stage.keep_alive();

    {
        let mut turn = stage.turn.lock().await;
        turn.timings = TurnTimings {
            sentence_started: Some(Instant::now()),
            ..TurnTimings::default()
        };
    }

    state.talk.inc_conversations();
    Ok(Json(Value::Null))
}

// ── upload ──

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    #[serde(default)]
    pub sid: String,
    #[serde(default)]
    pub robot: String,
    /// User message id, echoed into the logs only.
    #[serde(default)]
    pub umi: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub rid: String,
    pub asr: String,
}

/// Handler for `POST /api/ai-talk/upload/`.
///
/// Runs one turn up to the point where the chat stream is open: saves the
/// upload, transcribes it, filters bad-cases, and responds with the request
/// id and the recognized text while chat and TTS continue in the
/// background.
pub async fn upload_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<UploadParams>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let stage = match require_stage(&state, &params.sid) {
        Ok(stage) => stage,
        Err(err) => return Err(fail(&state, "upload", err)),
    };
    stage.keep_alive();

    let span = stage.span.clone();
    upload_inner(&state, &stage, &params, multipart)
        .instrument(span)
        .await
        .map_err(|err| fail(&state, "upload", err))
}

async fn upload_inner(
    state: &Arc<AppState>,
    stage: &Arc<Stage>,
    params: &UploadParams,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    if params.robot.is_empty() {
        return Err(ApiError::Client("empty robot".to_string()));
    }
    let robot = state
        .robot(&params.robot)
        .ok_or_else(|| ApiError::Client(format!("invalid robot {}", params.robot)))?
        .clone();

    let rid = Uuid::new_v4().to_string();
    let input_file = state.settings.work_dir.join(format!("input-{rid}.audio"));
    tracing::info!(
        umi = %params.umi,
        robot = %robot.uuid,
        label = %robot.label,
        rid = %rid,
        input = %input_file.display(),
        "got question"
    );

    // The original container (aac, opus, webm) is preserved; the ASR
    // adapter transcodes as it needs.
    let audio = read_upload_field(&mut multipart).await?;
    if audio.is_empty() {
        return Err(ApiError::Client("empty upload".to_string()));
    }
    tokio::fs::write(&input_file, &audio)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to save upload: {e}")))?;
    tracing::debug!(size = audio.len(), "saved upload");

    let prompt = {
        let mut turn = stage.turn.lock().await;
        turn.timings.upload_done = Some(Instant::now());
        turn.asr_prompt_carry.clone()
    };

    // The hook fires between transcode and the ASR network call so the
    // latency log can split extraction from recognition.
    let extract_done: Arc<OnceLock<Instant>> = Arc::new(OnceLock::new());
    let hook: BeforeRequestHook = {
        let extract_done = extract_done.clone();
        Box::new(move || {
            let _ = extract_done.set(Instant::now());
        })
    };

    let asr_result = state
        .asr
        .transcribe(&input_file, &robot.asr_language, &prompt, Some(hook))
        .await;
    if !state.settings.keep_files {
        let _ = tokio::fs::remove_file(&input_file).await;
    }
    let outcome = asr_result?;

    let asr_text = outcome.text.trim().to_string();
    {
        let mut turn = stage.turn.lock().await;
        turn.asr_prompt_carry = asr_text.clone();
        turn.timings.extract_done = extract_done.get().copied();
        turn.timings.asr_done = Some(Instant::now());
        turn.timings.asr_duration = outcome.duration;
        turn.timings.asr_text = asr_text.clone();
    }
    tracing::info!(
        lang = %robot.asr_language,
        speech = ?outcome.duration,
        "You: {}", asr_text
    );

    if let Some(reason) = turn::badcase_reason(&robot.asr_language, &asr_text) {
        return Err(ApiError::BadCase(reason));
    }

    stage.keep_alive();

    // A dummy marks the request alive until the first real sentence lands.
    stage.worker.submit(stage, AnswerSegment::dummy(&rid));

    turn::start_chat(state, stage, &robot, &rid).await?;

    Ok(Json(UploadResponse {
        rid,
        asr: asr_text,
    }))
}

/// Reads the `file` field of the multipart upload in chunks, enforcing the
/// size ceiling during streaming rather than after buffering.
async fn read_upload_field(multipart: &mut Multipart) -> Result<Vec<u8>, ApiError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Client(format!("multipart error: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let mut buf = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| ApiError::Client(format!("failed to read upload chunk: {e}")))?
        {
            if buf.len() + chunk.len() > UPLOAD_CEILING {
                return Err(ApiError::Client(format!(
                    "upload exceeds maximum size of {UPLOAD_CEILING} bytes"
                )));
            }
            buf.extend_from_slice(&chunk);
        }
        return Ok(buf);
    }
    Err(ApiError::Client("no file field in upload".to_string()))
}

// ── query ──

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    #[serde(default)]
    pub sid: String,
    #[serde(default)]
    pub rid: String,
}

/// Handler for `GET /api/ai-talk/query/`.
///
/// Resolves the next answer segment of a turn: `{}` once everything has
/// been consumed, otherwise the front segment with its text. A failed
/// segment is surfaced like a ready one so the client can acknowledge it
/// and advance; later segments of the turn are unaffected by the failure.
pub async fn query_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Result<Json<Value>, ApiError> {
    let stage = match require_stage(&state, &params.sid) {
        Ok(stage) => stage,
        Err(err) => return Err(fail(&state, "query", err)),
    };
    stage.keep_alive();

    let span = stage.span.clone();
    query_inner(&stage, &params)
        .instrument(span)
        .await
        .map_err(|err| fail(&state, "query", err))
}

async fn query_inner(stage: &Arc<Stage>, params: &QueryParams) -> Result<Json<Value>, ApiError> {
    if params.rid.is_empty() {
        return Err(ApiError::Client("empty rid".to_string()));
    }

    let Some(segment) = stage.worker.find_any_ready(stage, &params.rid).await else {
        tracing::debug!(rid = %params.rid, "no segment left");
        return Ok(Json(json!({})));
    };

    Ok(Json(json!({
        "processing": segment.processing(),
        "asid": segment.asid,
        "tts": segment.text,
    })))
}

// ── tts download ──

#[derive(Debug, Deserialize)]
pub struct SegmentParams {
    #[serde(default)]
    pub sid: String,
    #[serde(default)]
    pub rid: String,
    #[serde(default)]
    pub asid: String,
}

/// Handler for `GET /api/ai-talk/tts/`.
///
/// Serves one segment's audio file. The first download of a turn's first
/// segment closes the latency fingerprint; the "Bot: …" line is logged once
/// per segment however often the browser re-requests the file.
pub async fn tts_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<SegmentParams>,
) -> Result<Response, ApiError> {
    let stage = match require_stage(&state, &params.sid) {
        Ok(stage) => stage,
        Err(err) => return Err(fail(&state, "tts", err)),
    };
    stage.keep_alive();

    let span = stage.span.clone();
    tts_inner(&stage, &params)
        .instrument(span)
        .await
        .map_err(|err| fail(&state, "tts", err))
}

async fn tts_inner(stage: &Arc<Stage>, params: &SegmentParams) -> Result<Response, ApiError> {
    let segment = require_segment(stage, params)?;

    if segment.mark_logged() {
        if segment.first {
            let mut turn = stage.turn.lock().await;
            if turn.timings.download_first.is_none() {
                turn.timings.download_first = Some(Instant::now());
                let timings = &turn.timings;
                tracing::info!(
                    total = format!("{:.1}s", timings.total()),
                    upload = format!("{:.1}s", timings.upload()),
                    extract = format!("{:.1}s", timings.extract()),
                    asr = format!("{:.1}s", timings.asr()),
                    chat = format!("{:.1}s", timings.chat()),
                    tts = format!("{:.1}s", timings.tts()),
                    download = format!("{:.1}s", timings.download()),
                    ask = %timings.asr_text,
                    speech = format!("{:.1}s", timings.asr_duration.as_secs_f64()),
                    answer = %timings.first_reply,
                    "turn latency"
                );
            }
        }
        tracing::info!("Bot: {}", segment.text);
    }

    let path = segment
        .tts_path()
        .ok_or_else(|| ApiError::Client(format!("no tts file for segment {}", params.asid)))?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to read {}: {e}", path.display())))?;

    let content_type = if path.extension().is_some_and(|ext| ext == "wav") {
        HeaderValue::from_static("audio/wav")
    } else {
        HeaderValue::from_static("audio/aac")
    };

    let mut response = Response::new(Body::from(bytes));
    response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    Ok(response)
}

// ── remove ──

/// Handler for `/api/ai-talk/remove/`.
///
/// Acknowledges a segment: detaches it from the queue and signals its
/// cleanup task to release the audio file ahead of the TTL. A second remove
/// of the same `asid` fails with "no segment" and has no side effects.
pub async fn remove_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<SegmentParams>,
) -> Result<Json<Value>, ApiError> {
    let stage = match require_stage(&state, &params.sid) {
        Ok(stage) => stage,
        Err(err) => return Err(fail(&state, "remove", err)),
    };
    stage.keep_alive();

    let result: Result<Json<Value>, ApiError> = (|| {
        let segment = require_segment(&stage, &params)?;
        tracing::debug!(rid = %params.rid, asid = %params.asid, "removing segment");
        stage.worker.remove(&params.asid);
        segment.signal_remove();
        Ok(Json(Value::Null))
    })();
    result.map_err(|err| fail(&state, "remove", err))
}

fn require_segment(
    stage: &Stage,
    params: &SegmentParams,
) -> Result<Arc<AnswerSegment>, ApiError> {
    if params.rid.is_empty() {
        return Err(ApiError::Client("empty rid".to_string()));
    }
    if params.asid.is_empty() {
        return Err(ApiError::Client("empty asid".to_string()));
    }
    stage
        .worker
        .find(&params.rid, &params.asid)
        .ok_or_else(|| ApiError::Client(format!("no segment for {} {}", params.rid, params.asid)))
}

// ── welcome clips ──

#[derive(Debug, Deserialize)]
pub struct ExamplesParams {
    /// Optional stage used only as the logging scope.
    #[serde(default)]
    pub sid: String,
}

/// Handler for `GET /api/ai-talk/examples/{file}`.
///
/// Serves static welcome clips from the work directory. A name without an
/// extension gets `.aac` appended; the content type follows the extension.
pub async fn examples_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(file): Path<String>,
    Query(params): Query<ExamplesParams>,
) -> Result<Response, ApiError> {
    let span = (!params.sid.is_empty())
        .then(|| state.talk.get_stage(&params.sid))
        .flatten()
        .map(|stage| stage.span.clone())
        .unwrap_or_else(tracing::Span::none);

    examples_inner(&state, file)
        .instrument(span)
        .await
        .map_err(|err| fail(&state, "examples", err))
}

async fn examples_inner(state: &Arc<AppState>, file: String) -> Result<Response, ApiError> {
    if file.is_empty() || file.contains("..") || file.contains('/') || file.contains('\\') {
        return Err(ApiError::Client(format!("invalid file name {file}")));
    }

    let filename = if file.contains('.') {
        file
    } else {
        format!("{file}.aac")
    };
    let ext = filename.rsplit('.').next().unwrap_or("aac");
    let content_type = format!("audio/{ext}");
    tracing::debug!(file = %filename, content_type = %content_type, "serving example clip");

    let path = state.settings.work_dir.join(&filename);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| ApiError::Client(format!("failed to read {filename}: {e}")))?;

    let mut response = Response::new(Body::from(bytes));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .map_err(|e| ApiError::Internal(format!("invalid content type: {e}")))?,
    );
    Ok(response)
}
