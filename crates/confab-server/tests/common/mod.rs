//! Shared fixtures for the server integration tests: mock provider
//! backends and request helpers.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use confab_server::talk::TalkServer;
use confab_server::{app, AppState, RuntimeSettings};
use confab_types::Robot;
use confab_voice::{
    AsrBackend, AsrOutcome, BeforeRequestHook, ChatBackend, ChatRequest, ChatStream,
    ChooseOutputPath, TtsBackend, VoiceError,
};
use futures_util::StreamExt;
use serde_json::Value;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

/// ASR backend that replays scripted transcripts, repeating the last one
/// when the script runs out.
pub struct ScriptedAsr {
    responses: Mutex<VecDeque<String>>,
    last: Mutex<String>,
}

impl ScriptedAsr {
    pub fn new(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            last: Mutex::new(responses.last().unwrap_or(&"").to_string()),
        }
    }

    pub fn single(text: &str) -> Self {
        Self::new(&[text])
    }
}

#[async_trait]
impl AsrBackend for ScriptedAsr {
    async fn transcribe(
        &self,
        _input: &Path,
        _language: &str,
        _prompt: &str,
        on_before_request: Option<BeforeRequestHook>,
    ) -> Result<AsrOutcome, VoiceError> {
        if let Some(hook) = on_before_request {
            hook();
        }
        let text = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.last.lock().unwrap().clone());
        Ok(AsrOutcome {
            text,
            duration: Duration::from_secs(3),
        })
    }
}

/// Chat backend that streams a fixed list of deltas.
pub struct ScriptedChat {
    deltas: Vec<String>,
}

impl ScriptedChat {
    pub fn new(deltas: &[&str]) -> Self {
        Self {
            deltas: deltas.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl ChatBackend for ScriptedChat {
    async fn open_stream(&self, _request: ChatRequest) -> Result<ChatStream, VoiceError> {
        let items: Vec<Result<String, VoiceError>> =
            self.deltas.iter().cloned().map(Ok).collect();
        Ok(futures_util::stream::iter(items).boxed())
    }
}

/// TTS backend that writes a small fake AAC payload, optionally after a
/// delay and optionally failing instead.
pub struct MockTts {
    pub delay: Duration,
    pub fail: bool,
}

impl MockTts {
    pub fn instant() -> Self {
        Self {
            delay: Duration::ZERO,
            fail: false,
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self { delay, fail: false }
    }

    pub fn failing() -> Self {
        Self {
            delay: Duration::ZERO,
            fail: true,
        }
    }
}

#[async_trait]
impl TtsBackend for MockTts {
    async fn synthesize(
        &self,
        choose_output_path: ChooseOutputPath<'_>,
        text: &str,
    ) -> Result<(), VoiceError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(VoiceError::Tts("synthetic failure".to_string()));
        }
        let path = choose_output_path("aac");
        tokio::fs::write(&path, format!("FAKE-AAC:{text}")).await?;
        Ok(())
    }
}

pub fn english_robot(reply_prefix: &str, chat_window: usize) -> Robot {
    Robot {
        uuid: "default".to_string(),
        label: "Default".to_string(),
        prompt: "You are a helpful assistant.".to_string(),
        asr_language: "en".to_string(),
        reply_prefix: reply_prefix.to_string(),
        voice: "hello-english.aac".to_string(),
        reply_limit: 30,
        chat_model: "gpt-4-turbo-preview".to_string(),
        chat_window,
    }
}

pub struct TestServer {
    pub app: Router,
    pub talk: Arc<TalkServer>,
    pub work_dir: PathBuf,
}

/// Builds a router over mock backends, the way the real binary wires
/// `AppState` from its config.
pub fn setup_app(
    work_dir: &Path,
    robots: Vec<Robot>,
    asr: Arc<dyn AsrBackend>,
    chat: Arc<dyn ChatBackend>,
    tts: Arc<dyn TtsBackend>,
    stage_timeout: Duration,
) -> TestServer {
    let talk = Arc::new(TalkServer::new());
    let state = AppState {
        talk: talk.clone(),
        robots,
        asr,
        chat,
        tts,
        settings: RuntimeSettings {
            work_dir: work_dir.to_path_buf(),
            keep_files: false,
            stage_timeout,
            segment_ttl: Duration::from_secs(300),
            max_tokens: 1024,
            temperature: 0.9,
        },
    };
    TestServer {
        app: app(state),
        talk,
        work_dir: work_dir.to_path_buf(),
    }
}

/// Issues a GET and decodes the body: JSON when it parses, the raw text
/// otherwise (error bodies are plain text).
pub async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, body)
}

/// Posts a multipart question upload.
pub async fn upload(app: &Router, sid: &str, robot: &str) -> (StatusCode, Value) {
    upload_bytes(app, sid, robot, b"RIFF-fake-audio-bytes").await
}

pub async fn upload_bytes(
    app: &Router,
    sid: &str,
    robot: &str,
    audio: &[u8],
) -> (StatusCode, Value) {
    let boundary = "confab-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; \
             filename=\"question.wav\"\r\nContent-Type: audio/wav\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(audio);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/ai-talk/upload/?sid={sid}&robot={robot}&umi=test"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, body)
}

/// Downloads a segment's audio, returning the raw bytes and content type.
pub async fn download_tts(
    app: &Router,
    sid: &str,
    rid: &str,
    asid: &str,
) -> (StatusCode, String, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/ai-talk/tts/?sid={sid}&rid={rid}&asid={asid}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap_or_default().to_string())
        .unwrap_or_default();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, content_type, bytes.to_vec())
}

/// Runs one full turn: upload, then poll/download/remove every segment
/// until the turn drains. Returns the segment texts in consumption order.
pub async fn drain_turn(app: &Router, sid: &str, robot: &str) -> Vec<String> {
    let (status, body) = upload(app, sid, robot).await;
    assert_eq!(status, StatusCode::OK, "upload failed: {body}");
    let rid = body["rid"].as_str().unwrap().to_string();

    let mut texts = Vec::new();
    loop {
        let (status, body) = get(app, &format!("/api/ai-talk/query/?sid={sid}&rid={rid}")).await;
        assert_eq!(status, StatusCode::OK, "query failed: {body}");
        let Some(asid) = body["asid"].as_str().filter(|asid| !asid.is_empty()) else {
            break;
        };
        texts.push(body["tts"].as_str().unwrap_or_default().to_string());
        let (status, _) = get(
            app,
            &format!("/api/ai-talk/remove/?sid={sid}&rid={rid}&asid={asid}"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    texts
}
