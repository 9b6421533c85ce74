//! Confab server library logic.
//!
//! A backend for real-time voice conversations between a human and a set of
//! configured AI robots: the browser posts recorded speech, the server
//! transcribes it, streams a chat completion, splits the answer into
//! sentences on the fly, synthesizes each sentence, and lets the client
//! poll and fetch audio segments in order while the answer is still being
//! produced.

pub mod api_talk;
pub mod background;
pub mod config;
pub mod stage;
pub mod talk;
pub mod turn;
pub mod worker;

use axum::{
    routing::{delete, get, post},
    Extension, Json, Router,
};
use confab_types::Robot;
use confab_voice::{AsrBackend, ChatBackend, TtsBackend};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use talk::TalkServer;

/// Runtime settings resolved from configuration at startup.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Directory for transient input and TTS files, and the welcome clips.
    pub work_dir: PathBuf,
    /// Keep transient audio files instead of deleting them (debugging).
    pub keep_files: bool,
    /// Idle time after which a stage is removed.
    pub stage_timeout: Duration,
    /// Hard TTL after which an unacknowledged segment is released.
    pub segment_ttl: Duration,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            keep_files: false,
            stage_timeout: Duration::from_secs(300),
            segment_ttl: Duration::from_secs(300),
            max_tokens: 1024,
            temperature: 0.9,
        }
    }
}

/// Application state shared across all request handlers.
pub struct AppState {
    /// Registry of live stages and the aggregate counters.
    pub talk: Arc<TalkServer>,
    /// The configured robot roster, immutable after startup.
    pub robots: Vec<Robot>,
    /// Speech-to-text backend.
    pub asr: Arc<dyn AsrBackend>,
    /// Streaming chat backend.
    pub chat: Arc<dyn ChatBackend>,
    /// Text-to-speech backend.
    pub tts: Arc<dyn TtsBackend>,
    pub settings: RuntimeSettings,
}

impl AppState {
    /// Looks up a robot by uuid. The roster is small; a linear scan is
    /// deliberate.
    pub fn robot(&self, uuid: &str) -> Option<&Robot> {
        self.robots.iter().find(|robot| robot.uuid == uuid)
    }
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/ai-talk/start/",
            get(api_talk::start_handler).post(api_talk::start_handler),
        )
        .route(
            "/api/ai-talk/conversation/",
            get(api_talk::conversation_handler).post(api_talk::conversation_handler),
        )
        .route("/api/ai-talk/upload/", post(api_talk::upload_handler))
        .route("/api/ai-talk/query/", get(api_talk::query_handler))
        .route("/api/ai-talk/tts/", get(api_talk::tts_handler))
        .route(
            "/api/ai-talk/remove/",
            delete(api_talk::remove_handler).get(api_talk::remove_handler),
        )
        .route(
            "/api/ai-talk/examples/{file}",
            get(api_talk::examples_handler),
        )
        .layer(Extension(Arc::new(state)))
}
