//! One conversation stage: per-session state, keep-alive, and turn timings.

use crate::worker::TtsWorker;
use confab_types::ChatMessage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// One conversation session, created when the client hits `start` and
/// removed by the expiry watchdog once the client goes quiet.
///
/// The per-turn mutable state lives behind a single async mutex: the HTTP
/// surface guarantees at most one in-flight turn per stage, and the mutex is
/// the latch that enforces it.
pub struct Stage {
    pub sid: String,
    /// Logging scope; every task belonging to this stage is instrumented
    /// with this span so its logs carry the `sid`.
    pub span: tracing::Span,
    pub worker: TtsWorker,
    timeout: Duration,
    created: Instant,
    last_activity: Mutex<Instant>,
    generating: AtomicBool,
    pub turn: tokio::sync::Mutex<TurnState>,
}

impl Stage {
    pub fn new(timeout: Duration, worker: TtsWorker) -> Arc<Self> {
        let sid = Uuid::new_v4().to_string();
        let span = tracing::info_span!("stage", sid = %sid);
        let now = Instant::now();
        Arc::new(Self {
            sid,
            span,
            worker,
            timeout,
            created: now,
            last_activity: Mutex::new(now),
            generating: AtomicBool::new(false),
            turn: tokio::sync::Mutex::new(TurnState::default()),
        })
    }

    /// Stamps the stage as recently used. Every handler that receives a
    /// `sid` calls this first.
    pub fn keep_alive(&self) {
        *self.last_activity.lock().expect("keep-alive clock poisoned") = Instant::now();
    }

    pub fn expired(&self) -> bool {
        self.last_activity
            .lock()
            .expect("keep-alive clock poisoned")
            .elapsed()
            > self.timeout
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// Whether a chat stream is currently producing segments. An
    /// eventually-consistent hint for pollers, not a barrier; correctness
    /// comes from the segment queue itself.
    pub fn is_generating(&self) -> bool {
        self.generating.load(Ordering::Relaxed)
    }

    pub fn set_generating(&self, value: bool) {
        self.generating.store(value, Ordering::Relaxed);
    }

    /// Stamps the time the first TTS segment of the turn became ready.
    pub async fn record_first_tts(&self) {
        let mut turn = self.turn.lock().await;
        if turn.timings.tts_first.is_none() {
            turn.timings.tts_first = Some(Instant::now());
        }
    }

    /// Closes the stage: the worker waits for every in-flight TTS task and
    /// its cleanup to finish, at which point abandoned files are gone.
    pub async fn close(&self) {
        self.worker.close().await;
    }
}

/// Per-turn mutable state, guarded by the stage's turn mutex.
#[derive(Default)]
pub struct TurnState {
    /// Recent dialog fed to ASR as a biasing prompt on the next turn.
    pub asr_prompt_carry: String,
    /// Buffered (user, assistant) pair, committed into `history` when the
    /// next turn starts.
    pub prev_user: String,
    pub prev_assistant: String,
    /// Rolling chat history; always an even number of entries, trimmed from
    /// the front past `2 × chat_window`.
    pub history: Vec<ChatMessage>,
    pub timings: TurnTimings,
}

/// Wall-clock fingerprints of one turn, used for the latency log emitted
/// when the first audio segment is downloaded.
#[derive(Default)]
pub struct TurnTimings {
    /// Spoken-turn begin (the `conversation` endpoint).
    pub sentence_started: Option<Instant>,
    pub upload_done: Option<Instant>,
    /// Transcode finished, ASR network call about to start.
    pub extract_done: Option<Instant>,
    pub asr_done: Option<Instant>,
    /// First sentence committed from the chat stream.
    pub chat_first: Option<Instant>,
    /// First TTS segment ready.
    pub tts_first: Option<Instant>,
    /// First segment downloaded by the client.
    pub download_first: Option<Instant>,
    /// Spoken-audio duration reported by ASR.
    pub asr_duration: Duration,
    pub asr_text: String,
    pub first_reply: String,
}

impl TurnTimings {
    fn step(from: Option<Instant>, to: Option<Instant>) -> f64 {
        match (from, to) {
            (Some(from), Some(to)) if to > from => (to - from).as_secs_f64(),
            _ => 0.0,
        }
    }

    pub fn total(&self) -> f64 {
        Self::step(self.sentence_started, self.download_first)
    }

    pub fn upload(&self) -> f64 {
        Self::step(self.sentence_started, self.upload_done)
    }

    pub fn extract(&self) -> f64 {
        Self::step(self.upload_done, self.extract_done)
    }

    pub fn asr(&self) -> f64 {
        Self::step(self.extract_done, self.asr_done)
    }

    pub fn chat(&self) -> f64 {
        Self::step(self.asr_done, self.chat_first)
    }

    pub fn tts(&self) -> f64 {
        Self::step(self.chat_first, self.tts_first)
    }

    pub fn download(&self) -> f64 {
        Self::step(self.tts_first, self.download_first)
    }
}
