//! The per-stage TTS worker: segment queue, synthesis tasks, and file GC.

use crate::stage::Stage;
use confab_voice::TtsBackend;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

/// Cadence of the polling loop in `find_any_ready`.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// State of one segment's synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentStatus {
    Pending,
    Ready,
    Failed(String),
}

impl Default for SegmentStatus {
    fn default() -> Self {
        Self::Pending
    }
}

#[derive(Default)]
struct SegmentState {
    status: SegmentStatus,
    tts_path: Option<PathBuf>,
    logged: bool,
}

/// One sentence of one turn, with its own audio file.
///
/// A `dummy` segment carries no text; it is inserted the moment the chat
/// stream opens so a fast poller sees the turn as alive, and it is removed
/// as soon as the first real sentence for the same `rid` arrives.
pub struct AnswerSegment {
    /// Request id, shared across all segments of a turn.
    pub rid: String,
    /// Segment id, unique.
    pub asid: String,
    pub text: String,
    /// Whether this was the first sentence of the turn.
    pub first: bool,
    pub dummy: bool,
    state: Mutex<SegmentState>,
    remove_signal: Notify,
}

impl AnswerSegment {
    pub fn real(rid: &str, text: String, first: bool) -> Arc<Self> {
        Arc::new(Self {
            rid: rid.to_string(),
            asid: Uuid::new_v4().to_string(),
            text,
            first,
            dummy: false,
            state: Mutex::new(SegmentState::default()),
            remove_signal: Notify::new(),
        })
    }

    pub fn dummy(rid: &str) -> Arc<Self> {
        Arc::new(Self {
            rid: rid.to_string(),
            asid: Uuid::new_v4().to_string(),
            text: String::new(),
            first: false,
            dummy: true,
            state: Mutex::new(SegmentState::default()),
            remove_signal: Notify::new(),
        })
    }

    pub fn status(&self) -> SegmentStatus {
        self.state.lock().expect("segment state poisoned").status.clone()
    }

    /// Whether the client should keep polling: a dummy, or synthesis still
    /// pending.
    pub fn processing(&self) -> bool {
        self.dummy || self.status() == SegmentStatus::Pending
    }

    pub fn tts_path(&self) -> Option<PathBuf> {
        self.state
            .lock()
            .expect("segment state poisoned")
            .tts_path
            .clone()
    }

    fn set_tts_path(&self, path: PathBuf) {
        self.state.lock().expect("segment state poisoned").tts_path = Some(path);
    }

    fn set_ready(&self) {
        self.state.lock().expect("segment state poisoned").status = SegmentStatus::Ready;
    }

    fn set_failed(&self, error: String) {
        self.state.lock().expect("segment state poisoned").status = SegmentStatus::Failed(error);
    }

    /// Marks the segment as logged; returns `true` only the first time, so
    /// the "Bot: …" line appears once however often the browser re-requests
    /// the file.
    pub fn mark_logged(&self) -> bool {
        let mut state = self.state.lock().expect("segment state poisoned");
        if state.logged {
            false
        } else {
            state.logged = true;
            true
        }
    }

    /// Releases the segment's file ahead of the TTL. A stored permit makes
    /// this safe to fire before the cleanup task starts waiting.
    pub fn signal_remove(&self) {
        self.remove_signal.notify_one();
    }
}

/// Per-stage queue that runs TTS tasks concurrently, tracks segment state,
/// and garbage-collects audio files.
pub struct TtsWorker {
    segments: Mutex<Vec<Arc<AnswerSegment>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
    tts: Arc<dyn TtsBackend>,
    work_dir: PathBuf,
    keep_files: bool,
    segment_ttl: Duration,
}

impl TtsWorker {
    pub fn new(
        tts: Arc<dyn TtsBackend>,
        work_dir: PathBuf,
        keep_files: bool,
        segment_ttl: Duration,
    ) -> Self {
        Self {
            segments: Mutex::new(Vec::new()),
            tasks: Mutex::new(Vec::new()),
            shutdown: watch::channel(false).0,
            tts,
            work_dir,
            keep_files,
            segment_ttl,
        }
    }

    /// Appends a segment in emission order and, for real segments, starts
    /// its synthesis and cleanup tasks.
    ///
    /// Invariant: at most one dummy per `rid`, removed as soon as any real
    /// segment for that `rid` is appended.
    pub fn submit(&self, stage: &Arc<Stage>, segment: Arc<AnswerSegment>) {
        self.segments
            .lock()
            .expect("segment queue poisoned")
            .push(segment.clone());

        if segment.dummy {
            return;
        }

        if let Some(front) = self.find_front(&segment.rid) {
            if front.dummy {
                self.remove(&front.asid);
            }
        }

        let tts = self.tts.clone();
        let stage = stage.clone();
        let work_dir = self.work_dir.clone();
        let keep_files = self.keep_files;
        let ttl = self.segment_ttl;
        let mut shutdown = self.shutdown.subscribe();
        let span = stage.span.clone();

        let handle = tokio::spawn(
            async move {
                let choose = {
                    let segment = segment.clone();
                    let work_dir = work_dir.clone();
                    move |ext: &str| -> PathBuf {
                        let path = work_dir.join(format!(
                            "assistant-{}-sentence-{}-tts.{}",
                            segment.rid, segment.asid, ext
                        ));
                        segment.set_tts_path(path.clone());
                        path
                    }
                };

                match tts.synthesize(&choose, &segment.text).await {
                    Ok(()) => {
                        segment.set_ready();
                        if segment.first {
                            stage.record_first_tts().await;
                        }
                        tracing::debug!(asid = %segment.asid, text = %segment.text, "tts segment ready");
                    }
                    Err(err) => {
                        tracing::warn!(asid = %segment.asid, error = %err, "tts segment failed");
                        segment.set_failed(err.to_string());
                    }
                }

                // Hold the segment until the client acknowledges it, the
                // TTL fires, or the worker shuts down; then detach it and
                // delete its file.
                tokio::select! {
                    _ = segment.remove_signal.notified() => {}
                    _ = tokio::time::sleep(ttl) => {}
                    _ = shutdown.changed() => {}
                }

                stage.worker.remove(&segment.asid);
                if !keep_files {
                    if let Some(path) = segment.tts_path() {
                        let _ = tokio::fs::remove_file(&path).await;
                    }
                }
                tracing::debug!(asid = %segment.asid, "segment released");
            }
            .instrument(span),
        );

        self.tasks.lock().expect("task list poisoned").push(handle);
    }

    /// Exact lookup by request and segment id.
    pub fn find(&self, rid: &str, asid: &str) -> Option<Arc<AnswerSegment>> {
        self.segments
            .lock()
            .expect("segment queue poisoned")
            .iter()
            .find(|segment| segment.rid == rid && segment.asid == asid)
            .cloned()
    }

    /// First queued segment of a request. Acknowledged segments are removed
    /// from the queue, so front-of-queue order is emission order.
    fn find_front(&self, rid: &str) -> Option<Arc<AnswerSegment>> {
        self.segments
            .lock()
            .expect("segment queue poisoned")
            .iter()
            .find(|segment| segment.rid == rid)
            .cloned()
    }

    /// The polling contract behind the `query` endpoint.
    ///
    /// Loops on a 100 ms cadence: waits out the window where the model is
    /// still generating and nothing is queued, returns `None` once every
    /// segment of the turn has been consumed, skips past the dummy, and
    /// returns the front segment once it is ready — or failed, so the
    /// client can acknowledge the failure and advance to later segments,
    /// which are unaffected by it.
    pub async fn find_any_ready(&self, stage: &Stage, rid: &str) -> Option<Arc<AnswerSegment>> {
        loop {
            if *self.shutdown.borrow() {
                return None;
            }
            tokio::time::sleep(POLL_INTERVAL).await;

            // The model may still be writing the next sentence long after
            // the previous one was consumed; wait rather than report the
            // turn as drained.
            while stage.is_generating() && self.find_front(rid).is_none() {
                if *self.shutdown.borrow() {
                    return None;
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }

            let Some(segment) = self.find_front(rid) else {
                return None;
            };

            if segment.dummy {
                continue;
            }

            match segment.status() {
                SegmentStatus::Ready | SegmentStatus::Failed(_) => return Some(segment),
                SegmentStatus::Pending => continue,
            }
        }
    }

    /// Detaches a segment from the queue. File deletion happens in the
    /// segment's cleanup task. Removing an unknown `asid` is a no-op.
    pub fn remove(&self, asid: &str) -> Option<Arc<AnswerSegment>> {
        let mut segments = self.segments.lock().expect("segment queue poisoned");
        let index = segments.iter().position(|segment| segment.asid == asid)?;
        Some(segments.remove(index))
    }

    /// Blocks until every synthesis and cleanup task has exited. Called on
    /// stage removal; the shutdown signal releases cleanup tasks still
    /// waiting on their TTL, so abandoned files are deleted here.
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().expect("task list poisoned");
            tasks.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
    }
}
