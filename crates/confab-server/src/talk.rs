//! The talk server: registry of live stages plus aggregate counters.

use crate::stage::Stage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Registry of every live conversation stage, with process-wide counters
/// for the periodic stats log.
#[derive(Default)]
pub struct TalkServer {
    stages: Mutex<Vec<Arc<Stage>>>,
    conversations: AtomicU64,
    errors: AtomicU64,
    badcases: AtomicU64,
}

impl TalkServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stage(&self, stage: Arc<Stage>) {
        self.stages.lock().expect("stage registry poisoned").push(stage);
    }

    pub fn get_stage(&self, sid: &str) -> Option<Arc<Stage>> {
        self.stages
            .lock()
            .expect("stage registry poisoned")
            .iter()
            .find(|stage| stage.sid == sid)
            .cloned()
    }

    /// Detaches a stage from the registry. The caller is responsible for
    /// closing the returned stage so its worker can drain.
    pub fn remove_stage(&self, sid: &str) -> Option<Arc<Stage>> {
        let mut stages = self.stages.lock().expect("stage registry poisoned");
        let index = stages.iter().position(|stage| stage.sid == sid)?;
        Some(stages.remove(index))
    }

    pub fn count_stages(&self) -> usize {
        self.stages.lock().expect("stage registry poisoned").len()
    }

    pub fn inc_conversations(&self) {
        self.conversations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_badcases(&self) {
        self.badcases.fetch_add(1, Ordering::Relaxed);
    }

    pub fn conversations(&self) -> u64 {
        self.conversations.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn badcases(&self) -> u64 {
        self.badcases.load(Ordering::Relaxed)
    }
}
