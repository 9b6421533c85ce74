//! Background tasks for the confab server.
//!
//! Includes:
//! - Per-stage expiry watchdogs.
//! - The periodic counter log.

use crate::stage::Stage;
use crate::talk::TalkServer;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// How often a stage watchdog checks for expiry. Keep-alive reads are
/// coarse on purpose; staleness under one tick is acceptable.
const SWEEP_INTERVAL: Duration = Duration::from_secs(3);

/// Interval of the aggregate stats log line.
const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Watches one stage and removes it once the client has gone quiet for
/// longer than the stage timeout. Closing the stage drains its TTS worker,
/// which deletes any abandoned segment files.
pub async fn stage_watchdog(talk: Arc<TalkServer>, stage: Arc<Stage>) {
    loop {
        sleep(SWEEP_INTERVAL).await;

        if stage.expired() {
            tracing::info!(
                age = ?stage.age(),
                stages = talk.count_stages().saturating_sub(1),
                "removing expired stage"
            );
            talk.remove_stage(&stage.sid);
            stage.close().await;
            return;
        }
    }
}

/// Logs the aggregate counters on a fixed cadence, indefinitely.
pub async fn stats_task(talk: Arc<TalkServer>) {
    loop {
        sleep(STATS_INTERVAL).await;

        tracing::info!(
            stages = talk.count_stages(),
            conversations = talk.conversations(),
            errors = talk.errors(),
            badcases = talk.badcases(),
            "talk server stats"
        );
    }
}
