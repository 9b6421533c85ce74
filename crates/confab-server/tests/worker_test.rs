//! TTS worker behavior: the dummy-segment invariant, the polling contract,
//! premature acknowledgement, the segment TTL, and shutdown draining.

mod common;

use common::MockTts;
use confab_server::stage::Stage;
use confab_server::worker::{AnswerSegment, SegmentStatus, TtsWorker};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const STAGE_TIMEOUT: Duration = Duration::from_secs(300);
const SEGMENT_TTL: Duration = Duration::from_secs(300);

fn make_stage(work_dir: &Path, tts: MockTts, segment_ttl: Duration) -> Arc<Stage> {
    let worker = TtsWorker::new(Arc::new(tts), work_dir.to_path_buf(), false, segment_ttl);
    Stage::new(STAGE_TIMEOUT, worker)
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn dummy_is_replaced_by_the_first_real_segment() {
    let dir = tempfile::tempdir().unwrap();
    let stage = make_stage(dir.path(), MockTts::instant(), SEGMENT_TTL);

    let dummy = AnswerSegment::dummy("rid-1");
    let dummy_asid = dummy.asid.clone();
    stage.worker.submit(&stage, dummy);
    assert!(stage.worker.find("rid-1", &dummy_asid).is_some());

    let real = AnswerSegment::real("rid-1", "First sentence.".to_string(), true);
    let real_asid = real.asid.clone();
    stage.worker.submit(&stage, real);

    // The dummy is gone the instant a real segment for the rid lands.
    assert!(stage.worker.find("rid-1", &dummy_asid).is_none());
    assert!(stage.worker.find("rid-1", &real_asid).is_some());

    stage.close().await;
}

#[tokio::test]
async fn find_any_ready_returns_segments_in_submission_order() {
    let dir = tempfile::tempdir().unwrap();
    let stage = make_stage(dir.path(), MockTts::instant(), SEGMENT_TTL);

    let first = AnswerSegment::real("rid-1", "one.".to_string(), true);
    let second = AnswerSegment::real("rid-1", "two.".to_string(), false);
    let third = AnswerSegment::real("rid-1", "three.".to_string(), false);
    stage.worker.submit(&stage, first.clone());
    stage.worker.submit(&stage, second.clone());
    stage.worker.submit(&stage, third.clone());

    for expected in [&first, &second, &third] {
        let segment = stage
            .worker
            .find_any_ready(&stage, "rid-1")
            .await
            .expect("a ready segment");
        assert_eq!(segment.asid, expected.asid);
        stage.worker.remove(&segment.asid);
        segment.signal_remove();
    }

    assert!(stage.worker.find_any_ready(&stage, "rid-1").await.is_none());
    stage.close().await;
}

#[tokio::test]
async fn premature_remove_releases_the_file_after_synthesis() {
    let dir = tempfile::tempdir().unwrap();
    let stage = make_stage(
        dir.path(),
        MockTts::slow(Duration::from_millis(400)),
        SEGMENT_TTL,
    );

    let segment = AnswerSegment::real("rid-1", "slow sentence.".to_string(), true);
    let asid = segment.asid.clone();
    stage.worker.submit(&stage, segment.clone());

    // Acknowledge while synthesis is still pending.
    assert_eq!(segment.status(), SegmentStatus::Pending);
    stage.worker.remove(&asid);
    segment.signal_remove();

    // The synthesis task still completes, then the cleanup task deletes
    // the file it produced.
    wait_until("segment to finish and clean up", || {
        segment
            .tts_path()
            .map(|path| !path.exists())
            .unwrap_or(false)
    })
    .await;

    // The poll advances past the removed segment.
    assert!(stage.worker.find_any_ready(&stage, "rid-1").await.is_none());
    stage.close().await;
}

#[tokio::test]
async fn unacknowledged_segment_is_released_by_the_ttl() {
    let dir = tempfile::tempdir().unwrap();
    let stage = make_stage(dir.path(), MockTts::instant(), Duration::from_millis(300));

    let segment = AnswerSegment::real("rid-1", "forgotten sentence.".to_string(), true);
    stage.worker.submit(&stage, segment.clone());

    wait_until("tts to finish", || {
        segment.status() == SegmentStatus::Ready
    })
    .await;
    let path = segment.tts_path().unwrap();
    assert!(path.exists());

    // Never acknowledged: the TTL detaches the segment and deletes its
    // file.
    wait_until("ttl cleanup", || {
        !path.exists() && stage.worker.find("rid-1", &segment.asid).is_none()
    })
    .await;

    stage.close().await;
}

#[tokio::test]
async fn close_waits_for_tasks_and_deletes_abandoned_files() {
    let dir = tempfile::tempdir().unwrap();
    let stage = make_stage(dir.path(), MockTts::instant(), SEGMENT_TTL);

    let first = AnswerSegment::real("rid-1", "left behind.".to_string(), true);
    let second = AnswerSegment::real("rid-1", "also left.".to_string(), false);
    stage.worker.submit(&stage, first.clone());
    stage.worker.submit(&stage, second.clone());

    wait_until("both segments ready", || {
        first.status() == SegmentStatus::Ready && second.status() == SegmentStatus::Ready
    })
    .await;
    let first_path = first.tts_path().unwrap();
    let second_path = second.tts_path().unwrap();
    assert!(first_path.exists());
    assert!(second_path.exists());

    // Close blocks until every synthesis and cleanup task has exited, and
    // the abandoned files are gone by then.
    stage.close().await;
    assert!(!first_path.exists());
    assert!(!second_path.exists());
}

#[tokio::test]
async fn failed_segment_keeps_its_error_and_skips_no_one() {
    let dir = tempfile::tempdir().unwrap();
    let stage = make_stage(dir.path(), MockTts::failing(), SEGMENT_TTL);

    let segment = AnswerSegment::real("rid-1", "doomed.".to_string(), true);
    stage.worker.submit(&stage, segment.clone());

    let found = stage
        .worker
        .find_any_ready(&stage, "rid-1")
        .await
        .expect("failed segments are surfaced, not swallowed");
    match found.status() {
        SegmentStatus::Failed(reason) => assert!(reason.contains("synthetic failure")),
        other => panic!("expected a failed segment, got {other:?}"),
    }
    assert!(!found.processing());

    stage.close().await;
}
