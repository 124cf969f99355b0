//! End-to-end transfers through the orchestrator
//!
//! Objects are KiB-scale with the same part shape as a 250 MB object at
//! 64 MB parts: four parts of 64, 64, 64 and 58 units.

mod common;

use common::*;
use chrono::{DateTime, Utc};
use partcopy::{
    Ledger, MemoryLedger, MultipartDestination, Orchestrator, PartInfo, PartStatus, Result,
    TransferError, TransferId, TransferRecord, TransferSnapshot, TransferState,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const SRC: &str = "datasets/train.tar";
const DST: &str = "archive/train.tar";

fn statuses(ledger: &dyn Ledger) -> Vec<PartStatus> {
    let id = TransferId::derive(SRC, DST);
    ledger.parts(&id).unwrap().iter().map(|p| p.status).collect()
}

#[test]
fn test_four_part_object_completes() {
    let data = pattern(OBJECT_SIZE);
    let source = ScriptedSource::with_object(SRC, data.clone());
    let destination = ScriptedDestination::default();
    let ledger = MemoryLedger::new();
    let config = test_config(3);

    let summary = Orchestrator::new(&config, &ledger, &source, &destination)
        .run(SRC, DST, None)
        .unwrap();

    assert_eq!(summary.part_count, 4);
    assert_eq!(summary.total_size, OBJECT_SIZE);
    assert_eq!(summary.bytes_moved, OBJECT_SIZE);
    assert_eq!(summary.parts_skipped, 0);
    assert_eq!(destination.inner.object(DST).unwrap(), data);
    assert_eq!(destination.manifests(), vec![vec![1, 2, 3, 4]]);

    // Every part read once, the last one 58 KiB long
    for part in 1..=4 {
        assert_eq!(source.reads_at(offset_of(part)), 1);
    }
    assert_eq!(OBJECT_SIZE - offset_of(4), 58 * KIB);

    // DONE clears the ledger and releases the session
    assert!(ledger.load_record(&summary.transfer_id).unwrap().is_none());
    assert!(ledger.parts(&summary.transfer_id).unwrap().is_empty());
    assert_eq!(destination.inner.open_uploads(), 0);
}

#[test]
fn test_part_three_exhaustion_then_resume() {
    let data = pattern(OBJECT_SIZE);
    let source = ScriptedSource::with_object(SRC, data.clone());
    let destination = ScriptedDestination::default();
    let ledger = MemoryLedger::new();
    let config = test_config(3);

    source.fail_reads(offset_of(3), ALWAYS);
    let err = Orchestrator::new(&config, &ledger, &source, &destination)
        .run(SRC, DST, None)
        .unwrap_err();

    match &err {
        TransferError::Aborted {
            outstanding, cause, ..
        } => {
            assert_eq!(outstanding, "3");
            assert!(matches!(
                **cause,
                TransferError::PartFailed {
                    part_number: 3,
                    attempts: 3,
                    ..
                }
            ));
        }
        other => panic!("expected Aborted, got {other:?}"),
    }
    assert!(matches!(err.root_cause(), TransferError::TransientIo { .. }));

    use PartStatus::*;
    assert_eq!(statuses(&ledger), vec![Uploaded, Uploaded, Failed, Uploaded]);
    let id = TransferId::derive(SRC, DST);
    let record = ledger.load_record(&id).unwrap().unwrap();
    assert_eq!(record.state, TransferState::Aborted);
    assert!(record.upload_id.is_some());
    assert_eq!(ledger.get_part(&id, 3).unwrap().unwrap().attempt_count, 3);
    assert_eq!(source.reads_at(offset_of(3)), 3);
    assert!(destination.aborts().is_empty());

    // Second run with the fault removed only touches part 3
    source.heal();
    let summary = Orchestrator::new(&config, &ledger, &source, &destination)
        .run(SRC, DST, None)
        .unwrap();

    assert_eq!(summary.parts_skipped, 3);
    assert_eq!(summary.bytes_moved, PART_SIZE);
    assert_eq!(destination.inner.object(DST).unwrap(), data);
    for part in [1, 2, 4] {
        assert_eq!(source.reads_at(offset_of(part)), 1, "part {part} re-read");
        assert_eq!(destination.upload_calls(part), 1, "part {part} re-uploaded");
    }
    assert_eq!(source.reads_at(offset_of(3)), 4);
    assert_eq!(destination.upload_calls(3), 1);
    assert!(ledger.load_record(&id).unwrap().is_none());
}

#[test]
fn test_resume_skips_uploaded_parts() {
    let size = 3 * PART_SIZE;
    let data = pattern(size);
    let source = ScriptedSource::with_object(SRC, data.clone());
    let destination = ScriptedDestination::default();
    let config = test_config(3);

    // An earlier process uploaded parts 1 and 2 and persisted a snapshot
    let upload_id = destination.inner.open_multipart(DST).unwrap();
    let mut record = partcopy::TransferRecord::new(SRC, DST, size, PART_SIZE);
    record.upload_id = Some(upload_id.clone());
    record.transition(TransferState::Aborted);
    let mut parts = partcopy::planner::plan(size, PART_SIZE).unwrap();
    for part in &mut parts[..2] {
        let bytes = &data[part.offset as usize..part.end() as usize];
        let etag = destination
            .inner
            .upload_part(
                DST,
                &upload_id,
                part.part_number,
                bytes,
                Instant::now() + Duration::from_secs(30),
            )
            .unwrap();
        part.status = PartStatus::Uploaded;
        part.etag = Some(etag);
    }
    let snapshot = TransferSnapshot { record, parts };
    let snapshot = TransferSnapshot::from_json(&snapshot.to_json().unwrap()).unwrap();

    let ledger = MemoryLedger::new();
    let summary = Orchestrator::new(&config, &ledger, &source, &destination)
        .run(SRC, DST, Some(&snapshot))
        .unwrap();

    assert_eq!(summary.parts_skipped, 2);
    assert_eq!(source.reads_at(offset_of(1)), 0);
    assert_eq!(source.reads_at(offset_of(2)), 0);
    assert_eq!(source.reads_at(offset_of(3)), 1);
    assert_eq!(destination.upload_calls(1), 0);
    assert_eq!(destination.upload_calls(2), 0);
    assert_eq!(destination.upload_calls(3), 1);
    assert_eq!(destination.inner.object(DST).unwrap(), data);
}

#[test]
fn test_merge_lists_parts_in_ascending_order() {
    let size = 3 * PART_SIZE;
    let data = pattern(size);
    let source = ScriptedSource::with_object(SRC, data.clone());
    let destination = ScriptedDestination::default();
    let ledger = MemoryLedger::new();
    let mut config = test_config(3);
    config.reader_threads = 3;
    config.writer_threads = 3;

    destination.delay_upload(1, Duration::from_millis(100));
    destination.delay_upload(2, Duration::from_millis(250));

    Orchestrator::new(&config, &ledger, &source, &destination)
        .run(SRC, DST, None)
        .unwrap();

    assert_eq!(destination.completion_order(), vec![3, 1, 2]);
    assert_eq!(destination.manifests(), vec![vec![1, 2, 3]]);
    assert_eq!(destination.inner.object(DST).unwrap(), data);
}

#[test]
fn test_merge_failure_aborts_session_and_keeps_ledger() {
    let source = ScriptedSource::with_object(SRC, pattern(OBJECT_SIZE));
    let destination = ScriptedDestination::default();
    let ledger = MemoryLedger::new();
    let config = test_config(3);

    destination.fail_completion(true);
    let err = Orchestrator::new(&config, &ledger, &source, &destination)
        .run(SRC, DST, None)
        .unwrap_err();
    assert!(matches!(err.root_cause(), TransferError::Provider { .. }));

    assert_eq!(destination.aborts().len(), 1);
    assert_eq!(destination.inner.open_uploads(), 0);

    let id = TransferId::derive(SRC, DST);
    let parts = ledger.parts(&id).unwrap();
    assert_eq!(parts.len(), 4);
    assert!(parts
        .iter()
        .all(|p| p.status == PartStatus::Uploaded && p.etag.is_some()));

    let record = ledger.load_record(&id).unwrap().unwrap();
    assert_eq!(record.state, TransferState::Aborted);
    assert!(record.upload_id.is_none());

    // The released session cannot be reused, so the next run redoes the parts
    destination.heal();
    let summary = Orchestrator::new(&config, &ledger, &source, &destination)
        .run(SRC, DST, None)
        .unwrap();
    assert_eq!(summary.parts_skipped, 0);
    assert_eq!(destination.inner.object(DST).unwrap(), pattern(OBJECT_SIZE));
}

#[test]
fn test_exhausted_upload_halts_new_scheduling() {
    let size = 32 * 4 * KIB;
    let source = ScriptedSource::with_object(SRC, pattern(size));
    let destination = ScriptedDestination::default();
    let ledger = MemoryLedger::new();
    let mut config = test_config(2);
    config.part_size = 4 * KIB;
    config.retry.base_delay_ms = 10;

    source.set_read_delay(Duration::from_millis(20));
    destination.fail_uploads(1, ALWAYS);

    let err = Orchestrator::new(&config, &ledger, &source, &destination)
        .run(SRC, DST, None)
        .unwrap_err();
    assert!(matches!(
        err,
        TransferError::Aborted { ref cause, .. }
            if matches!(**cause, TransferError::PartFailed { part_number: 1, attempts: 2, .. })
    ));

    let statuses = statuses(&ledger);
    assert_eq!(statuses.len(), 32);
    assert_eq!(statuses[0], PartStatus::Failed);
    // In-flight parts drained; nothing is left mid-flight
    for status in &statuses[1..] {
        assert!(matches!(status, PartStatus::Uploaded | PartStatus::Planned));
    }
    assert!(statuses.contains(&PartStatus::Planned));
    assert!(source.total_reads() < 32);
    assert_eq!(destination.upload_calls(1), 2);
}

#[test]
fn test_retry_ceiling_is_respected() {
    for ceiling in 1..=4 {
        let source = ScriptedSource::with_object(SRC, pattern(OBJECT_SIZE));
        let destination = ScriptedDestination::default();
        let ledger = MemoryLedger::new();
        let mut config = test_config(ceiling);
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 5;

        // One failure short of the ceiling still completes
        source.fail_reads(offset_of(2), ceiling - 1);
        Orchestrator::new(&config, &ledger, &source, &destination)
            .run(SRC, DST, None)
            .unwrap();
        assert_eq!(source.reads_at(offset_of(2)), ceiling);

        // Reaching it aborts
        let source = ScriptedSource::with_object(SRC, pattern(OBJECT_SIZE));
        source.fail_reads(offset_of(2), ceiling);
        let err = Orchestrator::new(&config, &ledger, &source, &destination)
            .run(SRC, DST, None)
            .unwrap_err();
        assert!(matches!(err, TransferError::Aborted { .. }));
        assert_eq!(source.reads_at(offset_of(2)), ceiling);
    }
}

#[test]
fn test_transient_upload_failures_retry_with_held_buffer() {
    let source = ScriptedSource::with_object(SRC, pattern(OBJECT_SIZE));
    let destination = ScriptedDestination::default();
    let ledger = MemoryLedger::new();
    let config = test_config(3);

    destination.fail_uploads(2, 2);
    Orchestrator::new(&config, &ledger, &source, &destination)
        .run(SRC, DST, None)
        .unwrap();

    assert_eq!(destination.upload_calls(2), 3);
    // The spooled buffer was reused, not re-read
    assert_eq!(source.reads_at(offset_of(2)), 1);
    assert_eq!(destination.inner.object(DST).unwrap(), pattern(OBJECT_SIZE));
}

#[test]
fn test_cancellation_aborts_and_keeps_ledger() {
    let size = 16 * 4 * KIB;
    let source = ScriptedSource::with_object(SRC, pattern(size));
    let destination = ScriptedDestination::default();
    let ledger = MemoryLedger::new();
    let mut config = test_config(3);
    config.part_size = 4 * KIB;
    config.reader_threads = 2;
    source.set_read_delay(Duration::from_millis(30));

    let orchestrator = Orchestrator::new(&config, &ledger, &source, &destination);
    let cancel = orchestrator.cancel_handle();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(70));
        cancel.cancel();
    });

    let err = orchestrator.run(SRC, DST, None).unwrap_err();
    canceller.join().unwrap();
    assert!(matches!(err.root_cause(), TransferError::Cancelled));

    let found: HashSet<PartStatus> = statuses(&ledger).into_iter().collect();
    assert!(found.is_subset(&HashSet::from([PartStatus::Uploaded, PartStatus::Planned])));
    assert!(found.contains(&PartStatus::Planned));

    // Cancellation sticks to the handle; a fresh orchestrator resumes
    source.set_read_delay(Duration::ZERO);
    Orchestrator::new(&config, &ledger, &source, &destination)
        .run(SRC, DST, None)
        .unwrap();
    assert_eq!(destination.inner.object(DST).unwrap(), pattern(size));
}

#[test]
fn test_changed_source_is_rejected_on_resume() {
    let source = ScriptedSource::with_object(SRC, pattern(OBJECT_SIZE));
    let destination = ScriptedDestination::default();
    let ledger = MemoryLedger::new();
    let config = test_config(1);

    source.fail_reads(offset_of(4), ALWAYS);
    assert!(Orchestrator::new(&config, &ledger, &source, &destination)
        .run(SRC, DST, None)
        .is_err());

    source.inner.insert(SRC, pattern(OBJECT_SIZE + 1));
    source.heal();
    let err = Orchestrator::new(&config, &ledger, &source, &destination)
        .run(SRC, DST, None)
        .unwrap_err();
    assert!(matches!(err, TransferError::Validation(ref msg) if msg.contains("source changed")));
}

#[test]
fn test_resume_keeps_stored_part_size() {
    let source = ScriptedSource::with_object(SRC, pattern(OBJECT_SIZE));
    let destination = ScriptedDestination::default();
    let ledger = MemoryLedger::new();
    let config = test_config(1);

    source.fail_reads(offset_of(2), ALWAYS);
    assert!(Orchestrator::new(&config, &ledger, &source, &destination)
        .run(SRC, DST, None)
        .is_err());

    source.heal();
    let mut smaller = test_config(1);
    smaller.part_size = 16 * KIB;
    let summary = Orchestrator::new(&smaller, &ledger, &source, &destination)
        .run(SRC, DST, None)
        .unwrap();
    assert_eq!(summary.part_count, 4);
    assert_eq!(destination.inner.object(DST).unwrap(), pattern(OBJECT_SIZE));
}

#[test]
fn test_zero_byte_object() {
    let source = ScriptedSource::with_object(SRC, Vec::new());
    let destination = ScriptedDestination::default();
    let ledger = MemoryLedger::new();
    let config = test_config(3);

    let summary = Orchestrator::new(&config, &ledger, &source, &destination)
        .run(SRC, DST, None)
        .unwrap();
    assert_eq!(summary.part_count, 0);
    assert_eq!(summary.total_size, 0);
    assert_eq!(destination.inner.object(DST), Some(Vec::new()));
    assert_eq!(destination.manifests(), vec![vec![1]]);
}

#[test]
fn test_undersized_parts_rejected_before_upload() {
    let source = ScriptedSource::with_object(SRC, pattern(OBJECT_SIZE));
    let destination = ScriptedDestination::default();
    let ledger = MemoryLedger::new();
    let mut config = test_config(3);
    config.min_part_size = 5 * 1024 * KIB;

    let err = Orchestrator::new(&config, &ledger, &source, &destination)
        .run(SRC, DST, None)
        .unwrap_err();
    assert!(matches!(err, TransferError::Validation(_)));
    assert_eq!(source.total_reads(), 0);
    assert_eq!(destination.inner.open_uploads(), 0);
}

#[test]
fn test_snapshot_for_other_transfer_rejected() {
    let source = ScriptedSource::with_object(SRC, pattern(OBJECT_SIZE));
    let destination = ScriptedDestination::default();
    let ledger = MemoryLedger::new();
    let config = test_config(3);

    let record = partcopy::TransferRecord::new("other", DST, OBJECT_SIZE, PART_SIZE);
    let parts = partcopy::planner::plan(OBJECT_SIZE, PART_SIZE).unwrap();
    let snapshot = TransferSnapshot { record, parts };

    let err = Orchestrator::new(&config, &ledger, &source, &destination)
        .run(SRC, DST, Some(&snapshot))
        .unwrap_err();
    assert!(matches!(err, TransferError::Validation(_)));
}

#[test]
fn test_stalled_upload_fails_near_part_timeout() {
    let source = ScriptedSource::with_object(SRC, pattern(OBJECT_SIZE));
    let destination = ScriptedDestination::default();
    let ledger = MemoryLedger::new();
    let mut config = test_config(1);
    config.part_timeout_secs = 1;

    destination.delay_upload(1, Duration::from_secs(6));
    let started = Instant::now();
    let err = Orchestrator::new(&config, &ledger, &source, &destination)
        .run(SRC, DST, None)
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
    assert!(matches!(
        err,
        TransferError::Aborted { ref cause, .. }
            if matches!(**cause, TransferError::PartFailed { part_number: 1, attempts: 1, .. })
    ));
    assert!(matches!(err.root_cause(), TransferError::TransientIo { .. }));
    assert!(!destination.completion_order().contains(&1));
    assert_eq!(statuses(&ledger)[0], PartStatus::Failed);
}

#[test]
fn test_stalled_read_fails_near_part_timeout() {
    let source = ScriptedSource::with_object(SRC, pattern(OBJECT_SIZE));
    let destination = ScriptedDestination::default();
    let ledger = MemoryLedger::new();
    let mut config = test_config(1);
    config.part_timeout_secs = 1;

    source.set_read_delay(Duration::from_secs(6));
    let started = Instant::now();
    let err = Orchestrator::new(&config, &ledger, &source, &destination)
        .run(SRC, DST, None)
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
    assert!(matches!(err.root_cause(), TransferError::TransientIo { .. }));
    assert!(destination.completion_order().is_empty());
}

#[test]
fn test_late_successful_upload_is_kept() {
    let source = ScriptedSource::with_object(SRC, pattern(OBJECT_SIZE));
    let destination = ScriptedDestination::default();
    let ledger = MemoryLedger::new();
    let mut config = test_config(1);
    config.part_timeout_secs = 1;

    // The provider finishes the part after the deadline without noticing it
    destination.ignore_deadlines(true);
    destination.delay_upload(2, Duration::from_millis(1_500));
    Orchestrator::new(&config, &ledger, &source, &destination)
        .run(SRC, DST, None)
        .unwrap();

    assert_eq!(destination.upload_calls(2), 1);
    assert_eq!(destination.inner.object(DST).unwrap(), pattern(OBJECT_SIZE));
}

#[test]
fn test_same_size_rewrite_is_rejected_on_resume() {
    let source = ScriptedSource::default();
    let planned_at: DateTime<Utc> = "2026-03-01T12:00:00Z".parse().unwrap();
    source
        .inner
        .insert_modified_at(SRC, pattern(OBJECT_SIZE), planned_at);
    let destination = ScriptedDestination::default();
    let ledger = MemoryLedger::new();
    let config = test_config(1);

    source.fail_reads(offset_of(4), ALWAYS);
    assert!(Orchestrator::new(&config, &ledger, &source, &destination)
        .run(SRC, DST, None)
        .is_err());
    let id = TransferId::derive(SRC, DST);
    let record = ledger.load_record(&id).unwrap().unwrap();
    assert_eq!(record.source_modified, Some(planned_at));

    // Same length, new content
    let rewritten: Vec<u8> = pattern(OBJECT_SIZE).iter().map(|b| !b).collect();
    source
        .inner
        .insert_modified_at(SRC, rewritten, planned_at + chrono::Duration::seconds(90));
    source.heal();
    let err = Orchestrator::new(&config, &ledger, &source, &destination)
        .run(SRC, DST, None)
        .unwrap_err();
    assert!(matches!(err, TransferError::Validation(ref msg) if msg.contains("modified")));
    assert!(destination.inner.object(DST).is_none());
    assert_eq!(destination.upload_calls(4), 0);
}

#[test]
fn test_abort_session_on_failure_releases_session() {
    let source = ScriptedSource::with_object(SRC, pattern(OBJECT_SIZE));
    let destination = ScriptedDestination::default();
    let ledger = MemoryLedger::new();
    let mut config = test_config(3);
    config.abort_session_on_failure = true;

    destination.fail_uploads(3, ALWAYS);
    let err = Orchestrator::new(&config, &ledger, &source, &destination)
        .run(SRC, DST, None)
        .unwrap_err();
    assert!(matches!(err, TransferError::Aborted { ref outstanding, .. } if outstanding == "3"));

    assert_eq!(destination.aborts().len(), 1);
    assert_eq!(destination.inner.open_uploads(), 0);
    let id = TransferId::derive(SRC, DST);
    let record = ledger.load_record(&id).unwrap().unwrap();
    assert_eq!(record.state, TransferState::Aborted);
    assert!(record.upload_id.is_none());

    // Part rows are left as they were
    use PartStatus::*;
    assert_eq!(statuses(&ledger), vec![Uploaded, Uploaded, Failed, Uploaded]);

    // Uploaded parts went with the session, so every part is planned again
    destination.heal();
    let summary = Orchestrator::new(&config, &ledger, &source, &destination)
        .run(SRC, DST, None)
        .unwrap();
    assert_eq!(summary.parts_skipped, 0);
    assert_eq!(summary.bytes_moved, OBJECT_SIZE);
    for part in [1, 2, 4] {
        assert_eq!(destination.upload_calls(part), 2, "part {part}");
    }
    assert_eq!(destination.inner.object(DST).unwrap(), pattern(OBJECT_SIZE));
}

/// MemoryLedger whose `clear` fails while `fail_clear` is set
#[derive(Default)]
struct StickyLedger {
    inner: MemoryLedger,
    fail_clear: AtomicBool,
}

impl Ledger for StickyLedger {
    fn load_record(&self, id: &TransferId) -> Result<Option<TransferRecord>> {
        self.inner.load_record(id)
    }

    fn save_record(&self, record: &TransferRecord) -> Result<()> {
        self.inner.save_record(record)
    }

    fn put_part(&self, id: &TransferId, part: &PartInfo) -> Result<()> {
        self.inner.put_part(id, part)
    }

    fn get_part(&self, id: &TransferId, part_number: u32) -> Result<Option<PartInfo>> {
        self.inner.get_part(id, part_number)
    }

    fn parts(&self, id: &TransferId) -> Result<Vec<PartInfo>> {
        self.inner.parts(id)
    }

    fn clear(&self, id: &TransferId) -> Result<()> {
        if self.fail_clear.load(Ordering::SeqCst) {
            return Err(TransferError::transient("clear ledger", "database is locked"));
        }
        self.inner.clear(id)
    }

    fn transfers(&self) -> Result<Vec<TransferRecord>> {
        self.inner.transfers()
    }
}

#[test]
fn test_completed_transfer_is_recorded_before_ledger_clear() {
    let source = ScriptedSource::with_object(SRC, pattern(OBJECT_SIZE));
    let destination = ScriptedDestination::default();
    let ledger = StickyLedger::default();
    let config = test_config(3);

    ledger.fail_clear.store(true, Ordering::SeqCst);
    assert!(Orchestrator::new(&config, &ledger, &source, &destination)
        .run(SRC, DST, None)
        .is_err());
    assert_eq!(destination.inner.object(DST).unwrap(), pattern(OBJECT_SIZE));

    let id = TransferId::derive(SRC, DST);
    let record = ledger.load_record(&id).unwrap().unwrap();
    assert_eq!(record.state, TransferState::Done);
    assert!(record.upload_id.is_none());

    // The next run only finishes the cleanup
    ledger.fail_clear.store(false, Ordering::SeqCst);
    let summary = Orchestrator::new(&config, &ledger, &source, &destination)
        .run(SRC, DST, None)
        .unwrap();
    assert_eq!(summary.bytes_moved, 0);
    assert_eq!(summary.parts_skipped, 4);
    assert_eq!(destination.manifests().len(), 1);
    for part in 1..=4 {
        assert_eq!(destination.upload_calls(part), 1);
    }
    assert!(ledger.load_record(&id).unwrap().is_none());
}

#[test]
fn test_part_count_hint_sets_part_size() {
    let source = ScriptedSource::with_object(SRC, pattern(OBJECT_SIZE));
    let destination = ScriptedDestination::default();
    let ledger = MemoryLedger::new();
    let mut config = test_config(3);
    config.part_count = Some(5);

    let summary = Orchestrator::new(&config, &ledger, &source, &destination)
        .run(SRC, DST, None)
        .unwrap();
    assert_eq!(summary.part_count, 5);
    assert_eq!(source.reads_at(50 * KIB), 1);
    assert_eq!(destination.manifests(), vec![vec![1, 2, 3, 4, 5]]);
    assert_eq!(destination.inner.object(DST).unwrap(), pattern(OBJECT_SIZE));
}
