//! Reader and writer pools
//!
//! ```text
//!   work queue (unbounded, PLANNED parts)
//!        |            ^ requeue on read failure / bad buffer
//!        v            |
//!   reader pool ------+
//!        |
//!        v
//!   ready queue (bounded: backpressure)
//!        |
//!        v
//!   writer pool --> ledger (UPLOADED + etag)
//! ```
//!
//! Both pools are scoped threads borrowing one [`Shared`] state. A part is
//! held by exactly one worker at a time, so ledger writes for a part never
//! race. The first fatal error wins, raises the stop signal, and is reported
//! once every worker has drained.

mod reader;
mod writer;

use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::ledger::Ledger;
use crate::part::{PartInfo, PartStatus, TransferId};
use crate::provider::{MultipartDestination, RangeSource};
use crate::signal::StopSignal;
use crate::spool::{PartBuffer, Spool};
use crossbeam::channel;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, warn};

/// How often idle readers re-check the stop flag and outstanding count
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Counters updated by the workers
#[derive(Debug, Default)]
pub struct Progress {
    pub bytes_read: AtomicU64,
    pub bytes_uploaded: AtomicU64,
    pub parts_uploaded: AtomicUsize,
    /// Failed attempts across all parts
    pub failed_attempts: AtomicU64,
}

/// Endpoints of one transfer
#[derive(Debug, Clone, Copy)]
pub(crate) struct Route<'a> {
    pub transfer_id: &'a TransferId,
    pub source_key: &'a str,
    pub destination_key: &'a str,
    pub upload_id: &'a str,
}

/// State every worker borrows
pub(crate) struct Shared<'a> {
    config: &'a TransferConfig,
    ledger: &'a dyn Ledger,
    source: &'a dyn RangeSource,
    destination: &'a dyn MultipartDestination,
    route: Route<'a>,
    spool: Spool,
    stop: Arc<StopSignal>,
    outstanding: AtomicUsize,
    fatal: Mutex<Option<TransferError>>,
    pub progress: Progress,
}

/// What a worker does with a part after a failed attempt
enum Disposition {
    /// Backoff elapsed; try again
    Retry,
    /// Stopped; the part was left PLANNED
    Release,
    /// Retries exhausted or the error is not retryable
    Failed,
}

impl<'a> Shared<'a> {
    pub fn new(
        config: &'a TransferConfig,
        ledger: &'a dyn Ledger,
        source: &'a dyn RangeSource,
        destination: &'a dyn MultipartDestination,
        route: Route<'a>,
        stop: Arc<StopSignal>,
    ) -> Self {
        Self {
            config,
            ledger,
            source,
            destination,
            route,
            spool: Spool::new(config.spool_threshold, config.spool_dir.clone()),
            stop,
            outstanding: AtomicUsize::new(0),
            fatal: Mutex::new(None),
            progress: Progress::default(),
        }
    }

    fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    fn part_done(&self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }

    /// Record the first fatal error and stop scheduling
    fn fail(&self, err: TransferError) {
        {
            let mut fatal = self.fatal.lock();
            if fatal.is_none() {
                error!("Transfer {} halting: {}", self.route.transfer_id, err);
                *fatal = Some(err);
            } else {
                debug!("Additional failure after halt: {}", err);
            }
        }
        self.stop.stop();
    }

    /// Write a part row; a ledger failure is fatal
    fn persist(&self, part: &PartInfo) -> bool {
        match self.ledger.put_part(self.route.transfer_id, part) {
            Ok(()) => true,
            Err(err) => {
                self.fail(err);
                false
            }
        }
    }

    /// Account for a failed attempt and decide what happens next
    ///
    /// A retried part is persisted as `retry_status` for the duration of the
    /// backoff; readers pass `Planned`, writers holding a buffer pass `Read`.
    fn on_attempt_failed(
        &self,
        part: &mut PartInfo,
        err: TransferError,
        retry_status: PartStatus,
    ) -> Disposition {
        part.attempt_count += 1;
        self.progress.failed_attempts.fetch_add(1, Ordering::Relaxed);
        let max_attempts = self.config.retry.max_attempts;

        if !err.is_retryable() || !self.config.retry.allows_another(part.attempt_count) {
            part.status = PartStatus::Failed;
            self.persist(part);
            self.fail(TransferError::PartFailed {
                part_number: part.part_number,
                attempts: part.attempt_count,
                last_error: Box::new(err),
            });
            return Disposition::Failed;
        }

        if self.stop.is_stopped() {
            return self.release(part);
        }

        warn!(
            "Part {} attempt {}/{} failed: {}",
            part.part_number, part.attempt_count, max_attempts, err
        );
        part.status = retry_status;
        if !self.persist(part) {
            return Disposition::Failed;
        }

        let delay = self.config.retry.delay_for(part.attempt_count);
        debug!("Retrying part {} in {:?}", part.part_number, delay);
        if self.stop.sleep(delay) {
            return self.release(part);
        }
        Disposition::Retry
    }

    /// Leave a part PLANNED for a later run
    fn release(&self, part: &mut PartInfo) -> Disposition {
        debug!("Releasing part {} after stop", part.part_number);
        part.status = PartStatus::Planned;
        self.persist(part);
        Disposition::Release
    }
}

/// Run both pools over `pending` until every part is uploaded or the
/// transfer halts
pub(crate) fn run(shared: &Shared<'_>, pending: Vec<PartInfo>) -> Result<()> {
    if pending.is_empty() {
        return Ok(());
    }

    let config = shared.config;
    let (work_tx, work_rx) = channel::unbounded::<PartInfo>();
    let (ready_tx, ready_rx) = channel::bounded::<(PartInfo, PartBuffer)>(config.queue_capacity());

    shared.outstanding.store(pending.len(), Ordering::SeqCst);
    for part in pending {
        // Cannot fail: `work_rx` is alive
        let _ = work_tx.send(part);
    }

    debug!(
        "Starting {} readers and {} writers (queue capacity {})",
        config.reader_threads,
        config.writer_threads,
        config.queue_capacity()
    );

    thread::scope(|scope| {
        for i in 0..config.reader_threads {
            let work_tx = work_tx.clone();
            let work_rx = work_rx.clone();
            let ready_tx = ready_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("partcopy-reader-{}", i))
                .spawn_scoped(scope, move || reader::run(shared, &work_tx, &work_rx, ready_tx));
            if let Err(e) = spawned {
                shared.fail(TransferError::Io(e));
            }
        }
        // Writers stop once every reader has dropped its sender
        drop(ready_tx);

        for i in 0..config.writer_threads {
            let work_tx = work_tx.clone();
            let ready_rx = ready_rx.clone();
            let spawned = thread::Builder::new()
                .name(format!("partcopy-writer-{}", i))
                .spawn_scoped(scope, move || writer::run(shared, &work_tx, ready_rx));
            if let Err(e) = spawned {
                shared.fail(TransferError::Io(e));
            }
        }
        drop(ready_rx);
    });

    if let Some(err) = shared.fatal.lock().take() {
        return Err(err);
    }
    if shared.outstanding() > 0 {
        return Err(TransferError::Cancelled);
    }
    Ok(())
}
