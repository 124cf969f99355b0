//! Transfer orchestrator
//!
//! Drives one transfer through `PLANNING -> TRANSFERRING -> MERGING` and
//! ends in `DONE` or `ABORTED`. Every state change is saved to the ledger
//! before the work of that state starts. An `ABORTED` transfer keeps its
//! ledger, so calling [`Orchestrator::run`] again for the same
//! `(source, destination)` pair reconciles instead of starting over.

use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::ledger::Ledger;
use crate::merge::MergeCoordinator;
use crate::part::{
    collapse_runs, PartInfo, TransferId, TransferRecord, TransferSnapshot, TransferState,
};
use crate::pipeline::{self, Route, Shared};
use crate::planner;
use crate::provider::{MultipartDestination, RangeSource};
use crate::signal::{CancelHandle, StopSignal};
use chrono::{DateTime, Utc};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Result of a finished transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSummary {
    pub transfer_id: TransferId,
    /// Size of the assembled destination object
    pub total_size: u64,
    /// Bytes uploaded by this run (excludes parts finished by earlier runs)
    pub bytes_moved: u64,
    pub elapsed: Duration,
    pub part_count: usize,
    /// Parts already uploaded by an earlier run
    pub parts_skipped: usize,
}

/// Owns the collaborators of a transfer for the duration of a run
pub struct Orchestrator<'a> {
    config: &'a TransferConfig,
    ledger: &'a dyn Ledger,
    source: &'a dyn RangeSource,
    destination: &'a dyn MultipartDestination,
    cancel: CancelHandle,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a TransferConfig,
        ledger: &'a dyn Ledger,
        source: &'a dyn RangeSource,
        destination: &'a dyn MultipartDestination,
    ) -> Self {
        Self {
            config,
            ledger,
            source,
            destination,
            cancel: CancelHandle::new(),
        }
    }

    /// Use an existing cancellation handle
    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle that cancels runs of this orchestrator from another thread
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Current ledger state of the `(source, destination)` transfer
    pub fn snapshot(&self, source: &str, destination: &str) -> Result<Option<TransferSnapshot>> {
        self.ledger
            .snapshot(&TransferId::derive(source, destination))
    }

    /// Resumably copy `source` to `destination`
    ///
    /// `prior` is a snapshot persisted by the caller after an earlier run; it
    /// is imported only when the ledger holds nothing for this transfer.
    pub fn run(
        &self,
        source: &str,
        destination: &str,
        prior: Option<&TransferSnapshot>,
    ) -> Result<TransferSummary> {
        self.config.check()?;
        let started = Instant::now();
        let transfer_id = TransferId::derive(source, destination);

        if let Some(prior) = prior {
            self.import_prior(&transfer_id, prior)?;
        }
        if let Some(summary) = self.finish_completed(&transfer_id, started)? {
            return Ok(summary);
        }

        // PLANNING
        let total_size = self.source.object_size(source)?;
        let modified = self.source.object_modified(source)?;
        let (mut record, parts) =
            self.plan(&transfer_id, source, destination, total_size, modified)?;
        planner::check_provider_limits(&parts, self.config.min_part_size)?;

        record.transition(TransferState::Planning);
        self.ledger.save_record(&record)?;
        self.ledger.put_parts(&transfer_id, &parts)?;

        if record.upload_id.is_none() {
            match self.destination.open_multipart(destination) {
                Ok(upload_id) => {
                    debug!("Opened multipart session {}", upload_id);
                    record.upload_id = Some(upload_id);
                }
                Err(cause) => return Err(self.abort(&mut record, cause)),
            }
        }

        // TRANSFERRING
        record.transition(TransferState::Transferring);
        self.ledger.save_record(&record)?;

        let pending: Vec<PartInfo> = parts.iter().filter(|p| !p.is_uploaded()).cloned().collect();
        let parts_skipped = parts.len() - pending.len();
        info!(
            "Transfer {}: {} -> {} ({} bytes, {} parts, {} to transfer)",
            transfer_id,
            source,
            destination,
            total_size,
            parts.len(),
            pending.len()
        );

        let bytes_moved = match self.transfer(&record, pending) {
            Ok(bytes) => bytes,
            Err(cause) => return Err(self.abort(&mut record, cause)),
        };

        // MERGING
        let parts = self.ledger.parts(&transfer_id)?;
        let unfinished: Vec<u32> = parts
            .iter()
            .filter(|p| !p.is_uploaded())
            .map(|p| p.part_number)
            .collect();
        if !unfinished.is_empty() {
            let cause = TransferError::Validation(format!(
                "ledger shows parts {} unfinished after transfer",
                collapse_runs(&unfinished)
            ));
            return Err(self.abort(&mut record, cause));
        }

        record.transition(TransferState::Merging);
        self.ledger.save_record(&record)?;
        let coordinator = MergeCoordinator::new(self.destination, self.config);
        let final_size = match coordinator.complete(&mut record, &parts) {
            Ok(size) => size,
            Err(cause) => return Err(self.abort(&mut record, cause)),
        };

        // DONE
        record.transition(TransferState::Done);
        self.ledger.save_record(&record)?;
        self.ledger.clear(&transfer_id)?;

        let summary = TransferSummary {
            transfer_id,
            total_size: final_size,
            bytes_moved,
            elapsed: started.elapsed(),
            part_count: parts.len(),
            parts_skipped,
        };
        info!(
            "Transfer {} done: {} bytes moved in {:.2?} ({} parts, {} already uploaded)",
            summary.transfer_id,
            summary.bytes_moved,
            summary.elapsed,
            summary.part_count,
            summary.parts_skipped
        );
        Ok(summary)
    }

    fn import_prior(&self, transfer_id: &TransferId, prior: &TransferSnapshot) -> Result<()> {
        if &prior.record.transfer_id != transfer_id {
            return Err(TransferError::Validation(format!(
                "snapshot belongs to transfer {}, not {}",
                prior.record.transfer_id, transfer_id
            )));
        }
        if self.ledger.load_record(transfer_id)?.is_some() {
            debug!("Ledger already tracks {}, ignoring prior snapshot", transfer_id);
            return Ok(());
        }
        info!("Importing prior snapshot of transfer {}", transfer_id);
        self.ledger.import(prior)
    }

    /// Clear the ledger of a transfer whose object was already assembled
    ///
    /// A `DONE` record is left behind only when the run that completed the
    /// object failed to clear its ledger rows.
    fn finish_completed(
        &self,
        transfer_id: &TransferId,
        started: Instant,
    ) -> Result<Option<TransferSummary>> {
        let Some(plan) = self.ledger.load_plan(transfer_id)? else {
            return Ok(None);
        };
        if plan.record.state != TransferState::Done {
            return Ok(None);
        }

        info!(
            "Transfer {} already completed, clearing its ledger",
            transfer_id
        );
        self.ledger.clear(transfer_id)?;
        Ok(Some(TransferSummary {
            transfer_id: transfer_id.clone(),
            total_size: plan.record.total_size,
            bytes_moved: 0,
            elapsed: started.elapsed(),
            part_count: plan.parts.len(),
            parts_skipped: plan.parts.len(),
        }))
    }

    /// Build a fresh plan or reconcile the one an earlier run left behind
    fn plan(
        &self,
        transfer_id: &TransferId,
        source: &str,
        destination: &str,
        total_size: u64,
        modified: Option<DateTime<Utc>>,
    ) -> Result<(TransferRecord, Vec<PartInfo>)> {
        let Some(existing) = self.ledger.load_plan(transfer_id)? else {
            let part_size = self.config.part_size_for(total_size)?;
            let parts = planner::plan(total_size, part_size)?;
            let mut record = TransferRecord::new(source, destination, total_size, part_size);
            record.source_modified = modified;
            info!(
                "Planned transfer {}: {} parts of {} bytes",
                transfer_id,
                parts.len(),
                part_size
            );
            return Ok((record, parts));
        };

        let mut record = existing.record;
        if record.total_size != total_size {
            return Err(TransferError::Validation(format!(
                "source changed since transfer {} was planned: {} bytes then, {} now",
                transfer_id, record.total_size, total_size
            )));
        }
        match (record.source_modified, modified) {
            (Some(then), Some(now)) if then != now => {
                return Err(TransferError::Validation(format!(
                    "source changed since transfer {} was planned: modified {} then, {} now",
                    transfer_id,
                    then.to_rfc3339(),
                    now.to_rfc3339()
                )));
            }
            // Snapshots from sources without timestamps pick one up here
            (None, Some(now)) => record.source_modified = Some(now),
            _ => {}
        }
        if record.part_size != self.config.part_size {
            info!(
                "Resuming with stored part size {} (configured {})",
                record.part_size, self.config.part_size
            );
        }

        let fresh = planner::plan(total_size, record.part_size)?;
        let parts = if record.upload_id.is_some() {
            planner::reconcile(fresh, &existing.parts)?
        } else {
            // Parts of a released session are gone from the provider
            debug!("Transfer {} has no open session, redoing every part", transfer_id);
            fresh
        };

        let done: Vec<u32> = parts
            .iter()
            .filter(|p| p.is_uploaded())
            .map(|p| p.part_number)
            .collect();
        let remaining: Vec<u32> = parts
            .iter()
            .filter(|p| !p.is_uploaded())
            .map(|p| p.part_number)
            .collect();
        info!(
            "Resuming transfer {} from {}: uploaded [{}], remaining [{}]",
            transfer_id,
            record.state,
            collapse_runs(&done),
            collapse_runs(&remaining)
        );
        Ok((record, parts))
    }

    /// Run the pools; returns bytes uploaded
    fn transfer(&self, record: &TransferRecord, pending: Vec<PartInfo>) -> Result<u64> {
        let upload_id = record.upload_id.as_deref().ok_or_else(|| {
            TransferError::Validation(format!(
                "transfer {} has no open multipart session",
                record.transfer_id
            ))
        })?;
        let route = Route {
            transfer_id: &record.transfer_id,
            source_key: &record.source,
            destination_key: &record.destination,
            upload_id,
        };

        let stop = Arc::new(StopSignal::new());
        self.cancel.attach(Arc::clone(&stop));
        let shared = Shared::new(
            self.config,
            self.ledger,
            self.source,
            self.destination,
            route,
            stop,
        );
        let outcome = pipeline::run(&shared, pending);
        self.cancel.detach();

        let progress = &shared.progress;
        debug!(
            "Pipeline finished: {} bytes read, {} uploaded, {} failed attempts",
            progress.bytes_read.load(Ordering::Relaxed),
            progress.bytes_uploaded.load(Ordering::Relaxed),
            progress.failed_attempts.load(Ordering::Relaxed)
        );
        outcome.map(|()| progress.bytes_uploaded.load(Ordering::Relaxed))
    }

    /// Enter ABORTED, keeping the ledger for resume
    fn abort(&self, record: &mut TransferRecord, cause: TransferError) -> TransferError {
        if self.config.abort_session_on_failure {
            let coordinator = MergeCoordinator::new(self.destination, self.config);
            if let Err(e) = coordinator.abort(record) {
                warn!("Failed to abort multipart session: {}", e);
            }
        }

        record.transition(TransferState::Aborted);
        if let Err(e) = self.ledger.save_record(record) {
            warn!("Failed to record aborted state of {}: {}", record.transfer_id, e);
        }

        let outstanding = match self.ledger.parts(&record.transfer_id) {
            Ok(parts) => {
                let numbers: Vec<u32> = parts
                    .iter()
                    .filter(|p| !p.is_uploaded())
                    .map(|p| p.part_number)
                    .collect();
                collapse_runs(&numbers)
            }
            Err(e) => {
                warn!("Failed to list outstanding parts: {}", e);
                String::from("unknown")
            }
        };

        error!(
            "Transfer {} aborted, outstanding parts [{}]: {}",
            record.transfer_id, outstanding, cause
        );
        TransferError::Aborted {
            transfer_id: record.transfer_id.to_string(),
            outstanding,
            cause: Box::new(cause),
        }
    }
}

/// Resumably copy `source` to `destination` with a one-off orchestrator
pub fn copy_large_object(
    config: &TransferConfig,
    ledger: &dyn Ledger,
    source_store: &dyn RangeSource,
    destination_store: &dyn MultipartDestination,
    source: &str,
    destination: &str,
    prior: Option<&TransferSnapshot>,
) -> Result<TransferSummary> {
    Orchestrator::new(config, ledger, source_store, destination_store).run(
        source,
        destination,
        prior,
    )
}
