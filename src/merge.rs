//! Merge coordinator
//!
//! Finalizes a multipart session once every part is uploaded, or releases it
//! when the transfer is abandoned. Part rows in the ledger are never touched
//! here, so a failed merge leaves everything a later run needs to resume.

use crate::config::TransferConfig;
use crate::error::{Result, TransferError};
use crate::part::{PartInfo, TransferRecord};
use crate::provider::{CompletedPart, MultipartDestination};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Completion manifest in ascending part order
///
/// Providers assemble by part number, not by completion time, so the list is
/// sorted regardless of the order parts finished in.
pub fn manifest(parts: &[PartInfo]) -> Result<Vec<CompletedPart>> {
    let mut manifest = parts
        .iter()
        .map(|part| match (&part.etag, part.is_uploaded()) {
            (Some(etag), true) => Ok(CompletedPart {
                part_number: part.part_number,
                etag: etag.clone(),
            }),
            _ => Err(TransferError::Validation(format!(
                "part {} is {} and cannot be merged",
                part.part_number, part.status
            ))),
        })
        .collect::<Result<Vec<_>>>()?;
    manifest.sort_by_key(|entry| entry.part_number);
    Ok(manifest)
}

pub struct MergeCoordinator<'a> {
    destination: &'a dyn MultipartDestination,
    config: &'a TransferConfig,
}

impl<'a> MergeCoordinator<'a> {
    pub fn new(destination: &'a dyn MultipartDestination, config: &'a TransferConfig) -> Self {
        Self {
            destination,
            config,
        }
    }

    /// Complete the session of `record` from `parts`
    ///
    /// Returns the final object size. A zero-byte object (no parts) is
    /// completed from a single empty part. If the completion call fails the
    /// session is aborted; if it succeeds with the wrong size the result is an
    /// integrity error. Either way `record.upload_id` is cleared because the
    /// session can no longer be reused.
    pub fn complete(&self, record: &mut TransferRecord, parts: &[PartInfo]) -> Result<u64> {
        let key = record.destination.clone();
        let upload_id = record.upload_id.clone().ok_or_else(|| {
            TransferError::Validation(format!(
                "transfer {} has no open multipart session",
                record.transfer_id
            ))
        })?;

        let manifest = if parts.is_empty() {
            debug!("Zero-byte object, completing from an empty part");
            let etag = self.with_retries(|| {
                let deadline = Instant::now() + self.config.part_timeout();
                self.destination
                    .upload_part(&key, &upload_id, 1, &[], deadline)
            })?;
            vec![CompletedPart {
                part_number: 1,
                etag,
            }]
        } else {
            manifest(parts)?
        };

        info!(
            "Completing upload {} of {} from {} parts",
            upload_id,
            key,
            manifest.len()
        );
        let completed = self.with_retries(|| {
            self.destination
                .complete_multipart(&key, &upload_id, &manifest)
        });

        match completed {
            Ok(final_size) if final_size == record.total_size => {
                record.upload_id = None;
                Ok(final_size)
            }
            Ok(final_size) => {
                // The object exists but is wrong; leave it for inspection
                record.upload_id = None;
                Err(TransferError::Integrity {
                    expected: record.total_size,
                    actual: final_size,
                })
            }
            Err(err) => {
                warn!("Completion of upload {} failed: {}", upload_id, err);
                if let Err(abort_err) = self.abort(record) {
                    warn!("Abort of upload {} also failed: {}", upload_id, abort_err);
                }
                Err(err)
            }
        }
    }

    /// Release the provider session of `record`, if any
    pub fn abort(&self, record: &mut TransferRecord) -> Result<()> {
        let Some(upload_id) = record.upload_id.take() else {
            return Ok(());
        };
        info!("Aborting upload {} of {}", upload_id, record.destination);
        self.destination
            .abort_multipart(&record.destination, &upload_id)
    }

    fn with_retries<T>(&self, mut call: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempts = 0;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempts += 1;
                    let retry = &self.config.retry;
                    if !err.is_retryable() || !retry.allows_another(attempts) {
                        return Err(err);
                    }
                    let delay = retry.delay_for(attempts);
                    warn!("Merge call failed ({}), retrying in {:?}", err, delay);
                    thread::sleep(delay);
                }
            }
        }
    }
}
