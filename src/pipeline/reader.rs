//! Byte-range reader worker

use super::{Disposition, Shared, POLL_INTERVAL};
use crate::error::{Result, TransferError};
use crate::part::{PartInfo, PartStatus};
use crate::spool::{DeadlineWriter, PartBuffer};
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::debug;

pub(super) fn run(
    shared: &Shared<'_>,
    work_tx: &Sender<PartInfo>,
    work_rx: &Receiver<PartInfo>,
    ready_tx: Sender<(PartInfo, PartBuffer)>,
) {
    loop {
        if shared.stop.is_stopped() || shared.outstanding() == 0 {
            break;
        }

        let part = match work_rx.recv_timeout(POLL_INTERVAL) {
            Ok(part) => part,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        // Taken after a stop: it is still PLANNED in the ledger
        if shared.stop.is_stopped() {
            break;
        }

        if let Some(ready) = read_part(shared, part, work_tx) {
            // Blocks while the ready queue is full
            if ready_tx.send(ready).is_err() {
                break;
            }
        }
    }
    debug!("Reader exiting");
}

/// Read one part, retrying through the work queue
///
/// Returns the filled buffer on success. On a retryable failure the part is
/// pushed back onto the work queue after its backoff and `None` is returned.
fn read_part(
    shared: &Shared<'_>,
    mut part: PartInfo,
    work_tx: &Sender<PartInfo>,
) -> Option<(PartInfo, PartBuffer)> {
    part.status = PartStatus::Reading;
    if !shared.persist(&part) {
        return None;
    }
    debug!(
        "Reading part {} [{}, {})",
        part.part_number,
        part.offset,
        part.end()
    );

    match fetch(shared, &part) {
        Ok(buffer) => {
            part.status = PartStatus::Read;
            if !shared.persist(&part) {
                return None;
            }
            shared
                .progress
                .bytes_read
                .fetch_add(part.length, Ordering::Relaxed);
            Some((part, buffer))
        }
        Err(err) => {
            if let Disposition::Retry = shared.on_attempt_failed(&mut part, err, PartStatus::Planned)
            {
                // Cannot fail while this worker holds a receiver clone
                let _ = work_tx.send(part);
            }
            None
        }
    }
}

/// Stream a part's byte range into a fresh spool buffer
fn fetch(shared: &Shared<'_>, part: &PartInfo) -> Result<PartBuffer> {
    let context = || format!("read part {}", part.part_number);

    let mut spool = shared.spool.writer(part.length)?;
    let deadline = Instant::now() + shared.config.part_timeout();
    let copied = {
        let mut sink = DeadlineWriter::new(&mut spool, deadline);
        shared
            .source
            .read_range(
                shared.route.source_key,
                part.offset,
                part.length,
                deadline,
                &mut sink,
            )?
    };

    if copied != part.length || spool.written() != part.length {
        return Err(TransferError::transient(
            context(),
            format!(
                "source returned {} of {} bytes",
                spool.written(),
                part.length
            ),
        ));
    }

    spool
        .finish()
        .map_err(|e| TransferError::transient(context(), e))
}
