//! Part upload worker

use super::{Disposition, Shared};
use crate::error::Result;
use crate::part::{PartInfo, PartStatus};
use crate::spool::PartBuffer;
use crossbeam::channel::{Receiver, Sender};
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{debug, info, warn};

pub(super) fn run(
    shared: &Shared<'_>,
    work_tx: &Sender<PartInfo>,
    ready_rx: Receiver<(PartInfo, PartBuffer)>,
) {
    // Drains until every reader has exited, including after a stop
    for (part, buffer) in ready_rx.iter() {
        upload_part(shared, part, buffer, work_tx);
    }
    debug!("Writer exiting");
}

fn upload_part(
    shared: &Shared<'_>,
    mut part: PartInfo,
    buffer: PartBuffer,
    work_tx: &Sender<PartInfo>,
) {
    loop {
        if !buffer.verify() {
            warn!(
                "Spooled buffer of part {} failed its checksum, re-reading",
                part.part_number
            );
            part.status = PartStatus::Planned;
            if shared.persist(&part) && !shared.stop.is_stopped() {
                let _ = work_tx.send(part);
            }
            return;
        }

        part.status = PartStatus::Uploading;
        if !shared.persist(&part) {
            return;
        }

        match attempt(shared, &part, &buffer) {
            Ok(etag) => {
                part.etag = Some(etag);
                part.status = PartStatus::Uploaded;
                if !shared.persist(&part) {
                    return;
                }
                shared
                    .progress
                    .bytes_uploaded
                    .fetch_add(part.length, Ordering::Relaxed);
                let done = shared.progress.parts_uploaded.fetch_add(1, Ordering::Relaxed) + 1;
                shared.part_done();
                info!(
                    "Uploaded part {} ({} bytes, {} done, {} remaining)",
                    part.part_number,
                    part.length,
                    done,
                    shared.outstanding()
                );
                return;
            }
            Err(err) => match shared.on_attempt_failed(&mut part, err, PartStatus::Read) {
                Disposition::Retry => continue,
                Disposition::Release | Disposition::Failed => return,
            },
        }
    }
}

/// One upload call, bounded by the part deadline
fn attempt(shared: &Shared<'_>, part: &PartInfo, buffer: &PartBuffer) -> Result<String> {
    let deadline = Instant::now() + shared.config.part_timeout();
    shared.destination.upload_part(
        shared.route.destination_key,
        shared.route.upload_id,
        part.part_number,
        buffer.as_bytes(),
        deadline,
    )
}
