//! Partition planning
//!
//! Splits an object of `total_size` bytes into fixed-size parts and reconciles
//! a fresh plan with whatever an earlier run left in the ledger.

use crate::error::{Result, TransferError};
use crate::part::{PartInfo, PartStatus};
use std::collections::HashMap;
use tracing::debug;

/// Largest part count S3-compatible stores accept for one multipart upload
pub const MAX_PART_COUNT: usize = 10_000;

/// Partition `[0, total_size)` into parts of `part_size` bytes
///
/// Part numbers run `1..=N`; the final part holds the remainder. A zero-byte
/// object yields an empty plan, and any object no larger than `part_size`
/// yields a single part. Plans above [`MAX_PART_COUNT`] parts are rejected
/// before anything is allocated.
pub fn plan(total_size: u64, part_size: u64) -> Result<Vec<PartInfo>> {
    if part_size == 0 {
        return Err(TransferError::Validation(
            "part_size must be greater than 0".to_string(),
        ));
    }

    let count = total_size.div_ceil(part_size);
    if count > MAX_PART_COUNT as u64 {
        return Err(too_many_parts(count));
    }
    // Bounded by MAX_PART_COUNT above
    let count = count as u32;

    let parts: Vec<PartInfo> = (0..count)
        .map(|i| {
            let offset = u64::from(i) * part_size;
            let length = part_size.min(total_size - offset);
            PartInfo::planned(i + 1, offset, length)
        })
        .collect();

    debug!(
        "Planned {} parts of {} bytes for {} byte object",
        parts.len(),
        part_size,
        total_size
    );
    Ok(parts)
}

fn too_many_parts(count: u64) -> TransferError {
    TransferError::Validation(format!(
        "plan has {} parts, the limit is {}; raise part_size",
        count, MAX_PART_COUNT
    ))
}

/// Part size that splits `total_size` into at most `part_count` parts
pub fn part_size_for_count(total_size: u64, part_count: u32) -> Result<u64> {
    if part_count == 0 {
        return Err(TransferError::Validation(
            "part count hint must be greater than 0".to_string(),
        ));
    }
    Ok(total_size.div_ceil(u64::from(part_count)).max(1))
}

/// Merge a fresh plan with parts recorded by an earlier run
///
/// Parts the ledger shows as uploaded (with an etag) are kept untouched; every
/// other part starts over from `Planned` with a fresh attempt budget. A ledger
/// whose part boundaries disagree with the fresh plan belongs to a different
/// partition and is rejected.
pub fn reconcile(fresh: Vec<PartInfo>, existing: &[PartInfo]) -> Result<Vec<PartInfo>> {
    let mut previous: HashMap<u32, &PartInfo> =
        existing.iter().map(|p| (p.part_number, p)).collect();

    let mut reconciled = Vec::with_capacity(fresh.len());
    for part in fresh {
        match previous.remove(&part.part_number) {
            Some(old) if old.offset != part.offset || old.length != part.length => {
                return Err(TransferError::Validation(format!(
                    "ledger part {} covers [{}, {}) but the plan expects [{}, {})",
                    part.part_number,
                    old.offset,
                    old.end(),
                    part.offset,
                    part.end()
                )));
            }
            Some(old) if old.status == PartStatus::Uploaded && old.etag.is_some() => {
                reconciled.push(old.clone());
            }
            Some(old) => {
                if old.status != PartStatus::Planned {
                    debug!(
                        "Part {} was {} in the ledger, rescheduling",
                        old.part_number, old.status
                    );
                }
                reconciled.push(part);
            }
            None => reconciled.push(part),
        }
    }

    if let Some(stray) = previous.keys().min() {
        return Err(TransferError::Validation(format!(
            "ledger contains part {} which is outside the plan of {} parts",
            stray,
            reconciled.len()
        )));
    }

    Ok(reconciled)
}

/// Check the partition invariant: parts `1..=N` cover `[0, total_size)` exactly once
pub fn verify_partition(parts: &[PartInfo], total_size: u64) -> Result<()> {
    let mut expected_offset = 0u64;
    for (idx, part) in parts.iter().enumerate() {
        let expected_number = idx as u32 + 1;
        if part.part_number != expected_number {
            return Err(TransferError::Validation(format!(
                "expected part number {}, found {}",
                expected_number, part.part_number
            )));
        }
        if part.length == 0 {
            return Err(TransferError::Validation(format!(
                "part {} is empty",
                part.part_number
            )));
        }
        if part.offset != expected_offset {
            return Err(TransferError::Validation(format!(
                "part {} starts at {} but the previous part ends at {}",
                part.part_number, part.offset, expected_offset
            )));
        }
        expected_offset = part.end();
    }

    if expected_offset != total_size {
        return Err(TransferError::Validation(format!(
            "parts cover {} bytes but the object has {}",
            expected_offset, total_size
        )));
    }
    Ok(())
}

/// Reject plans a multipart store would refuse: too many parts, or a
/// non-final part smaller than `min_part_size`
pub fn check_provider_limits(parts: &[PartInfo], min_part_size: u64) -> Result<()> {
    if parts.len() > MAX_PART_COUNT {
        return Err(too_many_parts(parts.len() as u64));
    }

    let non_final = parts.len().saturating_sub(1);
    if let Some(small) = parts[..non_final]
        .iter()
        .find(|p| p.length < min_part_size)
    {
        return Err(TransferError::Validation(format!(
            "part {} is {} bytes, below the minimum part size of {}",
            small.part_number, small.length, min_part_size
        )));
    }
    Ok(())
}
