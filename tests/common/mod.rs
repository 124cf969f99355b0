//! Fault-injecting and counting storage wrappers shared by integration tests

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use partcopy::{
    time_left, CompletedPart, MemoryDestination, MemorySource, MultipartDestination, RangeSource,
    Result, RetryPolicy, TransferConfig, TransferError,
};
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

pub const KIB: u64 = 1024;

/// 250 KiB object cut into 64 KiB parts: 64, 64, 64, 58
pub const OBJECT_SIZE: u64 = 250 * KIB;
pub const PART_SIZE: u64 = 64 * KIB;

/// Fails forever
pub const ALWAYS: u32 = u32::MAX;

pub fn pattern(len: u64) -> Vec<u8> {
    (0..len).map(|i| (i % 253) as u8).collect()
}

/// Offset of a part in the 64 KiB layout
pub fn offset_of(part_number: u32) -> u64 {
    u64::from(part_number - 1) * PART_SIZE
}

/// Small parts and fast retries
pub fn test_config(max_attempts: u32) -> TransferConfig {
    TransferConfig {
        part_size: PART_SIZE,
        min_part_size: 1,
        reader_threads: 4,
        writer_threads: 4,
        retry: RetryPolicy {
            max_attempts,
            base_delay_ms: 20,
            max_delay_ms: 100,
            jitter: false,
        },
        ..Default::default()
    }
}

/// Hang for `delay` like a stalled connection, giving up at `deadline`
fn stall(delay: Duration, deadline: Instant, context: &str) -> Result<()> {
    let budget = time_left(deadline, context)?;
    thread::sleep(delay.min(budget));
    time_left(deadline, context).map(|_| ())
}

fn take_failure(failures: &Mutex<HashMap<u64, u32>>, key: u64) -> bool {
    let mut failures = failures.lock();
    match failures.get_mut(&key) {
        Some(remaining) if *remaining == ALWAYS => true,
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

/// Source that counts reads and fails chosen offsets
#[derive(Default)]
pub struct ScriptedSource {
    pub inner: MemorySource,
    failures: Mutex<HashMap<u64, u32>>,
    reads: Mutex<HashMap<u64, u32>>,
    read_delay: Mutex<Duration>,
}

impl ScriptedSource {
    pub fn with_object(key: &str, data: Vec<u8>) -> Self {
        let source = Self::default();
        source.inner.insert(key, data);
        source
    }

    /// Fail the next `times` reads starting at `offset`
    pub fn fail_reads(&self, offset: u64, times: u32) {
        self.failures.lock().insert(offset, times);
    }

    pub fn heal(&self) {
        self.failures.lock().clear();
    }

    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock() = delay;
    }

    /// Read attempts that started at `offset`
    pub fn reads_at(&self, offset: u64) -> u32 {
        self.reads.lock().get(&offset).copied().unwrap_or(0)
    }

    pub fn total_reads(&self) -> u32 {
        self.reads.lock().values().sum()
    }
}

impl RangeSource for ScriptedSource {
    fn object_size(&self, key: &str) -> Result<u64> {
        self.inner.object_size(key)
    }

    fn object_modified(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        self.inner.object_modified(key)
    }

    fn read_range(
        &self,
        key: &str,
        offset: u64,
        length: u64,
        deadline: Instant,
        sink: &mut dyn Write,
    ) -> Result<u64> {
        *self.reads.lock().entry(offset).or_insert(0) += 1;
        let delay = *self.read_delay.lock();
        if !delay.is_zero() {
            stall(delay, deadline, &format!("read at {}", offset))?;
        }
        if take_failure(&self.failures, offset) {
            return Err(TransferError::transient(
                format!("read at {}", offset),
                "injected connection reset",
            ));
        }
        self.inner.read_range(key, offset, length, deadline, sink)
    }
}

/// Destination that records calls and fails chosen operations
#[derive(Default)]
pub struct ScriptedDestination {
    pub inner: MemoryDestination,
    upload_failures: Mutex<HashMap<u64, u32>>,
    upload_delays: Mutex<HashMap<u32, Duration>>,
    /// Every upload_part call, in call order
    upload_calls: Mutex<Vec<u32>>,
    /// Successful uploads, in completion order
    completions: Mutex<Vec<u32>>,
    manifests: Mutex<Vec<Vec<u32>>>,
    aborts: Mutex<Vec<String>>,
    fail_complete: AtomicBool,
    /// Delays run to the end and succeed even past the part deadline
    ignore_deadlines: AtomicBool,
}

impl ScriptedDestination {
    pub fn fail_uploads(&self, part_number: u32, times: u32) {
        self.upload_failures
            .lock()
            .insert(u64::from(part_number), times);
    }

    pub fn delay_upload(&self, part_number: u32, delay: Duration) {
        self.upload_delays.lock().insert(part_number, delay);
    }

    /// Make delayed uploads finish late instead of timing out
    pub fn ignore_deadlines(&self, ignore: bool) {
        self.ignore_deadlines.store(ignore, Ordering::SeqCst);
    }

    pub fn fail_completion(&self, fail: bool) {
        self.fail_complete.store(fail, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.upload_failures.lock().clear();
        self.fail_completion(false);
    }

    pub fn upload_calls(&self, part_number: u32) -> usize {
        self.upload_calls
            .lock()
            .iter()
            .filter(|&&n| n == part_number)
            .count()
    }

    pub fn completion_order(&self) -> Vec<u32> {
        self.completions.lock().clone()
    }

    pub fn manifests(&self) -> Vec<Vec<u32>> {
        self.manifests.lock().clone()
    }

    pub fn aborts(&self) -> Vec<String> {
        self.aborts.lock().clone()
    }
}

impl MultipartDestination for ScriptedDestination {
    fn open_multipart(&self, key: &str) -> Result<String> {
        self.inner.open_multipart(key)
    }

    fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: &[u8],
        deadline: Instant,
    ) -> Result<String> {
        self.upload_calls.lock().push(part_number);
        let delay = self.upload_delays.lock().get(&part_number).copied();
        let deadline = match delay {
            Some(delay) if self.ignore_deadlines.load(Ordering::SeqCst) => {
                thread::sleep(delay);
                Instant::now() + Duration::from_secs(60)
            }
            Some(delay) => {
                stall(delay, deadline, &format!("upload part {}", part_number))?;
                deadline
            }
            None => deadline,
        };
        if take_failure(&self.upload_failures, u64::from(part_number)) {
            return Err(TransferError::transient(
                format!("upload part {}", part_number),
                "injected 503 SlowDown",
            ));
        }
        let etag = self.inner.upload_part(key, upload_id, part_number, data, deadline)?;
        self.completions.lock().push(part_number);
        Ok(etag)
    }

    fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<u64> {
        self.manifests
            .lock()
            .push(parts.iter().map(|p| p.part_number).collect());
        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(TransferError::provider(
                "complete_multipart",
                "injected InternalError",
            ));
        }
        self.inner.complete_multipart(key, upload_id, parts)
    }

    fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()> {
        self.aborts.lock().push(upload_id.to_string());
        self.inner.abort_multipart(key, upload_id)
    }
}
