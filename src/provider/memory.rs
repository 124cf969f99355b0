//! In-memory object stores
//!
//! Keeps multipart session state (upload ids, parts, assembly) in process
//! memory. Backs the test suite and benches.

use super::{
    check_manifest, content_etag, time_left, CompletedPart, MultipartDestination, RangeSource,
};
use crate::error::{Result, TransferError};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Bytes handed to the sink per write call
const STREAM_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Arc<Vec<u8>>,
    modified: DateTime<Utc>,
}

/// Source serving objects from memory
#[derive(Debug, Default)]
pub struct MemorySource {
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an object, stamped with the current time
    pub fn insert(&self, key: impl Into<String>, data: Vec<u8>) {
        self.insert_modified_at(key, data, Utc::now());
    }

    /// Add or replace an object with an explicit modification time
    pub fn insert_modified_at(&self, key: impl Into<String>, data: Vec<u8>, modified: DateTime<Utc>) {
        let object = StoredObject {
            data: Arc::new(data),
            modified,
        };
        self.objects.write().insert(key.into(), object);
    }

    fn get(&self, operation: &'static str, key: &str) -> Result<StoredObject> {
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| TransferError::provider(operation, format!("NoSuchKey: {}", key)))
    }
}

impl RangeSource for MemorySource {
    fn object_size(&self, key: &str) -> Result<u64> {
        Ok(self.get("object_size", key)?.data.len() as u64)
    }

    fn object_modified(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(Some(self.get("object_modified", key)?.modified))
    }

    fn read_range(
        &self,
        key: &str,
        offset: u64,
        length: u64,
        deadline: Instant,
        sink: &mut dyn Write,
    ) -> Result<u64> {
        let data = self.get("read_range", key)?.data;
        let end = offset.checked_add(length).filter(|&end| end <= data.len() as u64);
        let Some(end) = end else {
            return Err(TransferError::provider(
                "read_range",
                format!(
                    "InvalidRange: [{}, {}) is outside the {} byte object {}",
                    offset,
                    offset.saturating_add(length),
                    data.len(),
                    key
                ),
            ));
        };

        let context = format!("read_range {}", key);
        for chunk in data[offset as usize..end as usize].chunks(STREAM_CHUNK) {
            time_left(deadline, &context)?;
            sink.write_all(chunk)
                .map_err(|e| TransferError::transient(format!("read_range {}", key), e))?;
        }
        Ok(length)
    }
}

/// A single uploaded part
#[derive(Debug, Clone)]
struct UploadedPart {
    data: Vec<u8>,
    etag: String,
}

/// An in-progress multipart upload
#[derive(Debug, Clone)]
struct MultipartUpload {
    key: String,
    parts: BTreeMap<u32, UploadedPart>,
}

impl MultipartUpload {
    /// Concatenate the listed parts in manifest order
    fn assemble(&self, manifest: &[CompletedPart]) -> Result<Vec<u8>> {
        let mut assembled = Vec::new();
        for entry in manifest {
            let part = self.parts.get(&entry.part_number).ok_or_else(|| {
                TransferError::provider(
                    "complete_multipart",
                    format!("InvalidPart: part {} was never uploaded", entry.part_number),
                )
            })?;
            if part.etag != entry.etag {
                return Err(TransferError::provider(
                    "complete_multipart",
                    format!(
                        "InvalidPart: etag mismatch for part {}: {} != {}",
                        entry.part_number, entry.etag, part.etag
                    ),
                ));
            }
            assembled.extend_from_slice(&part.data);
        }

        tracing::debug!(
            "Assembled {} bytes from {} parts",
            assembled.len(),
            manifest.len()
        );
        Ok(assembled)
    }
}

/// Destination assembling multipart uploads in memory
#[derive(Debug, Default)]
pub struct MemoryDestination {
    uploads: Mutex<HashMap<String, MultipartUpload>>,
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed object stored under `key`
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().get(key).cloned()
    }

    /// Number of sessions that are neither completed nor aborted
    pub fn open_uploads(&self) -> usize {
        self.uploads.lock().len()
    }

    /// Part numbers currently stored under `upload_id`
    pub fn uploaded_parts(&self, upload_id: &str) -> Option<Vec<u32>> {
        self.uploads
            .lock()
            .get(upload_id)
            .map(|upload| upload.parts.keys().copied().collect())
    }
}

impl MultipartDestination for MemoryDestination {
    fn open_multipart(&self, key: &str) -> Result<String> {
        let upload_id = Uuid::new_v4().to_string();
        self.uploads.lock().insert(
            upload_id.clone(),
            MultipartUpload {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: &[u8],
        deadline: Instant,
    ) -> Result<String> {
        time_left(deadline, &format!("upload part {}", part_number))?;
        tracing::debug!(
            "Uploading part {} for upload {}, size: {} bytes",
            part_number,
            upload_id,
            data.len()
        );
        let mut uploads = self.uploads.lock();
        let upload = uploads
            .get_mut(upload_id)
            .filter(|upload| upload.key == key)
            .ok_or_else(|| {
                TransferError::provider("upload_part", format!("NoSuchUpload: {}", upload_id))
            })?;

        let etag = content_etag(data);
        upload.parts.insert(
            part_number,
            UploadedPart {
                data: data.to_vec(),
                etag: etag.clone(),
            },
        );
        Ok(etag)
    }

    fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<u64> {
        check_manifest(parts)?;

        let mut uploads = self.uploads.lock();
        let upload = uploads
            .get(upload_id)
            .filter(|upload| upload.key == key)
            .ok_or_else(|| {
                TransferError::provider("complete_multipart", format!("NoSuchUpload: {}", upload_id))
            })?;

        let assembled = upload.assemble(parts)?;
        let size = assembled.len() as u64;
        uploads.remove(upload_id);
        self.objects.write().insert(key.to_string(), assembled);
        Ok(size)
    }

    fn abort_multipart(&self, _key: &str, upload_id: &str) -> Result<()> {
        // Aborting an unknown session is a no-op, as on S3
        self.uploads.lock().remove(upload_id);
        Ok(())
    }
}
