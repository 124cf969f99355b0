//! Local filesystem stores
//!
//! [`DirDestination`] stages each multipart session under
//! `<root>/.partcopy-uploads/<upload_id>/` as one `part.NNNNN` file per part.
//! Completion concatenates the listed parts into a temp file beside the
//! target and renames it into place, so the target is either absent or whole.

use super::{
    check_manifest, content_etag, time_left, validate_key, CompletedPart, MultipartDestination,
    RangeSource,
};
use crate::error::{Result, TransferError};
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Name of the staging directory under a destination root
pub const STAGING_DIR: &str = ".partcopy-uploads";

const TARGET_FILE: &str = "target";

/// Source reading local files; keys are file paths
#[derive(Debug, Default, Clone)]
pub struct FileSource;

impl FileSource {
    pub fn new() -> Self {
        Self
    }
}

impl RangeSource for FileSource {
    fn object_size(&self, key: &str) -> Result<u64> {
        let metadata = fs::metadata(key)
            .map_err(|e| TransferError::provider("object_size", format!("{}: {}", key, e)))?;
        if !metadata.is_file() {
            return Err(TransferError::Validation(format!("{} is not a regular file", key)));
        }
        Ok(metadata.len())
    }

    fn object_modified(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let metadata = fs::metadata(key)
            .map_err(|e| TransferError::provider("object_modified", format!("{}: {}", key, e)))?;
        // Filesystems without mtime support report None
        Ok(metadata.modified().ok().map(DateTime::<Utc>::from))
    }

    fn read_range(
        &self,
        key: &str,
        offset: u64,
        length: u64,
        deadline: Instant,
        sink: &mut dyn Write,
    ) -> Result<u64> {
        let context = || format!("read {} [{}, {})", key, offset, offset.saturating_add(length));
        time_left(deadline, &context())?;

        let mut file = File::open(key).map_err(|e| TransferError::transient(context(), e))?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| TransferError::transient(context(), e))?;

        let copied = io::copy(&mut file.take(length), sink)
            .map_err(|e| TransferError::transient(context(), e))?;
        if copied != length {
            return Err(TransferError::transient(
                context(),
                format!("short read: {} of {} bytes", copied, length),
            ));
        }
        Ok(copied)
    }
}

/// Multipart destination rooted at a local directory
#[derive(Debug, Clone)]
pub struct DirDestination {
    root: PathBuf,
}

impl DirDestination {
    /// Destination writing objects under `root`, created if missing
    pub fn new<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(STAGING_DIR))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where a completed object for `key` lives
    pub fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn staging(&self, upload_id: &str) -> PathBuf {
        self.root.join(STAGING_DIR).join(upload_id)
    }

    fn part_path(&self, upload_id: &str, part_number: u32) -> PathBuf {
        self.staging(upload_id).join(format!("part.{:05}", part_number))
    }

    /// Open session directory for `upload_id`, checked against `key`
    fn session(&self, operation: &'static str, key: &str, upload_id: &str) -> Result<PathBuf> {
        let dir = self.staging(upload_id);
        let target = fs::read_to_string(dir.join(TARGET_FILE))
            .map_err(|_| TransferError::provider(operation, format!("NoSuchUpload: {}", upload_id)))?;
        if target != key {
            return Err(TransferError::provider(
                operation,
                format!("upload {} belongs to {}, not {}", upload_id, target, key),
            ));
        }
        Ok(dir)
    }

    fn read_part(&self, upload_id: &str, entry: &CompletedPart) -> Result<Vec<u8>> {
        let path = self.part_path(upload_id, entry.part_number);
        let data = fs::read(&path).map_err(|_| {
            TransferError::provider(
                "complete_multipart",
                format!("InvalidPart: part {} was never uploaded", entry.part_number),
            )
        })?;
        if content_etag(&data) != entry.etag {
            return Err(TransferError::provider(
                "complete_multipart",
                format!("InvalidPart: etag mismatch for part {}", entry.part_number),
            ));
        }
        Ok(data)
    }
}

impl MultipartDestination for DirDestination {
    fn open_multipart(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        let upload_id = Uuid::new_v4().to_string();
        let dir = self.staging(&upload_id);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(TARGET_FILE), key)?;
        debug!("Opened staging directory {}", dir.display());
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
        let dir = self.session("upload_part", key, upload_id)?;
        let path = self.part_path(upload_id, part_number);
        let context = || format!("stage part {} of {}", part_number, key);

        // Stage through a temp file so a torn write never looks like a part
        let mut staged =
            tempfile::NamedTempFile::new_in(&dir).map_err(|e| TransferError::transient(context(), e))?;
        staged
            .write_all(data)
            .and_then(|_| staged.as_file().sync_data())
            .map_err(|e| TransferError::transient(context(), e))?;

        // A part finished after its deadline is dropped, not committed
        time_left(deadline, &context())?;
        staged
            .persist(&path)
            .map_err(|e| TransferError::transient(context(), e.error))?;

        Ok(content_etag(data))
    }

    fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<u64> {
        check_manifest(parts)?;
        let dir = self.session("complete_multipart", key, upload_id)?;

        let target = self.object_path(key);
        let parent = target.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)?;

        let assembled = tempfile::NamedTempFile::new_in(parent)?;
        let mut out = BufWriter::new(assembled);
        for entry in parts {
            let data = self.read_part(upload_id, entry)?;
            out.write_all(&data)?;
        }
        let assembled = out.into_inner().map_err(|e| e.into_error())?;
        assembled.as_file().sync_all()?;
        assembled
            .persist(&target)
            .map_err(|e| TransferError::Io(e.error))?;

        if let Err(e) = fs::remove_dir_all(&dir) {
            warn!("Failed to remove staging directory {}: {}", dir.display(), e);
        }

        let size = fs::metadata(&target)?.len();
        debug!("Assembled {} ({} bytes, {} parts)", target.display(), size, parts.len());
        Ok(size)
    }

    fn abort_multipart(&self, _key: &str, upload_id: &str) -> Result<()> {
        match fs::remove_dir_all(self.staging(upload_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
