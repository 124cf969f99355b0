//! Part buffers
//!
//! A reader streams a byte range into a [`SpoolWriter`], which keeps small
//! parts in memory and spills large ones to an unlinked temp file that is
//! memory-mapped once complete. A CRC32 of the bytes is computed while
//! spooling; writers re-check it before every upload attempt so a buffer
//! that went bad is re-read rather than uploaded.

use crate::error::Result;
use memmap2::Mmap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

enum Storage {
    Memory(Vec<u8>),
    Disk { map: Mmap, _file: File },
}

/// Complete contents of one part, ready for upload
pub struct PartBuffer {
    storage: Storage,
    crc: u32,
}

impl PartBuffer {
    /// In-memory buffer over `data`
    pub fn from_vec(data: Vec<u8>) -> Self {
        let crc = crc32fast::hash(&data);
        Self {
            storage: Storage::Memory(data),
            crc,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.storage {
            Storage::Memory(data) => data,
            Storage::Disk { map, .. } => map,
        }
    }

    pub fn len(&self) -> u64 {
        self.as_bytes().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    pub fn is_on_disk(&self) -> bool {
        matches!(self.storage, Storage::Disk { .. })
    }

    /// Checksum taken while the part was spooled
    pub fn crc(&self) -> u32 {
        self.crc
    }

    /// Returns true if the bytes still match the spooled checksum
    pub fn verify(&self) -> bool {
        crc32fast::hash(self.as_bytes()) == self.crc
    }
}

impl std::fmt::Debug for PartBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartBuffer")
            .field("len", &self.len())
            .field("on_disk", &self.is_on_disk())
            .field("crc", &format_args!("{:08x}", self.crc))
            .finish()
    }
}

/// Decides where each part is buffered
#[derive(Debug, Clone)]
pub struct Spool {
    threshold: u64,
    dir: Option<PathBuf>,
}

impl Spool {
    pub fn new(threshold: u64, dir: Option<PathBuf>) -> Self {
        Self { threshold, dir }
    }

    /// Writer for a part of `length` bytes
    pub fn writer(&self, length: u64) -> Result<SpoolWriter> {
        let sink = if length > self.threshold {
            let file = match &self.dir {
                Some(dir) => tempfile::tempfile_in(dir)?,
                None => tempfile::tempfile()?,
            };
            Sink::Disk(BufWriter::new(file))
        } else {
            Sink::Memory(Vec::with_capacity(length as usize))
        };
        Ok(SpoolWriter {
            sink,
            hasher: crc32fast::Hasher::new(),
            written: 0,
        })
    }
}

enum Sink {
    Memory(Vec<u8>),
    Disk(BufWriter<File>),
}

/// Accumulates one part and checksums it on the way in
pub struct SpoolWriter {
    sink: Sink,
    hasher: crc32fast::Hasher,
    written: u64,
}

impl SpoolWriter {
    /// Bytes accepted so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Seal the buffer
    pub fn finish(self) -> Result<PartBuffer> {
        let crc = self.hasher.finalize();
        let storage = match self.sink {
            Sink::Memory(data) => Storage::Memory(data),
            Sink::Disk(writer) => {
                let file = writer.into_inner().map_err(|e| e.into_error())?;
                if self.written == 0 {
                    // Zero-length files cannot be mapped
                    Storage::Memory(Vec::new())
                } else {
                    // SAFETY: the file is an unlinked temp file owned by this
                    // buffer; nothing else can truncate or write it.
                    let map = unsafe { Mmap::map(&file)? };
                    Storage::Disk { map, _file: file }
                }
            }
        };
        Ok(PartBuffer { storage, crc })
    }
}

impl Write for SpoolWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = match &mut self.sink {
            Sink::Memory(data) => {
                data.extend_from_slice(buf);
                buf.len()
            }
            Sink::Disk(writer) => writer.write(buf)?,
        };
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.sink {
            Sink::Memory(_) => Ok(()),
            Sink::Disk(writer) => writer.flush(),
        }
    }
}

/// Writer that fails with `TimedOut` once its deadline has passed
///
/// Bounds how long a source may take to deliver one part.
pub struct DeadlineWriter<'a, W: Write> {
    inner: &'a mut W,
    deadline: Instant,
}

impl<'a, W: Write> DeadlineWriter<'a, W> {
    pub fn new(inner: &'a mut W, deadline: Instant) -> Self {
        Self { inner, deadline }
    }

    fn check(&self) -> io::Result<()> {
        if Instant::now() > self.deadline {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "part deadline exceeded",
            ));
        }
        Ok(())
    }
}

impl<W: Write> Write for DeadlineWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check()?;
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check()?;
        self.inner.flush()
    }
}
