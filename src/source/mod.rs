//! Chunk sources
//!
//! A [`ChunkSource`] hands the pull-mode drivers the artifact's total size
//! and the bytes at a given offset. Reads are positional, so a resync that
//! moves the offset backwards inside the current chunk simply rereads.

use bytes::Bytes;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// Supplies the artifact being uploaded
pub trait ChunkSource: Send {
    /// Total size of the artifact in bytes
    fn total_size(&mut self) -> io::Result<u64>;

    /// Read up to `max_len` bytes starting at `offset`.
    ///
    /// Returns fewer bytes only at the end of the artifact.
    fn read(&mut self, offset: u64, max_len: usize) -> io::Result<Bytes>;
}

impl<S: ChunkSource + ?Sized> ChunkSource for &mut S {
    fn total_size(&mut self) -> io::Result<u64> {
        (**self).total_size()
    }

    fn read(&mut self, offset: u64, max_len: usize) -> io::Result<Bytes> {
        (**self).read(offset, max_len)
    }
}

/// File-backed source
pub struct FileSource {
    file: File,
}

impl FileSource {
    /// Open `path` for positional reads
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self { file })
    }
}

impl ChunkSource for FileSource {
    fn total_size(&mut self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn read(&mut self, offset: u64, max_len: usize) -> io::Result<Bytes> {
        self.file.seek(SeekFrom::Start(offset))?;

        let mut buf = Vec::with_capacity(max_len.min(8 * 1024 * 1024));
        self.file
            .by_ref()
            .take(max_len as u64)
            .read_to_end(&mut buf)?;

        Ok(Bytes::from(buf))
    }
}

/// In-memory source
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl ChunkSource for MemorySource {
    fn total_size(&mut self) -> io::Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn read(&mut self, offset: u64, max_len: usize) -> io::Result<Bytes> {
        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(self.data.len());
        let end = start.saturating_add(max_len).min(self.data.len());
        Ok(self.data.slice(start..end))
    }
}
