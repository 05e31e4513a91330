//! Byte source abstraction.
//!
//! The demuxer never assumes it is reading a local file. Anything that can
//! serve positioned reads works: a file, an in-memory buffer, or an HTTP
//! download that is still in flight. A source is allowed to return short
//! reads near a boundary that has not been downloaded yet; the streaming
//! manager turns those short reads into "wait and retry" decisions.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

/// A positioned byte source the demuxer can read from.
///
/// This mirrors the classic stdio quartet (read/seek/tell/eof) plus a
/// total-size query that may legitimately be unanswerable while a download
/// is in progress.
pub trait ByteSource: Send {
    /// Read up to `buf.len()` bytes at the current position.
    ///
    /// A short read is not an error; it means fewer bytes are available
    /// right now (end of file, or data not yet downloaded).
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Reposition the read cursor.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64>;

    /// Current cursor position.
    fn tell(&mut self) -> io::Result<u64> {
        self.seek(SeekFrom::Current(0))
    }

    /// Whether the cursor sits at (or past) the end of currently known data.
    fn is_eof(&mut self) -> bool;

    /// Total size in bytes, when known. Progressive downloads may not know.
    fn total_size(&mut self) -> Option<u64>;

    /// Read exactly `buf.len()` bytes at `offset`, leaving the cursor after
    /// the read. Returns false when the bytes are not (yet) available.
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> bool {
        if self.seek(SeekFrom::Start(offset)).is_err() {
            return false;
        }
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => return false,
                Ok(n) => filled += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => return false,
            }
        }
        true
    }
}

/// In-memory byte source.
///
/// Used by tests and by callers that already hold the whole container in
/// memory (e.g. an embedded resource).
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Vec<u8>,
    pos: u64,
}

impl MemorySource {
    /// Wrap a buffer.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    /// Size of the wrapped buffer.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Whether the wrapped buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl ByteSource for MemorySource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let start = self.pos.min(self.len()) as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let next = match pos {
            SeekFrom::Start(off) => off as i128,
            SeekFrom::Current(off) => self.pos as i128 + off as i128,
            SeekFrom::End(off) => self.len() as i128 + off as i128,
        };
        if next < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start",
            ));
        }
        self.pos = next as u64;
        Ok(self.pos)
    }

    fn is_eof(&mut self) -> bool {
        self.pos >= self.len()
    }

    fn total_size(&mut self) -> Option<u64> {
        Some(self.len())
    }
}

/// Local-file byte source.
#[derive(Debug)]
pub struct FileSource {
    file: File,
    len: u64,
}

impl FileSource {
    /// Open a file for demuxing.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }
}

impl ByteSource for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }

    fn is_eof(&mut self) -> bool {
        self.file
            .stream_position()
            .map(|p| p >= self.len)
            .unwrap_or(true)
    }

    fn total_size(&mut self) -> Option<u64> {
        Some(self.len)
    }
}

/// Handle to a byte source shared between the parser and the streaming
/// manager's fetch worker. Every call locks the underlying source, so the
/// two never interleave a seek/read pair.
#[derive(Debug)]
pub struct SharedSource<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> SharedSource<S> {
    /// Wrap a shared source handle.
    pub fn new(inner: Arc<Mutex<S>>) -> Self {
        Self { inner }
    }
}

impl<S> Clone for SharedSource<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: ByteSource> ByteSource for SharedSource<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.lock().read(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.lock().seek(pos)
    }

    fn is_eof(&mut self) -> bool {
        self.inner.lock().is_eof()
    }

    fn total_size(&mut self) -> Option<u64> {
        self.inner.lock().total_size()
    }

    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> bool {
        self.inner.lock().read_exact_at(offset, buf)
    }
}
