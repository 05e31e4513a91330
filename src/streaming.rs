//! Progressive-download streaming manager.
//!
//! When the byte source is an in-flight download, bytes at a requested
//! offset may simply not exist yet. This manager tracks which ranges
//! have been confirmed, runs one background worker that drains a FIFO of
//! fetch requests, and lets callers block until a range arrives or a
//! timeout expires.
//!
//! The downloaded-range list and the request queue are the only shared
//! mutable state. Both live under a single lock that is never held
//! across a fetch, and range insertions are applied atomically, so a
//! waiter never observes a partially merged set.
//!
//! Prefetch requests share the FIFO with on-demand requests and carry no
//! priority; a production implementation may want to prioritize
//! on-demand reads.

use std::collections::VecDeque;
use std::io::SeekFrom;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::io::ByteSource;

/// Default time `read_data` and availability waits give a range to
/// arrive before failing.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the worker parks after a fetch that made no progress.
const RETRY_PARK: Duration = Duration::from_millis(25);

/// Fetch granularity.
const FETCH_CHUNK: usize = 64 * 1024;

/// A half-open `[start, end)` interval of confirmed bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte of the range.
    pub start: u64,
    /// One past the last byte of the range.
    pub end: u64,
}

impl ByteRange {
    /// Construct a range; `end < start` is clamped to empty.
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    /// Number of bytes covered.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Whether the range covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Insert a range into a sorted minimal set, merging any now-adjacent or
/// overlapping neighbors.
fn insert_range(ranges: &mut Vec<ByteRange>, mut new: ByteRange) {
    if new.is_empty() {
        return;
    }
    let idx = ranges.partition_point(|r| r.start < new.start);
    let mut first = idx;
    if first > 0 && ranges[first - 1].end >= new.start {
        first -= 1;
        new.start = ranges[first].start;
        new.end = new.end.max(ranges[first].end);
    }
    let mut last = first;
    while last < ranges.len() && ranges[last].start <= new.end {
        new.end = new.end.max(ranges[last].end);
        last += 1;
    }
    ranges.splice(first..last, [new]);
}

/// Whether `[start, end)` is fully covered by a sorted minimal set.
fn is_covered(ranges: &[ByteRange], start: u64, end: u64) -> bool {
    if start >= end {
        return true;
    }
    let idx = ranges.partition_point(|r| r.start <= start);
    idx > 0 && ranges[idx - 1].end >= end
}

#[derive(Debug, Default)]
struct StreamState {
    ranges: Vec<ByteRange>,
    queue: VecDeque<ByteRange>,
    shutdown: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<StreamState>,
    /// Signalled when the range set grows or on shutdown.
    data_ready: Condvar,
    /// Signalled when the queue grows or on shutdown.
    queue_ready: Condvar,
}

/// Byte-range manager for one open media stream.
pub struct StreamingManager<S> {
    source: Arc<Mutex<S>>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    file_size: Option<u64>,
    streaming: bool,
    moov_offset: Option<u64>,
    moov_at_end: bool,
    prefetch_lookahead: AtomicU32,
}

impl<S: ByteSource + 'static> StreamingManager<S> {
    /// Create a manager over a shared source and classify the layout.
    ///
    /// The source is scanned for the movie box: a source whose total
    /// size is unknown, or whose movie box sits behind the media data,
    /// is classified progressive-download.
    pub fn new(source: Arc<Mutex<S>>) -> Self {
        let (file_size, moov_offset, mdat_offset) = {
            let mut src = source.lock();
            let file_size = src.total_size();
            let (moov, mdat) = scan_top_level(&mut *src);
            (file_size, moov, mdat)
        };

        let moov_at_end = match (moov_offset, mdat_offset) {
            (Some(moov), Some(mdat)) => moov > mdat,
            // Media data visible but no movie box yet: it can only be
            // in the part that has not arrived.
            (None, Some(_)) => true,
            _ => false,
        };
        let streaming = file_size.is_none() || moov_at_end;

        tracing::debug!(
            ?file_size,
            ?moov_offset,
            moov_at_end,
            streaming,
            "classified media source"
        );

        let shared = Arc::new(Shared::default());
        let worker = Some(spawn_worker(Arc::clone(&source), Arc::clone(&shared)));

        Self {
            source,
            shared,
            worker,
            file_size,
            streaming,
            moov_offset,
            moov_at_end,
            prefetch_lookahead: AtomicU32::new(4),
        }
    }

    /// Whether the source must be treated as a progressive download.
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Whether the movie box sits behind the media data.
    pub fn is_movie_box_at_end(&self) -> bool {
        self.moov_at_end
    }

    /// Offset of the movie box, re-scanning the source in case more of
    /// it has arrived since the last scan.
    pub fn find_movie_box(&mut self) -> Option<u64> {
        if self.moov_offset.is_none() {
            let mut src = self.source.lock();
            let (moov, _) = scan_top_level(&mut *src);
            self.moov_offset = moov;
        }
        self.moov_offset
    }

    /// Total file size, when the source knows it.
    pub fn file_size(&self) -> Option<u64> {
        self.file_size
    }

    /// Non-blocking check that `[offset, offset + size)` is confirmed.
    pub fn is_data_available(&self, offset: u64, size: u64) -> bool {
        let state = self.shared.state.lock();
        is_covered(&state.ranges, offset, offset + size)
    }

    /// Enqueue a background fetch of a range. Non-blocking; already
    /// confirmed ranges are not re-requested.
    pub fn request_byte_range(&self, offset: u64, size: u64) {
        if size == 0 {
            return;
        }
        let mut end = offset + size;
        if let Some(total) = self.file_size {
            end = end.min(total);
        }
        let mut state = self.shared.state.lock();
        if state.shutdown || is_covered(&state.ranges, offset, end) {
            return;
        }
        state.queue.push_back(ByteRange::new(offset, end));
        self.shared.queue_ready.notify_one();
    }

    /// Block until `[offset, offset + size)` is fully confirmed, the
    /// timeout expires, or the manager shuts down. Returns false on
    /// timeout or shutdown; waiting is the only way unavailable data
    /// becomes an error.
    pub fn wait_for_data(&self, offset: u64, size: u64, timeout: Duration) -> bool {
        if size == 0 {
            return true;
        }
        let end = offset + size;
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if is_covered(&state.ranges, offset, end) {
                return true;
            }
            if state.shutdown {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.shared
                .data_ready
                .wait_for(&mut state, deadline - now);
        }
    }

    /// Read `buf.len()` bytes at `offset`, blocking until the range is
    /// available on a streaming source. Returns the byte count read, 0
    /// on timeout or I/O failure.
    pub fn read_data(&self, offset: u64, buf: &mut [u8]) -> usize {
        if self.streaming && !self.is_data_available(offset, buf.len() as u64) {
            self.request_byte_range(offset, buf.len() as u64);
            if !self.wait_for_data(offset, buf.len() as u64, DEFAULT_WAIT_TIMEOUT) {
                return 0;
            }
        }
        let mut src = self.source.lock();
        if src.read_exact_at(offset, buf) {
            buf.len()
        } else {
            0
        }
    }

    /// Percentage of the file confirmed downloaded, 0 when the total
    /// size is unknown.
    pub fn download_progress(&self) -> u8 {
        let Some(total) = self.file_size else {
            return 0;
        };
        if total == 0 {
            return 100;
        }
        let state = self.shared.state.lock();
        let covered: u64 = state.ranges.iter().map(ByteRange::len).sum();
        ((covered.min(total) * 100) / total) as u8
    }

    /// Whether the whole file is confirmed downloaded.
    pub fn is_download_complete(&self) -> bool {
        match self.file_size {
            Some(total) => {
                let state = self.shared.state.lock();
                is_covered(&state.ranges, 0, total)
            }
            None => false,
        }
    }

    /// Hint that a sample at `[offset, offset + size)` will be needed
    /// soon. Shares the request FIFO with on-demand reads.
    pub fn prefetch_sample(&self, offset: u64, size: u64) {
        self.request_byte_range(offset, size);
    }

    /// Number of upcoming samples the owner should prefetch ahead of the
    /// playback cursor.
    pub fn set_prefetch_strategy(&self, lookahead: u32) {
        self.prefetch_lookahead.store(lookahead, Ordering::Relaxed);
    }

    /// Current prefetch lookahead.
    pub fn prefetch_lookahead(&self) -> u32 {
        self.prefetch_lookahead.load(Ordering::Relaxed)
    }

    /// Stop the worker and release every blocked waiter with failure.
    /// Required for clean teardown: a waiter must never hang on a
    /// manager that is going away.
    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            self.shared.queue_ready.notify_all();
            self.shared.data_ready.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl<S> Drop for StreamingManager<S> {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            self.shared.queue_ready.notify_all();
            self.shared.data_ready.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Scan top-level boxes for `moov` and `mdat`, reading only headers.
/// Stops at the first unreadable header (not-yet-downloaded region).
fn scan_top_level<S: ByteSource>(src: &mut S) -> (Option<u64>, Option<u64>) {
    let known_end = match src.total_size() {
        Some(total) => total,
        None => src.seek(SeekFrom::End(0)).unwrap_or(0),
    };

    let mut moov = None;
    let mut mdat = None;
    let mut offset = 0u64;

    while offset + 8 <= known_end {
        let mut head = [0u8; 8];
        if !src.read_exact_at(offset, &mut head) {
            break;
        }
        let size32 = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
        let box_type = &head[4..8];

        let size = if size32 == 1 {
            let mut ext = [0u8; 8];
            if offset + 16 > known_end || !src.read_exact_at(offset + 8, &mut ext) {
                break;
            }
            u64::from_be_bytes(ext)
        } else if size32 == 0 {
            known_end - offset
        } else {
            size32 as u64
        };
        if size < 8 {
            break;
        }

        match box_type {
            b"moov" => moov = Some(offset),
            b"mdat" => mdat = Some(offset),
            _ => {}
        }
        if moov.is_some() && mdat.is_some() {
            break;
        }
        offset += size;
    }

    (moov, mdat)
}

/// The background fetch worker: drains the FIFO, confirms what the
/// source can currently supply, and re-queues the rest.
fn spawn_worker<S: ByteSource + 'static>(
    source: Arc<Mutex<S>>,
    shared: Arc<Shared>,
) -> JoinHandle<()> {
    std::thread::spawn(move || loop {
        let request = {
            let mut state = shared.state.lock();
            loop {
                if state.shutdown {
                    return;
                }
                if let Some(range) = state.queue.pop_front() {
                    if is_covered(&state.ranges, range.start, range.end) {
                        continue;
                    }
                    break range;
                }
                shared.queue_ready.wait(&mut state);
            }
        };

        // Fetch outside the lock.
        let got = fetch_range(&source, request);

        let mut state = shared.state.lock();
        if got > 0 {
            insert_range(
                &mut state.ranges,
                ByteRange::new(request.start, request.start + got),
            );
            shared.data_ready.notify_all();
        }
        let fetched_to = request.start + got;
        if fetched_to < request.end && !state.shutdown {
            state
                .queue
                .push_back(ByteRange::new(fetched_to, request.end));
            if got == 0 {
                // No progress; park briefly instead of spinning while the
                // download catches up.
                shared.queue_ready.wait_for(&mut state, RETRY_PARK);
            }
        }
    })
}

/// Read as much of `range` as the source can supply right now.
fn fetch_range<S: ByteSource>(source: &Arc<Mutex<S>>, range: ByteRange) -> u64 {
    let mut src = source.lock();
    if src.seek(SeekFrom::Start(range.start)).is_err() {
        return 0;
    }
    let mut buf = [0u8; FETCH_CHUNK];
    let mut got = 0u64;
    while got < range.len() {
        let want = (range.len() - got).min(FETCH_CHUNK as u64) as usize;
        match src.read(&mut buf[..want]) {
            Ok(0) | Err(_) => break,
            Ok(n) => got += n as u64,
        }
    }
    got
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemorySource;

    fn manager_over(data: Vec<u8>) -> StreamingManager<MemorySource> {
        StreamingManager::new(Arc::new(Mutex::new(MemorySource::new(data))))
    }

    #[test]
    fn test_insert_and_merge_ranges() {
        let mut ranges = Vec::new();
        insert_range(&mut ranges, ByteRange::new(100, 150));
        insert_range(&mut ranges, ByteRange::new(300, 400));
        assert_eq!(ranges.len(), 2);

        // Adjacent ranges collapse into one entry.
        insert_range(&mut ranges, ByteRange::new(150, 200));
        assert_eq!(ranges[0], ByteRange::new(100, 200));
        assert_eq!(ranges.len(), 2);

        // Overlap spanning both merges everything.
        insert_range(&mut ranges, ByteRange::new(180, 320));
        assert_eq!(ranges, vec![ByteRange::new(100, 400)]);
    }

    #[test]
    fn test_is_covered() {
        let ranges = vec![ByteRange::new(0, 100), ByteRange::new(200, 300)];
        assert!(is_covered(&ranges, 0, 100));
        assert!(is_covered(&ranges, 10, 50));
        assert!(is_covered(&ranges, 250, 300));
        assert!(!is_covered(&ranges, 50, 150));
        assert!(!is_covered(&ranges, 100, 200));
        assert!(is_covered(&ranges, 42, 42));
    }

    #[test]
    fn test_request_then_available() {
        let manager = manager_over(vec![0xAB; 512]);
        assert!(!manager.is_data_available(100, 50));

        manager.request_byte_range(100, 50);
        assert!(manager.wait_for_data(100, 50, Duration::from_secs(2)));
        assert!(manager.is_data_available(100, 50));
    }

    #[test]
    fn test_adjacent_fetches_merge() {
        let manager = manager_over(vec![0xAB; 512]);
        manager.request_byte_range(100, 50);
        manager.request_byte_range(150, 50);
        assert!(manager.wait_for_data(100, 100, Duration::from_secs(2)));

        let state = manager.shared.state.lock();
        assert_eq!(state.ranges, vec![ByteRange::new(100, 200)]);
    }

    #[test]
    fn test_wait_for_data_times_out() {
        let manager = manager_over(vec![0xAB; 64]);
        // Range beyond the end of the source can never be confirmed.
        let start = Instant::now();
        assert!(!manager.wait_for_data(1000, 50, Duration::from_millis(100)));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_shutdown_releases_waiters() {
        let mut manager = manager_over(vec![0xAB; 64]);
        let shared = Arc::clone(&manager.shared);
        let waiter = std::thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(30);
            let mut state = shared.state.lock();
            loop {
                if state.shutdown {
                    return true;
                }
                if Instant::now() >= deadline {
                    return false;
                }
                shared.data_ready.wait_for(&mut state, Duration::from_secs(30));
            }
        });
        std::thread::sleep(Duration::from_millis(50));
        manager.shutdown();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_download_progress_and_completion() {
        let manager = manager_over(vec![0xAB; 200]);
        assert_eq!(manager.download_progress(), 0);
        assert!(!manager.is_download_complete());

        manager.request_byte_range(0, 100);
        assert!(manager.wait_for_data(0, 100, Duration::from_secs(2)));
        assert_eq!(manager.download_progress(), 50);

        manager.request_byte_range(100, 100);
        assert!(manager.wait_for_data(100, 100, Duration::from_secs(2)));
        assert_eq!(manager.download_progress(), 100);
        assert!(manager.is_download_complete());
    }

    #[test]
    fn test_read_data_serves_bytes() {
        let mut data = vec![0u8; 256];
        data[100..110].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        let manager = manager_over(data);

        let mut buf = [0u8; 10];
        assert_eq!(manager.read_data(100, &mut buf), 10);
        assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_moov_front_is_not_streaming() {
        let mut data = Vec::new();
        // moov then mdat, both minimal
        data.extend_from_slice(&16u32.to_be_bytes());
        data.extend_from_slice(b"moov");
        data.extend_from_slice(&[0u8; 8]);
        data.extend_from_slice(&16u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&[0u8; 8]);

        let manager = manager_over(data);
        assert!(!manager.is_streaming());
        assert!(!manager.is_movie_box_at_end());
    }

    #[test]
    fn test_moov_behind_mdat_is_streaming() {
        let mut data = Vec::new();
        data.extend_from_slice(&16u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&[0u8; 8]);
        data.extend_from_slice(&16u32.to_be_bytes());
        data.extend_from_slice(b"moov");
        data.extend_from_slice(&[0u8; 8]);

        let mut manager = manager_over(data);
        assert!(manager.is_streaming());
        assert!(manager.is_movie_box_at_end());
        assert_eq!(manager.find_movie_box(), Some(16));
    }
}
