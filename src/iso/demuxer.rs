//! ISO container demuxer facade.
//!
//! Ties the box parser, error recovery, and the streaming manager
//! together for one open media stream: parse the container, pick an
//! audio track, hand out compressed sample chunks, and seek by
//! timestamp. Anomalies are routed through recovery first; a track is
//! only rejected when no safe repair exists, and the file only fails
//! when no track remains.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::io::{ByteSource, FileSource, SharedSource};
use crate::iso::boxes::{AudioTrackInfo, BoxType};
use crate::iso::fragments::MovieFragmentInfo;
use crate::iso::parser::BoxParser;
use crate::streaming::{StreamingManager, DEFAULT_WAIT_TIMEOUT};

/// How many retries a sample-data read gets before it escalates.
const READ_RETRIES: u32 = 3;

/// Largest prefix of a sample handed to codec-config inference.
const INFERENCE_SNIFF_LEN: usize = 4096;

/// One extracted compressed sample, ready for a decoder.
#[derive(Debug, Clone)]
pub struct MediaChunk {
    /// Track the sample belongs to.
    pub track_id: u32,
    /// Sample index within the track.
    pub sample_index: u64,
    /// Compressed sample bytes, verbatim from the container.
    pub data: Bytes,
    /// Decode timestamp in milliseconds.
    pub timestamp_ms: u64,
    /// Sample duration in milliseconds (0 when unknown).
    pub duration_ms: u64,
    /// Whether this sample is a sync (seekable) point.
    pub is_sync: bool,
}

/// Demuxer for one ISO-family container.
pub struct IsoDemuxer<S: ByteSource + 'static> {
    parser: BoxParser<SharedSource<S>>,
    reader: SharedSource<S>,
    streaming: StreamingManager<S>,
    container_brand: &'static str,
    movie_timescale: u32,
    movie_duration: u64,
    metadata: BTreeMap<String, String>,
    fragments: Vec<MovieFragmentInfo>,
    tracks: Vec<AudioTrackInfo>,
    cursors: Vec<u64>,
    selected: usize,
    position_ms: u64,
    eof: bool,
}

impl IsoDemuxer<FileSource> {
    /// Open and parse a local file.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(FileSource::open(path)?)
    }
}

impl<S: ByteSource + 'static> IsoDemuxer<S> {
    /// Open and parse a container from any byte source.
    pub fn open(source: S) -> Result<Self> {
        let source = Arc::new(Mutex::new(source));
        let mut streaming = StreamingManager::new(Arc::clone(&source));

        if streaming.is_streaming() && streaming.is_movie_box_at_end() {
            wait_for_movie_box(&mut streaming)?;
        }

        let reader = SharedSource::new(Arc::clone(&source));
        let mut parser = BoxParser::new(reader.clone());

        let mut brand = None;
        let mut movie = None;
        let mut fragments: Vec<MovieFragmentInfo> = Vec::new();
        let file_size = parser.file_size();

        let ok = parser.parse_box_recursively(0, file_size, 0, &mut |p, header, _rel, d| {
            match header.box_type {
                BoxType::FTYP => {
                    brand = p.parse_file_type_box(header);
                    true
                }
                BoxType::MOOV => {
                    movie = p.parse_movie_box(header.data_offset, header.payload_size(), d);
                    movie.is_some()
                }
                BoxType::MOOF => {
                    match p.parse_movie_fragment(header, d) {
                        Some(fragment) => fragments.push(fragment),
                        None => p.recovery_mut().log_error(
                            "FragmentSkipped",
                            "movie fragment could not be parsed",
                            Some(BoxType::MOOF),
                        ),
                    }
                    true
                }
                // Media data and padding are located, not parsed.
                _ => true,
            }
        });
        if !ok {
            return Err(Error::invalid_container("top-level box walk failed"));
        }
        let movie = movie.ok_or_else(|| Error::invalid_container("no movie box found"))?;

        let mut demuxer = Self {
            parser,
            reader,
            streaming,
            container_brand: brand.unwrap_or("MP4"),
            movie_timescale: movie.timescale,
            movie_duration: movie.duration,
            metadata: movie.metadata,
            fragments,
            tracks: Vec::new(),
            cursors: Vec::new(),
            selected: 0,
            position_ms: 0,
            eof: false,
        };

        for track in movie.tracks {
            match demuxer.prepare_track(track) {
                Some(track) => {
                    demuxer.tracks.push(track);
                    demuxer.cursors.push(0);
                }
                None => {}
            }
        }
        if demuxer.tracks.is_empty() {
            return Err(Error::NoAudioTrack);
        }
        Ok(demuxer)
    }

    /// Fold in fragments, reconcile tables, and settle codec
    /// configuration. Returns `None` when the track is undecodable.
    fn prepare_track(&mut self, mut track: AudioTrackInfo) -> Option<AudioTrackInfo> {
        for fragment in &self.fragments {
            if !fragment.extend_sample_tables(track.track_id, &mut track.sample_table) {
                self.parser.recovery_mut().log_error(
                    "FragmentOverflow",
                    "fragment pushed track past the sample ceiling",
                    Some(BoxType::MOOF),
                );
                return None;
            }
        }

        if !self
            .parser
            .recovery_mut()
            .repair_sample_tables(&mut track.sample_table)
        {
            tracing::warn!(track_id = track.track_id, "track tables beyond repair");
            return None;
        }

        if track.codec.needs_codec_config() && track.codec_config.is_empty() {
            let sniff = self.read_sample_prefix(&track, 0, INFERENCE_SNIFF_LEN);
            if !self
                .parser
                .recovery_mut()
                .infer_codec_config(&mut track, &sniff)
            {
                tracing::warn!(
                    track_id = track.track_id,
                    codec = ?track.codec,
                    "codec configuration missing and not inferable"
                );
                return None;
            }
        }

        Some(track)
    }

    /// Read the first bytes of a sample for configuration inference.
    fn read_sample_prefix(&mut self, track: &AudioTrackInfo, index: u64, max_len: usize) -> Vec<u8> {
        let Some(location) = track.sample_table.locate(index) else {
            return Vec::new();
        };
        let len = (location.size as usize).min(max_len);
        let mut buf = vec![0u8; len];
        if self.ensure_available(location.offset, len as u64).is_err() {
            return Vec::new();
        }
        let reader = &mut self.reader;
        let ok = self
            .parser
            .recovery_mut()
            .retry_io(|| reader.read_exact_at(location.offset, &mut buf), READ_RETRIES);
        if ok {
            buf
        } else {
            Vec::new()
        }
    }

    fn ensure_available(&self, offset: u64, size: u64) -> Result<()> {
        if !self.streaming.is_streaming() || self.streaming.is_data_available(offset, size) {
            return Ok(());
        }
        self.streaming.request_byte_range(offset, size);
        if self.streaming.wait_for_data(offset, size, DEFAULT_WAIT_TIMEOUT) {
            Ok(())
        } else {
            Err(Error::streaming(format!(
                "range [{offset}, {}) did not arrive in time",
                offset + size
            )))
        }
    }

    // ------------------------------------------------------------------
    // Track selection and introspection
    // ------------------------------------------------------------------

    /// All decodable audio tracks.
    pub fn tracks(&self) -> &[AudioTrackInfo] {
        &self.tracks
    }

    /// The currently selected track.
    pub fn selected_track(&self) -> &AudioTrackInfo {
        &self.tracks[self.selected]
    }

    /// Select a track by ID. Returns false when no such track exists.
    pub fn select_track(&mut self, track_id: u32) -> bool {
        match self.tracks.iter().position(|t| t.track_id == track_id) {
            Some(index) => {
                self.selected = index;
                self.eof = false;
                true
            }
            None => false,
        }
    }

    /// Container brand from the file type box.
    pub fn container_brand(&self) -> &'static str {
        self.container_brand
    }

    /// Tags extracted from the user data box.
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Movie fragments, in file order.
    pub fn fragments(&self) -> &[MovieFragmentInfo] {
        &self.fragments
    }

    /// Error statistics accumulated by recovery during this parse.
    pub fn error_stats(&self) -> &BTreeMap<String, u64> {
        self.parser.recovery().error_stats()
    }

    /// The streaming manager for this stream.
    pub fn streaming(&self) -> &StreamingManager<S> {
        &self.streaming
    }

    /// Total duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        let movie = scale_to_ms(self.movie_duration, self.movie_timescale);
        let tracks = self
            .tracks
            .iter()
            .map(|t| {
                let table = scale_to_ms(t.sample_table.duration(), t.timescale);
                let declared = scale_to_ms(t.duration, t.timescale);
                table.max(declared)
            })
            .max()
            .unwrap_or(0);
        movie.max(tracks)
    }

    /// Current playback position in milliseconds.
    pub fn position_ms(&self) -> u64 {
        self.position_ms
    }

    /// Whether the selected track has run out of samples.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    // ------------------------------------------------------------------
    // Sample extraction
    // ------------------------------------------------------------------

    /// Extract the next compressed sample of the selected track.
    ///
    /// Returns `Ok(None)` at end of stream. Empty or unlocatable samples
    /// are counted and skipped rather than surfaced; a byte range that
    /// never arrives on a streaming source is the only hard error here.
    pub fn next_chunk(&mut self) -> Result<Option<MediaChunk>> {
        loop {
            let cursor = self.cursors[self.selected];
            let track = &self.tracks[self.selected];
            if cursor >= track.sample_table.sample_count() {
                self.eof = true;
                return Ok(None);
            }

            let Some(location) = track.sample_table.locate(cursor) else {
                self.parser.recovery_mut().log_error(
                    "SampleUnlocatable",
                    &format!("sample {cursor} has no chunk mapping"),
                    None,
                );
                self.cursors[self.selected] += 1;
                continue;
            };
            if location.size == 0 {
                self.parser.recovery_mut().log_error(
                    "EmptySampleSkipped",
                    &format!("sample {cursor} has zero size"),
                    None,
                );
                self.cursors[self.selected] += 1;
                continue;
            }

            self.ensure_available(location.offset, location.size as u64)?;

            let mut data = vec![0u8; location.size as usize];
            let reader = &mut self.reader;
            let ok = self.parser.recovery_mut().retry_io(
                || reader.read_exact_at(location.offset, &mut data),
                READ_RETRIES,
            );
            if !ok {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("sample {cursor} unreadable at offset {}", location.offset),
                )));
            }

            let track = &self.tracks[self.selected];
            let timestamp_ms = scale_to_ms(
                track.sample_table.time_of(cursor).unwrap_or(0),
                track.timescale,
            );
            let duration_ms = track
                .sample_table
                .time_of(cursor + 1)
                .map(|next| {
                    scale_to_ms(next, track.timescale).saturating_sub(timestamp_ms)
                })
                .unwrap_or(0);
            let chunk = MediaChunk {
                track_id: track.track_id,
                sample_index: cursor,
                data: Bytes::from(data),
                timestamp_ms,
                duration_ms,
                is_sync: track.sample_table.is_sync(cursor),
            };

            self.cursors[self.selected] = cursor + 1;
            self.position_ms = timestamp_ms;
            self.prefetch_upcoming(cursor + 1);

            return Ok(Some(chunk));
        }
    }

    /// Extract one sample of a track by index, without moving the
    /// playback cursor.
    ///
    /// Returns `Ok(None)` for an unknown track, an out-of-range index,
    /// or an empty/unlocatable sample.
    pub fn chunk_at(&mut self, track_id: u32, index: u64) -> Result<Option<MediaChunk>> {
        let Some(pos) = self.tracks.iter().position(|t| t.track_id == track_id) else {
            return Ok(None);
        };
        let track = &self.tracks[pos];
        let Some(location) = track.sample_table.locate(index) else {
            return Ok(None);
        };
        if location.size == 0 {
            return Ok(None);
        }

        self.ensure_available(location.offset, location.size as u64)?;

        let mut data = vec![0u8; location.size as usize];
        let reader = &mut self.reader;
        let ok = self.parser.recovery_mut().retry_io(
            || reader.read_exact_at(location.offset, &mut data),
            READ_RETRIES,
        );
        if !ok {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("sample {index} unreadable at offset {}", location.offset),
            )));
        }

        let track = &self.tracks[pos];
        let timestamp_ms = scale_to_ms(
            track.sample_table.time_of(index).unwrap_or(0),
            track.timescale,
        );
        let duration_ms = track
            .sample_table
            .time_of(index + 1)
            .map(|next| scale_to_ms(next, track.timescale).saturating_sub(timestamp_ms))
            .unwrap_or(0);
        Ok(Some(MediaChunk {
            track_id,
            sample_index: index,
            data: Bytes::from(data),
            timestamp_ms,
            duration_ms,
            is_sync: track.sample_table.is_sync(index),
        }))
    }

    /// Queue fetches for the next few samples so sequential playback
    /// does not stall on every chunk boundary.
    fn prefetch_upcoming(&self, from_index: u64) {
        if !self.streaming.is_streaming() {
            return;
        }
        let track = &self.tracks[self.selected];
        let lookahead = self.streaming.prefetch_lookahead() as u64;
        for index in from_index..from_index.saturating_add(lookahead) {
            match track.sample_table.locate(index) {
                Some(location) if location.size > 0 => {
                    self.streaming
                        .prefetch_sample(location.offset, location.size as u64);
                }
                _ => break,
            }
        }
    }

    /// Seek the selected track to a timestamp, snapping back to the
    /// nearest preceding sync sample. Positions past the end are clamped
    /// to the duration. Returns false when the track has no samples.
    pub fn seek_to(&mut self, timestamp_ms: u64) -> bool {
        let duration = self.duration_ms();
        let mut target_ms = timestamp_ms;
        if duration > 0 && target_ms > duration {
            self.parser.recovery_mut().log_error(
                "SeekClamped",
                &format!("seek to {timestamp_ms}ms clamped to {duration}ms"),
                None,
            );
            target_ms = duration;
        }

        let track = &self.tracks[self.selected];
        if track.sample_table.sample_count() == 0 || track.timescale == 0 {
            return false;
        }
        let target_time = target_ms * track.timescale as u64 / 1000;
        let index = track.sample_table.sample_for_time(target_time);
        let snapped = track.sample_table.sync_at_or_before(index);

        self.cursors[self.selected] = snapped;
        self.position_ms = scale_to_ms(
            track.sample_table.time_of(snapped).unwrap_or(0),
            track.timescale,
        );
        self.eof = false;
        true
    }
}

/// Wait for the movie box of a progressive download whose index sits at
/// the tail: confirm the head, then grow a tail window until the movie
/// box is visible and complete.
fn wait_for_movie_box<S: ByteSource + 'static>(streaming: &mut StreamingManager<S>) -> Result<()> {
    let Some(total) = streaming.file_size() else {
        return Err(Error::streaming(
            "movie box at end of a source with unknown size",
        ));
    };

    let head = total.min(64 * 1024);
    streaming.request_byte_range(0, head);
    if !streaming.wait_for_data(0, head, DEFAULT_WAIT_TIMEOUT) {
        return Err(Error::streaming("file head did not arrive in time"));
    }

    let mut window = (64 * 1024).min(total);
    loop {
        let start = total - window;
        streaming.request_byte_range(start, window);
        if !streaming.wait_for_data(start, window, DEFAULT_WAIT_TIMEOUT) {
            return Err(Error::streaming("file tail did not arrive in time"));
        }
        if let Some(moov_offset) = streaming.find_movie_box() {
            if moov_offset >= start || streaming.is_data_available(moov_offset, total - moov_offset)
            {
                tracing::debug!(moov_offset, "movie box available for progressive download");
                return Ok(());
            }
        }
        if window == total {
            return Err(Error::streaming(
                "movie box not found in progressive download",
            ));
        }
        window = (window * 4).min(total);
    }
}

fn scale_to_ms(value: u64, timescale: u32) -> u64 {
    if timescale == 0 {
        return 0;
    }
    value.saturating_mul(1000) / timescale as u64
}
