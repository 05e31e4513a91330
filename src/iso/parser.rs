//! Recursive box parser.
//!
//! One primitive walks sibling boxes inside a byte range and hands each
//! validated header to a caller-supplied handler; every container box
//! (movie, track, media, sample table, fragment) is parsed as a handler
//! over that primitive, so the depth bound applies uniformly wherever
//! boxes nest.
//!
//! The parser is a pure function of `(offset, size, depth)` over the byte
//! source: no state survives a call, and structural problems surface as
//! boolean failure or an invalid header, never as a panic or an `Err`.

use std::collections::BTreeMap;
use std::io::SeekFrom;

use crate::io::ByteSource;
use crate::iso::boxes::{AudioCodec, AudioTrackInfo, BoxHeader, BoxType, HandlerType};
use crate::iso::codec;
use crate::iso::recovery::RecoveryContext;
use crate::iso::sample_table::{SampleSizes, SampleTableInfo, SampleToChunkEntry};

/// Maximum box nesting depth accepted before a parse is abandoned.
/// Attacker-controlled trees must not be able to exhaust the stack.
pub const MAX_BOX_DEPTH: u32 = 32;

/// Maximum per-track sample count accepted from any sample table. A
/// hostile file can declare absurd entry counts to force huge
/// allocations; counts are checked against this before any allocation.
pub const MAX_SAMPLES_PER_TRACK: u64 = 10_000_000;

/// Maximum number of sibling boxes walked inside one container.
const MAX_BOXES_PER_CONTAINER: u32 = 10_000;

/// Movie-level information extracted from the `moov` box.
#[derive(Debug, Default)]
pub struct MovieInfo {
    /// Movie timescale (time units per second).
    pub timescale: u32,
    /// Movie duration in timescale units.
    pub duration: u64,
    /// Audio tracks found, in file order.
    pub tracks: Vec<AudioTrackInfo>,
    /// iTunes-style metadata from `udta`.
    pub metadata: BTreeMap<String, String>,
}

/// Box-structure parser over one byte source.
///
/// Owns a [`RecoveryContext`]; every logical parse gets its own parser
/// and therefore its own error statistics, so concurrent parses never
/// share mutable state.
pub struct BoxParser<S> {
    src: S,
    file_size: u64,
    recovery: RecoveryContext,
}

impl<S: ByteSource> BoxParser<S> {
    /// Create a parser over a source.
    pub fn new(mut src: S) -> Self {
        let file_size = match src.total_size() {
            Some(size) => size,
            // Unknown total size: the currently materialized extent is
            // the best the parser can validate against.
            None => src.seek(SeekFrom::End(0)).unwrap_or(0),
        };
        Self {
            src,
            file_size,
            recovery: RecoveryContext::new(),
        }
    }

    /// Size of the file (or of the known extent for an unsized source).
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Re-query the source for its size. Used after a progressive
    /// download has grown the known extent.
    pub fn refresh_file_size(&mut self) {
        if let Some(size) = self.src.total_size() {
            self.file_size = size;
        } else if let Ok(end) = self.src.seek(SeekFrom::End(0)) {
            self.file_size = end;
        }
    }

    /// The recovery context accumulated by this parse.
    pub fn recovery(&self) -> &RecoveryContext {
        &self.recovery
    }

    /// Mutable access to the recovery context.
    pub fn recovery_mut(&mut self) -> &mut RecoveryContext {
        &mut self.recovery
    }

    // ------------------------------------------------------------------
    // Positioned read helpers. All bounds-check against the known file
    // size first so a malformed header can never cause an out-of-bounds
    // read attempt.
    // ------------------------------------------------------------------

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> bool {
        match offset.checked_add(buf.len() as u64) {
            Some(end) if end <= self.file_size => self.src.read_exact_at(offset, buf),
            _ => false,
        }
    }

    pub(crate) fn read_u8_at(&mut self, offset: u64) -> Option<u8> {
        let mut buf = [0u8; 1];
        self.read_at(offset, &mut buf).then(|| buf[0])
    }

    pub(crate) fn read_u16_be_at(&mut self, offset: u64) -> Option<u16> {
        let mut buf = [0u8; 2];
        self.read_at(offset, &mut buf)
            .then(|| u16::from_be_bytes(buf))
    }

    pub(crate) fn read_u32_be_at(&mut self, offset: u64) -> Option<u32> {
        let mut buf = [0u8; 4];
        self.read_at(offset, &mut buf)
            .then(|| u32::from_be_bytes(buf))
    }

    pub(crate) fn read_u64_be_at(&mut self, offset: u64) -> Option<u64> {
        let mut buf = [0u8; 8];
        self.read_at(offset, &mut buf)
            .then(|| u64::from_be_bytes(buf))
    }

    /// Read a box payload into memory, enforcing `cap` before allocating.
    pub(crate) fn read_payload(&mut self, header: &BoxHeader, cap: u64) -> Option<Vec<u8>> {
        let size = header.payload_size();
        if size == 0 || size > cap {
            return None;
        }
        let mut data = vec![0u8; size as usize];
        self.read_at(header.data_offset, &mut data).then_some(data)
    }

    // ------------------------------------------------------------------
    // Core primitives
    // ------------------------------------------------------------------

    /// Read one box header at `offset`.
    ///
    /// `size == 1` in the 32-bit field selects the 64-bit extended size
    /// (16-byte header); `size == 0` means the box extends to the end of
    /// the file. Fewer than 8 available bytes, an I/O failure, or a
    /// declared size smaller than the header itself all yield a header
    /// with `size == 0`.
    pub fn read_box_header(&mut self, offset: u64) -> BoxHeader {
        let mut head = [0u8; 8];
        if !self.read_at(offset, &mut head) {
            return BoxHeader::invalid();
        }

        let size32 = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
        let box_type = BoxType::from_bytes([head[4], head[5], head[6], head[7]]);
        // Keep normal-header geometry on the invalid path so a recovered
        // size estimate still points at the right payload.
        let invalid = BoxHeader {
            box_type,
            size: 0,
            data_offset: offset + 8,
            extended_size: false,
        };

        if size32 == 1 {
            let Some(size) = self.read_u64_be_at(offset + 8) else {
                return invalid;
            };
            if size < 16 {
                return invalid;
            }
            BoxHeader {
                box_type,
                size,
                data_offset: offset + 16,
                extended_size: true,
            }
        } else if size32 == 0 {
            BoxHeader {
                box_type,
                size: self.file_size - offset,
                data_offset: offset + 8,
                extended_size: false,
            }
        } else if size32 < 8 {
            invalid
        } else {
            BoxHeader {
                box_type,
                size: size32 as u64,
                data_offset: offset + 8,
                extended_size: false,
            }
        }
    }

    /// Validate a header against its enclosing container.
    ///
    /// Rejects zero size, sizes below the header length, sizes exceeding
    /// the container's remaining bytes, and sizes exceeding the file.
    /// Very large but in-bounds sizes are deliberately NOT rejected here;
    /// context-specific ceilings belong to the caller and to recovery.
    pub fn validate_box_size(&self, header: &BoxHeader, container_size: u64) -> bool {
        if header.size == 0 {
            return false;
        }
        if header.size < header.header_len() {
            return false;
        }
        if header.size > container_size {
            return false;
        }
        if header.size > self.file_size {
            return false;
        }
        header.start_offset() + header.size <= self.file_size
    }

    /// Walk the sibling boxes inside `[offset, offset + size)`.
    ///
    /// Invokes `handler(parser, header, relative_offset, depth + 1)` for
    /// each box. Returns `false` immediately, without reading anything,
    /// when `depth >= MAX_BOX_DEPTH`. A header that fails validation is
    /// offered to recovery first; an unrecoverable header, or a handler
    /// returning `false`, stops the walk and propagates failure.
    pub fn parse_box_recursively(
        &mut self,
        offset: u64,
        size: u64,
        depth: u32,
        handler: &mut dyn FnMut(&mut Self, &BoxHeader, u64, u32) -> bool,
    ) -> bool {
        if depth >= MAX_BOX_DEPTH {
            self.recovery
                .log_error("BoxDepthExceeded", "box nesting deeper than allowed", None);
            return false;
        }

        let end = offset.saturating_add(size);
        let mut current = offset;
        let mut box_count = 0u32;

        while current < end {
            if box_count >= MAX_BOXES_PER_CONTAINER {
                self.recovery.log_error(
                    "BoxCountExceeded",
                    "too many sibling boxes in one container",
                    None,
                );
                return false;
            }

            let mut header = self.read_box_header(current);
            let remaining = end - current;

            if !self.validate_box_size(&header, remaining) {
                header = self
                    .recovery
                    .recover_corrupted_box(&header, remaining, self.file_size);
                if !self.validate_box_size(&header, remaining) {
                    return false;
                }
            }

            if !handler(self, &header, current - offset, depth + 1) {
                return false;
            }

            current += header.size;
            box_count += 1;
        }

        true
    }

    // ------------------------------------------------------------------
    // Known-box parsers
    // ------------------------------------------------------------------

    /// Parse the `ftyp` box and classify the container variant.
    pub fn parse_file_type_box(&mut self, header: &BoxHeader) -> Option<&'static str> {
        if header.payload_size() < 8 {
            return None;
        }
        let mut brand = [0u8; 4];
        if !self.read_at(header.data_offset, &mut brand) {
            return None;
        }
        let name = match &brand {
            b"isom" | b"iso2" | b"mp41" | b"mp42" => "MP4",
            b"M4A " => "M4A",
            b"M4V " => "M4V",
            b"qt  " => "MOV",
            b"3gp4" | b"3gp5" | b"3gp6" => "3GP",
            b"3g2a" => "3G2",
            _ => "MP4",
        };
        Some(name)
    }

    /// Parse the `moov` payload: movie header, tracks, and user data.
    pub fn parse_movie_box(&mut self, offset: u64, size: u64, depth: u32) -> Option<MovieInfo> {
        let mut movie = MovieInfo::default();

        let ok = self.parse_box_recursively(offset, size, depth, &mut |p, header, _rel, d| {
            match header.box_type {
                BoxType::MVHD => p.parse_movie_header(header, &mut movie),
                BoxType::TRAK => {
                    match p.parse_track_box(header.data_offset, header.payload_size(), d) {
                        Some(track) => movie.tracks.push(track),
                        None => {
                            // A broken or non-audio track does not fail the
                            // movie; it is simply not offered for playback.
                            p.recovery_mut().log_error(
                                "TrackSkipped",
                                "track box did not yield a usable audio track",
                                Some(BoxType::TRAK),
                            );
                        }
                    }
                    true
                }
                BoxType::UDTA => {
                    p.parse_user_data_box(
                        header.data_offset,
                        header.payload_size(),
                        d,
                        &mut movie.metadata,
                    );
                    true
                }
                _ => true,
            }
        });

        ok.then_some(movie)
    }

    fn parse_movie_header(&mut self, header: &BoxHeader, movie: &mut MovieInfo) -> bool {
        let data = header.data_offset;
        let Some(version) = self.read_u8_at(data) else {
            return true;
        };
        if version == 1 {
            if let (Some(timescale), Some(duration)) =
                (self.read_u32_be_at(data + 20), self.read_u64_be_at(data + 24))
            {
                movie.timescale = timescale;
                movie.duration = duration;
            }
        } else if let (Some(timescale), Some(duration)) =
            (self.read_u32_be_at(data + 12), self.read_u32_be_at(data + 16))
        {
            movie.timescale = timescale;
            movie.duration = duration as u64;
        }
        true
    }

    /// Parse a `trak` payload into an audio track, or `None` when the
    /// track is not audio or is too damaged to use.
    pub fn parse_track_box(&mut self, offset: u64, size: u64, depth: u32) -> Option<AudioTrackInfo> {
        let mut track = AudioTrackInfo::default();
        let mut found_audio = false;

        let ok = self.parse_box_recursively(offset, size, depth, &mut |p, header, _rel, d| {
            match header.box_type {
                BoxType::TKHD => {
                    let data = header.data_offset;
                    if let Some(version) = p.read_u8_at(data) {
                        let id_offset = if version == 1 { data + 20 } else { data + 12 };
                        if let Some(id) = p.read_u32_be_at(id_offset) {
                            track.track_id = id;
                        }
                    }
                    true
                }
                BoxType::MDIA => {
                    p.parse_media_box(
                        header.data_offset,
                        header.payload_size(),
                        d,
                        &mut track,
                        &mut found_audio,
                    )
                }
                _ => true,
            }
        });

        (ok && found_audio).then_some(track)
    }

    /// Parse an `mdia` payload: media header, handler, and media info.
    fn parse_media_box(
        &mut self,
        offset: u64,
        size: u64,
        depth: u32,
        track: &mut AudioTrackInfo,
        found_audio: &mut bool,
    ) -> bool {
        let mut handler_type: Option<HandlerType> = None;

        self.parse_box_recursively(offset, size, depth, &mut |p, header, _rel, d| {
            match header.box_type {
                BoxType::MDHD => {
                    let data = header.data_offset;
                    if let Some(version) = p.read_u8_at(data) {
                        if version == 1 {
                            if let (Some(ts), Some(dur)) =
                                (p.read_u32_be_at(data + 20), p.read_u64_be_at(data + 24))
                            {
                                track.timescale = ts;
                                track.duration = dur;
                            }
                        } else if let (Some(ts), Some(dur)) =
                            (p.read_u32_be_at(data + 12), p.read_u32_be_at(data + 16))
                        {
                            track.timescale = ts;
                            track.duration = dur as u64;
                        }
                    }
                    true
                }
                BoxType::HDLR => {
                    // version/flags (4) + pre_defined (4), then the code
                    let mut code = [0u8; 4];
                    if header.payload_size() >= 12 && p.read_at(header.data_offset + 8, &mut code) {
                        handler_type = Some(HandlerType::from_bytes(code));
                    }
                    true
                }
                BoxType::MINF => {
                    if handler_type.map(|h| h.is_audio()) != Some(true) {
                        // Not an audio track; nothing in minf concerns us.
                        return true;
                    }
                    *found_audio = true;
                    p.parse_box_recursively(
                        header.data_offset,
                        header.payload_size(),
                        d,
                        &mut |p, minf_header, _rel, d| match minf_header.box_type {
                            BoxType::STBL => p.parse_sample_table_box(
                                minf_header.data_offset,
                                minf_header.payload_size(),
                                d,
                                track,
                            ),
                            _ => true,
                        },
                    )
                }
                _ => true,
            }
        })
    }

    /// Parse an `stbl` payload: the sample description plus the five
    /// sample tables.
    fn parse_sample_table_box(
        &mut self,
        offset: u64,
        size: u64,
        depth: u32,
        track: &mut AudioTrackInfo,
    ) -> bool {
        let mut tables = SampleTableInfo::default();

        let ok = self.parse_box_recursively(offset, size, depth, &mut |p, header, _rel, d| {
            let data = header.data_offset;
            let payload = header.payload_size();
            match header.box_type {
                BoxType::STSD => p.parse_sample_description_box(header, d, track),
                BoxType::STTS => p.parse_time_to_sample_box(data, payload, &mut tables),
                BoxType::STSC => p.parse_sample_to_chunk_box(data, payload, &mut tables),
                BoxType::STSZ => p.parse_sample_size_box(data, payload, &mut tables),
                BoxType::STCO => p.parse_chunk_offset_box(data, payload, &mut tables, false),
                BoxType::CO64 => p.parse_chunk_offset_box(data, payload, &mut tables, true),
                BoxType::STSS => p.parse_sync_sample_box(data, payload, &mut tables),
                // Composition offsets are irrelevant for audio.
                BoxType::CTTS => true,
                _ => true,
            }
        });

        if ok {
            track.sample_table = tables;
        }
        ok
    }

    /// Parse an `stsd` payload: codec identity, audio parameters, and the
    /// codec configuration child boxes.
    fn parse_sample_description_box(
        &mut self,
        header: &BoxHeader,
        depth: u32,
        track: &mut AudioTrackInfo,
    ) -> bool {
        let data = header.data_offset;
        if header.payload_size() < 16 {
            return false;
        }
        let Some(entry_count) = self.read_u32_be_at(data + 4) else {
            return false;
        };
        if entry_count == 0 {
            return false;
        }

        // Only the first sample description is used; multiple entries are
        // vanishingly rare in audio files.
        let entry_offset = data + 8;
        let (Some(entry_size), Some(fourcc)) = (
            self.read_u32_be_at(entry_offset),
            self.read_u32_be_at(entry_offset + 4),
        ) else {
            return false;
        };
        let entry_size = entry_size as u64;
        let code = BoxType::from_bytes(fourcc.to_be_bytes());
        track.codec = AudioCodec::from_sample_entry(code);

        // Sound sample entry fields, after the 8-byte entry header:
        // reserved(6) + data_reference_index(2), version(2), revision(2),
        // vendor(4), channel_count(2), sample_size(2), compression_id(2),
        // packet_size(2), sample_rate(4, 16.16 fixed point).
        let fields = entry_offset + 8;
        let mut qt_version = 0u16;
        if entry_size >= 36 {
            if let Some(version) = self.read_u16_be_at(fields + 8) {
                qt_version = version;
            }
            if let Some(channels) = self.read_u16_be_at(fields + 16) {
                track.channel_count = channels;
            }
            if let Some(bits) = self.read_u16_be_at(fields + 18) {
                track.bits_per_sample = bits;
            }
            if let Some(rate) = self.read_u32_be_at(fields + 24) {
                track.sample_rate = rate >> 16;
            }
        }

        match track.codec {
            AudioCodec::Ulaw | AudioCodec::Alaw => {
                codec::apply_telephony_defaults(track);
                if !codec::validate_telephony_parameters(track) {
                    self.recovery.log_error(
                        "TelephonyConfig",
                        "inconsistent G.711 parameters",
                        Some(code),
                    );
                    return false;
                }
                return true;
            }
            AudioCodec::Pcm => {
                if let Some(bits) = codec::pcm_bits_for(code) {
                    track.bits_per_sample = bits;
                }
                return true;
            }
            AudioCodec::Unknown(_) => {
                self.recovery
                    .log_error("UnsupportedCodec", "unknown sample entry codec", Some(code));
                return false;
            }
            _ => {}
        }

        // QuickTime version 1/2 sound sample entries carry extra fields
        // before the child boxes.
        let extra = match qt_version {
            1 => 16,
            2 => 36,
            _ => 0,
        };
        let children_start = fields + 28 + extra;
        let entry_end = entry_offset + entry_size;
        if entry_end > children_start + 8 {
            self.parse_box_recursively(
                children_start,
                entry_end - children_start,
                depth,
                &mut |p, child, _rel, d| match child.box_type {
                    BoxType::ESDS => codec::parse_esds_config(p, child, track),
                    BoxType::ALAC => codec::parse_alac_config(p, child, track),
                    BoxType::DFLA => codec::parse_flac_config(p, child, track),
                    // QuickTime wraps the real config in a wave box.
                    BoxType::WAVE => p.parse_box_recursively(
                        child.data_offset,
                        child.payload_size(),
                        d,
                        &mut |p, inner, _rel, _d| match inner.box_type {
                            BoxType::ESDS => codec::parse_esds_config(p, inner, track),
                            BoxType::ALAC => codec::parse_alac_config(p, inner, track),
                            _ => true,
                        },
                    ),
                    _ => true,
                },
            );
        }

        true
    }

    // ------------------------------------------------------------------
    // Sample table sub-parsers. Each reads an entry count and then
    // `count` fixed-size records; counts are checked against
    // MAX_SAMPLES_PER_TRACK before anything is allocated. A zero count
    // is a legal empty table: fragmented files declare empty stbl
    // tables and fill them from moof runs.
    // ------------------------------------------------------------------

    fn parse_time_to_sample_box(
        &mut self,
        offset: u64,
        size: u64,
        tables: &mut SampleTableInfo,
    ) -> bool {
        if size < 8 {
            return false;
        }
        let Some(entry_count) = self.read_u32_be_at(offset + 4) else {
            return false;
        };
        let entry_count = entry_count as u64;
        if entry_count > MAX_SAMPLES_PER_TRACK {
            return self.reject_table_count(BoxType::STTS, entry_count);
        }
        if entry_count == 0 {
            return true;
        }
        if size < 8 + entry_count * 8 {
            return false;
        }

        let mut times = Vec::new();
        let mut current_time = 0u64;
        let mut entry_offset = offset + 8;

        for _ in 0..entry_count {
            let (Some(sample_count), Some(delta)) = (
                self.read_u32_be_at(entry_offset),
                self.read_u32_be_at(entry_offset + 4),
            ) else {
                return false;
            };
            if sample_count == 0 {
                return false;
            }
            if times.len() as u64 + sample_count as u64 > MAX_SAMPLES_PER_TRACK {
                return self.reject_table_count(BoxType::STTS, times.len() as u64);
            }
            times.reserve(sample_count as usize);
            for _ in 0..sample_count {
                times.push(current_time);
                current_time += delta as u64;
            }
            entry_offset += 8;
        }

        tables.sample_times = times;
        true
    }

    fn parse_sample_to_chunk_box(
        &mut self,
        offset: u64,
        size: u64,
        tables: &mut SampleTableInfo,
    ) -> bool {
        if size < 8 {
            return false;
        }
        let Some(entry_count) = self.read_u32_be_at(offset + 4) else {
            return false;
        };
        let entry_count = entry_count as u64;
        if entry_count > MAX_SAMPLES_PER_TRACK {
            return self.reject_table_count(BoxType::STSC, entry_count);
        }
        if entry_count == 0 {
            return true;
        }
        if size < 8 + entry_count * 12 {
            return false;
        }

        let mut entries = Vec::with_capacity(entry_count as usize);
        let mut entry_offset = offset + 8;

        for _ in 0..entry_count {
            let (Some(first_chunk), Some(samples_per_chunk), Some(sample_desc_index)) = (
                self.read_u32_be_at(entry_offset),
                self.read_u32_be_at(entry_offset + 4),
                self.read_u32_be_at(entry_offset + 8),
            ) else {
                return false;
            };
            if first_chunk == 0 || samples_per_chunk == 0 || sample_desc_index == 0 {
                return false;
            }
            entries.push(SampleToChunkEntry {
                first_chunk: first_chunk - 1,
                samples_per_chunk,
                sample_desc_index,
            });
            entry_offset += 12;
        }

        tables.sample_to_chunk = entries;
        true
    }

    fn parse_sample_size_box(
        &mut self,
        offset: u64,
        size: u64,
        tables: &mut SampleTableInfo,
    ) -> bool {
        if size < 12 {
            return false;
        }
        let (Some(uniform_size), Some(sample_count)) = (
            self.read_u32_be_at(offset + 4),
            self.read_u32_be_at(offset + 8),
        ) else {
            return false;
        };
        let sample_count = sample_count as u64;
        if sample_count > MAX_SAMPLES_PER_TRACK {
            return self.reject_table_count(BoxType::STSZ, sample_count);
        }
        if sample_count == 0 {
            return true;
        }

        if uniform_size != 0 {
            tables.sample_sizes = SampleSizes::Uniform {
                size: uniform_size,
                count: sample_count,
            };
            return true;
        }

        if size < 12 + sample_count * 4 {
            return false;
        }
        let mut sizes = Vec::with_capacity(sample_count as usize);
        let mut entry_offset = offset + 12;
        for _ in 0..sample_count {
            let Some(sample_size) = self.read_u32_be_at(entry_offset) else {
                return false;
            };
            sizes.push(sample_size);
            entry_offset += 4;
        }
        tables.sample_sizes = SampleSizes::PerSample(sizes);
        true
    }

    fn parse_chunk_offset_box(
        &mut self,
        offset: u64,
        size: u64,
        tables: &mut SampleTableInfo,
        is_64bit: bool,
    ) -> bool {
        if size < 8 {
            return false;
        }
        let Some(entry_count) = self.read_u32_be_at(offset + 4) else {
            return false;
        };
        let entry_count = entry_count as u64;
        let box_type = if is_64bit { BoxType::CO64 } else { BoxType::STCO };
        if entry_count > MAX_SAMPLES_PER_TRACK {
            return self.reject_table_count(box_type, entry_count);
        }
        if entry_count == 0 {
            return true;
        }
        let entry_size = if is_64bit { 8 } else { 4 };
        if size < 8 + entry_count * entry_size {
            return false;
        }

        let mut offsets = Vec::with_capacity(entry_count as usize);
        let mut entry_offset = offset + 8;
        for _ in 0..entry_count {
            let chunk_offset = if is_64bit {
                match self.read_u64_be_at(entry_offset) {
                    Some(v) => v,
                    None => return false,
                }
            } else {
                match self.read_u32_be_at(entry_offset) {
                    Some(v) => v as u64,
                    None => return false,
                }
            };
            if chunk_offset >= self.file_size {
                self.recovery.log_error(
                    "ChunkOffsetOutOfRange",
                    "chunk offset beyond end of file",
                    Some(box_type),
                );
                return false;
            }
            offsets.push(chunk_offset);
            entry_offset += entry_size;
        }

        tables.chunk_offsets = offsets;
        true
    }

    fn parse_sync_sample_box(
        &mut self,
        offset: u64,
        size: u64,
        tables: &mut SampleTableInfo,
    ) -> bool {
        if size < 8 {
            return false;
        }
        let Some(entry_count) = self.read_u32_be_at(offset + 4) else {
            return false;
        };
        let entry_count = entry_count as u64;
        if entry_count == 0 {
            // No sync table entries: every sample is a sync point.
            return true;
        }
        if entry_count > MAX_SAMPLES_PER_TRACK {
            return self.reject_table_count(BoxType::STSS, entry_count);
        }
        if size < 8 + entry_count * 4 {
            return false;
        }

        let mut sync = Vec::with_capacity(entry_count as usize);
        let mut entry_offset = offset + 8;
        for _ in 0..entry_count {
            let Some(sample_number) = self.read_u32_be_at(entry_offset) else {
                return false;
            };
            if sample_number == 0 {
                return false;
            }
            sync.push(sample_number as u64 - 1);
            entry_offset += 4;
        }
        sync.sort_unstable();
        sync.dedup();

        tables.sync_samples = sync;
        true
    }

    fn reject_table_count(&mut self, box_type: BoxType, count: u64) -> bool {
        self.recovery.log_error(
            "SampleCountRejected",
            &format!("table declares {count} entries"),
            Some(box_type),
        );
        false
    }
}
