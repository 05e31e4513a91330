//! Error recovery for the box parser.
//!
//! Untrusted containers arrive truncated, mis-sized, or with sample
//! tables that disagree with each other. This module owns every repair
//! decision: corrupted headers get a bounded size estimate, inconsistent
//! sample tables get reconciled or rejected, missing codec configuration
//! gets inferred from raw sample bytes, and transient I/O failures get
//! retried with backoff.
//!
//! A [`RecoveryContext`] is created per logical parse and threaded
//! through the call chain, so concurrent parses never share error
//! statistics. Every repair is opt-in and bounded; a failed repair
//! surfaces as an ordinary parse failure, never as silently corrupted
//! sample data.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::iso::boxes::{AudioCodec, AudioTrackInfo, BoxHeader, BoxType};
use crate::iso::codec::AAC_SAMPLE_RATES;
use crate::iso::sample_table::{SampleSizes, SampleTableInfo};

/// Smallest size any real box can have.
const MIN_VALID_BOX_SIZE: u64 = 8;

/// Sizes above this are treated as corruption during recovery.
const MAX_REASONABLE_BOX_SIZE: u64 = 1024 * 1024 * 1024;

/// Cap on table repair passes per context.
const MAX_REPAIR_ATTEMPTS: u32 = 3;

/// Base delay for I/O retry backoff.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Backoff multiplier between I/O retry attempts.
const BACKOFF_MULTIPLIER: u32 = 2;

/// Per-parse error recovery state and statistics.
#[derive(Debug, Default)]
pub struct RecoveryContext {
    stats: BTreeMap<String, u64>,
    repair_attempts: u32,
}

impl RecoveryContext {
    /// Create a fresh context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error occurrence and emit a diagnostic event.
    ///
    /// Purely additive: statistics never influence control flow.
    pub fn log_error(&mut self, kind: &str, message: &str, box_type: Option<BoxType>) {
        *self.stats.entry(kind.to_string()).or_insert(0) += 1;
        match box_type {
            Some(bt) => tracing::warn!(kind, box_type = %bt, "{message}"),
            None => tracing::warn!(kind, "{message}"),
        }
    }

    /// Error-kind occurrence counts accumulated so far.
    pub fn error_stats(&self) -> &BTreeMap<String, u64> {
        &self.stats
    }

    /// Clear accumulated statistics.
    pub fn reset_error_stats(&mut self) {
        self.stats.clear();
    }

    // ------------------------------------------------------------------
    // Corrupted box headers
    // ------------------------------------------------------------------

    /// Attempt to produce a usable header from one that failed
    /// validation.
    ///
    /// Unknown (non-fourcc) types are unrecoverable and yield an empty
    /// header. Known types get a per-type size estimate, clamped so the
    /// result never claims more bytes than the container or the file
    /// permits.
    pub fn recover_corrupted_box(
        &mut self,
        header: &BoxHeader,
        container_size: u64,
        file_size: u64,
    ) -> BoxHeader {
        self.log_error(
            "CorruptedBox",
            &format!("box size {} failed validation", header.size),
            Some(header.box_type),
        );

        if !is_known_box_type(header.box_type) {
            return BoxHeader::invalid();
        }

        let mut recovered = *header;

        if recovered.size < MIN_VALID_BOX_SIZE || recovered.size > MAX_REASONABLE_BOX_SIZE {
            let estimate = estimate_reasonable_box_size(header.box_type, container_size);
            if estimate >= MIN_VALID_BOX_SIZE && estimate <= container_size {
                self.log_error(
                    "BoxSizeRecovered",
                    &format!("size {} replaced with estimate {estimate}", header.size),
                    Some(header.box_type),
                );
                recovered.size = estimate;
            } else {
                self.log_error(
                    "BoxSizeFallback",
                    &format!("using container size {container_size} for corrupted box"),
                    Some(header.box_type),
                );
                recovered.size = container_size;
            }
        } else if recovered.size > container_size {
            // In-range size that overruns its container: truncate.
            self.log_error(
                "BoxSizeTruncated",
                &format!("size {} truncated to container {container_size}", header.size),
                Some(header.box_type),
            );
            recovered.size = container_size;
        }

        let start = recovered.start_offset();
        if start + recovered.size > file_size {
            recovered.size = file_size.saturating_sub(start);
        }
        if recovered.size < MIN_VALID_BOX_SIZE {
            return BoxHeader::invalid();
        }
        recovered
    }

    // ------------------------------------------------------------------
    // Sample table reconciliation
    // ------------------------------------------------------------------

    /// Cross-check the sample counts implied by the sub-tables and
    /// reconcile a single outlier against the majority.
    ///
    /// Returns `false` when the tables are too inconsistent to
    /// reconcile; the caller must treat the track as undecodable rather
    /// than guess at sample locations.
    pub fn repair_sample_tables(&mut self, tables: &mut SampleTableInfo) -> bool {
        if tables.is_incomplete() {
            self.log_error("SampleTableMissing", "required sample table absent", None);
            return false;
        }

        // Sync samples are an index subset, not a count source; entries
        // past the end of the timeline are dropped up front.
        let count_from_times = tables.sample_times.len() as u64;
        if let Some(&max_sync) = tables.sync_samples.last() {
            if max_sync >= count_from_times {
                self.log_error(
                    "SyncSamplesTruncated",
                    "sync entries beyond sample count dropped",
                    Some(BoxType::STSS),
                );
                tables.sync_samples.retain(|&s| s < count_from_times);
            }
        }

        let count_from_sizes = tables.sample_sizes.count();
        let count_from_chunks = tables.count_from_chunks();

        if count_from_times == count_from_sizes && count_from_sizes == count_from_chunks {
            return true;
        }

        // Consistent tables cost nothing; actual repairs draw on a
        // bounded budget.
        if self.repair_attempts >= MAX_REPAIR_ATTEMPTS {
            self.log_error("RepairBudgetExhausted", "too many repair attempts", None);
            return false;
        }
        self.repair_attempts += 1;

        // Majority rule: exactly one table may disagree.
        let target = if count_from_times == count_from_sizes {
            count_from_times
        } else if count_from_times == count_from_chunks {
            count_from_times
        } else if count_from_sizes == count_from_chunks {
            count_from_sizes
        } else {
            self.log_error(
                "SampleTablesInconsistent",
                &format!(
                    "counts disagree: {count_from_times} times, {count_from_sizes} sizes, \
                     {count_from_chunks} chunks"
                ),
                None,
            );
            return false;
        };

        if count_from_times != target && !self.resize_time_table(tables, target) {
            return false;
        }
        if count_from_sizes != target && !self.resize_size_table(tables, target) {
            return false;
        }
        if count_from_chunks != target && !self.resize_chunk_tables(tables, target) {
            return false;
        }

        tables.sync_samples.retain(|&s| s < target);
        true
    }

    fn resize_time_table(&mut self, tables: &mut SampleTableInfo, target: u64) -> bool {
        let current = tables.sample_times.len() as u64;
        if current > target {
            tables.sample_times.truncate(target as usize);
        } else {
            // Extend with the last observed delta.
            let (mut last, delta) = match tables.sample_times.len() {
                0 => return false,
                1 => (tables.sample_times[0], 1),
                n => {
                    let last = tables.sample_times[n - 1];
                    (last, last.saturating_sub(tables.sample_times[n - 2]).max(1))
                }
            };
            for _ in current..target {
                last += delta;
                tables.sample_times.push(last);
            }
        }
        self.log_error(
            "TimeTableResized",
            &format!("time table adjusted from {current} to {target} samples"),
            Some(BoxType::STTS),
        );
        true
    }

    fn resize_size_table(&mut self, tables: &mut SampleTableInfo, target: u64) -> bool {
        let current = tables.sample_sizes.count();
        match &mut tables.sample_sizes {
            SampleSizes::Uniform { count, .. } => *count = target,
            SampleSizes::PerSample(sizes) => {
                if current > target {
                    sizes.truncate(target as usize);
                } else {
                    let pad = sizes.last().copied().unwrap_or(0);
                    if pad == 0 {
                        return false;
                    }
                    sizes.resize(target as usize, pad);
                }
            }
        }
        self.log_error(
            "SizeTableResized",
            &format!("size table adjusted from {current} to {target} samples"),
            Some(BoxType::STSZ),
        );
        true
    }

    fn resize_chunk_tables(&mut self, tables: &mut SampleTableInfo, target: u64) -> bool {
        let current = tables.count_from_chunks();
        if current < target {
            // Offsets for the missing chunks cannot be invented.
            self.log_error(
                "ChunkTableShort",
                "chunk tables cover fewer samples than the majority",
                Some(BoxType::STSC),
            );
            return false;
        }
        // Drop trailing chunks until the implied count fits.
        while tables.count_from_chunks() > target && tables.chunk_offsets.len() > 1 {
            tables.chunk_offsets.pop();
        }
        if tables.count_from_chunks() < target {
            return false;
        }
        self.log_error(
            "ChunkTableResized",
            &format!("chunk tables adjusted from {current} to {target} samples"),
            Some(BoxType::STCO),
        );
        true
    }

    // ------------------------------------------------------------------
    // Codec configuration inference
    // ------------------------------------------------------------------

    /// Reconstruct minimally sufficient codec configuration when the
    /// configuration atom was missing or rejected.
    ///
    /// Best-effort by design: signatures in the first sample bytes gate
    /// each path, and nothing is fabricated that was not observed in the
    /// container or the bytes themselves.
    pub fn infer_codec_config(&mut self, track: &mut AudioTrackInfo, sample_bytes: &[u8]) -> bool {
        if !track.codec.needs_codec_config() {
            return match track.codec {
                AudioCodec::Ulaw | AudioCodec::Alaw => {
                    crate::iso::codec::apply_telephony_defaults(track);
                    true
                }
                AudioCodec::Pcm => self.infer_pcm_config(track),
                _ => false,
            };
        }
        if !track.codec_config.is_empty() {
            return true;
        }
        if sample_bytes.is_empty() {
            self.log_error("CodecInference", "no sample bytes to analyze", None);
            return false;
        }

        match track.codec {
            AudioCodec::Aac => self.infer_aac_config(track, sample_bytes),
            AudioCodec::Alac => self.infer_alac_config(track),
            _ => {
                self.log_error("CodecInference", "codec not inferable", None);
                false
            }
        }
    }

    /// Build an AudioSpecificConfig for an AAC track whose esds was
    /// missing, gated on the ADTS sync pattern in the sample bytes.
    fn infer_aac_config(&mut self, track: &mut AudioTrackInfo, sample_bytes: &[u8]) -> bool {
        // ADTS frames start with a 12-bit sync of all ones.
        let has_adts_sync = sample_bytes.len() >= 2
            && sample_bytes[0] == 0xFF
            && (sample_bytes[1] & 0xF0) == 0xF0;
        if !has_adts_sync {
            self.log_error("AacInference", "no ADTS sync pattern in sample data", None);
            return false;
        }
        if track.sample_rate == 0 || track.channel_count == 0 {
            // The rate and channel count were never observed; fabricating
            // them would corrupt playback, so fail instead.
            self.log_error(
                "AacInference",
                "sample rate or channel count unobserved",
                None,
            );
            return false;
        }

        let freq_index = AAC_SAMPLE_RATES
            .iter()
            .position(|&r| r == track.sample_rate)
            .unwrap_or(15) as u16;
        // Object type 2 (AAC-LC) | frequency index | channel config.
        let bits: u16 = (2 << 11) | (freq_index << 7) | ((track.channel_count & 0x0F) << 3);
        let mut config = vec![(bits >> 8) as u8, bits as u8];
        if freq_index == 15 {
            // Escape value carries the literal 24-bit rate.
            config.push((track.sample_rate >> 16) as u8);
            config.push((track.sample_rate >> 8) as u8);
            config.push(track.sample_rate as u8);
        }
        track.codec_config = config;
        self.log_error("AacInference", "synthesized AudioSpecificConfig", None);
        true
    }

    /// Build a minimal ALAC magic cookie from observed parameters.
    fn infer_alac_config(&mut self, track: &mut AudioTrackInfo) -> bool {
        if track.sample_rate == 0 || track.channel_count == 0 || track.bits_per_sample == 0 {
            self.log_error("AlacInference", "track parameters unobserved", None);
            return false;
        }

        let mut cookie = [0u8; 24];
        cookie[0..4].copy_from_slice(&4096u32.to_be_bytes()); // frame length
        cookie[5] = track.bits_per_sample as u8;
        cookie[6] = 40; // pb
        cookie[7] = 10; // mb
        cookie[8] = 14; // kb
        cookie[9] = track.channel_count as u8;
        cookie[10..12].copy_from_slice(&255u16.to_be_bytes()); // max run
        cookie[20..24].copy_from_slice(&track.sample_rate.to_be_bytes());
        track.codec_config = cookie.to_vec();
        self.log_error("AlacInference", "synthesized ALAC magic cookie", None);
        true
    }

    /// PCM needs no configuration bytes, only self-consistent parameters.
    fn infer_pcm_config(&mut self, track: &mut AudioTrackInfo) -> bool {
        if track.sample_rate == 0 || track.channel_count == 0 || track.bits_per_sample == 0 {
            self.log_error("PcmInference", "PCM parameters unobserved", None);
            return false;
        }
        matches!(track.bits_per_sample, 8 | 16 | 24 | 32 | 64)
    }

    // ------------------------------------------------------------------
    // Transient I/O retry
    // ------------------------------------------------------------------

    /// Re-invoke `operation` up to `max_retries` times with exponential
    /// backoff between attempts. For transient I/O failures only;
    /// structural failures must not be routed through here.
    pub fn retry_io<F: FnMut() -> bool>(&mut self, mut operation: F, max_retries: u32) -> bool {
        for attempt in 0..max_retries {
            if operation() {
                return true;
            }
            self.log_error(
                "IoRetry",
                &format!("attempt {} of {max_retries} failed", attempt + 1),
                None,
            );
            if attempt + 1 < max_retries {
                let delay = RETRY_BASE_DELAY * BACKOFF_MULTIPLIER.pow(attempt);
                std::thread::sleep(delay);
            }
        }
        self.log_error(
            "IoRetryExhausted",
            &format!("operation failed after {max_retries} attempts"),
            None,
        );
        false
    }
}

/// Estimate a reasonable size for a known box type, used when the
/// declared size is garbage.
fn estimate_reasonable_box_size(box_type: BoxType, container_size: u64) -> u64 {
    let estimate = match box_type {
        BoxType::FTYP => 32,
        BoxType::MOOV => 10 * 1024 * 1024,
        BoxType::MDAT => container_size,
        BoxType::TRAK | BoxType::STBL => 1024 * 1024,
        BoxType::STSD => 1024,
        BoxType::STTS | BoxType::STSC | BoxType::STSZ | BoxType::STCO | BoxType::CO64 => 100 * 1024,
        _ => 4096,
    };
    estimate.min(container_size)
}

/// Whether a box type is one this demuxer knows, or at least looks like
/// a plausible fourcc. Garbage bytes rarely form printable ASCII.
fn is_known_box_type(box_type: BoxType) -> bool {
    matches!(
        box_type,
        BoxType::FTYP
            | BoxType::MOOV
            | BoxType::MDAT
            | BoxType::FREE
            | BoxType::SKIP
            | BoxType::WIDE
            | BoxType::MVHD
            | BoxType::TRAK
            | BoxType::UDTA
            | BoxType::META
            | BoxType::IODS
            | BoxType::TKHD
            | BoxType::TREF
            | BoxType::EDTS
            | BoxType::ELST
            | BoxType::MDIA
            | BoxType::MDHD
            | BoxType::HDLR
            | BoxType::MINF
            | BoxType::SMHD
            | BoxType::VMHD
            | BoxType::DINF
            | BoxType::STBL
            | BoxType::STSD
            | BoxType::STTS
            | BoxType::CTTS
            | BoxType::STSC
            | BoxType::STSZ
            | BoxType::STZ2
            | BoxType::STCO
            | BoxType::CO64
            | BoxType::STSS
            | BoxType::MOOF
            | BoxType::MFHD
            | BoxType::TRAF
            | BoxType::TFHD
            | BoxType::TFDT
            | BoxType::TRUN
            | BoxType::MFRA
            | BoxType::SIDX
            | BoxType::ILST
            | BoxType::DATA
    ) || box_type.is_printable()
}
