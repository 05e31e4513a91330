//! Movie fragment parsing.
//!
//! Fragmented files carry their sample tables incrementally: each `moof`
//! box holds per-track runs (`trun`) whose fields fall back to defaults
//! declared in the track fragment header (`tfhd`). Parsed fragments are
//! folded back into the same [`SampleTableInfo`] the non-fragmented path
//! produces, so extraction and seeking work identically for both
//! layouts.

use crate::io::ByteSource;
use crate::iso::boxes::{BoxHeader, BoxType};
use crate::iso::parser::{BoxParser, MAX_SAMPLES_PER_TRACK};
use crate::iso::sample_table::{SampleSizes, SampleTableInfo, SampleToChunkEntry};

// tfhd flags
const TFHD_BASE_DATA_OFFSET: u32 = 0x01;
const TFHD_SAMPLE_DESC_INDEX: u32 = 0x02;
const TFHD_DEFAULT_DURATION: u32 = 0x08;
const TFHD_DEFAULT_SIZE: u32 = 0x10;
const TFHD_DEFAULT_FLAGS: u32 = 0x20;
const TFHD_DEFAULT_BASE_IS_MOOF: u32 = 0x2_0000;

// trun flags
const TRUN_DATA_OFFSET: u32 = 0x01;
const TRUN_FIRST_SAMPLE_FLAGS: u32 = 0x04;
const TRUN_SAMPLE_DURATION: u32 = 0x100;
const TRUN_SAMPLE_SIZE: u32 = 0x200;
const TRUN_SAMPLE_FLAGS: u32 = 0x400;
const TRUN_SAMPLE_CTS: u32 = 0x800;

/// One `trun` box: a contiguous run of samples.
#[derive(Debug, Clone, Default)]
pub struct TrackRunInfo {
    /// Number of samples in the run.
    pub sample_count: u32,
    /// Offset of the first sample relative to the fragment base, when
    /// the run declares one.
    pub data_offset: Option<i32>,
    /// Overriding flags for the first sample (sync marking).
    pub first_sample_flags: Option<u32>,
    /// Per-sample durations; empty when the tfhd default applies.
    pub sample_durations: Vec<u32>,
    /// Per-sample sizes; empty when the tfhd default applies.
    pub sample_sizes: Vec<u32>,
}

/// One `traf` box: the runs and defaults for a single track.
#[derive(Debug, Clone, Default)]
pub struct TrackFragmentInfo {
    /// Track this fragment extends.
    pub track_id: u32,
    /// Absolute base offset for run data, when declared.
    pub base_data_offset: Option<u64>,
    /// Whether run offsets are relative to the enclosing moof.
    pub base_is_moof: bool,
    /// Default per-sample duration from tfhd.
    pub default_sample_duration: Option<u32>,
    /// Default per-sample size from tfhd.
    pub default_sample_size: Option<u32>,
    /// Decode time of the first sample (`tfdt`).
    pub decode_time: Option<u64>,
    /// Sample runs in file order.
    pub runs: Vec<TrackRunInfo>,
}

impl TrackFragmentInfo {
    /// Total samples across all runs.
    pub fn sample_count(&self) -> u64 {
        self.runs.iter().map(|r| r.sample_count as u64).sum()
    }

    /// Total duration of the fragment in track timescale units.
    pub fn total_duration(&self) -> u64 {
        let default = self.default_sample_duration.unwrap_or(0) as u64;
        self.runs
            .iter()
            .map(|run| {
                if run.sample_durations.is_empty() {
                    run.sample_count as u64 * default
                } else {
                    run.sample_durations.iter().map(|&d| d as u64).sum()
                }
            })
            .sum()
    }
}

/// One parsed `moof` box.
#[derive(Debug, Clone, Default)]
pub struct MovieFragmentInfo {
    /// Sequence number from `mfhd`.
    pub sequence_number: u32,
    /// File offset of the moof box itself.
    pub offset: u64,
    /// Per-track fragments.
    pub track_fragments: Vec<TrackFragmentInfo>,
}

impl MovieFragmentInfo {
    /// Fold this fragment's runs for `track_id` into `tables`,
    /// continuing the track's existing timeline. Each run becomes one
    /// chunk. Returns false when the addition would blow the per-track
    /// sample ceiling.
    pub fn extend_sample_tables(&self, track_id: u32, tables: &mut SampleTableInfo) -> bool {
        let Some(traf) = self.track_fragments.iter().find(|t| t.track_id == track_id) else {
            return true;
        };
        if tables.sample_count() + traf.sample_count() > MAX_SAMPLES_PER_TRACK {
            return false;
        }

        // Promote a uniform size table so per-run sizes can be appended.
        if let SampleSizes::Uniform { size, count } = tables.sample_sizes {
            tables.sample_sizes = SampleSizes::PerSample(vec![size; count as usize]);
        }

        let base = traf.base_data_offset.unwrap_or(self.offset);
        let mut next_time = traf.decode_time.unwrap_or_else(|| tables.duration());
        let mut run_start = base;

        for run in &traf.runs {
            let run_base = match run.data_offset {
                Some(rel) => base.wrapping_add_signed(rel as i64),
                None => run_start,
            };

            let chunk_index = tables.chunk_offsets.len() as u32;
            tables.chunk_offsets.push(run_base);
            tables.sample_to_chunk.push(SampleToChunkEntry {
                first_chunk: chunk_index,
                samples_per_chunk: run.sample_count,
                sample_desc_index: 1,
            });

            let mut run_bytes = 0u64;
            for i in 0..run.sample_count as usize {
                let duration = run
                    .sample_durations
                    .get(i)
                    .copied()
                    .or(traf.default_sample_duration)
                    .unwrap_or(0);
                let size = run
                    .sample_sizes
                    .get(i)
                    .copied()
                    .or(traf.default_sample_size)
                    .unwrap_or(0);

                let sample_index = tables.sample_times.len() as u64;
                tables.sample_times.push(next_time);
                if let SampleSizes::PerSample(sizes) = &mut tables.sample_sizes {
                    sizes.push(size);
                }
                if !tables.sync_samples.is_empty() || run.first_sample_flags.is_some() {
                    // With explicit sync marking in play, only the marked
                    // first sample of a run is a seek target.
                    if i == 0 && run.first_sample_flags.is_some() {
                        tables.sync_samples.push(sample_index);
                    }
                }

                next_time += duration as u64;
                run_bytes += size as u64;
            }
            run_start = run_base + run_bytes;
        }

        true
    }
}

impl<S: ByteSource> BoxParser<S> {
    /// Parse a `moof` box into a [`MovieFragmentInfo`].
    pub fn parse_movie_fragment(&mut self, header: &BoxHeader, depth: u32) -> Option<MovieFragmentInfo> {
        let mut fragment = MovieFragmentInfo {
            offset: header.start_offset(),
            ..Default::default()
        };

        let ok = self.parse_box_recursively(
            header.data_offset,
            header.payload_size(),
            depth,
            &mut |p, child, _rel, d| match child.box_type {
                BoxType::MFHD => {
                    if let Some(seq) = p.read_u32_be_at(child.data_offset + 4) {
                        fragment.sequence_number = seq;
                    }
                    true
                }
                BoxType::TRAF => {
                    match p.parse_track_fragment(child, d) {
                        Some(traf) => fragment.track_fragments.push(traf),
                        None => {
                            p.recovery_mut().log_error(
                                "FragmentSkipped",
                                "track fragment could not be parsed",
                                Some(BoxType::TRAF),
                            );
                        }
                    }
                    true
                }
                _ => true,
            },
        );

        ok.then_some(fragment)
    }

    fn parse_track_fragment(&mut self, header: &BoxHeader, depth: u32) -> Option<TrackFragmentInfo> {
        let mut traf = TrackFragmentInfo::default();

        let ok = self.parse_box_recursively(
            header.data_offset,
            header.payload_size(),
            depth,
            &mut |p, child, _rel, _d| match child.box_type {
                BoxType::TFHD => p.parse_track_fragment_header(child, &mut traf),
                BoxType::TFDT => {
                    let data = child.data_offset;
                    if let Some(version) = p.read_u8_at(data) {
                        traf.decode_time = if version == 1 {
                            p.read_u64_be_at(data + 4)
                        } else {
                            p.read_u32_be_at(data + 4).map(u64::from)
                        };
                    }
                    true
                }
                BoxType::TRUN => match p.parse_track_run(child) {
                    Some(run) => {
                        traf.runs.push(run);
                        true
                    }
                    None => false,
                },
                _ => true,
            },
        );

        (ok && traf.track_id != 0).then_some(traf)
    }

    fn parse_track_fragment_header(
        &mut self,
        header: &BoxHeader,
        traf: &mut TrackFragmentInfo,
    ) -> bool {
        let data = header.data_offset;
        let Some(version_flags) = self.read_u32_be_at(data) else {
            return false;
        };
        let flags = version_flags & 0x00FF_FFFF;
        let Some(track_id) = self.read_u32_be_at(data + 4) else {
            return false;
        };
        traf.track_id = track_id;
        traf.base_is_moof = flags & TFHD_DEFAULT_BASE_IS_MOOF != 0;

        let mut cursor = data + 8;
        if flags & TFHD_BASE_DATA_OFFSET != 0 {
            traf.base_data_offset = self.read_u64_be_at(cursor);
            cursor += 8;
        }
        if flags & TFHD_SAMPLE_DESC_INDEX != 0 {
            cursor += 4;
        }
        if flags & TFHD_DEFAULT_DURATION != 0 {
            traf.default_sample_duration = self.read_u32_be_at(cursor);
            cursor += 4;
        }
        if flags & TFHD_DEFAULT_SIZE != 0 {
            traf.default_sample_size = self.read_u32_be_at(cursor);
            cursor += 4;
        }
        if flags & TFHD_DEFAULT_FLAGS != 0 {
            // default sample flags are not needed; sync marking comes
            // from the runs
            let _ = self.read_u32_be_at(cursor);
        }
        true
    }

    fn parse_track_run(&mut self, header: &BoxHeader) -> Option<TrackRunInfo> {
        let data = header.data_offset;
        let version_flags = self.read_u32_be_at(data)?;
        let flags = version_flags & 0x00FF_FFFF;
        let sample_count = self.read_u32_be_at(data + 4)?;
        if sample_count as u64 > MAX_SAMPLES_PER_TRACK {
            self.recovery_mut().log_error(
                "SampleCountRejected",
                &format!("track run declares {sample_count} samples"),
                Some(BoxType::TRUN),
            );
            return None;
        }

        let mut run = TrackRunInfo {
            sample_count,
            ..Default::default()
        };
        let mut cursor = data + 8;

        if flags & TRUN_DATA_OFFSET != 0 {
            run.data_offset = self.read_u32_be_at(cursor).map(|v| v as i32);
            cursor += 4;
        }
        if flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
            run.first_sample_flags = self.read_u32_be_at(cursor);
            cursor += 4;
        }

        let per_sample_fields = [
            flags & TRUN_SAMPLE_DURATION != 0,
            flags & TRUN_SAMPLE_SIZE != 0,
            flags & TRUN_SAMPLE_FLAGS != 0,
            flags & TRUN_SAMPLE_CTS != 0,
        ];
        let record_len: u64 = per_sample_fields.iter().filter(|&&f| f).count() as u64 * 4;
        if record_len > 0 && header.payload_size() < (cursor - data) + sample_count as u64 * record_len
        {
            return None;
        }

        if per_sample_fields.iter().any(|&f| f) {
            run.sample_durations
                .reserve(if per_sample_fields[0] { sample_count as usize } else { 0 });
            run.sample_sizes
                .reserve(if per_sample_fields[1] { sample_count as usize } else { 0 });
            for _ in 0..sample_count {
                if per_sample_fields[0] {
                    run.sample_durations.push(self.read_u32_be_at(cursor)?);
                    cursor += 4;
                }
                if per_sample_fields[1] {
                    run.sample_sizes.push(self.read_u32_be_at(cursor)?);
                    cursor += 4;
                }
                if per_sample_fields[2] {
                    cursor += 4;
                }
                if per_sample_fields[3] {
                    cursor += 4;
                }
            }
        }

        Some(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemorySource;

    fn boxed(box_type: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(8 + payload.len() as u32).to_be_bytes());
        out.extend_from_slice(box_type);
        out.extend_from_slice(payload);
        out
    }

    fn build_moof() -> Vec<u8> {
        // mfhd: version/flags + sequence number 7
        let mut mfhd = vec![0u8; 4];
        mfhd.extend_from_slice(&7u32.to_be_bytes());

        // tfhd: default duration + default size for track 3
        let mut tfhd = Vec::new();
        tfhd.extend_from_slice(&(TFHD_DEFAULT_DURATION | TFHD_DEFAULT_SIZE).to_be_bytes());
        tfhd.extend_from_slice(&3u32.to_be_bytes());
        tfhd.extend_from_slice(&1024u32.to_be_bytes()); // duration
        tfhd.extend_from_slice(&200u32.to_be_bytes()); // size

        // tfdt: version 0, decode time 4096
        let mut tfdt = vec![0u8; 4];
        tfdt.extend_from_slice(&4096u32.to_be_bytes());

        // trun: 3 samples, explicit sizes, data offset 64
        let mut trun = Vec::new();
        trun.extend_from_slice(&(TRUN_DATA_OFFSET | TRUN_SAMPLE_SIZE).to_be_bytes());
        trun.extend_from_slice(&3u32.to_be_bytes());
        trun.extend_from_slice(&64u32.to_be_bytes());
        for size in [100u32, 150, 50] {
            trun.extend_from_slice(&size.to_be_bytes());
        }

        let mut traf_payload = boxed(b"tfhd", &tfhd);
        traf_payload.extend_from_slice(&boxed(b"tfdt", &tfdt));
        traf_payload.extend_from_slice(&boxed(b"trun", &trun));

        let mut moof_payload = boxed(b"mfhd", &mfhd);
        moof_payload.extend_from_slice(&boxed(b"traf", &traf_payload));
        boxed(b"moof", &moof_payload)
    }

    #[test]
    fn test_parse_moof_with_defaults() {
        let mut data = build_moof();
        data.resize(data.len() + 600, 0);
        let mut p = BoxParser::new(MemorySource::new(data));
        let header = p.read_box_header(0);
        assert_eq!(header.box_type, BoxType::MOOF);

        let fragment = p.parse_movie_fragment(&header, 1).unwrap();
        assert_eq!(fragment.sequence_number, 7);
        assert_eq!(fragment.offset, 0);
        assert_eq!(fragment.track_fragments.len(), 1);

        let traf = &fragment.track_fragments[0];
        assert_eq!(traf.track_id, 3);
        assert_eq!(traf.default_sample_duration, Some(1024));
        assert_eq!(traf.default_sample_size, Some(200));
        assert_eq!(traf.decode_time, Some(4096));
        assert_eq!(traf.sample_count(), 3);
        // Per-run durations absent, default applies
        assert_eq!(traf.total_duration(), 3 * 1024);

        let run = &traf.runs[0];
        assert_eq!(run.data_offset, Some(64));
        assert_eq!(run.sample_sizes, vec![100, 150, 50]);
        assert!(run.sample_durations.is_empty());
    }

    #[test]
    fn test_extend_sample_tables_from_fragment() {
        let mut data = build_moof();
        data.resize(data.len() + 600, 0);
        let mut p = BoxParser::new(MemorySource::new(data));
        let header = p.read_box_header(0);
        let fragment = p.parse_movie_fragment(&header, 1).unwrap();

        let mut tables = SampleTableInfo::default();
        assert!(fragment.extend_sample_tables(3, &mut tables));

        assert_eq!(tables.sample_count(), 3);
        assert_eq!(tables.sample_times, vec![4096, 4096 + 1024, 4096 + 2048]);
        // Run base = moof offset (0) + data offset 64
        let loc0 = tables.locate(0).unwrap();
        assert_eq!(loc0.offset, 64);
        assert_eq!(loc0.size, 100);
        let loc2 = tables.locate(2).unwrap();
        assert_eq!(loc2.offset, 64 + 100 + 150);
        assert_eq!(loc2.size, 50);
    }

    #[test]
    fn test_extend_ignores_other_tracks() {
        let mut data = build_moof();
        data.resize(data.len() + 600, 0);
        let mut p = BoxParser::new(MemorySource::new(data));
        let header = p.read_box_header(0);
        let fragment = p.parse_movie_fragment(&header, 1).unwrap();

        let mut tables = SampleTableInfo::default();
        assert!(fragment.extend_sample_tables(9, &mut tables));
        assert_eq!(tables.sample_count(), 0);
    }
}
