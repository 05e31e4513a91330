//! Sample table model.
//!
//! Four sub-tables describe where every compressed sample lives and when
//! it plays, all sharing one timeline:
//! - stts: per-sample decode timestamps (expanded from run-length pairs)
//! - stsc: chunk-to-sample-count mapping
//! - stsz: per-sample byte sizes
//! - stco/co64: per-chunk file offsets
//! plus stss, the subset of samples that are sync (seekable) points.
//!
//! The run-length encodings are expanded once at parse time into indexable
//! sequences. The O(sample count) memory cost is accepted and bounded by
//! the parser's sample-count ceiling.

/// One stsc entry. `first_chunk` is stored 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleToChunkEntry {
    /// First chunk this entry applies to (0-based).
    pub first_chunk: u32,
    /// Samples in each chunk covered by this entry.
    pub samples_per_chunk: u32,
    /// Sample description index (1-based, as stored).
    pub sample_desc_index: u32,
}

/// Per-sample sizes, either uniform or individually listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleSizes {
    /// Every sample has the same size.
    Uniform { size: u32, count: u64 },
    /// One size per sample.
    PerSample(Vec<u32>),
}

impl Default for SampleSizes {
    fn default() -> Self {
        Self::Uniform { size: 0, count: 0 }
    }
}

impl SampleSizes {
    /// Number of samples described.
    pub fn count(&self) -> u64 {
        match self {
            Self::Uniform { count, .. } => *count,
            Self::PerSample(sizes) => sizes.len() as u64,
        }
    }

    /// Size of one sample, if in range.
    pub fn get(&self, index: u64) -> Option<u32> {
        match self {
            Self::Uniform { size, count } => (index < *count).then_some(*size),
            Self::PerSample(sizes) => sizes.get(index as usize).copied(),
        }
    }
}

/// Resolved location of one sample in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleLocation {
    /// Absolute file offset of the sample data.
    pub offset: u64,
    /// Sample size in bytes.
    pub size: u32,
}

/// Per-track sample tables, immutable once the track box is parsed.
#[derive(Debug, Clone, Default)]
pub struct SampleTableInfo {
    /// Per-sample decode timestamps in track timescale units, expanded
    /// from stts run-length pairs.
    pub sample_times: Vec<u64>,
    /// Raw stsc entries, first_chunk converted to 0-based.
    pub sample_to_chunk: Vec<SampleToChunkEntry>,
    /// Per-sample sizes from stsz.
    pub sample_sizes: SampleSizes,
    /// Per-chunk absolute file offsets from stco/co64.
    pub chunk_offsets: Vec<u64>,
    /// Sync sample indices (0-based). Empty means every sample is a sync
    /// point, which is the common case for audio.
    pub sync_samples: Vec<u64>,
}

impl SampleTableInfo {
    /// Number of samples, taken from the expanded timestamp table.
    pub fn sample_count(&self) -> u64 {
        self.sample_times.len() as u64
    }

    /// Whether any of the four core tables is missing.
    pub fn is_incomplete(&self) -> bool {
        self.sample_times.is_empty()
            || self.sample_to_chunk.is_empty()
            || self.sample_sizes.count() == 0
            || self.chunk_offsets.is_empty()
    }

    /// Decode timestamp of a sample, in track timescale units.
    pub fn time_of(&self, index: u64) -> Option<u64> {
        self.sample_times.get(index as usize).copied()
    }

    /// Size of a sample in bytes.
    pub fn size_of(&self, index: u64) -> Option<u32> {
        self.sample_sizes.get(index)
    }

    /// Whether a sample is a sync (seek target) point.
    pub fn is_sync(&self, index: u64) -> bool {
        if self.sync_samples.is_empty() {
            return true;
        }
        self.sync_samples.binary_search(&index).is_ok()
    }

    /// Latest sync sample at or before `index`.
    pub fn sync_at_or_before(&self, index: u64) -> u64 {
        if self.sync_samples.is_empty() {
            return index;
        }
        match self.sync_samples.binary_search(&index) {
            Ok(_) => index,
            Err(0) => self.sync_samples.first().copied().unwrap_or(0),
            Err(pos) => self.sync_samples[pos - 1],
        }
    }

    /// Index of the sample whose decode time covers `time` (timescale
    /// units), clamped to the last sample.
    pub fn sample_for_time(&self, time: u64) -> u64 {
        if self.sample_times.is_empty() {
            return 0;
        }
        let upper = self.sample_times.partition_point(|&t| t <= time) as u64;
        upper.saturating_sub(1)
    }

    /// Total duration in timescale units, assuming the last sample lasts
    /// as long as its predecessor.
    pub fn duration(&self) -> u64 {
        match self.sample_times.len() {
            0 => 0,
            1 => self.sample_times[0],
            n => {
                let last = self.sample_times[n - 1];
                let prev = self.sample_times[n - 2];
                last + last.saturating_sub(prev)
            }
        }
    }

    /// The total sample count implied by the chunk tables (stsc applied
    /// over the chunk offset list).
    pub fn count_from_chunks(&self) -> u64 {
        let num_chunks = self.chunk_offsets.len() as u64;
        let mut total = 0u64;
        for (i, entry) in self.sample_to_chunk.iter().enumerate() {
            let first = entry.first_chunk as u64;
            if first >= num_chunks {
                break;
            }
            let next_first = self
                .sample_to_chunk
                .get(i + 1)
                .map(|e| e.first_chunk as u64)
                .unwrap_or(num_chunks)
                .min(num_chunks);
            total += (next_first.saturating_sub(first)) * entry.samples_per_chunk as u64;
        }
        total
    }

    /// Resolve the file location of a sample by walking the chunk mapping.
    pub fn locate(&self, index: u64) -> Option<SampleLocation> {
        let size = self.sample_sizes.get(index)?;
        let num_chunks = self.chunk_offsets.len() as u64;
        let mut sample = 0u64;

        for (i, entry) in self.sample_to_chunk.iter().enumerate() {
            let first = entry.first_chunk as u64;
            if first >= num_chunks {
                break;
            }
            let next_first = self
                .sample_to_chunk
                .get(i + 1)
                .map(|e| e.first_chunk as u64)
                .unwrap_or(num_chunks)
                .min(num_chunks);
            let spc = entry.samples_per_chunk as u64;
            if spc == 0 {
                continue;
            }

            let samples_in_span = (next_first - first) * spc;
            if index < sample + samples_in_span {
                let chunk = first + (index - sample) / spc;
                let index_in_chunk = (index - sample) % spc;
                let first_in_chunk = index - index_in_chunk;

                let mut offset = self.chunk_offsets.get(chunk as usize).copied()?;
                for s in first_in_chunk..index {
                    offset += self.sample_sizes.get(s)? as u64;
                }
                return Some(SampleLocation { offset, size });
            }
            sample += samples_in_span;
        }

        None
    }
}
