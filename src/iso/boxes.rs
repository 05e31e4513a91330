//! ISO box definitions.
//!
//! Boxes (QuickTime calls them atoms) are length-prefixed, typed records
//! that nest to form a tree. Everything the demuxer knows about a file is
//! discovered by walking that tree.

/// Four-character box type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxType(pub [u8; 4]);

impl BoxType {
    // Core structure
    pub const FTYP: Self = Self(*b"ftyp");
    pub const MOOV: Self = Self(*b"moov");
    pub const MDAT: Self = Self(*b"mdat");
    pub const FREE: Self = Self(*b"free");
    pub const SKIP: Self = Self(*b"skip");
    pub const WIDE: Self = Self(*b"wide");

    // Movie box children
    pub const MVHD: Self = Self(*b"mvhd");
    pub const TRAK: Self = Self(*b"trak");
    pub const UDTA: Self = Self(*b"udta");
    pub const META: Self = Self(*b"meta");
    pub const IODS: Self = Self(*b"iods");

    // Track box children
    pub const TKHD: Self = Self(*b"tkhd");
    pub const TREF: Self = Self(*b"tref");
    pub const EDTS: Self = Self(*b"edts");
    pub const ELST: Self = Self(*b"elst");
    pub const MDIA: Self = Self(*b"mdia");

    // Media box children
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MINF: Self = Self(*b"minf");
    pub const SMHD: Self = Self(*b"smhd");
    pub const VMHD: Self = Self(*b"vmhd");
    pub const DINF: Self = Self(*b"dinf");
    pub const STBL: Self = Self(*b"stbl");

    // Sample table children
    pub const STSD: Self = Self(*b"stsd");
    pub const STTS: Self = Self(*b"stts");
    pub const CTTS: Self = Self(*b"ctts");
    pub const STSC: Self = Self(*b"stsc");
    pub const STSZ: Self = Self(*b"stsz");
    pub const STZ2: Self = Self(*b"stz2");
    pub const STCO: Self = Self(*b"stco");
    pub const CO64: Self = Self(*b"co64");
    pub const STSS: Self = Self(*b"stss");

    // Fragmented files
    pub const MOOF: Self = Self(*b"moof");
    pub const MFHD: Self = Self(*b"mfhd");
    pub const TRAF: Self = Self(*b"traf");
    pub const TFHD: Self = Self(*b"tfhd");
    pub const TFDT: Self = Self(*b"tfdt");
    pub const TRUN: Self = Self(*b"trun");
    pub const MFRA: Self = Self(*b"mfra");
    pub const SIDX: Self = Self(*b"sidx");

    // Metadata
    pub const ILST: Self = Self(*b"ilst");
    pub const DATA: Self = Self(*b"data");
    pub const NAME_TITLE: Self = Self([0xA9, b'n', b'a', b'm']);
    pub const NAME_ARTIST: Self = Self([0xA9, b'A', b'R', b'T']);
    pub const NAME_ALBUM: Self = Self([0xA9, b'a', b'l', b'b']);
    pub const NAME_DATE: Self = Self([0xA9, b'd', b'a', b'y']);
    pub const NAME_GENRE: Self = Self([0xA9, b'g', b'e', b'n']);
    pub const NAME_COMMENT: Self = Self([0xA9, b'c', b'm', b't']);
    pub const NAME_TOOL: Self = Self([0xA9, b't', b'o', b'o']);
    pub const ALBUM_ARTIST: Self = Self(*b"aART");
    pub const TRACK_NUMBER: Self = Self(*b"trkn");
    pub const DISC_NUMBER: Self = Self(*b"disk");
    pub const COVER_ART: Self = Self(*b"covr");

    // Audio sample entry codes
    pub const MP4A: Self = Self(*b"mp4a");
    pub const ALAC: Self = Self(*b"alac");
    pub const FLAC: Self = Self(*b"fLaC");
    pub const ULAW: Self = Self(*b"ulaw");
    pub const ALAW: Self = Self(*b"alaw");
    pub const LPCM: Self = Self(*b"lpcm");
    pub const SOWT: Self = Self(*b"sowt");
    pub const TWOS: Self = Self(*b"twos");
    pub const FL32: Self = Self(*b"fl32");
    pub const FL64: Self = Self(*b"fl64");
    pub const IN24: Self = Self(*b"in24");
    pub const IN32: Self = Self(*b"in32");

    // Codec configuration children
    pub const ESDS: Self = Self(*b"esds");
    pub const DFLA: Self = Self(*b"dfLa");
    pub const WAVE: Self = Self(*b"wave");

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// The code as a string, with non-printable bytes replaced by `?`.
    pub fn display(&self) -> String {
        self.0
            .iter()
            .map(|&b| {
                if (0x20..=0x7E).contains(&b) {
                    b as char
                } else {
                    '?'
                }
            })
            .collect()
    }

    /// Whether all four bytes are printable ASCII. Garbage headers almost
    /// never satisfy this, so it is a cheap corruption heuristic.
    pub fn is_printable(&self) -> bool {
        self.0.iter().all(|&b| (0x20..=0x7E).contains(&b))
    }

    /// Whether this box type may directly contain child boxes.
    pub fn is_container(&self) -> bool {
        matches!(
            *self,
            Self::MOOV
                | Self::TRAK
                | Self::EDTS
                | Self::MDIA
                | Self::MINF
                | Self::DINF
                | Self::STBL
                | Self::UDTA
                | Self::META
                | Self::ILST
                | Self::MOOF
                | Self::TRAF
                | Self::MFRA
        )
    }
}

impl std::fmt::Display for BoxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// One parsed box header.
///
/// `size == 0` marks an invalid header: the bytes at the requested offset
/// were missing, unreadable, or declared a size smaller than the header
/// itself. Malformed input never produces an error value, only an invalid
/// header, so the recursive walk can consult recovery and keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    /// Box type code.
    pub box_type: BoxType,
    /// Total box length including the header, in bytes.
    pub size: u64,
    /// File offset where the box payload starts.
    pub data_offset: u64,
    /// Whether the 64-bit size field was used.
    pub extended_size: bool,
}

impl BoxHeader {
    /// An invalid header (unknown type, zero size).
    pub fn invalid() -> Self {
        Self {
            box_type: BoxType([0; 4]),
            size: 0,
            data_offset: 0,
            extended_size: false,
        }
    }

    /// Whether the header parsed to something usable.
    pub fn is_valid(&self) -> bool {
        self.size != 0
    }

    /// Header length in bytes (8, or 16 with the extended size field).
    pub fn header_len(&self) -> u64 {
        if self.extended_size {
            16
        } else {
            8
        }
    }

    /// File offset where the box starts.
    pub fn start_offset(&self) -> u64 {
        self.data_offset.saturating_sub(self.header_len())
    }

    /// Payload length in bytes.
    pub fn payload_size(&self) -> u64 {
        self.size.saturating_sub(self.header_len())
    }

    /// File offset one past the end of the box.
    pub fn end_offset(&self) -> u64 {
        self.start_offset().saturating_add(self.size)
    }
}

/// Handler type of a track, from the `hdlr` box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerType {
    Audio,
    Video,
    Hint,
    Meta,
    Unknown([u8; 4]),
}

impl HandlerType {
    /// Create from the raw handler code.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        match &bytes {
            b"soun" => Self::Audio,
            b"vide" => Self::Video,
            b"hint" => Self::Hint,
            b"meta" => Self::Meta,
            _ => Self::Unknown(bytes),
        }
    }

    /// Whether this is an audio track.
    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio)
    }
}

/// Audio codec carried by a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    /// AAC (`mp4a`), configured by an esds AudioSpecificConfig.
    Aac,
    /// Apple Lossless (`alac`), configured by a magic cookie.
    Alac,
    /// FLAC (`fLaC`), configured by a STREAMINFO block.
    Flac,
    /// ITU-T G.711 µ-law telephony audio.
    Ulaw,
    /// ITU-T G.711 A-law telephony audio.
    Alaw,
    /// Uncompressed PCM in one of the `lpcm`/`sowt`/`twos`/float/int forms.
    Pcm,
    /// Anything this demuxer cannot hand to a decoder.
    Unknown([u8; 4]),
}

impl AudioCodec {
    /// Map a sample entry fourcc to a codec.
    pub fn from_sample_entry(code: BoxType) -> Self {
        match code {
            BoxType::MP4A => Self::Aac,
            BoxType::ALAC => Self::Alac,
            BoxType::FLAC => Self::Flac,
            BoxType::ULAW => Self::Ulaw,
            BoxType::ALAW => Self::Alaw,
            BoxType::LPCM
            | BoxType::SOWT
            | BoxType::TWOS
            | BoxType::FL32
            | BoxType::FL64
            | BoxType::IN24
            | BoxType::IN32 => Self::Pcm,
            other => Self::Unknown(other.0),
        }
    }

    /// Whether the codec is one of the G.711 telephony variants.
    pub fn is_telephony(&self) -> bool {
        matches!(self, Self::Ulaw | Self::Alaw)
    }

    /// Whether a decoder needs out-of-band configuration bytes for this
    /// codec. Telephony and PCM streams are fully described by rate,
    /// channels, and bit depth.
    pub fn needs_codec_config(&self) -> bool {
        matches!(self, Self::Aac | Self::Alac | Self::Flac)
    }
}

use crate::iso::sample_table::SampleTableInfo;

/// Codec identity and parameters for one audio track.
///
/// Built while parsing the track box; read-only afterwards. The
/// `codec_config` bytes pass through verbatim so the decoder can parse
/// them against the relevant codec specification.
#[derive(Debug, Clone, Default)]
pub struct AudioTrackInfo {
    /// Track ID from the track header.
    pub track_id: u32,
    /// Codec identity.
    pub codec: AudioCodec,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Channel count.
    pub channel_count: u16,
    /// Bits per sample.
    pub bits_per_sample: u16,
    /// Average bitrate in bits per second, when the container declares it.
    pub avg_bitrate: u32,
    /// Codec-specific configuration bytes (AAC AudioSpecificConfig, ALAC
    /// magic cookie, FLAC metadata blocks), verbatim from the container.
    pub codec_config: Vec<u8>,
    /// Track duration in `timescale` units.
    pub duration: u64,
    /// Time units per second for this track.
    pub timescale: u32,
    /// Sample location and timing tables.
    pub sample_table: SampleTableInfo,
}

impl Default for AudioCodec {
    fn default() -> Self {
        Self::Unknown([0; 4])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_type_display() {
        assert_eq!(BoxType::MOOV.display(), "moov");
        assert_eq!(BoxType([0xFF, b'a', b'b', 0x00]).display(), "?ab?");
    }

    #[test]
    fn test_box_type_printable() {
        assert!(BoxType::STSZ.is_printable());
        assert!(!BoxType([0x00, 0x01, 0x02, 0x03]).is_printable());
        // iTunes atoms start with 0xA9 and are legitimately non-printable
        assert!(!BoxType::NAME_TITLE.is_printable());
    }

    #[test]
    fn test_header_geometry() {
        let header = BoxHeader {
            box_type: BoxType::MOOV,
            size: 100,
            data_offset: 58,
            extended_size: false,
        };
        assert_eq!(header.header_len(), 8);
        assert_eq!(header.start_offset(), 50);
        assert_eq!(header.payload_size(), 92);
        assert_eq!(header.end_offset(), 150);

        let extended = BoxHeader {
            box_type: BoxType::MDAT,
            size: 32,
            data_offset: 16,
            extended_size: true,
        };
        assert_eq!(extended.header_len(), 16);
        assert_eq!(extended.start_offset(), 0);
        assert_eq!(extended.payload_size(), 16);
    }

    #[test]
    fn test_codec_mapping() {
        assert_eq!(AudioCodec::from_sample_entry(BoxType::MP4A), AudioCodec::Aac);
        assert_eq!(AudioCodec::from_sample_entry(BoxType::SOWT), AudioCodec::Pcm);
        assert_eq!(AudioCodec::from_sample_entry(BoxType::ULAW), AudioCodec::Ulaw);
        assert!(AudioCodec::Ulaw.is_telephony());
        assert!(AudioCodec::Aac.needs_codec_config());
        assert!(!AudioCodec::Pcm.needs_codec_config());
    }
}
