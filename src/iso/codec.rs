//! Codec configuration extraction.
//!
//! Each supported codec carries its decoder configuration in a different
//! child of the sample entry: AAC in an `esds` descriptor chain, ALAC in
//! a magic-cookie box, FLAC in a `dfLa` box holding raw metadata blocks.
//! The configuration bytes are handed to the decoder verbatim; this
//! module only locates them and mirrors the handful of fields (rate,
//! channels, bit depth) the demuxer itself needs.
//!
//! Telephony codecs (G.711 µ-law/A-law) carry no configuration atom at
//! all; their documented defaults are applied here instead.

use crate::io::ByteSource;
use crate::iso::boxes::{AudioTrackInfo, BoxHeader, BoxType};
use crate::iso::parser::BoxParser;

/// Ceiling for any codec configuration payload read into memory. A
/// hostile file can declare a multi-gigabyte configuration block; the
/// size is checked before any buffer is allocated.
pub const MAX_CODEC_CONFIG_SIZE: u64 = 16 * 1024 * 1024;

/// AAC sampling frequencies by AudioSpecificConfig index.
pub(crate) const AAC_SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

// MPEG-4 descriptor tags used inside esds.
const ES_DESCRIPTOR_TAG: u8 = 0x03;
const DECODER_CONFIG_TAG: u8 = 0x04;
const DECODER_SPECIFIC_TAG: u8 = 0x05;

/// Parse an `esds` box and extract the AAC AudioSpecificConfig.
pub fn parse_esds_config<S: ByteSource>(
    parser: &mut BoxParser<S>,
    header: &BoxHeader,
    track: &mut AudioTrackInfo,
) -> bool {
    let Some(payload) = parser.read_payload(header, MAX_CODEC_CONFIG_SIZE) else {
        parser.recovery_mut().log_error(
            "CodecConfigRejected",
            "esds payload missing or oversized",
            Some(BoxType::ESDS),
        );
        return false;
    };
    // FullBox: version (1) + flags (3), then the descriptor chain.
    if payload.len() < 4 {
        return false;
    }
    if !walk_descriptors(&payload[4..], track) || track.codec_config.is_empty() {
        parser.recovery_mut().log_error(
            "CodecConfigMissing",
            "esds carried no decoder specific info",
            Some(BoxType::ESDS),
        );
        return false;
    }
    true
}

/// Walk a chain of MPEG-4 descriptors, descending into nested ones.
fn walk_descriptors(mut data: &[u8], track: &mut AudioTrackInfo) -> bool {
    while data.len() >= 2 {
        let tag = data[0];
        let mut pos = 1;

        // Descriptor lengths are base-128 varints, at most 4 bytes.
        let mut len = 0u32;
        let mut len_bytes = 0;
        loop {
            let Some(&byte) = data.get(pos) else {
                return false;
            };
            pos += 1;
            len = (len << 7) | (byte & 0x7F) as u32;
            len_bytes += 1;
            if byte & 0x80 == 0 {
                break;
            }
            if len_bytes == 4 {
                return false;
            }
        }

        let end = pos + len as usize;
        if end > data.len() {
            return false;
        }
        let body = &data[pos..end];

        match tag {
            ES_DESCRIPTOR_TAG => {
                // ES_ID (2) + flags (1), then optional fields per flag,
                // then nested descriptors.
                if body.len() < 3 {
                    return false;
                }
                let flags = body[2];
                let mut skip = 3;
                if flags & 0x80 != 0 {
                    skip += 2; // streamDependence
                }
                if flags & 0x40 != 0 {
                    // URL: one length byte plus the string
                    let Some(&url_len) = body.get(skip) else {
                        return false;
                    };
                    skip += 1 + url_len as usize;
                }
                if flags & 0x20 != 0 {
                    skip += 2; // OCR stream
                }
                if skip > body.len() {
                    return false;
                }
                if !walk_descriptors(&body[skip..], track) {
                    return false;
                }
            }
            DECODER_CONFIG_TAG => {
                // objectType (1) + streamType (1) + bufferSize (3) +
                // maxBitrate (4) + avgBitrate (4), then nested descriptors.
                if body.len() < 13 {
                    return false;
                }
                track.avg_bitrate = u32::from_be_bytes([body[9], body[10], body[11], body[12]]);
                if !walk_descriptors(&body[13..], track) {
                    return false;
                }
            }
            DECODER_SPECIFIC_TAG => {
                // The AudioSpecificConfig itself, passed through verbatim.
                track.codec_config = body.to_vec();
                if body.len() >= 2 {
                    let bits = u16::from_be_bytes([body[0], body[1]]);
                    let freq_index = ((bits >> 7) & 0x0F) as usize;
                    let channels = (bits >> 3) & 0x0F;
                    if let Some(&rate) = AAC_SAMPLE_RATES.get(freq_index) {
                        track.sample_rate = rate;
                    }
                    if channels != 0 {
                        track.channel_count = channels;
                    }
                }
            }
            _ => {
                // Unknown descriptors are skipped, not errors.
            }
        }

        data = &data[end..];
    }
    true
}

/// Parse an `alac` magic-cookie box.
///
/// Cookie layout: frame_length (4), compatible_version (1), bit_depth (1),
/// pb/mb/kb tuning (3), num_channels (1), max_run (2), max_frame_bytes
/// (4), avg_bit_rate (4), sample_rate (4).
pub fn parse_alac_config<S: ByteSource>(
    parser: &mut BoxParser<S>,
    header: &BoxHeader,
    track: &mut AudioTrackInfo,
) -> bool {
    let Some(payload) = parser.read_payload(header, MAX_CODEC_CONFIG_SIZE) else {
        parser.recovery_mut().log_error(
            "CodecConfigRejected",
            "alac cookie missing or oversized",
            Some(BoxType::ALAC),
        );
        return false;
    };
    // FullBox version/flags, then the 24-byte cookie.
    if payload.len() < 4 + 24 {
        parser.recovery_mut().log_error(
            "CodecConfigRejected",
            "alac cookie too small",
            Some(BoxType::ALAC),
        );
        return false;
    }
    let cookie = &payload[4..];

    track.bits_per_sample = cookie[5] as u16;
    track.channel_count = cookie[9] as u16;
    let avg_bitrate = u32::from_be_bytes([cookie[16], cookie[17], cookie[18], cookie[19]]);
    if avg_bitrate != 0 {
        track.avg_bitrate = avg_bitrate;
    }
    let sample_rate = u32::from_be_bytes([cookie[20], cookie[21], cookie[22], cookie[23]]);
    if sample_rate != 0 {
        track.sample_rate = sample_rate;
    }

    track.codec_config = cookie.to_vec();
    true
}

/// Parse a `dfLa` box (FLAC-in-ISO): version/flags, then raw FLAC
/// metadata blocks with STREAMINFO first.
pub fn parse_flac_config<S: ByteSource>(
    parser: &mut BoxParser<S>,
    header: &BoxHeader,
    track: &mut AudioTrackInfo,
) -> bool {
    // Size gate fires before any allocation; a 40 MB claim is rejected
    // here whether or not the bytes exist.
    if header.payload_size() > MAX_CODEC_CONFIG_SIZE {
        parser.recovery_mut().log_error(
            "CodecConfigRejected",
            "dfLa payload oversized",
            Some(BoxType::DFLA),
        );
        return false;
    }
    let Some(payload) = parser.read_payload(header, MAX_CODEC_CONFIG_SIZE) else {
        return false;
    };
    if payload.len() < 4 {
        return false;
    }
    let blocks = &payload[4..];

    // STREAMINFO: block header (4) + 34 bytes of fields.
    if blocks.len() < 38 {
        parser.recovery_mut().log_error(
            "CodecConfigRejected",
            "dfLa too small for STREAMINFO",
            Some(BoxType::DFLA),
        );
        return false;
    }
    let block_type = blocks[0] & 0x7F;
    let block_len =
        ((blocks[1] as u32) << 16) | ((blocks[2] as u32) << 8) | blocks[3] as u32;
    if block_type != 0 || block_len < 34 {
        parser.recovery_mut().log_error(
            "CodecConfigRejected",
            "dfLa does not start with STREAMINFO",
            Some(BoxType::DFLA),
        );
        return false;
    }

    let info = &blocks[4..];
    // Sample rate: 20 bits starting at byte 10.
    let sample_rate = ((info[10] as u32) << 12) | ((info[11] as u32) << 4) | (info[12] as u32 >> 4);
    // Channels: 3 bits, stored minus one.
    let channels = ((info[12] >> 1) & 0x07) as u16 + 1;
    // Bits per sample: 5 bits, stored minus one.
    let bits = ((((info[12] & 0x01) as u16) << 4) | ((info[13] >> 4) as u16)) + 1;
    // Total samples: 36 bits.
    let total_samples = (((info[13] & 0x0F) as u64) << 32)
        | ((info[14] as u64) << 24)
        | ((info[15] as u64) << 16)
        | ((info[16] as u64) << 8)
        | info[17] as u64;

    track.sample_rate = sample_rate;
    track.channel_count = channels;
    track.bits_per_sample = bits;
    if sample_rate > 0 && total_samples > 0 {
        // FLAC timing runs at the sample rate.
        track.duration = total_samples;
        track.timescale = sample_rate;
    }
    track.codec_config = blocks.to_vec();
    true
}

/// Apply documented G.711 defaults where the container left fields unset.
///
/// A declared bit depth is kept as-is: both µ-law and A-law are 8-bit by
/// definition, so anything else must fail validation rather than be
/// silently corrected.
pub fn apply_telephony_defaults(track: &mut AudioTrackInfo) {
    if track.sample_rate == 0 {
        track.sample_rate = 8000;
    }
    if track.channel_count == 0 {
        track.channel_count = 1;
    }
    if track.bits_per_sample == 0 {
        track.bits_per_sample = 8;
    }
}

/// Check that whatever telephony parameters the container DID declare are
/// self-consistent.
pub fn validate_telephony_parameters(track: &AudioTrackInfo) -> bool {
    if !(4000..=48000).contains(&track.sample_rate) {
        return false;
    }
    if track.channel_count == 0 || track.channel_count > 2 {
        return false;
    }
    track.bits_per_sample == 8
}

/// Bit depth implied by a PCM sample entry fourcc, where it implies one.
pub fn pcm_bits_for(code: BoxType) -> Option<u16> {
    match code {
        BoxType::FL32 | BoxType::IN32 => Some(32),
        BoxType::FL64 => Some(64),
        BoxType::IN24 => Some(24),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemorySource;
    use crate::iso::boxes::AudioCodec;

    fn parser_for(payload_box: Vec<u8>) -> (BoxParser<MemorySource>, BoxHeader) {
        let header = BoxHeader {
            box_type: BoxType::from_bytes([
                payload_box[4],
                payload_box[5],
                payload_box[6],
                payload_box[7],
            ]),
            size: payload_box.len() as u64,
            data_offset: 8,
            extended_size: false,
        };
        (BoxParser::new(MemorySource::new(payload_box)), header)
    }

    fn boxed(box_type: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(8 + payload.len() as u32).to_be_bytes());
        out.extend_from_slice(box_type);
        out.extend_from_slice(payload);
        out
    }

    /// Minimal esds payload: version/flags, ES descriptor wrapping a
    /// decoder config wrapping the AudioSpecificConfig.
    fn esds_payload(asc: &[u8]) -> Vec<u8> {
        let mut ds = vec![DECODER_SPECIFIC_TAG, asc.len() as u8];
        ds.extend_from_slice(asc);

        let mut dc_body = vec![0x40, 0x15, 0, 0, 0];
        dc_body.extend_from_slice(&128_000u32.to_be_bytes()); // max bitrate
        dc_body.extend_from_slice(&96_000u32.to_be_bytes()); // avg bitrate
        dc_body.extend_from_slice(&ds);
        let mut dc = vec![DECODER_CONFIG_TAG, dc_body.len() as u8];
        dc.extend_from_slice(&dc_body);

        let mut es_body = vec![0, 1, 0]; // ES_ID, no optional fields
        es_body.extend_from_slice(&dc);
        let mut es = vec![ES_DESCRIPTOR_TAG, es_body.len() as u8];
        es.extend_from_slice(&es_body);

        let mut payload = vec![0u8; 4];
        payload.extend_from_slice(&es);
        payload
    }

    #[test]
    fn test_esds_extracts_audio_specific_config() {
        // AAC-LC, 44100 Hz (index 4), 2 channels:
        // 00010 0100 0010 000 -> 0x12 0x10
        let asc = [0x12u8, 0x10];
        let (mut p, header) = parser_for(boxed(b"esds", &esds_payload(&asc)));
        let mut track = AudioTrackInfo::default();
        assert!(parse_esds_config(&mut p, &header, &mut track));
        assert_eq!(track.codec_config, asc.to_vec());
        assert_eq!(track.sample_rate, 44100);
        assert_eq!(track.channel_count, 2);
        assert_eq!(track.avg_bitrate, 96_000);
    }

    #[test]
    fn test_esds_extension_length_bytes() {
        // Same descriptor chain but with 0x80-prefixed varint lengths.
        let asc = [0x12u8, 0x10];
        let mut ds = vec![DECODER_SPECIFIC_TAG, 0x80, asc.len() as u8];
        ds.extend_from_slice(&asc);
        let mut payload = vec![0u8; 4];
        payload.extend_from_slice(&ds);
        let (mut p, header) = parser_for(boxed(b"esds", &payload));
        let mut track = AudioTrackInfo::default();
        assert!(parse_esds_config(&mut p, &header, &mut track));
        assert_eq!(track.codec_config, asc.to_vec());
    }

    #[test]
    fn test_esds_without_decoder_specific_info_fails() {
        let payload = vec![0u8; 4];
        let (mut p, header) = parser_for(boxed(b"esds", &payload));
        let mut track = AudioTrackInfo::default();
        assert!(!parse_esds_config(&mut p, &header, &mut track));
    }

    #[test]
    fn test_esds_truncated_descriptor_fails() {
        // Descriptor claims 100 bytes but the payload ends early.
        let payload = vec![0, 0, 0, 0, ES_DESCRIPTOR_TAG, 100, 0, 1];
        let (mut p, header) = parser_for(boxed(b"esds", &payload));
        let mut track = AudioTrackInfo::default();
        assert!(!parse_esds_config(&mut p, &header, &mut track));
    }

    #[test]
    fn test_alac_cookie_fields() {
        let mut cookie = [0u8; 24];
        cookie[0..4].copy_from_slice(&4096u32.to_be_bytes());
        cookie[5] = 16; // bit depth
        cookie[9] = 2; // channels
        cookie[16..20].copy_from_slice(&256_000u32.to_be_bytes());
        cookie[20..24].copy_from_slice(&44100u32.to_be_bytes());

        let mut payload = vec![0u8; 4];
        payload.extend_from_slice(&cookie);
        let (mut p, header) = parser_for(boxed(b"alac", &payload));
        let mut track = AudioTrackInfo::default();
        assert!(parse_alac_config(&mut p, &header, &mut track));
        assert_eq!(track.bits_per_sample, 16);
        assert_eq!(track.channel_count, 2);
        assert_eq!(track.sample_rate, 44100);
        assert_eq!(track.codec_config, cookie.to_vec());
    }

    fn streaminfo_block(rate: u32, channels: u16, bits: u16, total: u64) -> Vec<u8> {
        let mut block = vec![0u8; 38];
        block[0] = 0x80; // STREAMINFO, last block
        block[3] = 34;
        let info = &mut block[4..];
        info[10] = (rate >> 12) as u8;
        info[11] = (rate >> 4) as u8;
        info[12] = (((rate & 0x0F) as u8) << 4)
            | (((channels - 1) as u8) << 1)
            | (((bits - 1) >> 4) as u8 & 0x01);
        info[13] = ((((bits - 1) & 0x0F) as u8) << 4) | ((total >> 32) & 0x0F) as u8;
        info[14] = (total >> 24) as u8;
        info[15] = (total >> 16) as u8;
        info[16] = (total >> 8) as u8;
        info[17] = total as u8;
        block
    }

    #[test]
    fn test_flac_streaminfo_fields() {
        let mut payload = vec![0u8; 4];
        payload.extend_from_slice(&streaminfo_block(48000, 2, 24, 480_000));
        let (mut p, header) = parser_for(boxed(b"dfLa", &payload));
        let mut track = AudioTrackInfo::default();
        track.codec = AudioCodec::Flac;
        assert!(parse_flac_config(&mut p, &header, &mut track));
        assert_eq!(track.sample_rate, 48000);
        assert_eq!(track.channel_count, 2);
        assert_eq!(track.bits_per_sample, 24);
        assert_eq!(track.duration, 480_000);
        assert_eq!(track.timescale, 48000);
    }

    #[test]
    fn test_flac_oversized_claim_rejected_before_allocation() {
        // Header claims a 40 MB payload; the backing buffer holds almost
        // nothing. The size gate must fire without any read attempt.
        let (mut p, _) = parser_for(boxed(b"dfLa", &[0u8; 8]));
        let header = BoxHeader {
            box_type: BoxType::DFLA,
            size: 40 * 1024 * 1024,
            data_offset: 8,
            extended_size: false,
        };
        let mut track = AudioTrackInfo::default();
        assert!(!parse_flac_config(&mut p, &header, &mut track));
        assert!(track.codec_config.is_empty());
    }

    #[test]
    fn test_telephony_defaults_and_validation() {
        let mut track = AudioTrackInfo::default();
        apply_telephony_defaults(&mut track);
        assert_eq!(track.sample_rate, 8000);
        assert_eq!(track.channel_count, 1);
        assert_eq!(track.bits_per_sample, 8);
        assert!(validate_telephony_parameters(&track));

        // A 16-bit claim is not a G.711 stream.
        track.bits_per_sample = 16;
        assert!(!validate_telephony_parameters(&track));

        track.bits_per_sample = 8;
        track.sample_rate = 96_000;
        assert!(!validate_telephony_parameters(&track));
    }

    #[test]
    fn test_telephony_declared_depth_survives_defaults() {
        // A container that declares a non-8 bit depth keeps it, so
        // validation can reject the entry instead of accepting a
        // silently corrected one.
        let mut track = AudioTrackInfo {
            bits_per_sample: 16,
            ..Default::default()
        };
        apply_telephony_defaults(&mut track);
        assert_eq!(track.bits_per_sample, 16);
        assert!(!validate_telephony_parameters(&track));
    }

    #[test]
    fn test_pcm_bits() {
        assert_eq!(pcm_bits_for(BoxType::FL32), Some(32));
        assert_eq!(pcm_bits_for(BoxType::IN24), Some(24));
        assert_eq!(pcm_bits_for(BoxType::SOWT), None);
    }
}
