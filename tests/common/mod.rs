//! Synthetic container builders shared by the integration tests.
//!
//! Each builder returns the complete file bytes plus the sample payloads
//! the demuxer is expected to hand back, so tests can compare extracted
//! chunks byte for byte. The containers are small but structurally
//! complete: ftyp, a full moov (mvhd/trak/tkhd/mdia/mdhd/hdlr/minf/stbl
//! with all five sample tables), iTunes metadata, and an mdat holding
//! four samples split across two chunks.

// Each test binary uses its own subset of the builders.
#![allow(dead_code)]

/// AudioSpecificConfig for AAC-LC, 44.1 kHz, stereo.
pub const ASC: [u8; 2] = [0x12, 0x10];

/// Sample sizes used by every builder, two chunks of two samples each.
pub const SAMPLE_SIZES: [u32; 4] = [100, 120, 90, 110];

const TRACK_ID: u32 = 1;
const SAMPLE_RATE: u32 = 44100;
const SAMPLE_DELTA: u32 = 1024;

/// The four sample payloads. Each begins with an ADTS-style sync pattern
/// so codec-config inference has something real to recognize.
pub fn sample_payloads() -> Vec<Vec<u8>> {
    SAMPLE_SIZES
        .iter()
        .enumerate()
        .map(|(i, &size)| {
            let mut sample = vec![(i + 1) as u8; size as usize];
            sample[0] = 0xFF;
            sample[1] = 0xF1;
            sample
        })
        .collect()
}

/// Standard AAC M4A: esds present, moov ahead of mdat.
pub fn build_m4a() -> (Vec<u8>, Vec<Vec<u8>>) {
    build_container(&Layout {
        fourcc: *b"mp4a",
        channels: 2,
        bits: 16,
        rate: SAMPLE_RATE,
        with_esds: true,
        extra_stsz_entries: 0,
        moov_at_end: false,
    })
}

/// AAC M4A with the movie box behind the media data, the
/// progressive-download layout.
pub fn build_m4a_moov_at_end() -> (Vec<u8>, Vec<Vec<u8>>) {
    build_container(&Layout {
        fourcc: *b"mp4a",
        channels: 2,
        bits: 16,
        rate: SAMPLE_RATE,
        with_esds: true,
        extra_stsz_entries: 0,
        moov_at_end: true,
    })
}

/// AAC M4A whose sample entry carries no esds child, forcing the
/// demuxer to infer the configuration from sample bytes.
pub fn build_m4a_without_esds() -> (Vec<u8>, Vec<Vec<u8>>) {
    build_container(&Layout {
        fourcc: *b"mp4a",
        channels: 2,
        bits: 16,
        rate: SAMPLE_RATE,
        with_esds: false,
        extra_stsz_entries: 0,
        moov_at_end: false,
    })
}

/// AAC M4A whose stsz declares one entry more than the other tables,
/// exercising the majority-rule table repair.
pub fn build_m4a_with_size_outlier() -> (Vec<u8>, Vec<Vec<u8>>) {
    build_container(&Layout {
        fourcc: *b"mp4a",
        channels: 2,
        bits: 16,
        rate: SAMPLE_RATE,
        with_esds: true,
        extra_stsz_entries: 1,
        moov_at_end: false,
    })
}

/// G.711 µ-law container whose sample entry leaves rate/channels/bits
/// zeroed, exercising the telephony defaults.
pub fn build_ulaw_container() -> (Vec<u8>, Vec<Vec<u8>>) {
    build_container(&Layout {
        fourcc: *b"ulaw",
        channels: 0,
        bits: 0,
        rate: 0,
        with_esds: false,
        extra_stsz_entries: 0,
        moov_at_end: false,
    })
}

/// G.711 µ-law container that wrongly declares a 16-bit depth; the
/// demuxer must reject the track rather than correct it.
pub fn build_ulaw_with_bad_depth() -> (Vec<u8>, Vec<Vec<u8>>) {
    build_container(&Layout {
        fourcc: *b"ulaw",
        channels: 1,
        bits: 16,
        rate: 8000,
        with_esds: false,
        extra_stsz_entries: 0,
        moov_at_end: false,
    })
}

/// Fragmented M4A: the moov carries empty sample tables and the four
/// samples live in a single moof/mdat pair behind it.
pub fn build_fragmented_m4a() -> (Vec<u8>, Vec<Vec<u8>>) {
    let samples = sample_payloads();
    let mdat_payload: Vec<u8> = samples.concat();

    let layout = Layout {
        fourcc: *b"mp4a",
        channels: 2,
        bits: 16,
        rate: SAMPLE_RATE,
        with_esds: true,
        extra_stsz_entries: 0,
        moov_at_end: false,
    };
    let moov = build_fragmented_moov(&layout);

    // The trun data offset is relative to the moof start; the field is
    // fixed-width, so measure with a placeholder and rebuild.
    let probe = moof_box(0);
    let moof = moof_box((probe.len() + 8) as i32);

    let mut file = ftyp_box();
    file.extend_from_slice(&moov);
    file.extend_from_slice(&moof);
    file.extend_from_slice(&boxed(b"mdat", &mdat_payload));
    (file, samples)
}

struct Layout {
    fourcc: [u8; 4],
    channels: u16,
    bits: u16,
    rate: u32,
    with_esds: bool,
    extra_stsz_entries: u32,
    moov_at_end: bool,
}

fn build_container(layout: &Layout) -> (Vec<u8>, Vec<Vec<u8>>) {
    let samples = sample_payloads();
    let mdat_payload: Vec<u8> = samples.concat();
    let chunk1_len: u32 = SAMPLE_SIZES[0] + SAMPLE_SIZES[1];
    let ftyp = ftyp_box();

    let file = if layout.moov_at_end {
        // [ftyp][mdat][moov]: chunk offsets are known up front.
        let data_start = ftyp.len() as u32 + 8;
        let moov = build_moov(layout, [data_start, data_start + chunk1_len]);
        let mut file = ftyp;
        file.extend_from_slice(&boxed(b"mdat", &mdat_payload));
        file.extend_from_slice(&moov);
        file
    } else {
        // [ftyp][moov][mdat]: measure moov first, then rebuild it with
        // the real chunk offsets. stco entries are fixed-width, so the
        // second pass has the same length as the first.
        let probe = build_moov(layout, [0, 0]);
        let data_start = (ftyp.len() + probe.len() + 8) as u32;
        let moov = build_moov(layout, [data_start, data_start + chunk1_len]);
        let mut file = ftyp;
        file.extend_from_slice(&moov);
        file.extend_from_slice(&boxed(b"mdat", &mdat_payload));
        file
    };

    (file, samples)
}

fn build_moov(layout: &Layout, chunk_offsets: [u32; 2]) -> Vec<u8> {
    let mut tables = stts_box(SAMPLE_SIZES.len() as u32, SAMPLE_DELTA);
    tables.extend_from_slice(&stsc_box());
    tables.extend_from_slice(&stsz_box(layout.extra_stsz_entries));
    tables.extend_from_slice(&stco_box(&chunk_offsets));
    moov_shell(layout, &tables)
}

/// moov for a fragmented file: the stbl tables are present but empty,
/// the moof runs fill them in.
fn build_fragmented_moov(layout: &Layout) -> Vec<u8> {
    let mut tables = empty_table(b"stts");
    tables.extend_from_slice(&empty_table(b"stsc"));
    tables.extend_from_slice(&empty_table(b"stsz"));
    tables.extend_from_slice(&empty_table(b"stco"));
    moov_shell(layout, &tables)
}

fn moov_shell(layout: &Layout, tables: &[u8]) -> Vec<u8> {
    // mvhd, version 0: movie timescale 600, duration left to the track.
    let mut mvhd = vec![0u8; 12];
    mvhd.extend_from_slice(&600u32.to_be_bytes());
    mvhd.extend_from_slice(&0u32.to_be_bytes());
    mvhd.extend_from_slice(&[0u8; 80]);

    // tkhd, version 0.
    let mut tkhd = vec![0u8; 12];
    tkhd.extend_from_slice(&TRACK_ID.to_be_bytes());
    tkhd.extend_from_slice(&[0u8; 68]);

    // mdhd, version 0: media timescale matches the sample rate.
    let timescale = if layout.rate == 0 { 8000 } else { layout.rate };
    let mut mdhd = vec![0u8; 12];
    mdhd.extend_from_slice(&timescale.to_be_bytes());
    mdhd.extend_from_slice(&(SAMPLE_SIZES.len() as u32 * SAMPLE_DELTA).to_be_bytes());
    mdhd.extend_from_slice(&[0u8; 4]);

    let mut hdlr = vec![0u8; 8];
    hdlr.extend_from_slice(b"soun");
    hdlr.extend_from_slice(&[0u8; 13]);

    let esds = layout.with_esds.then(|| esds_box(&ASC));
    let entry = sound_sample_entry(layout, esds.as_deref().unwrap_or(&[]));

    let mut stbl = stsd_box(&entry);
    stbl.extend_from_slice(tables);

    let mut minf = boxed(b"smhd", &[0u8; 8]);
    minf.extend_from_slice(&boxed(b"stbl", &stbl));

    let mut mdia = boxed(b"mdhd", &mdhd);
    mdia.extend_from_slice(&boxed(b"hdlr", &hdlr));
    mdia.extend_from_slice(&boxed(b"minf", &minf));

    let mut trak = boxed(b"tkhd", &tkhd);
    trak.extend_from_slice(&boxed(b"mdia", &mdia));

    let mut moov = boxed(b"mvhd", &mvhd);
    moov.extend_from_slice(&boxed(b"trak", &trak));
    moov.extend_from_slice(&udta_box());
    boxed(b"moov", &moov)
}

fn ftyp_box() -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(b"M4A ");
    payload.extend_from_slice(&0u32.to_be_bytes());
    payload.extend_from_slice(b"isom");
    payload.extend_from_slice(b"M4A ");
    boxed(b"ftyp", &payload)
}

/// A sample table box with a zero entry count (stsz also zeroes the
/// uniform-size field).
fn empty_table(box_type: &[u8; 4]) -> Vec<u8> {
    let len = if box_type == b"stsz" { 12 } else { 8 };
    boxed(box_type, &vec![0u8; len])
}

/// One moof holding all four samples in a single run. Sizes are
/// per-sample in the trun; the duration comes from the tfhd default.
fn moof_box(data_offset: i32) -> Vec<u8> {
    // mfhd: version/flags + sequence number
    let mut mfhd = vec![0u8; 4];
    mfhd.extend_from_slice(&1u32.to_be_bytes());

    // tfhd: flag 0x08 = default sample duration present
    let mut tfhd = Vec::new();
    tfhd.extend_from_slice(&0x08u32.to_be_bytes());
    tfhd.extend_from_slice(&TRACK_ID.to_be_bytes());
    tfhd.extend_from_slice(&SAMPLE_DELTA.to_be_bytes());

    // tfdt: version 0, decode time 0
    let tfdt = vec![0u8; 8];

    // trun: flags 0x01 (data offset) | 0x200 (per-sample sizes)
    let mut trun = Vec::new();
    trun.extend_from_slice(&0x201u32.to_be_bytes());
    trun.extend_from_slice(&(SAMPLE_SIZES.len() as u32).to_be_bytes());
    trun.extend_from_slice(&data_offset.to_be_bytes());
    for size in SAMPLE_SIZES {
        trun.extend_from_slice(&size.to_be_bytes());
    }

    let mut traf = boxed(b"tfhd", &tfhd);
    traf.extend_from_slice(&boxed(b"tfdt", &tfdt));
    traf.extend_from_slice(&boxed(b"trun", &trun));

    let mut moof = boxed(b"mfhd", &mfhd);
    moof.extend_from_slice(&boxed(b"traf", &traf));
    boxed(b"moof", &moof)
}

fn sound_sample_entry(layout: &Layout, children: &[u8]) -> Vec<u8> {
    let mut entry = Vec::new();
    entry.extend_from_slice(&(36 + children.len() as u32).to_be_bytes());
    entry.extend_from_slice(&layout.fourcc);
    entry.extend_from_slice(&[0u8; 6]); // reserved
    entry.extend_from_slice(&1u16.to_be_bytes()); // data reference index
    entry.extend_from_slice(&[0u8; 8]); // version, revision, vendor
    entry.extend_from_slice(&layout.channels.to_be_bytes());
    entry.extend_from_slice(&layout.bits.to_be_bytes());
    entry.extend_from_slice(&[0u8; 4]); // compression id, packet size
    entry.extend_from_slice(&(layout.rate << 16).to_be_bytes());
    entry.extend_from_slice(children);
    entry
}

fn esds_box(asc: &[u8]) -> Vec<u8> {
    let mut ds = vec![0x05, asc.len() as u8];
    ds.extend_from_slice(asc);

    let mut dc_body = vec![0x40, 0x15, 0, 0, 0];
    dc_body.extend_from_slice(&128_000u32.to_be_bytes());
    dc_body.extend_from_slice(&96_000u32.to_be_bytes());
    dc_body.extend_from_slice(&ds);
    let mut dc = vec![0x04, dc_body.len() as u8];
    dc.extend_from_slice(&dc_body);

    let mut es_body = vec![0, 1, 0];
    es_body.extend_from_slice(&dc);
    let mut es = vec![0x03, es_body.len() as u8];
    es.extend_from_slice(&es_body);

    let mut payload = vec![0u8; 4];
    payload.extend_from_slice(&es);
    boxed(b"esds", &payload)
}

fn stsd_box(entry: &[u8]) -> Vec<u8> {
    let mut payload = vec![0u8; 4];
    payload.extend_from_slice(&1u32.to_be_bytes());
    payload.extend_from_slice(entry);
    boxed(b"stsd", &payload)
}

fn stts_box(count: u32, delta: u32) -> Vec<u8> {
    let mut payload = vec![0u8; 4];
    payload.extend_from_slice(&1u32.to_be_bytes());
    payload.extend_from_slice(&count.to_be_bytes());
    payload.extend_from_slice(&delta.to_be_bytes());
    boxed(b"stts", &payload)
}

fn stsc_box() -> Vec<u8> {
    // One entry: every chunk holds two samples.
    let mut payload = vec![0u8; 4];
    payload.extend_from_slice(&1u32.to_be_bytes());
    payload.extend_from_slice(&1u32.to_be_bytes());
    payload.extend_from_slice(&2u32.to_be_bytes());
    payload.extend_from_slice(&1u32.to_be_bytes());
    boxed(b"stsc", &payload)
}

fn stsz_box(extra_entries: u32) -> Vec<u8> {
    let mut payload = vec![0u8; 4];
    payload.extend_from_slice(&0u32.to_be_bytes());
    payload.extend_from_slice(&(SAMPLE_SIZES.len() as u32 + extra_entries).to_be_bytes());
    for size in SAMPLE_SIZES {
        payload.extend_from_slice(&size.to_be_bytes());
    }
    for _ in 0..extra_entries {
        payload.extend_from_slice(&77u32.to_be_bytes());
    }
    boxed(b"stsz", &payload)
}

fn stco_box(offsets: &[u32]) -> Vec<u8> {
    let mut payload = vec![0u8; 4];
    payload.extend_from_slice(&(offsets.len() as u32).to_be_bytes());
    for offset in offsets {
        payload.extend_from_slice(&offset.to_be_bytes());
    }
    boxed(b"stco", &payload)
}

fn udta_box() -> Vec<u8> {
    let mut ilst = text_tag(&[0xA9, b'n', b'a', b'm'], "Night Drive");
    ilst.extend_from_slice(&text_tag(&[0xA9, b'A', b'R', b'T'], "The Harbors"));

    let mut meta_payload = vec![0u8; 4];
    meta_payload.extend_from_slice(&boxed(b"ilst", &ilst));
    boxed(b"udta", &boxed(b"meta", &meta_payload))
}

fn text_tag(tag: &[u8; 4], value: &str) -> Vec<u8> {
    let mut data = vec![0, 0, 0, 1]; // type indicator: UTF-8
    data.extend_from_slice(&[0u8; 4]); // locale
    data.extend_from_slice(value.as_bytes());
    boxed(tag, &boxed(b"data", &data))
}

pub fn boxed(box_type: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&(8 + payload.len() as u32).to_be_bytes());
    out.extend_from_slice(box_type);
    out.extend_from_slice(payload);
    out
}
