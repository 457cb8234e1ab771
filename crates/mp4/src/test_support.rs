//! Shared fMP4 test builders.
//!
//! This module is available for local mp4 tests and optionally for downstream
//! crate tests when the `test-utils` feature is enabled.

/// Bytes to skip in a visual sample entry body before child boxes begin.
const VISUAL_SAMPLE_ENTRY_HEADER: usize = 70;

/// Bytes to skip in an audio sample entry body before child boxes begin.
const AUDIO_SAMPLE_ENTRY_HEADER: usize = 20;

/// Movie timescale written into every generated `mvhd`.
pub const MOVIE_TIMESCALE: u32 = 1000;

pub fn make_box(fourcc: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let size = (8 + body.len()) as u32;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(fourcc);
    out.extend_from_slice(body);
    out
}

pub fn make_full_box(fourcc: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + payload.len());
    body.push(version);
    body.push(((flags >> 16) & 0xFF) as u8);
    body.push(((flags >> 8) & 0xFF) as u8);
    body.push((flags & 0xFF) as u8);
    body.extend_from_slice(payload);
    make_box(fourcc, &body)
}

pub fn make_visual_sample_entry(fourcc: &[u8; 4], children: &[u8]) -> Vec<u8> {
    let mut body = vec![0u8; VISUAL_SAMPLE_ENTRY_HEADER];
    body.extend_from_slice(children);
    make_box(fourcc, &body)
}

pub fn make_audio_sample_entry(fourcc: &[u8; 4], children: &[u8]) -> Vec<u8> {
    let mut body = vec![0u8; AUDIO_SAMPLE_ENTRY_HEADER];
    body.extend_from_slice(children);
    make_box(fourcc, &body)
}

pub fn make_ftyp() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(b"iso6");
    body.extend_from_slice(&0u32.to_be_bytes());
    body.extend_from_slice(b"iso6mp41");
    make_box(b"ftyp", &body)
}

fn make_mvhd(next_track_id: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(96);
    payload.extend_from_slice(&0u32.to_be_bytes()); // creation_time
    payload.extend_from_slice(&0u32.to_be_bytes()); // modification_time
    payload.extend_from_slice(&MOVIE_TIMESCALE.to_be_bytes());
    payload.extend_from_slice(&0u32.to_be_bytes()); // duration
    payload.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // rate
    payload.extend_from_slice(&0x0100u16.to_be_bytes()); // volume
    payload.extend_from_slice(&[0u8; 10]);
    payload.extend_from_slice(&[0u8; 36]); // matrix
    payload.extend_from_slice(&[0u8; 24]); // pre_defined
    payload.extend_from_slice(&next_track_id.to_be_bytes());
    make_full_box(b"mvhd", 0, 0, &payload)
}

fn make_trak(track_id: u32, handler: &[u8; 4], timescale: u32) -> Vec<u8> {
    let mut tkhd_payload = Vec::with_capacity(80);
    tkhd_payload.extend_from_slice(&0u32.to_be_bytes());
    tkhd_payload.extend_from_slice(&0u32.to_be_bytes());
    tkhd_payload.extend_from_slice(&track_id.to_be_bytes());
    tkhd_payload.extend_from_slice(&[0u8; 4]);
    tkhd_payload.extend_from_slice(&0u32.to_be_bytes()); // duration
    tkhd_payload.extend_from_slice(&[0u8; 8]);
    tkhd_payload.extend_from_slice(&[0u8; 8]); // layer, alternate_group, volume, reserved
    tkhd_payload.extend_from_slice(&[0u8; 36]);
    tkhd_payload.extend_from_slice(&[0u8; 8]); // width, height
    let tkhd = make_full_box(b"tkhd", 0, 0x3, &tkhd_payload);

    let mut mdhd_payload = Vec::with_capacity(20);
    mdhd_payload.extend_from_slice(&0u32.to_be_bytes());
    mdhd_payload.extend_from_slice(&0u32.to_be_bytes());
    mdhd_payload.extend_from_slice(&timescale.to_be_bytes());
    mdhd_payload.extend_from_slice(&0u32.to_be_bytes());
    mdhd_payload.extend_from_slice(&[0x55, 0xC4, 0, 0]); // language "und"
    let mdhd = make_full_box(b"mdhd", 0, 0, &mdhd_payload);

    let mut hdlr_payload = Vec::new();
    hdlr_payload.extend_from_slice(&0u32.to_be_bytes());
    hdlr_payload.extend_from_slice(handler);
    hdlr_payload.extend_from_slice(&[0u8; 12]);
    hdlr_payload.extend_from_slice(b"Handler\0");
    let hdlr = make_full_box(b"hdlr", 0, 0, &hdlr_payload);

    let sample_entry = if handler == b"soun" {
        make_audio_sample_entry(b"mp4a", &[])
    } else {
        make_visual_sample_entry(b"avc1", &[])
    };
    let mut stsd_payload = Vec::new();
    stsd_payload.extend_from_slice(&1u32.to_be_bytes());
    stsd_payload.extend_from_slice(&sample_entry);
    let stsd = make_full_box(b"stsd", 0, 0, &stsd_payload);

    let stbl = make_box(b"stbl", &stsd);
    let minf = make_box(b"minf", &stbl);

    let mut mdia_body = mdhd;
    mdia_body.extend_from_slice(&hdlr);
    mdia_body.extend_from_slice(&minf);
    let mdia = make_box(b"mdia", &mdia_body);

    let mut trak_body = tkhd;
    trak_body.extend_from_slice(&mdia);
    make_box(b"trak", &trak_body)
}

pub fn make_trex(track_id: u32, default_sample_duration: u32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(20);
    payload.extend_from_slice(&track_id.to_be_bytes());
    payload.extend_from_slice(&1u32.to_be_bytes());
    payload.extend_from_slice(&default_sample_duration.to_be_bytes());
    payload.extend_from_slice(&0u32.to_be_bytes());
    payload.extend_from_slice(&0u32.to_be_bytes());
    make_full_box(b"trex", 0, 0, &payload)
}

/// `ftyp` + `moov` for a single fragmented track.
pub fn make_init(
    track_id: u32,
    handler: &[u8; 4],
    timescale: u32,
    default_sample_duration: u32,
) -> Vec<u8> {
    let mut moov_body = make_mvhd(track_id + 1);
    moov_body.extend_from_slice(&make_trak(track_id, handler, timescale));
    moov_body.extend_from_slice(&make_box(
        b"mvex",
        &make_trex(track_id, default_sample_duration),
    ));

    let mut out = make_ftyp();
    out.extend_from_slice(&make_box(b"moov", &moov_body));
    out
}

/// Split the output of [`make_init`] into its `ftyp` and `moov` boxes.
pub fn split_init(init: &[u8]) -> (&[u8], &[u8]) {
    let ftyp_len = u32::from_be_bytes([init[0], init[1], init[2], init[3]]) as usize;
    init.split_at(ftyp_len)
}

/// Knobs for a generated `moof` + `mdat` pair.
#[derive(Debug, Clone)]
pub struct FragmentSpec {
    pub sequence_number: u32,
    pub track_id: u32,
    /// Written as a version 1 `tfdt`; `None` omits the box.
    pub decode_time: Option<u64>,
    /// One entry per sample.
    pub sample_durations: Vec<u32>,
    /// Leave per-sample durations out of `trun`.
    pub omit_sample_durations: bool,
    pub tfhd_default_duration: Option<u32>,
    /// Absolute file offset of this fragment's `moof`. When set, `tfhd`
    /// carries an explicit `base_data_offset` instead of default-base-is-moof.
    pub explicit_base_data_offset: Option<u64>,
    pub payload: Vec<u8>,
}

impl Default for FragmentSpec {
    fn default() -> Self {
        Self {
            sequence_number: 1,
            track_id: 1,
            decode_time: Some(0),
            sample_durations: vec![1000],
            omit_sample_durations: false,
            tfhd_default_duration: None,
            explicit_base_data_offset: None,
            payload: vec![0u8; 4],
        }
    }
}

impl FragmentSpec {
    pub fn build(&self) -> Vec<u8> {
        let mfhd = make_full_box(b"mfhd", 0, 0, &self.sequence_number.to_be_bytes());

        let mut tfhd_flags = 0u32;
        let mut tfhd_payload = self.track_id.to_be_bytes().to_vec();
        if let Some(base) = self.explicit_base_data_offset {
            tfhd_flags |= 0x00_0001;
            tfhd_payload.extend_from_slice(&base.to_be_bytes());
        } else {
            tfhd_flags |= 0x02_0000;
        }
        if let Some(duration) = self.tfhd_default_duration {
            tfhd_flags |= 0x00_0008;
            tfhd_payload.extend_from_slice(&duration.to_be_bytes());
        }
        let tfhd = make_full_box(b"tfhd", 0, tfhd_flags, &tfhd_payload);

        let tfdt = self
            .decode_time
            .map(|time| make_full_box(b"tfdt", 1, 0, &time.to_be_bytes()))
            .unwrap_or_default();

        let count = self.sample_durations.len();
        let sizes: Vec<u32> = (0..count)
            .map(|i| {
                let base = self.payload.len() / count;
                if i + 1 == count {
                    (self.payload.len() - base * (count - 1)) as u32
                } else {
                    base as u32
                }
            })
            .collect();

        // trun flags: data_offset + sample_size (+ sample_duration)
        let mut trun_flags = 0x00_0001 | 0x00_0200;
        if !self.omit_sample_durations {
            trun_flags |= 0x00_0100;
        }
        let mut trun_payload = Vec::new();
        trun_payload.extend_from_slice(&(count as u32).to_be_bytes());
        trun_payload.extend_from_slice(&0i32.to_be_bytes()); // placeholder data_offset
        for (duration, size) in self.sample_durations.iter().zip(&sizes) {
            if !self.omit_sample_durations {
                trun_payload.extend_from_slice(&duration.to_be_bytes());
            }
            trun_payload.extend_from_slice(&size.to_be_bytes());
        }
        let mut trun = make_full_box(b"trun", 0, trun_flags, &trun_payload);

        // data_offset is relative to the moof start either way, since an
        // explicit base is the moof's own absolute offset.
        let moof_len = 8 + mfhd.len() + 8 + tfhd.len() + tfdt.len() + trun.len();
        let data_offset = (moof_len + 8) as i32;
        let trun_data_offset_pos = 8 /* box header */ + 4 /* fullbox flags */ + 4 /* sample_count */;
        trun[trun_data_offset_pos..trun_data_offset_pos + 4]
            .copy_from_slice(&data_offset.to_be_bytes());

        let mut traf_body = tfhd;
        traf_body.extend_from_slice(&tfdt);
        traf_body.extend_from_slice(&trun);
        let traf = make_box(b"traf", &traf_body);

        let mut moof_body = mfhd;
        moof_body.extend_from_slice(&traf);

        let mut out = make_box(b"moof", &moof_body);
        out.extend_from_slice(&make_box(b"mdat", &self.payload));
        out
    }
}

/// A default-base-is-moof fragment with a `tfdt` and per-sample durations.
pub fn make_fragment(
    sequence_number: u32,
    track_id: u32,
    decode_time: u64,
    sample_durations: &[u32],
    payload: &[u8],
) -> Vec<u8> {
    FragmentSpec {
        sequence_number,
        track_id,
        decode_time: Some(decode_time),
        sample_durations: sample_durations.to_vec(),
        payload: payload.to_vec(),
        ..FragmentSpec::default()
    }
    .build()
}

/// A complete single-track fragmented file: init followed by `segments`
/// fragments of `samples_per_segment` samples each, decode times contiguous.
pub fn make_track_file(
    track_id: u32,
    handler: &[u8; 4],
    timescale: u32,
    sample_duration: u32,
    segments: usize,
    samples_per_segment: usize,
) -> Vec<u8> {
    let mut out = make_init(track_id, handler, timescale, sample_duration);
    let per_segment = u64::from(sample_duration) * samples_per_segment as u64;
    for i in 0..segments {
        let fill = if handler == b"soun" { b'a' } else { b'v' };
        out.extend_from_slice(&make_fragment(
            i as u32 + 1,
            track_id,
            per_segment * i as u64,
            &vec![sample_duration; samples_per_segment],
            &vec![fill; 8 * samples_per_segment],
        ));
    }
    out
}
