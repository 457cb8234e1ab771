//! Movie fragment (`moof`) inspection and in-place rewriting.

use crate::box_utils::{
    BoxView, box_at, children, find_first_box, full_box_header, read_u32, read_u64, write_u32,
    write_u64,
};
use crate::error::{Mp4Error, Result};

const TFHD_BASE_DATA_OFFSET: u32 = 0x00_0001;
const TFHD_SAMPLE_DESCRIPTION_INDEX: u32 = 0x00_0002;
const TFHD_DEFAULT_SAMPLE_DURATION: u32 = 0x00_0008;
const TFHD_DEFAULT_SAMPLE_SIZE: u32 = 0x00_0010;

const TRUN_DATA_OFFSET: u32 = 0x00_0001;
const TRUN_FIRST_SAMPLE_FLAGS: u32 = 0x00_0004;
const TRUN_SAMPLE_DURATION: u32 = 0x00_0100;
const TRUN_SAMPLE_SIZE: u32 = 0x00_0200;
const TRUN_PER_SAMPLE_FIELDS: u32 = 0x00_0F00;

/// What a single-track `moof` says about its samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentInfo {
    pub sequence_number: u32,
    pub track_id: u32,
    /// `tfdt` value, when present.
    pub base_media_decode_time: Option<u64>,
    /// Sum of sample durations, in the track's media timescale.
    pub duration: u64,
    pub sample_count: u32,
}

/// Where a fragment's sample bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleData {
    /// Explicit `tfhd.base_data_offset`; otherwise the data base is the `moof` start.
    pub base_data_offset: Option<u64>,
    /// `data_offset` of the first `trun`, relative to the data base.
    pub data_offset: Option<i32>,
    /// Total sample bytes across all runs.
    pub len: u64,
}

/// Field rewrites applied to a fragment that is being relocated into a new file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentRewrite {
    pub track_id: u32,
    pub sequence_number: u32,
    /// Subtracted from `tfdt`.
    pub decode_time_offset: u64,
    /// Added to an explicit `tfhd.base_data_offset`.
    pub data_offset_shift: i64,
}

/// Inspect a complete `moof` box holding exactly one `traf`.
///
/// Sample durations come from `trun` when present, then from the `tfhd`
/// default, then from `trex_default_duration`.
pub fn inspect_moof(moof: &[u8], trex_default_duration: u32) -> Result<FragmentInfo> {
    let root = moof_root(moof)?;
    let sequence_number = mfhd_sequence(moof, &root)?;
    let traf = single_traf(moof, &root)?;

    let tfhd = find_first_box(moof, traf.body_start, traf.body_end, *b"tfhd")
        .ok_or_else(|| Mp4Error::malformed("traf has no tfhd"))?;
    let header = parse_tfhd(moof, &tfhd)?;
    let default_duration = header.default_duration.unwrap_or(trex_default_duration);

    let base_media_decode_time = match find_first_box(moof, traf.body_start, traf.body_end, *b"tfdt")
    {
        Some(tfdt) => Some(read_tfdt(moof, &tfdt)?),
        None => None,
    };

    let mut duration = 0u64;
    let mut sample_count = 0u32;
    for trun in traf_children(moof, &traf)?
        .into_iter()
        .filter(|child| child.fourcc == *b"trun")
    {
        let (count, trun_duration) = sum_trun(moof, &trun, default_duration)?;
        sample_count = sample_count.saturating_add(count);
        duration = duration.saturating_add(trun_duration);
    }

    Ok(FragmentInfo {
        sequence_number,
        track_id: header.track_id,
        base_media_decode_time,
        duration,
        sample_count,
    })
}

/// Apply `rewrite` to a complete single-track `moof` box in place.
pub fn rewrite_moof(moof: &mut [u8], rewrite: &FragmentRewrite) -> Result<()> {
    let root = moof_root(moof)?;

    let mfhd = find_first_box(moof, root.body_start, root.body_end, *b"mfhd")
        .ok_or_else(|| Mp4Error::malformed("moof has no mfhd"))?;
    write_u32(moof, mfhd.body_start + 4, rewrite.sequence_number)
        .ok_or_else(|| Mp4Error::malformed("mfhd is truncated"))?;

    let traf = single_traf(moof, &root)?;
    let tfhd = find_first_box(moof, traf.body_start, traf.body_end, *b"tfhd")
        .ok_or_else(|| Mp4Error::malformed("traf has no tfhd"))?;
    let header = parse_tfhd(moof, &tfhd)?;
    write_u32(moof, tfhd.body_start + 4, rewrite.track_id)
        .ok_or_else(|| Mp4Error::malformed("tfhd is truncated"))?;

    if let Some(base) = header.base_data_offset {
        let shifted = i128::from(base) + i128::from(rewrite.data_offset_shift);
        let shifted = u64::try_from(shifted)
            .map_err(|_| Mp4Error::malformed("relocated base_data_offset out of range"))?;
        write_u64(moof, tfhd.body_start + 8, shifted)
            .ok_or_else(|| Mp4Error::malformed("tfhd is truncated"))?;
    }

    if let Some(tfdt) = find_first_box(moof, traf.body_start, traf.body_end, *b"tfdt") {
        let current = read_tfdt(moof, &tfdt)?;
        let rebased = current.checked_sub(rewrite.decode_time_offset).ok_or_else(|| {
            Mp4Error::malformed(format!(
                "decode time {current} precedes track start {}",
                rewrite.decode_time_offset
            ))
        })?;
        let (version, _) = full_box_header(moof, tfdt.body_start)
            .ok_or_else(|| Mp4Error::malformed("tfdt is truncated"))?;
        let written = if version == 1 {
            write_u64(moof, tfdt.body_start + 4, rebased)
        } else {
            // rebased <= current, which already fit in 32 bits
            write_u32(moof, tfdt.body_start + 4, rebased as u32)
        };
        written.ok_or_else(|| Mp4Error::malformed("tfdt is truncated"))?;
    }

    Ok(())
}

/// Locate the sample bytes referenced by a single-track `moof`.
pub fn sample_data(moof: &[u8]) -> Result<SampleData> {
    let root = moof_root(moof)?;
    let traf = single_traf(moof, &root)?;
    let tfhd = find_first_box(moof, traf.body_start, traf.body_end, *b"tfhd")
        .ok_or_else(|| Mp4Error::malformed("traf has no tfhd"))?;
    let header = parse_tfhd(moof, &tfhd)?;
    let default_size = header.default_size.unwrap_or(0);

    let mut data_offset = None;
    let mut len = 0u64;
    for trun in traf_children(moof, &traf)?
        .into_iter()
        .filter(|child| child.fourcc == *b"trun")
    {
        let truncated = || Mp4Error::malformed("trun is truncated");
        let (_, flags) = full_box_header(moof, trun.body_start).ok_or_else(truncated)?;
        let sample_count = read_u32(moof, trun.body_start + 4).ok_or_else(truncated)?;

        let mut cursor = trun.body_start + 8;
        if flags & TRUN_DATA_OFFSET != 0 {
            if data_offset.is_none() {
                data_offset = read_u32(moof, cursor).map(|v| v as i32);
            }
            cursor += 4;
        }
        if flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
            cursor += 4;
        }

        if flags & TRUN_SAMPLE_SIZE == 0 {
            len += u64::from(sample_count) * u64::from(default_size);
            continue;
        }
        let per_sample = 4 * (flags & TRUN_PER_SAMPLE_FIELDS).count_ones() as usize;
        let size_field = if flags & TRUN_SAMPLE_DURATION != 0 { 4 } else { 0 };
        for i in 0..sample_count as usize {
            let pos = cursor + i * per_sample + size_field;
            if pos + 4 > trun.body_end {
                return Err(truncated());
            }
            len += u64::from(read_u32(moof, pos).ok_or_else(truncated)?);
        }
    }

    Ok(SampleData {
        base_data_offset: header.base_data_offset,
        data_offset,
        len,
    })
}

struct TfhdHeader {
    track_id: u32,
    base_data_offset: Option<u64>,
    default_duration: Option<u32>,
    default_size: Option<u32>,
}

fn moof_root(moof: &[u8]) -> Result<BoxView> {
    box_at(moof, 0, moof.len())
        .filter(|view| view.fourcc == *b"moof")
        .ok_or_else(|| Mp4Error::malformed("moof box is truncated"))
}

fn mfhd_sequence(moof: &[u8], root: &BoxView) -> Result<u32> {
    let mfhd = find_first_box(moof, root.body_start, root.body_end, *b"mfhd")
        .ok_or_else(|| Mp4Error::malformed("moof has no mfhd"))?;
    read_u32(moof, mfhd.body_start + 4)
        .filter(|_| mfhd.body_start + 8 <= mfhd.body_end)
        .ok_or_else(|| Mp4Error::malformed("mfhd is truncated"))
}

fn single_traf(moof: &[u8], root: &BoxView) -> Result<BoxView> {
    let boxes = children(moof, root.body_start, root.body_end)
        .ok_or_else(|| Mp4Error::malformed("moof child overruns its parent"))?;
    let mut trafs = boxes.into_iter().filter(|child| child.fourcc == *b"traf");
    match (trafs.next(), trafs.next()) {
        (Some(traf), None) => Ok(traf),
        (None, _) => Err(Mp4Error::malformed("moof has no traf")),
        (Some(_), Some(_)) => Err(Mp4Error::malformed(
            "moof carries more than one track fragment",
        )),
    }
}

fn traf_children(moof: &[u8], traf: &BoxView) -> Result<Vec<BoxView>> {
    children(moof, traf.body_start, traf.body_end)
        .ok_or_else(|| Mp4Error::malformed("traf child overruns its parent"))
}

fn parse_tfhd(data: &[u8], tfhd: &BoxView) -> Result<TfhdHeader> {
    let truncated = || Mp4Error::malformed("tfhd is truncated");
    let (_, flags) = full_box_header(data, tfhd.body_start).ok_or_else(truncated)?;
    let track_id = read_u32(data, tfhd.body_start + 4).ok_or_else(truncated)?;

    let mut cursor = tfhd.body_start + 8;
    let mut base_pos = None;
    if flags & TFHD_BASE_DATA_OFFSET != 0 {
        base_pos = Some(cursor);
        cursor += 8;
    }
    if flags & TFHD_SAMPLE_DESCRIPTION_INDEX != 0 {
        cursor += 4;
    }
    let mut duration_pos = None;
    if flags & TFHD_DEFAULT_SAMPLE_DURATION != 0 {
        duration_pos = Some(cursor);
        cursor += 4;
    }
    let mut size_pos = None;
    if flags & TFHD_DEFAULT_SAMPLE_SIZE != 0 {
        size_pos = Some(cursor);
        cursor += 4;
    }
    if cursor > tfhd.body_end {
        return Err(truncated());
    }

    let base_data_offset = base_pos
        .map(|pos| read_u64(data, pos).ok_or_else(truncated))
        .transpose()?;
    let default_duration = duration_pos
        .map(|pos| read_u32(data, pos).ok_or_else(truncated))
        .transpose()?;
    let default_size = size_pos
        .map(|pos| read_u32(data, pos).ok_or_else(truncated))
        .transpose()?;

    Ok(TfhdHeader {
        track_id,
        base_data_offset,
        default_duration,
        default_size,
    })
}

fn read_tfdt(data: &[u8], tfdt: &BoxView) -> Result<u64> {
    let truncated = || Mp4Error::malformed("tfdt is truncated");
    let (version, _) = full_box_header(data, tfdt.body_start).ok_or_else(truncated)?;
    if version == 1 {
        read_u64(data, tfdt.body_start + 4).ok_or_else(truncated)
    } else {
        read_u32(data, tfdt.body_start + 4)
            .map(u64::from)
            .ok_or_else(truncated)
    }
}

/// Returns `(sample_count, total_duration)` for one `trun`.
fn sum_trun(data: &[u8], trun: &BoxView, default_duration: u32) -> Result<(u32, u64)> {
    let truncated = || Mp4Error::malformed("trun is truncated");
    let (_, flags) = full_box_header(data, trun.body_start).ok_or_else(truncated)?;
    let sample_count = read_u32(data, trun.body_start + 4).ok_or_else(truncated)?;

    let mut cursor = trun.body_start + 8;
    if flags & TRUN_DATA_OFFSET != 0 {
        cursor += 4;
    }
    if flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
        cursor += 4;
    }

    let per_sample = 4 * (flags & TRUN_PER_SAMPLE_FIELDS).count_ones() as usize;
    let table_len = (sample_count as usize)
        .checked_mul(per_sample)
        .ok_or_else(truncated)?;
    if cursor + table_len > trun.body_end {
        return Err(truncated());
    }

    if flags & TRUN_SAMPLE_DURATION == 0 {
        return Ok((sample_count, u64::from(sample_count) * u64::from(default_duration)));
    }

    // sample_duration is the first per-sample field when present
    let total = (0..sample_count as usize)
        .filter_map(|i| read_u32(data, cursor + i * per_sample))
        .map(u64::from)
        .sum();
    Ok((sample_count, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FragmentSpec, make_box, make_fragment, make_full_box};

    fn moof_of(fragment: &[u8]) -> Vec<u8> {
        let view = box_at(fragment, 0, fragment.len()).unwrap();
        fragment[view.start..view.end].to_vec()
    }

    #[test]
    fn durations_come_from_trun() {
        let fragment = make_fragment(4, 1, 9000, &[3000, 3000, 3003], b"abcdefghi");
        let info = inspect_moof(&moof_of(&fragment), 1).unwrap();
        assert_eq!(
            info,
            FragmentInfo {
                sequence_number: 4,
                track_id: 1,
                base_media_decode_time: Some(9000),
                duration: 9003,
                sample_count: 3,
            }
        );
    }

    #[test]
    fn durations_fall_back_to_tfhd_then_trex() {
        let tfhd_default = FragmentSpec {
            track_id: 2,
            sample_durations: vec![0; 4],
            omit_sample_durations: true,
            tfhd_default_duration: Some(1024),
            payload: vec![0; 8],
            ..FragmentSpec::default()
        }
        .build();
        let info = inspect_moof(&moof_of(&tfhd_default), 7).unwrap();
        assert_eq!(info.duration, 4 * 1024);

        let trex_default = FragmentSpec {
            track_id: 2,
            sample_durations: vec![0; 4],
            omit_sample_durations: true,
            payload: vec![0; 8],
            ..FragmentSpec::default()
        }
        .build();
        let info = inspect_moof(&moof_of(&trex_default), 7).unwrap();
        assert_eq!(info.duration, 28);
        assert_eq!(info.base_media_decode_time, Some(0));
    }

    #[test]
    fn rewrite_patches_ids_times_and_base_offset() {
        let fragment = FragmentSpec {
            sequence_number: 9,
            track_id: 5,
            decode_time: Some(48_000),
            sample_durations: vec![1024, 1024],
            payload: vec![1; 16],
            explicit_base_data_offset: Some(500),
            ..FragmentSpec::default()
        }
        .build();
        let mut moof = moof_of(&fragment);
        rewrite_moof(
            &mut moof,
            &FragmentRewrite {
                track_id: 2,
                sequence_number: 1,
                decode_time_offset: 47_000,
                data_offset_shift: -100,
            },
        )
        .unwrap();

        let info = inspect_moof(&moof, 0).unwrap();
        assert_eq!(info.track_id, 2);
        assert_eq!(info.sequence_number, 1);
        assert_eq!(info.base_media_decode_time, Some(1000));

        let root = moof_root(&moof).unwrap();
        let traf = single_traf(&moof, &root).unwrap();
        let tfhd = find_first_box(&moof, traf.body_start, traf.body_end, *b"tfhd").unwrap();
        assert_eq!(parse_tfhd(&moof, &tfhd).unwrap().base_data_offset, Some(400));
    }

    #[test]
    fn rewrite_rejects_negative_decode_time() {
        let fragment = make_fragment(1, 1, 10, &[5], b"x");
        let mut moof = moof_of(&fragment);
        let err = rewrite_moof(
            &mut moof,
            &FragmentRewrite {
                track_id: 1,
                sequence_number: 1,
                decode_time_offset: 11,
                data_offset_shift: 0,
            },
        )
        .unwrap_err();
        assert!(matches!(err, Mp4Error::Malformed(_)));
    }

    #[test]
    fn multi_track_fragment_is_rejected() {
        let mfhd = make_full_box(b"mfhd", 0, 0, &1u32.to_be_bytes());
        let tfhd = make_full_box(b"tfhd", 0, 0, &1u32.to_be_bytes());
        let traf = make_box(b"traf", &tfhd);
        let mut body = mfhd;
        body.extend_from_slice(&traf);
        body.extend_from_slice(&traf);
        let moof = make_box(b"moof", &body);
        let err = inspect_moof(&moof, 0).unwrap_err();
        assert!(err.to_string().contains("more than one"), "{err}");
    }

    #[test]
    fn truncated_trun_is_rejected() {
        let fragment = make_fragment(1, 1, 0, &[10, 10], b"ab");
        let mut moof = moof_of(&fragment);
        // claim far more samples than the table holds
        let root = moof_root(&moof).unwrap();
        let traf = single_traf(&moof, &root).unwrap();
        let trun = find_first_box(&moof, traf.body_start, traf.body_end, *b"trun").unwrap();
        write_u32(&mut moof, trun.body_start + 4, 1000).unwrap();
        assert!(inspect_moof(&moof, 0).is_err());
    }
}
