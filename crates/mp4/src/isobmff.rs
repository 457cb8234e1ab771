//! Movie-level parsing for fMP4 initialization data.
//!
//! Reads just enough of `moov` to mux fragmented tracks: the movie timescale,
//! and per track its id, handler type, media timescale and `trex` defaults.

use tracing::debug;

use crate::box_utils::{
    box_at, find_first_box, find_path, fourcc_to_string, full_box_header, read_u32, write_u32,
};
use crate::error::{Mp4Error, Result};

/// Track description pulled from a `trak` plus its matching `trex`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackInfo {
    pub track_id: u32,
    pub handler: [u8; 4],
    /// Media timescale from `mdhd`, in units per second.
    pub timescale: u32,
    /// `trex.default_sample_duration`, used when fragments omit durations.
    pub default_sample_duration: u32,
}

impl TrackInfo {
    pub fn is_video(&self) -> bool {
        self.handler == *b"vide"
    }

    pub fn is_audio(&self) -> bool {
        self.handler == *b"soun"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovieInfo {
    /// Movie timescale from `mvhd`.
    pub timescale: u32,
    pub tracks: Vec<TrackInfo>,
}

/// Parse a complete `moov` box (header included).
pub fn parse_movie(moov: &[u8]) -> Result<MovieInfo> {
    let root = box_at(moov, 0, moov.len())
        .filter(|view| view.fourcc == *b"moov")
        .ok_or_else(|| Mp4Error::malformed("moov box is truncated"))?;

    let mvhd = find_first_box(moov, root.body_start, root.body_end, *b"mvhd")
        .ok_or_else(|| Mp4Error::malformed("moov has no mvhd"))?;
    let timescale = versioned_u32(moov, mvhd.body_start, mvhd.body_end)
        .ok_or_else(|| Mp4Error::malformed("mvhd is truncated"))?;

    let mvex = find_first_box(moov, root.body_start, root.body_end, *b"mvex")
        .ok_or_else(|| Mp4Error::malformed("moov has no mvex; input is not fragmented"))?;

    let mut tracks = Vec::new();
    let mut offset = root.body_start;
    while offset < root.body_end {
        let Some(child) = box_at(moov, offset, root.body_end) else {
            return Err(Mp4Error::malformed("moov child overruns its parent"));
        };
        if child.fourcc == *b"trak" {
            let mut track = parse_trak(moov, child.body_start, child.body_end)?;
            track.default_sample_duration =
                trex_default_duration(moov, mvex.body_start, mvex.body_end, track.track_id)
                    .ok_or_else(|| {
                        Mp4Error::malformed(format!("no trex for track {}", track.track_id))
                    })?;
            debug!(
                track_id = track.track_id,
                handler = %fourcc_to_string(&track.handler),
                timescale = track.timescale,
                "Parsed track"
            );
            tracks.push(track);
        }
        offset = child.end;
    }

    Ok(MovieInfo { timescale, tracks })
}

fn parse_trak(data: &[u8], start: usize, end: usize) -> Result<TrackInfo> {
    let tkhd = find_first_box(data, start, end, *b"tkhd")
        .ok_or_else(|| Mp4Error::malformed("trak has no tkhd"))?;
    let track_id = versioned_u32(data, tkhd.body_start, tkhd.body_end)
        .ok_or_else(|| Mp4Error::malformed("tkhd is truncated"))?;

    let mdhd = find_path(data, start, end, &[*b"mdia", *b"mdhd"])
        .ok_or_else(|| Mp4Error::malformed(format!("track {track_id} has no mdhd")))?;
    let timescale = versioned_u32(data, mdhd.body_start, mdhd.body_end)
        .filter(|ts| *ts > 0)
        .ok_or_else(|| Mp4Error::malformed(format!("track {track_id} has no usable timescale")))?;

    // hdlr: version/flags (4) + pre_defined (4) + handler_type (4)
    let hdlr = find_path(data, start, end, &[*b"mdia", *b"hdlr"])
        .ok_or_else(|| Mp4Error::malformed(format!("track {track_id} has no hdlr")))?;
    let handler = read_u32(data, hdlr.body_start + 8)
        .filter(|_| hdlr.body_start + 12 <= hdlr.body_end)
        .map(u32::to_be_bytes)
        .ok_or_else(|| Mp4Error::malformed("hdlr is truncated"))?;

    Ok(TrackInfo {
        track_id,
        handler,
        timescale,
        default_sample_duration: 0,
    })
}

/// `trex`: version/flags (4) + track_ID (4) + sample_description_index (4) +
/// default_sample_duration (4) + default_sample_size (4) + default_sample_flags (4)
fn trex_default_duration(data: &[u8], start: usize, end: usize, track_id: u32) -> Option<u32> {
    let mut offset = start;
    while offset < end {
        let child = box_at(data, offset, end)?;
        if child.fourcc == *b"trex"
            && child.body_end - child.body_start >= 24
            && read_u32(data, child.body_start + 4)? == track_id
        {
            return read_u32(data, child.body_start + 12);
        }
        offset = child.end;
    }
    None
}

/// The 32-bit field that `mvhd`, `tkhd` and `mdhd` all place right after
/// their creation/modification times: timescale for the headers, track_ID
/// for `tkhd`.
fn versioned_u32(data: &[u8], body_start: usize, body_end: usize) -> Option<u32> {
    let (version, _) = full_box_header(data, body_start)?;
    let pos = match version {
        0 => body_start + 12,
        1 => body_start + 20,
        _ => return None,
    };
    if pos + 4 > body_end {
        return None;
    }
    read_u32(data, pos)
}

/// Rewrite the track id inside a standalone `trak` box.
pub(crate) fn set_trak_track_id(trak: &mut [u8], track_id: u32) -> Result<()> {
    let tkhd = find_path(trak, 0, trak.len(), &[*b"trak", *b"tkhd"])
        .ok_or_else(|| Mp4Error::malformed("trak has no tkhd"))?;
    let (version, _) = full_box_header(trak, tkhd.body_start)
        .ok_or_else(|| Mp4Error::malformed("tkhd is truncated"))?;
    let pos = if version == 1 {
        tkhd.body_start + 20
    } else {
        tkhd.body_start + 12
    };
    write_u32(trak, pos, track_id).ok_or_else(|| Mp4Error::malformed("tkhd is truncated"))
}

/// Rewrite the track id inside a standalone `trex` box.
pub(crate) fn set_trex_track_id(trex: &mut [u8], track_id: u32) -> Result<()> {
    let view = box_at(trex, 0, trex.len())
        .filter(|view| view.fourcc == *b"trex")
        .ok_or_else(|| Mp4Error::malformed("trex is truncated"))?;
    write_u32(trex, view.body_start + 4, track_id)
        .ok_or_else(|| Mp4Error::malformed("trex is truncated"))
}

/// Rewrite `next_track_ID`, the last field of a standalone `mvhd` box.
pub(crate) fn set_mvhd_next_track_id(mvhd: &mut [u8], next_track_id: u32) -> Result<()> {
    let view = box_at(mvhd, 0, mvhd.len())
        .filter(|view| view.fourcc == *b"mvhd" && view.body_end - view.body_start >= 100)
        .ok_or_else(|| Mp4Error::malformed("mvhd is truncated"))?;
    write_u32(mvhd, view.body_end - 4, next_track_id)
        .ok_or_else(|| Mp4Error::malformed("mvhd is truncated"))
}

/// Copy of the `trex` box for `track_id` out of a `moov`.
pub(crate) fn trex_box(moov: &[u8], track_id: u32) -> Option<Vec<u8>> {
    let root = box_at(moov, 0, moov.len())?;
    let mvex = find_first_box(moov, root.body_start, root.body_end, *b"mvex")?;
    let mut offset = mvex.body_start;
    while offset < mvex.body_end {
        let child = box_at(moov, offset, mvex.body_end)?;
        if child.fourcc == *b"trex" && read_u32(moov, child.body_start + 4)? == track_id {
            return Some(moov[child.start..child.end].to_vec());
        }
        offset = child.end;
    }
    None
}
