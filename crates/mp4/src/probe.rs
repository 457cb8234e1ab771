//! Read-only summary of a fragmented file: its tracks and every fragment.

use std::fs;
use std::ops::Range;
use std::path::Path;

use crate::box_utils::children;
use crate::error::{Mp4Error, Result};
use crate::fragment::{inspect_moof, sample_data};
use crate::isobmff::{MovieInfo, parse_movie};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbedFragment {
    pub moof_offset: usize,
    pub track_id: u32,
    pub sequence_number: u32,
    pub base_media_decode_time: Option<u64>,
    /// In the track's media timescale.
    pub duration: u64,
    pub sample_count: u32,
    pub explicit_base_data_offset: Option<u64>,
    /// Byte range of the fragment's samples within the probed data.
    pub payload_range: Range<usize>,
}

#[derive(Debug, Clone)]
pub struct Probe {
    pub major_brand: Option<[u8; 4]>,
    pub movie: MovieInfo,
    pub fragments: Vec<ProbedFragment>,
}

impl Probe {
    /// Summed fragment durations of one track, in seconds.
    pub fn track_duration_secs(&self, track_id: u32) -> Option<f64> {
        let track = self.movie.tracks.iter().find(|t| t.track_id == track_id)?;
        let total: u64 = self
            .fragments
            .iter()
            .filter(|f| f.track_id == track_id)
            .map(|f| f.duration)
            .sum();
        Some(total as f64 / f64::from(track.timescale))
    }
}

pub fn probe_file(path: &Path) -> Result<Probe> {
    probe(&fs::read(path)?)
}

pub fn probe(data: &[u8]) -> Result<Probe> {
    let boxes = children(data, 0, data.len())
        .ok_or_else(|| Mp4Error::malformed("top-level box overruns the data"))?;

    let major_brand = boxes
        .iter()
        .find(|b| b.fourcc == *b"ftyp" && b.body_end - b.body_start >= 4)
        .map(|b| {
            let mut brand = [0u8; 4];
            brand.copy_from_slice(&data[b.body_start..b.body_start + 4]);
            brand
        });

    let moov = boxes
        .iter()
        .find(|b| b.fourcc == *b"moov")
        .ok_or_else(|| Mp4Error::malformed("no moov box"))?;
    let movie = parse_movie(&data[moov.start..moov.end])?;

    let mut fragments = Vec::new();
    for view in boxes.iter().filter(|b| b.fourcc == *b"moof") {
        let moof = &data[view.start..view.end];
        // probe the track id first to pick the right trex default
        let track_id = inspect_moof(moof, 0)?.track_id;
        let default_duration = movie
            .tracks
            .iter()
            .find(|t| t.track_id == track_id)
            .map(|t| t.default_sample_duration)
            .ok_or_else(|| {
                Mp4Error::malformed(format!(
                    "fragment at {} references unknown track {track_id}",
                    view.start
                ))
            })?;
        let info = inspect_moof(moof, default_duration)?;
        let samples = sample_data(moof)?;

        let base = samples
            .base_data_offset
            .map(|base| base as i128)
            .unwrap_or(view.start as i128);
        let start = base + i128::from(samples.data_offset.unwrap_or(view.size as i32 + 8));
        let end = start + i128::from(samples.len);
        if start < 0 || end > data.len() as i128 {
            return Err(Mp4Error::malformed(format!(
                "samples of fragment at {} fall outside the data",
                view.start
            )));
        }
        // sample data must land inside one mdat
        let in_mdat = boxes.iter().any(|b| {
            b.fourcc == *b"mdat" && b.body_start as i128 <= start && end <= b.body_end as i128
        });
        if !in_mdat {
            return Err(Mp4Error::malformed(format!(
                "samples of fragment at {} are not inside an mdat",
                view.start
            )));
        }

        fragments.push(ProbedFragment {
            moof_offset: view.start,
            track_id: info.track_id,
            sequence_number: info.sequence_number,
            base_media_decode_time: info.base_media_decode_time,
            duration: info.duration,
            sample_count: info.sample_count,
            explicit_base_data_offset: samples.base_data_offset,
            payload_range: start as usize..end as usize,
        });
    }

    Ok(Probe {
        major_brand,
        movie,
        fragments,
    })
}
