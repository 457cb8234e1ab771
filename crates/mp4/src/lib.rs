//! # mp4
//!
//! Minimal fragmented-MP4 (ISOBMFF) support: just enough box parsing to read
//! track headers and movie fragments, rewrite fragment headers in place, and
//! mux a video-only and an audio-only fragmented file into one.

mod box_utils;
pub mod error;
pub mod fragment;
pub mod isobmff;
pub mod mux;
pub mod probe;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use error::{Mp4Error, Result};
pub use fragment::{FragmentInfo, FragmentRewrite, SampleData, inspect_moof, rewrite_moof};
pub use isobmff::{MovieInfo, TrackInfo, parse_movie};
pub use mux::{AUDIO_TRACK_ID, MuxOptions, MuxSummary, VIDEO_TRACK_ID, mux_files};
pub use probe::{Probe, ProbedFragment, probe, probe_file};
