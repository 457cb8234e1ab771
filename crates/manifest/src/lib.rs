//! Segmented media manifest model.
//!
//! A manifest describes the video and audio renditions of one media source and
//! where their segments live. This crate turns the raw JSON document into an
//! immutable [`Manifest`], selects renditions by typed quality keys and
//! resolves absolute segment URLs with RFC 3986 reference resolution.

pub mod error;
pub mod manifest;
mod raw;
pub mod rendition;
pub mod source;

pub use error::{ManifestError, Result};
pub use manifest::Manifest;
pub use rendition::{Rendition, RenditionId, Segment, Selection, TrackKind};
pub use source::{SourceStatus, SourceVideo};
