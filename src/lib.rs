//! Rebuilds the recording date/time timeline of a digitized camcorder tape
//! and projects it into an overlay-command timeline and an ASS subtitle track
//! that describe exactly the same segmentation.

pub mod batch;
pub mod config;
pub mod error_codes;
pub mod logging;
pub mod normalize;
pub mod overlay;
pub mod pipeline;
pub mod policy;
pub mod reader;
pub mod segments;
pub mod sources;
pub mod subtitles;
