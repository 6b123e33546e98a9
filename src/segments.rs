use std::collections::HashSet;
use std::ops::Deref;

use anyhow::{bail, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::FrameRate;
use crate::normalize::NormalizedFrame;

/// A maximal run of consecutive frames sharing one recording date/time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    pub start_sec: f64,
    pub end_sec: f64,
    pub date_part: String,
    pub time_part: String,
}

impl Segment {
    pub fn key(&self) -> String {
        format!("{} {}", self.date_part, self.time_part)
    }

    pub fn duration(&self) -> f64 {
        self.end_sec - self.start_sec
    }
}

/// Ordered, immutable segmentation shared by both projectors.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SegmentList(Vec<Segment>);

impl SegmentList {
    /// Wraps segments built elsewhere, checking the ordering invariants.
    pub fn new(segments: Vec<Segment>) -> Result<Self> {
        for (index, segment) in segments.iter().enumerate() {
            let finite = segment.start_sec.is_finite() && segment.end_sec.is_finite();
            if !finite || segment.start_sec >= segment.end_sec {
                bail!(
                    "segment {index} must start before it ends ({} >= {})",
                    segment.start_sec,
                    segment.end_sec
                );
            }
            if index > 0 && segment.start_sec < segments[index - 1].start_sec {
                bail!("segment {index} starts before the segment preceding it");
            }
        }
        Ok(Self(segments))
    }

    pub fn as_slice(&self) -> &[Segment] {
        &self.0
    }

    /// SHA-256 over every segment boundary and key, hex encoded.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for segment in &self.0 {
            hasher.update(segment.start_sec.to_bits().to_le_bytes());
            hasher.update(segment.end_sec.to_bits().to_le_bytes());
            hasher.update(segment.date_part.as_bytes());
            hasher.update([0u8]);
            hasher.update(segment.time_part.as_bytes());
            hasher.update([0u8]);
        }
        hasher
            .finalize()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }
}

impl Deref for SegmentList {
    type Target = [Segment];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'a> IntoIterator for &'a SegmentList {
    type Item = &'a Segment;
    type IntoIter = std::slice::Iter<'a, Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Diagnostic counters for one item, threaded through the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseStats {
    pub raw_rows: usize,
    pub valid_rows: usize,
    pub skipped_rows: usize,
    pub unique_dt_keys: usize,
    pub segment_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentBuild {
    pub segments: SegmentList,
    pub unique_keys: usize,
    /// Zero-length runs dropped because a later key shared their start time.
    pub collapsed: usize,
}

struct OpenRun {
    segment: Segment,
    key: String,
    last_frame_time: f64,
}

impl OpenRun {
    fn start(frame: &NormalizedFrame, key: String) -> Self {
        Self {
            segment: Segment {
                start_sec: frame.scene_time,
                end_sec: frame.scene_time,
                date_part: frame.date_part.clone(),
                time_part: frame.time_part.clone(),
            },
            key,
            last_frame_time: frame.scene_time,
        }
    }
}

/// Collapses consecutive frames with the same key into segments.
///
/// Each segment ends where the next key starts; the last one ends one frame
/// after its last frame. The reader's order is trusted and never re-sorted.
pub fn build_segments(frames: &[NormalizedFrame], frame_rate: FrameRate) -> SegmentBuild {
    let mut segments: Vec<Segment> = Vec::new();
    let mut keys = HashSet::new();
    let mut collapsed = 0;
    let mut open: Option<OpenRun> = None;

    for frame in frames {
        let key = format!("{} {}", frame.date_part, frame.time_part);
        if let Some(run) = open.as_mut().filter(|run| run.key == key) {
            run.last_frame_time = frame.scene_time;
            continue;
        }

        if let Some(mut run) = open.take() {
            run.segment.end_sec = frame.scene_time;
            if run.segment.end_sec > run.segment.start_sec {
                segments.push(run.segment);
            } else {
                collapsed += 1;
                // Dropping the empty run can leave two runs of one key adjacent.
                if segments.last().is_some_and(|last| last.key() == key) {
                    if let Some(segment) = segments.pop() {
                        open = Some(OpenRun {
                            segment,
                            key,
                            last_frame_time: frame.scene_time,
                        });
                        continue;
                    }
                }
            }
        }

        keys.insert(key.clone());
        open = Some(OpenRun::start(frame, key));
    }

    if let Some(mut run) = open {
        run.segment.end_sec = run.last_frame_time + frame_rate.frame_step();
        segments.push(run.segment);
    }

    SegmentBuild {
        segments: SegmentList(segments),
        unique_keys: keys.len(),
        collapsed,
    }
}
