use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error_codes::{CodedError, METADATA_INSUFFICIENT, METADATA_UNAVAILABLE};
use crate::segments::ParseStats;

/// What to do with an item whose timeline cannot be reconstructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingMetadataPolicy {
    /// Fail the item; nothing is written.
    #[default]
    Error,
    /// Hand the item to the plain conversion path without overlay or subtitles.
    SkipBurninConvert,
    /// Count the item as handled and write nothing.
    SkipFile,
}

impl MissingMetadataPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::SkipBurninConvert => "skip_burnin_convert",
            Self::SkipFile => "skip_file",
        }
    }
}

impl FromStr for MissingMetadataPolicy {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "error" => Ok(Self::Error),
            "skip_burnin_convert" => Ok(Self::SkipBurninConvert),
            "skip_file" => Ok(Self::SkipFile),
            other => Err(anyhow!(
                "unknown missing-metadata policy '{other}' (expected error, skip_burnin_convert or skip_file)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineState {
    /// The segment list is usable.
    Proceed,
    /// Segments were built but too few to show a changing timestamp.
    Insufficient,
    /// No source yielded any rows.
    Unavailable,
}

impl TimelineState {
    pub fn classify(rows_available: bool, segment_count: usize, min_segments: usize) -> Self {
        if !rows_available {
            Self::Unavailable
        } else if segment_count < min_segments {
            Self::Insufficient
        } else {
            Self::Proceed
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Proceed => "proceed",
            Self::Insufficient => "insufficient",
            Self::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for TimelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Render,
    DelegatePlainConvert,
    Skip,
}

/// Maps a timeline state onto the caller's policy. `Err` only for `policy = error`.
pub fn decide(
    state: TimelineState,
    policy: MissingMetadataPolicy,
    stats: &ParseStats,
    min_segments: usize,
) -> Result<PolicyDecision> {
    if state == TimelineState::Proceed {
        return Ok(PolicyDecision::Render);
    }

    match policy {
        MissingMetadataPolicy::Error => {
            let details = json!({
                "state": state.as_str(),
                "raw_rows": stats.raw_rows,
                "valid_rows": stats.valid_rows,
                "segment_count": stats.segment_count,
                "min_segments": min_segments,
            });
            let error = match state {
                TimelineState::Unavailable => CodedError::metadata(
                    METADATA_UNAVAILABLE,
                    "no metadata source yielded recording date/time rows",
                ),
                _ => CodedError::metadata(
                    METADATA_INSUFFICIENT,
                    format!(
                        "only {} segment(s) could be built, need at least {}",
                        stats.segment_count, min_segments
                    ),
                ),
            };
            Err(error.with_details(details).into())
        }
        MissingMetadataPolicy::SkipBurninConvert => Ok(PolicyDecision::DelegatePlainConvert),
        MissingMetadataPolicy::SkipFile => Ok(PolicyDecision::Skip),
    }
}
