use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{FrameRate, PipelineConfig};
use crate::error_codes::{CodedError, CONFIG_MISSING_OUTPUT_PATH};
use crate::normalize::normalize;
use crate::overlay::overlay_document;
use crate::policy::{decide, PolicyDecision, TimelineState};
use crate::reader::{select_source, ReadOutcome, ReaderOptions, SourceAttempt, SourceKind};
use crate::segments::{build_segments, ParseStats, SegmentList};
use crate::sources::{scratch_path_for, MetadataSources};
use crate::subtitles::subtitle_document;

/// One media file and where its two artifacts go.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MediaItem {
    pub media: PathBuf,
    #[serde(default)]
    pub markup: Option<PathBuf>,
    #[serde(default)]
    pub structured: Option<PathBuf>,
    #[serde(default)]
    pub log: Option<PathBuf>,
    #[serde(default)]
    pub overlay: Option<PathBuf>,
    #[serde(default)]
    pub subtitles: Option<PathBuf>,
}

impl MediaItem {
    /// Explicit sources, with sidecars next to the media filling the gaps.
    pub fn sources(&self) -> MetadataSources {
        MetadataSources {
            markup: self.markup.clone(),
            structured: self.structured.clone(),
            log: self.log.clone(),
        }
        .discover(&self.media)
    }
}

/// Everything learned while rebuilding one item's timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    pub source: Option<SourceKind>,
    pub attempts: Vec<SourceAttempt>,
    pub below_threshold: bool,
    pub segments: SegmentList,
    pub stats: ParseStats,
    pub state: TimelineState,
    pub resets: usize,
}

/// Reader, normalizer and segment builder, in that order.
pub fn reconstruct_timeline(
    sources: &MetadataSources,
    config: &PipelineConfig,
    frame_rate: FrameRate,
) -> Timeline {
    let options = ReaderOptions {
        log_index_base: config.log_index_base,
        markup_index_base: config.markup_index_base,
    };
    let outcome = select_source(
        sources,
        &config.source_priority,
        config.min_source_rows,
        &options,
    );

    let (source, records, below_threshold, attempts) = match outcome {
        ReadOutcome::Selected {
            kind,
            records,
            below_threshold,
            attempts,
        } => (Some(kind), records, below_threshold, attempts),
        ReadOutcome::NoMetadata { attempts } => (None, Vec::new(), false, attempts),
    };

    let normalized = normalize(&records, frame_rate);
    let build = build_segments(&normalized.frames, frame_rate);
    let stats = ParseStats {
        raw_rows: records.len(),
        valid_rows: normalized.frames.len(),
        skipped_rows: normalized.skipped,
        unique_dt_keys: build.unique_keys,
        segment_count: build.segments.len(),
    };
    let state =
        TimelineState::classify(source.is_some(), stats.segment_count, config.min_segments);

    Timeline {
        source,
        attempts,
        below_threshold,
        segments: build.segments,
        stats,
        state,
        resets: normalized.resets,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Overlay timeline and subtitles were written.
    Rendered,
    /// The caller should run a plain conversion without burn-in.
    DelegatePlainConvert,
    /// Handled; nothing produced.
    Skipped,
}

impl From<PolicyDecision> for ItemOutcome {
    fn from(decision: PolicyDecision) -> Self {
        match decision {
            PolicyDecision::Render => Self::Rendered,
            PolicyDecision::DelegatePlainConvert => Self::DelegatePlainConvert,
            PolicyDecision::Skip => Self::Skipped,
        }
    }
}

impl ItemOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rendered => "rendered",
            Self::DelegatePlainConvert => "delegate_plain_convert",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub media: PathBuf,
    pub source: Option<SourceKind>,
    pub attempts: Vec<SourceAttempt>,
    pub stats: ParseStats,
    pub state: TimelineState,
    pub outcome: ItemOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitles_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_digest: Option<String>,
    pub timecode_resets: usize,
    pub finished_at: String,
}

pub fn process_item(item: &MediaItem, config: &PipelineConfig) -> Result<ItemReport> {
    let frame_rate = config.validate()?;
    let overlay_path = required_output(item.overlay.as_deref(), "overlay", &item.media)?;
    let subtitles_path = required_output(item.subtitles.as_deref(), "subtitles", &item.media)?;

    let timeline = reconstruct_timeline(&item.sources(), config, frame_rate);
    let decision = decide(
        timeline.state,
        config.missing_metadata,
        &timeline.stats,
        config.min_segments,
    );
    let planned = match &decision {
        Ok(decision) => ItemOutcome::from(*decision).as_str(),
        Err(_) => "error",
    };
    log_summary(&item.media, &timeline, planned);
    let decision = decision
        .with_context(|| format!("cannot burn in timestamps for {}", item.media.display()))?;

    let mut report = ItemReport {
        media: item.media.clone(),
        source: timeline.source,
        attempts: timeline.attempts.clone(),
        stats: timeline.stats,
        state: timeline.state,
        outcome: ItemOutcome::from(decision),
        overlay_path: None,
        subtitles_path: None,
        segment_digest: None,
        timecode_resets: timeline.resets,
        finished_at: String::new(),
    };

    if decision == PolicyDecision::Render {
        let overlay = overlay_document(&timeline.segments, config.layout, &config.overlay);
        let subtitles = subtitle_document(
            &timeline.segments,
            config.layout,
            config.single_line_style,
            &config.subtitle_style,
        );
        write_artifacts(&[
            (overlay_path, overlay.as_str()),
            (subtitles_path, subtitles.as_str()),
        ])?;

        report.overlay_path = Some(overlay_path.to_path_buf());
        report.subtitles_path = Some(subtitles_path.to_path_buf());
        report.segment_digest = Some(timeline.segments.digest());
    }

    debug!(
        media = %item.media.display(),
        outcome = report.outcome.as_str(),
        "finished item"
    );
    report.finished_at = Local::now().to_rfc3339();
    Ok(report)
}

fn required_output<'a>(path: Option<&'a Path>, label: &str, media: &Path) -> Result<&'a Path> {
    path.filter(|path| !path.as_os_str().is_empty()).ok_or_else(|| {
        CodedError::configuration(
            CONFIG_MISSING_OUTPUT_PATH,
            format!("no {label} output path for {}", media.display()),
        )
        .into()
    })
}

fn log_summary(media: &Path, timeline: &Timeline, outcome: &str) {
    let stats = &timeline.stats;
    let source = timeline.source.map_or("none", SourceKind::as_str);
    if timeline.state == TimelineState::Proceed {
        info!(
            media = %media.display(),
            source,
            raw_rows = stats.raw_rows,
            valid_rows = stats.valid_rows,
            skipped_rows = stats.skipped_rows,
            unique_dt_keys = stats.unique_dt_keys,
            segment_count = stats.segment_count,
            state = timeline.state.as_str(),
            outcome,
            "rebuilt recording date/time timeline"
        );
    } else {
        warn!(
            media = %media.display(),
            source,
            raw_rows = stats.raw_rows,
            valid_rows = stats.valid_rows,
            skipped_rows = stats.skipped_rows,
            unique_dt_keys = stats.unique_dt_keys,
            segment_count = stats.segment_count,
            state = timeline.state.as_str(),
            outcome,
            "recording date/time timeline is not usable"
        );
    }
}

/// Stages every artifact in a scratch file, then renames them into place.
///
/// On failure no destination written by this call is left behind.
fn write_artifacts(artifacts: &[(&Path, &str)]) -> Result<()> {
    let mut staged: Vec<(PathBuf, &Path)> = Vec::with_capacity(artifacts.len());

    for (destination, contents) in artifacts {
        let scratch = scratch_path_for(destination);
        let written = ensure_parent(destination).and_then(|()| {
            fs::write(&scratch, contents)
                .with_context(|| format!("failed to write {}", scratch.display()))
        });
        if let Err(error) = written {
            let _ = fs::remove_file(&scratch);
            discard(&staged);
            return Err(error);
        }
        staged.push((scratch, *destination));
    }

    for (index, (scratch, destination)) in staged.iter().enumerate() {
        if let Err(error) = fs::rename(scratch, destination) {
            // Artifacts land together or not at all.
            for (_, placed) in &staged[..index] {
                let _ = fs::remove_file(placed);
            }
            discard(&staged[index..]);
            return Err(error).with_context(|| {
                format!("failed to move artifact into {}", destination.display())
            });
        }
    }
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory {}", parent.display())),
        _ => Ok(()),
    }
}

fn discard(staged: &[(PathBuf, &Path)]) {
    for (scratch, _) in staged {
        let _ = fs::remove_file(scratch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_codes::{find_coded_error, CONFIG_MISSING_FRAME_RATE};
    use crate::policy::MissingMetadataPolicy;
    use tempfile::tempdir;

    fn config() -> PipelineConfig {
        PipelineConfig {
            frame_rate: Some(FrameRate::new(30.0).unwrap()),
            min_source_rows: 1,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn missing_output_path_is_a_configuration_error() {
        let item = MediaItem {
            media: PathBuf::from("tape.avi"),
            overlay: Some(PathBuf::from("tape.cmd")),
            ..MediaItem::default()
        };
        let error = process_item(&item, &config()).unwrap_err();
        assert_eq!(
            find_coded_error(&error).unwrap().code,
            CONFIG_MISSING_OUTPUT_PATH
        );
    }

    #[test]
    fn missing_frame_rate_fails_before_reading() {
        let item = MediaItem {
            media: PathBuf::from("tape.avi"),
            ..MediaItem::default()
        };
        let error = process_item(&item, &PipelineConfig::default()).unwrap_err();
        assert_eq!(
            find_coded_error(&error).unwrap().code,
            CONFIG_MISSING_FRAME_RATE
        );
    }

    #[test]
    fn timeline_counts_skipped_rows() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("tape.log");
        fs::write(
            &log,
            "1 00:00:00;00 2025-01-01 08:00:00\n2 00:00:00;01 XXXX XX\n31 00:00:01;00 2025-01-01 08:00:01\n",
        )
        .unwrap();
        let sources = MetadataSources {
            log: Some(log),
            ..MetadataSources::default()
        };
        let timeline =
            reconstruct_timeline(&sources, &config(), FrameRate::new(30.0).unwrap());
        assert_eq!(timeline.source, Some(SourceKind::Log));
        assert_eq!(
            timeline.stats,
            ParseStats {
                raw_rows: 3,
                valid_rows: 2,
                skipped_rows: 1,
                unique_dt_keys: 2,
                segment_count: 2,
            }
        );
        assert_eq!(timeline.state, TimelineState::Proceed);
    }

    #[test]
    fn skip_file_policy_writes_nothing() {
        let dir = tempdir().unwrap();
        let item = MediaItem {
            media: dir.path().join("tape.avi"),
            overlay: Some(dir.path().join("out/tape.cmd")),
            subtitles: Some(dir.path().join("out/tape.ass")),
            ..MediaItem::default()
        };
        let config = PipelineConfig {
            missing_metadata: MissingMetadataPolicy::SkipFile,
            ..config()
        };
        let report = process_item(&item, &config).unwrap();
        assert_eq!(report.outcome, ItemOutcome::Skipped);
        assert_eq!(report.state, TimelineState::Unavailable);
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn failed_rename_removes_artifacts_already_placed() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("tape.cmd");
        let blocked = dir.path().join("tape.ass");
        fs::create_dir(&blocked).unwrap();
        fs::write(blocked.join("keep"), "occupied").unwrap();

        assert!(write_artifacts(&[(&first, "one"), (&blocked, "two")]).is_err());
        assert!(!first.exists());
        assert!(blocked.join("keep").is_file());
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".partial"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn write_artifacts_leaves_no_scratch_files() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("nested/a.txt");
        let second = dir.path().join("b.txt");
        write_artifacts(&[(&first, "one"), (&second, "two")]).unwrap();
        assert_eq!(fs::read_to_string(&first).unwrap(), "one");
        assert_eq!(fs::read_to_string(&second).unwrap(), "two");
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".partial"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
