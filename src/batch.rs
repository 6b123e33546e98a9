use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{ConfigOverrides, PipelineConfig};
use crate::pipeline::{process_item, ItemOutcome, ItemReport, MediaItem};

pub const OVERLAY_SUFFIX: &str = "rdt.cmd";
pub const SUBTITLES_SUFFIX: &str = "rdt.ass";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchFile {
    #[serde(default)]
    pub config: PipelineConfig,
    /// Where artifacts go for items that do not name their own paths.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub items: Vec<MediaItem>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub rendered: usize,
    pub delegated: usize,
    pub skipped: usize,
    pub items: Vec<ItemReport>,
}

pub fn load_batch_file(path: &Path) -> Result<BatchFile> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read batch file {}", path.display()))?;
    if text.trim().is_empty() {
        return Ok(BatchFile::default());
    }
    let mut batch: BatchFile = serde_yaml::from_str(&text)
        .with_context(|| format!("failed to parse batch yaml at {}", path.display()))?;

    let base_dir = path
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    resolve_batch_paths(&mut batch, &base_dir);
    Ok(batch)
}

/// Makes relative paths relative to the batch file and fills in default outputs.
pub fn resolve_batch_paths(batch: &mut BatchFile, base_dir: &Path) {
    let output_dir = batch
        .output_dir
        .as_deref()
        .map(|dir| resolve_against(base_dir, dir));

    for item in &mut batch.items {
        item.media = resolve_against(base_dir, &item.media);
        for slot in [
            &mut item.markup,
            &mut item.structured,
            &mut item.log,
            &mut item.overlay,
            &mut item.subtitles,
        ] {
            if let Some(path) = slot.as_mut() {
                *path = resolve_against(base_dir, path);
            }
        }

        if let Some(dir) = output_dir.as_deref() {
            let stem = item
                .media
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "item".to_owned());
            item.overlay
                .get_or_insert_with(|| dir.join(format!("{stem}.{OVERLAY_SUFFIX}")));
            item.subtitles
                .get_or_insert_with(|| dir.join(format!("{stem}.{SUBTITLES_SUFFIX}")));
        }
    }
    batch.output_dir = output_dir;
}

fn resolve_against(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Processes items one after another. The first failing item stops the batch.
pub fn run_batch(batch: &BatchFile, overrides: &ConfigOverrides) -> Result<BatchSummary> {
    let mut config = batch.config.clone();
    config.apply_overrides(overrides);
    config.validate()?;

    if batch.items.is_empty() {
        bail!("batch lists no items");
    }

    let mut summary = BatchSummary::default();
    for (index, item) in batch.items.iter().enumerate() {
        info!(
            item = index + 1,
            total = batch.items.len(),
            media = %item.media.display(),
            "processing batch item"
        );
        let report = process_item(item, &config).with_context(|| {
            format!(
                "batch item {} ({}) failed",
                index + 1,
                item.media.display()
            )
        })?;
        match report.outcome {
            ItemOutcome::Rendered => summary.rendered += 1,
            ItemOutcome::DelegatePlainConvert => summary.delegated += 1,
            ItemOutcome::Skipped => summary.skipped += 1,
        }
        summary.items.push(report);
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::MissingMetadataPolicy;
    use tempfile::tempdir;

    #[test]
    fn batch_paths_resolve_against_the_batch_file() {
        let dir = tempdir().unwrap();
        let batch_path = dir.path().join("batch.yaml");
        fs::write(
            &batch_path,
            r#"
config:
  frame_rate: 25
  missing_metadata: skip_file
output_dir: out
items:
  - media: tapes/one.avi
    log: logs/one.log
  - media: /abs/two.avi
    overlay: custom.cmd
"#,
        )
        .unwrap();

        let batch = load_batch_file(&batch_path).unwrap();
        assert_eq!(batch.config.missing_metadata, MissingMetadataPolicy::SkipFile);
        assert_eq!(batch.items[0].media, dir.path().join("tapes/one.avi"));
        assert_eq!(batch.items[0].log, Some(dir.path().join("logs/one.log")));
        assert_eq!(
            batch.items[0].overlay,
            Some(dir.path().join("out/one.rdt.cmd"))
        );
        assert_eq!(batch.items[1].media, PathBuf::from("/abs/two.avi"));
        assert_eq!(batch.items[1].overlay, Some(dir.path().join("custom.cmd")));
        assert_eq!(
            batch.items[1].subtitles,
            Some(dir.path().join("out/two.rdt.ass"))
        );
    }

    #[test]
    fn empty_batch_is_rejected() {
        let batch = BatchFile {
            config: PipelineConfig {
                frame_rate: Some(crate::config::FrameRate::new(25.0).unwrap()),
                ..PipelineConfig::default()
            },
            ..BatchFile::default()
        };
        assert!(run_batch(&batch, &ConfigOverrides::default()).is_err());
    }

    #[test]
    fn unknown_item_fields_are_rejected() {
        let dir = tempdir().unwrap();
        let batch_path = dir.path().join("batch.yaml");
        fs::write(&batch_path, "items:\n  - media: a.avi\n    xml: a.xml\n").unwrap();
        assert!(load_batch_file(&batch_path).is_err());
    }
}
