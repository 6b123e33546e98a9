use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::reader::{LoadedSource, SourceKind};

const MARKUP_EXTENSIONS: [&str; 1] = ["xml"];
const STRUCTURED_EXTENSIONS: [&str; 1] = ["json"];
const LOG_EXTENSIONS: [&str; 2] = ["log", "txt"];

/// Candidate raw metadata files for one media item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataSources {
    #[serde(default)]
    pub markup: Option<PathBuf>,
    #[serde(default)]
    pub structured: Option<PathBuf>,
    #[serde(default)]
    pub log: Option<PathBuf>,
}

impl MetadataSources {
    pub fn path(&self, kind: SourceKind) -> Option<&Path> {
        match kind {
            SourceKind::Markup => self.markup.as_deref(),
            SourceKind::Structured => self.structured.as_deref(),
            SourceKind::Log => self.log.as_deref(),
        }
    }

    fn slot_mut(&mut self, kind: SourceKind) -> &mut Option<PathBuf> {
        match kind {
            SourceKind::Markup => &mut self.markup,
            SourceKind::Structured => &mut self.structured,
            SourceKind::Log => &mut self.log,
        }
    }

    /// Fills unset slots with sidecar files found next to the media file.
    ///
    /// For `tape.avi` the markup candidates are `tape.avi.xml` then `tape.xml`.
    pub fn discover(mut self, media_path: &Path) -> Self {
        for kind in [SourceKind::Markup, SourceKind::Structured, SourceKind::Log] {
            if self.path(kind).is_none() {
                *self.slot_mut(kind) = find_sidecar(media_path, extensions_for(kind));
            }
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.markup.is_none() && self.structured.is_none() && self.log.is_none()
    }

    /// Reads one source. Bytes that are not valid UTF-8 are replaced rather
    /// than failing the whole source.
    pub fn load(&self, kind: SourceKind) -> LoadedSource {
        let path = self.path(kind)?;
        let text = fs::read(path)
            .with_context(|| format!("failed to read {} source {}", kind, path.display()))
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
        Some((Some(path.to_path_buf()), text))
    }
}

fn extensions_for(kind: SourceKind) -> &'static [&'static str] {
    match kind {
        SourceKind::Markup => &MARKUP_EXTENSIONS,
        SourceKind::Structured => &STRUCTURED_EXTENSIONS,
        SourceKind::Log => &LOG_EXTENSIONS,
    }
}

fn find_sidecar(media_path: &Path, extensions: &[&str]) -> Option<PathBuf> {
    let parent = media_path.parent().unwrap_or_else(|| Path::new(""));
    let file_name = media_path.file_name()?.to_string_lossy().into_owned();
    let stem = media_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned());

    extensions
        .iter()
        .flat_map(|extension| {
            let mut names = vec![format!("{file_name}.{extension}")];
            if let Some(stem) = stem.as_deref() {
                if stem != file_name {
                    names.push(format!("{stem}.{extension}"));
                }
            }
            names
        })
        .map(|name| parent.join(name))
        .find(|candidate| candidate.is_file() && candidate != media_path)
}

/// Scratch file next to `destination`, unique per destination and process.
pub fn scratch_path_for(destination: &Path) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(destination.to_string_lossy().as_bytes());
    hasher.update(process::id().to_le_bytes());
    let digest = hasher.finalize();
    let tag = digest
        .iter()
        .take(6)
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();

    let file_name = destination
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_owned());
    destination.with_file_name(format!(".{file_name}.{tag}.partial"))
}
