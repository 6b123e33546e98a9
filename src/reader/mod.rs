//! Frame readers: turn the analysis tool's raw output into ordered
//! `(sequence_key, recording_date_time)` rows.
//!
//! Three concrete formats exist (markup, nested structured data, a
//! line-oriented log). [`select_source`] tries them in a configured
//! priority order and keeps the first one that yields enough rows.

pub mod log;
pub mod markup;
pub mod structured;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::IndexBase;
use crate::normalize::is_usable;
use crate::sources::MetadataSources;

#[derive(Debug, Clone, PartialEq)]
pub enum SequenceKey {
    /// Frame counter as written by the source, with the base it counts from.
    FrameIndex { index: u64, base: IndexBase },
    /// Playback position in `HH:MM:SS[.frac]` form, unparsed.
    Timecode(String),
    /// Playback position already expressed in seconds.
    Seconds(f64),
    /// A sequence field that was present but not numeric; the row is invalid.
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawFrameRecord {
    pub sequence_key: SequenceKey,
    pub recording_date_time: String,
}

impl RawFrameRecord {
    pub fn new(sequence_key: SequenceKey, recording_date_time: impl Into<String>) -> Self {
        Self {
            sequence_key,
            recording_date_time: recording_date_time.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Tag/attribute document (`<frame n=".." rdt=".."/>`).
    Markup,
    /// Nested JSON document.
    Structured,
    /// Whitespace-separated per-frame log.
    Log,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Markup => "markup",
            Self::Structured => "structured",
            Self::Log => "log",
        }
    }

    pub fn read(self, text: &str, options: &ReaderOptions) -> Result<Vec<RawFrameRecord>> {
        match self {
            Self::Markup => markup::read(text, options.markup_index_base),
            Self::Structured => structured::read(text),
            Self::Log => Ok(log::read(text, options.log_index_base)),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "markup" | "xml" => Ok(Self::Markup),
            "structured" | "json" => Ok(Self::Structured),
            "log" | "text" => Ok(Self::Log),
            other => Err(anyhow!("unknown metadata source kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReaderOptions {
    pub log_index_base: IndexBase,
    pub markup_index_base: IndexBase,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            log_index_base: IndexBase::One,
            markup_index_base: IndexBase::Zero,
        }
    }
}

/// What happened when one candidate source was tried.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceAttempt {
    pub kind: SourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Rows the reader extracted.
    pub rows: usize,
    /// Rows with a usable position and date/time; these decide selection.
    pub usable_rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Selected {
        kind: SourceKind,
        records: Vec<RawFrameRecord>,
        /// True when no source reached the row threshold and the richest one was kept.
        below_threshold: bool,
        attempts: Vec<SourceAttempt>,
    },
    NoMetadata {
        attempts: Vec<SourceAttempt>,
    },
}

impl ReadOutcome {
    pub fn attempts(&self) -> &[SourceAttempt] {
        match self {
            Self::Selected { attempts, .. } | Self::NoMetadata { attempts } => attempts,
        }
    }

    pub fn kind(&self) -> Option<SourceKind> {
        match self {
            Self::Selected { kind, .. } => Some(*kind),
            Self::NoMetadata { .. } => None,
        }
    }
}

/// Source as handed to the selector: `None` when it was not provided,
/// otherwise its path (if any) and the text or the read failure.
pub type LoadedSource = Option<(Option<PathBuf>, Result<String>)>;

pub fn select_source(
    sources: &MetadataSources,
    priority: &[SourceKind],
    min_rows: usize,
    options: &ReaderOptions,
) -> ReadOutcome {
    select_with(priority, min_rows, options, |kind| sources.load(kind))
}

/// Tries sources in `priority` order. Only usable rows count towards
/// `min_rows` and towards picking the richest fallback.
pub fn select_with<F>(
    priority: &[SourceKind],
    min_rows: usize,
    options: &ReaderOptions,
    mut load: F,
) -> ReadOutcome
where
    F: FnMut(SourceKind) -> LoadedSource,
{
    let mut attempts = Vec::with_capacity(priority.len());
    let mut best: Option<(SourceKind, Vec<RawFrameRecord>, usize)> = None;

    for &kind in priority {
        let (path, records, note) = match load(kind) {
            None => (None, Vec::new(), Some("not provided".to_owned())),
            Some((path, Err(error))) => (path, Vec::new(), Some(format!("unreadable: {error:#}"))),
            Some((path, Ok(text))) if text.trim().is_empty() => {
                (path, Vec::new(), Some("empty".to_owned()))
            }
            Some((path, Ok(text))) => match kind.read(&text, options) {
                Ok(records) => (path, records, None),
                Err(error) => (path, Vec::new(), Some(format!("parse error: {error:#}"))),
            },
        };

        let rows = records.len();
        let usable_rows = records.iter().filter(|record| is_usable(record)).count();
        let note = note.or_else(|| {
            (rows > 0 && usable_rows == 0).then(|| "no usable date/time rows".to_owned())
        });
        debug!(
            source = kind.as_str(),
            rows,
            usable_rows,
            note = note.as_deref(),
            "tried metadata source"
        );
        attempts.push(SourceAttempt {
            kind,
            path,
            rows,
            usable_rows,
            note,
        });

        if usable_rows >= min_rows {
            return ReadOutcome::Selected {
                kind,
                records,
                below_threshold: false,
                attempts,
            };
        }
        if usable_rows > best.as_ref().map_or(0, |(_, _, usable)| *usable) {
            best = Some((kind, records, usable_rows));
        }
    }

    match best {
        Some((kind, records, usable_rows)) => {
            warn!(
                source = kind.as_str(),
                usable_rows,
                min_rows,
                "no metadata source reached the row threshold; using the richest one"
            );
            ReadOutcome::Selected {
                kind,
                records,
                below_threshold: true,
                attempts,
            }
        }
        None => ReadOutcome::NoMetadata { attempts },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "1 00:00:00;00 2025-01-01 08:00:00\n2 00:00:00;01 2025-01-01 08:00:00\n";
    const MARKUP: &str = r#"<frames><frame n="0" rdt="2025-01-01 08:00:00"/></frames>"#;

    fn texts(
        markup: Option<&'static str>,
        log: Option<&'static str>,
    ) -> impl FnMut(SourceKind) -> LoadedSource {
        move |kind| {
            let text = match kind {
                SourceKind::Markup => markup,
                SourceKind::Log => log,
                SourceKind::Structured => None,
            }?;
            Some((None, Ok(text.to_owned())))
        }
    }

    const PRIORITY: [SourceKind; 3] = [SourceKind::Markup, SourceKind::Structured, SourceKind::Log];

    #[test]
    fn first_source_meeting_threshold_wins() {
        let outcome = select_with(
            &PRIORITY,
            1,
            &ReaderOptions::default(),
            texts(Some(MARKUP), Some(LOG)),
        );
        assert_eq!(outcome.kind(), Some(SourceKind::Markup));
        assert_eq!(outcome.attempts().len(), 1);
    }

    #[test]
    fn falls_through_to_source_meeting_threshold() {
        let outcome = select_with(
            &PRIORITY,
            2,
            &ReaderOptions::default(),
            texts(Some(MARKUP), Some(LOG)),
        );
        match outcome {
            ReadOutcome::Selected {
                kind,
                records,
                below_threshold,
                attempts,
            } => {
                assert_eq!(kind, SourceKind::Log);
                assert_eq!(records.len(), 2);
                assert!(!below_threshold);
                assert_eq!(attempts.len(), 3);
                assert_eq!(attempts[1].note.as_deref(), Some("not provided"));
            }
            other => panic!("expected a selected source, got {other:?}"),
        }
    }

    #[test]
    fn richest_source_is_kept_when_none_reaches_threshold() {
        let outcome = select_with(
            &PRIORITY,
            10,
            &ReaderOptions::default(),
            texts(Some(MARKUP), Some(LOG)),
        );
        match outcome {
            ReadOutcome::Selected {
                kind,
                below_threshold,
                ..
            } => {
                assert_eq!(kind, SourceKind::Log);
                assert!(below_threshold);
            }
            other => panic!("expected a selected source, got {other:?}"),
        }
    }

    #[test]
    fn unreadable_and_broken_sources_count_as_zero_rows() {
        let outcome = select_with(&PRIORITY, 1, &ReaderOptions::default(), |kind| match kind {
            SourceKind::Markup => Some((None, Ok("<frames><frame".to_owned()))),
            SourceKind::Structured => Some((
                Some(PathBuf::from("tape.json")),
                Err(anyhow!("permission denied")),
            )),
            SourceKind::Log => Some((None, Ok("   ".to_owned()))),
        });
        match outcome {
            ReadOutcome::NoMetadata { attempts } => {
                assert_eq!(attempts.len(), 3);
                assert!(attempts.iter().all(|attempt| attempt.rows == 0));
                assert!(attempts[1].note.as_deref().unwrap().contains("permission denied"));
                assert_eq!(attempts[1].path, Some(PathBuf::from("tape.json")));
                assert_eq!(attempts[2].note.as_deref(), Some("empty"));
            }
            other => panic!("expected no metadata, got {other:?}"),
        }
    }

    #[test]
    fn placeholder_markup_does_not_hide_a_valid_log() {
        let markup = format!(
            "<frames>{}</frames>",
            (0..12)
                .map(|n| format!(r#"<frame n="{n}" rdt="XXXX-XX-XX XX:XX:XX"/>"#))
                .collect::<String>()
        );
        let log = (1..=12)
            .map(|index| format!("{index} 00:00:00;00 2025-01-01 08:00:{:02}\n", index / 5))
            .collect::<String>();

        let outcome = select_with(&PRIORITY, 10, &ReaderOptions::default(), |kind| match kind {
            SourceKind::Markup => Some((None, Ok(markup.clone()))),
            SourceKind::Log => Some((None, Ok(log.clone()))),
            SourceKind::Structured => None,
        });
        match outcome {
            ReadOutcome::Selected {
                kind,
                records,
                below_threshold,
                attempts,
            } => {
                assert_eq!(kind, SourceKind::Log);
                assert_eq!(records.len(), 12);
                assert!(!below_threshold);
                assert_eq!(attempts[0].rows, 12);
                assert_eq!(attempts[0].usable_rows, 0);
                assert_eq!(attempts[0].note.as_deref(), Some("no usable date/time rows"));
            }
            other => panic!("expected the log to be selected, got {other:?}"),
        }
    }

    #[test]
    fn sources_without_usable_rows_mean_no_metadata() {
        let outcome = select_with(&PRIORITY, 1, &ReaderOptions::default(), |kind| match kind {
            SourceKind::Log => Some((None, Ok("1 00:00:00;00 XXXX XX\n".to_owned()))),
            _ => None,
        });
        assert!(matches!(outcome, ReadOutcome::NoMetadata { .. }));
    }

    #[test]
    fn source_kind_parses_aliases() {
        assert_eq!("xml".parse::<SourceKind>().unwrap(), SourceKind::Markup);
        assert_eq!("JSON".parse::<SourceKind>().unwrap(), SourceKind::Structured);
        assert!("csv".parse::<SourceKind>().is_err());
    }
}
