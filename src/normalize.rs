//! Timeline normalizer: sequence keys to non-decreasing scene time.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::config::FrameRate;
use crate::reader::{RawFrameRecord, SequenceKey};

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFrame {
    pub scene_time: f64,
    pub date_part: String,
    /// Truncated to whole seconds.
    pub time_part: String,
}

/// Keeps emitted times non-decreasing across backward jumps in the source.
///
/// On a backward jump the offset is recomputed so that the new sample lands
/// one step after the previous corrected time, where the step is the last
/// positive delta seen (or one frame if none was seen yet).
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    fallback_step: f64,
    last_raw: Option<f64>,
    last_corrected: f64,
    last_valid_step: Option<f64>,
    offset: f64,
    resets: usize,
}

impl MonotonicClock {
    pub fn new(frame_rate: FrameRate) -> Self {
        Self {
            fallback_step: frame_rate.frame_step(),
            last_raw: None,
            last_corrected: 0.0,
            last_valid_step: None,
            offset: 0.0,
            resets: 0,
        }
    }

    pub fn correct(&mut self, raw: f64) -> f64 {
        if let Some(previous) = self.last_raw {
            let delta = raw - previous;
            if delta > 0.0 {
                self.last_valid_step = Some(delta);
            } else if delta < 0.0 {
                let step = self.last_valid_step.unwrap_or(self.fallback_step);
                self.offset = self.last_corrected + step - raw;
                self.resets += 1;
            }
        }

        let corrected = raw + self.offset;
        self.last_raw = Some(raw);
        self.last_corrected = corrected;
        corrected
    }

    /// Number of backward jumps corrected so far.
    pub fn resets(&self) -> usize {
        self.resets
    }
}

/// Seconds from a `HH:MM:SS[.frac]` playback position; `MM:SS` is accepted too.
pub fn timecode_to_seconds(timecode: &str) -> Option<f64> {
    let parts = timecode.trim().split(':').collect::<Vec<_>>();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [hours, minutes, seconds] => (parse_whole(hours)?, parse_whole(minutes)?, *seconds),
        [minutes, seconds] => (0, parse_whole(minutes)?, *seconds),
        _ => return None,
    };
    let seconds = seconds.trim();
    if seconds.is_empty()
        || !seconds
            .bytes()
            .all(|byte| byte.is_ascii_digit() || byte == b'.')
    {
        return None;
    }
    let seconds = seconds.parse::<f64>().ok()?;
    Some(hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds)
}

fn parse_whole(field: &str) -> Option<u64> {
    let field = field.trim();
    if field.is_empty() || !field.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\d{4}[-/:]\d{1,2}[-/:]\d{1,2}$").expect("date pattern is valid")
    })
}

fn time_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{1,2}:\d{2}:\d{2})(?:[.,]\d+)?$").expect("time pattern is valid")
    })
}

/// Splits `YYYY-MM-DD HH:MM:SS[.frac]` into a date and a whole-second time.
///
/// Only the shape is checked; the values themselves are taken as given.
pub fn split_recording_date_time(raw: &str) -> Option<(String, String)> {
    let trimmed = raw.trim();
    let (date, rest) = trimmed.split_once(char::is_whitespace)?;
    let time = rest.trim_start();
    if !date_pattern().is_match(date) {
        return None;
    }
    let whole_seconds = time_pattern().captures(time)?.get(1)?.as_str();
    Some((date.to_owned(), whole_seconds.to_owned()))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeResult {
    pub frames: Vec<NormalizedFrame>,
    pub skipped: usize,
    pub resets: usize,
}

/// Converts raw rows to normalized frames in reader order.
///
/// Rows whose date/time cannot be split or whose sequence key is malformed
/// are skipped and counted; they do not advance the clock.
pub fn normalize(records: &[RawFrameRecord], frame_rate: FrameRate) -> NormalizeResult {
    let mut clock = MonotonicClock::new(frame_rate);
    let mut frames = Vec::with_capacity(records.len());
    let mut skipped = 0;

    for record in records {
        let Some((date_part, time_part)) = split_recording_date_time(&record.recording_date_time)
        else {
            skipped += 1;
            continue;
        };
        let Some(raw_seconds) = raw_seconds(&record.sequence_key, frame_rate) else {
            skipped += 1;
            continue;
        };

        frames.push(NormalizedFrame {
            scene_time: clock.correct(raw_seconds),
            date_part,
            time_part,
        });
    }

    if clock.resets() > 0 {
        debug!(resets = clock.resets(), "corrected backward jumps in playback position");
    }

    NormalizeResult {
        frames,
        skipped,
        resets: clock.resets(),
    }
}

/// True when [`normalize`] keeps the row rather than counting it as skipped.
pub fn is_usable(record: &RawFrameRecord) -> bool {
    let has_position = match &record.sequence_key {
        SequenceKey::FrameIndex { .. } => true,
        SequenceKey::Timecode(timecode) => timecode_to_seconds(timecode).is_some(),
        SequenceKey::Seconds(seconds) => seconds.is_finite(),
        SequenceKey::Malformed(_) => false,
    };
    has_position && split_recording_date_time(&record.recording_date_time).is_some()
}

fn raw_seconds(key: &SequenceKey, frame_rate: FrameRate) -> Option<f64> {
    match key {
        SequenceKey::FrameIndex { index, base } => {
            Some(index.saturating_sub(base.offset()) as f64 / frame_rate.fps())
        }
        SequenceKey::Timecode(timecode) => timecode_to_seconds(timecode),
        SequenceKey::Seconds(seconds) if seconds.is_finite() => Some(*seconds),
        SequenceKey::Seconds(_) | SequenceKey::Malformed(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexBase;

    fn fps(value: f64) -> FrameRate {
        FrameRate::new(value).unwrap()
    }

    #[test]
    fn backward_jump_continues_from_last_valid_step() {
        let mut clock = MonotonicClock::new(fps(29.97));
        let corrected = [10.0, 10.0333, 0.0, 0.0333]
            .into_iter()
            .map(|raw| clock.correct(raw))
            .collect::<Vec<_>>();

        assert!(corrected.windows(2).all(|pair| pair[1] > pair[0]));
        let last_step = 10.0333 - 10.0;
        assert!((corrected[2] - (10.0333 + last_step)).abs() < 1e-9);
        assert!((corrected[2] - (10.0333 + 1.0 / 29.97)).abs() < 1e-4);
        assert!((corrected[3] - corrected[2] - 0.0333).abs() < 1e-9);
        assert_eq!(clock.resets(), 1);
    }

    #[test]
    fn backward_jump_without_history_uses_one_frame() {
        let mut clock = MonotonicClock::new(fps(25.0));
        assert_eq!(clock.correct(5.0), 5.0);
        let corrected = clock.correct(1.0);
        assert!((corrected - 5.04).abs() < 1e-9);
    }

    #[test]
    fn repeated_values_stay_equal() {
        let mut clock = MonotonicClock::new(fps(30.0));
        assert_eq!(clock.correct(2.0), 2.0);
        assert_eq!(clock.correct(2.0), 2.0);
    }

    #[test]
    fn timecodes_convert_to_seconds() {
        assert_eq!(timecode_to_seconds("01:02:03.5"), Some(3723.5));
        assert_eq!(timecode_to_seconds("00:00:10"), Some(10.0));
        assert_eq!(timecode_to_seconds("02:03"), Some(123.0));
        assert_eq!(timecode_to_seconds("00:00:00;12"), None);
        assert_eq!(timecode_to_seconds("aa:00:00"), None);
        assert_eq!(timecode_to_seconds("12"), None);
    }

    #[test]
    fn split_truncates_fractional_seconds() {
        assert_eq!(
            split_recording_date_time(" 2025-01-01   08:00:00.48 "),
            Some(("2025-01-01".to_owned(), "08:00:00".to_owned()))
        );
        assert_eq!(split_recording_date_time("2025-01-01"), None);
        assert_eq!(split_recording_date_time("XXXX-XX-XX XX:XX:XX"), None);
        assert_eq!(split_recording_date_time("N/A N/A"), None);
    }

    #[test]
    fn one_based_index_one_is_time_zero() {
        let records = vec![
            RawFrameRecord::new(
                SequenceKey::FrameIndex {
                    index: 1,
                    base: IndexBase::One,
                },
                "2025-01-01 08:00:00",
            ),
            RawFrameRecord::new(
                SequenceKey::FrameIndex {
                    index: 31,
                    base: IndexBase::One,
                },
                "2025-01-01 08:00:01",
            ),
        ];
        let result = normalize(&records, fps(30.0));
        assert_eq!(result.frames[0].scene_time, 0.0);
        assert!((result.frames[1].scene_time - 1.0).abs() < 1e-12);
    }

    #[test]
    fn invalid_rows_are_counted_not_fatal() {
        let records = vec![
            RawFrameRecord::new(SequenceKey::Timecode("00:00:00.000".into()), "2025-01-01 08:00:00"),
            RawFrameRecord::new(SequenceKey::Malformed("x".into()), "2025-01-01 08:00:00"),
            RawFrameRecord::new(SequenceKey::Seconds(0.5), "garbage"),
            RawFrameRecord::new(SequenceKey::Seconds(f64::NAN), "2025-01-01 08:00:00"),
        ];
        let result = normalize(&records, fps(30.0));
        assert_eq!(result.frames.len(), 1);
        assert_eq!(result.skipped, 3);
    }
}
