use anyhow::{Context, Result};
use serde_json::{Map, Value};

use super::{RawFrameRecord, SequenceKey};

const POSITION_KEYS: [&str; 4] = ["pts", "timecode", "position", "pts_time"];
const RECORDING_KEYS: [&str; 3] = ["rdt", "recording_date_time", "recorded_at"];

/// Reads a nested JSON document.
///
/// Any object carrying both a playback position and a recording date/time is
/// a row; the search is depth-first in document order and does not descend
/// into a matched node.
pub fn read(text: &str) -> Result<Vec<RawFrameRecord>> {
    let root: Value = serde_json::from_str(text).context("malformed structured metadata")?;
    let mut records = Vec::new();
    collect(&root, &mut records);
    Ok(records)
}

fn collect(value: &Value, records: &mut Vec<RawFrameRecord>) {
    match value {
        Value::Object(node) => {
            if let Some(record) = record_from_node(node) {
                records.push(record);
                return;
            }
            for child in node.values() {
                collect(child, records);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect(item, records);
            }
        }
        _ => {}
    }
}

fn record_from_node(node: &Map<String, Value>) -> Option<RawFrameRecord> {
    let recording_date_time = RECORDING_KEYS
        .iter()
        .filter_map(|key| node.get(*key))
        .find_map(|value| value.as_str().map(str::trim).filter(|text| !text.is_empty()))?;

    let positions = POSITION_KEYS
        .iter()
        .filter_map(|key| node.get(*key))
        .collect::<Vec<_>>();
    if positions.is_empty() {
        return None;
    }

    Some(RawFrameRecord::new(
        sequence_key_from_positions(&positions),
        recording_date_time,
    ))
}

/// Colon-delimited timecodes win over raw seconds wherever they appear.
fn sequence_key_from_positions(positions: &[&Value]) -> SequenceKey {
    let timecode = positions
        .iter()
        .filter_map(|value| value.as_str())
        .map(str::trim)
        .find(|text| text.contains(':'));
    if let Some(timecode) = timecode {
        return SequenceKey::Timecode(timecode.to_owned());
    }

    let seconds = positions.iter().find_map(|value| match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    });
    match seconds {
        Some(seconds) if seconds.is_finite() => SequenceKey::Seconds(seconds),
        _ => SequenceKey::Malformed(positions[0].to_string()),
    }
}
