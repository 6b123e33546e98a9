use crate::config::IndexBase;

use super::{RawFrameRecord, SequenceKey};

/// Reads the line-oriented per-frame log.
///
/// A line is a candidate only when it has at least four whitespace-separated
/// fields and the first one is all digits (the frame index). Fields 3 and 4
/// carry the recording date and time; everything else (the tape timecode in
/// field 2, trailing flags) is ignored.
pub fn read(text: &str, base: IndexBase) -> Vec<RawFrameRecord> {
    text.lines().filter_map(|line| parse_line(line, base)).collect()
}

fn parse_line(line: &str, base: IndexBase) -> Option<RawFrameRecord> {
    let mut fields = line.trim_start().split_whitespace();
    let index_field = fields.next()?;
    let _timecode = fields.next()?;
    let date = fields.next()?;
    let time = fields.next()?;

    if index_field.is_empty() || !index_field.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    let sequence_key = match index_field.parse::<u64>() {
        Ok(index) => SequenceKey::FrameIndex { index, base },
        // All digits but too long for u64.
        Err(_) => SequenceKey::Malformed(index_field.to_owned()),
    };

    Some(RawFrameRecord::new(sequence_key, format!("{date} {time}")))
}
