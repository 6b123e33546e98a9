use anyhow::{Context, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::config::IndexBase;

use super::{RawFrameRecord, SequenceKey};

const FRAME_ELEMENT: &[u8] = b"frame";
const SEQUENCE_ATTRIBUTES: [&[u8]; 3] = [b"n", b"index", b"frame"];
const COMBINED_ATTRIBUTES: [&[u8]; 3] = [b"rdt", b"recording_date_time", b"datetime"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Date,
    Time,
}

impl Field {
    fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"date" | b"rdate" => Some(Self::Date),
            b"time" | b"rtime" => Some(Self::Time),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct PendingFrame {
    sequence_key: SequenceKey,
    combined: Option<String>,
    date: Option<String>,
    time: Option<String>,
}

impl PendingFrame {
    fn from_element(element: &BytesStart<'_>, occurrence: u64, base: IndexBase) -> Result<Self> {
        let mut sequence_key = None;
        let mut combined = None;

        for attribute in element.attributes() {
            let attribute = attribute.context("malformed frame attribute")?;
            let key = attribute.key.local_name();
            if SEQUENCE_ATTRIBUTES.contains(&key.as_ref()) && sequence_key.is_none() {
                let value = attribute
                    .unescape_value()
                    .context("malformed frame sequence attribute")?;
                let value = value.trim();
                sequence_key = Some(match value.parse::<u64>() {
                    Ok(index) => SequenceKey::FrameIndex { index, base },
                    Err(_) => SequenceKey::Malformed(value.to_owned()),
                });
            } else if COMBINED_ATTRIBUTES.contains(&key.as_ref()) && combined.is_none() {
                let value = attribute
                    .unescape_value()
                    .context("malformed frame date/time attribute")?;
                combined = Some(value.trim().to_owned());
            }
        }

        Ok(Self {
            // Without an explicit sequence attribute, document order is the index.
            sequence_key: sequence_key.unwrap_or(SequenceKey::FrameIndex {
                index: occurrence,
                base: IndexBase::Zero,
            }),
            combined,
            date: None,
            time: None,
        })
    }

    fn set(&mut self, field: Field, value: &str) {
        let slot = match field {
            Field::Date => &mut self.date,
            Field::Time => &mut self.time,
        };
        if slot.is_none() && !value.is_empty() {
            *slot = Some(value.to_owned());
        }
    }

    /// Frames that carry no recording date/time at all are not rows.
    fn finish(self) -> Option<RawFrameRecord> {
        let recording_date_time = match (self.combined, self.date, self.time) {
            (Some(combined), _, _) if !combined.is_empty() => combined,
            (_, Some(date), Some(time)) => format!("{date} {time}"),
            _ => return None,
        };
        Some(RawFrameRecord::new(self.sequence_key, recording_date_time))
    }
}

/// Reads a markup document of `frame` elements.
///
/// Each frame carries either one combined `rdt` attribute or nested `date`
/// and `time` elements in either order.
pub fn read(text: &str, base: IndexBase) -> Result<Vec<RawFrameRecord>> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut occurrence = 0u64;
    let mut open: Option<PendingFrame> = None;
    let mut field: Option<Field> = None;

    loop {
        let event = reader
            .read_event()
            .with_context(|| format!("malformed markup near byte {}", reader.buffer_position()))?;
        match event {
            Event::Empty(element) if element.local_name().as_ref() == FRAME_ELEMENT => {
                let frame = PendingFrame::from_element(&element, occurrence, base)?;
                occurrence += 1;
                records.extend(frame.finish());
            }
            Event::Start(element) if element.local_name().as_ref() == FRAME_ELEMENT => {
                if let Some(unclosed) = open.take() {
                    records.extend(unclosed.finish());
                }
                open = Some(PendingFrame::from_element(&element, occurrence, base)?);
                occurrence += 1;
                field = None;
            }
            Event::Start(element) if open.is_some() => {
                field = Field::from_name(element.local_name().as_ref());
            }
            Event::Text(content) => {
                if let (Some(frame), Some(current)) = (open.as_mut(), field) {
                    let value = content.unescape().context("malformed frame field text")?;
                    frame.set(current, value.trim());
                }
            }
            Event::End(element) => {
                if element.local_name().as_ref() == FRAME_ELEMENT {
                    if let Some(frame) = open.take() {
                        records.extend(frame.finish());
                    }
                }
                field = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(unclosed) = open.take() {
        records.extend(unclosed.finish());
    }
    Ok(records)
}
