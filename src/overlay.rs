//! Overlay-command timeline (sendcmd style) for a drawtext-like renderer.
//!
//! One line per segment:
//! `<seconds> <target> reinit text=<value>[, <target> reinit text=<value>];`
//! A command is only emitted at a segment's start; the next command replaces
//! the text, so segment ends need no command of their own.

use std::fmt::Write as _;

use crate::config::{Layout, OverlayTargets};
use crate::segments::SegmentList;

/// Characters with meaning in the command language (`:` separates options).
const RESERVED: [char; 5] = ['\\', ':', '\'', ',', ';'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayCommand {
    pub target: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayInterval {
    pub at: f64,
    pub commands: Vec<OverlayCommand>,
}

/// Backslash-escapes every reserved character.
pub fn escape_overlay_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 8);
    for character in text.chars() {
        if RESERVED.contains(&character) {
            escaped.push('\\');
        }
        escaped.push(character);
    }
    escaped
}

/// Undoes [`escape_overlay_text`] the way the renderer's tokenizer does:
/// a backslash makes the next character literal.
pub fn unescape_overlay_text(escaped: &str) -> String {
    let mut text = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(character) = chars.next() {
        if character == '\\' {
            if let Some(literal) = chars.next() {
                text.push(literal);
            }
        } else {
            text.push(character);
        }
    }
    text
}

pub fn project_overlay(
    segments: &SegmentList,
    layout: Layout,
    targets: &OverlayTargets,
) -> Vec<OverlayInterval> {
    segments
        .iter()
        .map(|segment| {
            let commands = match layout {
                Layout::Stacked => vec![
                    OverlayCommand {
                        target: targets.date_target.clone(),
                        text: segment.date_part.clone(),
                    },
                    OverlayCommand {
                        target: targets.time_target.clone(),
                        text: segment.time_part.clone(),
                    },
                ],
                Layout::Single => vec![OverlayCommand {
                    target: targets.line_target.clone(),
                    text: format!("{} {}", segment.date_part, segment.time_part),
                }],
            };
            OverlayInterval {
                at: segment.start_sec,
                commands,
            }
        })
        .collect()
}

pub fn render_overlay(intervals: &[OverlayInterval]) -> String {
    let mut document = String::new();
    for interval in intervals {
        let commands = interval
            .commands
            .iter()
            .map(|command| {
                format!(
                    "{} reinit text={}",
                    command.target,
                    escape_overlay_text(&command.text)
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        // Writing to a String cannot fail.
        let _ = writeln!(document, "{:.6} {};", interval.at, commands);
    }
    document
}

/// Projects and renders in one step.
pub fn overlay_document(segments: &SegmentList, layout: Layout, targets: &OverlayTargets) -> String {
    render_overlay(&project_overlay(segments, layout, targets))
}
