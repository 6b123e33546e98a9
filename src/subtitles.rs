//! Subtitle-cue projector producing an ASS (Advanced SubStation Alpha) document.

use std::fmt::Write as _;

use crate::config::{Layout, SingleLineStyle, SubtitleStyle};
use crate::segments::SegmentList;

pub const STYLE_NAME: &str = "RDT";

const STYLE_FORMAT: &str = "Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding";
const EVENT_FORMAT: &str =
    "Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text";

/// One segment's worth of dialogue lines sharing a single time span.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleCue {
    pub start: f64,
    pub end: f64,
    /// Dialogue texts, already escaped; usually one, two for the split layout.
    pub texts: Vec<String>,
}

/// `H:MM:SS.cc`, truncated to the centisecond; negatives clamp to zero.
/// A 1e-6 bias keeps values like `0.29` (stored just below) at `.29`.
pub fn format_cue_time(seconds: f64) -> String {
    let centiseconds = (seconds.max(0.0) * 100.0 + 1e-6).floor() as u64;
    let hours = centiseconds / 360_000;
    let minutes = (centiseconds / 6_000) % 60;
    let whole_seconds = (centiseconds / 100) % 60;
    let fraction = centiseconds % 100;
    format!("{hours}:{minutes:02}:{whole_seconds:02}.{fraction:02}")
}

/// Makes override braces literal and turns line breaks into `\N`.
pub fn escape_cue_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('{', "\\{")
        .replace('}', "\\}")
        .replace('\n', "\\N")
}

pub fn project_cues(
    segments: &SegmentList,
    layout: Layout,
    single_line_style: SingleLineStyle,
) -> Vec<SubtitleCue> {
    segments
        .iter()
        .map(|segment| {
            let date = escape_cue_text(&segment.date_part);
            let time = escape_cue_text(&segment.time_part);
            let texts = match (layout, single_line_style) {
                (Layout::Stacked, _) => vec![format!("{date}\\N{time}")],
                (Layout::Single, SingleLineStyle::Inline) => vec![format!("{date} {time}")],
                (Layout::Single, SingleLineStyle::Split) => {
                    vec![format!("{{\\an1}}{date}"), format!("{{\\an3}}{time}")]
                }
            };
            SubtitleCue {
                start: segment.start_sec,
                end: segment.end_sec,
                texts,
            }
        })
        .collect()
}

pub fn render_header(style: &SubtitleStyle) -> String {
    let mut header = String::new();
    let _ = writeln!(header, "[Script Info]");
    let _ = writeln!(header, "; Recording date/time track");
    let _ = writeln!(header, "ScriptType: v4.00+");
    let _ = writeln!(header, "WrapStyle: 2");
    let _ = writeln!(header, "ScaledBorderAndShadow: yes");
    let _ = writeln!(header, "PlayResX: {}", style.play_res_x);
    let _ = writeln!(header, "PlayResY: {}", style.play_res_y);
    let _ = writeln!(header);
    let _ = writeln!(header, "[V4+ Styles]");
    let _ = writeln!(header, "{STYLE_FORMAT}");
    let _ = writeln!(
        header,
        "Style: {STYLE_NAME},{},{},{},&H000000FF,{},{},0,0,0,0,100,100,0,0,1,{},{},{},{},{},{},1",
        style.font_name.replace(',', " "),
        style.font_size,
        style.primary_colour,
        style.outline_colour,
        style.back_colour,
        style.outline,
        style.shadow,
        style.alignment,
        style.margin_l,
        style.margin_r,
        style.margin_v,
    );
    let _ = writeln!(header);
    let _ = writeln!(header, "[Events]");
    let _ = writeln!(header, "{EVENT_FORMAT}");
    header
}

pub fn render_cues(cues: &[SubtitleCue], style: &SubtitleStyle) -> String {
    let mut document = render_header(style);
    for cue in cues {
        let start = format_cue_time(cue.start);
        let end = format_cue_time(cue.end);
        for text in &cue.texts {
            let _ = writeln!(document, "Dialogue: 0,{start},{end},{STYLE_NAME},,0,0,0,,{text}");
        }
    }
    document
}

/// Projects and renders in one step.
pub fn subtitle_document(
    segments: &SegmentList,
    layout: Layout,
    single_line_style: SingleLineStyle,
    style: &SubtitleStyle,
) -> String {
    render_cues(&project_cues(segments, layout, single_line_style), style)
}
