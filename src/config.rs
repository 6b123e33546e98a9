use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize};

use crate::error_codes::{
    CodedError, CONFIG_INVALID, CONFIG_INVALID_FRAME_RATE, CONFIG_MISSING_FRAME_RATE,
};
use crate::policy::MissingMetadataPolicy;
use crate::reader::SourceKind;

pub const DEFAULT_MIN_SOURCE_ROWS: usize = 10;
pub const DEFAULT_MIN_SEGMENTS: usize = 2;

/// Frames per second of the digitized tape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FrameRate(f64);

impl FrameRate {
    pub fn new(fps: f64) -> Result<Self> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(CodedError::configuration(
                CONFIG_INVALID_FRAME_RATE,
                format!("frame rate must be a positive finite number, got {fps}"),
            )
            .into());
        }
        Ok(Self(fps))
    }

    pub fn fps(self) -> f64 {
        self.0
    }

    /// Duration of one frame in seconds.
    pub fn frame_step(self) -> f64 {
        1.0 / self.0
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FrameRate {
    type Err = anyhow::Error;

    /// Accepts plain decimals (`29.97`) and rationals (`30000/1001`).
    fn from_str(raw: &str) -> Result<Self> {
        let value = raw.trim();
        let invalid = || {
            anyhow::Error::from(CodedError::configuration(
                CONFIG_INVALID_FRAME_RATE,
                format!("cannot parse frame rate '{value}'"),
            ))
        };
        let fps = if let Some((numerator, denominator)) = value.split_once('/') {
            let numerator = numerator.trim().parse::<f64>().map_err(|_| invalid())?;
            let denominator = denominator.trim().parse::<f64>().map_err(|_| invalid())?;
            if denominator.abs() <= f64::EPSILON {
                return Err(invalid());
            }
            numerator / denominator
        } else {
            value.parse::<f64>().map_err(|_| invalid())?
        };
        Self::new(fps)
    }
}

impl<'de> Deserialize<'de> for FrameRate {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawFrameRate {
            Number(f64),
            Text(String),
        }

        match RawFrameRate::deserialize(deserializer)? {
            RawFrameRate::Number(fps) => FrameRate::new(fps).map_err(D::Error::custom),
            RawFrameRate::Text(text) => text.parse().map_err(D::Error::custom),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    /// Date above time.
    #[default]
    Stacked,
    /// Date and time on one line.
    Single,
}

impl FromStr for Layout {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "stacked" => Ok(Self::Stacked),
            "single" => Ok(Self::Single),
            other => Err(anyhow!("unknown layout '{other}' (expected stacked or single)")),
        }
    }
}

/// How the `single` layout is rendered as subtitle cues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SingleLineStyle {
    #[default]
    Inline,
    /// Date cue anchored bottom-left, time cue anchored bottom-right.
    Split,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexBase {
    Zero,
    One,
}

impl IndexBase {
    pub fn offset(self) -> u64 {
        match self {
            Self::Zero => 0,
            Self::One => 1,
        }
    }
}

/// Instance names of the drawtext filters driven by the overlay timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OverlayTargets {
    pub date_target: String,
    pub time_target: String,
    pub line_target: String,
}

impl Default for OverlayTargets {
    fn default() -> Self {
        Self {
            date_target: "drawtext@rdt_date".to_owned(),
            time_target: "drawtext@rdt_time".to_owned(),
            line_target: "drawtext@rdt".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SubtitleStyle {
    pub font_name: String,
    pub font_size: u32,
    /// `&HAABBGGRR` colour strings, passed through verbatim.
    pub primary_colour: String,
    pub outline_colour: String,
    pub back_colour: String,
    pub outline: f32,
    pub shadow: f32,
    /// Numpad alignment (1 = bottom-left, 3 = bottom-right).
    pub alignment: u8,
    pub margin_l: u32,
    pub margin_r: u32,
    pub margin_v: u32,
    pub play_res_x: u32,
    pub play_res_y: u32,
}

impl Default for SubtitleStyle {
    fn default() -> Self {
        Self {
            font_name: "DejaVu Sans Mono".to_owned(),
            font_size: 28,
            primary_colour: "&H00FFFFFF".to_owned(),
            outline_colour: "&H00000000".to_owned(),
            back_colour: "&H80000000".to_owned(),
            outline: 2.0,
            shadow: 0.0,
            alignment: 3,
            margin_l: 40,
            margin_r: 40,
            margin_v: 30,
            play_res_x: 720,
            play_res_y: 480,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PipelineConfig {
    pub frame_rate: Option<FrameRate>,
    pub min_source_rows: usize,
    pub min_segments: usize,
    pub source_priority: Vec<SourceKind>,
    pub log_index_base: IndexBase,
    pub markup_index_base: IndexBase,
    pub layout: Layout,
    pub single_line_style: SingleLineStyle,
    pub missing_metadata: MissingMetadataPolicy,
    pub overlay: OverlayTargets,
    pub subtitle_style: SubtitleStyle,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_rate: None,
            min_source_rows: DEFAULT_MIN_SOURCE_ROWS,
            min_segments: DEFAULT_MIN_SEGMENTS,
            source_priority: vec![SourceKind::Markup, SourceKind::Structured, SourceKind::Log],
            log_index_base: IndexBase::One,
            markup_index_base: IndexBase::Zero,
            layout: Layout::default(),
            single_line_style: SingleLineStyle::default(),
            missing_metadata: MissingMetadataPolicy::default(),
            overlay: OverlayTargets::default(),
            subtitle_style: SubtitleStyle::default(),
        }
    }
}

impl PipelineConfig {
    /// Checks every required parameter and returns the resolved frame rate.
    pub fn validate(&self) -> Result<FrameRate> {
        let frame_rate = self.frame_rate.ok_or_else(|| {
            CodedError::configuration(
                CONFIG_MISSING_FRAME_RATE,
                "a frame rate is required (set frame_rate in the config or pass --fps)",
            )
        })?;
        // Re-check in case the value was built in code rather than parsed.
        FrameRate::new(frame_rate.fps())?;

        if self.min_source_rows == 0 {
            return Err(invalid_config("min_source_rows must be at least 1"));
        }
        if self.min_segments == 0 {
            return Err(invalid_config("min_segments must be at least 1"));
        }
        if self.source_priority.is_empty() {
            return Err(invalid_config("source_priority must list at least one source"));
        }
        for (index, kind) in self.source_priority.iter().enumerate() {
            if self.source_priority[..index].contains(kind) {
                return Err(invalid_config(format!(
                    "source_priority lists '{}' more than once",
                    kind.as_str()
                )));
            }
        }
        if !(1..=9).contains(&self.subtitle_style.alignment) {
            return Err(invalid_config(format!(
                "subtitle_style.alignment must be 1-9, got {}",
                self.subtitle_style.alignment
            )));
        }
        Ok(frame_rate)
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(frame_rate) = overrides.frame_rate {
            self.frame_rate = Some(frame_rate);
        }
        if let Some(layout) = overrides.layout {
            self.layout = layout;
        }
        if let Some(policy) = overrides.missing_metadata {
            self.missing_metadata = policy;
        }
        if let Some(rows) = overrides.min_source_rows {
            self.min_source_rows = rows;
        }
        if let Some(segments) = overrides.min_segments {
            self.min_segments = segments;
        }
    }
}

fn invalid_config(message: impl Into<String>) -> anyhow::Error {
    CodedError::configuration(CONFIG_INVALID, message).into()
}

/// Values supplied on the command line; each one wins over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub frame_rate: Option<FrameRate>,
    pub layout: Option<Layout>,
    pub missing_metadata: Option<MissingMetadataPolicy>,
    pub min_source_rows: Option<usize>,
    pub min_segments: Option<usize>,
}

pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    parse_config(&text).with_context(|| format!("invalid config {}", path.display()))
}

pub fn parse_config(text: &str) -> Result<PipelineConfig> {
    if text.trim().is_empty() {
        return Ok(PipelineConfig::default());
    }
    serde_yaml::from_str(text).map_err(|error| {
        let location = error
            .location()
            .map(|location| format!("line {}, column {}", location.line(), location.column()))
            .unwrap_or_else(|| "unknown location".to_owned());
        CodedError::configuration(CONFIG_INVALID, format!("{location}: {error}")).into()
    })
}
