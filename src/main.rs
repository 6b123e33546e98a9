use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use tapestamp::batch::{load_batch_file, run_batch};
use tapestamp::config::{load_config, ConfigOverrides, FrameRate, Layout, PipelineConfig};
use tapestamp::error_codes::{envelope_for, find_coded_error};
use tapestamp::logging;
use tapestamp::pipeline::{process_item, reconstruct_timeline, ItemReport, MediaItem};
use tapestamp::policy::{MissingMetadataPolicy, TimelineState};
use tapestamp::reader::{SourceAttempt, SourceKind};
use tapestamp::segments::{ParseStats, Segment};

#[derive(Debug, Parser)]
#[command(name = "tapestamp")]
#[command(version = env!("TAPESTAMP_LONG_VERSION"))]
#[command(about = "Rebuild a camcorder tape's recording date/time and emit overlay + subtitle tracks")]
struct Cli {
    /// Log filter used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Write the overlay-command timeline and subtitle track for one media file.
    Build {
        media: PathBuf,
        #[command(flatten)]
        sources: SourceArgs,
        #[arg(long = "overlay-out")]
        overlay_out: Option<PathBuf>,
        #[arg(long = "subtitles-out")]
        subtitles_out: Option<PathBuf>,
        #[command(flatten)]
        pipeline: PipelineArgs,
        #[arg(long)]
        json: bool,
    },
    /// Rebuild the timeline and report on it without writing anything.
    Inspect {
        media: PathBuf,
        #[command(flatten)]
        sources: SourceArgs,
        #[command(flatten)]
        pipeline: PipelineArgs,
        /// Also list every segment.
        #[arg(long)]
        segments: bool,
        #[arg(long)]
        json: bool,
    },
    /// Process every item of a batch file, one at a time.
    Batch {
        batch: PathBuf,
        #[command(flatten)]
        overrides: OverrideArgs,
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    fn json(&self) -> bool {
        match self {
            Self::Build { json, .. } | Self::Inspect { json, .. } | Self::Batch { json, .. } => {
                *json
            }
        }
    }
}

#[derive(Debug, Args)]
struct SourceArgs {
    /// Markup (XML) frame analysis.
    #[arg(long)]
    markup: Option<PathBuf>,
    /// Nested structured (JSON) frame analysis.
    #[arg(long)]
    structured: Option<PathBuf>,
    /// Line-oriented frame log.
    #[arg(long)]
    log: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct PipelineArgs {
    /// YAML pipeline configuration.
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(flatten)]
    overrides: OverrideArgs,
}

#[derive(Debug, Args)]
struct OverrideArgs {
    /// Frame rate, e.g. 25, 29.97 or 30000/1001.
    #[arg(long)]
    fps: Option<FrameRate>,
    /// stacked or single.
    #[arg(long)]
    layout: Option<Layout>,
    /// error, skip_burnin_convert or skip_file.
    #[arg(long)]
    policy: Option<MissingMetadataPolicy>,
    #[arg(long)]
    min_source_rows: Option<usize>,
    #[arg(long)]
    min_segments: Option<usize>,
}

impl OverrideArgs {
    fn to_overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            frame_rate: self.fps,
            layout: self.layout,
            missing_metadata: self.policy,
            min_source_rows: self.min_source_rows,
            min_segments: self.min_segments,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let json = cli.command.json();
    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => report_error(&error, json),
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Build {
            media,
            sources,
            overlay_out,
            subtitles_out,
            pipeline,
            json,
        } => {
            let config = resolve_config(&pipeline)?;
            let item = media_item(media, sources, overlay_out, subtitles_out);
            let report = process_item(&item, &config)?;
            if json {
                print_json(&report)
            } else {
                print_report(&report);
                Ok(())
            }
        }
        Commands::Inspect {
            media,
            sources,
            pipeline,
            segments,
            json,
        } => run_inspect(media, sources, &pipeline, segments, json),
        Commands::Batch {
            batch,
            overrides,
            json,
        } => {
            let batch_file = load_batch_file(&batch)?;
            let summary = run_batch(&batch_file, &overrides.to_overrides())?;
            if json {
                return print_json(&summary);
            }
            for report in &summary.items {
                print_report(report);
                println!();
            }
            println!(
                "Batch: {} rendered, {} delegated to plain conversion, {} skipped",
                summary.rendered, summary.delegated, summary.skipped
            );
            Ok(())
        }
    }
}

fn resolve_config(pipeline: &PipelineArgs) -> Result<PipelineConfig> {
    let mut config = match pipeline.config.as_deref() {
        Some(path) => load_config(path)?,
        None => PipelineConfig::default(),
    };
    config.apply_overrides(&pipeline.overrides.to_overrides());
    Ok(config)
}

fn media_item(
    media: PathBuf,
    sources: SourceArgs,
    overlay: Option<PathBuf>,
    subtitles: Option<PathBuf>,
) -> MediaItem {
    MediaItem {
        media,
        markup: sources.markup,
        structured: sources.structured,
        log: sources.log,
        overlay,
        subtitles,
    }
}

#[derive(Debug, Serialize)]
struct InspectView<'a> {
    media: &'a Path,
    source: Option<SourceKind>,
    below_threshold: bool,
    attempts: &'a [SourceAttempt],
    stats: ParseStats,
    state: TimelineState,
    timecode_resets: usize,
    segment_digest: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    segments: Option<&'a [Segment]>,
}

fn run_inspect(
    media: PathBuf,
    sources: SourceArgs,
    pipeline: &PipelineArgs,
    list_segments: bool,
    json: bool,
) -> Result<()> {
    let config = resolve_config(pipeline)?;
    let frame_rate = config.validate()?;
    let item = media_item(media, sources, None, None);
    let timeline = reconstruct_timeline(&item.sources(), &config, frame_rate);

    let view = InspectView {
        media: &item.media,
        source: timeline.source,
        below_threshold: timeline.below_threshold,
        attempts: &timeline.attempts,
        stats: timeline.stats,
        state: timeline.state,
        timecode_resets: timeline.resets,
        segment_digest: timeline.segments.digest(),
        segments: list_segments.then(|| timeline.segments.as_slice()),
    };
    if json {
        return print_json(&view);
    }

    println!("Media: {}", item.media.display());
    for attempt in &timeline.attempts {
        println!(
            "  tried {:<10} rows={:<6} usable={:<6} {}",
            attempt.kind.as_str(),
            attempt.rows,
            attempt.usable_rows,
            attempt.note.as_deref().unwrap_or("")
        );
    }
    print_stats(timeline.source, &timeline.stats, timeline.state);
    if timeline.below_threshold {
        println!("Note: no source reached {} rows", config.min_source_rows);
    }
    if list_segments {
        for segment in timeline.segments.iter() {
            println!(
                "  {:>12.6} {:>12.6}  {} {}",
                segment.start_sec, segment.end_sec, segment.date_part, segment.time_part
            );
        }
    }
    Ok(())
}

fn print_stats(source: Option<SourceKind>, stats: &ParseStats, state: TimelineState) {
    println!(
        "Source: {} (rows {}, valid {}, skipped {})",
        source.map_or("none", SourceKind::as_str),
        stats.raw_rows,
        stats.valid_rows,
        stats.skipped_rows
    );
    println!(
        "Segments: {} (unique date/time keys {})",
        stats.segment_count, stats.unique_dt_keys
    );
    println!("State: {state}");
}

fn print_report(report: &ItemReport) {
    println!("Media: {}", report.media.display());
    print_stats(report.source, &report.stats, report.state);
    println!("Outcome: {}", report.outcome.as_str());
    if let Some(path) = &report.overlay_path {
        println!("Overlay: {}", path.display());
    }
    if let Some(path) = &report.subtitles_path {
        println!("Subtitles: {}", path.display());
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to serialize json output")?;
    println!("{text}");
    Ok(())
}

fn report_error(error: &anyhow::Error, json: bool) -> ExitCode {
    if json {
        match serde_json::to_string_pretty(&envelope_for(error)) {
            Ok(text) => println!("{text}"),
            Err(_) => eprintln!("error: {error:#}"),
        }
    } else {
        eprintln!("error: {error:#}");
    }

    if find_coded_error(error).is_some() {
        ExitCode::from(2)
    } else {
        ExitCode::FAILURE
    }
}
