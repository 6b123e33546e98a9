use tapestamp::config::{FrameRate, Layout, OverlayTargets, SingleLineStyle, SubtitleStyle};
use tapestamp::normalize::normalize;
use tapestamp::overlay::project_overlay;
use tapestamp::reader::{ReaderOptions, SourceKind};
use tapestamp::segments::{build_segments, SegmentList};
use tapestamp::subtitles::{format_cue_time, project_cues, render_cues};

// Two recording sessions; the second restarts the position counter.
const CAPTURE: &str = r#"{
  "frames": [
    {"pts": "00:00:00.000", "rdt": "2005-07-02 14:12:33"},
    {"pts": "00:00:00.500", "rdt": "2005-07-02 14:12:33.5"},
    {"pts": "00:00:01.000", "rdt": "2005-07-02 14:12:34"},
    {"pts": "00:00:01.500", "rdt": "2005-07-02 14:12:34"},
    {"pts": "00:00:00.000", "rdt": "2005/07/03 09:00:00"},
    {"pts": "00:00:00.500", "rdt": "2005/07/03 09:00:00"},
    {"pts": "00:00:01.000", "rdt": "2005/07/03 09:00:01"}
  ]
}"#;

fn capture_segments() -> SegmentList {
    let frame_rate: FrameRate = "30000/1001".parse().expect("valid frame rate");
    let records = SourceKind::Structured
        .read(CAPTURE, &ReaderOptions::default())
        .expect("capture should parse");
    let normalized = normalize(&records, frame_rate);
    assert_eq!(normalized.resets, 1);
    build_segments(&normalized.frames, frame_rate).segments
}

#[test]
fn segments_survive_a_position_reset_in_order() {
    let segments = capture_segments();
    let keys = segments
        .iter()
        .map(|segment| format!("{} {}", segment.date_part, segment.time_part))
        .collect::<Vec<_>>();
    assert_eq!(
        keys,
        vec![
            "2005-07-02 14:12:33",
            "2005-07-02 14:12:34",
            "2005/07/03 09:00:00",
            "2005/07/03 09:00:01",
        ]
    );
    for pair in segments.windows(2) {
        assert_eq!(pair[0].end_sec, pair[1].start_sec);
    }
}

#[test]
fn overlay_and_cues_share_every_boundary() {
    let segments = capture_segments();
    let targets = OverlayTargets::default();

    for (layout, style) in [
        (Layout::Stacked, SingleLineStyle::Inline),
        (Layout::Single, SingleLineStyle::Inline),
        (Layout::Single, SingleLineStyle::Split),
    ] {
        let intervals = project_overlay(&segments, layout, &targets);
        let cues = project_cues(&segments, layout, style);
        assert_eq!(intervals.len(), segments.len());
        assert_eq!(cues.len(), segments.len());

        for ((interval, cue), segment) in intervals.iter().zip(&cues).zip(segments.iter()) {
            assert_eq!(interval.at, segment.start_sec);
            assert_eq!(cue.start, segment.start_sec);
            assert_eq!(cue.end, segment.end_sec);
            assert_eq!(
                format_cue_time(interval.at),
                format_cue_time(cue.start),
                "{layout:?}/{style:?} boundary drifted"
            );
        }
    }
}

#[test]
fn both_tracks_show_the_same_text() {
    let segments = capture_segments();
    let intervals = project_overlay(&segments, Layout::Stacked, &OverlayTargets::default());
    let cues = project_cues(&segments, Layout::Stacked, SingleLineStyle::Inline);

    for (interval, cue) in intervals.iter().zip(&cues) {
        let shown = interval
            .commands
            .iter()
            .map(|command| command.text.as_str())
            .collect::<Vec<_>>()
            .join("\\N");
        assert_eq!(cue.texts, vec![shown]);
    }
}

#[test]
fn final_cue_covers_the_whole_last_run() {
    let frame_rate = FrameRate::new(25.0).expect("valid frame rate");
    let mut log = String::from("1 00:00:00:00 2025-01-01 08:00:00\n");
    for index in 26..=50 {
        log.push_str(&format!("{index} 00:00:01:00 2025-01-01 08:00:01\n"));
    }
    let records = SourceKind::Log
        .read(&log, &ReaderOptions::default())
        .expect("log should parse");
    let normalized = normalize(&records, frame_rate);
    let segments = build_segments(&normalized.frames, frame_rate).segments;
    assert_eq!(segments.len(), 2);

    let cues = project_cues(&segments, Layout::Stacked, SingleLineStyle::Inline);
    let document = render_cues(&cues, &SubtitleStyle::default());
    assert!(
        document.ends_with("Dialogue: 0,0:00:01.00,0:00:02.00,RDT,,0,0,0,,2025-01-01\\N08:00:01\n"),
        "last cue should end one frame after frame 50:\n{document}"
    );
}
