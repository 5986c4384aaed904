#![cfg(all(not(loom), feature = "metrics"))]
//! Tests for `fabriclink` metrics helpers.
//!
//! These tests verify that counters and gauges update as expected using
//! `metrics_util::debugging::DebuggingRecorder`.

use fabriclink::metrics::{self as fm, Direction};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use rstest::rstest;

fn debugging_recorder_setup() -> (Snapshotter, DebuggingRecorder) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    (snapshotter, recorder)
}

type Snapshot = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

fn counter_value(snapshot: &Snapshot, name: &str, direction: Option<&str>) -> Option<u64> {
    snapshot.iter().find_map(|(key, _, _, value)| {
        let key = key.key();
        let labelled = direction.is_none_or(|dir| {
            key.labels()
                .any(|l| l.key() == "direction" && l.value() == dir)
        });
        match value {
            DebugValue::Counter(c) if key.name() == name && labelled => Some(*c),
            _ => None,
        }
    })
}

#[rstest]
#[case(Direction::Inbound)]
#[case(Direction::Outbound)]
fn frame_counter_is_labelled(#[case] direction: Direction) {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        fm::inc_frames(direction);
        fm::inc_frames(direction);
    });
    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        counter_value(&snapshot, fm::FRAMES_PROCESSED, Some(direction.as_str())),
        Some(2)
    );
}

#[test]
fn error_and_queue_full_counters_increment() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        fm::inc_errors();
        fm::inc_queue_full();
        fm::inc_queue_full();
    });
    // Snapshots reset counters, so both are read from one snapshot.
    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_value(&snapshot, fm::ERRORS_TOTAL, None), Some(1));
    assert_eq!(counter_value(&snapshot, fm::QUEUE_FULL_TOTAL, None), Some(2));
}

#[test]
fn links_gauge_tracks_open_and_close() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        fm::inc_links();
        fm::inc_links();
        fm::dec_links();
    });
    let gauge = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .find_map(|(key, _, _, value)| match value {
            DebugValue::Gauge(g) if key.key().name() == fm::LINKS_ACTIVE => Some(g.into_inner()),
            _ => None,
        });
    assert_eq!(gauge, Some(1.0));
}
