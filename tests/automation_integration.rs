//! Automation: interpolation into live control ports during playback.

mod helpers;

use helpers::*;
use ostinato::core::{AutomationMode, AutomationTrack};
use ostinato::prelude::*;
use ostinato::{AutomationRegionData, RegionKind};

/// Linear curve between (0, 0.0) and (1000 frames, 1.0): value at 500
/// frames is 0.5 within 1e-6.
#[test]
fn linear_interpolation_midpoint() {
    let engine = test_engine();
    let track = engine.add_audio_track("Synth").unwrap();
    let core = engine.core();

    let amp_port = track.with(|t| t.channel.fader.with(|f| f.amp));

    let mut points = AutomationRegionData::new();
    points.add_point(AutomationPoint::new(0, 0.0));
    points.add_point(AutomationPoint::new(1000, 1.0));
    let region = Region::new(
        engine.new_region_id(),
        0,
        0,
        "amp ramp",
        0,
        10_000,
        RegionKind::Automation(points),
    );

    track.with_mut(|t| {
        let mut at = AutomationTrack::new(amp_port, 0);
        at.mode = AutomationMode::Read;
        at.add_region(region);
        t.automation_tracks.push(at);
    });

    let at_value = |pos: i64| {
        track.with(|t| {
            t.automation_tracks[0]
                .val_at_pos(pos, true, false)
                .unwrap()
        })
    };
    assert!((at_value(500) - 0.5).abs() < 1e-6);
    assert!((at_value(0) - 0.0).abs() < 1e-6);
    assert!((at_value(1000) - 1.0).abs() < 1e-6);

    // during playback the engine writes the value into the port
    engine.play();
    engine.process(256);
    engine.process(244);
    // playhead is now at 500; the next cycle evaluates it there
    assert_eq!(core.transport.playhead_frames(), 500);
    engine.process(256);

    let value = core
        .registry
        .with_port(amp_port, |p| p.control_value(true))
        .unwrap();
    assert!((value - 0.5).abs() < 1e-3, "port carried {value}");
}

/// Automation values at points are exact (within 1e-6, per the contract).
#[test]
fn point_values_exact() {
    let mut points = AutomationRegionData::new();
    for (pos, value) in [(0i64, 0.1f32), (480, 0.9), (960, 0.4), (2000, 0.65)] {
        points.add_point(AutomationPoint::new(pos, value));
    }
    let region = Region::new(
        RegionId(1),
        0,
        0,
        "pts",
        0,
        10_000,
        RegionKind::Automation(points.clone()),
    );
    let mut at = AutomationTrack::new(ostinato::PortId(1), 0);
    at.add_region(region);

    for (pos, value) in [(0i64, 0.1f32), (480, 0.9), (960, 0.4), (2000, 0.65)] {
        let got = at.val_at_pos(pos, true, false).unwrap();
        assert!(
            (got - value).abs() < 1e-6,
            "point at {pos}: expected {value}, got {got}"
        );
    }
}

/// Curved segments bend the interpolation without moving the endpoints.
#[test]
fn curved_interpolation() {
    let mut points = AutomationRegionData::new();
    points.add_point(
        AutomationPoint::new(0, 0.0)
            .with_curve(CurveOptions::new(CurveAlgorithm::SuperEllipse, 0.7)),
    );
    points.add_point(AutomationPoint::new(1000, 1.0));
    let region = Region::new(
        RegionId(1),
        0,
        0,
        "curve",
        0,
        10_000,
        RegionKind::Automation(points),
    );
    let mut at = AutomationTrack::new(ostinato::PortId(1), 0);
    at.add_region(region);

    let mid = at.val_at_pos(500, true, false).unwrap();
    assert!(mid > 0.0 && mid < 1.0);
    assert!((at.val_at_pos(0, true, false).unwrap() - 0.0).abs() < 1e-6);
    assert!((at.val_at_pos(1000, true, false).unwrap() - 1.0).abs() < 1e-6);
}

/// Off mode leaves the port alone during playback.
#[test]
fn off_mode_does_not_write() {
    let engine = test_engine();
    let track = engine.add_audio_track("Synth").unwrap();
    let core = engine.core();
    let amp_port = track.with(|t| t.channel.fader.with(|f| f.amp));

    let mut points = AutomationRegionData::new();
    points.add_point(AutomationPoint::new(0, 0.0));
    let region = Region::new(
        engine.new_region_id(),
        0,
        0,
        "r",
        0,
        10_000,
        RegionKind::Automation(points),
    );
    track.with_mut(|t| {
        let mut at = AutomationTrack::new(amp_port, 0);
        at.mode = AutomationMode::Off;
        at.add_region(region);
        t.automation_tracks.push(at);
    });

    engine.play();
    engine.process(256);

    let value = core
        .registry
        .with_port(amp_port, |p| p.control_value(false))
        .unwrap();
    assert_eq!(value, 1.0, "amp must stay at its default");
}
