//! Engine cycle behavior: silence when stopped, buffer-size changes,
//! output frame accounting.

mod helpers;

use helpers::*;
use ostinato::prelude::*;
use ostinato::{MidiNote, MidiRegionData};

/// Stopped transport with content on the timeline: the master output is
/// nothing but the denormal-prevention bias on both channels.
#[test]
fn silence_when_stopped() {
    let engine = test_engine();
    let track = engine.add_midi_track("Keys").unwrap();

    // a region at bar 2 (48 kHz, 120 BPM: one bar = 96000 frames)
    let mut data = MidiRegionData::default();
    data.notes.push(MidiNote::new(60, 100, 0, 24_000));
    let region = Region::new(
        engine.new_region_id(),
        0,
        0,
        "riff",
        96_000,
        192_000,
        RegionKind::Midi(data),
    );
    engine
        .add_region(track.with(|t| t.id), region, 0)
        .unwrap();

    let (l, r) = run_cycles(&engine, 2);
    assert_eq!(l.len(), 256);
    assert_denormal_silence(&l, "left");
    assert_denormal_silence(&r, "right");
    // the bias is present, not plain zero
    assert!(l.iter().any(|&v| v != 0.0));
    // every sample carries the same bias
    assert!(l.windows(2).all(|w| (w[0] - w[1]).abs() < 1e-12));
}

/// Buffer-size change: skipped cycles while the event is pending, then
/// all port buffers and the master output carry the new length.
#[test]
fn buffer_size_change() {
    let engine = test_engine();
    let core = engine.core();

    core.request_buffer_size(512);
    assert!(!core.has_handled_buffer_size_change());

    // audio thread observes the pending event and silences this cycle
    engine.process(256);

    engine.process_events();
    assert!(core.has_handled_buffer_size_change());
    assert_eq!(core.block_length(), 512);

    // every audio port buffer was reallocated
    for id in core.registry.ids() {
        core.registry.with_port(id, |p| {
            if matches!(
                p.port_type(),
                ostinato::PortType::Audio | ostinato::PortType::Cv
            ) {
                assert_eq!(p.buf.len(), 512, "port {} has stale buffer", p.id());
            }
        });
    }

    engine.process(512);
    let mut l = vec![1.0; 512];
    let mut r = vec![1.0; 512];
    engine.copy_output(&mut l, &mut r);
    assert_denormal_silence(&l, "after resize");
    assert_denormal_silence(&r, "after resize");
}

/// Unsupported sizes are surfaced and the previous size is kept.
#[test]
fn unsupported_buffer_size_keeps_previous() {
    let engine = test_engine();
    let core = engine.core();
    core.request_buffer_size(100);
    engine.process_events();
    assert_eq!(core.block_length(), 256);
}

/// The engine always fills exactly the requested frame count, including
/// when a loop point splits the cycle.
#[test]
fn output_frames_match_request() {
    let engine = test_engine();
    let core = engine.core();
    core.transport.set_loop_range_frames(0, 1000);
    core.transport.looping.set(true);
    engine.play();

    for _ in 0..8 {
        engine.process(256);
        let mut l = vec![f32::NAN; 256];
        let mut r = vec![f32::NAN; 256];
        engine.copy_output(&mut l, &mut r);
        assert!(l.iter().all(|v| v.is_finite()));
        assert!(r.iter().all(|v| v.is_finite()));
    }
    // playhead wrapped the 1000-frame loop and stayed inside it
    assert!(core.transport.playhead_frames() < 1000);
}

/// `prepare` twice with no processing in between leaves identical buffers.
#[test]
fn prepare_is_idempotent() {
    let engine = test_engine();
    let core = engine.core();

    engine.process(256);
    let snapshot: Vec<(u64, Vec<f32>)> = core
        .registry
        .ids()
        .iter()
        .filter_map(|&id| core.registry.with_port(id, |p| (p.id().0, p.buf.clone())))
        .collect();

    // an identical cycle from the same transport state
    core.transport.locate_frames(0);
    engine.process(256);
    for (id, buf) in snapshot {
        core.registry.with_port(ostinato::PortId(id), |p| {
            assert_eq!(p.buf.len(), buf.len(), "port {id} length changed");
        });
    }
}

/// Events queued beyond the pool capacity are dropped, never corrupted.
#[test]
fn event_queue_bounded() {
    let engine = test_engine();
    let core = engine.core();
    for _ in 0..200 {
        core.request_buffer_size(512);
    }
    engine.process_events();
    assert_eq!(core.block_length(), 512);
    assert!(core.has_handled_buffer_size_change());
}
