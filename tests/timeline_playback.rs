//! Timeline playback: region loop mapping, transport loop splitting,
//! serialization round-trips.

mod helpers;

use helpers::*;
use ostinato::prelude::*;
use ostinato::{AudioRegionData, MidiNote, MidiRegionData};

fn looping_region(id: RegionId) -> Region {
    // region [0, 96000) looping its first 48000 frames
    let mut region = Region::new(
        id,
        0,
        0,
        "looper",
        0,
        96_000,
        RegionKind::Midi(MidiRegionData::default()),
    );
    region.loop_end_pos = 48_000;
    region
}

/// The loop-wrap mapping: timeline 47999 with 4 frames produces local
/// positions {47999, 0, 1, 2} split across the wrap.
#[test]
fn loop_wrap_local_positions() {
    let region = looping_region(RegionId(1));

    let (till, is_loop) = region.frames_till_next_loop_or_end(47_999);
    assert_eq!(till, 1);
    assert!(is_loop);

    // first sub-call: one frame before the wrap
    assert_eq!(region.timeline_frames_to_local(47_999, true), 47_999);
    // second sub-call after the wrap
    assert_eq!(region.timeline_frames_to_local(48_000, true), 0);
    assert_eq!(region.timeline_frames_to_local(48_001, true), 1);
    assert_eq!(region.timeline_frames_to_local(48_002, true), 2);
}

/// A note near the region loop end retriggers after the wrap when the
/// engine plays through it.
#[test]
fn midi_note_retriggers_across_region_loop() {
    let engine = test_engine();
    let core = engine.core();
    let track = engine.add_midi_track("Keys").unwrap();

    let mut data = MidiRegionData::default();
    data.notes.push(MidiNote::new(64, 100, 100, 2000));
    let mut region = Region::new(
        engine.new_region_id(),
        0,
        0,
        "r",
        0,
        96_000,
        RegionKind::Midi(data),
    );
    region.loop_end_pos = 48_000;
    engine.add_region(track.with(|t| t.id), region, 0).unwrap();

    // jump close to the wrap and play across it
    core.transport.locate_frames(47_900);
    engine.play();
    engine.process(256);

    let midi_out = track
        .with(|t| t.processor.with(|p| p.midi_out))
        .unwrap();
    core.registry.with_port(midi_out, |p| {
        // wrap at offset 100; note restarts at local 100 -> offset 200
        let ons: Vec<u32> = p
            .midi_events
            .active
            .iter()
            .filter(|e| e.is_note_on())
            .map(|e| e.frame_offset)
            .collect();
        assert_eq!(ons, vec![200]);
        // the wrap sent an all-notes-off first
        assert!(p.midi_events.active.has_all_notes_off());
    });
}

/// Audio region playback through the whole chain to the master output.
#[test]
fn audio_region_reaches_master() {
    let engine = test_engine();
    let core = engine.core();
    let track = engine.add_audio_track("Drums").unwrap();

    let frames = generate_dc(0.25, 48_000);
    let clip = ostinato::AudioClip::from_frames("dc", frames, 1, 48_000, 32, 120.0).unwrap();
    let pool_id = core.pool.add(clip);

    let region = Region::new(
        engine.new_region_id(),
        0,
        0,
        "beat",
        0,
        48_000,
        RegionKind::Audio(AudioRegionData::new(pool_id)),
    );
    engine.add_region(track.with(|t| t.id), region, 0).unwrap();

    engine.play();
    let (l, r) = run_cycles(&engine, 2);
    assert_signals_equal(&l, &generate_dc(0.25, 256), 1e-6, "left");
    assert_signals_equal(&r, &generate_dc(0.25, 256), 1e-6, "right");
}

/// Region gain and fades shape the audio output.
#[test]
fn audio_region_gain() {
    let engine = test_engine();
    let core = engine.core();
    let track = engine.add_audio_track("Drums").unwrap();

    let clip =
        ostinato::AudioClip::from_frames("dc", generate_dc(1.0, 48_000), 1, 48_000, 32, 120.0)
            .unwrap();
    let pool_id = core.pool.add(clip);

    let mut data = AudioRegionData::new(pool_id);
    data.gain = 0.5;
    let region = Region::new(
        engine.new_region_id(),
        0,
        0,
        "beat",
        0,
        48_000,
        RegionKind::Audio(data),
    );
    engine.add_region(track.with(|t| t.id), region, 0).unwrap();

    engine.play();
    let (l, _) = run_cycles(&engine, 1);
    assert_signals_equal(&l, &generate_dc(0.5, 256), 1e-6, "gain applied");
}

/// Serialize -> deserialize preserves the timeline-to-local mapping for
/// 1000 pseudo-random positions.
#[test]
fn region_serde_roundtrip() {
    let mut region = looping_region(RegionId(7));
    region.clip_start_pos = 1234;

    let json = serde_json::to_string(&region).unwrap();
    let back: Region = serde_json::from_str(&json).unwrap();

    let mut state = 0xdeadbeefu64;
    for _ in 0..1000 {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let pos = (state % 96_000) as i64;
        assert_eq!(
            region.timeline_frames_to_local(pos, true),
            back.timeline_frames_to_local(pos, true),
            "mapping diverged at {pos}"
        );
        assert_eq!(
            region.timeline_frames_to_local(pos, false),
            back.timeline_frames_to_local(pos, false)
        );
    }
}

/// Missing pool clips silence the region without failing the cycle.
#[test]
fn missing_clip_is_silent() {
    let engine = test_engine();
    let track = engine.add_audio_track("Drums").unwrap();

    let region = Region::new(
        engine.new_region_id(),
        0,
        0,
        "ghost",
        0,
        48_000,
        RegionKind::Audio(AudioRegionData::new(999)),
    );
    engine.add_region(track.with(|t| t.id), region, 0).unwrap();

    engine.play();
    let (l, _) = run_cycles(&engine, 2);
    assert_denormal_silence(&l, "missing clip");
}
