//! The engine facade.

use ostinato_core::{
    AudioClip, AudioEngine, DummyAudioThread, PluginProcessor, PluginSlot, PoolId, ProcCell,
    Region, RegionId, Result, Track, TrackKind, Transport,
};
use ostinato_midi::MidiEvent;
use std::path::Path;
use std::sync::Arc;

/// High-level handle over the core [`AudioEngine`].
///
/// Owns the optional dummy DSP thread and offers the common operations
/// (tracks, regions, plugins, transport) without reaching into the core
/// types. Everything here is also reachable through [`Self::core`].
pub struct OstinatoEngine {
    engine: Arc<AudioEngine>,
    dsp_thread: Option<DummyAudioThread>,
}

impl OstinatoEngine {
    /// Create a new engine builder.
    pub fn builder() -> crate::OstinatoEngineBuilder {
        crate::OstinatoEngineBuilder::default()
    }

    pub(crate) fn from_parts(
        engine: Arc<AudioEngine>,
        dsp_thread: Option<DummyAudioThread>,
    ) -> Self {
        Self { engine, dsp_thread }
    }

    /// The core engine (advanced use).
    pub fn core(&self) -> &Arc<AudioEngine> {
        &self.engine
    }

    pub fn sample_rate(&self) -> u32 {
        self.engine.sample_rate()
    }

    pub fn block_length(&self) -> u32 {
        self.engine.block_length()
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.engine.transport
    }

    /// Whether the dummy DSP thread is driving cycles.
    pub fn has_dsp_thread(&self) -> bool {
        self.dsp_thread.is_some()
    }

    // -- processing (backend boundary) --------------------------------

    /// Process one cycle; called by a backend's realtime callback.
    pub fn process(&self, nframes: u32) {
        self.engine.process(nframes);
    }

    /// Copy the last cycle's master output.
    pub fn copy_output(&self, out_l: &mut [f32], out_r: &mut [f32]) {
        self.engine.copy_output(out_l, out_r);
    }

    /// Run the non-realtime event pump once (buffer-size / sample-rate
    /// changes). The dummy DSP thread does this automatically.
    pub fn process_events(&self) {
        self.engine.process_events();
    }

    // -- tracks -------------------------------------------------------

    pub fn add_midi_track(&self, name: &str) -> Result<Arc<ProcCell<Track>>> {
        self.engine.add_track(name, TrackKind::Midi)
    }

    pub fn add_instrument_track(&self, name: &str) -> Result<Arc<ProcCell<Track>>> {
        self.engine.add_track(name, TrackKind::Instrument)
    }

    pub fn add_audio_track(&self, name: &str) -> Result<Arc<ProcCell<Track>>> {
        self.engine.add_track(name, TrackKind::Audio)
    }

    pub fn add_group_track(&self, name: &str) -> Result<Arc<ProcCell<Track>>> {
        self.engine.add_track(name, TrackKind::Group)
    }

    // -- plugins ------------------------------------------------------

    /// Insert a plugin processor into a track's strip.
    pub fn add_plugin(
        &self,
        track_id: u64,
        slot: PluginSlot,
        processor: Box<dyn PluginProcessor>,
    ) -> Result<u64> {
        self.engine.add_plugin(track_id, slot, processor)
    }

    pub fn remove_plugin(&self, track_id: u64, slot: PluginSlot) -> Result<()> {
        self.engine.remove_plugin(track_id, slot)
    }

    /// Route a track's output to another track (e.g. into a group/bus track).
    pub fn set_track_output(&self, track_id: u64, dest_track_id: u64) -> Result<()> {
        self.engine.set_track_output(track_id, dest_track_id)
    }

    // -- timeline -----------------------------------------------------

    /// Import an audio file into the pool, returning its id.
    pub fn import_audio(&self, path: &Path) -> Result<PoolId> {
        let clip = AudioClip::from_file(path, self.engine.transport.bpm())?;
        Ok(self.engine.pool.add(clip))
    }

    /// Add a region to a track lane.
    pub fn add_region(&self, track_id: u64, region: Region, lane: usize) -> Result<RegionId> {
        self.engine.add_region(track_id, region, lane)
    }

    /// Remove a region from a track lane.
    pub fn remove_region(&self, track_id: u64, region_id: RegionId) -> Result<()> {
        self.engine.remove_region(track_id, region_id)
    }

    /// Allocate a fresh region id.
    pub fn new_region_id(&self) -> RegionId {
        RegionId(self.engine.ids.alloc())
    }

    // -- transport ----------------------------------------------------

    pub fn play(&self) {
        self.engine.start_playback();
    }

    pub fn stop(&self) {
        self.engine.stop_playback();
    }

    pub fn is_playing(&self) -> bool {
        self.engine.transport.is_rolling()
    }

    // -- MIDI ---------------------------------------------------------

    /// Queue an external MIDI event at the hardware input boundary.
    pub fn inject_midi(&self, event: MidiEvent) {
        self.engine.inject_midi(event);
    }

    /// Preview a note from the piano roll on the given track.
    pub fn preview_note(&self, track_id: u64, note: u8, velocity: u8) {
        self.engine.set_piano_roll_track(Some(track_id));
        self.engine
            .queue_piano_roll_event(MidiEvent::note_on(0, 0, note, velocity));
    }
}

impl Drop for OstinatoEngine {
    fn drop(&mut self) {
        self.engine.activate(false);
        if let Some(thread) = &mut self.dsp_thread {
            thread.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facade_roundtrip() {
        let engine = OstinatoEngine::builder()
            .sample_rate(48000)
            .block_length(256)
            .build()
            .unwrap();

        let track = engine.add_instrument_track("Keys").unwrap();
        assert!(track.with(|t| t.kind) == TrackKind::Instrument);

        engine.play();
        assert!(engine.is_playing());
        engine.stop();
        assert!(!engine.is_playing());
    }

    #[test]
    fn test_manual_cycles() {
        let engine = OstinatoEngine::builder()
            .sample_rate(48000)
            .block_length(256)
            .build()
            .unwrap();

        engine.process(256);
        let mut l = vec![1.0; 256];
        let mut r = vec![1.0; 256];
        engine.copy_output(&mut l, &mut r);
        assert!(l.iter().all(|&v| v.abs() < 1e-9));
    }
}
