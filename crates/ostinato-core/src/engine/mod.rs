//! The audio engine.
//!
//! Owns the transport, pool, tracklist, control room and graph, and drives
//! one cycle per backend callback. The audio path never blocks: the cycle
//! takes the port operation semaphore with a try-acquire and outputs
//! silence whenever a control thread is rewiring, an event is pending, or
//! the engine is not running.

pub mod dummy;
pub mod events;

use crate::cell::ProcCell;
use crate::config::{EngineConfig, BLOCK_LENGTHS, SAMPLE_RATES};
use crate::control_room::ControlRoom;
use crate::error::{Error, Result};
use crate::graph::{scheduler::GraphScheduler, GraphCtx, ProcessingGraph};
use crate::ids::IdAllocator;
use crate::lockfree::{AtomicFlag, AtomicFloat, CycleSemaphore};
use crate::metering::{midi_activity_pair, MidiActivityRing, MidiActivityTap};
use crate::plugin::{PluginInstance, PluginProcessor, PluginSlot};
use crate::pool::AudioPool;
use crate::port::{
    PortConnectionManager, PortFlags, PortFlow, PortId, PortOwner, PortRegistry, PortType,
};
use crate::region::RegionId;
use crate::time::TimeInfo;
use crate::track::{Track, TrackKind, Tracklist};
use crate::transport::{Metronome, PositionInfo, Transport};
use arc_swap::ArcSwapOption;
use events::{EngineEvent, EngineEventKind, EngineEventQueue};
use ostinato_midi::MidiEvent;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Bounce (offline render) mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BounceMode {
    #[default]
    Off,
    On,
    /// Regions inherit their track's bounce flag.
    Inherit,
}

/// Audio-thread-only cycle bookkeeping.
struct CycleState {
    pos_before: PositionInfo,
    pos_current: PositionInfo,
    /// Backend-facing output, copied out of the monitor ports at cycle end.
    out_l: Vec<f32>,
    out_r: Vec<f32>,
}

/// The realtime audio engine.
pub struct AudioEngine {
    pub cycle: AtomicU64,
    block_length: AtomicU32,
    sample_rate: AtomicU32,

    pub registry: Arc<PortRegistry>,
    pub connections: Arc<PortConnectionManager>,
    pub pool: Arc<AudioPool>,
    pub transport: Arc<Transport>,
    pub tracklist: Arc<ProcCell<Tracklist>>,
    pub control_room: Arc<ControlRoom>,
    pub ids: Arc<IdAllocator>,

    graph: ArcSwapOption<ProcessingGraph>,
    scheduler: GraphScheduler,

    /// One permit; audio thread try-acquires per cycle, mutators block.
    port_operation_lock: CycleSemaphore,
    pub run: AtomicFlag,
    pub exporting: AtomicFlag,
    /// Send note-offs everywhere on the next cycle.
    pub panic: AtomicFlag,
    bounce_mode: ProcCell<BounceMode>,

    ev_queue: EngineEventQueue,
    processing_events: AtomicFlag,
    handled_buffer_size_change: AtomicFlag,

    denormal_positive: AtomicFlag,
    denormal_prevention_val: AtomicFloat,

    /// Master bus output exposed to the backend.
    pub monitor_out: (PortId, PortId),
    /// Hardware MIDI input exposed to the backend.
    pub midi_in: PortId,
    /// Manual note presses from the piano roll; read directly by the
    /// targeted track's processor instead of being a graph node, so
    /// changing the target never requires a graph rebuild.
    pub midi_editor_manual_press: PortId,
    /// Track currently receiving piano-roll presses (0 = none).
    piano_roll_track: AtomicU64,

    metronome: ProcCell<Metronome>,
    /// Audio-thread half of the MIDI activity feed to the UI.
    midi_activity: ProcCell<MidiActivityRing>,
    midi_activity_tap: parking_lot::Mutex<Option<MidiActivityTap>>,
    remaining_latency_preroll: AtomicU32,
    master_track_id: u64,

    cycle_state: ProcCell<CycleState>,

    pub xrun_count: AtomicU64,
    last_xrun_notification_ms: AtomicU64,
    /// Set when the audio thread hit an internal precondition failure and
    /// silenced the cycle; the UI clears it after showing a warning.
    pub silenced: AtomicFlag,

    pre_setup_done: AtomicFlag,
    setup_done: AtomicFlag,
    activated: AtomicFlag,
}

impl AudioEngine {
    /// Create an engine with a master track, monitor wiring and hardware
    /// boundary ports. Call `pre_setup`/`setup`/`activate(true)` before
    /// the first `process`.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(PortRegistry::new());
        let connections = Arc::new(PortConnectionManager::new());
        let ids = Arc::new(IdAllocator::new());
        let control_room = Arc::new(ControlRoom::new(&ids, &registry));
        let transport = Arc::new(Transport::new(config.sample_rate));

        let monitor_out = (
            registry.create(
                PortType::Audio,
                PortFlow::Output,
                "Monitor out L",
                "monitor_out_l",
                PortOwner::Engine,
            ),
            registry.create(
                PortType::Audio,
                PortFlow::Output,
                "Monitor out R",
                "monitor_out_r",
                PortOwner::Engine,
            ),
        );
        registry.with_port(monitor_out.0, |p| p.set_exposed(true));
        registry.with_port(monitor_out.1, |p| p.set_exposed(true));

        let midi_in = registry.create(
            PortType::Midi,
            PortFlow::Input,
            "MIDI in",
            "midi_in",
            PortOwner::Engine,
        );
        registry.with_port(midi_in, |p| p.set_exposed(true));

        let midi_editor_manual_press = registry.alloc_id();
        let manual_press = crate::port::Port::new(
            midi_editor_manual_press,
            PortType::Midi,
            PortFlow::Input,
            "MIDI Editor Manual Press",
            "midi_editor_manual_press",
            PortOwner::Engine,
        )
        .with_flags(PortFlags::PIANO_ROLL);
        registry.insert(manual_press);

        // monitor fader feeds the engine outs
        let (mon_l, mon_r) = control_room
            .monitor_fader
            .with(|f| f.stereo_out)
            .expect("monitor fader is audio");
        connections.ensure_connect(mon_l, monitor_out.0, 1.0, true);
        connections.ensure_connect(mon_r, monitor_out.1, 1.0, true);

        // the master track
        let mut tracklist = Tracklist::new();
        let master = Track::new(ids.alloc(), "Master", TrackKind::Master, &ids, &registry);
        let master_track_id = master.id;
        master
            .processor
            .with(|p| master.channel.connect(p, &connections));
        let (master_out_l, master_out_r) =
            master.channel.stereo_out.expect("master is audio");
        let (mon_in_l, mon_in_r) = control_room
            .monitor_fader
            .with(|f| f.stereo_in)
            .expect("monitor fader is audio");
        connections.ensure_connect(master_out_l, mon_in_l, 1.0, true);
        connections.ensure_connect(master_out_r, mon_in_r, 1.0, true);
        tracklist.add(master);

        let block_length = config.block_length;
        let sample_rate = config.sample_rate;
        let workers = config.effective_workers();
        let (midi_activity_ring, midi_activity_tap) =
            midi_activity_pair(crate::config::MIDI_BUF_SIZE);

        let engine = Self {
            cycle: AtomicU64::new(0),
            block_length: AtomicU32::new(block_length),
            sample_rate: AtomicU32::new(sample_rate),
            registry,
            connections,
            pool: Arc::new(AudioPool::new()),
            transport,
            tracklist: Arc::new(ProcCell::new(tracklist)),
            control_room,
            ids,
            graph: ArcSwapOption::from(None),
            scheduler: GraphScheduler::new(workers),
            port_operation_lock: CycleSemaphore::new(1),
            run: AtomicFlag::new(false),
            exporting: AtomicFlag::new(false),
            panic: AtomicFlag::new(false),
            bounce_mode: ProcCell::new(BounceMode::Off),
            ev_queue: EngineEventQueue::new(),
            processing_events: AtomicFlag::new(false),
            handled_buffer_size_change: AtomicFlag::new(true),
            denormal_positive: AtomicFlag::new(true),
            denormal_prevention_val: AtomicFloat::new(1e-12),
            monitor_out,
            midi_in,
            midi_editor_manual_press,
            piano_roll_track: AtomicU64::new(0),
            metronome: ProcCell::new(Metronome::new(sample_rate)),
            midi_activity: ProcCell::new(midi_activity_ring),
            midi_activity_tap: parking_lot::Mutex::new(Some(midi_activity_tap)),
            remaining_latency_preroll: AtomicU32::new(0),
            master_track_id,
            cycle_state: ProcCell::new(CycleState {
                pos_before: PositionInfo::default(),
                pos_current: PositionInfo::default(),
                out_l: vec![0.0; block_length as usize],
                out_r: vec![0.0; block_length as usize],
            }),
            xrun_count: AtomicU64::new(0),
            last_xrun_notification_ms: AtomicU64::new(0),
            silenced: AtomicFlag::new(false),
            pre_setup_done: AtomicFlag::new(false),
            setup_done: AtomicFlag::new(false),
            activated: AtomicFlag::new(false),
        };
        Ok(engine)
    }

    pub fn master_track_id(&self) -> u64 {
        self.master_track_id
    }

    pub fn block_length(&self) -> u32 {
        self.block_length.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Acquire)
    }

    pub fn denormal_prevention_val(&self) -> f32 {
        self.denormal_prevention_val.get()
    }

    pub fn metronome(&self) -> &ProcCell<Metronome> {
        &self.metronome
    }

    /// Whether `pre_setup` and `setup` both completed.
    pub fn is_set_up(&self) -> bool {
        self.pre_setup_done.get() && self.setup_done.get()
    }

    pub fn is_activated(&self) -> bool {
        self.activated.get()
    }

    // -----------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------

    /// Allocate port buffers. Called once before `setup`.
    pub fn pre_setup(&self) {
        self.registry.realloc_buffers(self.block_length());
        self.pre_setup_done.set(true);
    }

    /// Build the initial graph.
    pub fn setup(&self) -> Result<()> {
        self.recalc_graph(false)?;
        self.setup_done.set(true);
        Ok(())
    }

    /// Start or stop processing. Deactivation leaves state intact.
    pub fn activate(&self, activate: bool) {
        self.run.set(activate);
        self.activated.set(activate);
        tracing::info!(activate, "engine activation changed");
    }

    // -----------------------------------------------------------------
    // Graph mutation (control thread)
    // -----------------------------------------------------------------

    /// Rebuild (or, when `soft`, just re-latency) the processing graph.
    ///
    /// Caller must hold the port operation lock (all public mutators here
    /// do).
    pub fn recalc_graph(&self, soft: bool) -> Result<()> {
        if soft {
            if let Some(graph) = self.graph.load_full() {
                graph.update_latencies();
                return Ok(());
            }
        }
        let boundary = [self.monitor_out.0, self.monitor_out.1, self.midi_in];
        let graph = self.tracklist.with(|tracklist| {
            ProcessingGraph::build(
                tracklist,
                &self.control_room,
                &self.registry,
                &self.connections.snapshot(),
                &boundary,
            )
        })?;
        self.graph.store(Some(Arc::new(graph)));
        Ok(())
    }

    /// Add a track, route it to the master bus and rebuild the graph.
    pub fn add_track(
        &self,
        name: impl Into<String>,
        kind: TrackKind,
    ) -> Result<Arc<ProcCell<Track>>> {
        let _guard = self.port_operation_lock.acquire_guard();

        let mut track = Track::new(self.ids.alloc(), name, kind, &self.ids, &self.registry);
        track
            .processor
            .with(|p| track.channel.connect(p, &self.connections));

        // audio-out tracks feed the master processor
        if let Some((out_l, out_r)) = track.channel.stereo_out {
            if kind != TrackKind::Master {
                let master = self
                    .tracklist
                    .with(|tl| tl.get(self.master_track_id))
                    .ok_or(Error::TrackNotFound(self.master_track_id))?;
                let (m_in_l, m_in_r) = master
                    .with(|m| m.processor.with(|p| p.stereo_in))
                    .expect("master has audio inputs");
                self.connections.ensure_connect(out_l, m_in_l, 1.0, true);
                self.connections.ensure_connect(out_r, m_in_r, 1.0, true);
                track.channel.output_track_id = Some(self.master_track_id);
                master.with_mut(|m| m.children.push(track.id));
            }
        }

        let cell = self.tracklist.with_mut(|tl| tl.add(track));
        self.registry.realloc_buffers(self.block_length());
        self.recalc_graph(false)?;
        Ok(cell)
    }

    /// Instantiate and insert a plugin. A failing instantiation keeps the
    /// plugin in the strip, marked failed, bypassed by processing.
    pub fn add_plugin(
        &self,
        track_id: u64,
        slot: PluginSlot,
        processor: Box<dyn PluginProcessor>,
    ) -> Result<u64> {
        let _guard = self.port_operation_lock.acquire_guard();

        let track = self
            .tracklist
            .with(|tl| tl.get(track_id))
            .ok_or(Error::TrackNotFound(track_id))?;

        let mut instance =
            PluginInstance::new(self.ids.alloc(), slot, processor, &self.registry);
        let plugin_id = instance.id;
        if instance.instantiate().is_err() {
            // kept in the strip, bypassed by the failure flag
        } else {
            instance.prepare(self.sample_rate(), self.block_length());
        }
        let plugin = Arc::new(ProcCell::new(instance));

        let placed = track.with_mut(|t| {
            let processor = t.processor.clone();
            processor.with(|p| t.channel.add_plugin(plugin.clone(), slot, p, &self.connections))
        });
        if let Err(err) = placed {
            // drop the orphan ports created for the rejected instance
            plugin.with_mut(|p| {
                for port in p.ports() {
                    self.connections.disconnect_all_for_port(port);
                    self.registry.remove(port);
                }
            });
            return Err(err);
        }

        self.registry.realloc_buffers(self.block_length());
        self.recalc_graph(false)?;
        Ok(plugin_id)
    }

    /// Remove a plugin from its slot, rewiring its neighbors.
    pub fn remove_plugin(&self, track_id: u64, slot: PluginSlot) -> Result<()> {
        let _guard = self.port_operation_lock.acquire_guard();

        let track = self
            .tracklist
            .with(|tl| tl.get(track_id))
            .ok_or(Error::TrackNotFound(track_id))?;
        track.with_mut(|t| {
            let processor = t.processor.clone();
            processor.with(|p| {
                t.channel
                    .remove_plugin(slot, p, &self.registry, &self.connections)
            })
        });
        self.recalc_graph(false)?;
        Ok(())
    }

    /// Add a region to a track lane. Region edits take the port operation
    /// lock so a rolling cycle never observes a half-edited lane.
    pub fn add_region(
        &self,
        track_id: u64,
        region: crate::region::Region,
        lane: usize,
    ) -> Result<RegionId> {
        let _guard = self.port_operation_lock.acquire_guard();
        let track = self
            .tracklist
            .with(|tl| tl.get(track_id))
            .ok_or(Error::TrackNotFound(track_id))?;
        Ok(track.with_mut(|t| t.add_region(region, lane)))
    }

    /// Remove a region from a track lane.
    pub fn remove_region(&self, track_id: u64, region_id: RegionId) -> Result<()> {
        let _guard = self.port_operation_lock.acquire_guard();
        let track = self
            .tracklist
            .with(|tl| tl.get(track_id))
            .ok_or(Error::TrackNotFound(track_id))?;
        track
            .with_mut(|t| t.remove_region(region_id))
            .map(|_| ())
            .ok_or(Error::RegionNotFound(region_id.0))
    }

    /// Expose a port at the audio-I/O boundary and attach a metering ring.
    /// Returns the non-realtime tap feeding meters/scopes. Idempotent on
    /// the exposure flag; a fresh ring replaces any previous one.
    pub fn expose_port(&self, id: PortId) -> Result<crate::metering::MeterTap> {
        let _guard = self.port_operation_lock.acquire_guard();
        let (ring, tap) = crate::metering::meter_pair(self.block_length());
        self.registry
            .with_port_mut(id, |p| {
                p.set_exposed(true);
                p.attach_meter(ring);
            })
            .ok_or(Error::PortNotFound(id.0))?;
        Ok(tap)
    }

    /// Re-route a track's channel output into a group (or back to the
    /// master bus).
    pub fn set_track_output(&self, track_id: u64, dest_track_id: u64) -> Result<()> {
        let _guard = self.port_operation_lock.acquire_guard();

        let track = self
            .tracklist
            .with(|tl| tl.get(track_id))
            .ok_or(Error::TrackNotFound(track_id))?;
        let dest = self
            .tracklist
            .with(|tl| tl.get(dest_track_id))
            .ok_or(Error::TrackNotFound(dest_track_id))?;

        let (out_l, out_r) = track
            .with(|t| t.channel.stereo_out)
            .ok_or_else(|| Error::ConnectionRejected("track has no audio output".into()))?;
        let (dest_in_l, dest_in_r) = dest
            .with(|t| t.processor.with(|p| p.stereo_in))
            .ok_or_else(|| Error::ConnectionRejected("destination has no audio input".into()))?;

        // detach from the previous output track
        if let Some(old_id) = track.with(|t| t.channel.output_track_id) {
            if let Some(old) = self.tracklist.with(|tl| tl.get(old_id)) {
                if let Some((old_l, old_r)) = old.with(|t| t.processor.with(|p| p.stereo_in)) {
                    let _ = self.connections.disconnect(out_l, old_l);
                    let _ = self.connections.disconnect(out_r, old_r);
                }
                old.with_mut(|t| t.children.retain(|&c| c != track_id));
            }
        }

        self.connections.ensure_connect(out_l, dest_in_l, 1.0, true);
        self.connections.ensure_connect(out_r, dest_in_r, 1.0, true);
        track.with_mut(|t| t.channel.output_track_id = Some(dest_track_id));
        dest.with_mut(|t| t.children.push(track_id));

        self.recalc_graph(false)
    }

    /// Connect two ports, rejecting duplicates and cycles.
    pub fn connect_ports(
        &self,
        src: PortId,
        dst: PortId,
        multiplier: f32,
        locked: bool,
    ) -> Result<()> {
        let _guard = self.port_operation_lock.acquire_guard();
        self.connections.connect(src, dst, multiplier, locked)?;
        if let Err(err) = self.recalc_graph(false) {
            // roll back so the graph stays valid
            let _ = self.connections.disconnect(src, dst);
            self.recalc_graph(false)?;
            return Err(err);
        }
        Ok(())
    }

    pub fn disconnect_ports(&self, src: PortId, dst: PortId) -> Result<()> {
        let _guard = self.port_operation_lock.acquire_guard();
        self.connections.disconnect(src, dst)?;
        self.recalc_graph(false)
    }

    // -----------------------------------------------------------------
    // Transport control
    // -----------------------------------------------------------------

    /// Start rolling, arming the latency preroll and taking automation
    /// snapshots.
    pub fn start_playback(&self) {
        if let Some(graph) = self.graph.load_full() {
            self.remaining_latency_preroll
                .store(graph.remaining_latency_preroll(), Ordering::Release);
        }
        {
            let _guard = self.port_operation_lock.acquire_guard();
            self.tracklist.with_mut(|tl| {
                for track in tl.iter() {
                    track.with_mut(|t| {
                        for at in &mut t.automation_tracks {
                            at.take_snapshots();
                        }
                    });
                }
            });
        }
        self.transport.request_roll();
    }

    pub fn stop_playback(&self) {
        self.transport.request_pause();
        let _guard = self.port_operation_lock.acquire_guard();
        self.tracklist.with_mut(|tl| {
            for track in tl.iter() {
                track.with_mut(|t| {
                    for at in &mut t.automation_tracks {
                        at.finish_recording();
                    }
                });
            }
        });
    }

    // -----------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------

    /// Request a new buffer size from the event pump.
    pub fn request_buffer_size(&self, block_length: u32) {
        self.handled_buffer_size_change.set(false);
        self.ev_queue
            .push(EngineEventKind::BufferSizeChange, block_length, 0.0);
    }

    pub fn request_sample_rate(&self, sample_rate: u32) {
        self.ev_queue
            .push(EngineEventKind::SampleRateChange, sample_rate, 0.0);
    }

    pub fn has_handled_buffer_size_change(&self) -> bool {
        self.handled_buffer_size_change.get()
    }

    /// Non-realtime event pump. Drains the queue, applies the changes
    /// under the port operation lock, and lets the audio thread resume.
    pub fn process_events(&self) {
        if self.ev_queue.is_empty() {
            return;
        }
        self.processing_events.set(true);
        let events = self.ev_queue.drain_deduped();
        for event in events {
            self.handle_event(event);
        }
        self.processing_events.set(false);
    }

    fn handle_event(&self, event: EngineEvent) {
        match event.kind {
            EngineEventKind::BufferSizeChange => {
                let new_size = event.uint_arg;
                if !BLOCK_LENGTHS.contains(&new_size) {
                    tracing::warn!(new_size, "unsupported buffer size, keeping previous");
                    self.handled_buffer_size_change.set(true);
                    return;
                }
                let _guard = self.port_operation_lock.acquire_guard();
                self.realloc_port_buffers(new_size);
                self.handled_buffer_size_change.set(true);
                tracing::info!(new_size, "buffer size changed");
            }
            EngineEventKind::SampleRateChange => {
                let new_rate = event.uint_arg;
                if !SAMPLE_RATES.contains(&new_rate) {
                    tracing::warn!(new_rate, "unsupported sample rate, keeping previous");
                    return;
                }
                let _guard = self.port_operation_lock.acquire_guard();
                self.sample_rate.store(new_rate, Ordering::Release);
                self.transport.set_sample_rate(new_rate);
                self.metronome.with_mut(|m| m.set_sample_rate(new_rate));
                self.tracklist.with(|tl| {
                    for track in tl.iter() {
                        track.with(|t| {
                            for plugin in t.channel.plugins() {
                                plugin.with_mut(|p| p.prepare(new_rate, self.block_length()));
                            }
                        });
                    }
                });
                tracing::info!(new_rate, "sample rate changed");
            }
        }
    }

    /// Reallocate every port buffer for a new block length.
    ///
    /// Caller must hold the port operation lock.
    pub fn realloc_port_buffers(&self, block_length: u32) {
        self.block_length.store(block_length, Ordering::Release);
        self.registry.realloc_buffers(block_length);
        self.cycle_state.with_mut(|s| {
            s.out_l.clear();
            s.out_l.resize(block_length as usize, 0.0);
            s.out_r.clear();
            s.out_r.resize(block_length as usize, 0.0);
        });
    }

    // -----------------------------------------------------------------
    // MIDI I/O
    // -----------------------------------------------------------------

    /// Queue an external MIDI event (hardware input boundary).
    pub fn inject_midi(&self, event: MidiEvent) {
        if let Some(sender) = self
            .registry
            .with_port(self.midi_in, |p| p.midi_sender())
            .flatten()
        {
            let _ = sender.try_send(event);
        }
    }

    /// UI half of the MIDI activity feed; can be taken exactly once.
    pub fn take_midi_activity_tap(&self) -> Option<MidiActivityTap> {
        self.midi_activity_tap.lock().take()
    }

    /// Target track for piano-roll presses.
    pub fn set_piano_roll_track(&self, track_id: Option<u64>) {
        self.piano_roll_track
            .store(track_id.unwrap_or(0), Ordering::Release);
    }

    /// Queue a manual press from the piano roll.
    pub fn queue_piano_roll_event(&self, event: MidiEvent) {
        if let Some(sender) = self
            .registry
            .with_port(self.midi_editor_manual_press, |p| p.midi_sender())
            .flatten()
        {
            let _ = sender.try_send(event);
        }
    }

    pub fn set_bounce_mode(&self, mode: BounceMode) {
        let _guard = self.port_operation_lock.acquire_guard();
        self.bounce_mode.with_mut(|m| *m = mode);
    }

    // -----------------------------------------------------------------
    // The cycle
    // -----------------------------------------------------------------

    /// Process one backend callback's worth of audio.
    pub fn process(&self, nframes: u32) {
        self.cycle.fetch_add(1, Ordering::AcqRel);
        let cycle_start = Instant::now();

        // flip the denormal bias each cycle to avoid a DC offset
        let positive = !self.denormal_positive.get();
        self.denormal_positive.set(positive);
        let denormal_val = if positive { 1e-12 } else { -1e-12 };
        self.denormal_prevention_val.set(denormal_val);

        if !self.port_operation_lock.try_acquire() {
            self.clear_output_buffers(nframes);
            return;
        }
        if !self.run.get() || !self.ev_queue.is_empty() || self.processing_events.get() {
            self.port_operation_lock.release();
            self.clear_output_buffers(nframes);
            return;
        }
        let Some(graph) = self.graph.load_full() else {
            self.port_operation_lock.release();
            self.clear_output_buffers(nframes);
            self.silenced.set(true);
            return;
        };
        if nframes > self.block_length() {
            // backend delivered more frames than our buffers hold
            self.port_operation_lock.release();
            self.clear_output_buffers(nframes);
            self.silenced.set(true);
            return;
        }

        graph.prepare_ports(nframes, denormal_val);
        self.push_midi_activity();
        if self.panic.swap(false) {
            self.send_panic();
        }

        let mut remaining = nframes;
        let mut offset = 0u32;
        while remaining > 0 {
            let mut split = remaining;

            let preroll = self.remaining_latency_preroll.load(Ordering::Acquire);
            if preroll > 0 {
                split = split.min(preroll);
            }
            let rolling = self.transport.is_rolling();
            if rolling {
                if let Some(till_loop) = self.transport.frames_till_loop_end() {
                    if till_loop > 0 {
                        split = split.min(till_loop.min(u32::MAX as i64) as u32);
                    }
                }
            }

            self.apply_automation(rolling);

            let ctx = GraphCtx {
                registry: self.registry.clone(),
                connections: self.connections.snapshot(),
                pool: self.pool.clone(),
                transport: self.transport.clone(),
                tracklist: self.tracklist.clone(),
                control_room: self.control_room.clone(),
                denormal_prevention_val: denormal_val,
                rolling: rolling && preroll == 0,
                bouncing: self.bounce_mode.with(|m| *m != BounceMode::Off),
                piano_roll_port: Some(self.midi_editor_manual_press),
                piano_roll_track: match self.piano_roll_track.load(Ordering::Acquire) {
                    0 => None,
                    id => Some(id),
                },
            };
            let time = TimeInfo::new(self.transport.playhead_frames(), offset, split);

            self.scheduler.run_cycle(&graph, ctx, time);
            self.process_metronome(time);

            let preroll_consumed = preroll.min(split);
            if preroll_consumed > 0 {
                self.remaining_latency_preroll
                    .fetch_sub(preroll_consumed, Ordering::AcqRel);
            }
            let roll = if rolling { split - preroll_consumed } else { 0 };
            let pos = self.transport.post_process(roll, split);
            self.cycle_state.with_mut(|s| {
                s.pos_before = s.pos_current;
                s.pos_current = pos;
            });

            remaining -= split;
            offset += split;
        }

        self.fill_out_bufs(nframes);
        self.port_operation_lock.release();

        // cycle overrun accounting, rate-limited to one notification/sec
        let budget_us = nframes as u64 * 1_000_000 / self.sample_rate() as u64;
        let elapsed_us = cycle_start.elapsed().as_micros() as u64;
        if elapsed_us > budget_us {
            self.xrun_count.fetch_add(1, Ordering::AcqRel);
            let now_ms = elapsed_ms_since_epoch();
            let last = self.last_xrun_notification_ms.load(Ordering::Acquire);
            if now_ms.saturating_sub(last) > 1000 {
                self.last_xrun_notification_ms
                    .store(now_ms, Ordering::Release);
                tracing::warn!(elapsed_us, budget_us, "xrun");
            }
        }
    }

    /// Evaluate automation tracks into their control ports, and record
    /// where armed. Runs on the audio thread before the graph kicks.
    fn apply_automation(&self, rolling: bool) {
        let playhead = self.transport.playhead_frames();
        let now_ms = elapsed_ms_since_epoch();
        // SAFETY: sequential on the audio thread, before any node runs.
        let tracklist = unsafe { self.tracklist.get() };
        for track in tracklist.iter() {
            // SAFETY: as above.
            let track = unsafe { track.get_mut() };
            for at in &mut track.automation_tracks {
                let Some(last_change) = self
                    .registry
                    .with_port(at.port_id, |p| p.ms_since_last_change())
                else {
                    continue;
                };
                let last_change_ms = now_ms.saturating_sub(last_change);

                if rolling && at.should_be_recording(now_ms, last_change_ms) {
                    let value = self
                        .registry
                        .with_port(at.port_id, |p| p.control_value(true))
                        .unwrap_or(0.0);
                    at.record_sample(playhead, value, RegionId(self.ids.alloc()));
                } else if at.should_read_automation(now_ms, last_change_ms) {
                    if let Some(value) = at.val_at_pos(playhead, false, rolling) {
                        self.registry
                            .with_port(at.port_id, |p| p.set_control_value(value, true));
                    }
                }
            }
        }
    }

    /// Mix metronome clicks into the engine outs for this window.
    fn process_metronome(&self, time: TimeInfo) {
        let (out_l_id, out_r_id) = self.monitor_out;
        let range = time.range();
        let (Some(l_cell), Some(r_cell)) =
            (self.registry.cell(out_l_id), self.registry.cell(out_r_id))
        else {
            return;
        };
        // SAFETY: the graph has finished this window; the engine outs are
        // only touched by the audio thread afterwards.
        unsafe {
            let l = &mut l_cell.get_mut().buf[range.clone()];
            let r = &mut r_cell.get_mut().buf[range];
            self.metronome
                .get_mut()
                .process(&self.transport, l, r, time.nframes);
        }
    }

    /// Feed incoming hardware MIDI to the UI activity ring.
    fn push_midi_activity(&self) {
        let Some(cell) = self.registry.cell(self.midi_in) else {
            return;
        };
        // SAFETY: audio thread, before any node runs.
        let port = unsafe { cell.get() };
        if port.midi_events.active.is_empty() {
            return;
        }
        self.midi_activity.with_mut(|ring| {
            for &ev in &port.midi_events.active {
                ring.push(ev.into());
            }
        });
    }

    /// Queue note-offs on every MIDI input (panic).
    fn send_panic(&self) {
        for id in self.registry.ids() {
            self.registry.with_port_mut(id, |p| {
                if p.port_type() == PortType::Midi {
                    p.midi_events.active.add_all_notes_off(0);
                }
            });
        }
        tracing::info!("sent all-notes-off everywhere");
    }

    /// Copy the engine outs into the backend-facing buffers.
    fn fill_out_bufs(&self, nframes: u32) {
        let n = nframes as usize;
        self.cycle_state.with_mut(|s| {
            self.registry.with_port(self.monitor_out.0, |p| {
                s.out_l[..n].copy_from_slice(&p.buf[..n]);
            });
            self.registry.with_port(self.monitor_out.1, |p| {
                s.out_r[..n].copy_from_slice(&p.buf[..n]);
            });
        });
    }

    /// Silence the backend-facing buffers (skipped cycle).
    fn clear_output_buffers(&self, nframes: u32) {
        let n = nframes as usize;
        self.cycle_state.with_mut(|s| {
            let n = n.min(s.out_l.len());
            crate::dsp::fill(&mut s.out_l[..n], 0.0);
            crate::dsp::fill(&mut s.out_r[..n], 0.0);
        });
    }

    /// Read the last processed cycle's output (backend boundary).
    pub fn copy_output(&self, out_l: &mut [f32], out_r: &mut [f32]) {
        self.cycle_state.with(|s| {
            let n = out_l.len().min(s.out_l.len());
            out_l[..n].copy_from_slice(&s.out_l[..n]);
            let n = out_r.len().min(s.out_r.len());
            out_r[..n].copy_from_slice(&s.out_r[..n]);
        });
    }

    /// Last computed musical positions (before/current).
    pub fn position_infos(&self) -> (PositionInfo, PositionInfo) {
        self.cycle_state.with(|s| (s.pos_before, s.pos_current))
    }
}

fn elapsed_ms_since_epoch() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn test_engine(block: u32) -> AudioEngine {
        let engine = AudioEngine::new(EngineConfig {
            sample_rate: 48000,
            block_length: block,
            workers: 0,
        })
        .unwrap();
        engine.pre_setup();
        engine.setup().unwrap();
        engine.activate(true);
        engine
    }

    #[test]
    fn test_lifecycle() {
        let engine = test_engine(256);
        assert_eq!(engine.block_length(), 256);
        assert_eq!(engine.sample_rate(), 48000);
        assert!(engine.run.get());
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(AudioEngine::new(EngineConfig {
            sample_rate: 12345,
            block_length: 256,
            workers: 0,
        })
        .is_err());
    }

    #[test]
    fn test_cycle_produces_denormal_when_stopped() {
        let engine = test_engine(256);
        engine.process(256);

        let mut l = vec![9.0; 256];
        let mut r = vec![9.0; 256];
        engine.copy_output(&mut l, &mut r);
        // a handful of denormal-sized biases may sum along the chain
        assert!(l.iter().all(|&v| v != 9.0 && v.abs() < 1e-9));
        assert!(r.iter().all(|&v| v.abs() < 1e-9));
    }

    #[test]
    fn test_denormal_sign_flips() {
        let engine = test_engine(256);
        engine.process(256);
        let first = engine.denormal_prevention_val();
        engine.process(256);
        let second = engine.denormal_prevention_val();
        assert!(first * second < 0.0);
    }

    #[test]
    fn test_not_running_outputs_silence() {
        let engine = test_engine(256);
        engine.activate(false);
        engine.process(256);

        let mut l = vec![9.0; 256];
        let mut r = vec![9.0; 256];
        engine.copy_output(&mut l, &mut r);
        assert!(l.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_cycle_skipped_while_mutator_holds_lock() {
        let engine = test_engine(256);
        engine.port_operation_lock.acquire();
        engine.process(256);
        engine.port_operation_lock.release();

        let mut l = vec![9.0; 256];
        let mut r = vec![9.0; 256];
        engine.copy_output(&mut l, &mut r);
        assert!(l.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_pending_event_skips_cycle_until_pumped() {
        let engine = test_engine(256);
        engine.request_buffer_size(512);
        assert!(!engine.has_handled_buffer_size_change());

        // cycle is skipped while the event sits in the queue
        engine.process(256);
        let mut l = vec![9.0; 256];
        let mut r = vec![9.0; 256];
        engine.copy_output(&mut l, &mut r);
        assert!(l.iter().all(|&v| v == 0.0));

        engine.process_events();
        assert!(engine.has_handled_buffer_size_change());
        assert_eq!(engine.block_length(), 512);

        // buffers now hold the new size
        engine.registry.with_port(engine.monitor_out.0, |p| {
            assert_eq!(p.buf.len(), 512);
        });
        engine.process(512);
        let mut l = vec![9.0; 512];
        let mut r = vec![9.0; 512];
        engine.copy_output(&mut l, &mut r);
        assert!(l.iter().all(|&v| v.abs() < 1e-9));
    }

    #[test]
    fn test_unsupported_buffer_size_keeps_previous() {
        let engine = test_engine(256);
        engine.request_buffer_size(100);
        engine.process_events();
        assert_eq!(engine.block_length(), 256);
        assert!(engine.has_handled_buffer_size_change());
    }

    #[test]
    fn test_add_track_rebuilds_graph() {
        let engine = test_engine(256);
        let before = engine.graph.load_full().unwrap().node_count();
        engine.add_track("Audio 1", TrackKind::Audio).unwrap();
        let after = engine.graph.load_full().unwrap().node_count();
        assert!(after > before);
    }

    #[test]
    fn test_connect_cycle_rejected_and_rolled_back() {
        let engine = test_engine(256);
        let track = engine.add_track("Audio 1", TrackKind::Audio).unwrap();
        let (ch_l, _) = track.with(|t| t.channel.stereo_out).unwrap();
        let (proc_l, _) = track.with(|t| t.processor.with(|p| p.stereo_in)).unwrap();

        let count_before = engine.connections.connection_count();
        let result = engine.connect_ports(ch_l, proc_l, 1.0, false);
        assert!(matches!(result, Err(Error::CycleDetected(_))));
        assert_eq!(engine.connections.connection_count(), count_before);
        // the engine still has a working graph
        assert!(engine.graph.load_full().is_some());
    }

    #[test]
    fn test_playback_advances_playhead() {
        let engine = test_engine(256);
        engine.start_playback();
        engine.process(256);
        assert_eq!(engine.transport.playhead_frames(), 256);
    }

    #[test]
    fn test_loop_split_cycle() {
        let engine = test_engine(256);
        engine.transport.set_loop_range_frames(0, 48_000);
        engine.transport.looping.set(true);
        engine.transport.locate_frames(47_900);
        engine.start_playback();

        engine.process(256);
        // 100 frames to the loop end, then wrap: 47900 + 256 -> 156
        assert_eq!(engine.transport.playhead_frames(), 156);
    }

    #[test]
    fn test_midi_activity_feed() {
        let engine = test_engine(256);
        let mut tap = engine.take_midi_activity_tap().unwrap();
        // the tap can only be taken once
        assert!(engine.take_midi_activity_tap().is_none());

        engine.inject_midi(MidiEvent::note_on(0, 0, 60, 100));
        engine.process(256);

        let ev = tap.pop().unwrap();
        assert_eq!(ev.status(), 0x90);
        assert!(tap.pop().is_none());
    }

    #[test]
    fn test_exposed_port_meters() {
        let engine = test_engine(256);
        let master = engine
            .tracklist
            .with(|tl| tl.get(engine.master_track_id()))
            .unwrap();
        let (out_l, _) = master.with(|t| t.channel.stereo_out).unwrap();
        let mut tap = engine.expose_port(out_l).unwrap();

        engine.process(256);
        assert_eq!(tap.available(), 256);
        let mut out = vec![1.0f32; 256];
        assert_eq!(tap.read(&mut out), 256);
    }

    #[test]
    fn test_preroll_defers_rolling() {
        use crate::plugin::{DelayProcessor, PluginSlotType};

        let engine = test_engine(256);
        let track = engine.add_track("Audio 1", TrackKind::Audio).unwrap();
        engine
            .add_plugin(
                track.with(|t| t.id),
                PluginSlot {
                    slot_type: PluginSlotType::Insert,
                    index: 0,
                },
                Box::new(DelayProcessor::new(128)),
            )
            .unwrap();

        engine.start_playback();
        engine.process(256);
        // 128 preroll frames consumed before the playhead moves
        assert_eq!(engine.transport.playhead_frames(), 128);
    }
}
