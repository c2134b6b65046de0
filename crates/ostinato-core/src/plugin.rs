//! Plugin wrapper.
//!
//! Plugins are opaque processors behind [`PluginProcessor`]; the engine
//! only sees their ports and the `(prepare, process)` pair. Format loaders
//! (LV2/VST/CLAP/...) live outside the core and hand boxed processors in.

use crate::error::{Error, Result};
use crate::port::{PortFlow, PortId, PortOwner, PortRegistry, PortType};
use crate::time::TimeInfo;
use ostinato_midi::MidiEventList;

/// Strip section a plugin sits in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PluginSlotType {
    MidiFx,
    Instrument,
    Insert,
}

/// Slot address inside a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PluginSlot {
    pub slot_type: PluginSlotType,
    /// Index inside the section; always 0 for the instrument.
    pub index: usize,
}

/// Static description of a plugin's I/O surface.
#[derive(Clone, Debug)]
pub struct PluginDescriptor {
    pub name: String,
    pub audio_in: bool,
    pub audio_out: bool,
    pub midi_in: bool,
    pub midi_out: bool,
}

/// Windowed I/O view handed to a plugin's `process`.
pub struct PluginIo<'a> {
    pub audio_in: [&'a [f32]; 2],
    pub audio_out: [&'a mut [f32]; 2],
    pub midi_in: &'a MidiEventList,
    pub midi_out: &'a mut MidiEventList,
}

/// The opaque plugin contract.
///
/// `process` must fill exactly `time.nframes` output frames; outputs are
/// zeroed beforehand so a violating plugin degrades to silence.
pub trait PluginProcessor: Send {
    fn descriptor(&self) -> PluginDescriptor;

    /// One-time setup. Errors mark the plugin failed and bypass it in the
    /// graph.
    fn instantiate(&mut self) -> Result<()> {
        Ok(())
    }

    fn prepare(&mut self, _sample_rate: u32, _max_block: u32) {}

    fn process(&mut self, io: &mut PluginIo<'_>, time: TimeInfo);

    fn disconnect(&mut self) {}

    /// Processing latency in frames, for graph-wide compensation.
    fn latency(&self) -> u32 {
        0
    }
}

/// Uniform facade the engine wires into channels.
pub struct PluginInstance {
    pub id: u64,
    pub name: String,
    pub slot: PluginSlot,
    processor: Box<dyn PluginProcessor>,
    pub instantiated: bool,
    pub failed: bool,
    pub bypass: bool,

    pub stereo_in: Option<(PortId, PortId)>,
    pub stereo_out: Option<(PortId, PortId)>,
    pub midi_in: Option<PortId>,
    pub midi_out: Option<PortId>,
}

impl PluginInstance {
    /// Wrap a processor and create its ports in the registry.
    pub fn new(
        id: u64,
        slot: PluginSlot,
        processor: Box<dyn PluginProcessor>,
        registry: &PortRegistry,
    ) -> Self {
        let desc = processor.descriptor();
        let owner = PortOwner::Plugin(id);

        let stereo_in = desc.audio_in.then(|| {
            (
                registry.create(
                    PortType::Audio,
                    PortFlow::Input,
                    format!("{} in L", desc.name),
                    "plugin_in_l",
                    owner,
                ),
                registry.create(
                    PortType::Audio,
                    PortFlow::Input,
                    format!("{} in R", desc.name),
                    "plugin_in_r",
                    owner,
                ),
            )
        });
        let stereo_out = desc.audio_out.then(|| {
            (
                registry.create(
                    PortType::Audio,
                    PortFlow::Output,
                    format!("{} out L", desc.name),
                    "plugin_out_l",
                    owner,
                ),
                registry.create(
                    PortType::Audio,
                    PortFlow::Output,
                    format!("{} out R", desc.name),
                    "plugin_out_r",
                    owner,
                ),
            )
        });
        let midi_in = desc.midi_in.then(|| {
            registry.create(
                PortType::Midi,
                PortFlow::Input,
                format!("{} MIDI in", desc.name),
                "plugin_midi_in",
                owner,
            )
        });
        let midi_out = desc.midi_out.then(|| {
            registry.create(
                PortType::Midi,
                PortFlow::Output,
                format!("{} MIDI out", desc.name),
                "plugin_midi_out",
                owner,
            )
        });

        Self {
            id,
            name: desc.name,
            slot,
            processor,
            instantiated: false,
            failed: false,
            bypass: false,
            stereo_in,
            stereo_out,
            midi_in,
            midi_out,
        }
    }

    /// Every port this plugin owns.
    pub fn ports(&self) -> Vec<PortId> {
        let mut ports = Vec::new();
        if let Some((l, r)) = self.stereo_in {
            ports.push(l);
            ports.push(r);
        }
        if let Some((l, r)) = self.stereo_out {
            ports.push(l);
            ports.push(r);
        }
        ports.extend(self.midi_in);
        ports.extend(self.midi_out);
        ports
    }

    pub fn instantiate(&mut self) -> Result<()> {
        match self.processor.instantiate() {
            Ok(()) => {
                self.instantiated = true;
                Ok(())
            }
            Err(err) => {
                self.failed = true;
                tracing::warn!(plugin = %self.name, %err, "plugin instantiation failed");
                Err(Error::PluginInstantiationFailed(self.name.clone()))
            }
        }
    }

    pub fn prepare(&mut self, sample_rate: u32, max_block: u32) {
        if self.instantiated && !self.failed {
            self.processor.prepare(sample_rate, max_block);
        }
    }

    pub fn disconnect(&mut self) {
        self.processor.disconnect();
    }

    pub fn latency(&self) -> u32 {
        if self.failed || self.bypass {
            0
        } else {
            self.processor.latency()
        }
    }

    /// Run the plugin for one window.
    ///
    /// Inputs were summed by the caller; outputs are zeroed here before the
    /// processor runs. Failed or bypassed plugins pass audio/MIDI through.
    pub fn process_block(&mut self, registry: &PortRegistry, time: TimeInfo) {
        let range = time.range();

        if self.failed || self.bypass {
            self.passthrough(registry, time);
            return;
        }

        // Port cells for this plugin are only touched by this node in this
        // window; see PortCell. The Arc handles below keep the cells alive
        // for the duration of the borrow.
        let empty_midi = MidiEventList::new();
        let silent_in = vec![0.0f32; time.nframes as usize];

        let in_l_cell = self.stereo_in.and_then(|(l, _)| registry.cell(l));
        let in_r_cell = self.stereo_in.and_then(|(_, r)| registry.cell(r));
        let midi_in_cell = self.midi_in.and_then(|id| registry.cell(id));

        let (in_l, in_r): (&[f32], &[f32]) = match (&in_l_cell, &in_r_cell) {
            // SAFETY: predecessors finished writing these ports.
            (Some(l), Some(r)) => unsafe {
                (&l.get().buf[range.clone()], &r.get().buf[range.clone()])
            },
            _ => (&silent_in[..], &silent_in[..]),
        };

        let midi_in_list = match &midi_in_cell {
            // SAFETY: predecessors finished writing this port.
            Some(cell) => unsafe { &cell.get().midi_events.active },
            None => &empty_midi,
        };

        let mut scratch_out_l = vec![0.0f32; time.nframes as usize];
        let mut scratch_out_r = vec![0.0f32; time.nframes as usize];
        let mut scratch_midi_out = MidiEventList::new();

        {
            let mut io = PluginIo {
                audio_in: [in_l, in_r],
                audio_out: [&mut scratch_out_l, &mut scratch_out_r],
                midi_in: midi_in_list,
                midi_out: &mut scratch_midi_out,
            };
            self.processor.process(&mut io, time);
        }

        if let Some((l, r)) = self.stereo_out {
            if let Some(cell) = registry.cell(l) {
                // SAFETY: this node owns its output ports in this window.
                let port = unsafe { cell.get_mut() };
                crate::dsp::copy(&mut port.buf[range.clone()], &scratch_out_l);
            }
            if let Some(cell) = registry.cell(r) {
                let port = unsafe { cell.get_mut() };
                crate::dsp::copy(&mut port.buf[range.clone()], &scratch_out_r);
            }
        }
        if let Some(id) = self.midi_out {
            if let Some(cell) = registry.cell(id) {
                let port = unsafe { cell.get_mut() };
                port.midi_events
                    .active
                    .append(&scratch_midi_out, time.local_offset, time.nframes);
                port.midi_events.active.sort();
            }
        }
    }

    /// Copy inputs straight to outputs (bypass and failure path).
    fn passthrough(&mut self, registry: &PortRegistry, time: TimeInfo) {
        let range = time.range();
        if let (Some((in_l, in_r)), Some((out_l, out_r))) = (self.stereo_in, self.stereo_out) {
            for (src, dst) in [(in_l, out_l), (in_r, out_r)] {
                let (Some(src_cell), Some(dst_cell)) = (registry.cell(src), registry.cell(dst))
                else {
                    continue;
                };
                // SAFETY: src was written by predecessors; dst is ours.
                unsafe {
                    let src_buf = &src_cell.get().buf[range.clone()];
                    let dst_port = dst_cell.get_mut();
                    crate::dsp::copy(&mut dst_port.buf[range.clone()], src_buf);
                }
            }
        }
        if let (Some(midi_in), Some(midi_out)) = (self.midi_in, self.midi_out) {
            let (Some(src_cell), Some(dst_cell)) =
                (registry.cell(midi_in), registry.cell(midi_out))
            else {
                return;
            };
            unsafe {
                let src = &src_cell.get().midi_events.active;
                let dst = dst_cell.get_mut();
                dst.midi_events
                    .active
                    .append(src, time.local_offset, time.nframes);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in processors
// ---------------------------------------------------------------------------

/// Stereo gain, the simplest possible insert.
pub struct GainProcessor {
    pub gain: f32,
}

impl GainProcessor {
    pub fn new(gain: f32) -> Self {
        Self { gain }
    }
}

impl PluginProcessor for GainProcessor {
    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor {
            name: "Gain".into(),
            audio_in: true,
            audio_out: true,
            midi_in: false,
            midi_out: false,
        }
    }

    fn process(&mut self, io: &mut PluginIo<'_>, _time: TimeInfo) {
        for ch in 0..2 {
            for (out, &inp) in io.audio_out[ch].iter_mut().zip(io.audio_in[ch].iter()) {
                *out = inp * self.gain;
            }
        }
    }
}

/// Fixed-latency passthrough, for delay-compensation tests.
pub struct DelayProcessor {
    delay: u32,
    bufs: [Vec<f32>; 2],
}

impl DelayProcessor {
    pub fn new(delay: u32) -> Self {
        Self {
            delay,
            bufs: [Vec::new(), Vec::new()],
        }
    }
}

impl PluginProcessor for DelayProcessor {
    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor {
            name: format!("Delay {}", self.delay),
            audio_in: true,
            audio_out: true,
            midi_in: false,
            midi_out: false,
        }
    }

    fn prepare(&mut self, _sample_rate: u32, _max_block: u32) {
        for buf in &mut self.bufs {
            buf.clear();
            buf.resize(self.delay as usize, 0.0);
        }
    }

    fn process(&mut self, io: &mut PluginIo<'_>, time: TimeInfo) {
        for ch in 0..2 {
            for i in 0..time.nframes as usize {
                self.bufs[ch].push(io.audio_in[ch][i]);
                io.audio_out[ch][i] = self.bufs[ch].remove(0);
            }
        }
    }

    fn latency(&self) -> u32 {
        self.delay
    }
}

/// Minimal instrument: outputs DC at `note_velocity/127` while any note is
/// held. Deterministic, which makes it ideal for engine tests.
pub struct GateInstrument {
    level: f32,
    held: u8,
}

impl GateInstrument {
    pub fn new() -> Self {
        Self {
            level: 0.0,
            held: 0,
        }
    }
}

impl Default for GateInstrument {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginProcessor for GateInstrument {
    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor {
            name: "Gate Instrument".into(),
            audio_in: false,
            audio_out: true,
            midi_in: true,
            midi_out: false,
        }
    }

    fn process(&mut self, io: &mut PluginIo<'_>, time: TimeInfo) {
        let mut events: Vec<_> = io.midi_in.iter().copied().collect();
        events.sort_by_key(|e| e.frame_offset);
        let mut event_idx = 0;

        for i in 0..time.nframes {
            while event_idx < events.len() && events[event_idx].frame_offset
                <= time.local_offset + i
            {
                let ev = events[event_idx];
                if ev.is_note_on() {
                    self.held += 1;
                    self.level = ev.velocity().unwrap_or(100) as f32 / 127.0;
                } else if ev.is_note_off() {
                    self.held = self.held.saturating_sub(1);
                    if self.held == 0 {
                        self.level = 0.0;
                    }
                } else if matches!(
                    ev.msg,
                    ostinato_midi::ChannelVoiceMsg::ControlChange {
                        control: ostinato_midi::ControlChange::CC {
                            control: 120 | 123,
                            ..
                        },
                    }
                ) {
                    self.held = 0;
                    self.level = 0.0;
                }
                event_idx += 1;
            }
            io.audio_out[0][i as usize] = self.level;
            io.audio_out[1][i as usize] = self.level;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ostinato_midi::MidiEvent;

    fn setup(processor: Box<dyn PluginProcessor>) -> (PortRegistry, PluginInstance) {
        let registry = PortRegistry::new();
        let slot = PluginSlot {
            slot_type: PluginSlotType::Insert,
            index: 0,
        };
        let mut plugin = PluginInstance::new(1, slot, processor, &registry);
        plugin.instantiate().unwrap();
        plugin.prepare(48000, 64);
        for id in plugin.ports() {
            registry.with_port_mut(id, |p| p.alloc_buffer(64));
        }
        (registry, plugin)
    }

    #[test]
    fn test_gain_processes() {
        let (registry, mut plugin) = setup(Box::new(GainProcessor::new(0.5)));
        let (in_l, _) = plugin.stereo_in.unwrap();
        registry.with_port_mut(in_l, |p| crate::dsp::fill(&mut p.buf, 1.0));

        plugin.process_block(&registry, TimeInfo::new(0, 0, 64));

        let (out_l, out_r) = plugin.stereo_out.unwrap();
        registry.with_port(out_l, |p| {
            assert!(p.buf.iter().all(|&v| (v - 0.5).abs() < 1e-6));
        });
        // right input was silent
        registry.with_port(out_r, |p| {
            assert!(p.buf.iter().all(|&v| v == 0.0));
        });
    }

    #[test]
    fn test_bypass_passes_through() {
        let (registry, mut plugin) = setup(Box::new(GainProcessor::new(0.5)));
        plugin.bypass = true;
        let (in_l, _) = plugin.stereo_in.unwrap();
        registry.with_port_mut(in_l, |p| crate::dsp::fill(&mut p.buf, 1.0));

        plugin.process_block(&registry, TimeInfo::new(0, 0, 64));

        let (out_l, _) = plugin.stereo_out.unwrap();
        registry.with_port(out_l, |p| {
            assert!(p.buf.iter().all(|&v| (v - 1.0).abs() < 1e-6));
        });
    }

    #[test]
    fn test_delay_latency_reported() {
        let (_registry, plugin) = setup(Box::new(DelayProcessor::new(32)));
        assert_eq!(plugin.latency(), 32);
    }

    #[test]
    fn test_delay_shifts_samples() {
        let (registry, mut plugin) = setup(Box::new(DelayProcessor::new(4)));
        let (in_l, _) = plugin.stereo_in.unwrap();
        registry.with_port_mut(in_l, |p| {
            for (i, v) in p.buf.iter_mut().enumerate() {
                *v = i as f32;
            }
        });

        plugin.process_block(&registry, TimeInfo::new(0, 0, 64));

        let (out_l, _) = plugin.stereo_out.unwrap();
        registry.with_port(out_l, |p| {
            assert_eq!(&p.buf[..8], &[0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 3.0]);
        });
    }

    #[test]
    fn test_gate_instrument_follows_notes() {
        let (registry, mut plugin) = setup(Box::new(GateInstrument::new()));
        let midi_in = plugin.midi_in.unwrap();
        registry.with_port_mut(midi_in, |p| {
            p.midi_events.active.push(MidiEvent::note_on(8, 0, 60, 127));
            p.midi_events.active.push(MidiEvent::note_off(32, 0, 60, 0));
        });

        plugin.process_block(&registry, TimeInfo::new(0, 0, 64));

        let (out_l, _) = plugin.stereo_out.unwrap();
        registry.with_port(out_l, |p| {
            assert_eq!(p.buf[0], 0.0);
            assert!((p.buf[8] - 1.0).abs() < 1e-6);
            assert!((p.buf[31] - 1.0).abs() < 1e-6);
            assert_eq!(p.buf[32], 0.0);
        });
    }

    #[test]
    fn test_failed_plugin_bypasses() {
        struct FailingPlugin;
        impl PluginProcessor for FailingPlugin {
            fn descriptor(&self) -> PluginDescriptor {
                PluginDescriptor {
                    name: "Broken".into(),
                    audio_in: true,
                    audio_out: true,
                    midi_in: false,
                    midi_out: false,
                }
            }
            fn instantiate(&mut self) -> Result<()> {
                Err(Error::InvalidConfig("nope".into()))
            }
            fn process(&mut self, _io: &mut PluginIo<'_>, _time: TimeInfo) {
                panic!("must not run");
            }
        }

        let registry = PortRegistry::new();
        let slot = PluginSlot {
            slot_type: PluginSlotType::Insert,
            index: 0,
        };
        let mut plugin = PluginInstance::new(1, slot, Box::new(FailingPlugin), &registry);
        assert!(plugin.instantiate().is_err());
        assert!(plugin.failed);
        for id in plugin.ports() {
            registry.with_port_mut(id, |p| p.alloc_buffer(16));
        }

        let (in_l, _) = plugin.stereo_in.unwrap();
        registry.with_port_mut(in_l, |p| crate::dsp::fill(&mut p.buf, 0.25));
        plugin.process_block(&registry, TimeInfo::new(0, 0, 16));

        let (out_l, _) = plugin.stereo_out.unwrap();
        registry.with_port(out_l, |p| {
            assert!(p.buf.iter().all(|&v| (v - 0.25).abs() < 1e-6));
        });
    }
}
