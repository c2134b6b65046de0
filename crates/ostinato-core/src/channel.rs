//! Channel strips.
//!
//! A channel owns a fixed plugin strip (MIDI FX, optional instrument,
//! inserts), a prefader/fader pair, sends, and the channel output ports.
//! Strip rewiring follows the prev/next rules: a plugin connects to the
//! nearest occupied slot on either side, falling back to the track
//! processor upstream and the prefader downstream.

use crate::cell::ProcCell;
use crate::config::STRIP_SIZE;
use crate::error::{Error, Result};
use crate::fader::{Fader, FaderType};
use crate::ids::IdAllocator;
use crate::plugin::{PluginInstance, PluginSlot, PluginSlotType};
use crate::port::{
    PortConnectionManager, PortFlow, PortId, PortOwner, PortRegistry, PortType,
};
use crate::track::processor::TrackProcessor;
use std::sync::Arc;

/// A post-fader send to another track.
#[derive(Clone, Copy, Debug)]
pub struct ChannelSend {
    pub slot: usize,
    pub enabled: bool,
    pub amount: f32,
    pub dest_track_id: u64,
}

/// Port surface of one strip element, for wiring.
#[derive(Clone, Copy, Debug, Default)]
struct IoPorts {
    stereo_out: Option<(PortId, PortId)>,
    stereo_in: Option<(PortId, PortId)>,
    midi_out: Option<PortId>,
    midi_in: Option<PortId>,
}

/// The mixer strip of one track.
pub struct Channel {
    pub track_id: u64,
    /// Whether the channel's output is MIDI (no instrument, no audio).
    pub is_midi_out: bool,

    pub midi_fx: [Option<Arc<ProcCell<PluginInstance>>>; STRIP_SIZE],
    pub instrument: Option<Arc<ProcCell<PluginInstance>>>,
    pub inserts: [Option<Arc<ProcCell<PluginInstance>>>; STRIP_SIZE],
    pub sends: Vec<ChannelSend>,

    pub prefader: Arc<ProcCell<Fader>>,
    pub fader: Arc<ProcCell<Fader>>,

    pub stereo_out: Option<(PortId, PortId)>,
    pub midi_out: Option<PortId>,
    /// Group/master track this channel routes into.
    pub output_track_id: Option<u64>,
}

impl Channel {
    pub fn new(
        track_id: u64,
        is_midi_out: bool,
        ids: &IdAllocator,
        registry: &PortRegistry,
    ) -> Self {
        let fader_type = if is_midi_out {
            FaderType::MidiChannel
        } else {
            FaderType::AudioChannel
        };
        let prefader = Arc::new(ProcCell::new(Fader::new(
            ids.alloc(),
            fader_type,
            true,
            Some(track_id),
            registry,
        )));
        let fader = Arc::new(ProcCell::new(Fader::new(
            ids.alloc(),
            fader_type,
            false,
            Some(track_id),
            registry,
        )));

        let owner = PortOwner::Channel(track_id);
        let (stereo_out, midi_out) = if is_midi_out {
            (
                None,
                Some(registry.create(
                    PortType::Midi,
                    PortFlow::Output,
                    "Ch MIDI out",
                    "ch_midi_out",
                    owner,
                )),
            )
        } else {
            (
                Some((
                    registry.create(
                        PortType::Audio,
                        PortFlow::Output,
                        "Ch Stereo out L",
                        "ch_stereo_out_l",
                        owner,
                    ),
                    registry.create(
                        PortType::Audio,
                        PortFlow::Output,
                        "Ch Stereo out R",
                        "ch_stereo_out_r",
                        owner,
                    ),
                )),
                None,
            )
        };

        Self {
            track_id,
            is_midi_out,
            midi_fx: Default::default(),
            instrument: None,
            inserts: Default::default(),
            sends: Vec::new(),
            prefader,
            fader,
            stereo_out,
            midi_out,
            output_track_id: None,
        }
    }

    /// Wire the fixed spine: prefader -> fader -> channel outs, plus the
    /// processor -> prefader link while the strip is empty.
    pub fn connect(&self, processor: &TrackProcessor, connections: &PortConnectionManager) {
        let prefader_io = self.fader_io(&self.prefader);
        let fader_io = self.fader_io(&self.fader);

        connect_io(connections, &prefader_io, &fader_io, true);

        if let (Some((fl, fr)), Some((cl, cr))) = (fader_io.stereo_out, self.stereo_out) {
            connections.ensure_connect(fl, cl, 1.0, true);
            connections.ensure_connect(fr, cr, 1.0, true);
        }
        if let (Some(fm), Some(cm)) = (fader_io.midi_out, self.midi_out) {
            connections.ensure_connect(fm, cm, 1.0, true);
        }

        connect_io(
            connections,
            &processor_io(processor),
            &prefader_io,
            false,
        );
    }

    fn fader_io(&self, fader: &Arc<ProcCell<Fader>>) -> IoPorts {
        fader.with(|f| IoPorts {
            stereo_in: f.stereo_in,
            stereo_out: f.stereo_out,
            midi_in: f.midi_in,
            midi_out: f.midi_out,
        })
    }

    fn plugin_io(plugin: &Arc<ProcCell<PluginInstance>>) -> IoPorts {
        plugin.with(|p| IoPorts {
            stereo_in: p.stereo_in,
            stereo_out: p.stereo_out,
            midi_in: p.midi_in,
            midi_out: p.midi_out,
        })
    }

    pub fn slot_ref(&self, slot: PluginSlot) -> &Option<Arc<ProcCell<PluginInstance>>> {
        match slot.slot_type {
            PluginSlotType::MidiFx => &self.midi_fx[slot.index],
            PluginSlotType::Instrument => &self.instrument,
            PluginSlotType::Insert => &self.inserts[slot.index],
        }
    }

    fn slot_mut(&mut self, slot: PluginSlot) -> &mut Option<Arc<ProcCell<PluginInstance>>> {
        match slot.slot_type {
            PluginSlotType::MidiFx => &mut self.midi_fx[slot.index],
            PluginSlotType::Instrument => &mut self.instrument,
            PluginSlotType::Insert => &mut self.inserts[slot.index],
        }
    }

    /// Nearest occupied slot before `slot` in signal order.
    fn prev_plugin(&self, slot: PluginSlot) -> Option<Arc<ProcCell<PluginInstance>>> {
        match slot.slot_type {
            PluginSlotType::MidiFx => self.midi_fx[..slot.index]
                .iter()
                .rev()
                .flatten()
                .next()
                .cloned(),
            PluginSlotType::Instrument => {
                self.midi_fx.iter().rev().flatten().next().cloned()
            }
            PluginSlotType::Insert => self.inserts[..slot.index]
                .iter()
                .rev()
                .flatten()
                .next()
                .cloned()
                .or_else(|| self.instrument.clone())
                .or_else(|| self.midi_fx.iter().rev().flatten().next().cloned()),
        }
    }

    /// Nearest occupied slot after `slot` in signal order.
    fn next_plugin(&self, slot: PluginSlot) -> Option<Arc<ProcCell<PluginInstance>>> {
        match slot.slot_type {
            PluginSlotType::MidiFx => self.midi_fx[slot.index + 1..]
                .iter()
                .flatten()
                .next()
                .cloned()
                .or_else(|| self.instrument.clone())
                .or_else(|| self.inserts.iter().flatten().next().cloned()),
            PluginSlotType::Instrument => self.inserts.iter().flatten().next().cloned(),
            PluginSlotType::Insert => self.inserts[slot.index + 1..]
                .iter()
                .flatten()
                .next()
                .cloned(),
        }
    }

    /// Place a plugin into `slot` and splice it into the strip.
    pub fn add_plugin(
        &mut self,
        plugin: Arc<ProcCell<PluginInstance>>,
        slot: PluginSlot,
        processor: &TrackProcessor,
        connections: &PortConnectionManager,
    ) -> Result<()> {
        if slot.index >= STRIP_SIZE && slot.slot_type != PluginSlotType::Instrument {
            return Err(Error::SlotOccupied(slot.index));
        }
        if self.slot_ref(slot).is_some() {
            return Err(Error::SlotOccupied(slot.index));
        }

        plugin.with_mut(|p| p.slot = slot);
        *self.slot_mut(slot) = Some(plugin.clone());

        let pl_io = Self::plugin_io(&plugin);
        let prefader_io = self.fader_io(&self.prefader);
        let proc_io = processor_io(processor);

        let prev = self.prev_plugin(slot);
        let next = self.next_plugin(slot);
        // the slot holds the new plugin already; prev/next never return it
        // because the searches exclude `slot.index` itself

        match (prev, next) {
            (None, None) => {
                disconnect_io(connections, &proc_io, &prefader_io);
                connect_io(connections, &proc_io, &pl_io, false);
                connect_io(connections, &pl_io, &prefader_io, false);
            }
            (None, Some(next)) => {
                let next_io = Self::plugin_io(&next);
                disconnect_io(connections, &proc_io, &next_io);
                connect_io(connections, &proc_io, &pl_io, false);
                connect_io(connections, &pl_io, &next_io, false);
            }
            (Some(prev), None) => {
                let prev_io = Self::plugin_io(&prev);
                disconnect_io(connections, &prev_io, &prefader_io);
                connect_io(connections, &prev_io, &pl_io, false);
                connect_io(connections, &pl_io, &prefader_io, false);
            }
            (Some(prev), Some(next)) => {
                let prev_io = Self::plugin_io(&prev);
                let next_io = Self::plugin_io(&next);
                disconnect_io(connections, &prev_io, &next_io);
                connect_io(connections, &prev_io, &pl_io, false);
                connect_io(connections, &pl_io, &next_io, false);
            }
        }
        Ok(())
    }

    /// Remove the plugin at `slot`, rewiring its neighbors together and
    /// dropping all hardware exposure for its ports.
    pub fn remove_plugin(
        &mut self,
        slot: PluginSlot,
        processor: &TrackProcessor,
        registry: &PortRegistry,
        connections: &PortConnectionManager,
    ) -> Option<Arc<ProcCell<PluginInstance>>> {
        let plugin = self.slot_mut(slot).take()?;
        let pl_io = Self::plugin_io(&plugin);
        let prefader_io = self.fader_io(&self.prefader);
        let proc_io = processor_io(processor);

        let prev = self.prev_plugin(slot);
        let next = self.next_plugin(slot);

        match (prev, next) {
            (None, None) => {
                disconnect_io(connections, &proc_io, &pl_io);
                disconnect_io(connections, &pl_io, &prefader_io);
                connect_io(connections, &proc_io, &prefader_io, false);
            }
            (None, Some(next)) => {
                let next_io = Self::plugin_io(&next);
                disconnect_io(connections, &proc_io, &pl_io);
                disconnect_io(connections, &pl_io, &next_io);
                connect_io(connections, &proc_io, &next_io, false);
            }
            (Some(prev), None) => {
                let prev_io = Self::plugin_io(&prev);
                disconnect_io(connections, &prev_io, &pl_io);
                disconnect_io(connections, &pl_io, &prefader_io);
                connect_io(connections, &prev_io, &prefader_io, false);
            }
            (Some(prev), Some(next)) => {
                let prev_io = Self::plugin_io(&prev);
                let next_io = Self::plugin_io(&next);
                disconnect_io(connections, &prev_io, &pl_io);
                disconnect_io(connections, &pl_io, &next_io);
                connect_io(connections, &prev_io, &next_io, false);
            }
        }

        plugin.with_mut(|p| {
            for port in p.ports() {
                registry.with_port(port, |port| port.set_exposed(false));
                connections.disconnect_all_for_port(port);
            }
            p.disconnect();
        });
        Some(plugin)
    }

    /// Every plugin on the strip, signal order.
    pub fn plugins(&self) -> Vec<Arc<ProcCell<PluginInstance>>> {
        self.midi_fx
            .iter()
            .flatten()
            .chain(self.instrument.iter())
            .chain(self.inserts.iter().flatten())
            .cloned()
            .collect()
    }

    /// Add a post-fader send and wire it.
    pub fn add_send(
        &mut self,
        dest_track_id: u64,
        dest_io_stereo_in: Option<(PortId, PortId)>,
        dest_io_midi_in: Option<PortId>,
        amount: f32,
        connections: &PortConnectionManager,
    ) {
        let slot = self.sends.len();
        let fader_io = self.fader_io(&self.fader);
        if let (Some((fl, fr)), Some((dl, dr))) = (fader_io.stereo_out, dest_io_stereo_in) {
            connections.ensure_connect(fl, dl, amount, false);
            connections.ensure_connect(fr, dr, amount, false);
        }
        if let (Some(fm), Some(dm)) = (fader_io.midi_out, dest_io_midi_in) {
            connections.ensure_connect(fm, dm, 1.0, false);
        }
        self.sends.push(ChannelSend {
            slot,
            enabled: true,
            amount,
            dest_track_id,
        });
    }
}

fn processor_io(processor: &TrackProcessor) -> IoPorts {
    IoPorts {
        stereo_in: processor.stereo_in,
        stereo_out: processor.stereo_out,
        midi_in: processor.midi_in,
        midi_out: processor.midi_out,
    }
}

/// Connect whatever signal types both sides share.
fn connect_io(
    connections: &PortConnectionManager,
    from: &IoPorts,
    to: &IoPorts,
    locked: bool,
) {
    if let (Some((sl, sr)), Some((dl, dr))) = (from.stereo_out, to.stereo_in) {
        connections.ensure_connect(sl, dl, 1.0, locked);
        connections.ensure_connect(sr, dr, 1.0, locked);
    }
    if let (Some(sm), Some(dm)) = (from.midi_out, to.midi_in) {
        connections.ensure_connect(sm, dm, 1.0, locked);
    }
}

fn disconnect_io(connections: &PortConnectionManager, from: &IoPorts, to: &IoPorts) {
    if let (Some((sl, sr)), Some((dl, dr))) = (from.stereo_out, to.stereo_in) {
        let _ = connections.disconnect(sl, dl);
        let _ = connections.disconnect(sr, dr);
    }
    if let (Some(sm), Some(dm)) = (from.midi_out, to.midi_in) {
        let _ = connections.disconnect(sm, dm);
    }
}
