//! Tracks and the tracklist.

pub mod processor;

use crate::automation_track::AutomationTrack;
use crate::cell::ProcCell;
use crate::channel::Channel;
use crate::ids::IdAllocator;
use crate::port::{PortId, PortRegistry};
use crate::region::{Region, RegionId};
use processor::TrackProcessor;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackKind {
    /// MIDI in, MIDI out (no instrument).
    Midi,
    /// MIDI in, audio out via the instrument slot.
    Instrument,
    Audio,
    Master,
    /// Audio group bus; other channels route into it.
    Group,
}

impl TrackKind {
    pub fn has_midi_input(self) -> bool {
        matches!(self, TrackKind::Midi | TrackKind::Instrument)
    }

    pub fn has_midi_output(self) -> bool {
        self == TrackKind::Midi
    }
}

/// A track: processor + channel + timeline content.
pub struct Track {
    pub id: u64,
    pub name: String,
    pub kind: TrackKind,
    pub processor: Arc<ProcCell<TrackProcessor>>,
    pub channel: Channel,
    pub automation_tracks: Vec<AutomationTrack>,
    /// MIDI/audio regions; a region's `lane_or_at_idx` is its lane.
    pub lanes: Vec<Region>,
    pub bounce: bool,
    pub bounce_to_master: bool,
    pub frozen: bool,
    /// Child track ids when this is a group target (Group/Master).
    pub children: Vec<u64>,
}

impl Track {
    pub fn new(
        id: u64,
        name: impl Into<String>,
        kind: TrackKind,
        ids: &IdAllocator,
        registry: &PortRegistry,
    ) -> Self {
        let processor = TrackProcessor::new(id, kind.has_midi_input(), registry);
        let channel = Channel::new(id, kind.has_midi_output(), ids, registry);
        Self {
            id,
            name: name.into(),
            kind,
            processor: Arc::new(ProcCell::new(processor)),
            channel,
            automation_tracks: Vec::new(),
            lanes: Vec::new(),
            bounce: false,
            bounce_to_master: false,
            frozen: false,
            children: Vec::new(),
        }
    }

    #[inline]
    pub fn is_master(&self) -> bool {
        self.kind == TrackKind::Master
    }

    pub fn soloed(&self, registry: &PortRegistry) -> bool {
        self.channel.fader.with(|f| f.get_soloed(registry))
    }

    pub fn muted(&self, registry: &PortRegistry) -> bool {
        self.channel.fader.with(|f| f.get_muted(registry))
    }

    pub fn listened(&self, registry: &PortRegistry) -> bool {
        self.channel.fader.with(|f| f.get_listened(registry))
    }

    pub fn add_region(&mut self, mut region: Region, lane: usize) -> RegionId {
        region.track_id = self.id;
        region.lane_or_at_idx = lane;
        let id = region.id;
        self.lanes.push(region);
        self.lanes.sort_by_key(|r| r.start_pos);
        id
    }

    pub fn remove_region(&mut self, id: RegionId) -> Option<Region> {
        let idx = self.lanes.iter().position(|r| r.id == id)?;
        Some(self.lanes.remove(idx))
    }

    /// Automation track targeting `port`, if any.
    pub fn automation_track_for_port(&self, port: PortId) -> Option<&AutomationTrack> {
        self.automation_tracks.iter().find(|at| at.port_id == port)
    }
}

/// All tracks, in mixer order.
pub struct Tracklist {
    tracks: Vec<Arc<ProcCell<Track>>>,
}

impl Default for Tracklist {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracklist {
    pub fn new() -> Self {
        Self { tracks: Vec::new() }
    }

    pub fn add(&mut self, track: Track) -> Arc<ProcCell<Track>> {
        let cell = Arc::new(ProcCell::new(track));
        self.tracks.push(cell.clone());
        cell
    }

    pub fn get(&self, id: u64) -> Option<Arc<ProcCell<Track>>> {
        self.tracks
            .iter()
            .find(|t| t.with(|track| track.id) == id)
            .cloned()
    }

    pub fn remove(&mut self, id: u64) -> Option<Arc<ProcCell<Track>>> {
        let idx = self
            .tracks
            .iter()
            .position(|t| t.with(|track| track.id) == id)?;
        Some(self.tracks.remove(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ProcCell<Track>>> {
        self.tracks.iter()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn has_soloed(&self, registry: &PortRegistry) -> bool {
        self.tracks.iter().any(|t| t.with(|tr| tr.soloed(registry)))
    }

    pub fn has_listened(&self, registry: &PortRegistry) -> bool {
        self.tracks
            .iter()
            .any(|t| t.with(|tr| tr.listened(registry)))
    }

    /// Post-fader stereo outs of every listened audio track.
    pub fn listened_fader_outs(&self, registry: &PortRegistry) -> Vec<(PortId, PortId)> {
        self.tracks
            .iter()
            .filter(|t| t.with(|tr| tr.listened(registry)))
            .filter_map(|t| t.with(|tr| tr.channel.fader.with(|f| f.stereo_out)))
            .collect()
    }

    /// Whether a track is audible because an ancestor output or a
    /// descendant group child is (implied-)soloed.
    pub fn implied_soloed(&self, track_id: u64, registry: &PortRegistry) -> bool {
        let Some(track) = self.get(track_id) else {
            return false;
        };
        if track.with(|t| t.soloed(registry)) {
            // directly soloed is not "implied"
            return false;
        }

        // ancestors: walk the output chain
        let mut visited = HashSet::new();
        let mut current = track.with(|t| t.channel.output_track_id);
        while let Some(out_id) = current {
            if !visited.insert(out_id) {
                break;
            }
            let Some(out_track) = self.get(out_id) else {
                break;
            };
            if out_track.with(|t| t.soloed(registry)) {
                return true;
            }
            current = out_track.with(|t| t.channel.output_track_id);
        }

        // descendants: any group child soloed or itself implied
        let children = track.with(|t| t.children.clone());
        let mut visited = HashSet::new();
        self.any_descendant_soloed(&children, registry, &mut visited)
    }

    fn any_descendant_soloed(
        &self,
        children: &[u64],
        registry: &PortRegistry,
        visited: &mut HashSet<u64>,
    ) -> bool {
        for &child_id in children {
            if !visited.insert(child_id) {
                continue;
            }
            let Some(child) = self.get(child_id) else {
                continue;
            };
            if child.with(|t| t.soloed(registry)) {
                return true;
            }
            let grandchildren = child.with(|t| t.children.clone());
            if self.any_descendant_soloed(&grandchildren, registry, visited) {
                return true;
            }
        }
        false
    }
}
