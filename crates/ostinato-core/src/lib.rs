//! Real-time DAW engine core: processing graph, timeline, ports, faders
//! and transport.
//!
//! # Primary API
//!
//! - [`AudioEngine`]: cycle orchestration and all engine-owned state
//! - [`Transport`]: playhead, tempo, loop points, bars/beats arithmetic
//! - [`Track`] / [`Tracklist`]: tracks with processors, channels, regions
//! - [`Fader`] / [`Channel`]: the mixer strip
//! - [`Region`]: timeline clips (MIDI, audio, chord, automation)
//! - [`PluginProcessor`]: the opaque plugin contract
//!
//! The audio thread never allocates on steady state, never blocks and
//! never panics: precondition failures silence the cycle and set a flag.
//!
//! # Example
//!
//! ```ignore
//! use ostinato_core::prelude::*;
//!
//! let engine = AudioEngine::new(EngineConfig::default())?;
//! engine.pre_setup();
//! engine.setup()?;
//! engine.activate(true);
//!
//! let track = engine.add_track("Keys", TrackKind::Instrument)?;
//! engine.start_playback();
//! // backend drives engine.process(nframes) per callback
//! ```

pub mod error;
pub use error::{Error, Result};

pub mod config;
pub use config::{
    EngineConfig, AUTOMATION_RECORDING_TOUCH_REL_MS, BLOCK_LENGTHS, BLOCK_LENGTH_DEFAULT,
    ENGINE_MAX_EVENTS, FADER_DEFAULT_FADE_FRAMES, FADER_DEFAULT_FADE_FRAMES_SHORT,
    MIDI_BUF_SIZE, SAMPLE_RATES, STRIP_SIZE, TICKS_PER_QUARTER_NOTE,
};

// Lock-free primitives
pub mod lockfree;
pub use lockfree::{AtomicDouble, AtomicFlag, AtomicFloat, CycleSemaphore};

pub mod cell;
pub use cell::ProcCell;

pub mod ids;
pub use ids::IdAllocator;

// DSP slice kernels
pub mod dsp;

pub mod time;
pub use time::TimeInfo;

// Ports
pub mod port;
pub use port::{
    ConnectionsSnapshot, Port, PortConnection, PortConnectionManager, PortFlags, PortFlow,
    PortId, PortOwner, PortRange, PortRegistry, PortType,
};

// Metering rings
pub mod metering;
pub use metering::{meter_pair, midi_activity_pair, MeterRing, MeterTap, MidiActivityRing, MidiActivityTap};

// Audio pool
pub mod pool;
pub use pool::{AudioClip, AudioPool, PoolId};

// Timeline objects
pub mod region;
pub use region::{
    AudioRegionData, AutomationRegionData, ChordObject, ChordQuality, ChordRegionData,
    MidiNote, MidiRegionData, MusicalMode, Region, RegionId, RegionKind,
};

pub mod automation_track;
pub use automation_track::{AutomationMode, AutomationRecordMode, AutomationTrack};

// Processors
pub mod plugin;
pub use plugin::{
    DelayProcessor, GainProcessor, GateInstrument, PluginDescriptor, PluginInstance, PluginIo,
    PluginProcessor, PluginSlot, PluginSlotType,
};

pub mod fader;
pub use fader::{Fader, FaderProcessCtx, FaderType, MidiFaderMode};

pub mod channel;
pub use channel::{Channel, ChannelSend};

pub mod control_room;
pub use control_room::ControlRoom;

pub mod track;
pub use track::{processor::TrackProcessor, Track, TrackKind, Tracklist};

// Transport
pub mod transport;
pub use transport::{Metronome, PositionInfo, TimeSignature, Transport};

// Latency compensation
pub mod pdc;
pub use pdc::MonoDelay;

// Graph
pub mod graph;
pub use graph::{scheduler::GraphScheduler, GraphCtx, GraphNode, NodeKind, ProcessingGraph};

// Engine
pub mod engine;
pub use engine::{
    dummy::DummyAudioThread,
    events::{EngineEvent, EngineEventKind, EngineEventQueue},
    AudioEngine, BounceMode,
};

/// Convenience prelude for common imports.
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::engine::{AudioEngine, BounceMode};
    pub use crate::fader::{FaderType, MidiFaderMode};
    pub use crate::plugin::{PluginProcessor, PluginSlot, PluginSlotType};
    pub use crate::region::{MidiNote, Region, RegionId, RegionKind};
    pub use crate::track::TrackKind;
    pub use crate::transport::{TimeSignature, Transport};
    pub use crate::Result;
}
