//! # Ostinato — DAW audio engine
//!
//! Deterministic real-time audio engine core for a digital audio
//! workstation: a processing graph of tracks, plugins, faders and ports
//! advanced once per audio callback.
//!
//! ## Architecture
//!
//! Ostinato is an umbrella crate that coordinates:
//! - **ostinato-core** — engine runtime (graph, transport, ports, faders,
//!   channels, regions, pool, event queue)
//! - **ostinato-midi** — RT-safe MIDI events and event lists
//! - **ostinato-automation** — automation points and curve shapes
//!
//! ## Quick Start
//!
//! ```ignore
//! use ostinato::prelude::*;
//!
//! let engine = OstinatoEngine::builder()
//!     .sample_rate(48000)
//!     .block_length(256)
//!     .build()?;
//!
//! let keys = engine.add_instrument_track("Keys")?;
//! engine.transport().set_bpm(128.0);
//! engine.play();
//! ```
//!
//! A backend drives the engine by calling `engine.process(nframes)` from
//! its realtime callback; without a backend the built-in dummy DSP thread
//! does the same on a timer.

/// Re-export of ostinato-core for direct access.
pub use ostinato_core as core;

// Engine surface
pub use ostinato_core::{
    AudioClip, AudioEngine, AudioPool, AutomationMode, AutomationRecordMode, AutomationTrack,
    BounceMode, Channel, ControlRoom, EngineConfig, EngineEvent, EngineEventKind, Error, Fader,
    FaderType, MidiFaderMode, MusicalMode, PluginDescriptor, PluginIo, PluginProcessor,
    PluginSlot, PluginSlotType, PoolId, Port, PortConnection, PortFlags, PortFlow, PortId,
    PortRange, PortType, PositionInfo, ProcessingGraph, Region, RegionId, RegionKind, Result,
    TimeInfo, TimeSignature, Track, TrackKind, Tracklist, Transport,
};

// Timeline payloads
pub use ostinato_core::{
    AudioRegionData, AutomationRegionData, ChordObject, ChordQuality, ChordRegionData,
    MidiNote, MidiRegionData,
};

// Lock-free primitives
pub use ostinato_core::{AtomicDouble, AtomicFlag, AtomicFloat};

// MIDI subsystem
pub use ostinato_midi as midi;
pub use ostinato_midi::{MidiEvent, MidiEventList, Note, RawMidiEvent};

// Automation subsystem
pub use ostinato_automation as automation;
pub use ostinato_automation::{AutomationPoint, CurveAlgorithm, CurveOptions};

mod builder;
mod engine;

pub use builder::OstinatoEngineBuilder;
pub use engine::OstinatoEngine;

/// Convenience prelude for common imports.
pub mod prelude {
    pub use crate::{OstinatoEngine, OstinatoEngineBuilder};

    pub use crate::{
        AudioEngine, EngineConfig, Error, Result, TimeSignature, TrackKind, Transport,
    };

    pub use crate::{MidiEvent, MidiNote, Note, Region, RegionId, RegionKind};

    pub use crate::{AutomationPoint, CurveAlgorithm, CurveOptions};

    pub use crate::{PluginProcessor, PluginSlot, PluginSlotType};
}
