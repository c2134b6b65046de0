//! Typed engine ports.
//!
//! A port is the unit of signal exchange between processors: audio and CV
//! ports own a block-sized `f32` buffer, MIDI ports own a queued/active
//! event list pair, control ports carry a single automatable value stored
//! atomically so non-realtime writers never need a lock.
//!
//! Ports are registered in a [`PortRegistry`] and referenced everywhere by
//! stable [`PortId`]s, never by ownership; connections between them live in
//! the [`connections::PortConnectionManager`].

pub mod connection;
pub mod connections;

use crate::lockfree::AtomicFloat;
use crate::metering::MeterRing;
use crate::time::TimeInfo;
use crossbeam_channel::{Receiver, Sender};
use dashmap::DashMap;
use ostinato_midi::{MidiEvent, MidiEvents};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub use connection::PortConnection;
pub use connections::{ConnectionsSnapshot, PortConnectionManager};

/// Stable port identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub u64);

impl std::fmt::Display for PortId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "port:{}", self.0)
    }
}

/// Signal type carried by a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortType {
    Audio,
    /// Control voltage: audio-rate control signal.
    Cv,
    Midi,
    /// Single automatable value, not block-rate.
    Control,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortFlow {
    Input,
    Output,
}

/// Who owns a port. Children store parent ids only; the registry resolves
/// them back to objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortOwner {
    Track(u64),
    Plugin(u64),
    Fader(u64),
    Channel(u64),
    Engine,
    HardwareProcessor,
}

/// Port behavior flags, packed like the original's identifier flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PortFlags(pub u32);

impl PortFlags {
    pub const AMPLITUDE: PortFlags = PortFlags(1 << 0);
    pub const STEREO_BALANCE: PortFlags = PortFlags(1 << 1);
    pub const TOGGLE: PortFlags = PortFlags(1 << 2);
    pub const FADER_MUTE: PortFlags = PortFlags(1 << 3);
    pub const FADER_SOLO: PortFlags = PortFlags(1 << 4);
    pub const FADER_LISTEN: PortFlags = PortFlags(1 << 5);
    pub const FADER_MONO_COMPAT: PortFlags = PortFlags(1 << 6);
    pub const FADER_SWAP_PHASE: PortFlags = PortFlags(1 << 7);
    pub const AUTOMATABLE: PortFlags = PortFlags(1 << 8);
    pub const CHANNEL_FADER: PortFlags = PortFlags(1 << 9);
    pub const PREFADER: PortFlags = PortFlags(1 << 10);
    pub const POSTFADER: PortFlags = PortFlags(1 << 11);
    pub const MONITOR_FADER: PortFlags = PortFlags(1 << 12);
    pub const PIANO_ROLL: PortFlags = PortFlags(1 << 13);

    #[inline]
    pub fn contains(self, other: PortFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn union(self, other: PortFlags) -> PortFlags {
        PortFlags(self.0 | other.0)
    }
}

impl std::ops::BitOr for PortFlags {
    type Output = PortFlags;
    fn bitor(self, rhs: PortFlags) -> PortFlags {
        self.union(rhs)
    }
}

/// Value range of a control port.
#[derive(Clone, Copy, Debug)]
pub struct PortRange {
    pub min: f32,
    pub max: f32,
    pub zero: f32,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 1.0,
            zero: 0.0,
        }
    }
}

impl PortRange {
    pub fn new(min: f32, max: f32, zero: f32) -> Self {
        Self { min, max, zero }
    }

    #[inline]
    pub fn clamp(&self, val: f32) -> f32 {
        val.clamp(self.min, self.max)
    }

    #[inline]
    pub fn normalize(&self, real: f32) -> f32 {
        if (self.max - self.min).abs() < f32::EPSILON {
            0.0
        } else {
            (real.clamp(self.min, self.max) - self.min) / (self.max - self.min)
        }
    }

    #[inline]
    pub fn denormalize(&self, normalized: f32) -> f32 {
        self.min + normalized.clamp(0.0, 1.0) * (self.max - self.min)
    }
}

/// Descriptive identity of a port.
#[derive(Clone, Debug)]
pub struct PortIdentifier {
    pub label: String,
    pub symbol: String,
    pub port_type: PortType,
    pub flow: PortFlow,
    pub owner: PortOwner,
    pub flags: PortFlags,
}

/// An engine port.
pub struct Port {
    id: PortId,
    pub ident: PortIdentifier,
    pub range: PortRange,

    /// Block buffer; length equals the engine block length for audio/CV
    /// ports, empty otherwise.
    pub buf: Vec<f32>,

    /// Event lists for MIDI ports.
    pub midi_events: MidiEvents,
    /// Cross-thread queue feeding `midi_events.queued`; producers clone the
    /// sender, the audio thread drains the receiver in `prepare`.
    midi_queue: Option<(Sender<MidiEvent>, Receiver<MidiEvent>)>,

    /// Control port value (real, inside `range`). Atomic so UI writes skip
    /// the port operation lock.
    control: AtomicFloat,
    /// Default control value.
    pub default_value: f32,
    /// Millisecond timestamp of the last control change, for touch-record.
    last_change_ms: AtomicU64,

    exposed: AtomicBool,
    /// Meter ring; present only while exposed to the backend.
    pub(crate) meter: Option<MeterRing>,
}

impl Port {
    pub fn new(
        id: PortId,
        port_type: PortType,
        flow: PortFlow,
        label: impl Into<String>,
        symbol: impl Into<String>,
        owner: PortOwner,
    ) -> Self {
        Self {
            id,
            ident: PortIdentifier {
                label: label.into(),
                symbol: symbol.into(),
                port_type,
                flow,
                owner,
                flags: PortFlags::default(),
            },
            range: PortRange::default(),
            buf: Vec::new(),
            midi_events: MidiEvents::new(),
            midi_queue: if port_type == PortType::Midi {
                Some(crossbeam_channel::bounded(crate::config::MIDI_BUF_SIZE))
            } else {
                None
            },
            control: AtomicFloat::new(0.0),
            default_value: 0.0,
            last_change_ms: AtomicU64::new(0),
            exposed: AtomicBool::new(false),
            meter: None,
        }
    }

    pub fn with_flags(mut self, flags: PortFlags) -> Self {
        self.ident.flags = self.ident.flags | flags;
        self
    }

    pub fn with_range(mut self, range: PortRange, default_value: f32) -> Self {
        self.range = range;
        self.default_value = default_value;
        self.control.set(default_value);
        self
    }

    #[inline]
    pub fn id(&self) -> PortId {
        self.id
    }

    #[inline]
    pub fn port_type(&self) -> PortType {
        self.ident.port_type
    }

    #[inline]
    pub fn flow(&self) -> PortFlow {
        self.ident.flow
    }

    #[inline]
    pub fn has_flag(&self, flags: PortFlags) -> bool {
        self.ident.flags.contains(flags)
    }

    /// (Re)allocate the block buffer. Called at setup and on buffer-size
    /// change, never during a cycle.
    pub fn alloc_buffer(&mut self, block_length: u32) {
        match self.ident.port_type {
            PortType::Audio | PortType::Cv => {
                self.buf.clear();
                self.buf.resize(block_length as usize, 0.0);
            }
            _ => {}
        }
    }

    /// Reset for a new cycle: fill the audio buffer with the denormal
    /// prevention bias, clear the active MIDI list and pull queued events
    /// for this window.
    pub fn prepare(&mut self, nframes: u32, denormal_prevention_val: f32) {
        match self.ident.port_type {
            PortType::Audio | PortType::Cv => {
                let n = (nframes as usize).min(self.buf.len());
                crate::dsp::fill(&mut self.buf[..n], denormal_prevention_val);
            }
            PortType::Midi => {
                self.midi_events.clear_active();
                if let Some((_, rx)) = &self.midi_queue {
                    while let Ok(ev) = rx.try_recv() {
                        self.midi_events.queued.push(ev);
                    }
                }
                self.midi_events.dequeue(0, nframes);
            }
            PortType::Control => {}
        }
    }

    /// Sender half of the MIDI queue, for non-realtime producers.
    pub fn midi_sender(&self) -> Option<Sender<MidiEvent>> {
        self.midi_queue.as_ref().map(|(tx, _)| tx.clone())
    }

    /// Current control value.
    #[inline]
    pub fn control_value(&self, normalized: bool) -> f32 {
        let real = self.control.get();
        if normalized {
            self.range.normalize(real)
        } else {
            real
        }
    }

    /// Set the control value, stamping the touch timestamp.
    pub fn set_control_value(&self, val: f32, normalized: bool) {
        let real = if normalized {
            self.range.denormalize(val)
        } else {
            self.range.clamp(val)
        };
        self.control.set(real);
        self.last_change_ms.store(now_ms(), Ordering::Release);
    }

    #[inline]
    pub fn is_toggled(&self) -> bool {
        self.control.get() > 0.001
    }

    pub fn set_toggled(&self, on: bool) {
        self.set_control_value(if on { 1.0 } else { 0.0 }, false);
    }

    /// Milliseconds since the last control change.
    pub fn ms_since_last_change(&self) -> u64 {
        now_ms().saturating_sub(self.last_change_ms.load(Ordering::Acquire))
    }

    /// Whether this port appears at the audio-I/O boundary. Idempotent.
    pub fn set_exposed(&self, exposed: bool) {
        self.exposed.store(exposed, Ordering::Release);
    }

    #[inline]
    pub fn is_exposed(&self) -> bool {
        self.exposed.load(Ordering::Acquire)
    }

    pub(crate) fn attach_meter(&mut self, meter: MeterRing) {
        self.meter = Some(meter);
    }

    /// Feed the processed window into the meter ring, if any.
    pub(crate) fn update_meter(&mut self, time: TimeInfo) {
        if let Some(meter) = &mut self.meter {
            if matches!(self.ident.port_type, PortType::Audio | PortType::Cv) {
                let range = time.range();
                if range.end <= self.buf.len() {
                    meter.push_block(&self.buf[range]);
                }
            }
        }
    }
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Interior-mutable port slot.
///
/// SAFETY: exclusive access discipline is enforced by scheduling, not the
/// type system:
/// - during a cycle, only the node owning the port takes `&mut Port`, and
///   only after every writer of its fan-in sources has finished (topological
///   order);
/// - outside a cycle, mutators hold the engine's port operation semaphore,
///   which the audio thread's `try_acquire` respects by skipping the cycle;
/// - cross-thread writes that may race a cycle (control values, exposure,
///   MIDI queueing) go through atomics or channels on `&Port`.
pub struct PortCell(UnsafeCell<Port>);

unsafe impl Send for PortCell {}
unsafe impl Sync for PortCell {}

impl PortCell {
    pub fn new(port: Port) -> Self {
        Self(UnsafeCell::new(port))
    }

    /// SAFETY: caller must have exclusive access per the discipline above.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn get_mut(&self) -> &mut Port {
        &mut *self.0.get()
    }

    /// SAFETY: caller must guarantee no concurrent `&mut` access.
    pub(crate) unsafe fn get(&self) -> &Port {
        &*self.0.get()
    }
}

/// Registry of all ports, keyed by id.
///
/// Writes (insert/remove) happen at setup or under the port operation lock;
/// the audio thread only performs `get` lookups (read shard lock).
pub struct PortRegistry {
    ports: DashMap<PortId, Arc<PortCell>>,
    next_id: AtomicU64,
}

impl Default for PortRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PortRegistry {
    pub fn new() -> Self {
        Self {
            ports: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn alloc_id(&self) -> PortId {
        PortId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Create and register a port, returning its id.
    pub fn create(
        &self,
        port_type: PortType,
        flow: PortFlow,
        label: impl Into<String>,
        symbol: impl Into<String>,
        owner: PortOwner,
    ) -> PortId {
        let id = self.alloc_id();
        let port = Port::new(id, port_type, flow, label, symbol, owner);
        self.ports.insert(id, Arc::new(PortCell::new(port)));
        id
    }

    pub fn insert(&self, port: Port) -> PortId {
        let id = port.id();
        self.ports.insert(id, Arc::new(PortCell::new(port)));
        id
    }

    pub fn remove(&self, id: PortId) {
        self.ports.remove(&id);
    }

    pub fn contains(&self, id: PortId) -> bool {
        self.ports.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub(crate) fn cell(&self, id: PortId) -> Option<Arc<PortCell>> {
        self.ports.get(&id).map(|entry| entry.value().clone())
    }

    /// Run `f` with shared access to the port.
    ///
    /// For control-thread reads of RT-stable data (identity, flags) and for
    /// atomic field access. Must not be used to observe audio buffers while
    /// a cycle runs.
    pub fn with_port<R>(&self, id: PortId, f: impl FnOnce(&Port) -> R) -> Option<R> {
        let cell = self.cell(id)?;
        // SAFETY: see PortCell; callers touch identity/atomics only.
        Some(f(unsafe { cell.get() }))
    }

    /// Run `f` with exclusive access to the port.
    ///
    /// Caller must hold the port operation lock (or be the audio thread
    /// inside the node that owns this port).
    pub fn with_port_mut<R>(&self, id: PortId, f: impl FnOnce(&mut Port) -> R) -> Option<R> {
        let cell = self.cell(id)?;
        // SAFETY: see PortCell.
        Some(f(unsafe { cell.get_mut() }))
    }

    /// Ids of every registered port.
    pub fn ids(&self) -> Vec<PortId> {
        self.ports.iter().map(|entry| *entry.key()).collect()
    }

    /// Reallocate every audio/CV buffer for a new block length.
    ///
    /// Caller must hold the port operation lock.
    pub fn realloc_buffers(&self, block_length: u32) {
        for entry in self.ports.iter() {
            // SAFETY: port operation lock held; no cycle is running.
            unsafe { entry.value().get_mut() }.alloc_buffer(block_length);
        }
    }
}
